use super::{format_numbers, open_session, spawn_refresher};
use crate::config::CliConfig;
use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use lotto_core::{DrawState, TicketBoardDiff, TicketBoardEntry};

fn board_table(entries: &[TicketBoardEntry]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "Numbers", "Matched", "Source", "Created"]);

    for entry in entries {
        let ticket = &entry.ticket;
        table.add_row(vec![
            ticket.name.clone(),
            format_numbers(&ticket.numbers),
            format_numbers(&ticket.matched_numbers),
            ticket.source.map_or("-", |s| s.as_str()).to_string(),
            ticket.created_at.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }

    table
}

fn print_draw(draw: &DrawState) {
    println!("Draw: {}", draw.status);
    println!("  Numbers: {}", format_numbers(&draw.numbers));
    if let Some(controller) = &draw.controller_id {
        println!("  Controller: {}", controller);
    }
    if let Some(message) = draw.error.as_ref().and_then(|e| e.message.as_deref()) {
        println!("  Error: {}", message);
    }
}

pub async fn show_board(config: &CliConfig) -> Result<()> {
    let (_, session) = open_session(config).await?;
    let state = session.load_state().await?;

    println!("Session: {}", session.session_key());
    print_draw(&state.draw);
    println!();

    if state.board.is_empty() {
        println!("No tickets yet.");
        println!("Issue one with: lotto issue <name> <n1> <n2> <n3> <n4> <n5> <n6>");
        return Ok(());
    }

    println!("{}", board_table(&state.board));
    println!("Total: {}", state.board.len());
    Ok(())
}

fn print_diff(diff: &TicketBoardDiff, total: usize) {
    for entry in &diff.added {
        println!(
            "+ {} [{}]",
            entry.ticket.name,
            format_numbers(&entry.ticket.numbers)
        );
    }
    for entry in &diff.updated {
        println!(
            "~ {} matched [{}]",
            entry.ticket.name,
            format_numbers(&entry.ticket.matched_numbers)
        );
    }
    for id in &diff.removed {
        println!("- {}", id);
    }
    println!("  ({} tickets)", total);
}

pub async fn watch_session(config: &CliConfig) -> Result<()> {
    let (store, session) = open_session(config).await?;
    let mut tickets = session.ticket_feed().await?;
    let mut draw = session.draw_feed().await?;
    let refresher = spawn_refresher(store);

    println!("Watching session '{}' (Ctrl-C to stop)", session.session_key());

    loop {
        tokio::select! {
            update = tickets.next() => match update {
                Some(Ok(update)) if !update.diff.is_empty() => print_diff(&update.diff, update.total),
                Some(Ok(_)) => {}
                Some(Err(e)) => println!("! {}", e.user_message()),
                None => break,
            },
            update = draw.next() => match update {
                Some(Ok(state)) => print_draw(&state),
                Some(Err(e)) => println!("! {}", e.user_message()),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    refresher.abort();
    Ok(())
}
