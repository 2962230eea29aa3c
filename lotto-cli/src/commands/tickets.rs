use super::{format_numbers, open_session};
use crate::config::CliConfig;
use anyhow::Result;

pub async fn issue_ticket(config: &CliConfig, name: &str, numbers: &[i64]) -> Result<()> {
    let (_, session) = open_session(config).await?;

    match session.issue_ticket(name, numbers).await {
        Ok(ticket_id) => print_ticket(&session, &ticket_id).await,
        Err(e) if e.is_validation() => {
            println!("{}", e.user_message());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn issue_auto(config: &CliConfig, name: &str, numbers: &[u8]) -> Result<()> {
    let (_, session) = open_session(config).await?;

    match session.issue_auto(name, numbers).await {
        Ok(ticket_id) => print_ticket(&session, &ticket_id).await,
        Err(e) if e.is_validation() => {
            println!("{}", e.user_message());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn print_ticket(session: &lotto_core::LottoSession, ticket_id: &str) -> Result<()> {
    let tickets = session.tickets_snapshot().await?;

    println!("Ticket issued!");
    println!("  ID: {}", ticket_id);
    if let Some(ticket) = tickets.get(ticket_id) {
        println!("  Name: {}", ticket.name);
        println!("  Numbers: {}", format_numbers(&ticket.numbers));
    }
    println!("  Session: {}", session.session_key());
    Ok(())
}
