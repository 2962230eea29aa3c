use super::{format_numbers, open_session, spawn_refresher};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use dialoguer::Confirm;
use lotto_core::{DrawCadenceController, DrawControls, DrawStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn observed_cadence(session: &lotto_core::LottoSession) -> Result<DrawCadenceController> {
    let mut cadence = session.cadence();
    cadence.observe_tickets(session.tickets_snapshot().await?);
    cadence.observe_draw(session.draw_state().await?).await;
    Ok(cadence)
}

fn report_blocked(controls: &DrawControls, fallback: &str) {
    match &controls.error {
        Some(message) => println!("{}", message),
        None => println!("{}", fallback),
    }
}

pub async fn start_draw(config: &CliConfig) -> Result<()> {
    let (_, session) = open_session(config).await?;
    let mut cadence = observed_cadence(&session).await?;

    match cadence.start_draw().await {
        Ok(Some(state)) => {
            println!("Draw started!");
            println!("  Session: {}", session.session_key());
            println!("  Controller: {}", session.client_id());
            if let Some(seed) = state.seed {
                println!("  Seed: {}", seed);
            }
            println!("Run 'lotto host' to draw on a timer, or 'lotto step' to draw now.");
        }
        Ok(None) => report_blocked(
            &cadence.controls(),
            "A draw already exists in this session. Reset it first.",
        ),
        Err(e) if e.is_conflict() => println!("{}", e.user_message()),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub async fn step_draw(config: &CliConfig) -> Result<()> {
    let (_, session) = open_session(config).await?;
    let mut cadence = observed_cadence(&session).await?;

    match cadence.force_next().await {
        Ok(Some(step)) => {
            println!("Drew {}", step.number);
            println!("  Numbers: {}", format_numbers(&step.numbers));
            if step.completed {
                println!("Draw complete!");
            }
        }
        Ok(None) => report_blocked(&cadence.controls(), "No draw is in progress."),
        Err(e) if e.is_conflict() => println!("{}", e.user_message()),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub async fn reset_session(config: &CliConfig, yes: bool) -> Result<()> {
    let (_, session) = open_session(config).await?;
    let mut cadence = observed_cadence(&session).await?;

    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Reset session '{}'? This removes the draw and every ticket.",
                session.session_key()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    if cadence.reset_session().await? {
        println!("Session '{}' reset.", session.session_key());
    } else {
        report_blocked(&cadence.controls(), "Reset already in progress.");
    }

    Ok(())
}

pub async fn host_draw(config: &CliConfig, interval: Option<u64>) -> Result<()> {
    let mut config = config.clone();
    if let Some(seconds) = interval {
        config.session = config
            .session
            .with_step_interval(Duration::from_secs(seconds));
    }

    let (store, session) = open_session(&config).await?;
    let mut cadence = observed_cadence(&session).await?;

    if cadence.draw().status == DrawStatus::Idle {
        match cadence.start_draw().await? {
            Some(state) => cadence.observe_draw(state).await,
            None => {
                report_blocked(&cadence.controls(), "Cannot start a draw in this session.");
                return Ok(());
            }
        }
        println!("Draw started as {}", session.client_id());
    } else if !cadence.is_eligible() {
        let controls = cadence.controls();
        println!(
            "Draw is {} ({}); nothing to host.",
            controls.status,
            format_numbers(&controls.numbers)
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let ctrl_c_tx = Arc::clone(&shutdown_tx);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(true);
        }
    });
    let refresher = spawn_refresher(store);

    let draw_feed = session.draw_feed().await?;
    let ticket_feed = session.ticket_feed().await?;

    let mut last_line = String::new();
    cadence
        .run(draw_feed, ticket_feed, shutdown_rx, |controls| {
            let line = status_line(controls);
            if line != last_line {
                println!("{}", line);
                last_line = line;
            }
            if controls.status != DrawStatus::InProgress {
                let _ = shutdown_tx.send(true);
            }
        })
        .await?;

    ctrl_c.abort();
    refresher.abort();

    let state = session.draw_state().await?;
    if state.status == DrawStatus::Completed {
        println!("Draw complete: {}", format_numbers(&state.numbers));
    }
    Ok(())
}

fn status_line(controls: &DrawControls) -> String {
    let mut line = format!("[{}] {}", controls.status, format_numbers(&controls.numbers));
    if let Some(seconds) = controls.countdown_seconds {
        line.push_str(&format!("  next in {}s", seconds));
    }
    if let Some(error) = &controls.error {
        line.push_str(&format!("  ! {}", error));
    }
    line
}
