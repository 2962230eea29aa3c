mod board;
mod draw;
mod tickets;

pub use board::{show_board, watch_session};
pub use draw::{host_draw, reset_session, start_draw, step_draw};
pub use tickets::{issue_auto, issue_ticket};

use crate::config::CliConfig;
use anyhow::Result;
use lotto_core::{LottoSession, SqliteStore};
use std::sync::Arc;
use std::time::Duration;

/// How often long-running commands pick up other processes' writes.
const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

async fn open_session(config: &CliConfig) -> Result<(Arc<SqliteStore>, LottoSession)> {
    let store = Arc::new(SqliteStore::new(&config.db_path()).await?);
    let session = LottoSession::new(store.clone(), config.session.clone())?;
    Ok((store, session))
}

/// Polls the database so subscribers hear about commits from other processes.
fn spawn_refresher(store: Arc<SqliteStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = store.refresh().await {
                tracing::warn!("Failed to refresh session database: {}", e);
            }
        }
    })
}

fn format_numbers(numbers: &[u8]) -> String {
    if numbers.is_empty() {
        return "-".to_string();
    }
    numbers
        .iter()
        .map(|n| format!("{:>2}", n))
        .collect::<Vec<_>>()
        .join(" ")
}
