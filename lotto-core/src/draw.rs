//! Draw state machine.
//!
//! `idle -> in_progress -> completed`, with `error` reachable from anywhere and
//! `reset` returning to `idle`. Every transition is a transaction function over
//! the committed draw document, so concurrent clients get at most one winner per
//! transition.

use crate::error::{ConflictKind, LotteryError, Result};
use crate::rng::RandomSource;
use crate::store::{draw_path, session_path, DocumentStore, TxDecision};
use crate::types::{timestamp_now, DrawError, DrawState, DrawStatus};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawStepResult {
    pub number: u8,
    pub numbers: Vec<u8>,
    pub completed: bool,
}

/// State written by a successful `start`, or `None` if the draw cannot start.
pub fn begin_draw(
    current: &DrawState,
    controller_id: &str,
    seed: &str,
    started_at: &str,
) -> Option<DrawState> {
    if current.status != DrawStatus::Idle || !current.numbers.is_empty() {
        return None;
    }

    Some(DrawState {
        numbers: Vec::new(),
        seed: Some(seed.to_string()),
        started_at: Some(started_at.to_string()),
        completed_at: None,
        status: DrawStatus::InProgress,
        controller_id: Some(controller_id.to_string()),
        error: None,
    })
}

/// Whether `client_id` may append a number to `current`.
///
/// `expected_count` pins the step to the generation the caller observed.
pub fn can_step(current: &DrawState, client_id: &str, expected_count: Option<usize>) -> bool {
    current.status == DrawStatus::InProgress
        && !current.is_full()
        && current.is_controlled_by(client_id)
        && expected_count.map_or(true, |count| count == current.numbers.len())
}

/// Appends `number`, completing the draw when it is the last one.
pub fn append_number(current: &DrawState, number: u8, now: &str) -> DrawState {
    let mut next = current.clone();
    next.numbers.push(number);
    next.error = None;

    if next.is_full() {
        next.status = DrawStatus::Completed;
        next.completed_at = Some(now.to_string());
    } else {
        next.status = DrawStatus::InProgress;
        next.completed_at = None;
    }

    next
}

pub struct DrawEngine {
    store: Arc<dyn DocumentStore>,
    session_key: String,
    rng: RandomSource,
}

impl DrawEngine {
    pub fn new(store: Arc<dyn DocumentStore>, session_key: impl Into<String>, rng: RandomSource) -> Self {
        Self {
            store,
            session_key: session_key.into(),
            rng,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Reads the committed draw document.
    pub async fn current(&self) -> Result<DrawState> {
        let raw = self.store.get(&draw_path(&self.session_key)).await?;
        Ok(DrawState::from_value(raw.as_ref()))
    }

    /// Claims the session for `controller_id` and opens the draw.
    pub async fn start(&self, controller_id: &str, seed: Option<String>) -> Result<DrawState> {
        let result = self.try_start(controller_id, seed).await;
        if let Err(e) = &result {
            self.log_failure("start", e);
        }
        result
    }

    async fn try_start(&self, controller_id: &str, seed: Option<String>) -> Result<DrawState> {
        let seed = match seed {
            Some(seed) => seed,
            None => self.rng.draw_seed()?,
        };
        let started_at = timestamp_now();

        let outcome = self
            .store
            .transact(&draw_path(&self.session_key), &mut |current| {
                let state = DrawState::from_value(current.as_ref());
                match begin_draw(&state, controller_id, &seed, &started_at) {
                    Some(next) => TxDecision::Commit(next.to_value()),
                    None => TxDecision::Abort,
                }
            })
            .await?;

        if !outcome.committed {
            return Err(LotteryError::Conflict(ConflictKind::AlreadyInProgress));
        }

        tracing::info!(
            event = "draw:start",
            session = %self.session_key,
            seed = %seed,
            client_id = %controller_id,
            "Draw started"
        );

        Ok(DrawState::from_value(outcome.snapshot.as_ref()))
    }

    /// Draws the next number if `client_id` is allowed to drive the draw.
    pub async fn step(&self, client_id: &str) -> Result<DrawStepResult> {
        self.advance(client_id, None).await
    }

    /// Like [`DrawEngine::step`], but aborts unless the committed draw still holds
    /// exactly `observed_count` numbers.
    pub async fn step_from(&self, client_id: &str, observed_count: usize) -> Result<DrawStepResult> {
        self.advance(client_id, Some(observed_count)).await
    }

    async fn advance(&self, client_id: &str, expected_count: Option<usize>) -> Result<DrawStepResult> {
        let result = self.try_advance(client_id, expected_count).await;
        if let Err(e) = &result {
            self.log_failure("step", e);
        }
        result
    }

    async fn try_advance(&self, client_id: &str, expected_count: Option<usize>) -> Result<DrawStepResult> {
        let now = timestamp_now();
        let rng = &self.rng;
        let mut failure: Option<LotteryError> = None;

        let outcome = self
            .store
            .transact(&draw_path(&self.session_key), &mut |current| {
                failure = None;
                let state = DrawState::from_value(current.as_ref());
                if !can_step(&state, client_id, expected_count) {
                    return TxDecision::Abort;
                }

                match rng.next_draw_number(&state.numbers) {
                    Ok(number) => TxDecision::Commit(append_number(&state, number, &now).to_value()),
                    Err(e) => {
                        failure = Some(e);
                        TxDecision::Abort
                    }
                }
            })
            .await?;

        if let Some(e) = failure {
            return Err(e);
        }

        if !outcome.committed {
            return Err(LotteryError::Conflict(ConflictKind::StepRejected));
        }

        let committed = DrawState::from_value(outcome.snapshot.as_ref());
        let number = committed
            .latest_number()
            .ok_or_else(|| LotteryError::internal("Transaction did not yield a drawn number"))?;
        let completed = committed.is_full();

        tracing::info!(
            event = "draw:step",
            session = %self.session_key,
            number,
            step_index = committed.numbers.len(),
            "Drew {}",
            number
        );

        if completed {
            tracing::info!(
                event = "draw:complete",
                session = %self.session_key,
                numbers = ?committed.numbers,
                "Draw completed"
            );
        }

        Ok(DrawStepResult {
            number,
            numbers: committed.numbers,
            completed,
        })
    }

    /// Moves the draw into `error`, keeping drawn numbers for inspection.
    pub async fn mark_error(&self, code: &str, message: &str) -> Result<DrawState> {
        let timestamp = timestamp_now();
        let outcome = self
            .store
            .transact(&draw_path(&self.session_key), &mut |current| {
                let mut state = DrawState::from_value(current.as_ref());
                state.status = DrawStatus::Error;
                state.error = Some(DrawError {
                    code: Some(code.to_string()),
                    message: Some(message.to_string()),
                    timestamp: Some(timestamp.clone()),
                });
                TxDecision::Commit(state.to_value())
            })
            .await?;

        tracing::error!(
            event = "draw:error",
            session = %self.session_key,
            stage = "mark_error",
            code,
            "Draw marked as failed: {}",
            message
        );

        Ok(DrawState::from_value(outcome.snapshot.as_ref()))
    }

    /// Wipes the session: idle draw, no tickets. Not guarded by controller so an
    /// abandoned session can always be recovered.
    pub async fn reset(&self) -> Result<()> {
        tracing::info!(event = "reset:start", session = %self.session_key, "Resetting session");

        let idle = json!({
            "draw": DrawState::default().to_value(),
            "tickets": {}
        });

        let result = self
            .store
            .transact(&session_path(&self.session_key), &mut |_| {
                TxDecision::Commit(idle.clone())
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(event = "reset:success", session = %self.session_key, "Session reset");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    event = "reset:error",
                    session = %self.session_key,
                    error = %e,
                    "Session reset failed"
                );
                Err(e)
            }
        }
    }

    fn log_failure(&self, stage: &str, error: &LotteryError) {
        if error.is_conflict() {
            tracing::warn!(
                event = "draw:error",
                session = %self.session_key,
                stage,
                error = %error,
                "Draw {} not committed",
                stage
            );
        } else {
            tracing::error!(
                event = "draw:error",
                session = %self.session_key,
                stage,
                error = %error,
                "Draw {} failed",
                stage
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededEntropy;
    use crate::store::MemoryStore;

    fn engine(store: Arc<MemoryStore>) -> DrawEngine {
        DrawEngine::new(store, "test", RandomSource::new(Arc::new(SeededEntropy::new(1))))
    }

    #[test]
    fn test_begin_requires_idle_and_empty() {
        let idle = DrawState::default();
        let started = begin_draw(&idle, "host", "seed", "2025-01-01T00:00:00.000Z").unwrap();
        assert_eq!(started.status, DrawStatus::InProgress);
        assert_eq!(started.controller_id.as_deref(), Some("host"));

        assert!(begin_draw(&started, "host", "seed", "now").is_none());

        let dirty = DrawState {
            numbers: vec![4],
            ..DrawState::default()
        };
        assert!(begin_draw(&dirty, "host", "seed", "now").is_none());
    }

    #[test]
    fn test_can_step_guards() {
        let state = DrawState {
            numbers: vec![1, 2],
            status: DrawStatus::InProgress,
            controller_id: Some("host".to_string()),
            ..DrawState::default()
        };

        assert!(can_step(&state, "host", None));
        assert!(can_step(&state, "host", Some(2)));
        assert!(!can_step(&state, "host", Some(1)));
        assert!(!can_step(&state, "guest", None));

        let unclaimed = DrawState {
            controller_id: None,
            ..state.clone()
        };
        assert!(can_step(&unclaimed, "guest", None));

        let full = DrawState {
            numbers: vec![1, 2, 3, 4, 5, 6],
            ..state
        };
        assert!(!can_step(&full, "host", None));
    }

    #[test]
    fn test_append_completes_on_sixth() {
        let state = DrawState {
            numbers: vec![1, 2, 3, 4, 5],
            status: DrawStatus::InProgress,
            ..DrawState::default()
        };
        let next = append_number(&state, 9, "done");
        assert_eq!(next.status, DrawStatus::Completed);
        assert_eq!(next.completed_at.as_deref(), Some("done"));
        assert_eq!(next.numbers, vec![1, 2, 3, 4, 5, 9]);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);

        engine.start("host", Some("seed-1".into())).await.unwrap();
        let err = engine.start("other", None).await.unwrap_err();
        assert!(matches!(
            err,
            LotteryError::Conflict(ConflictKind::AlreadyInProgress)
        ));

        let state = engine.current().await.unwrap();
        assert_eq!(state.controller_id.as_deref(), Some("host"));
        assert_eq!(state.seed.as_deref(), Some("seed-1"));
        assert!(state.numbers.is_empty());
    }

    #[tokio::test]
    async fn test_full_draw_sequence() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        engine.start("host", None).await.unwrap();

        let mut seen = Vec::new();
        for index in 1..=6 {
            let result = engine.step("host").await.unwrap();
            seen.push(result.number);
            assert_eq!(result.numbers.len(), index);
            assert_eq!(result.completed, index == 6);
        }

        let mut unique = seen.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 6);
        assert!(seen.iter().all(|n| (1..=45).contains(n)));

        let state = engine.current().await.unwrap();
        assert_eq!(state.status, DrawStatus::Completed);
        assert_eq!(state.numbers, seen);
        assert!(state.completed_at.is_some());

        let err = engine.step("host").await.unwrap_err();
        assert!(matches!(err, LotteryError::Conflict(ConflictKind::StepRejected)));
    }

    #[tokio::test]
    async fn test_step_rejected_for_other_client() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        engine.start("host", None).await.unwrap();

        assert!(engine.step("guest").await.unwrap_err().is_conflict());
        assert!(engine.current().await.unwrap().numbers.is_empty());
    }

    #[tokio::test]
    async fn test_stale_step_from_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        engine.start("host", None).await.unwrap();

        engine.step_from("host", 0).await.unwrap();
        assert!(engine.step_from("host", 0).await.unwrap_err().is_conflict());
        engine.step_from("host", 1).await.unwrap();
        assert_eq!(engine.current().await.unwrap().numbers.len(), 2);
    }

    #[tokio::test]
    async fn test_step_before_start_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        assert!(engine.step("host").await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_reset_mid_draw_clears_everything() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("/sessions/test/tickets/t1", json!({ "name": "A", "numbers": [1, 2, 3, 4, 5, 6] }))
            .await
            .unwrap();
        let engine = engine(store.clone());
        engine.start("host", None).await.unwrap();
        engine.step("host").await.unwrap();

        engine.reset().await.unwrap();

        let state = engine.current().await.unwrap();
        assert_eq!(state, DrawState::default());
        assert_eq!(store.get("/sessions/test/tickets").await.unwrap(), None);

        // a fresh draw can start after reset, by anyone
        engine.start("guest", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_error_keeps_numbers() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        engine.start("host", None).await.unwrap();
        engine.step("host").await.unwrap();

        let state = engine.mark_error("rng", "entropy lost").await.unwrap();
        assert_eq!(state.status, DrawStatus::Error);
        assert_eq!(state.numbers.len(), 1);
        assert_eq!(
            state.error.and_then(|e| e.message).as_deref(),
            Some("entropy lost")
        );

        assert!(engine.step("host").await.unwrap_err().is_conflict());
        assert!(engine.start("host", None).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        store.fail_next_write("network down");

        let err = engine.start("host", None).await.unwrap_err();
        assert!(matches!(err, LotteryError::Transport(_)));
    }
}
