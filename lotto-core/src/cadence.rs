//! Per-client auto-advance of a running draw.
//!
//! Each client watches the draw document. The controlling client keeps exactly
//! one pending step timer, rescheduled from scratch whenever the observed draw
//! changes and aborted on controller loss, reset and teardown. Every step is
//! pinned to the number count it was scheduled for, so a timer that outlives
//! its generation can never advance a newer one.

use crate::config::SessionConfig;
use crate::draw::{DrawEngine, DrawStepResult};
use crate::error::Result;
use crate::matching::MatchReconciler;
use crate::projection::{DrawFeed, TicketFeed};
use crate::types::{DrawState, DrawStatus, TicketsMap, LOTTO_SELECTION_SIZE};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

pub const START_BLOCKED_MESSAGE: &str = "Another host is controlling the draw";
pub const NO_CONTROL_MESSAGE: &str = "You do not control this draw, so it cannot be advanced now";
pub const RESET_BLOCKED_MESSAGE: &str = "Only the controlling host can reset a draw in progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Active,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineSlot {
    /// 1-based.
    pub index: usize,
    pub number: Option<u8>,
    pub status: SlotStatus,
}

/// Six slots. While a draw runs, both the latest number and the next empty slot are active.
pub fn draw_timeline(numbers: &[u8], status: DrawStatus) -> Vec<TimelineSlot> {
    let running = status == DrawStatus::InProgress;

    (0..LOTTO_SELECTION_SIZE)
        .map(|index| {
            let number = numbers.get(index).copied();
            let status = match number {
                Some(_) if running && index + 1 == numbers.len() => SlotStatus::Active,
                Some(_) => SlotStatus::Complete,
                None if running && index == numbers.len() => SlotStatus::Active,
                None => SlotStatus::Pending,
            };

            TimelineSlot {
                index: index + 1,
                number,
                status,
            }
        })
        .collect()
}

/// Whole seconds left, rounded up.
pub fn countdown_seconds(remaining: Duration) -> u64 {
    let millis = remaining.as_millis() as u64;
    millis.div_ceil(1000)
}

/// Snapshot of what a draw screen shows and which actions are enabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawControls {
    pub status: DrawStatus,
    pub numbers: Vec<u8>,
    pub active_number: Option<u8>,
    pub countdown_seconds: Option<u64>,
    pub timeline: Vec<TimelineSlot>,
    pub seed: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub controller_id: Option<String>,
    pub is_controller: bool,
    pub can_start: bool,
    pub can_force_next: bool,
    pub can_reset: bool,
    pub is_starting: bool,
    pub is_stepping: bool,
    pub is_resetting: bool,
    pub error: Option<String>,
}

struct PendingStep {
    deadline: Instant,
    observed_count: usize,
    handle: JoinHandle<Result<DrawStepResult>>,
}

pub struct DrawCadenceController {
    engine: Arc<DrawEngine>,
    reconciler: MatchReconciler,
    client_id: String,
    step_interval: Duration,
    countdown_tick: Duration,
    draw: DrawState,
    observed: bool,
    tickets: TicketsMap,
    pending: Option<PendingStep>,
    is_starting: bool,
    is_stepping: bool,
    is_resetting: bool,
    action_error: Option<String>,
    draw_feed_error: Option<String>,
    ticket_feed_error: Option<String>,
}

impl DrawCadenceController {
    pub fn new(engine: Arc<DrawEngine>, reconciler: MatchReconciler, config: &SessionConfig) -> Self {
        Self {
            engine,
            reconciler,
            client_id: config.client_id.clone(),
            step_interval: config.step_interval,
            countdown_tick: config.countdown_tick,
            draw: DrawState::default(),
            observed: false,
            tickets: TicketsMap::new(),
            pending: None,
            is_starting: false,
            is_stepping: false,
            is_resetting: false,
            action_error: None,
            draw_feed_error: None,
            ticket_feed_error: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn draw(&self) -> &DrawState {
        &self.draw
    }

    /// No controller yet, or it is this client.
    pub fn is_controller(&self) -> bool {
        self.draw.is_controlled_by(&self.client_id)
    }

    /// Whether this client should be auto-advancing the observed draw.
    pub fn is_eligible(&self) -> bool {
        self.draw.status == DrawStatus::InProgress && !self.draw.is_full() && self.is_controller()
    }

    pub fn has_pending_step(&self) -> bool {
        self.pending.is_some()
    }

    /// Time until the scheduled step fires, clamped at zero.
    pub fn countdown(&self) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|step| step.deadline.saturating_duration_since(Instant::now()))
    }

    /// Feeds a draw snapshot in. Reschedules on any change and refreshes
    /// ticket matches when the drawn numbers moved.
    pub async fn observe_draw(&mut self, state: DrawState) {
        let first = !self.observed;
        let numbers_changed = first || state.numbers != self.draw.numbers;
        let changed = first || state != self.draw;

        self.observed = true;
        self.draw = state;

        if changed {
            self.reschedule();
        }

        if numbers_changed {
            self.highlight().await;
        }
    }

    /// Latest ticket snapshot, used by the next match refresh.
    pub fn observe_tickets(&mut self, tickets: TicketsMap) {
        self.tickets = tickets;
    }

    /// Steps now instead of waiting for the timer. Ineligible calls do nothing;
    /// a non-controller gets a message in [`DrawControls::error`].
    pub async fn force_next(&mut self) -> Result<Option<DrawStepResult>> {
        if !self.is_controller() {
            self.action_error = Some(NO_CONTROL_MESSAGE.to_string());
            return Ok(None);
        }

        if !self.is_eligible() || self.is_stepping {
            return Ok(None);
        }

        self.cancel_pending();
        self.is_stepping = true;
        self.action_error = None;

        let result = self
            .engine
            .step_from(&self.client_id, self.draw.numbers.len())
            .await;
        self.is_stepping = false;

        match result {
            Ok(step) => Ok(Some(step)),
            Err(e) => {
                self.action_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    /// Starts a draw with this client as controller, if the screen would allow it.
    pub async fn start_draw(&mut self) -> Result<Option<DrawState>> {
        if !self.is_controller() {
            self.action_error = Some(START_BLOCKED_MESSAGE.to_string());
            return Ok(None);
        }

        if self.is_starting || !self.draw.numbers.is_empty() || self.draw.status == DrawStatus::InProgress {
            return Ok(None);
        }

        self.is_starting = true;
        self.action_error = None;

        let result = self.engine.start(&self.client_id, None).await;
        self.is_starting = false;

        match result {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                self.action_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    /// Resets the session unless another client is controlling a running draw.
    /// Returns whether the reset went through.
    pub async fn reset_session(&mut self) -> Result<bool> {
        if self.is_resetting {
            return Ok(false);
        }

        if !self.is_controller() && self.draw.status == DrawStatus::InProgress {
            self.action_error = Some(RESET_BLOCKED_MESSAGE.to_string());
            return Ok(false);
        }

        self.is_resetting = true;
        self.action_error = None;
        self.cancel_pending();

        tracing::info!(
            session = %self.engine.session_key(),
            ticket_count = self.tickets.len(),
            draw_numbers = ?self.draw.numbers,
            "Reset requested by {}",
            self.client_id
        );

        let result = self.engine.reset().await;
        self.is_resetting = false;

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                self.action_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    pub fn controls(&self) -> DrawControls {
        let numbers = self.draw.numbers.clone();
        let status = self.draw.status;
        let is_controller = self.is_controller();
        let running = status == DrawStatus::InProgress;

        DrawControls {
            status,
            active_number: self.draw.latest_number(),
            countdown_seconds: self.countdown().map(countdown_seconds),
            timeline: draw_timeline(&numbers, status),
            seed: self.draw.seed.clone(),
            started_at: self.draw.started_at.clone(),
            completed_at: self.draw.completed_at.clone(),
            controller_id: self.draw.controller_id.clone(),
            is_controller,
            can_start: numbers.is_empty() && !running && !self.is_starting && is_controller,
            can_force_next: running && !self.draw.is_full() && !self.is_stepping && is_controller,
            can_reset: !self.is_resetting && (is_controller || !running),
            is_starting: self.is_starting,
            is_stepping: self.is_stepping,
            is_resetting: self.is_resetting,
            error: self
                .action_error
                .clone()
                .or_else(|| self.draw_feed_error.clone())
                .or_else(|| self.ticket_feed_error.clone())
                .or_else(|| self.draw.error.as_ref().and_then(|e| e.message.clone())),
            numbers,
        }
    }

    /// Drives the controller from live feeds until `shutdown` flips to true or
    /// a feed closes. `on_change` sees the controls after every event and on
    /// every countdown tick.
    pub async fn run(
        &mut self,
        mut draw_feed: DrawFeed,
        mut ticket_feed: TicketFeed,
        mut shutdown: watch::Receiver<bool>,
        mut on_change: impl FnMut(&DrawControls),
    ) -> Result<()> {
        let mut tick = tokio::time::interval(self.countdown_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                update = draw_feed.next() => match update {
                    Some(Ok(state)) => {
                        self.draw_feed_error = None;
                        self.observe_draw(state).await;
                    }
                    Some(Err(e)) => self.draw_feed_error = Some(e.user_message()),
                    None => break,
                },
                update = ticket_feed.next() => match update {
                    Some(Ok(_)) => {
                        self.ticket_feed_error = None;
                        self.observe_tickets(ticket_feed.latest().clone());
                    }
                    // the last good snapshot stays in use
                    Some(Err(e)) => self.ticket_feed_error = Some(e.user_message()),
                    None => break,
                },
                finished = wait_pending(&mut self.pending) => self.finish_pending(finished),
                _ = tick.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            on_change(&self.controls());
        }

        self.cancel_pending();
        Ok(())
    }

    fn reschedule(&mut self) {
        self.cancel_pending();
        if !self.is_eligible() {
            return;
        }

        let deadline = Instant::now() + self.step_interval;
        let observed_count = self.draw.numbers.len();
        let engine = Arc::clone(&self.engine);
        let client_id = self.client_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            engine.step_from(&client_id, observed_count).await
        });

        tracing::debug!(
            session = %self.engine.session_key(),
            observed_count,
            interval_ms = self.step_interval.as_millis() as u64,
            "Scheduled next draw step"
        );

        self.pending = Some(PendingStep {
            deadline,
            observed_count,
            handle,
        });
    }

    fn cancel_pending(&mut self) {
        if let Some(step) = self.pending.take() {
            step.handle.abort();
            tracing::debug!(
                session = %self.engine.session_key(),
                observed_count = step.observed_count,
                "Cancelled pending draw step"
            );
        }
    }

    /// A committed step arrives as a draw notification and reschedules from
    /// there. A failed one leaves the document unchanged, so retry on a fresh timer.
    fn finish_pending(&mut self, finished: std::result::Result<Result<DrawStepResult>, JoinError>) {
        self.pending = None;
        match finished {
            Ok(Ok(_)) => {
                self.action_error = None;
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    session = %self.engine.session_key(),
                    error = %e,
                    "Scheduled draw step failed"
                );
                self.action_error = Some(e.user_message());
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) => tracing::error!(error = %e, "Draw step task failed"),
        }

        if self.is_eligible() {
            self.reschedule();
        }
    }

    async fn highlight(&mut self) {
        if let Err(e) = self.reconciler.reconcile(&self.tickets, &self.draw.numbers).await {
            self.action_error.get_or_insert_with(|| e.user_message());
        }
    }
}

impl Drop for DrawCadenceController {
    fn drop(&mut self) {
        if let Some(step) = self.pending.take() {
            step.handle.abort();
        }
    }
}

async fn wait_pending(
    pending: &mut Option<PendingStep>,
) -> std::result::Result<Result<DrawStepResult>, JoinError> {
    match pending {
        Some(step) => (&mut step.handle).await,
        None => std::future::pending().await,
    }
}
