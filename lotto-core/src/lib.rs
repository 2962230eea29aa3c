//! Lotto core - shared lottery draw sessions
//!
//! Many clients issue 6-of-45 tickets into a session while one controlling
//! client draws numbers on a fixed cadence. All coordination goes through a
//! compare-and-swap document store; there is no server-side logic.

pub mod cadence;
pub mod config;
pub mod draw;
pub mod error;
pub mod matching;
pub mod projection;
pub mod rng;
pub mod session;
pub mod store;
pub mod tickets;
pub mod types;

pub use cadence::{DrawCadenceController, DrawControls, SlotStatus, TimelineSlot};
pub use config::SessionConfig;
pub use draw::{DrawEngine, DrawStepResult};
pub use error::{ConflictKind, LotteryError, Result};
pub use matching::MatchReconciler;
pub use projection::{DrawFeed, SessionState, TicketBoard, TicketFeed};
pub use rng::{EntropySource, OsEntropy, RandomSource, SeededEntropy};
pub use session::LottoSession;
pub use store::{DocumentStore, MemoryStore, Notification, SqliteStore, Subscription};
pub use tickets::{IssueTicketRequest, TicketRegistry, TicketSelection};
pub use types::{
    DrawError, DrawState, DrawStatus, TicketBoardDiff, TicketBoardEntry, TicketBoardUpdate,
    TicketRecord, TicketSource, TicketsMap,
};
