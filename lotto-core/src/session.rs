use crate::cadence::DrawCadenceController;
use crate::config::SessionConfig;
use crate::draw::{DrawEngine, DrawStepResult};
use crate::error::Result;
use crate::matching::MatchReconciler;
use crate::projection::{project_tickets, DrawFeed, SessionState, TicketFeed};
use crate::rng::RandomSource;
use crate::store::{draw_path, tickets_path, DocumentStore};
use crate::tickets::{IssueTicketRequest, TicketRegistry};
use crate::types::{tickets_from_value, DrawState, TicketBoardEntry, TicketsMap};
use std::sync::Arc;

/// One client's handle on a shared session. All components share the injected store.
pub struct LottoSession {
    config: SessionConfig,
    store: Arc<dyn DocumentStore>,
    engine: Arc<DrawEngine>,
    registry: TicketRegistry,
}

impl LottoSession {
    pub fn new(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Result<Self> {
        Self::with_rng(store, config, RandomSource::default())
    }

    pub fn with_rng(store: Arc<dyn DocumentStore>, config: SessionConfig, rng: RandomSource) -> Result<Self> {
        config.validate()?;

        let engine = Arc::new(DrawEngine::new(
            Arc::clone(&store),
            config.session_key.clone(),
            rng.clone(),
        ));
        let registry = TicketRegistry::new(Arc::clone(&store), config.session_key.clone(), rng);

        tracing::debug!(
            session = %config.session_key,
            client_id = %config.client_id,
            "Session opened"
        );

        Ok(Self {
            config,
            store,
            engine,
            registry,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_key(&self) -> &str {
        &self.config.session_key
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<DrawEngine> {
        &self.engine
    }

    pub fn tickets(&self) -> &TicketRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> MatchReconciler {
        MatchReconciler::new(Arc::clone(&self.store), self.config.session_key.clone())
    }

    pub fn cadence(&self) -> DrawCadenceController {
        DrawCadenceController::new(Arc::clone(&self.engine), self.reconciler(), &self.config)
    }

    /// Issues a manual ticket tagged with this client's id.
    pub async fn issue_ticket(&self, name: &str, numbers: &[i64]) -> Result<String> {
        let request = IssueTicketRequest::new(name, numbers.iter().copied())
            .with_client_id(self.config.client_id.clone());
        self.registry.issue(request).await
    }

    pub async fn issue_auto(&self, name: &str, partial: &[u8]) -> Result<String> {
        self.registry
            .issue_auto(name, partial, Some(&self.config.client_id))
            .await
    }

    pub async fn start_draw(&self) -> Result<DrawState> {
        self.engine.start(&self.config.client_id, None).await
    }

    pub async fn step_draw(&self) -> Result<DrawStepResult> {
        self.engine.step(&self.config.client_id).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.engine.reset().await
    }

    pub async fn draw_state(&self) -> Result<DrawState> {
        self.engine.current().await
    }

    pub async fn tickets_snapshot(&self) -> Result<TicketsMap> {
        let raw = self.store.get(&tickets_path(&self.config.session_key)).await?;
        Ok(tickets_from_value(raw.as_ref()))
    }

    pub async fn board(&self) -> Result<Vec<TicketBoardEntry>> {
        Ok(project_tickets(&self.tickets_snapshot().await?))
    }

    /// One-shot read of everything a screen needs.
    pub async fn load_state(&self) -> Result<SessionState> {
        let tickets = self.tickets_snapshot().await?;
        let draw = self.draw_state().await?;

        Ok(SessionState {
            board: project_tickets(&tickets),
            tickets,
            draw,
            tickets_loading: false,
            draw_loading: false,
            tickets_error: None,
            draw_error: None,
        })
    }

    pub async fn ticket_feed(&self) -> Result<TicketFeed> {
        let subscription = self
            .store
            .subscribe(&tickets_path(&self.config.session_key))
            .await?;
        Ok(TicketFeed::new(self.config.session_key.clone(), subscription))
    }

    pub async fn draw_feed(&self) -> Result<DrawFeed> {
        let subscription = self
            .store
            .subscribe(&draw_path(&self.config.session_key))
            .await?;
        Ok(DrawFeed::new(self.config.session_key.clone(), subscription))
    }
}
