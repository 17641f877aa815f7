pub mod client;
pub mod models;
pub mod scanner;

use async_trait::async_trait;

use crate::crm::models::Deal;
use crate::error::AppResult;
use models::{CheckoutSession, CreateSessionContext, CreatedSession, SessionListFilter, SessionPage};

/// Query/create interface over the hosted checkout processor.
///
/// The processor owns session lifecycles; the engine only lists, point-reads
/// and asks for new sessions.
#[async_trait]
pub trait SessionProcessor: Send + Sync {
    async fn list_sessions(&self, filter: SessionListFilter) -> AppResult<SessionPage>;

    async fn retrieve_session(&self, id: &str) -> AppResult<Option<CheckoutSession>>;

    async fn create_session(
        &self,
        deal: &Deal,
        context: &CreateSessionContext,
    ) -> AppResult<CreatedSession>;
}

pub use client::CheckoutClient;
