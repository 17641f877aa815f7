pub mod client;
pub mod models;

use async_trait::async_trait;

use crate::error::AppResult;
use models::{Deal, DealFilter, DealWithRelated};

/// Read interface over the external deal-tracking system.
///
/// The engine treats deals as externally owned; nothing here mutates CRM
/// state.
#[async_trait]
pub trait DealSource: Send + Sync {
    async fn get_deal(&self, id: i64) -> AppResult<Option<Deal>>;

    async fn get_deal_with_related_data(&self, id: i64) -> AppResult<Option<DealWithRelated>>;

    async fn list_deals(&self, filter: DealFilter) -> AppResult<Vec<Deal>>;
}

pub use client::CrmClient;
