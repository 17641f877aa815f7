pub mod models;
pub mod repository;

use async_trait::async_trait;

use crate::error::AppResult;
use models::{PaymentFilter, PaymentRecord};

/// Durable store of locally known payment facts.
///
/// Thin read projections plus insert; no business logic. Consumers never
/// assume uniqueness of "the" deposit or "the" rest record - they filter and,
/// where amounts matter, sum.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn list_for_deal(&self, deal_id: i64) -> AppResult<Vec<PaymentRecord>>;

    async fn list_all(&self, filter: PaymentFilter) -> AppResult<Vec<PaymentRecord>>;

    async fn save(&self, record: &PaymentRecord) -> AppResult<()>;
}

pub use repository::PgPaymentStore;
