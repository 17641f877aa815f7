pub mod client;

use async_trait::async_trait;

use crate::error::AppResult;

/// Outbound messaging channel.
///
/// Delivery mechanics are external; the engine only hands over a recipient
/// id and a message body.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, recipient_id: &str, message: &str) -> AppResult<()>;

    async fn update_recipient_metadata(
        &self,
        recipient_id: &str,
        fields: &[(String, String)],
    ) -> AppResult<()>;
}

pub use client::MessengerClient;
