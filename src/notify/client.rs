use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::{AppResult, NotifyError};
use crate::notify::NotificationChannel;

/// HTTP client for the messenger platform
pub struct MessengerClient {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl MessengerClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            base_url,
            api_token,
            client: reqwest::Client::new(),
        }
    }

    async fn check(response: reqwest::Response) -> AppResult<()> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api { status, message }.into());
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for MessengerClient {
    async fn send(&self, recipient_id: &str, message: &str) -> AppResult<()> {
        let body = json!({
            "subscriber_id": recipient_id,
            "message": message,
        });

        let response = self
            .client
            .post(format!("{}/sending/sendText", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Unreachable(e.to_string()))?;

        Self::check(response).await?;
        info!("💬 Message sent to recipient {}", recipient_id);
        Ok(())
    }

    async fn update_recipient_metadata(
        &self,
        recipient_id: &str,
        fields: &[(String, String)],
    ) -> AppResult<()> {
        let fields_json: Vec<_> = fields
            .iter()
            .map(|(name, value)| json!({"field_name": name, "field_value": value}))
            .collect();
        let body = json!({
            "subscriber_id": recipient_id,
            "fields": fields_json,
        });

        let response = self
            .client
            .post(format!("{}/subscriber/setCustomFields", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Unreachable(e.to_string()))?;

        Self::check(response).await
    }
}
