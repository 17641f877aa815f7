use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::checkout::models::{
    CheckoutSession, CreateSessionContext, CreatedSession, SessionListFilter, SessionMetadata,
    SessionPage, SessionPaymentStatus, SessionStatus,
};
use crate::checkout::SessionProcessor;
use crate::crm::models::Deal;
use crate::error::{AppResult, CheckoutError};

/// HTTP client for the hosted checkout API.
///
/// Amounts travel in minor units on the wire and are converted to `Decimal`
/// major units at this boundary; nothing above the client ever sees cents.
pub struct CheckoutClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    id: String,
    status: String,
    payment_status: String,
    amount_total: Option<i64>,
    currency: Option<String>,
    url: Option<String>,
    customer_email: Option<String>,
    created: i64,
    expires_at: i64,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    deal_id: Option<String>,
    instalment_role: Option<String>,
    schedule: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSessionList {
    data: Vec<RawSession>,
    has_more: bool,
}

impl CheckoutClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn map_session(raw: RawSession) -> AppResult<CheckoutSession> {
        let status = match raw.status.as_str() {
            "open" => SessionStatus::Open,
            "complete" => SessionStatus::Complete,
            "expired" => SessionStatus::Expired,
            other => {
                return Err(CheckoutError::MalformedSession(format!(
                    "unknown session status {:?}",
                    other
                ))
                .into())
            }
        };

        let payment_status = match raw.payment_status.as_str() {
            "paid" => SessionPaymentStatus::Paid,
            _ => SessionPaymentStatus::Unpaid,
        };

        // Minor units -> major units
        let amount_total = Decimal::from(raw.amount_total.unwrap_or(0)) / dec!(100);

        Ok(CheckoutSession {
            id: raw.id,
            status,
            payment_status,
            amount_total,
            currency: raw.currency.unwrap_or_default().to_uppercase(),
            url: raw.url,
            customer_email: raw.customer_email,
            created: timestamp(raw.created),
            expires_at: timestamp(raw.expires_at),
            metadata: SessionMetadata {
                deal_id: raw.metadata.deal_id,
                instalment_role: raw.metadata.instalment_role,
                schedule: raw.metadata.schedule,
            },
        })
    }

    async fn check(response: reqwest::Response) -> AppResult<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CheckoutError::Api { status, message }.into());
        }
        Ok(response)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl SessionProcessor for CheckoutClient {
    async fn list_sessions(&self, filter: SessionListFilter) -> AppResult<SessionPage> {
        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(status) = filter.status {
            query.push(("status".into(), status.as_str().into()));
        }
        if let Some(created_after) = filter.created_after {
            query.push(("created[gte]".into(), created_after.timestamp().to_string()));
        }
        if filter.limit > 0 {
            query.push(("limit".into(), filter.limit.to_string()));
        }
        if let Some(cursor) = &filter.starting_after {
            query.push(("starting_after".into(), cursor.clone()));
        }

        let response = self
            .client
            .get(format!("{}/checkout/sessions", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| CheckoutError::Unreachable(e.to_string()))?;

        let raw: RawSessionList = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| CheckoutError::MalformedSession(e.to_string()))?;

        let mut sessions = Vec::with_capacity(raw.data.len());
        for s in raw.data {
            sessions.push(Self::map_session(s)?);
        }

        Ok(SessionPage {
            sessions,
            has_more: raw.has_more,
        })
    }

    async fn retrieve_session(&self, id: &str) -> AppResult<Option<CheckoutSession>> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", self.base_url, id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CheckoutError::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let raw: RawSession = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| CheckoutError::MalformedSession(e.to_string()))?;

        Ok(Some(Self::map_session(raw)?))
    }

    async fn create_session(
        &self,
        deal: &Deal,
        context: &CreateSessionContext,
    ) -> AppResult<CreatedSession> {
        let amount = context.custom_amount.unwrap_or(deal.amount);
        // Major units -> minor units for the wire
        let amount_minor = (amount * dec!(100)).round();

        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("currency".into(), deal.currency.to_lowercase()),
            ("amount_total".into(), amount_minor.to_string()),
            ("metadata[deal_id]".into(), deal.id.to_string()),
            (
                "metadata[instalment_role]".into(),
                context.role.as_str().into(),
            ),
            ("metadata[schedule]".into(), context.schedule.as_str().into()),
            (
                "metadata[instalment_index]".into(),
                context.instalment_index.to_string(),
            ),
        ];
        if context.suppress_notification {
            form.push(("suppress_notification".into(), "true".into()));
        }

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| CheckoutError::Unreachable(e.to_string()))?;

        let raw: RawSession = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| CheckoutError::MalformedSession(e.to_string()))?;

        let session = Self::map_session(raw)?;
        let session_url = session.url.clone().ok_or_else(|| {
            CheckoutError::MalformedSession("created session carries no url".to_string())
        })?;

        Ok(CreatedSession {
            session_id: session.id,
            session_url,
            amount: session.amount_total,
            currency: session.currency,
        })
    }
}
