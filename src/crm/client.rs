use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::crm::models::{Deal, DealFilter, DealStatus, DealWithRelated, Organization, Person};
use crate::crm::DealSource;
use crate::error::{AppResult, CrmError};

/// HTTP client for the deal-tracking API.
///
/// Authentication is a token query parameter; responses arrive wrapped in a
/// `{success, data}` envelope.
pub struct CrmClient {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawDeal {
    id: i64,
    title: Option<String>,
    value: Option<f64>,
    currency: Option<String>,
    expected_close_date: Option<String>,
    status: Option<String>,
    lost_reason: Option<String>,
    person_id: Option<i64>,
    #[serde(default)]
    invoicing_delegated: bool,
    #[serde(default)]
    marked_deleted: bool,
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    id: i64,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    messenger_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOrganization {
    id: i64,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDealWithRelated {
    #[serde(flatten)]
    deal: RawDeal,
    person: Option<RawPerson>,
    organization: Option<RawOrganization>,
}

impl CrmClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            base_url,
            api_token,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api_token={}", self.base_url, path, self.api_token)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, url: &str) -> AppResult<Option<T>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrmError::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CrmError::Api { status, message }.into());
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| CrmError::Unreachable(e.to_string()))?;

        if !envelope.success {
            return Ok(None);
        }

        Ok(envelope.data)
    }

    fn map_deal(raw: RawDeal) -> AppResult<Deal> {
        let deal_id = raw.id;
        let amount = raw
            .value
            .and_then(Decimal::from_f64)
            .ok_or(CrmError::MalformedDeal {
                deal_id,
                message: "deal has no usable amount".to_string(),
            })?;

        let status = raw
            .status
            .as_deref()
            .and_then(DealStatus::parse)
            .unwrap_or(DealStatus::Open);

        Ok(Deal {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            amount,
            currency: raw.currency.unwrap_or_default().to_uppercase(),
            expected_close_date: raw.expected_close_date,
            status,
            lost_reason: raw.lost_reason,
            person_id: raw.person_id,
            invoicing_delegated: raw.invoicing_delegated,
            marked_deleted: raw.marked_deleted,
        })
    }

    fn map_person(raw: RawPerson) -> Person {
        Person {
            id: raw.id,
            name: raw.name.unwrap_or_default(),
            email: raw.email,
            phone: raw.phone,
            messenger_id: raw.messenger_id,
        }
    }
}

#[async_trait]
impl DealSource for CrmClient {
    async fn get_deal(&self, id: i64) -> AppResult<Option<Deal>> {
        let raw: Option<RawDeal> = self.fetch(&self.url(&format!("/deals/{}", id))).await?;
        raw.map(Self::map_deal).transpose()
    }

    async fn get_deal_with_related_data(&self, id: i64) -> AppResult<Option<DealWithRelated>> {
        let raw: Option<RawDealWithRelated> =
            self.fetch(&self.url(&format!("/deals/{}/full", id))).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let deal = Self::map_deal(raw.deal)?;
        Ok(Some(DealWithRelated {
            deal,
            person: raw.person.map(Self::map_person),
            organization: raw.organization.map(|o| Organization {
                id: o.id,
                name: o.name.unwrap_or_default(),
            }),
        }))
    }

    async fn list_deals(&self, filter: DealFilter) -> AppResult<Vec<Deal>> {
        let mut url = self.url("/deals");
        if let Some(status) = filter.status {
            url.push_str(&format!("&status={}", status.as_str()));
        }

        let raw: Option<Vec<RawDeal>> = self.fetch(&url).await?;
        let mut deals = Vec::new();
        for r in raw.unwrap_or_default() {
            match Self::map_deal(r) {
                Ok(deal) => deals.push(deal),
                // A single malformed row must not sink the whole listing
                Err(e) => warn!("⚠️ Skipping malformed deal in listing: {}", e),
            }
        }
        Ok(deals)
    }
}
