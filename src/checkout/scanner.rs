use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::checkout::models::{
    CheckoutSession, SessionListFilter, SessionPaymentStatus, SessionStatus,
};
use crate::checkout::SessionProcessor;
use crate::error::AppResult;
use crate::ledger::models::{InstalmentRole, ScheduleTag};

/// Scan limits and filters for the remote session sweep
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub lookback_days: i64,
    /// Hard ceiling on pages fetched per scan; bounds worst-case latency
    pub max_pages: u32,
    pub page_size: u32,
    /// Substring marking a customer email as synthetic/test traffic
    pub test_customer_pattern: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            max_pages: 20,
            page_size: 100,
            test_customer_pattern: "+test@".to_string(),
        }
    }
}

/// An expired processor session reduced to the fields reconciliation needs.
///
/// Only sessions whose metadata carries both a deal id and a recognized
/// instalment role survive normalization.
#[derive(Debug, Clone)]
pub struct NormalizedSession {
    pub deal_id: i64,
    pub role: InstalmentRole,
    pub schedule: Option<ScheduleTag>,
    pub session_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub url: Option<String>,
    pub created: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Paginated sweep over the processor's session list.
///
/// The local ledger can be incomplete (out-of-band sessions, lost webhooks);
/// reading the remote source directly is the only recovery path for that
/// class of missed update. The sweep is windowed and page-capped because it
/// is expensive.
pub struct SessionScanner {
    processor: Arc<dyn SessionProcessor>,
    config: ScanConfig,
}

impl SessionScanner {
    pub fn new(processor: Arc<dyn SessionProcessor>, config: ScanConfig) -> Self {
        Self { processor, config }
    }

    /// Expired, unpaid, deal-tagged sessions created within the lookback
    /// window. Flat and deal-agnostic; grouping is the caller's job.
    pub async fn find_expired_unpaid_sessions(&self) -> AppResult<Vec<NormalizedSession>> {
        let created_after = Utc::now() - Duration::days(self.config.lookback_days);
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .processor
                .list_sessions(SessionListFilter {
                    status: Some(SessionStatus::Expired),
                    created_after: Some(created_after),
                    limit: self.config.page_size,
                    starting_after: cursor.clone(),
                })
                .await?;

            cursor = page.sessions.last().map(|s| s.id.clone());

            for session in page.sessions {
                if let Some(normalized) = self.normalize(&session) {
                    out.push(normalized);
                }
            }

            pages += 1;
            if !page.has_more {
                break;
            }
            if pages >= self.config.max_pages {
                warn!(
                    "⚠️ Session scan hit the {}-page cap; older expired sessions were not examined",
                    self.config.max_pages
                );
                break;
            }
        }

        info!(
            "🔍 Session scan: {} expired unpaid deal sessions across {} pages",
            out.len(),
            pages
        );
        Ok(out)
    }

    /// Point-probe for a currently open session belonging to one deal,
    /// queried directly against the processor rather than the local ledger.
    pub async fn find_open_session_for_deal(
        &self,
        deal_id: i64,
        window_days: i64,
    ) -> AppResult<Option<CheckoutSession>> {
        let created_after = Utc::now() - Duration::days(window_days);
        let mut newest: Option<CheckoutSession> = None;
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .processor
                .list_sessions(SessionListFilter {
                    status: Some(SessionStatus::Open),
                    created_after: Some(created_after),
                    limit: self.config.page_size,
                    starting_after: cursor.clone(),
                })
                .await?;

            cursor = page.sessions.last().map(|s| s.id.clone());

            for session in page.sessions {
                if session.metadata.deal_id() != Some(deal_id) {
                    continue;
                }
                if !session.is_open_unpaid() {
                    continue;
                }
                let is_newer = newest
                    .as_ref()
                    .map(|n| session.created > n.created)
                    .unwrap_or(true);
                if is_newer {
                    newest = Some(session);
                }
            }

            pages += 1;
            if !page.has_more || pages >= self.config.max_pages {
                break;
            }
        }

        Ok(newest)
    }

    fn normalize(&self, session: &CheckoutSession) -> Option<NormalizedSession> {
        if session.payment_status != SessionPaymentStatus::Unpaid {
            return None;
        }

        let deal_id = session.metadata.deal_id()?;
        let role = session.metadata.role()?;

        if let Some(email) = &session.customer_email {
            if email.contains(&self.config.test_customer_pattern) {
                return None;
            }
        }

        Some(NormalizedSession {
            deal_id,
            role,
            schedule: session.metadata.schedule(),
            session_id: session.id.clone(),
            amount: session.amount_total,
            currency: session.currency.clone(),
            url: session.url.clone(),
            created: session.created,
            expires_at: session.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expired_session, FakeProcessor};
    use rust_decimal_macros::dec;

    fn scanner(processor: Arc<FakeProcessor>, config: ScanConfig) -> SessionScanner {
        SessionScanner::new(processor, config)
    }

    #[tokio::test]
    async fn test_scan_keeps_only_deal_tagged_sessions() {
        let processor = Arc::new(FakeProcessor::new());
        processor.push_session(expired_session("cs_1", 101, "rest", dec!(500), 3));

        // No deal id in metadata
        let mut anonymous = expired_session("cs_2", 102, "rest", dec!(500), 3);
        anonymous.metadata.deal_id = None;
        processor.push_session(anonymous);

        // Unrecognized role
        let mut odd_role = expired_session("cs_3", 103, "mystery", dec!(500), 3);
        odd_role.metadata.instalment_role = Some("mystery".to_string());
        processor.push_session(odd_role);

        let found = scanner(processor, ScanConfig::default())
            .find_expired_unpaid_sessions()
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].deal_id, 101);
        assert_eq!(found[0].role, InstalmentRole::Rest);
    }

    #[tokio::test]
    async fn test_scan_excludes_synthetic_customers() {
        let processor = Arc::new(FakeProcessor::new());
        let mut synthetic = expired_session("cs_1", 101, "rest", dec!(500), 3);
        synthetic.customer_email = Some("qa+test@example.com".to_string());
        processor.push_session(synthetic);
        processor.push_session(expired_session("cs_2", 102, "rest", dec!(500), 3));

        let found = scanner(processor, ScanConfig::default())
            .find_expired_unpaid_sessions()
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].deal_id, 102);
    }

    #[tokio::test]
    async fn test_scan_respects_page_cap() {
        let processor = Arc::new(FakeProcessor::new());
        for i in 0..10 {
            processor.push_session(expired_session(
                &format!("cs_{}", i),
                100 + i as i64,
                "rest",
                dec!(500),
                3,
            ));
        }

        let config = ScanConfig {
            max_pages: 2,
            page_size: 2,
            ..ScanConfig::default()
        };
        let found = scanner(processor, config)
            .find_expired_unpaid_sessions()
            .await
            .unwrap();

        // Two pages of two records each, the rest left unexamined
        assert_eq!(found.len(), 4);
    }

    #[tokio::test]
    async fn test_second_and_final_parse_as_rest() {
        let processor = Arc::new(FakeProcessor::new());
        let mut legacy = expired_session("cs_1", 101, "second", dec!(500), 3);
        legacy.metadata.instalment_role = Some("second".to_string());
        processor.push_session(legacy);

        let found = scanner(processor, ScanConfig::default())
            .find_expired_unpaid_sessions()
            .await
            .unwrap();

        assert_eq!(found[0].role, InstalmentRole::Rest);
    }
}
