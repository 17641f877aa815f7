use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::crm::models::Deal;
use crate::error::AppResult;
use crate::ledger::models::{InstalmentRole, PaymentRecord};
use crate::ledger::PaymentStore;

/// Payment tolerance thresholds.
///
/// The full-deal and rest-instalment values differ on purpose; the business
/// tolerates more slack on the second instalment than on the whole deal.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Fraction of the deal amount that counts as "fully paid"
    pub full_payment: Decimal,
    /// Fraction of the nominal rest instalment (half the deal) that counts
    /// as "second instalment paid"
    pub rest_instalment: Decimal,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            full_payment: dec!(0.95),
            rest_instalment: dec!(0.90),
        }
    }
}

/// Answers "is the first instalment paid?" and "is the deal, in aggregate,
/// fully paid?" from the local ledger.
///
/// Sums are currency-matched: a record in another currency is excluded from
/// the total rather than converted, so a mixed-currency deal under-counts
/// instead of silently mis-counting.
pub struct PaymentStateAnalyzer {
    payments: Arc<dyn PaymentStore>,
    thresholds: Thresholds,
}

impl PaymentStateAnalyzer {
    pub fn new(payments: Arc<dyn PaymentStore>, thresholds: Thresholds) -> Self {
        Self {
            payments,
            thresholds,
        }
    }

    pub async fn is_first_instalment_paid(&self, deal_id: i64) -> AppResult<bool> {
        let records = self.payments.list_for_deal(deal_id).await?;
        Ok(Self::first_instalment_paid(&records))
    }

    pub async fn is_deal_fully_paid(&self, deal: &Deal) -> AppResult<bool> {
        let records = self.payments.list_for_deal(deal.id).await?;
        Ok(self.deal_fully_paid(deal, &records))
    }

    pub async fn is_second_instalment_paid(&self, deal: &Deal) -> AppResult<bool> {
        let records = self.payments.list_for_deal(deal.id).await?;
        Ok(self.second_instalment_paid(deal, &records))
    }

    // The engine already holds a deal's records when it runs these checks;
    // the pure forms avoid a second round trip.

    pub fn first_instalment_paid(records: &[PaymentRecord]) -> bool {
        records
            .iter()
            .any(|r| r.role == InstalmentRole::Deposit && r.is_paid())
    }

    pub fn deal_fully_paid(&self, deal: &Deal, records: &[PaymentRecord]) -> bool {
        let paid = Self::paid_sum_in_currency(records, &deal.currency);
        paid >= deal.amount * self.thresholds.full_payment
    }

    pub fn second_instalment_paid(&self, deal: &Deal, records: &[PaymentRecord]) -> bool {
        let paid: Decimal = records
            .iter()
            .filter(|r| r.role == InstalmentRole::Rest && r.is_paid() && r.currency == deal.currency)
            .map(|r| r.amount)
            .sum();
        // Rest instalment is nominally half the deal under the split plan
        let nominal_rest = deal.amount / dec!(2);
        paid >= nominal_rest * self.thresholds.rest_instalment
    }

    /// Sum of paid amounts whose currency matches; cross-currency records
    /// are excluded, never converted
    pub fn paid_sum_in_currency(records: &[PaymentRecord], currency: &str) -> Decimal {
        records
            .iter()
            .filter(|r| r.is_paid() && r.currency == currency)
            .map(|r| r.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{deal, paid_record, MemoryPaymentStore};
    use crate::ledger::models::ScheduleTag;

    fn analyzer() -> PaymentStateAnalyzer {
        PaymentStateAnalyzer::new(Arc::new(MemoryPaymentStore::new()), Thresholds::default())
    }

    #[test]
    fn test_full_payment_tolerance_threshold() {
        let analyzer = analyzer();
        let deal = deal(1, dec!(1000), "PLN", Some(60));

        // 94.9% paid: not fully paid
        let records = vec![paid_record(1, InstalmentRole::Deposit, dec!(949), "PLN", ScheduleTag::Split, 40)];
        assert!(!analyzer.deal_fully_paid(&deal, &records));

        // 95% paid: fully paid
        let records = vec![paid_record(1, InstalmentRole::Deposit, dec!(950), "PLN", ScheduleTag::Split, 40)];
        assert!(analyzer.deal_fully_paid(&deal, &records));
    }

    #[test]
    fn test_rest_tolerance_threshold_edge() {
        let analyzer = analyzer();
        let deal = deal(1, dec!(1000), "PLN", Some(60));

        // 89.9% of the nominal half (500): still unpaid
        let records = vec![paid_record(1, InstalmentRole::Rest, dec!(449.5), "PLN", ScheduleTag::Split, 5)];
        assert!(!analyzer.second_instalment_paid(&deal, &records));

        // Exactly 90.0%: paid
        let records = vec![paid_record(1, InstalmentRole::Rest, dec!(450), "PLN", ScheduleTag::Split, 5)];
        assert!(analyzer.second_instalment_paid(&deal, &records));
    }

    #[test]
    fn test_partial_rest_records_are_summed_not_counted() {
        let analyzer = analyzer();
        let deal = deal(1, dec!(1000), "PLN", Some(60));

        let records = vec![
            paid_record(1, InstalmentRole::Rest, dec!(200), "PLN", ScheduleTag::Split, 9),
            paid_record(1, InstalmentRole::Rest, dec!(260), "PLN", ScheduleTag::Split, 5),
        ];
        assert!(analyzer.second_instalment_paid(&deal, &records));
    }

    #[test]
    fn test_cross_currency_records_are_excluded() {
        let analyzer = analyzer();
        let deal = deal(1, dec!(1000), "PLN", Some(60));

        // EUR deposit would cover the deal if converted, but it never is
        let records = vec![
            paid_record(1, InstalmentRole::Deposit, dec!(500), "PLN", ScheduleTag::Split, 40),
            paid_record(1, InstalmentRole::Rest, dec!(5000), "EUR", ScheduleTag::Split, 5),
        ];
        assert!(!analyzer.deal_fully_paid(&deal, &records));
        assert!(!analyzer.second_instalment_paid(&deal, &records));
        assert_eq!(
            PaymentStateAnalyzer::paid_sum_in_currency(&records, "PLN"),
            dec!(500)
        );
    }

    #[test]
    fn test_first_instalment_paid_ignores_unpaid_deposits() {
        let mut unpaid = paid_record(1, InstalmentRole::Deposit, dec!(500), "PLN", ScheduleTag::Split, 40);
        unpaid.state = crate::ledger::models::PaymentState::Unpaid;
        assert!(!PaymentStateAnalyzer::first_instalment_paid(&[unpaid]));

        let paid = paid_record(1, InstalmentRole::Deposit, dec!(500), "PLN", ScheduleTag::Split, 40);
        assert!(PaymentStateAnalyzer::first_instalment_paid(&[paid]));
    }
}
