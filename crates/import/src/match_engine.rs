use std::cmp::Ordering;
use std::collections::HashSet;

use matchbook_core::{days_apart, MatchingConfig, RecordId, RecordKind, TransactionRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Highest score the scorer can produce: exact amount on the same day.
pub const MAX_SCORE: u32 = 150;

/// Presentation badge for a score. Advisory only: nothing is ever applied
/// on the strength of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchBand {
    Likely,
    Possible,
    Weak,
}

impl MatchBand {
    pub fn classify(score: u32, config: &MatchingConfig) -> Option<Self> {
        if score == 0 {
            None
        } else if score >= config.likely_threshold {
            Some(MatchBand::Likely)
        } else if score >= config.possible_threshold {
            Some(MatchBand::Possible)
        } else {
            Some(MatchBand::Weak)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MatchBand::Likely => "Likely",
            MatchBand::Possible => "Possible",
            MatchBand::Weak => "Weak",
        }
    }
}

/// A proposed bank/ledger pairing. Lives only until the user accepts or
/// rejects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub bank_id: RecordId,
    pub ledger_id: RecordId,
    pub score: u32,
    pub band: MatchBand,
    pub amount_delta: Decimal,
    pub days_apart: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PairScore {
    score: u32,
    amount_delta: Decimal,
    days_apart: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AutoMatchEngine {
    config: MatchingConfig,
}

impl AutoMatchEngine {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Confidence in `[0, 150]` that the two records describe the same
    /// movement. 0 means "not a candidate".
    pub fn score(&self, bank: &TransactionRecord, ledger: &TransactionRecord) -> u32 {
        self.score_pair(bank, ledger).map_or(0, |s| s.score)
    }

    pub fn band(&self, score: u32) -> Option<MatchBand> {
        MatchBand::classify(score, &self.config)
    }

    fn score_pair(&self, bank: &TransactionRecord, ledger: &TransactionRecord) -> Option<PairScore> {
        let (RecordKind::Bank(direction), RecordKind::Ledger(entry_type)) = (&bank.kind, &ledger.kind)
        else {
            return None;
        };

        // A credit never pairs with an expense, a debit never with a sale.
        if entry_type.flow() != Some(direction.flow()) {
            return None;
        }

        let amount_delta = relative_delta(bank.amount.as_decimal(), ledger.amount.as_decimal());
        if amount_delta >= self.config.max_amount_delta {
            return None;
        }

        let days = days_apart(bank.date, ledger.date);
        if days > self.config.max_date_days {
            return None;
        }

        let amount_term = Decimal::ONE_HUNDRED - amount_delta * Decimal::from(200);
        let date_term = Decimal::from((50 - days * 5).max(0));
        let score = (amount_term + date_term)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u32()
            .unwrap_or(0)
            .min(MAX_SCORE);

        (score > 0).then_some(PairScore {
            score,
            amount_delta,
            days_apart: days,
        })
    }

    /// Ranked one-to-one suggestions over the unmatched cross-product.
    ///
    /// Pairs are taken greedily in descending score order, skipping any pair
    /// whose bank or ledger record was already taken by a better pair. This
    /// is locally optimal only: two candidates competing for the same record
    /// can leave a globally better assignment on the table.
    pub fn propose(
        &self,
        bank: &[TransactionRecord],
        ledger: &[TransactionRecord],
    ) -> Vec<MatchCandidate> {
        let mut scored: Vec<(&TransactionRecord, &TransactionRecord, PairScore)> = Vec::new();
        for b in bank.iter().filter(|r| r.is_bank() && !r.is_matched()) {
            for l in ledger.iter().filter(|r| r.is_ledger() && !r.is_matched()) {
                if let Some(s) = self.score_pair(b, l) {
                    scored.push((b, l, s));
                }
            }
        }

        scored.sort_by(|(b1, l1, s1), (b2, l2, s2)| {
            s2.score
                .cmp(&s1.score)
                .then(s1.days_apart.cmp(&s2.days_apart))
                .then(s1.amount_delta.partial_cmp(&s2.amount_delta).unwrap_or(Ordering::Equal))
                .then(b1.id.cmp(&b2.id))
                .then(l1.id.cmp(&l2.id))
        });

        let mut used_bank = HashSet::new();
        let mut used_ledger = HashSet::new();
        let mut proposals = Vec::new();

        for (b, l, s) in scored {
            if used_bank.contains(&b.id) || used_ledger.contains(&l.id) {
                continue;
            }
            used_bank.insert(b.id);
            used_ledger.insert(l.id);
            let Some(band) = self.band(s.score) else {
                continue;
            };
            proposals.push(MatchCandidate {
                bank_id: b.id,
                ledger_id: l.id,
                score: s.score,
                band,
                amount_delta: s.amount_delta.round_dp(4),
                days_apart: s.days_apart,
            });
        }

        tracing::debug!(
            bank = bank.len(),
            ledger = ledger.len(),
            proposals = proposals.len(),
            "auto-match proposal computed"
        );
        proposals
    }
}

/// `|a − b| / max(a, b)`; two zero amounts are identical.
fn relative_delta(a: Decimal, b: Decimal) -> Decimal {
    let max = a.max(b);
    if max.is_zero() {
        return Decimal::ZERO;
    }
    (a - b).abs() / max
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use matchbook_core::{
        AccountId, BankDirection, LedgerType, Money, ReconState, RecordKind,
    };

    fn record(id: i64, date: (i32, u32, u32), cents: i64, kind: RecordKind) -> TransactionRecord {
        TransactionRecord {
            id: RecordId(id),
            account_id: AccountId(1),
            batch_id: None,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            amount: Money::from_cents(cents),
            kind,
            narration: String::new(),
            reference: None,
            balance: None,
            signature: String::new(),
            retained: None,
            state: ReconState::Unmatched,
        }
    }

    fn credit(id: i64, date: (i32, u32, u32), cents: i64) -> TransactionRecord {
        record(id, date, cents, RecordKind::Bank(BankDirection::Credit))
    }

    fn debit(id: i64, date: (i32, u32, u32), cents: i64) -> TransactionRecord {
        record(id, date, cents, RecordKind::Bank(BankDirection::Debit))
    }

    fn entry(id: i64, date: (i32, u32, u32), cents: i64, t: LedgerType) -> TransactionRecord {
        record(id, date, cents, RecordKind::Ledger(t))
    }

    #[test]
    fn scenario_exact_amount_one_day_apart_is_likely() {
        let engine = AutoMatchEngine::default();
        let bank = credit(1, (2024, 3, 5), 500_000);
        let sale = entry(2, (2024, 3, 6), 500_000, LedgerType::Sale);
        let score = engine.score(&bank, &sale);
        assert_eq!(score, 145);
        assert_eq!(engine.band(score), Some(MatchBand::Likely));
    }

    #[test]
    fn scenario_sixteen_percent_short_is_possible() {
        let engine = AutoMatchEngine::default();
        let bank = credit(1, (2024, 3, 5), 500_000);
        let sale = entry(2, (2024, 3, 6), 420_000, LedgerType::Sale);
        let score = engine.score(&bank, &sale);
        assert_eq!(score, 113);
        assert_eq!(engine.band(score), Some(MatchBand::Possible));
    }

    #[test]
    fn scenario_twenty_days_apart_is_excluded() {
        let engine = AutoMatchEngine::default();
        let bank = credit(1, (2024, 3, 5), 500_000);
        let sale = entry(2, (2024, 3, 25), 500_000, LedgerType::Sale);
        assert_eq!(engine.score(&bank, &sale), 0);
    }

    #[test]
    fn thirty_percent_delta_scores_zero() {
        let engine = AutoMatchEngine::default();
        let bank = debit(1, (2024, 3, 5), 10_000);
        let expense = entry(2, (2024, 3, 5), 7_000, LedgerType::Expense);
        assert_eq!(engine.score(&bank, &expense), 0);

        let just_inside = entry(3, (2024, 3, 5), 7_001, LedgerType::Expense);
        assert!(engine.score(&bank, &just_inside) > 0);
    }

    #[test]
    fn exact_amount_terms() {
        let engine = AutoMatchEngine::default();
        let bank = debit(1, (2024, 3, 5), 2_500);
        // Same day: full amount term plus full date term.
        let same_day = entry(2, (2024, 3, 5), 2_500, LedgerType::Purchase);
        assert_eq!(engine.score(&bank, &same_day), MAX_SCORE);
        // Ten or more days: the date term floors at zero.
        let ten_days = entry(3, (2024, 3, 15), 2_500, LedgerType::Purchase);
        assert_eq!(engine.score(&bank, &ten_days), 100);
        let fourteen_days = entry(4, (2024, 3, 19), 2_500, LedgerType::Purchase);
        assert_eq!(engine.score(&bank, &fourteen_days), 100);
        let fifteen_days = entry(5, (2024, 3, 20), 2_500, LedgerType::Purchase);
        assert_eq!(engine.score(&bank, &fifteen_days), 0);
    }

    #[test]
    fn seven_days_adds_fifteen() {
        let engine = AutoMatchEngine::default();
        let bank = debit(1, (2024, 3, 1), 1_000);
        let out = entry(2, (2024, 3, 8), 1_000, LedgerType::PaymentOut);
        assert_eq!(engine.score(&bank, &out), 115);
    }

    #[test]
    fn credit_never_matches_expense() {
        let engine = AutoMatchEngine::default();
        let bank = credit(1, (2024, 3, 5), 5_000);
        for t in [LedgerType::Expense, LedgerType::Purchase, LedgerType::PaymentOut] {
            assert_eq!(engine.score(&bank, &entry(2, (2024, 3, 5), 5_000, t)), 0);
        }
        let bank = debit(1, (2024, 3, 5), 5_000);
        assert_eq!(engine.score(&bank, &entry(2, (2024, 3, 5), 5_000, LedgerType::Sale)), 0);
    }

    #[test]
    fn directionless_types_never_match() {
        let engine = AutoMatchEngine::default();
        let bank = credit(1, (2024, 3, 5), 5_000);
        assert_eq!(engine.score(&bank, &entry(2, (2024, 3, 5), 5_000, LedgerType::SaleOrder)), 0);
        let journal = LedgerType::Other("Journal".into());
        assert_eq!(engine.score(&bank, &entry(3, (2024, 3, 5), 5_000, journal)), 0);
    }

    #[test]
    fn payment_in_counts_as_incoming() {
        let engine = AutoMatchEngine::default();
        let bank = credit(1, (2024, 3, 5), 5_000);
        assert_eq!(engine.score(&bank, &entry(2, (2024, 3, 5), 5_000, LedgerType::PaymentIn)), 150);
    }

    #[test]
    fn sides_must_be_bank_then_ledger() {
        let engine = AutoMatchEngine::default();
        let a = credit(1, (2024, 3, 5), 5_000);
        let b = credit(2, (2024, 3, 5), 5_000);
        assert_eq!(engine.score(&a, &b), 0);
    }

    #[test]
    fn bands() {
        let config = MatchingConfig::default();
        assert_eq!(MatchBand::classify(150, &config), Some(MatchBand::Likely));
        assert_eq!(MatchBand::classify(130, &config), Some(MatchBand::Likely));
        assert_eq!(MatchBand::classify(129, &config), Some(MatchBand::Possible));
        assert_eq!(MatchBand::classify(80, &config), Some(MatchBand::Possible));
        assert_eq!(MatchBand::classify(79, &config), Some(MatchBand::Weak));
        assert_eq!(MatchBand::classify(1, &config), Some(MatchBand::Weak));
        assert_eq!(MatchBand::classify(0, &config), None);
    }

    #[test]
    fn proposals_are_one_to_one_and_ranked() {
        let engine = AutoMatchEngine::default();
        let bank = vec![credit(1, (2024, 3, 5), 10_000), credit(2, (2024, 3, 10), 20_000)];
        let ledger = vec![
            entry(10, (2024, 3, 5), 10_000, LedgerType::Sale),
            entry(11, (2024, 3, 12), 20_000, LedgerType::Sale),
            entry(12, (2024, 3, 5), 10_000, LedgerType::Expense),
        ];
        let proposals = engine.propose(&bank, &ledger);
        assert_eq!(proposals.len(), 2);
        assert_eq!((proposals[0].bank_id, proposals[0].ledger_id), (RecordId(1), RecordId(10)));
        assert_eq!(proposals[0].score, 150);
        assert_eq!((proposals[1].bank_id, proposals[1].ledger_id), (RecordId(2), RecordId(11)));
        assert_eq!(proposals[1].score, 140);
    }

    #[test]
    fn greedy_selection_can_miss_the_global_optimum() {
        // Bank 1 fits both entries; bank 2 only fits entry 10. Greedy gives
        // bank 1 its best (entry 10, 150) and leaves bank 2 with nothing,
        // although 1↔11 (110) plus 2↔10 (89) would pair everything.
        let engine = AutoMatchEngine::default();
        let bank = vec![credit(1, (2024, 3, 5), 10_000), credit(2, (2024, 3, 8), 13_000)];
        let ledger = vec![
            entry(10, (2024, 3, 5), 10_000, LedgerType::Sale),
            entry(11, (2024, 3, 5), 8_000, LedgerType::Sale),
        ];
        let proposals = engine.propose(&bank, &ledger);
        assert_eq!(proposals.len(), 1);
        assert_eq!((proposals[0].bank_id, proposals[0].ledger_id), (RecordId(1), RecordId(10)));
    }

    #[test]
    fn matched_records_are_not_proposed() {
        let engine = AutoMatchEngine::default();
        let mut bank = credit(1, (2024, 3, 5), 10_000);
        bank.state = ReconState::Matched {
            group: matchbook_core::GroupId(1),
            link: matchbook_core::MatchLink::Group,
            provenance: matchbook_core::MatchProvenance::Manual,
        };
        let ledger = vec![entry(10, (2024, 3, 5), 10_000, LedgerType::Sale)];
        assert!(engine.propose(&[bank], &ledger).is_empty());
    }

    #[test]
    fn equal_scores_break_ties_by_id() {
        let engine = AutoMatchEngine::default();
        let bank = vec![credit(2, (2024, 3, 5), 10_000), credit(1, (2024, 3, 5), 10_000)];
        let ledger = vec![entry(10, (2024, 3, 5), 10_000, LedgerType::Sale)];
        let proposals = engine.propose(&bank, &ledger);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].bank_id, RecordId(1));
    }
}
