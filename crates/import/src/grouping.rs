//! Manual reconciliation groups: validation, running totals, the link state
//! each member ends up in, and what survives when a group is dissolved.

use std::collections::HashSet;

use matchbook_core::{
    GroupId, MatchLink, MatchProvenance, Money, ReconState, ReconcileError, RecordId,
    RetainedFingerprint, SourceKind, TransactionRecord,
};
use serde::{Deserialize, Serialize};

use crate::signature::narration_prefix;

/// Side totals shown to the user before committing a group. Groups do not
/// have to balance; partial payments are legitimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTotals {
    pub bank_total: Money,
    pub ledger_total: Money,
    /// Absolute difference between the two sides.
    pub difference: Money,
}

impl GroupTotals {
    pub fn of<'a, B, L>(bank: B, ledger: L) -> Self
    where
        B: IntoIterator<Item = &'a TransactionRecord>,
        L: IntoIterator<Item = &'a TransactionRecord>,
    {
        let bank_total: Money = bank.into_iter().map(|r| r.amount).sum();
        let ledger_total: Money = ledger.into_iter().map(|r| r.amount).sum();
        GroupTotals {
            bank_total,
            ledger_total,
            difference: (bank_total - ledger_total).abs(),
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.difference.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupShape {
    /// One record per side: members point straight at each other.
    Pairwise,
    /// Anything larger: members point at the group.
    Group,
}

/// Rejects empty sides and ids listed twice, before anything is loaded.
pub fn check_ids(bank_ids: &[RecordId], ledger_ids: &[RecordId]) -> Result<(), ReconcileError> {
    if bank_ids.is_empty() {
        return Err(ReconcileError::EmptyGroupSide(SourceKind::Bank));
    }
    if ledger_ids.is_empty() {
        return Err(ReconcileError::EmptyGroupSide(SourceKind::Ledger));
    }
    let mut seen = HashSet::new();
    for id in bank_ids.iter().chain(ledger_ids) {
        if !seen.insert(*id) {
            return Err(ReconcileError::DuplicateRecordId(*id));
        }
    }
    Ok(())
}

/// A validated, not yet committed reconciliation group.
#[derive(Debug, Clone)]
pub struct GroupDraft {
    bank: Vec<TransactionRecord>,
    ledger: Vec<TransactionRecord>,
}

impl GroupDraft {
    /// Every record must sit on the side it was offered for and be unmatched.
    /// Nothing is partially accepted: the first violation rejects the draft.
    pub fn new(
        bank: Vec<TransactionRecord>,
        ledger: Vec<TransactionRecord>,
    ) -> Result<Self, ReconcileError> {
        let bank_ids: Vec<RecordId> = bank.iter().map(|r| r.id).collect();
        let ledger_ids: Vec<RecordId> = ledger.iter().map(|r| r.id).collect();
        check_ids(&bank_ids, &ledger_ids)?;

        for (records, expected) in [(&bank, SourceKind::Bank), (&ledger, SourceKind::Ledger)] {
            for record in records {
                if record.source_kind() != expected {
                    return Err(ReconcileError::WrongSide {
                        id: record.id,
                        expected,
                    });
                }
                if record.is_matched() {
                    return Err(ReconcileError::AlreadyMatched(record.id));
                }
            }
        }

        Ok(GroupDraft { bank, ledger })
    }

    pub fn bank(&self) -> &[TransactionRecord] {
        &self.bank
    }

    pub fn ledger(&self) -> &[TransactionRecord] {
        &self.ledger
    }

    pub fn member_ids(&self) -> Vec<RecordId> {
        self.bank.iter().chain(&self.ledger).map(|r| r.id).collect()
    }

    pub fn totals(&self) -> GroupTotals {
        GroupTotals::of(&self.bank, &self.ledger)
    }

    pub fn shape(&self) -> GroupShape {
        if self.bank.len() == 1 && self.ledger.len() == 1 {
            GroupShape::Pairwise
        } else {
            GroupShape::Group
        }
    }

    /// The state every member transitions to once the group row exists.
    pub fn member_states(
        &self,
        group: GroupId,
        provenance: MatchProvenance,
    ) -> Vec<(RecordId, ReconState)> {
        match self.shape() {
            GroupShape::Pairwise => {
                let (b, l) = (&self.bank[0], &self.ledger[0]);
                vec![
                    (b.id, pair_state(group, l.id, SourceKind::Ledger, provenance)),
                    (l.id, pair_state(group, b.id, SourceKind::Bank, provenance)),
                ]
            }
            GroupShape::Group => self
                .member_ids()
                .into_iter()
                .map(|id| {
                    (
                        id,
                        ReconState::Matched {
                            group,
                            link: MatchLink::Group,
                            provenance,
                        },
                    )
                })
                .collect(),
        }
    }
}

fn pair_state(
    group: GroupId,
    counterpart: RecordId,
    kind: SourceKind,
    provenance: MatchProvenance,
) -> ReconState {
    ReconState::Matched {
        group,
        link: MatchLink::Counterpart {
            id: counterpart,
            kind,
        },
        provenance,
    }
}

/// Confirms every loaded member still belongs to `group`. A member that
/// moved or was released means someone else touched the group.
pub fn check_members(group: GroupId, members: &[TransactionRecord]) -> Result<(), ReconcileError> {
    if members.is_empty() || members.iter().any(|m| m.state.group() != Some(group)) {
        return Err(ReconcileError::StaleGroup(group));
    }
    Ok(())
}

/// Fingerprints to write when a group is dissolved. Only ledger entries
/// matched to exactly one bank record can remember what they were matched
/// to; larger bank sides leave nothing behind.
pub fn release_fingerprints(members: &[TransactionRecord]) -> Vec<(RecordId, RetainedFingerprint)> {
    let mut bank = members.iter().filter(|m| m.is_bank());
    let (Some(only_bank), None) = (bank.next(), bank.next()) else {
        return Vec::new();
    };

    let prefix = narration_prefix(&only_bank.narration);
    let fingerprint = RetainedFingerprint {
        account_id: only_bank.account_id,
        date: only_bank.date,
        amount: only_bank.amount,
        narration_prefix: (!prefix.is_empty()).then_some(prefix),
    };

    members
        .iter()
        .filter(|m| m.is_ledger())
        .map(|m| (m.id, fingerprint.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use matchbook_core::{AccountId, BankDirection, LedgerType, RecordKind};

    fn record(id: i64, cents: i64, kind: RecordKind) -> TransactionRecord {
        TransactionRecord {
            id: RecordId(id),
            account_id: AccountId(if matches!(kind, RecordKind::Bank(_)) { 1 } else { 2 }),
            batch_id: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            amount: Money::from_cents(cents),
            kind,
            narration: "NEFT CR ACME TRADING".to_string(),
            reference: None,
            balance: None,
            signature: String::new(),
            retained: None,
            state: ReconState::Unmatched,
        }
    }

    fn bank(id: i64, cents: i64) -> TransactionRecord {
        record(id, cents, RecordKind::Bank(BankDirection::Credit))
    }

    fn ledger(id: i64, cents: i64) -> TransactionRecord {
        record(id, cents, RecordKind::Ledger(LedgerType::Sale))
    }

    fn matched(mut r: TransactionRecord, group: i64) -> TransactionRecord {
        r.state = ReconState::Matched {
            group: GroupId(group),
            link: MatchLink::Group,
            provenance: MatchProvenance::Manual,
        };
        r
    }

    #[test]
    fn totals_report_unbalanced_difference() {
        let draft = GroupDraft::new(vec![bank(1, 10_000)], vec![ledger(2, 6_000), ledger(3, 3_000)])
            .unwrap();
        let totals = draft.totals();
        assert_eq!(totals.bank_total.to_cents(), 10_000);
        assert_eq!(totals.ledger_total.to_cents(), 9_000);
        assert_eq!(totals.difference.to_cents(), 1_000);
        assert!(!totals.is_balanced());
        assert_eq!(draft.shape(), GroupShape::Group);
    }

    #[test]
    fn difference_is_absolute() {
        let totals = GroupTotals::of(&[bank(1, 100)], &[ledger(2, 400)]);
        assert_eq!(totals.difference.to_cents(), 300);
    }

    #[test]
    fn empty_sides_are_rejected() {
        assert_eq!(
            GroupDraft::new(vec![], vec![ledger(2, 1)]).unwrap_err(),
            ReconcileError::EmptyGroupSide(SourceKind::Bank)
        );
        assert_eq!(
            check_ids(&[RecordId(1)], &[]).unwrap_err(),
            ReconcileError::EmptyGroupSide(SourceKind::Ledger)
        );
    }

    #[test]
    fn repeated_ids_are_rejected() {
        assert_eq!(
            check_ids(&[RecordId(1), RecordId(1)], &[RecordId(2)]).unwrap_err(),
            ReconcileError::DuplicateRecordId(RecordId(1))
        );
        assert_eq!(
            check_ids(&[RecordId(1)], &[RecordId(1)]).unwrap_err(),
            ReconcileError::DuplicateRecordId(RecordId(1))
        );
    }

    #[test]
    fn records_on_the_wrong_side_are_rejected() {
        let err = GroupDraft::new(vec![ledger(1, 1)], vec![ledger(2, 1)]).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::WrongSide {
                id: RecordId(1),
                expected: SourceKind::Bank
            }
        );
    }

    #[test]
    fn already_matched_member_rejects_the_whole_draft() {
        let err = GroupDraft::new(
            vec![bank(1, 100), bank(2, 100)],
            vec![matched(ledger(3, 200), 9)],
        )
        .unwrap_err();
        assert_eq!(err, ReconcileError::AlreadyMatched(RecordId(3)));
    }

    #[test]
    fn pairwise_members_point_at_each_other() {
        let draft = GroupDraft::new(vec![bank(1, 100)], vec![ledger(2, 100)]).unwrap();
        assert_eq!(draft.shape(), GroupShape::Pairwise);
        let states = draft.member_states(GroupId(7), MatchProvenance::Auto);
        assert_eq!(states[0].0, RecordId(1));
        assert_eq!(states[0].1.reconciled_with(), Some((2, "ledger")));
        assert_eq!(states[1].0, RecordId(2));
        assert_eq!(states[1].1.reconciled_with(), Some((1, "bank")));
        assert!(states.iter().all(|(_, s)| s.group() == Some(GroupId(7))));
    }

    #[test]
    fn group_members_point_at_the_group() {
        let draft =
            GroupDraft::new(vec![bank(1, 100), bank(2, 50)], vec![ledger(3, 150)]).unwrap();
        let states = draft.member_states(GroupId(4), MatchProvenance::Manual);
        assert_eq!(states.len(), 3);
        assert!(states
            .iter()
            .all(|(_, s)| s.reconciled_with() == Some((4, "group"))));
    }

    #[test]
    fn check_members_detects_a_released_member() {
        let members = vec![matched(bank(1, 100), 5), ledger(2, 100)];
        assert_eq!(
            check_members(GroupId(5), &members).unwrap_err(),
            ReconcileError::StaleGroup(GroupId(5))
        );
        let members = vec![matched(bank(1, 100), 5), matched(ledger(2, 100), 5)];
        assert!(check_members(GroupId(5), &members).is_ok());
    }

    #[test]
    fn single_bank_member_leaves_fingerprints_on_every_ledger_member() {
        let members = vec![matched(bank(1, 10_000), 5), matched(ledger(2, 6_000), 5), matched(ledger(3, 4_000), 5)];
        let prints = release_fingerprints(&members);
        assert_eq!(prints.len(), 2);
        let (id, fp) = &prints[0];
        assert_eq!(*id, RecordId(2));
        assert_eq!(fp.account_id, AccountId(1));
        assert_eq!(fp.amount.to_cents(), 10_000);
        assert_eq!(fp.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(fp.narration_prefix.as_deref(), Some("NEFT CR ACME TRADING"));
    }

    #[test]
    fn several_bank_members_leave_no_fingerprint() {
        let members = vec![matched(bank(1, 50), 5), matched(bank(2, 50), 5), matched(ledger(3, 100), 5)];
        assert!(release_fingerprints(&members).is_empty());
    }

    #[test]
    fn blank_narration_gives_prefixless_fingerprint() {
        let mut b = matched(bank(1, 50), 5);
        b.narration = "   ".to_string();
        let prints = release_fingerprints(&[b, matched(ledger(2, 50), 5)]);
        assert_eq!(prints[0].1.narration_prefix, None);
    }
}
