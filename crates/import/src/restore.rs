//! Re-linking ledger entries to re-imported bank lines through the
//! fingerprint they retained when their previous match was dissolved.
//!
//! This recovers matches the user already confirmed once, so the test is
//! exact: same account, same day, same amount to the cent, and the same
//! narration prefix when one was retained. Misses are not errors; the
//! fingerprint stays for a later import.

use matchbook_core::{RecordId, RetainedFingerprint, TransactionRecord};

use crate::signature::narration_prefix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restoration {
    pub ledger_id: RecordId,
    pub bank_id: RecordId,
}

pub fn fits(fingerprint: &RetainedFingerprint, bank: &TransactionRecord) -> bool {
    bank.is_bank()
        && bank.account_id == fingerprint.account_id
        && bank.date == fingerprint.date
        && bank.amount.to_cents() == fingerprint.amount.to_cents()
        && fingerprint
            .narration_prefix
            .as_deref()
            .map_or(true, |prefix| narration_prefix(&bank.narration) == prefix)
}

/// Pairs each fingerprinted, unmatched ledger entry with the first fitting
/// unmatched bank record. A bank record satisfies at most one fingerprint
/// per pass; entries are served in id order.
pub fn plan(ledger: &[TransactionRecord], fresh_bank: &[TransactionRecord]) -> Vec<Restoration> {
    let mut entries: Vec<(&TransactionRecord, &RetainedFingerprint)> = ledger
        .iter()
        .filter(|r| r.is_ledger() && !r.is_matched())
        .filter_map(|r| r.retained.as_ref().map(|fp| (r, fp)))
        .collect();
    entries.sort_by_key(|(r, _)| r.id);

    let mut pool: Vec<&TransactionRecord> = fresh_bank
        .iter()
        .filter(|r| r.is_bank() && !r.is_matched())
        .collect();
    pool.sort_by_key(|r| r.id);

    let mut restorations = Vec::new();
    for (entry, fingerprint) in entries {
        match pool.iter().position(|b| fits(fingerprint, b)) {
            Some(pos) => {
                let bank = pool.remove(pos);
                restorations.push(Restoration {
                    ledger_id: entry.id,
                    bank_id: bank.id,
                });
            }
            None => {
                tracing::debug!(
                    ledger_id = %entry.id,
                    date = %fingerprint.date,
                    amount = %fingerprint.amount,
                    "no bank record fits retained fingerprint"
                );
            }
        }
    }
    restorations
}
