//! Statement-line signatures and the duplicate filter built on them.
//!
//! A signature is `date|amount|reference` when the line carries a reference,
//! otherwise `date|amount|narration-prefix`. References are unique per bank
//! but often missing; a truncated narration survives trailing noise such as
//! transaction codes appended by some banks.

use chrono::NaiveDate;
use matchbook_core::{Money, NormalizedRecord, TransactionRecord, NARRATION_PREFIX_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn of(date: NaiveDate, amount: Money, reference: Option<&str>, narration: &str) -> Self {
        let tail = match reference.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reference) => reference.to_string(),
            None => narration_prefix(narration),
        };
        Signature(format!("{}|{}|{}", date.format("%Y-%m-%d"), amount.plain(), tail))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Signature {
    fn from(s: String) -> Self {
        Signature(s)
    }
}

/// First 50 characters of the trimmed narration, trailing space removed.
/// Counts characters, not bytes, so multi-byte narrations never split.
pub fn narration_prefix(narration: &str) -> String {
    narration
        .trim()
        .chars()
        .take(NARRATION_PREFIX_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

pub trait Signed {
    fn signature(&self) -> Signature;
}

impl Signed for NormalizedRecord {
    fn signature(&self) -> Signature {
        Signature::of(
            self.date,
            self.amount,
            self.reference.as_deref(),
            &self.narration,
        )
    }
}

impl Signed for TransactionRecord {
    fn signature(&self) -> Signature {
        Signature::of(
            self.date,
            self.amount,
            self.reference.as_deref(),
            &self.narration,
        )
    }
}

/// Signatures already persisted for one account and source.
#[derive(Debug, Clone, Default)]
pub struct SignatureIndex {
    signatures: HashSet<Signature>,
}

impl SignatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a TransactionRecord>,
    {
        records.into_iter().map(Signed::signature).collect()
    }

    pub fn insert(&mut self, signature: Signature) -> bool {
        self.signatures.insert(signature)
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.signatures.contains(signature)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl FromIterator<Signature> for SignatureIndex {
    fn from_iter<T: IntoIterator<Item = Signature>>(iter: T) -> Self {
        SignatureIndex {
            signatures: iter.into_iter().collect(),
        }
    }
}

/// Outcome of checking a candidate batch against what is already stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub new: Vec<NormalizedRecord>,
    pub duplicates: Vec<NormalizedRecord>,
}

/// Flags candidates whose signature is already in the index. Lines are
/// judged only against the index, never against each other: a statement that
/// lists the same line twice yields two identical classifications.
pub fn partition(index: &SignatureIndex, candidates: Vec<NormalizedRecord>) -> Partition {
    let (duplicates, new): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| index.contains(&c.signature()));
    Partition { new, duplicates }
}

pub fn is_duplicate(index: &SignatureIndex, candidate: &NormalizedRecord) -> bool {
    index.contains(&candidate.signature())
}
