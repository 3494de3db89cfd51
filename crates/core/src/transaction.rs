use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::account::{AccountId, BatchId, GroupId, RecordId, SourceKind};
use super::error::ReconcileError;
use super::money::Money;

/// Which way money moved, as seen from the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flow {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankDirection {
    Credit,
    Debit,
}

impl BankDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            BankDirection::Credit => "credit",
            BankDirection::Debit => "debit",
        }
    }

    pub fn flow(self) -> Flow {
        match self {
            BankDirection::Credit => Flow::Incoming,
            BankDirection::Debit => Flow::Outgoing,
        }
    }
}

impl FromStr for BankDirection {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit" | "cr" => Ok(BankDirection::Credit),
            "debit" | "dr" => Ok(BankDirection::Debit),
            _ => Err(ReconcileError::InvalidTypeTag(s.to_string())),
        }
    }
}

/// Voucher type tag of a bookkeeping entry. Unrecognised tags are kept
/// verbatim and never imply a direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LedgerType {
    Sale,
    Expense,
    Purchase,
    PaymentOut,
    PaymentIn,
    SaleOrder,
    Other(String),
}

impl LedgerType {
    pub fn as_str(&self) -> &str {
        match self {
            LedgerType::Sale => "Sale",
            LedgerType::Expense => "Expense",
            LedgerType::Purchase => "Purchase",
            LedgerType::PaymentOut => "Payment-Out",
            LedgerType::PaymentIn => "Payment-In",
            LedgerType::SaleOrder => "Sale Order",
            LedgerType::Other(tag) => tag,
        }
    }

    /// `None` for tags that do not move money (orders) or that we do not know.
    pub fn flow(&self) -> Option<Flow> {
        match self {
            LedgerType::Sale | LedgerType::PaymentIn => Some(Flow::Incoming),
            LedgerType::Expense | LedgerType::Purchase | LedgerType::PaymentOut => {
                Some(Flow::Outgoing)
            }
            LedgerType::SaleOrder | LedgerType::Other(_) => None,
        }
    }
}

impl From<&str> for LedgerType {
    fn from(s: &str) -> Self {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match key.as_str() {
            "sale" => LedgerType::Sale,
            "expense" => LedgerType::Expense,
            "purchase" => LedgerType::Purchase,
            "paymentout" => LedgerType::PaymentOut,
            "paymentin" => LedgerType::PaymentIn,
            "saleorder" => LedgerType::SaleOrder,
            _ => LedgerType::Other(s.trim().to_string()),
        }
    }
}

impl From<String> for LedgerType {
    fn from(s: String) -> Self {
        LedgerType::from(s.as_str())
    }
}

impl From<LedgerType> for String {
    fn from(t: LedgerType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for LedgerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction/category of a record; the discriminator between the two sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Bank(BankDirection),
    Ledger(LedgerType),
}

impl RecordKind {
    /// Parses a type tag in the vocabulary of the given source.
    pub fn parse(source: SourceKind, tag: &str) -> Result<Self, ReconcileError> {
        match source {
            SourceKind::Bank => tag.parse().map(RecordKind::Bank),
            SourceKind::Ledger if tag.trim().is_empty() => {
                Err(ReconcileError::InvalidTypeTag(tag.to_string()))
            }
            SourceKind::Ledger => Ok(RecordKind::Ledger(LedgerType::from(tag))),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match self {
            RecordKind::Bank(_) => SourceKind::Bank,
            RecordKind::Ledger(_) => SourceKind::Ledger,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            RecordKind::Bank(d) => d.as_str(),
            RecordKind::Ledger(t) => t.as_str(),
        }
    }

    pub fn flow(&self) -> Option<Flow> {
        match self {
            RecordKind::Bank(d) => Some(d.flow()),
            RecordKind::Ledger(t) => t.flow(),
        }
    }
}

/// A parsed statement line as handed over by a format-specific parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub date: NaiveDate,
    pub amount: Money,
    pub kind: RecordKind,
    pub narration: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub balance: Option<Money>,
}

/// What a ledger entry was last matched to. A plain value, not a link:
/// the bank record it describes may no longer exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedFingerprint {
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub amount: Money,
    pub narration_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchProvenance {
    Auto,
    Manual,
    Restored,
}

impl MatchProvenance {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchProvenance::Auto => "auto",
            MatchProvenance::Manual => "manual",
            MatchProvenance::Restored => "restored",
        }
    }
}

impl FromStr for MatchProvenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(MatchProvenance::Auto),
            "manual" => Ok(MatchProvenance::Manual),
            "restored" => Ok(MatchProvenance::Restored),
            other => Err(format!("Unknown match provenance: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "link", rename_all = "lowercase")]
pub enum MatchLink {
    /// 1:1 match; points straight at the other record.
    Counterpart { id: RecordId, kind: SourceKind },
    /// More than two participants; the group id is the pointer.
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ReconState {
    #[default]
    Unmatched,
    Matched {
        group: GroupId,
        link: MatchLink,
        provenance: MatchProvenance,
    },
}

impl ReconState {
    pub fn is_matched(&self) -> bool {
        matches!(self, ReconState::Matched { .. })
    }

    pub fn group(&self) -> Option<GroupId> {
        match self {
            ReconState::Matched { group, .. } => Some(*group),
            ReconState::Unmatched => None,
        }
    }

    /// `(reconciled_with_id, reconciled_with_type)` as exposed to collaborators.
    pub fn reconciled_with(&self) -> Option<(i64, &'static str)> {
        match self {
            ReconState::Unmatched => None,
            ReconState::Matched {
                link: MatchLink::Counterpart { id, kind },
                ..
            } => Some((id.0, kind.as_str())),
            ReconState::Matched {
                group,
                link: MatchLink::Group,
                ..
            } => Some((group.0, "group")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: RecordId,
    pub account_id: AccountId,
    pub batch_id: Option<BatchId>,
    pub date: NaiveDate,
    pub amount: Money,
    pub kind: RecordKind,
    pub narration: String,
    pub reference: Option<String>,
    pub balance: Option<Money>,
    pub signature: String,
    /// Only ever set on ledger-side records.
    pub retained: Option<RetainedFingerprint>,
    pub state: ReconState,
}

impl TransactionRecord {
    pub fn source_kind(&self) -> SourceKind {
        self.kind.source_kind()
    }

    pub fn is_bank(&self) -> bool {
        self.source_kind() == SourceKind::Bank
    }

    pub fn is_ledger(&self) -> bool {
        self.source_kind() == SourceKind::Ledger
    }

    pub fn is_matched(&self) -> bool {
        self.state.is_matched()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_type_vocabulary_round_trips() {
        for tag in ["Sale", "Expense", "Purchase", "Payment-Out", "Payment-In", "Sale Order"] {
            assert_eq!(LedgerType::from(tag).as_str(), tag);
        }
        assert_eq!(LedgerType::from("payment out"), LedgerType::PaymentOut);
        assert_eq!(
            LedgerType::from("Journal"),
            LedgerType::Other("Journal".to_string())
        );
    }

    #[test]
    fn ledger_flows() {
        assert_eq!(LedgerType::Sale.flow(), Some(Flow::Incoming));
        assert_eq!(LedgerType::PaymentIn.flow(), Some(Flow::Incoming));
        assert_eq!(LedgerType::Expense.flow(), Some(Flow::Outgoing));
        assert_eq!(LedgerType::Purchase.flow(), Some(Flow::Outgoing));
        assert_eq!(LedgerType::PaymentOut.flow(), Some(Flow::Outgoing));
        assert_eq!(LedgerType::SaleOrder.flow(), None);
        assert_eq!(LedgerType::Other("Journal".into()).flow(), None);
    }

    #[test]
    fn record_kind_parse_respects_source_vocabulary() {
        assert_eq!(
            RecordKind::parse(SourceKind::Bank, "CREDIT").unwrap(),
            RecordKind::Bank(BankDirection::Credit)
        );
        assert!(matches!(
            RecordKind::parse(SourceKind::Bank, "Sale"),
            Err(ReconcileError::InvalidTypeTag(_))
        ));
        assert_eq!(
            RecordKind::parse(SourceKind::Ledger, "Expense").unwrap(),
            RecordKind::Ledger(LedgerType::Expense)
        );
        assert!(RecordKind::parse(SourceKind::Ledger, "  ").is_err());
    }

    #[test]
    fn ledger_type_serializes_as_tag() {
        let json = serde_json::to_string(&LedgerType::PaymentOut).unwrap();
        assert_eq!(json, "\"Payment-Out\"");
        let back: LedgerType = serde_json::from_str("\"Sale Order\"").unwrap();
        assert_eq!(back, LedgerType::SaleOrder);
    }

    #[test]
    fn reconciled_with_view() {
        assert_eq!(ReconState::Unmatched.reconciled_with(), None);
        let pair = ReconState::Matched {
            group: GroupId(3),
            link: MatchLink::Counterpart {
                id: RecordId(9),
                kind: SourceKind::Ledger,
            },
            provenance: MatchProvenance::Auto,
        };
        assert_eq!(pair.reconciled_with(), Some((9, "ledger")));
        let group = ReconState::Matched {
            group: GroupId(3),
            link: MatchLink::Group,
            provenance: MatchProvenance::Manual,
        };
        assert_eq!(group.reconciled_with(), Some((3, "group")));
        assert_eq!(group.group(), Some(GroupId(3)));
    }
}
