use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(AccountId);
id_type!(
    /// Identifier of a persisted transaction record, bank-side or ledger-side.
    RecordId
);
id_type!(BatchId);
id_type!(
    /// Identifier of a reconciliation group. Pairwise matches get one too.
    GroupId
);

/// Which side of a reconciliation a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Bank,
    Ledger,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Bank => "bank",
            SourceKind::Ledger => "ledger",
        }
    }

    pub fn other(self) -> Self {
        match self {
            SourceKind::Bank => SourceKind::Ledger,
            SourceKind::Ledger => SourceKind::Bank,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank" => Ok(SourceKind::Bank),
            "ledger" => Ok(SourceKind::Ledger),
            other => Err(format!("Unknown source kind: '{other}'")),
        }
    }
}

/// An import target. Bank accounts receive statement batches; ledger
/// accounts receive bookkeeping exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub source_kind: SourceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_parses_its_own_rendering() {
        for kind in [SourceKind::Bank, SourceKind::Ledger] {
            assert_eq!(kind.as_str().parse::<SourceKind>(), Ok(kind));
        }
        assert!("brokerage".parse::<SourceKind>().is_err());
    }

    #[test]
    fn other_side() {
        assert_eq!(SourceKind::Bank.other(), SourceKind::Ledger);
        assert_eq!(SourceKind::Ledger.other(), SourceKind::Bank);
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&RecordId(42)).unwrap(), "42");
        assert_eq!(AccountId(7).to_string(), "7");
    }
}
