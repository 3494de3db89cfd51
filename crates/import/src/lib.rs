pub mod grouping;
pub mod match_engine;
pub mod restore;
pub mod signature;

pub use grouping::{GroupDraft, GroupShape, GroupTotals};
pub use match_engine::{AutoMatchEngine, MatchBand, MatchCandidate, MAX_SCORE};
pub use restore::Restoration;
pub use signature::{narration_prefix, Partition, Signature, SignatureIndex, Signed};
