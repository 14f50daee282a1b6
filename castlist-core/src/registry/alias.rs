//! Alias bindings and their audit trail.

use super::character::CharacterId;
use serde::{Deserialize, Serialize};

/// How an alias binding was learned. Later variants outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provenance {
    /// Read directly off an explicit attribution ("said Elizabeth").
    HeuristicExact,
    /// Inferred from conversation context.
    HeuristicContextual,
    /// Returned by the external oracle.
    OracleResolved,
}

impl Provenance {
    pub fn name(&self) -> &'static str {
        match self {
            Provenance::HeuristicExact => "heuristic-exact",
            Provenance::HeuristicContextual => "heuristic-contextual",
            Provenance::OracleResolved => "oracle-resolved",
        }
    }
}

/// The current owner of a normalized descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasBinding {
    /// Normalized descriptor.
    pub descriptor: String,
    pub character: CharacterId,
    pub provenance: Provenance,
}

/// What a `register_alias` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AliasChange {
    /// A new binding.
    Bound,
    /// Same character, nothing to do.
    Unchanged,
    /// Same character, stronger provenance.
    Upgraded { from: Provenance },
    /// Moved from another character by an equal or stronger source.
    Rebound {
        previous: CharacterId,
        previous_provenance: Provenance,
    },
    /// Refused: the current owner's provenance outranks the request.
    Rejected { owner: CharacterId },
}

impl AliasChange {
    /// Rebinds and rejections are the conflicts worth reviewing.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AliasChange::Rebound { .. } | AliasChange::Rejected { .. })
    }
}

/// One entry of the append-only alias history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// Monotonic sequence number within the registry.
    pub sequence: u64,
    pub descriptor: String,
    pub character: CharacterId,
    pub provenance: Provenance,
    pub change: AliasChange,
}
