//! Identifier types for ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the party a ledger is keyed on.
///
/// In the client↔vendor ledger this is the client id; in the
/// vendor↔warehouse ledger it is the vendor id. The core never owns the
/// party record, it only references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(i64);

impl PartyId {
    /// Create a party ID.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Database ids are positive serials.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PartyId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of the vendor acting on a client movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(i64);

impl VendorId {
    /// Create a vendor ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// The same vendor seen as the party of the warehouse ledger.
    pub fn as_party(&self) -> PartyId {
        PartyId(self.0)
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a persisted movement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(i64);

impl MovementId {
    /// Create a movement ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates movements with the load or unload event they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(i64);

impl BatchId {
    /// Create a batch ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-party receipt number, advanced once per accepted movement.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Folio(i64);

impl Folio {
    /// Folio of a party that never had a movement.
    pub const ZERO: Folio = Folio(0);

    /// Create a folio.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// The folio the next accepted movement receives.
    pub fn next(&self) -> Folio {
        Folio(self.0 + 1)
    }
}

impl fmt::Display for Folio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
