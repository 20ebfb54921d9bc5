//! Movement kinds recorded by the container ledgers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DepotError, Result};

/// Direction of a container movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Containers handed to the party; increases its debt.
    Loan,
    /// Containers returned by the party; reduces debt, excess becomes credit.
    Collection,
}

impl MovementKind {
    /// Value stored in the `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Loan => "loan",
            MovementKind::Collection => "collection",
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loan" | "prestamo" => Ok(MovementKind::Loan),
            "collection" | "recoleccion" => Ok(MovementKind::Collection),
            _ => Err(DepotError::InvalidOperation(s.to_string())),
        }
    }
}
