//! Depot Common Types
//!
//! Shared vocabulary of the container deposit ledger: party identifiers,
//! container types and their catalog binding, movement kinds, the error
//! taxonomy and time helpers.

pub mod identifiers;
pub mod container;
pub mod movement;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use container::*;
pub use movement::*;
pub use error::*;
pub use time::*;
