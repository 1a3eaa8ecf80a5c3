//! SimpleBank Common Types
//!
//! Shared types used across the SimpleBank ledger: entity identifiers,
//! supported currencies and the error taxonomy surfaced by the transfer engine.

pub mod identifiers;
pub mod monetary;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
