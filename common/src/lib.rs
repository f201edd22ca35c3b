//! Recast Common Types
//!
//! Shared types used across the Recast crates: currencies, node identifiers,
//! clocks and timing constants, and the common error type.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
