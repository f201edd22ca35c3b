//! Host tree seam for Recast.
//!
//! The engine only sees a [`HostTree`]: stable node identities, a text/element
//! distinction, structural edits and a mutation feed. [`Document`] is an arena
//! implementation used by tests and the simulator.

pub mod document;
pub mod error;
pub mod fragment;
pub mod host;
pub mod walk;

pub use document::Document;
pub use error::{TreeError, TreeResult};
pub use fragment::Fragment;
pub use host::{HostTree, MutationBatch, MutationKind, MutationRecord, NodeKind, Subscription};
pub use walk::{ancestors, is_within, walk, Visit};
