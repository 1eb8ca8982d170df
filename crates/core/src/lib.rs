//! Domain layer for the job board.
//!
//! Holds the document shapes stored in the users and jobs collections and the
//! store-independent half of the job update protocol: entry builders, reply
//! targeting, applied-jobs ordering and the per-candidate read filters.

pub mod id;
pub mod protocol;
pub mod types;

pub use id::{DocumentId, InvalidIdentifier};
