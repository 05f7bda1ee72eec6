//! Indexing for Rillet collections
//!
//! Indexes accelerate query predicates (equality, membership, range) over
//! derived collection state. They are maintained in lockstep with the
//! collection through the same change-subscription channel user
//! subscribers receive, so an index never observes a half-applied commit.
//!
//! The dev-mode advisor watches full scans of unindexed expressions and
//! emits a structured suggestion once a collection is large and a scan
//! pattern is frequent.

pub mod advisor;
pub mod catalog;
pub mod index;

pub use advisor::Advisor;
pub use catalog::{IndexCatalog, ScanPlan};
pub use index::{Index, IndexType};
