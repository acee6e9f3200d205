//! In-memory store, its collections and the event reducer.

pub mod contact_hash;
pub mod pagination;
/// Identity and merge rules shared by the keyed collections.
pub mod record;
pub mod reducer;
/// Unordered keyed repository.
pub mod repo;
/// Arrival-ordered keyed sequence.
pub mod sequence;
pub mod snapshot;
/// Comparator-ordered keyed collection.
pub mod sorted;
/// Aggregate store and synchronous queries.
pub mod store;
