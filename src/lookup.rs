//! Remote lookups used to fill cache misses.

use async_trait::async_trait;

use crate::model::GroupMetadata;

/// Failure of a remote lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The remote side could not be reached.
    #[error("lookup transport failed: {0}")]
    Transport(String),
    /// The remote side refused the request.
    #[error("lookup rejected: {0}")]
    Rejected(String),
    /// No answer arrived in time.
    #[error("lookup timed out")]
    Timeout,
}

/// Source of data the store does not receive through events.
///
/// `Ok(None)` means the remote side answered that nothing exists; the store
/// caches both answers and errors so that a miss is never retried on its own.
#[async_trait]
pub trait RemoteLookup: Send + Sync {
    /// Profile image URL of `jid`.
    async fn fetch_profile_picture_url(&self, jid: &str) -> Result<Option<String>, LookupError>;

    /// Metadata of group `jid`.
    async fn fetch_group_metadata(&self, jid: &str) -> Result<Option<GroupMetadata>, LookupError>;

    /// Metadata of broadcast list `jid`, shaped as group metadata.
    async fn fetch_broadcast_list_info(
        &self,
        jid: &str,
    ) -> Result<Option<GroupMetadata>, LookupError>;
}
