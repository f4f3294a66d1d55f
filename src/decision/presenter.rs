// Decision presenters and tenant registrations

use super::request::{DecisionKind, DecisionRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Strong identity of a host window (tenant).
///
/// Chosen by the host when the window attaches and never re-derived from
/// request payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerKey(String);

impl OwnerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for OwnerKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// A UI surface that can show decision requests.
///
/// `present` must not block waiting for the user; the answer comes back
/// through `DecisionCoordinator::resolve`.
pub trait DecisionPresenter: Send + Sync {
    fn present(&self, request: &DecisionRequest);

    /// The request can no longer be answered (timed out or torn down)
    fn withdraw(&self, _channel_id: &str) {}
}

/// One window's presenters, keyed by the window's identity
#[derive(Clone)]
pub struct TenantRegistration {
    pub owner: OwnerKey,
    pub permission: Arc<dyn DecisionPresenter>,
    pub question: Arc<dyn DecisionPresenter>,
}

impl TenantRegistration {
    pub fn new(
        owner: impl Into<OwnerKey>,
        permission: Arc<dyn DecisionPresenter>,
        question: Arc<dyn DecisionPresenter>,
    ) -> Self {
        Self {
            owner: owner.into(),
            permission,
            question,
        }
    }

    /// Same presenter for both kinds
    pub fn single(owner: impl Into<OwnerKey>, presenter: Arc<dyn DecisionPresenter>) -> Self {
        Self::new(owner, Arc::clone(&presenter), presenter)
    }

    pub fn presenter_for(&self, kind: DecisionKind) -> &Arc<dyn DecisionPresenter> {
        match kind {
            DecisionKind::ToolPermission => &self.permission,
            DecisionKind::StructuredQuestion => &self.question,
        }
    }
}

impl fmt::Debug for TenantRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantRegistration")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
