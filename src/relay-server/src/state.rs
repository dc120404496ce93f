//! Application state shared across request handlers.

use std::sync::Arc;

use relay_policy::Policy;

use crate::upstream::{ReqwestUpstream, Upstream};

/// Application state shared across request handlers.
///
/// The policy is resolved once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    /// Effective relay policy.
    pub policy: Arc<Policy>,
    /// Transport used to reach targets.
    pub upstream: Arc<dyn Upstream>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create state backed by the reqwest transport.
    pub fn new(policy: Policy) -> anyhow::Result<Self> {
        let policy = Arc::new(policy);
        let upstream = ReqwestUpstream::new(Arc::clone(&policy))?;
        Ok(Self {
            policy,
            upstream: Arc::new(upstream),
        })
    }

    /// Create state with a caller-supplied transport.
    pub fn with_upstream(policy: Policy, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            policy: Arc::new(policy),
            upstream,
        }
    }
}
