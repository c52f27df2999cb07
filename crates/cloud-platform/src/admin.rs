//! Admin/Registration (C10): the thin slice of agent registration the
//! ingress actually depends on. Grounded on
//! `original_source/shared/models/auth_models.py` and
//! `original_source/cloud-platform/services/key_manager.py`; the real
//! credential store, UI, and tenant-onboarding workflow are out of scope
//! (§1 Non-goals).

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentClaims {
    pub tenant_id: String,
    pub agent_id: String,
    pub site: Option<String>,
}

/// In-process `token -> claims` registry, standing in for the real
/// credential store.
#[derive(Default)]
pub struct AdminRegistry {
    tokens: DashMap<String, AgentClaims>,
}

impl AdminRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a bearer token for an agent, returning the token.
    pub fn register(&self, tenant_id: impl Into<String>, agent_id: impl Into<String>, site: Option<String>) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(
            token.clone(),
            AgentClaims {
                tenant_id: tenant_id.into(),
                agent_id: agent_id.into(),
                site,
            },
        );
        token
    }

    pub fn authenticate(&self, token: &str) -> Option<AgentClaims> {
        self.tokens.get(token).map(|c| c.clone())
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }
}
