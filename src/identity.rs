use std::fmt::Debug;

/// Resolves the agent on whose behalf the process is acting.
pub trait IdentityProvider: Debug + Send + Sync {
    /// The stable id of the signed-in agent, `None` when nobody is signed in.
    fn current_agent_id(&self) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticIdentity {
    agent_id: Option<String>,
}

impl StaticIdentity {
    pub fn signed_in(agent_id: impl Into<String>) -> Self {
        StaticIdentity {
            agent_id: Some(agent_id.into()),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_agent_id(&self) -> Option<String> {
        self.agent_id.clone().filter(|id| !id.trim().is_empty())
    }
}
