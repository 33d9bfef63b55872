//! Client-wide defaults.
//!
//! # Design
//! `ClientConfig` is consulted once per execution attempt by `settings_for`,
//! which folds it together with the descriptor into `ExecutionSettings`.
//! Descriptor settings are `Option`s, and only a `None` falls through to the
//! client value; with neither set the request stays anonymous and uses the
//! platform trust store.

use crate::descriptor::RequestDescriptor;
use crate::tls::TrustPolicy;
use crate::transport::ExecutionSettings;

/// Environment variable holding the host's default user agent.
pub const USER_AGENT_ENV: &str = "HTTP_AGENT";

pub const DEFAULT_USER_AGENT: &str = concat!("restclient/", env!("CARGO_PKG_VERSION"));

/// Defaults a `RequestClient` applies to descriptors that leave a setting
/// unspecified. Descriptor-level choices always win.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    trust_policy: Option<TrustPolicy>,
    send_user_agent: Option<bool>,
    user_agent: String,
    decode_deflate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            trust_policy: None,
            send_user_agent: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            decode_deflate: false,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the user agent taken from `HTTP_AGENT` when it is set
    /// and non-empty.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(agent) = std::env::var(USER_AGENT_ENV) {
            if !agent.trim().is_empty() {
                config.user_agent = agent.trim().to_string();
            }
        }
        config
    }

    pub fn trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.trust_policy = Some(policy);
        self
    }

    pub fn send_user_agent(mut self, enabled: bool) -> Self {
        self.send_user_agent = Some(enabled);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Decode `Content-Encoding: deflate` responses. Off by default:
    /// `deflate` is advertised in `Accept-Encoding` but passed through as is.
    pub fn decode_deflate(mut self, enabled: bool) -> Self {
        self.decode_deflate = enabled;
        self
    }

    pub fn user_agent_value(&self) -> &str {
        &self.user_agent
    }

    /// Merge these defaults with the descriptor's explicit settings.
    pub fn settings_for(&self, descriptor: &RequestDescriptor) -> ExecutionSettings {
        let trust_policy = descriptor
            .trust_policy()
            .or(self.trust_policy.as_ref())
            .cloned()
            .unwrap_or_default();
        let send_user_agent = descriptor
            .send_user_agent()
            .or(self.send_user_agent)
            .unwrap_or(false);
        ExecutionSettings {
            trust_policy,
            user_agent: send_user_agent.then(|| self.user_agent.clone()),
            decode_deflate: self.decode_deflate,
        }
    }
}
