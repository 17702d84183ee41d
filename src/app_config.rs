use crate::sensor::FixOptions;
use config::{Config, ConfigError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    core: Core,
    store: Store,
    firebase: Option<Firebase>,
    #[serde(default)]
    tracking: FixOptions,
    viewer: Viewer,
    agent: Option<Agent>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(config::File::with_name("config_local").required(false))
            .add_source(config::Environment::with_prefix("BEACON").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn firebase(&self) -> Option<&Firebase> {
        self.firebase.as_ref()
    }

    pub fn tracking(&self) -> &FixOptions {
        &self.tracking
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }
}

#[derive(Debug, Deserialize)]
pub struct Core {
    channel_buffer_size: usize,
}

impl Core {
    pub fn channel_buffer_size(&self) -> usize {
        self.channel_buffer_size
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Firebase,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    backend: Backend,
}

impl Store {
    pub fn backend(&self) -> Backend {
        self.backend
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Firebase {
    url: String,
    auth_token: Option<String>,
    retry_ms: u64,
    retry_max_delay_ms: u64,
    stale_connection_timeout_ms: u64,
    connect_timeout_ms: u64,
}

impl Firebase {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn retry_ms(&self) -> u64 {
        self.retry_ms
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn stale_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_connection_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Viewer {
    enabled: bool,
    agent_id: Option<String>,
    #[serde(with = "humantime_serde")]
    stale_after: Duration,
    #[serde(default)]
    agent_names: HashMap<String, String>,
}

impl Viewer {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn agent_names(&self) -> &HashMap<String, String> {
        &self.agent_names
    }
}

/// Simulated field agent replaying a recorded route.
#[derive(Debug, Deserialize)]
pub struct Agent {
    id: String,
    showing_id: Option<String>,
    fixes: PathBuf,
    #[serde(with = "humantime_serde")]
    interval: Duration,
    #[serde(default, with = "humantime_serde")]
    first_fix_delay: Duration,
    #[serde(default)]
    deny_permission: bool,
}

impl Agent {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn showing_id(&self) -> Option<&str> {
        self.showing_id.as_deref()
    }

    pub fn fixes(&self) -> &Path {
        &self.fixes
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn first_fix_delay(&self) -> Duration {
        self.first_fix_delay
    }

    pub fn deny_permission(&self) -> bool {
        self.deny_permission
    }
}

#[cfg(test)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn new() -> Self {
        AppConfigBuilder {
            config: AppConfig {
                core: Core { channel_buffer_size: 1 },
                store: Store { backend: Backend::Memory },
                firebase: None,
                tracking: FixOptions::default(),
                viewer: Viewer {
                    enabled: true,
                    agent_id: None,
                    stale_after: Duration::from_secs(120),
                    agent_names: HashMap::new(),
                },
                agent: None,
            },
        }
    }

    pub fn firebase_url(mut self, url: String) -> Self {
        self.config.store.backend = Backend::Firebase;
        self.config.firebase = Some(Firebase {
            url,
            auth_token: None,
            retry_ms: 100,
            retry_max_delay_ms: 200,
            stale_connection_timeout_ms: 30_000,
            connect_timeout_ms: 1_000,
        });
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
        [core]
        channel_buffer_size = 16

        [store]
        backend = "firebase"

        [firebase]
        url = "https://beacon.firebaseio.com"
        auth_token = ""
        retry_ms = 500
        retry_max_delay_ms = 30000
        stale_connection_timeout_ms = 60000
        connect_timeout_ms = 5000

        [tracking]
        high_accuracy = true
        timeout = "5s"
        maximum_age = "0s"

        [viewer]
        enabled = true
        stale_after = "2m"

        [viewer.agent_names]
        agent-2 = "Dana Whitfield"

        [agent]
        id = "agent-1"
        showing_id = "showing-42"
        fixes = "fixes.json"
        interval = "2s"
        first_fix_delay = "1s"
    "#;

    fn parse(content: &str) -> Result<AppConfig, ConfigError> {
        Config::builder().add_source(config::File::from_str(content, FileFormat::Toml)).build()?.try_deserialize()
    }

    #[test]
    fn parses_a_complete_configuration() -> Result<(), ConfigError> {
        let config = parse(CONFIG)?;

        assert_eq!(config.core().channel_buffer_size(), 16);
        assert_eq!(config.store().backend(), Backend::Firebase);
        let firebase = config.firebase().unwrap();
        assert_eq!(firebase.url(), "https://beacon.firebaseio.com");
        assert_eq!(firebase.auth_token(), None);
        assert_eq!(firebase.stale_connection_timeout(), Duration::from_secs(60));
        assert_eq!(config.tracking(), &FixOptions::default());
        assert_eq!(config.viewer().stale_after(), Duration::from_secs(120));
        assert_eq!(config.viewer().agent_names().get("agent-2").map(String::as_str), Some("Dana Whitfield"));
        let agent = config.agent().unwrap();
        assert_eq!(agent.showing_id(), Some("showing-42"));
        assert_eq!(agent.interval(), Duration::from_secs(2));
        assert_eq!(agent.first_fix_delay(), Duration::from_secs(1));
        assert!(!agent.deny_permission());
        Ok(())
    }

    #[test]
    fn tracking_and_agent_sections_are_optional() -> Result<(), ConfigError> {
        let config = parse(
            r#"
            [core]
            channel_buffer_size = 1

            [store]
            backend = "memory"

            [viewer]
            enabled = false
            stale_after = "30s"
            "#,
        )?;

        assert_eq!(config.store().backend(), Backend::Memory);
        assert!(config.firebase().is_none());
        assert!(config.agent().is_none());
        assert!(config.viewer().agent_names().is_empty());
        assert_eq!(config.tracking(), &FixOptions::default());
        Ok(())
    }
}
