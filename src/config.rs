//! Stack configuration
//!
//! Everything the builder needs arrives through [`StackConfig`]. Values are
//! read once, from a dotenv file and the process environment, and defaults
//! are applied here rather than at the point of use.

use crate::dotenv;
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

pub const DOMAIN_NAME: &str = "DOMAIN_NAME";
pub const NUM_OF_SSH_SERVERS: &str = "NUM_OF_SSH_SERVERS";
pub const OAUTH_TYPE: &str = "OAUTH_TYPE";
pub const OAUTH_DOMAIN: &str = "OAUTH_DOMAIN";
pub const OAUTH_CLIENT_ID: &str = "OAUTH_CLIENT_ID";
pub const OAUTH_CLIENT_SECRET: &str = "OAUTH_CLIENT_SECRET";

/// Every variable the stack reads
pub const ALL_KEYS: [&str; 6] = [
    DOMAIN_NAME,
    NUM_OF_SSH_SERVERS,
    OAUTH_TYPE,
    OAUTH_DOMAIN,
    OAUTH_CLIENT_ID,
    OAUTH_CLIENT_SECRET,
];

/// OAuth provider settings handed to the server container
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OAuthConfig {
    pub provider: String,
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.client_secret.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("OAuthConfig")
            .field("provider", &self.provider)
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &secret)
            .finish()
    }
}

/// Immutable configuration for one synthesis run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Domain served by the load balancer and named in the certificate
    pub domain_name: String,
    /// Number of SSH relay instances, always at least one
    pub ssh_servers: usize,
    pub oauth: OAuthConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            domain_name: String::new(),
            ssh_servers: 1,
            oauth: OAuthConfig::default(),
        }
    }
}

impl StackConfig {
    /// Build a config from a variable lookup
    ///
    /// Missing values become empty strings; the instance count falls back to
    /// one when it is missing, not a number, or not positive.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            domain_name: get(DOMAIN_NAME),
            ssh_servers: parse_instance_count(lookup(NUM_OF_SSH_SERVERS).as_deref()),
            oauth: OAuthConfig {
                provider: get(OAUTH_TYPE),
                domain: get(OAUTH_DOMAIN),
                client_id: get(OAUTH_CLIENT_ID),
                client_secret: get(OAUTH_CLIENT_SECRET),
            },
        }
    }

    /// Load from an optional dotenv file plus the process environment
    ///
    /// Variables already set in the process environment win over the file.
    /// A dotenv path that does not exist is an error.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        Self::load_with(env_file, |key| std::env::var(key).ok())
    }

    /// Load from an optional dotenv file, with `env` taking precedence over it
    pub fn load_with<F>(env_file: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_vars: HashMap<String, String> = match env_file {
            Some(path) => dotenv::load(path)
                .with_context(|| format!("Could not load {}", path.display()))?
                .into_iter()
                .collect(),
            None => HashMap::new(),
        };
        log::debug!("loaded {} variables from dotenv", file_vars.len());
        for key in ALL_KEYS {
            let source = if env(key).is_some() {
                "environment"
            } else if file_vars.contains_key(key) {
                "dotenv"
            } else {
                "unset"
            };
            log::trace!("{key}: {source}");
        }

        let config = Self::from_lookup(|key| env(key).or_else(|| file_vars.get(key).cloned()));
        log::debug!("{config:?}");
        Ok(config)
    }

    /// Names of required values that are empty
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.domain_name.is_empty() {
            missing.push(DOMAIN_NAME);
        }
        if self.oauth.provider.is_empty() {
            missing.push(OAUTH_TYPE);
        }
        if self.oauth.domain.is_empty() {
            missing.push(OAUTH_DOMAIN);
        }
        if self.oauth.client_id.is_empty() {
            missing.push(OAUTH_CLIENT_ID);
        }
        if self.oauth.client_secret.is_empty() {
            missing.push(OAUTH_CLIENT_SECRET);
        }
        missing
    }

    /// Fail when any required value is empty
    pub fn ensure_complete(&self) -> Result<()> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }
        Ok(())
    }

    /// Warn about each required value that is empty
    pub fn warn_missing(&self) {
        for key in self.missing_required() {
            log::warn!("{key} is not set; declarations using it will receive an empty value");
        }
    }

    /// Public URL of the server
    pub fn self_url(&self) -> String {
        format!("https://{}", self.domain_name)
    }
}

/// Parse the SSH server count, falling back to one
pub fn parse_instance_count(raw: Option<&str>) -> usize {
    match raw.map(str::parse::<i64>) {
        Some(Ok(n)) if n > 0 => usize::try_from(n).unwrap_or(1),
        Some(_) => {
            log::debug!("ignoring invalid {NUM_OF_SSH_SERVERS} value {raw:?}, using 1");
            1
        }
        None => 1,
    }
}
