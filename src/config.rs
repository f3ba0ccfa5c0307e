//! Configuration for the idea page.
//!
//! Settings come from an optional YAML file and are then overridden by command-line arguments
//! parsed with `arrrg`.  Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::entitlement::{Account, PricingTier};
use crate::error::{Error, Result};
use crate::page::DEFAULT_PLAN;
use crate::stream::ReconnectPolicy;

/// Default streaming endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api";

/// Environment variable holding the session token when nothing else is configured.
pub const DEFAULT_TOKEN_ENV: &str = "IDEAGEN_TOKEN";

const DEFAULT_AUTH_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_NETWORK_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_TRANSPORT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Command-line arguments for the ideagen tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct IdeaArgs {
    /// YAML configuration file.
    #[arrrg(optional, "Path to a YAML configuration file", "PATH")]
    pub config: Option<String>,

    /// Streaming endpoint.
    #[arrrg(optional, "Streaming endpoint (default: http://localhost:8000/api)", "URL")]
    pub endpoint: Option<String>,

    /// Plan that unlocks the generator.
    #[arrrg(optional, "Plan required to generate (default: premium_subscription)", "PLAN")]
    pub plan: Option<String>,

    /// Literal session token.
    #[arrrg(optional, "Session token to send as the bearer credential", "TOKEN")]
    pub token: Option<String>,

    /// File holding the session token, re-read on every connect.
    #[arrrg(optional, "Read the session token from this file", "PATH")]
    pub token_file: Option<String>,

    /// Environment variable holding the session token.
    #[arrrg(optional, "Read the session token from this variable (default: IDEAGEN_TOKEN)", "VAR")]
    pub token_env: Option<String>,

    /// Read entitlement from the token's claims.
    #[arrrg(flag, "Decide entitlement from the session token's plan claims")]
    pub claims: bool,

    /// Bound on consecutive automatic reconnects.
    #[arrrg(optional, "Give up after this many consecutive reconnects", "COUNT")]
    pub max_retries: Option<u32>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Where the session token comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenSetting {
    /// A literal token.
    Static(String),
    /// A file re-read on every connect.
    File(String),
    /// An environment variable re-read on every connect.
    Env(String),
}

/// Resolved configuration for the idea page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaConfig {
    /// Streaming endpoint.
    pub endpoint: String,

    /// Plan that unlocks the generator.
    pub plan: String,

    /// Delay before reconnecting after a forbidden response.
    pub auth_retry_delay_ms: u64,

    /// Delay before reconnecting after a network failure.
    pub network_retry_delay_ms: u64,

    /// Delay before re-opening a stream that failed mid-flight, unless the server sets one.
    pub transport_retry_delay_ms: u64,

    /// Connection establishment timeout.  `None` waits indefinitely.
    pub connect_timeout_ms: Option<u64>,

    /// Bound on consecutive automatic reconnects.  `None` retries forever.
    pub max_retries: Option<u32>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// File holding the session token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,

    /// Environment variable holding the session token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Decide entitlement from the token's claims instead of `account` and `plans`.
    pub claims: bool,

    /// The signed-in account when entitlement is configured statically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,

    /// Plans held by `account`.
    pub plans: Vec<String>,

    /// Tiers shown to accounts without the plan.
    pub pricing: Vec<PricingTier>,

    /// Literal token from the command line.  Never read from or written to a file.
    #[serde(skip)]
    pub token: Option<String>,
}

impl IdeaConfig {
    /// Creates a new IdeaConfig with default values.
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            plan: DEFAULT_PLAN.to_string(),
            auth_retry_delay_ms: DEFAULT_AUTH_RETRY_DELAY_MS,
            network_retry_delay_ms: DEFAULT_NETWORK_RETRY_DELAY_MS,
            transport_retry_delay_ms: DEFAULT_TRANSPORT_RETRY_DELAY_MS,
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            max_retries: None,
            use_color: true,
            token_file: None,
            token_env: None,
            claims: false,
            account: None,
            plans: Vec::new(),
            pricing: default_pricing(),
            token: None,
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("could not read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Load the file named by `args` (if any) and apply the remaining arguments on top.
    pub fn load(args: &IdeaArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        let config = config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Override settings with command-line arguments.
    pub fn apply_args(mut self, args: &IdeaArgs) -> Self {
        if let Some(endpoint) = &args.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(plan) = &args.plan {
            self.plan = plan.clone();
        }
        if let Some(token) = &args.token {
            self.token = Some(token.clone());
        }
        if let Some(path) = &args.token_file {
            self.token_file = Some(path.clone());
        }
        if let Some(var) = &args.token_env {
            self.token_env = Some(var.clone());
        }
        if args.claims {
            self.claims = true;
        }
        if args.max_retries.is_some() {
            self.max_retries = args.max_retries;
        }
        if args.no_color {
            self.use_color = false;
        }
        self
    }

    /// Check values that deserialize but cannot be used.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.endpoint)
            .map_err(|err| Error::config(format!("invalid endpoint {:?}: {err}", self.endpoint)))?;
        if self.plan.trim().is_empty() {
            return Err(Error::config("plan must not be empty"));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(Error::config("connect_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// The token source, in precedence order: literal token, file, environment variable.
    pub fn token_setting(&self) -> TokenSetting {
        if let Some(token) = &self.token {
            TokenSetting::Static(token.clone())
        } else if let Some(path) = &self.token_file {
            TokenSetting::File(path.clone())
        } else {
            TokenSetting::Env(
                self.token_env
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
            )
        }
    }

    /// The reconnect delays and bound.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            auth_retry_delay: Duration::from_millis(self.auth_retry_delay_ms),
            network_retry_delay: Duration::from_millis(self.network_retry_delay_ms),
            transport_retry_delay: Duration::from_millis(self.transport_retry_delay_ms),
            max_retries: self.max_retries,
        }
    }

    /// The connection establishment timeout.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the plan.
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    /// Sets the retry bound.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for IdeaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The tiers offered when the configuration names none.
pub fn default_pricing() -> Vec<PricingTier> {
    vec![
        PricingTier {
            name: "Free".to_string(),
            price: "$0/month".to_string(),
            description: "Try the generator".to_string(),
            features: vec!["Browse example ideas".to_string()],
        },
        PricingTier {
            name: "Premium".to_string(),
            price: "$10/month".to_string(),
            description: "Unlimited AI-powered business ideas".to_string(),
            features: vec![
                "Unlimited idea generation".to_string(),
                "Live streaming results".to_string(),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = IdeaConfig::new();
        assert_eq!(config.endpoint, "http://localhost:8000/api");
        assert_eq!(config.plan, "premium_subscription");
        assert!(config.use_color);
        assert!(config.max_retries.is_none());
        assert!(!config.claims);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.token_setting(),
            TokenSetting::Env("IDEAGEN_TOKEN".to_string())
        );
        assert_eq!(config.pricing.len(), 2);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(IdeaConfig::from_yaml("{}").unwrap(), IdeaConfig::new());
    }

    #[test]
    fn yaml_overrides() {
        let yaml = r#"
endpoint: https://ideas.example.com/api
plan: enterprise
auth_retry_delay_ms: 250
max_retries: 5
use_color: false
token_file: /run/session
account:
  name: Ada
  email: ada@example.com
plans: [enterprise]
pricing:
  - name: Enterprise
    price: Contact us
"#;
        let config = IdeaConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.endpoint, "https://ideas.example.com/api");
        assert_eq!(config.plan, "enterprise");
        assert_eq!(config.max_retries, Some(5));
        assert!(!config.use_color);
        assert_eq!(
            config.account,
            Some(Account::new("Ada").with_email("ada@example.com"))
        );
        assert_eq!(config.plans, vec!["enterprise".to_string()]);
        assert_eq!(config.pricing.len(), 1);
        assert!(config.pricing[0].features.is_empty());

        let policy = config.reconnect_policy();
        assert_eq!(policy.auth_retry_delay, Duration::from_millis(250));
        assert_eq!(policy.network_retry_delay, Duration::from_secs(2));
        assert_eq!(
            config.token_setting(),
            TokenSetting::File("/run/session".to_string())
        );
    }

    #[test]
    fn null_connect_timeout_waits_indefinitely() {
        let config = IdeaConfig::from_yaml("connect_timeout_ms: null").unwrap();
        assert_eq!(config.connect_timeout(), None);
        let transport =
            crate::transport::HttpTransport::with_options(&config.endpoint, config.connect_timeout())
                .unwrap();
        assert_eq!(transport.connect_timeout(), None);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(
            IdeaConfig::from_yaml("endpoint: not a url")
                .unwrap_err()
                .is_config()
        );
        assert!(IdeaConfig::from_yaml("plan: ''").unwrap_err().is_config());
        assert!(
            IdeaConfig::from_yaml("connect_timeout_ms: 0")
                .unwrap_err()
                .is_config()
        );
        assert!(IdeaConfig::from_file("/nonexistent/ideagen.yaml")
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn args_override_file() {
        let args = IdeaArgs {
            endpoint: Some("http://127.0.0.1:9000/stream".to_string()),
            plan: Some("pro".to_string()),
            token: Some("abc".to_string()),
            token_file: Some("/run/session".to_string()),
            claims: true,
            max_retries: Some(3),
            no_color: true,
            ..IdeaArgs::default()
        };
        let config = IdeaConfig::new().apply_args(&args);
        assert_eq!(config.endpoint, "http://127.0.0.1:9000/stream");
        assert_eq!(config.plan, "pro");
        assert!(config.claims);
        assert_eq!(config.max_retries, Some(3));
        assert!(!config.use_color);
        assert_eq!(config.token_setting(), TokenSetting::Static("abc".to_string()));
    }

    #[test]
    fn load_without_file() {
        let args = IdeaArgs {
            token_env: Some("SESSION".to_string()),
            ..IdeaArgs::default()
        };
        let config = IdeaConfig::load(&args).unwrap();
        assert_eq!(config.token_setting(), TokenSetting::Env("SESSION".to_string()));
    }

    #[test]
    fn literal_token_is_not_serialized() {
        let config = IdeaConfig::new().apply_args(&IdeaArgs {
            token: Some("secret".to_string()),
            ..IdeaArgs::default()
        });
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }

    #[test]
    fn config_builder_pattern() {
        let config = IdeaConfig::new()
            .with_endpoint("http://example.com/api")
            .with_plan("pro")
            .with_max_retries(Some(2))
            .without_color();
        assert_eq!(config.endpoint, "http://example.com/api");
        assert_eq!(config.plan, "pro");
        assert_eq!(config.max_retries, Some(2));
        assert!(!config.use_color);
    }
}
