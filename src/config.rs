//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::balancer::Strategy;
use crate::circuit::CircuitBreakerConfig;
use crate::discovery::DiscoveryConfig;
use crate::router::RouterConfig;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `{env.VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Admin-API authentication configuration
    pub auth: AuthConfig,
    /// MCP router configuration
    pub router: RouterConfig,
    /// Load balancer configuration
    pub balancer: BalancerConfig,
    /// Default circuit breaker configuration, applied to every provider
    /// unless overridden per-provider
    pub circuit_breaker: CircuitBreakerConfig,
    /// Service registry health-polling configuration
    pub registry: RegistryConfig,
    /// Service discovery configuration
    pub discovery: DiscoveryConfig,
    /// Built-in plugin configuration
    pub plugins: PluginsConfig,
}

/// Service registry health-polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often the health loop polls every external provider and built-in plugin
    #[serde(with = "crate::config::humantime_serde")]
    pub health_interval: Duration,
    /// Per-provider timeout for the external `GET /health` probe
    #[serde(with = "crate::config::humantime_serde")]
    pub health_timeout: Duration,
    /// Path appended to a provider's address for the health probe
    pub health_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            health_path: "/health".to_string(),
        }
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Strategy used to pick among healthy candidates
    pub strategy: Strategy,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self { strategy: Strategy::RoundRobin }
    }
}

/// Built-in plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PluginsConfig {
    /// In-memory/on-disk key-value plugin
    pub memory: MemoryPluginConfig,
    /// Read-only git introspection plugin
    pub git: GitPluginConfig,
    /// Filesystem read/write/list plugin
    pub editor: EditorPluginConfig,
}

/// Memory plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPluginConfig {
    /// Enable the plugin
    pub enabled: bool,
    /// Path to the on-disk JSON snapshot
    pub store_path: String,
}

impl Default for MemoryPluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: "mcp-gateway-memory.json".to_string(),
        }
    }
}

/// Git plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitPluginConfig {
    /// Enable the plugin
    pub enabled: bool,
    /// Repository root the plugin is scoped to
    pub repo_path: String,
    /// Per-invocation timeout before the subprocess is killed
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GitPluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_path: ".".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Editor plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorPluginConfig {
    /// Enable the plugin
    pub enabled: bool,
    /// Root directory all reads/writes/lists are scoped under
    pub base_path: String,
    /// File extensions (e.g. `"txt"`, `"md"`) that are allowed; empty means all
    pub allow: Vec<String>,
    /// Path prefixes (relative to `base_path`) that are denied, checked after `allow`
    pub deny: Vec<String>,
    /// Maximum file size, in bytes, `read`/`write` will operate on
    pub max_file_size: u64,
}

impl Default for EditorPluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_path: ".".to_string(),
            allow: Vec::new(),
            deny: Vec::new(),
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// Authentication configuration for the gateway's admin surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable authentication (default: false for backwards compatibility)
    pub enabled: bool,

    /// Bearer token for simple authentication
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random token)
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// API keys for multi-client access with optional restrictions
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,

    /// Paths that bypass authentication (default: `["/health"]`)
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bearer_token: None,
            api_keys: Vec::new(),
            public_paths: default_public_paths(),
        }
    }
}

impl AuthConfig {
    /// Resolve the bearer token (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_bearer_token(&self) -> Option<String> {
        self.bearer_token.as_ref().map(|token| {
            if token == "auto" {
                use rand::Rng;
                let random_bytes: [u8; 32] = rand::rng().random();
                format!(
                    "mcp_{}",
                    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, random_bytes)
                )
            } else if let Some(var_name) = token.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| token.clone())
            } else {
                token.clone()
            }
        })
    }
}

/// API key configuration for multi-client access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// The API key value (supports `env:VAR_NAME`)
    pub key: String,

    /// Human-readable name for this client
    #[serde(default)]
    pub name: String,

    /// Rate limit (requests per minute, 0 = unlimited)
    #[serde(default)]
    pub rate_limit: u32,
}

impl ApiKeyConfig {
    /// Resolve the API key (expand env vars)
    #[must_use]
    pub fn resolve_key(&self) -> String {
        if let Some(var_name) = self.key.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.key.clone())
        } else {
            self.key.clone()
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("Config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("MCP_GATEWAY_").split("__"));

        let mut config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns in config values that
    /// support them (plugin base paths, discovery addresses).
    fn expand_env_vars(&mut self) {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        self.plugins.editor.base_path = Self::expand_string(&re, &self.plugins.editor.base_path);
        self.plugins.git.repo_path = Self::expand_string(&re, &self.plugins.git.repo_path);
        self.plugins.memory.store_path = Self::expand_string(&re, &self.plugins.memory.store_path);
        for address in &mut self.discovery.static_addresses {
            *address = Self::expand_string(&re, address);
        }
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Whether TLS is terminated by this process (vs. behind a proxy)
    pub tls_enabled: bool,
    /// Path to a PEM certificate, when `tls_enabled` is set
    pub tls_cert_path: Option<String>,
    /// Path to a PEM private key, when `tls_enabled` is set
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39400,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "MCP_GW_TEST_KEY_A=hello_from_env_file").unwrap();
        writeln!(f, "MCP_GW_TEST_KEY_B=42").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("MCP_GW_TEST_KEY_A").unwrap(), "hello_from_env_file");
        assert_eq!(env::var("MCP_GW_TEST_KEY_B").unwrap(), "42");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_load_env_files_empty() {
        let config = Config::default();
        assert!(config.env_files.is_empty());
        config.load_env_files();
    }

    #[test]
    fn test_config_deserialized_from_yaml() {
        let yaml = r#"
env_files:
  - ~/.claude/secrets.env
  - /tmp/extra.env
server:
  host: "127.0.0.1"
  port: 39401
balancer:
  strategy: least_connections
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.env_files.len(), 2);
        assert_eq!(config.env_files[0], "~/.claude/secrets.env");
        assert_eq!(config.server.port, 39401);
        assert_eq!(config.balancer.strategy, Strategy::LeastConnections);
    }

    #[test]
    fn expand_env_vars_falls_back_to_inline_default() {
        let mut config = Config {
            plugins: PluginsConfig {
                editor: EditorPluginConfig {
                    base_path: "${MCP_GW_TEST_UNSET_BASE:-/tmp/workspace}/files".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        config.expand_env_vars();
        assert_eq!(config.plugins.editor.base_path, "/tmp/workspace/files");
    }
}
