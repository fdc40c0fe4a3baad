//! Configuration schema for depcache
//!
//! Configuration is stored at `~/.config/depcache/config.toml`, with an
//! optional project-local `.depcache.toml` merged on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default key prefix inside the bucket
pub const DEFAULT_PREFIX: &str = "depcache";

/// Default object store region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Upper bound for any single object store call
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Object store cache settings
    pub cache: CacheConfig,

    /// Package ecosystems handled by `depcache install`
    pub ecosystems: Vec<EcosystemConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cache: CacheConfig::default(),
            ecosystems: vec![EcosystemConfig::bundle(), EcosystemConfig::npm()],
        }
    }
}

impl Config {
    /// Overlay values from the process environment
    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Overlay values from an environment lookup.
    ///
    /// Empty values are ignored so that `FOO=` does not clear a configured
    /// setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEPCACHE_BUCKET") {
            self.cache.bucket = Some(v);
        }
        if let Some(v) = get("DEPCACHE_PREFIX") {
            self.cache.prefix = v;
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            self.cache.access_key_id = Some(v);
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            self.cache.secret_access_key = Some(v);
        }
        if let Some(v) = get("AWS_REGION") {
            self.cache.region = v;
        }
        if let Some(v) = get("DEPCACHE_ENDPOINT") {
            self.cache.endpoint = Some(v);
        }
        if let Some(v) = get("DEPCACHE_COMPRESSION").and_then(|v| parse_flag(&v)) {
            self.cache.compression = v;
        }
        if let Some(v) = get("DEPCACHE_VERBOSE").and_then(|v| parse_flag(&v)) {
            self.general.verbose = v;
        }
        if let Some(v) = get("DEPCACHE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.cache.timeout_secs = v;
        }
    }

    /// Copy of the config with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.cache.secret_access_key.is_some() {
            config.cache.secret_access_key = Some("********".to_string());
        }
        config
    }

    /// Look up an ecosystem descriptor by name
    pub fn ecosystem(&self, name: &str) -> Option<&EcosystemConfig> {
        self.ecosystems.iter().find(|e| e.name == name)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Object store cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable dependency caching (default: true)
    pub enabled: bool,

    /// Bucket holding cache archives
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    pub prefix: String,

    /// Access key of the credential pair
    pub access_key_id: Option<String>,

    /// Secret key of the credential pair
    pub secret_access_key: Option<String>,

    /// Object store region
    pub region: String,

    /// Custom endpoint for S3-compatible providers, or `file:///path` for a
    /// local directory store
    pub endpoint: Option<String>,

    /// Gzip archives before upload
    pub compression: bool,

    /// Timeout for each object store call, in seconds
    pub timeout_secs: u64,

    /// Default age for `cache prune`
    pub prune_days: u32,

    /// Directory for temporary archives (defaults to the system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: None,
            prefix: DEFAULT_PREFIX.to_string(),
            access_key_id: None,
            secret_access_key: None,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            compression: true,
            timeout_secs: MAX_TIMEOUT_SECS,
            prune_days: 30,
            temp_dir: None,
        }
    }
}

/// Descriptor for one package ecosystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcosystemConfig {
    /// Display name, also used by `--only`
    pub name: String,

    /// Cache type used in object keys (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<String>,

    /// Files whose presence means the project uses this ecosystem
    #[serde(default)]
    pub detect: Vec<String>,

    /// Lockfile path, relative to the project
    pub lockfile: String,

    /// Dependency directory, relative to the project
    pub target_dir: String,

    /// Marker file, relative to the project (defaults to `<target_dir>/.installed`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,

    /// Installer command line
    pub install: Vec<String>,

    /// Smoke command proving the installed tree works
    #[serde(default)]
    pub verify: Vec<String>,
}

impl EcosystemConfig {
    /// Ruby gems installed by Bundler into `vendor/bundle`
    pub fn bundle() -> Self {
        Self {
            name: "bundle".to_string(),
            cache_type: None,
            detect: vec!["Gemfile".to_string()],
            lockfile: "Gemfile.lock".to_string(),
            target_dir: "vendor/bundle".to_string(),
            marker: None,
            install: argv(&["bundle", "install", "--path", "vendor/bundle"]),
            verify: argv(&["bundle", "check"]),
        }
    }

    /// Node modules installed by npm
    pub fn npm() -> Self {
        Self {
            name: "npm".to_string(),
            cache_type: None,
            detect: vec!["package.json".to_string()],
            lockfile: "package-lock.json".to_string(),
            target_dir: "node_modules".to_string(),
            marker: None,
            install: argv(&["npm", "ci"]),
            verify: argv(&["npm", "ls", "--depth=0"]),
        }
    }

    /// Cache type used in object keys
    pub fn cache_type(&self) -> &str {
        self.cache_type.as_deref().unwrap_or(&self.name)
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
