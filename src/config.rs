//! Configuration file loading.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::monitor;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub binding: Binding,
    /// Upstream resolvers; exactly one entry must have no targets.
    pub external_dns: Vec<UpstreamConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub use_heuristics: bool,
    /// Answer AAAA queries (otherwise they are refused).
    #[serde(default)]
    pub ipv6: bool,
    /// Monitor categories to print; everything when absent.
    #[serde(default)]
    pub monitoring: Option<Vec<String>>,
    #[serde(default = "default_dump_path")]
    pub dump_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Binding {
    #[serde(default = "default_bind_address")]
    pub address: String,
    #[serde(default = "default_bind_port")]
    pub port: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    /// IP address, optionally with a port (53 otherwise).
    pub address: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_limit")]
    pub limit: usize,
    /// Ceiling, in seconds, for upstream record TTLs; also replaces zero TTLs.
    #[serde(default = "default_cache_ttl")]
    pub ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            limit: default_cache_limit(),
            ttl: default_cache_ttl(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u32 {
    53
}

fn default_cache_limit() -> usize {
    5000
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_dump_path() -> String {
    "waylay-cache.txt".to_string()
}

impl Config {
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Monitoring mask from the configured category names.
    pub fn monitor_mask(&self) -> u32 {
        match &self.monitoring {
            None => monitor::SHOW_ALL,
            Some(names) => names
                .iter()
                .filter_map(|name| monitor::category_from_name(name))
                .fold(0, |mask, bit| mask | bit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: Config = serde_json::from_str(
            r#"{
                "binding": { "address": "127.0.0.2", "port": 5300 },
                "external_dns": [
                    { "name": "cloudflare", "address": "1.1.1.1" },
                    { "name": "corp", "address": "10.0.0.1:5353", "targets": ["corp.example"] }
                ],
                "cache": { "limit": 1000, "ttl": 300 },
                "blacklist": ["rules/ads.txt"],
                "whitelist": ["rules/ok.txt"],
                "use_heuristics": true,
                "ipv6": true,
                "monitoring": ["denied", "failure"],
                "dump_path": "/tmp/waylay.dump"
            }"#,
        )
        .unwrap();

        assert_eq!(config.binding.port, 5300);
        assert_eq!(config.external_dns.len(), 2);
        assert_eq!(config.external_dns[1].targets, vec!["corp.example"]);
        assert_eq!(config.cache.limit, 1000);
        assert!(config.use_heuristics);
        assert!(config.ipv6);
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "binding": {},
                "external_dns": [{ "name": "default", "address": "9.9.9.9" }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.binding.address, "127.0.0.1");
        assert_eq!(config.binding.port, 53);
        assert_eq!(config.cache.limit, 5000);
        assert_eq!(config.cache.ttl, 600);
        assert!(config.blacklist.is_empty());
        assert!(!config.use_heuristics);
        assert!(!config.ipv6);
    }

    #[test]
    fn monitor_mask_defaults_to_everything() {
        let config: Config = serde_json::from_str(
            r#"{
                "binding": {},
                "external_dns": [{ "name": "default", "address": "9.9.9.9" }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.monitor_mask(), monitor::SHOW_ALL);
    }

    #[test]
    fn monitor_mask_folds_selected_categories() {
        let config: Config = serde_json::from_str(
            r#"{
                "binding": {},
                "external_dns": [{ "name": "default", "address": "9.9.9.9" }],
                "monitoring": ["denied", "nxdomain", "bogus"]
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.monitor_mask(),
            monitor::SHOW_DENIED | monitor::SHOW_NXDOMAIN
        );
    }
}
