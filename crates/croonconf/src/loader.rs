//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, CroonConfig, IdentityConfig, NodeDescriptor, TelemetryConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/crooner/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("crooner/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("crooner.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<CroonConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<CroonConfig, ConfigError> {
    // Parse as raw TOML table first so a file can set just the keys it cares about
    let table: toml::Table =
        contents
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

    let mut config = CroonConfig::default();

    if let Some(identity) = table.get("identity").and_then(|v| v.as_table()) {
        if let Some(v) = identity.get("user_id").and_then(|v| v.as_integer()) {
            config.identity.user_id = v as u64;
        }
        if let Some(v) = identity.get("shard_count").and_then(|v| v.as_integer()) {
            config.identity.shard_count = v as u32;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    if let Some(nodes) = table.get("nodes").and_then(|v| v.as_array()) {
        for node in nodes {
            let node: NodeDescriptor = node
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            config.nodes.push(node);
        }
    }

    Ok(config)
}

/// Merge two configs, with `overlay` taking precedence.
///
/// Scalar fields win when they differ from the compiled default; a non-empty
/// node list in the overlay replaces the base list wholesale.
pub fn merge_configs(base: CroonConfig, overlay: CroonConfig) -> CroonConfig {
    CroonConfig {
        identity: IdentityConfig {
            user_id: if overlay.identity.user_id != IdentityConfig::default().user_id {
                overlay.identity.user_id
            } else {
                base.identity.user_id
            },
            shard_count: if overlay.identity.shard_count != IdentityConfig::default().shard_count {
                overlay.identity.shard_count
            } else {
                base.identity.shard_count
            },
        },
        telemetry: TelemetryConfig {
            log_level: if overlay.telemetry.log_level != TelemetryConfig::default().log_level {
                overlay.telemetry.log_level
            } else {
                base.telemetry.log_level
            },
        },
        nodes: if overlay.nodes.is_empty() {
            base.nodes
        } else {
            overlay.nodes
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CroonConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("CROONER_USER_ID") {
        if let Ok(id) = v.parse() {
            config.identity.user_id = id;
            sources.env_overrides.push("CROONER_USER_ID".to_string());
        }
    }
    if let Ok(v) = env::var("CROONER_SHARD_COUNT") {
        if let Ok(count) = v.parse() {
            config.identity.shard_count = count;
            sources.env_overrides.push("CROONER_SHARD_COUNT".to_string());
        }
    }
    if let Ok(v) = env::var("CROONER_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("CROONER_LOG_LEVEL".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[identity]
user_id = 506381097473310721
shard_count = 2

[telemetry]
log_level = "debug"

[[nodes]]
name = "nearby"
host = "127.0.0.1"
port = 2333
password = "youshallnotpass"

[[nodes]]
name = "faraway"
host = "10.0.0.7"
port = 2333
password = "youshallnotpass"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.identity.user_id, 506381097473310721);
        assert_eq!(config.identity.shard_count, 2);
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].name, "nearby");
        assert_eq!(config.nodes[1].host, "10.0.0.7");
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let toml = r#"
[telemetry]
log_level = "trace"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.identity.shard_count, 1);
        assert_eq!(config.telemetry.log_level, "trace");
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn test_parse_rejects_incomplete_node() {
        let toml = r#"
[[nodes]]
name = "nearby"
host = "127.0.0.1"
"#;
        assert!(parse_toml(toml, Path::new("test.toml")).is_err());
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = parse_toml(
            r#"
[identity]
user_id = 1

[[nodes]]
name = "a"
host = "127.0.0.1"
port = 2333
password = "x"
"#,
            Path::new("base.toml"),
        )
        .unwrap();
        let overlay = parse_toml(
            r#"
[identity]
user_id = 2
"#,
            Path::new("overlay.toml"),
        )
        .unwrap();

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.identity.user_id, 2);
        // Overlay had no nodes, base list survives
        assert_eq!(merged.nodes.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[identity]
user_id = 42
"#
        )
        .unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.identity.user_id, 42);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = load_from_file(Path::new("/nonexistent/crooner.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
