//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, MeshConfig};
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
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/meshwright/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("meshwright/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("meshwright.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, everything else is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config.
pub fn config_from_table(table: toml::Table, origin: &Path) -> Result<MeshConfig, ConfigError> {
    let mut config: MeshConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    if let Some(raw) = config.infra.paths.output_dir.to_str() {
        config.infra.paths.output_dir = expand_path(raw);
    }
    config.bootstrap.fill_provider_defaults();

    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MeshConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit variable list.
pub fn apply_overrides_from(
    config: &mut MeshConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let applied = match key.as_str() {
            "MESHWRIGHT_PROTOCOL_HOST" => {
                config.infra.protocol.host = value;
                true
            }
            "MESHWRIGHT_PROTOCOL_PORT" => match value.parse() {
                Ok(port) => {
                    config.infra.protocol.port = port;
                    true
                }
                Err(_) => false,
            },
            "MESHWRIGHT_PROTOCOL_TIMEOUT_MS" => match value.parse() {
                Ok(ms) => {
                    config.infra.protocol.timeout_ms = ms;
                    true
                }
                Err(_) => false,
            },
            "MESHWRIGHT_LLM_BASE_URL" => {
                config.infra.llm.base_url = value;
                true
            }
            "MESHWRIGHT_LLM_API_KEY" => {
                config.infra.llm.api_key = Some(value);
                true
            }
            "MESHWRIGHT_LLM_MODEL" => {
                config.infra.llm.model = value;
                true
            }
            "MESHWRIGHT_OUTPUT_DIR" => {
                config.infra.paths.output_dir = expand_path(&value);
                true
            }
            "MESHWRIGHT_OTLP_ENDPOINT" => {
                config.infra.telemetry.otlp_endpoint = value;
                true
            }
            // RUST_LOG wins over our own knob when both are set
            "MESHWRIGHT_LOG_LEVEL" if !sources.env_overrides.iter().any(|k| k == "RUST_LOG") => {
                config.infra.telemetry.log_level = value;
                true
            }
            "RUST_LOG" => {
                config.infra.telemetry.log_level = value;
                true
            }
            other => apply_provider_override(config, other, value),
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
}

/// `MESHWRIGHT_PROVIDER_<SLUG>_URL` and `MESHWRIGHT_PROVIDER_<SLUG>_API_KEY`.
fn apply_provider_override(config: &mut MeshConfig, key: &str, value: String) -> bool {
    let Some(rest) = key.strip_prefix("MESHWRIGHT_PROVIDER_") else {
        return false;
    };

    let (slug, field) = if let Some(slug) = rest.strip_suffix("_API_KEY") {
        (slug, "api_key")
    } else if let Some(slug) = rest.strip_suffix("_URL") {
        (slug, "url")
    } else {
        return false;
    };

    let slug = slug.to_lowercase().replace('_', "-");
    let entry = config.bootstrap.providers.entry(slug).or_default();
    match field {
        "url" => entry.url = value,
        _ => entry.api_key = Some(value),
    }
    true
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> MeshConfig {
        let table = parse_table(toml, Path::new("test.toml")).unwrap();
        config_from_table(table, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[protocol]
port = 9999
"#,
        );
        assert_eq!(config.infra.protocol.port, 9999);
        assert_eq!(config.infra.protocol.host, "127.0.0.1");
        assert_eq!(config.infra.protocol.timeout_ms, 30_000);
        assert_eq!(config.bootstrap.providers.len(), 6);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[protocol]
host = "10.0.0.5"
port = 9000
timeout_ms = 10000

[llm]
base_url = "http://llm:8000/v1"
model = "local-planner"
temperature = 0.1

[paths]
output_dir = "/data/meshes"

[telemetry]
log_level = "debug"

[planner]
max_retries = 3

[tools]
sketchfab = true

[pipeline]
graceful_degradation = false
export_format = "fbx"

[providers.hunyuan-shape]
url = "http://gpu:8081"
poll_interval_ms = 500

[providers.tripo]
api_key = "tsk_abc"
"#,
        );

        assert_eq!(config.infra.protocol.host, "10.0.0.5");
        assert_eq!(config.infra.protocol.port, 9000);
        assert_eq!(config.infra.protocol.timeout_ms, 10_000);
        assert_eq!(config.infra.llm.model, "local-planner");
        assert!((config.infra.llm.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.infra.paths.output_dir, PathBuf::from("/data/meshes"));
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.bootstrap.planner.max_retries, 3);
        assert!(config.bootstrap.tools.polyhaven);
        assert!(config.bootstrap.tools.sketchfab);
        assert!(!config.bootstrap.pipeline.graceful_degradation);
        assert_eq!(config.bootstrap.pipeline.export_format, "fbx");
        assert_eq!(config.bootstrap.providers["hunyuan-shape"].url, "http://gpu:8081");
        assert_eq!(config.bootstrap.providers["hunyuan-shape"].poll_interval_ms, Some(500));
        assert_eq!(config.bootstrap.providers["tripo"].api_key.as_deref(), Some("tsk_abc"));
        assert_eq!(config.bootstrap.providers["tripo"].url, "https://api.tripo3d.ai/v2/openapi");
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base = parse_table(
            "[protocol]\nhost = \"a\"\nport = 1\n",
            Path::new("base.toml"),
        )
        .unwrap();
        let overlay = parse_table("[protocol]\nport = 2\n", Path::new("overlay.toml")).unwrap();

        merge_tables(&mut base, overlay);
        let config = config_from_table(base, Path::new("merged")).unwrap();

        assert_eq!(config.infra.protocol.host, "a");
        assert_eq!(config.infra.protocol.port, 2);
    }

    #[test]
    fn test_parse_error_reports_path() {
        let err = parse_table("[protocol\nport = ", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MeshConfig::default();
        let mut sources = ConfigSources::default();
        let vars = vec![
            ("MESHWRIGHT_PROTOCOL_PORT".to_string(), "7000".to_string()),
            ("MESHWRIGHT_PROTOCOL_HOST".to_string(), "blender.local".to_string()),
            ("MESHWRIGHT_LLM_MODEL".to_string(), "planner-x".to_string()),
            ("MESHWRIGHT_PROVIDER_HUNYUAN_SHAPE_URL".to_string(), "http://gpu:1".to_string()),
            ("MESHWRIGHT_PROVIDER_MESHY_API_KEY".to_string(), "msy_1".to_string()),
            ("MESHWRIGHT_PROTOCOL_TIMEOUT_MS".to_string(), "not-a-number".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];

        apply_overrides_from(&mut config, &mut sources, vars);

        assert_eq!(config.infra.protocol.port, 7000);
        assert_eq!(config.infra.protocol.host, "blender.local");
        assert_eq!(config.infra.llm.model, "planner-x");
        assert_eq!(config.bootstrap.providers["hunyuan-shape"].url, "http://gpu:1");
        assert_eq!(config.bootstrap.providers["meshy"].api_key.as_deref(), Some("msy_1"));
        assert_eq!(config.infra.protocol.timeout_ms, 30_000);
        assert_eq!(sources.env_overrides.len(), 5);
    }
}
