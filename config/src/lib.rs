//! Configuration for the Konveyor analyzer client.
//!
//! Loaded from `~/.konveyor/config.toml`. Every key is optional; a missing file
//! yields [`KonveyorConfig::default`]. String values may reference environment
//! variables as `${VAR}`; path values may also start with `~/`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use konveyor_types::{AnalysisProfile, ProviderRegistration};

const DEFAULT_CONNECT_INTERVAL_MS: u64 = 2_000;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 150;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct KonveyorConfig {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Id of the profile analysis runs under.
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<AnalysisProfile>,
    /// Language providers handed to the analyzer through `-provider-config`.
    #[serde(default)]
    pub providers: Vec<ProviderRegistration>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzerConfig {
    /// Root holding `{platform}-{arch}/kai-analyzer-rpc`.
    pub asset_dir: Option<String>,
    /// Explicit analyzer binary; skips platform resolution.
    pub binary_path: Option<String>,
    /// Default ruleset directory shipped with the assets.
    pub rulesets_dir: Option<String>,
    /// Directory of provider `.jar` bundles.
    pub bundle_dir: Option<String>,
    /// Where the analyzer log and provider config file are written.
    pub data_dir: Option<String>,
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,
    /// Log every RPC frame at TRACE level.
    #[serde(default)]
    pub trace_rpc: bool,
    #[serde(default = "default_connect_interval_ms")]
    pub connect_interval_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

fn default_excluded_paths() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        "target".to_string(),
        ".git".to_string(),
        ".vscode".to_string(),
    ]
}

const fn default_connect_interval_ms() -> u64 {
    DEFAULT_CONNECT_INTERVAL_MS
}

const fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            asset_dir: None,
            binary_path: None,
            rulesets_dir: None,
            bundle_dir: None,
            data_dir: None,
            excluded_paths: default_excluded_paths(),
            trace_rpc: false,
            connect_interval_ms: DEFAULT_CONNECT_INTERVAL_MS,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

impl AnalyzerConfig {
    #[must_use]
    pub fn asset_dir(&self) -> PathBuf {
        resolve_dir(self.asset_dir.as_deref(), "assets")
    }

    #[must_use]
    pub fn binary_path(&self) -> Option<PathBuf> {
        self.binary_path.as_deref().map(expand_path)
    }

    #[must_use]
    pub fn rulesets_dir(&self) -> PathBuf {
        match self.rulesets_dir.as_deref() {
            Some(dir) => expand_path(dir),
            None => self.asset_dir().join("rulesets"),
        }
    }

    #[must_use]
    pub fn bundle_dir(&self) -> PathBuf {
        match self.bundle_dir.as_deref() {
            Some(dir) => expand_path(dir),
            None => self.asset_dir().join("jdtls-bundles"),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        resolve_dir(self.data_dir.as_deref(), "data")
    }

    #[must_use]
    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }
}

fn resolve_dir(configured: Option<&str>, leaf: &str) -> PathBuf {
    match configured {
        Some(dir) => expand_path(dir),
        None => konveyor_home()
            .unwrap_or_else(|| PathBuf::from(".konveyor"))
            .join(leaf),
    }
}

/// Expand a leading `~/` to the home directory.
#[must_use]
pub fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Replace `${VAR}` with the variable's value. Unset variables become empty;
/// an unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + len];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Apply [`expand_env_vars`] to every string in a parsed document.
fn expand_string_values(value: &mut toml::Value) {
    match value {
        toml::Value::String(text) => *text = expand_env_vars(text),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_string_values),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_string_values(v)),
        _ => {}
    }
}

impl KonveyorConfig {
    /// Load from the default location. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to read config: {source}");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let parse_error = |source: toml::de::Error| {
            tracing::warn!(path = %path.display(), "Failed to parse config: {source}");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        };
        let mut value: toml::Value = toml::from_str(&content).map_err(parse_error)?;
        expand_string_values(&mut value);
        value.try_into().map_err(parse_error)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// The profile named by `active_profile`, or the first profile when none is named.
    #[must_use]
    pub fn active_profile(&self) -> Option<&AnalysisProfile> {
        match self.active_profile.as_deref() {
            Some(id) => self.profiles.iter().find(|p| p.id == id),
            None => self.profiles.first(),
        }
    }
}

#[must_use]
pub fn konveyor_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".konveyor"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    konveyor_home().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            env::set_var("KONVEYOR_TEST_VAR", "replaced");
        }
        assert_eq!(
            expand_env_vars("prefix ${KONVEYOR_TEST_VAR} suffix"),
            "prefix replaced suffix"
        );
        unsafe {
            env::remove_var("KONVEYOR_TEST_VAR");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            env::remove_var("KONVEYOR_MISSING_VAR");
        }
        assert_eq!(
            expand_env_vars("before ${KONVEYOR_MISSING_VAR} after"),
            "before  after"
        );
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
    }

    #[test]
    fn expand_env_vars_empty_name_dropped() {
        assert_eq!(expand_env_vars("a${}b"), "ab");
    }

    #[test]
    fn defaults_without_file_content() {
        let config: KonveyorConfig = toml::from_str("").unwrap();
        assert_eq!(config.analyzer.connect_attempts, 150);
        assert_eq!(config.analyzer.connect_interval(), Duration::from_secs(2));
        assert!(config.analyzer.excluded_paths.contains(&"node_modules".to_string()));
        assert!(config.active_profile().is_none());
    }

    #[test]
    fn parses_profiles_and_providers() {
        let config: KonveyorConfig = toml::from_str(
            r#"
            active_profile = "quarkus"

            [analyzer]
            asset_dir = "/opt/konveyor"
            trace_rpc = true

            [[profiles]]
            id = "default"
            name = "Default"
            label_selector = "(konveyor.io/target=eap8)"

            [[profiles]]
            id = "quarkus"
            name = "Quarkus"
            label_selector = "(konveyor.io/target=quarkus)"
            use_default_rules = false
            custom_rules = ["/rules/custom"]

            [[providers]]
            name = "java"
            provider_config = { address = "127.0.0.1:14651", bundles = ["a.jar"] }
            "#,
        )
        .unwrap();

        let active = config.active_profile().unwrap();
        assert_eq!(active.name, "Quarkus");
        assert_eq!(active.custom_rules, vec!["/rules/custom"]);
        assert!(config.analyzer.trace_rpc);
        assert_eq!(config.analyzer.asset_dir(), PathBuf::from("/opt/konveyor"));
        assert_eq!(
            config.analyzer.rulesets_dir(),
            PathBuf::from("/opt/konveyor").join("rulesets")
        );
        assert_eq!(config.providers[0].provider_config["bundles"][0], "a.jar");
    }

    #[test]
    fn unknown_active_profile_is_none() {
        let config: KonveyorConfig = toml::from_str(
            r#"
            active_profile = "missing"
            [[profiles]]
            id = "default"
            name = "Default"
            "#,
        )
        .unwrap();
        assert!(config.active_profile().is_none());
    }

    #[test]
    fn load_from_reports_parse_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analyzer\n").unwrap();
        let err = KonveyorConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = KonveyorConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_from_expands_env_vars_in_values() {
        unsafe {
            env::set_var("KONVEYOR_TEST_TARGET", "quarkus");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[profiles]]\nid = \"default\"\nname = \"Default\"\nlabel_selector = \"konveyor.io/target=${KONVEYOR_TEST_TARGET}\"\n",
        )
        .unwrap();

        let config = KonveyorConfig::load_from(&path).unwrap();
        assert_eq!(
            config.active_profile().unwrap().label_selector,
            "konveyor.io/target=quarkus"
        );
        unsafe {
            env::remove_var("KONVEYOR_TEST_TARGET");
        }
    }

    #[test]
    fn load_from_keeps_env_values_verbatim() {
        unsafe {
            env::set_var("KONVEYOR_TEST_DATA_DIR", r"C:\Users\me\data");
            env::set_var("KONVEYOR_TEST_SELECTOR", "target=\"eap\"\n${HOME}");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            concat!(
                "# data lives in ${KONVEYOR_TEST_DATA_DIR}\n",
                "[analyzer]\n",
                "data_dir = \"${KONVEYOR_TEST_DATA_DIR}\"\n",
                "[[profiles]]\n",
                "id = \"default\"\n",
                "name = \"Default\"\n",
                "label_selector = \"${KONVEYOR_TEST_SELECTOR}\"\n",
            ),
        )
        .unwrap();

        let config = KonveyorConfig::load_from(&path).unwrap();
        assert_eq!(config.analyzer.data_dir(), PathBuf::from(r"C:\Users\me\data"));
        assert_eq!(
            config.active_profile().unwrap().label_selector,
            "target=\"eap\"\n${HOME}"
        );
        unsafe {
            env::remove_var("KONVEYOR_TEST_DATA_DIR");
            env::remove_var("KONVEYOR_TEST_SELECTOR");
        }
    }
}
