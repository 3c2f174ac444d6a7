//! Settings for a Warden session.
//!
//! Two TOML files are read: the user's `~/.warden/config.toml` and an
//! optional `.warden.toml` in the workspace root. Keys in the workspace file
//! override the user's. Both use the same layout:
//!
//! ```toml
//! [rust-client]
//! rustupPath = "${HOME}/.cargo/bin/rustup"
//! channel = "nightly"
//! logToFile = true
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use warden_lsp::SessionSettings;

const CONFIG_DIR: &str = ".warden";
const CONFIG_FILE: &str = "config.toml";
const PROJECT_FILE: &str = ".warden.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WardenConfig {
    #[serde(rename = "rust-client")]
    pub rust_client: Option<RustClientConfig>,
    /// Deprecated location of the server path.
    pub rls: Option<RlsSection>,
}

/// The `[rust-client]` table. Absent keys fall back to [`SessionSettings`]
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RustClientConfig {
    pub rustup_path: Option<String>,
    pub channel: Option<String>,
    pub rls_path: Option<String>,
    pub disable_rustup: Option<bool>,
    pub use_wsl: Option<bool>,
    pub log_to_file: Option<bool>,
    pub set_lib_path: Option<bool>,
    pub update_on_startup: Option<bool>,
    pub ask_install_rls: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RlsSection {
    pub path: Option<String>,
}

impl RustClientConfig {
    fn overridden_by(self, other: Self) -> Self {
        Self {
            rustup_path: other.rustup_path.or(self.rustup_path),
            channel: other.channel.or(self.channel),
            rls_path: other.rls_path.or(self.rls_path),
            disable_rustup: other.disable_rustup.or(self.disable_rustup),
            use_wsl: other.use_wsl.or(self.use_wsl),
            log_to_file: other.log_to_file.or(self.log_to_file),
            set_lib_path: other.set_lib_path.or(self.set_lib_path),
            update_on_startup: other.update_on_startup.or(self.update_on_startup),
            ask_install_rls: other.ask_install_rls.or(self.ask_install_rls),
        }
    }
}

impl WardenConfig {
    /// Load the user config, then apply overrides from `<root>/.warden.toml`.
    ///
    /// Missing files are not an error; unreadable or malformed ones are.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let global = match config_path() {
            Some(path) => Self::load_from(&path)?.unwrap_or_default(),
            None => Self::default(),
        };
        let project = Self::load_from(&root.join(PROJECT_FILE))?.unwrap_or_default();
        Ok(global.overridden_by(project))
    }

    /// Parse a single file. `Ok(None)` when it does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "Failed to read config");
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "Failed to parse config");
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn overridden_by(self, other: Self) -> Self {
        let rust_client = match (self.rust_client, other.rust_client) {
            (Some(base), Some(over)) => Some(base.overridden_by(over)),
            (base, over) => over.or(base),
        };
        let rls = match (self.rls, other.rls) {
            (Some(base), Some(over)) => Some(RlsSection {
                path: over.path.or(base.path),
            }),
            (base, over) => over.or(base),
        };
        Self { rust_client, rls }
    }

    /// Settings for a session rooted at `root`.
    #[must_use]
    pub fn to_session_settings(&self, root: impl Into<PathBuf>) -> SessionSettings {
        let mut settings = SessionSettings::new(root);
        let client = self.rust_client.clone().unwrap_or_default();

        if let Some(path) = client.rustup_path {
            settings.manager_path = expand_env_vars(&path);
        }
        settings.channel = client.channel.filter(|c| !c.trim().is_empty());
        settings.server_path = client
            .rls_path
            .or_else(|| self.deprecated_server_path())
            .map(|p| expand_env_vars(&p))
            .filter(|p| !p.is_empty());
        settings.disable_manager =
            client.disable_rustup.unwrap_or(false) || settings.server_path.is_some();
        settings.use_wsl = client.use_wsl.unwrap_or(false);
        settings.log_to_file = client.log_to_file.unwrap_or(false);
        settings.set_lib_path = client.set_lib_path.unwrap_or(true);
        settings.update_on_startup = client.update_on_startup.unwrap_or(true);
        settings.ask_install = client.ask_install_rls.unwrap_or(true);
        settings
    }

    fn deprecated_server_path(&self) -> Option<String> {
        let path = self.rls.as_ref()?.path.clone()?;
        tracing::warn!(
            %path,
            "`[rls] path` is deprecated, use `rlsPath` under `[rust-client]` instead"
        );
        Some(path)
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Replace `${VAR}` with the variable's value. Unset variables expand to
/// nothing; an unterminated `${` is kept as written.
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
        rest = &rest[start + 3 + len..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> WardenConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn empty_config_gives_defaults() {
        let settings = WardenConfig::default().to_session_settings("/work");
        assert_eq!(settings, SessionSettings::new("/work"));
    }

    #[test]
    fn camel_case_keys_map_onto_settings() {
        let config = parse(
            r#"
            [rust-client]
            rustupPath = "/opt/rustup"
            channel = "nightly-2018-04-01"
            useWsl = true
            logToFile = true
            setLibPath = false
            updateOnStartup = false
            askInstallRls = false
            "#,
        );
        let settings = config.to_session_settings("/work");

        assert_eq!(settings.manager_path, "/opt/rustup");
        assert_eq!(settings.channel.as_deref(), Some("nightly-2018-04-01"));
        assert!(settings.use_wsl);
        assert!(settings.log_to_file);
        assert!(!settings.set_lib_path);
        assert!(!settings.update_on_startup);
        assert!(!settings.ask_install);
        assert!(settings.manager_enabled());
    }

    #[test]
    fn rls_path_disables_manager() {
        let config = parse("[rust-client]\nrlsPath = \"/opt/bin/rls\"\n");
        let settings = config.to_session_settings("/work");
        assert_eq!(settings.server_path.as_deref(), Some("/opt/bin/rls"));
        assert!(settings.disable_manager);
    }

    #[test]
    fn deprecated_rls_path_used_only_as_fallback() {
        let old = parse("[rls]\npath = \"/old/rls\"\n");
        assert_eq!(
            old.to_session_settings("/work").server_path.as_deref(),
            Some("/old/rls")
        );

        let both = parse("[rls]\npath = \"/old/rls\"\n[rust-client]\nrlsPath = \"/new/rls\"\n");
        assert_eq!(
            both.to_session_settings("/work").server_path.as_deref(),
            Some("/new/rls")
        );
    }

    #[test]
    fn blank_channel_means_detect() {
        let config = parse("[rust-client]\nchannel = \"  \"\n");
        assert_eq!(config.to_session_settings("/work").channel, None);
    }

    #[test]
    fn project_file_overrides_individual_keys() {
        let global = parse(
            "[rust-client]\nchannel = \"stable\"\nlogToFile = true\n[rls]\npath = \"/old/rls\"\n",
        );
        let project = parse("[rust-client]\nchannel = \"nightly\"\n");
        let merged = global.overridden_by(project);
        let client = merged.rust_client.as_ref().unwrap();

        assert_eq!(client.channel.as_deref(), Some("nightly"));
        assert_eq!(client.log_to_file, Some(true));
        assert_eq!(merged.rls.unwrap().path.as_deref(), Some("/old/rls"));
    }

    #[test]
    fn load_from_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(WardenConfig::load_from(&dir.path().join("nope.toml")).unwrap(), None);
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        std::fs::write(&path, "[rust-client\n").unwrap();

        let err = WardenConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn load_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            "[rust-client]\nupdateOnStartup = false\n",
        )
        .unwrap();

        let config = WardenConfig::load(dir.path()).unwrap();
        assert_eq!(
            config.rust_client.and_then(|c| c.update_on_startup),
            Some(false)
        );
    }

    #[test]
    fn paths_expand_env_vars() {
        unsafe {
            std::env::set_var("WARDEN_TEST_TOOLS", "/tools");
        }
        let config = parse(
            "[rust-client]\nrustupPath = \"${WARDEN_TEST_TOOLS}/rustup\"\nrlsPath = \"${WARDEN_TEST_TOOLS}/rls\"\n",
        );
        let settings = config.to_session_settings("/work");
        assert_eq!(settings.manager_path, "/tools/rustup");
        assert_eq!(settings.server_path.as_deref(), Some("/tools/rls"));
        unsafe {
            std::env::remove_var("WARDEN_TEST_TOOLS");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            std::env::remove_var("WARDEN_MISSING_VAR");
        }
        assert_eq!(expand_env_vars("a ${WARDEN_MISSING_VAR} b"), "a  b");
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("x ${UNCLOSED"), "x ${UNCLOSED");
        assert_eq!(expand_env_vars("${} y"), " y");
        assert_eq!(expand_env_vars("plain"), "plain");
    }
}
