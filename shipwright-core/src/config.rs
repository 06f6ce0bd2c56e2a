//! Project configuration loaded from `.shipwright.json`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipwrightError};
use crate::fs::FileSystem;

/// File name of the per-project configuration file.
pub const CONFIG_FILE: &str = ".shipwright.json";

/// Environment variable consulted for the namespace when no config file sets one.
pub const NAMESPACE_ENV: &str = "SW_NAMESPACE";

const MISSING_NAMESPACE: &str = "Please specify your docker hub account in\n\
    the .shipwright.json config file,\n \
    the command line or set SW_NAMESPACE.\n\
    Run shipwright --help for more information.";

/// Raw contents of `.shipwright.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Docker Hub account or registry namespace images are published under.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Explicit repository names keyed by Dockerfile directory relative to the project.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    /// Whether TLS connections to the daemon verify the hostname.
    #[serde(default)]
    pub assert_hostname: Option<bool>,
}

/// Resolved project configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipwrightConfig {
    /// Namespace for images whose name is derived from their directory.
    pub namespace: String,
    /// Explicit repository names keyed by relative Dockerfile directory.
    pub names: BTreeMap<String, String>,
    /// Whether TLS connections to the daemon verify the hostname.
    pub assert_hostname: bool,
}

/// Command-line and environment overrides applied on top of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Namespace passed via `--account` (or `SW_NAMESPACE`).
    pub account: Option<String>,
    /// Set when hostname assertion was disabled on the command line.
    pub disable_assert_hostname: bool,
}

impl ShipwrightConfig {
    /// Load the configuration for the project rooted at `root`.
    pub fn load<F: FileSystem>(fs: &F, root: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let file = if fs.is_file(&path) {
            let contents = fs.read_to_string(&path)?;
            serde_json::from_str::<ConfigFile>(&contents).map_err(|err| {
                ShipwrightError::Config(format!("invalid {}: {err}", path.display()))
            })?
        } else {
            log::debug!("no {CONFIG_FILE} found in {}", root.display());
            ConfigFile::default()
        };
        Self::resolve(file, overrides)
    }

    /// Merge a parsed config file with overrides.
    pub fn resolve(file: ConfigFile, overrides: &ConfigOverrides) -> Result<Self> {
        let namespace = non_empty(file.namespace)
            .or_else(|| non_empty(overrides.account.clone()))
            .ok_or_else(|| ShipwrightError::Config(MISSING_NAMESPACE.to_string()))?;

        let mut assert_hostname = file.assert_hostname.unwrap_or(true);
        if overrides.disable_assert_hostname {
            assert_hostname = false;
        }

        Ok(Self {
            namespace,
            names: file.names,
            assert_hostname,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
