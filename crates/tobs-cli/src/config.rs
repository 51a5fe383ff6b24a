//! tobs CLI configuration stored at `~/.tobs/`.
//!
//! - `~/.tobs/config.json`: default release, namespace and port-forward ports
//! - `~/.tobs/kubeconfig`: optional kubeconfig dedicated to tobs
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `TOBS_KUBECONFIG` environment variable
//! 3. `~/.tobs/kubeconfig`
//! 4. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config`)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".tobs";
const CONFIG_FILE_NAME: &str = "config.json";
const KUBECONFIG_FILE_NAME: &str = "kubeconfig";
const TOBS_KUBECONFIG_ENV: &str = "TOBS_KUBECONFIG";

/// Persistent CLI configuration. Flags and environment override every field.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct TobsConfig {
    /// Helm release name.
    pub release: Option<String>,
    /// Namespace the release is installed in.
    pub namespace: Option<String>,
    /// Local ports used by `tobs port-forward`.
    pub port_forward: PortForwardConfig,
}

/// Local listen ports per forwarded component; `0` picks a free port.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PortForwardConfig {
    pub timescaledb: Option<u16>,
    pub grafana: Option<u16>,
    pub prometheus: Option<u16>,
    pub promscale: Option<u16>,
    pub promlens: Option<u16>,
}

/// Returns `~/.tobs/`, creating it if it doesn't exist.
pub fn tobs_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::command_failed("could not determine home directory"))?;
    let dir = home.join(CONFIG_DIR_NAME);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::command_failed(format!("failed to create {}: {}", dir.display(), e))
        })?;
    }
    Ok(dir)
}

/// Path to `~/.tobs/config.json`.
pub fn config_path() -> Result<PathBuf> {
    Ok(tobs_dir()?.join(CONFIG_FILE_NAME))
}

/// Path to `~/.tobs/kubeconfig`.
pub fn kubeconfig_path() -> Result<PathBuf> {
    Ok(tobs_dir()?.join(KUBECONFIG_FILE_NAME))
}

/// Load config from `~/.tobs/config.json`, returning default if missing.
pub fn load_config() -> Result<TobsConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(TobsConfig::default());
    }
    let data = std::fs::read_to_string(&path)
        .map_err(|e| Error::command_failed(format!("failed to read {}: {}", path.display(), e)))?;
    parse_config(&data)
        .map_err(|e| Error::command_failed(format!("failed to parse {}: {}", path.display(), e)))
}

fn parse_config(data: &str) -> std::result::Result<TobsConfig, serde_json::Error> {
    serde_json::from_str(data)
}

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `Some(path)` if a kubeconfig is found, `None` to use kube defaults.
pub fn resolve_kubeconfig(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        return Some(path.to_string());
    }

    if let Ok(path) = std::env::var(TOBS_KUBECONFIG_ENV) {
        if !path.is_empty() {
            return Some(path);
        }
    }

    if let Ok(path) = kubeconfig_path() {
        if path.exists() {
            return Some(path.to_string_lossy().into_owned());
        }
    }

    None
}
