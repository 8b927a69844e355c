//! Bridge configuration.
//!
//! Configuration is a small JSON document. Every field has a default, so an
//! empty object (or no file at all) yields a working setup.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "SYNTHBRIDGE_CONFIG";

/// Environment variable listing bank root directories.
pub const BANK_PATH_ENV: &str = "SYNTHBRIDGE_BANK_PATH";

/// Default number of simultaneous voices per part synthesizer.
pub const DEFAULT_MAX_POLYPHONY: usize = 64;

/// User-facing configuration for all plugin instances of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directories whose subdirectories are instrument banks.
    pub bank_roots: Vec<PathBuf>,

    /// Maximum voices per part synthesizer.
    pub max_polyphony: usize,

    /// Whether the synthesizer's reverb and chorus are enabled.
    pub enable_reverb_and_chorus: bool,

    /// Fixed seed for the denormal-noise generator.
    /// None means the seed is taken from the wall clock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bank_roots: default_bank_roots(),
            max_polyphony: DEFAULT_MAX_POLYPHONY,
            enable_reverb_and_chorus: true,
            rng_seed: None,
        }
    }
}

impl BridgeConfig {
    /// Loads the configuration named by `SYNTHBRIDGE_CONFIG`, or the defaults
    /// when the variable is unset.
    ///
    /// # Errors
    ///
    /// Returns error if the named file cannot be read or parsed
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_json_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Arguments
    ///
    /// * `json` - JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a configuration from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid JSON
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| BridgeError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns a copy with the given bank roots.
    pub fn with_bank_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.bank_roots = roots;
        self
    }

    /// Returns a copy with a fixed noise seed.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

/// Bank roots from `SYNTHBRIDGE_BANK_PATH`, falling back to the usual
/// per-user and system locations.
fn default_bank_roots() -> Vec<PathBuf> {
    if let Some(paths) = std::env::var_os(BANK_PATH_ENV) {
        return std::env::split_paths(&paths).collect();
    }

    let mut roots = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        roots.push(PathBuf::from(home).join("banks"));
    }
    roots.push(PathBuf::from("/usr/share/synthbridge/banks"));
    roots.push(PathBuf::from("/usr/local/share/synthbridge/banks"));
    roots
}
