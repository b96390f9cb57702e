use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::tree::BoxController;

pub const MERGE_TYPE_ENV: &str = "MDMERGE_MERGE_TYPE";

/// Which engine merges structurally compatible inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeType {
    /// Insert every event by coordinate; tolerates any tree structure.
    #[default]
    Default,
    /// Same-position box merge for trees sharing a controller.
    Indexed,
}

impl MergeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Indexed => "indexed",
        }
    }
}

impl std::fmt::Display for MergeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "indexed" | "index" => Ok(Self::Indexed),
            other => Err(format!("unknown merge type '{other}' (expected default|indexed)")),
        }
    }
}

/// Replacements for the first input's splitting policy. Unset fields keep
/// the first input's value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxControllerSettings {
    /// One factor per dimension, or a single factor for all of them.
    pub split_into: Option<Vec<usize>>,
    pub split_threshold: Option<usize>,
    pub max_depth: Option<u32>,
}

impl BoxControllerSettings {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.split_into.is_none() && self.split_threshold.is_none() && self.max_depth.is_none()
    }

    /// `base` with the configured fields replaced.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvalidController`] for a factor list that does not fit
    /// `base`'s dimensionality.
    pub fn apply(&self, base: &BoxController) -> Result<BoxController, MergeError> {
        if self.is_empty() {
            return Ok(base.clone());
        }
        base.with_overrides(
            self.split_into.as_deref(),
            self.split_threshold,
            self.max_depth,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub merge_type: MergeType,
    #[serde(default)]
    pub box_controller: BoxControllerSettings,
    /// Traverse input trees on the rayon pool while collecting events.
    #[serde(default)]
    pub parallel_collect: bool,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            merge_type: MergeType::default(),
            box_controller: BoxControllerSettings::default(),
            parallel_collect: false,
            output_name: default_output_name(),
        }
    }
}

impl MergeConfig {
    #[must_use]
    pub fn with_merge_type(mut self, merge_type: MergeType) -> Self {
        self.merge_type = merge_type;
        self
    }

    /// Apply `MDMERGE_MERGE_TYPE` when it is set.
    ///
    /// # Errors
    ///
    /// Fails when the variable holds an unknown merge type.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_merge_type_override(std::env::var(MERGE_TYPE_ENV).ok().as_deref())
    }

    fn apply_merge_type_override(mut self, raw: Option<&str>) -> Result<Self> {
        if let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) {
            self.merge_type = raw
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {MERGE_TYPE_ENV}"))?;
        }
        Ok(self)
    }
}

fn default_output_name() -> String {
    "merged".to_string()
}

/// Read a merge configuration from TOML. A missing file yields the defaults.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn load_merge_config(path: &Path) -> Result<MergeConfig> {
    if !path.exists() {
        return Ok(MergeConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_merge_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// # Errors
///
/// Fails on malformed TOML or unknown values.
pub fn parse_merge_config(content: &str) -> Result<MergeConfig> {
    Ok(toml::from_str::<MergeConfig>(content)?)
}
