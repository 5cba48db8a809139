use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::{ConsensusOpt, Method};
use crate::taxonomy::{FillStyle, RankSchema, DEFAULT_RANKS};

/// 配置错误：在任何处理开始前即为致命错误
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("rank schema is empty")]
    EmptySchema,
    #[error("rank name at position {0} is empty")]
    EmptyRankName(usize),
    #[error("duplicate rank name '{0}'")]
    DuplicateRank(String),
    #[error("consensus threshold must be in (0, 100], got {0}")]
    Threshold(f64),
    #[error("unknown consensus method '{0}' (expected 'rank' or 'full')")]
    UnknownMethod(String),
    #[error("unknown unfillable policy '{0}' (expected 'drop' or 'pass-through')")]
    UnknownPolicy(String),
    #[error("fill separator must not be empty")]
    EmptySeparator,
    #[error("fill marker must be exactly one character not used by the separator, got '{0}'")]
    Marker(String),
    #[error("worker thread count must be at least 1")]
    Threads,
    #[error("invalid config file: {0}")]
    Parse(String),
}

/// What to do with a lineage that has no label at the coarsest rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnfillablePolicy {
    /// Remove the record before disambiguation.
    #[default]
    Drop,
    /// Keep the record; its leading ranks stay missing.
    PassThrough,
}

impl FromStr for UnfillablePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "pass-through" | "passthrough" | "pass_through" => Ok(Self::PassThrough),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for UnfillablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => f.write_str("drop"),
            Self::PassThrough => f.write_str("pass-through"),
        }
    }
}

/// 配置文件的原始形态（TOML），未经校验。
///
/// 所有字段都有默认值，CLI 参数在 [`Settings::validate`] 之前覆盖对应字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub ranks: Vec<String>,
    pub threshold: f64,
    pub method: String,
    pub exclude_filled: bool,
    pub separator: String,
    pub marker: String,
    pub unfillable: String,
    pub threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ranks: DEFAULT_RANKS.iter().map(|r| r.to_string()).collect(),
            threshold: 80.0,
            method: "rank".to_string(),
            exclude_filled: false,
            separator: "_".to_string(),
            marker: "X".to_string(),
            unfillable: "drop".to_string(),
            threads: 1,
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("cannot parse config file '{}'", path.display()))
    }

    pub fn validate(&self) -> Result<EngineConfig, ConfigError> {
        let schema = RankSchema::new(self.ranks.iter().cloned())?;

        let mut marker_chars = self.marker.chars();
        let marker = match (marker_chars.next(), marker_chars.next()) {
            (Some(c), None) => c,
            _ => return Err(ConfigError::Marker(self.marker.clone())),
        };
        let style = FillStyle::new(self.separator.clone(), marker)?;

        if !(self.threshold > 0.0 && self.threshold <= 100.0) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        let method: Method = self.method.parse()?;
        let unfillable: UnfillablePolicy = self.unfillable.parse()?;
        if self.threads == 0 {
            return Err(ConfigError::Threads);
        }

        Ok(EngineConfig {
            schema,
            style,
            consensus: ConsensusOpt {
                threshold: self.threshold,
                method,
                exclude_filled: self.exclude_filled,
            },
            unfillable,
            threads: self.threads,
        })
    }
}

/// 校验后的引擎配置，整个运行期间只读
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub schema: RankSchema,
    pub style: FillStyle,
    pub consensus: ConsensusOpt,
    pub unfillable: UnfillablePolicy,
    pub threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema: RankSchema::default(),
            style: FillStyle::default(),
            consensus: ConsensusOpt::default(),
            unfillable: UnfillablePolicy::default(),
            threads: 1,
        }
    }
}
