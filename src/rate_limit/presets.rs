//! Named policies for common call sites.
//!
//! The values are defaults, tunable through the `rate_limiting.presets`
//! configuration section.

use super::types::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Preset policy names
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    /// Expensive or abuse-prone operations
    Strict,
    /// General API traffic
    Normal,
    /// Cheap reads
    Relaxed,
    /// Login and credential endpoints
    Auth,
}

impl PolicyPreset {
    pub const ALL: [PolicyPreset; 4] = [
        PolicyPreset::Strict,
        PolicyPreset::Normal,
        PolicyPreset::Relaxed,
        PolicyPreset::Auth,
    ];

    /// Name, also used as the key namespace
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyPreset::Strict => "strict",
            PolicyPreset::Normal => "normal",
            PolicyPreset::Relaxed => "relaxed",
            PolicyPreset::Auth => "auth",
        }
    }

    /// Built-in `(window_millis, max_operations)` pair
    pub fn defaults(&self) -> PresetLimits {
        let (window_millis, max_operations) = match self {
            PolicyPreset::Strict => (60_000, 10),
            PolicyPreset::Normal => (60_000, 60),
            PolicyPreset::Relaxed => (60_000, 300),
            PolicyPreset::Auth => (60_000, 5),
        };
        PresetLimits {
            window_millis,
            max_operations,
        }
    }

    /// Policy with the built-in values
    pub fn policy(&self) -> RateLimitPolicy {
        self.defaults().to_policy(self.as_str())
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PolicyPreset::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

/// Window and limit of a preset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresetLimits {
    pub window_millis: u64,
    pub max_operations: u32,
}

impl PresetLimits {
    pub fn to_policy(self, namespace: &str) -> RateLimitPolicy {
        RateLimitPolicy::new(self.window_millis, self.max_operations, namespace)
    }
}

/// Preset values with configured overrides applied
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresetTable {
    #[serde(default)]
    pub strict: Option<PresetLimits>,
    #[serde(default)]
    pub normal: Option<PresetLimits>,
    #[serde(default)]
    pub relaxed: Option<PresetLimits>,
    #[serde(default)]
    pub auth: Option<PresetLimits>,
}

impl PresetTable {
    /// Effective limits for a preset
    pub fn limits(&self, preset: PolicyPreset) -> PresetLimits {
        let overridden = match preset {
            PolicyPreset::Strict => self.strict,
            PolicyPreset::Normal => self.normal,
            PolicyPreset::Relaxed => self.relaxed,
            PolicyPreset::Auth => self.auth,
        };
        overridden.unwrap_or_else(|| preset.defaults())
    }

    /// Effective policy for a preset, namespaced by its name
    pub fn policy(&self, preset: PolicyPreset) -> RateLimitPolicy {
        self.limits(preset).to_policy(preset.as_str())
    }
}
