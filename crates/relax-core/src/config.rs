//! Layout configuration.

use serde::Deserialize;

/// Configuration for the layout engine and dispatch selection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Upper bound on layout passes before reporting divergence
    pub(crate) max_passes: u32,
    /// Density constant K: dense dispatch when `range <= entries * K`
    pub(crate) switch_density: u32,
    /// Keep every pass's segment lengths in the resulting layout
    pub(crate) record_history: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_passes: 32,
            switch_density: 4,
            record_history: false,
        }
    }
}

impl LayoutConfig {
    /// Create a new LayoutConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the pass limit.
    pub fn max_passes(mut self, value: u32) -> Self {
        self.max_passes = value;
        self
    }

    /// Set the dense/sparse dispatch threshold K.
    pub fn switch_density(mut self, value: u32) -> Self {
        self.switch_density = value;
        self
    }

    /// Set whether to record per-pass lengths.
    pub fn record_history(mut self, value: bool) -> Self {
        self.record_history = value;
        self
    }

    pub fn pass_limit(&self) -> u32 {
        self.max_passes
    }

    pub fn density(&self) -> u32 {
        self.switch_density
    }
}
