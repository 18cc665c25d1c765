//! Driver configuration.

use relax_core::LayoutConfig;
use relax_native::ImageConfig;
use serde::Deserialize;

/// Settings for one compilation: layout of every unit and the object image.
///
/// ```
/// let config = relax_lib::Config::from_json(r#"{ "layout": { "max_passes": 8 } }"#).unwrap();
/// assert_eq!(config.layout.pass_limit(), 8);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub layout: LayoutConfig,
    pub image: ImageConfig,
    /// Attach a stack map to every managed method body.
    pub stack_maps: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn image(mut self, image: ImageConfig) -> Self {
        self.image = image;
        self
    }

    pub fn stack_maps(mut self, on: bool) -> Self {
        self.stack_maps = on;
        self
    }
}
