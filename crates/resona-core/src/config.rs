//! JSON config contracts.
//!
//! Hosts load an [`EngineConfig`] at startup; the tracer's `Settings` block
//! (defined in `resona-tracer`) is loaded through the same
//! [`load_typed_json`] helper so both share one error surface.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::resolution::ResolutionPolicy;

/// Render-node defaults applied by hosts when building nodes from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: i32,
    pub height: i32,
    /// Split each draw into this many scissor bands (gui responsiveness).
    #[serde(default = "default_one")]
    pub split: i32,
    /// Multi-pass count for nodes that allow it.
    #[serde(default = "default_one")]
    pub passes: u32,
}

fn default_one<T: From<u8>>() -> T {
    T::from(1)
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            split: 1,
            passes: 1,
        }
    }
}

impl RenderConfig {
    pub fn policy(&self) -> ResolutionPolicy {
        ResolutionPolicy::custom(self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub render: RenderConfig,
}

impl EngineConfig {
    fn validate(&self, path: &Path) -> Result<(), EngineError> {
        if self.render.width < 2 || self.render.height < 2 {
            return Err(EngineError::InvalidConfig {
                path: path.to_path_buf(),
                msg: format!(
                    "render resolution {}x{} is below the 2x2 minimum",
                    self.render.width, self.render.height
                ),
            });
        }
        if self.render.passes == 0 {
            return Err(EngineError::InvalidConfig {
                path: path.to_path_buf(),
                msg: "render passes must be at least 1".into(),
            });
        }
        if self.render.split < 1 {
            return Err(EngineError::InvalidConfig {
                path: path.to_path_buf(),
                msg: "render split must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Load any serde-deserializable type from a JSON file.
pub fn load_typed_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let text = fs::read_to_string(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load and validate an [`EngineConfig`].
pub fn load_engine_config_from(path: &Path) -> Result<EngineConfig, EngineError> {
    let config: EngineConfig = load_typed_json(path)?;
    config.validate(path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let c = EngineConfig::default();
        assert!(c.validate(Path::new("default")).is_ok());
    }

    #[test]
    fn zero_passes_are_rejected() {
        let c = EngineConfig {
            render: RenderConfig {
                passes: 0,
                ..RenderConfig::default()
            },
        };
        let err = c.validate(Path::new("mem")).unwrap_err();
        assert!(err.to_string().contains("passes"));
    }

    #[test]
    fn undersized_resolution_is_rejected() {
        let c = EngineConfig {
            render: RenderConfig {
                width: 1,
                height: 1024,
                ..RenderConfig::default()
            },
        };
        assert!(c.validate(Path::new("mem")).is_err());
    }
}
