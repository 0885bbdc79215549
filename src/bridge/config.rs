use crate::base::address::OutputId;
use crate::base::module_kind::ModuleKind;
use crate::error::DynResult;
use crate::protocol::error::ProtocolError;
use crate::protocol::values::MAX_DEVICE_LEVEL;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing of the bridge. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long to wait for a set reply after an action
    pub set_confirm_timeout_ms: u64,
    /// How long the status slot holder waits for a status reply
    pub status_timeout_ms: u64,
    /// Minimum time between two status requests
    pub status_spacing_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            set_confirm_timeout_ms: 500,
            status_timeout_ms: 1000,
            status_spacing_ms: 50,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> DynResult<BridgeConfig> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> DynResult<BridgeConfig> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn set_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.set_confirm_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn status_spacing(&self) -> Duration {
        Duration::from_millis(self.status_spacing_ms)
    }
}

fn default_max_level() -> u8 {
    MAX_DEVICE_LEVEL
}

/// One output as described by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub module: u8,
    pub kind: ModuleKind,
    pub output: u8,
    /// Highest level a dim command may set, in device units
    #[serde(default = "default_max_level")]
    pub max_level: u8,
}

impl OutputConfig {
    pub fn new(module: u8, kind: ModuleKind, output: u8) -> OutputConfig {
        OutputConfig {
            module,
            kind,
            output,
            max_level: MAX_DEVICE_LEVEL,
        }
    }

    pub fn output_id(&self) -> Result<OutputId, ProtocolError> {
        OutputId::new(self.module, self.kind, self.output)
    }
}
