pub mod base {
    pub mod address;
    pub mod module_kind;
}

pub mod protocol {
    pub mod codec;
    pub mod error;
    pub mod values;
}

pub mod drivers {
    pub mod driver;
    #[cfg(feature = "simulator")]
    pub mod simulator {
        pub mod simulator_bus;
        pub mod timing;
    }
}

pub mod bridge {
    #[allow(clippy::module_inception)]
    pub mod bridge;
    pub mod config;
    pub mod controller;
    pub mod coordinator;
    pub(crate) mod registry;
    #[cfg(all(test, feature = "simulator"))]
    mod test;
}

pub mod error;

pub use bridge::bridge::Bridge;
pub use bridge::config::{BridgeConfig, OutputConfig};
pub use bridge::controller::{Confidence, Confirmation, OutputController, OutputLevel, OutputState, Phase};
pub use error::BridgeError;
