pub mod bridge;
pub mod paths;

pub use bridge::BridgeConfig;
pub use paths::DataPaths;
