pub mod channel;
pub mod config_store;
pub mod defaults;
pub mod driver;
pub mod local_camera;
pub mod probe;
pub mod runtime_fleet;
pub mod sinks;
