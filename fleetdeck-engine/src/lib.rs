pub mod audio;
pub mod engine;
pub mod fleet;
pub mod media;
pub mod readiness;
pub mod recording;
pub mod session;
pub mod traits;
