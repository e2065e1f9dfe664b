pub mod config;
pub mod device;
pub mod protocol;
pub mod stream;
pub mod text;
pub mod types;

// Keep the public surface small and intentional.
pub use config::*;
pub use device::*;
pub use stream::*;
pub use text::*;
pub use types::*;
