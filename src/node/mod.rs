pub mod config;
pub mod runner;
pub mod service_handle;

pub use config::ProtocolConfig;
pub use runner::spawn;
pub use service_handle::ServiceHandle;
