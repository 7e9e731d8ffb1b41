//! Shared infrastructure for the ads-rx crates
//!
//! - logging initialisation
//! - layered configuration loading
//! - shutdown signal handling

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_config_from_file, load_layered, save_config_to_file};
pub use logging::{init, init_with_config, LogConfig};
pub use shutdown::{shutdown_token, wait_for_shutdown};
