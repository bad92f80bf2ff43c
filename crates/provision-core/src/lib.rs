mod config;
pub mod error;
pub mod types;

pub const DEFAULT_CONFIG_FILE: &str = "provision.toml";

pub use config::{ProvisionConfig, SizeDefaults, SshConfig};
pub use error::*;
pub use types::*;
