//! reMarkable setup library.
//!
//! Sets up passwordless SSH to the tablet, then pushes a font and a custom
//! sleep screen to it and reboots. SSH itself is delegated to the OpenSSH
//! client tools; this crate only decides what to run and keeps the local SSH
//! files (`known_hosts`, `config`) consistent.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod preflight;
pub mod process;
pub mod publish;
pub mod ssh;

pub use bootstrap::{Bootstrap, BootstrapReport};
pub use config::{AssetPaths, DeviceTarget, SshPaths};
pub use error::{SetupError, Transcript};
