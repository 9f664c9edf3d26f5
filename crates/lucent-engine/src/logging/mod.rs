//! Logging utilities.
//!
//! Centralizes logger initialization. Library code only talks to the `log`
//! facade; `env_logger` is installed here for hosts and tests that want it.

mod init;

pub use init::{LoggingConfig, init_logging};
