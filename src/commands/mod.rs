//! CLI command implementations for tango-server-exporter.
//!
//! - `check`: System validation
//! - `config`: Configuration file generation
//! - `test`: Refresh cycles printed to stdout
//! - `servers`: Declared servers and their match status

pub mod check;
pub mod config;
pub mod servers;
pub mod test;

pub use check::command_check;
pub use config::command_config;
pub use servers::command_servers;
pub use test::command_test;
