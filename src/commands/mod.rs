//! CLI command implementations for netrate.
//!
//! - `check`: configuration and external command validation
//! - `config`: configuration file generation
//! - `top`: one-off ranked list
//! - `generate`: replay fixture generation

pub mod check;
pub mod config;
pub mod generate;
pub mod top;

pub use check::command_check;
pub use config::command_config;
pub use generate::command_generate_testdata;
pub use top::command_top;
