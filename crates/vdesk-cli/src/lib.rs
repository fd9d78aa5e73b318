//! Command-line definition and console prompts for the `vdesk` binary.

pub mod cli_args;
pub mod prompt;

pub use cli_args::Cli;
pub use prompt::{resolve_total_instances, MAX_PROMPT_ATTEMPTS};
