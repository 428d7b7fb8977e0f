//! PINBENCH Manager Library
//!
//! Configuration loading, reporters and the `pinbench` subcommands.

pub mod commands;
pub mod config;
pub mod logging;
pub mod reporters;
