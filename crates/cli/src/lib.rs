//! Docrun CLI
//!
//! Loads configuration and spec files, drives the runner, and renders
//! the resulting report.

pub mod commands;
pub mod output;
