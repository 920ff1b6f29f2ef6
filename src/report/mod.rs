//! Report output.

pub mod generator;

pub use generator::{generate_human_report, generate_json_report, write_output, OutputFormat};
