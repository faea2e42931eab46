//! Input loading shared by the binary and tests: TOML run configuration and
//! JSON scene files.

pub mod config;
pub mod scene;
