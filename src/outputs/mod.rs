//! Output generation.
//!
//! # Submodules
//!
//! - [`json`]: Writes the [`crate::models::RunReport`] of each run as a JSON file

pub mod json;
