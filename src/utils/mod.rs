//! Cross-platform utilities used by the upgrade pipeline.
//!
//! - [`fs`] - async file copy, atomic replace and permission helpers
//! - [`path_validation`] - archive entry containment checks
//! - [`progress`] - download progress bars honoring `--no-progress`

pub mod fs;
pub mod path_validation;
pub mod progress;
