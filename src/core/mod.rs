//! Core types shared across Harvest.
//!
//! Currently this is the error taxonomy and its user-facing rendering; see
//! [`error`] for details.

pub mod error;

pub use error::{ErrorContext, UpgradeError, user_friendly_error};
