//! Error handling for Harvest
//!
//! The upgrade subsystem reports failures through two layers:
//! 1. [`UpgradeError`] - a strongly-typed taxonomy that callers (and tests) can match on
//! 2. [`ErrorContext`] - a wrapper that adds a remediation hint for the CLI
//!
//! Component APIs return [`anyhow::Result`]. Typed failures are raised as
//! [`UpgradeError`] values and stay recoverable through
//! [`anyhow::Error::downcast_ref`] even after `.context(...)` layers have been
//! attached by the stage that surfaced them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use harvest_cli::core::{UpgradeError, user_friendly_error};
//!
//! fn verify() -> anyhow::Result<()> {
//!     Err(UpgradeError::MissingBackup.into())
//! }
//!
//! if let Err(e) = verify() {
//!     let ctx = user_friendly_error(e);
//!     ctx.display();
//! }
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Every failure mode of the backup, download, install and rollback pipeline.
///
/// Variants carry enough context (paths, versions, reasons) to tell the user
/// which stage failed without consulting the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpgradeError {
    /// No snapshot exists in the backup root.
    #[error("No backup found")]
    MissingBackup,

    /// The latest snapshot is missing a data file or its metadata record.
    #[error("Backup at {path} is corrupt: {reason}")]
    CorruptBackup {
        /// Snapshot directory
        path: String,
        /// What is missing or unreadable
        reason: String,
    },

    /// A filesystem read or write failed.
    #[error("I/O failure during {operation} on {path}: {reason}")]
    IoFailure {
        /// Operation being performed
        operation: String,
        /// Path involved
        path: String,
        /// Underlying error text
        reason: String,
    },

    /// No release artifact exists for this OS/architecture pair.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform {
        /// Operating system reported by the runtime
        os: String,
        /// CPU architecture reported by the runtime
        arch: String,
    },

    /// Transport error or non-success response from the release source.
    #[error("Network failure during {operation}: {reason}")]
    NetworkFailure {
        /// Request being made
        operation: String,
        /// Transport error or HTTP status
        reason: String,
    },

    /// The release exists but does not carry an artifact for this platform.
    #[error("Release {tag} has no asset named {name}")]
    AssetNotFound {
        /// Expected asset file name
        name: String,
        /// Release tag that was searched
        tag: String,
    },

    /// The download completed but wrote zero bytes.
    #[error("Downloaded artifact is empty")]
    EmptyArtifact,

    /// The staged artifact is not on disk.
    #[error("Staged artifact not found: {path}")]
    MissingArtifact {
        /// Expected staging path
        path: String,
    },

    /// The staged artifact is below the plausible size threshold.
    #[error("Artifact {path} is too small ({size} bytes, expected at least {minimum})")]
    ArtifactTooSmall {
        /// Staged file
        path: String,
        /// Actual size in bytes
        size: u64,
        /// Configured minimum
        minimum: u64,
    },

    /// The staged artifact's file name does not follow the release naming convention.
    #[error("Artifact name '{name}' does not match expected '{expected}'")]
    InvalidArtifactShape {
        /// Actual file name
        name: String,
        /// Name the release convention requires
        expected: String,
    },

    /// The artifact's SHA-256 digest does not match the published value.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Staged file
        path: String,
        /// Digest published by the release source
        expected: String,
        /// Digest computed locally
        actual: String,
    },

    /// A checksum is required but the release does not publish one.
    #[error("No checksum published for {name}")]
    ChecksumUnavailable {
        /// Asset whose checksum was looked up
        name: String,
    },

    /// The artifact could not be decompressed or parsed as a tar archive.
    #[error("Archive is corrupt: {reason}")]
    ArchiveCorrupt {
        /// Decoder error text
        reason: String,
    },

    /// An archive entry would resolve outside the extraction directory.
    #[error("Archive entry escapes extraction directory: {entry}")]
    PathTraversal {
        /// Offending entry path as stored in the archive
        entry: String,
    },

    /// No file named like the tool binary exists in the extracted tree.
    #[error("Binary '{name}' not found in extracted archive")]
    BinaryNotFound {
        /// Binary file name searched for
        name: String,
    },

    /// Post-install or post-rollback verification failed.
    #[error("Verification failed for {path}: {reason}")]
    VerificationFailed {
        /// Installed binary path
        path: String,
        /// Which check failed
        reason: String,
    },

    /// Rollback was requested but the binary backup slot is empty.
    #[error("No binary backup available")]
    NoBinaryBackup,

    /// Rollback was requested but no data snapshot exists.
    #[error("No data backup available")]
    NoDataBackup,

    /// The configuration file could not be read or parsed.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Parser or I/O error text
        message: String,
    },

    /// Anything not covered above.
    #[error("{message}")]
    Other {
        /// Full message including the cause chain
        message: String,
    },
}

impl UpgradeError {
    /// Build an [`UpgradeError::IoFailure`] from an [`std::io::Error`].
    pub fn io(operation: impl Into<String>, path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::IoFailure {
            operation: operation.into(),
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Error wrapper carrying an optional suggestion and details for display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpgradeError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: UpgradeError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: error in red, details in yellow, suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a remediation hint.
///
/// Typed [`UpgradeError`]s anywhere in the chain get a tailored suggestion;
/// the outermost context message is kept in the details so the user can see
/// which stage surfaced the failure. Everything else falls back to
/// [`UpgradeError::Other`] with the full cause chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(upgrade_error) = error.downcast_ref::<UpgradeError>() {
        let mut ctx = create_error_context(upgrade_error.clone());
        let outer = error.to_string();
        if outer != upgrade_error.to_string() {
            let stage = match ctx.details.take() {
                Some(details) => format!("{outer}. {details}"),
                None => outer,
            };
            ctx.details = Some(stage);
        }
        return ctx;
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::PermissionDenied {
            return ErrorContext::new(UpgradeError::IoFailure {
                operation: "file access".to_string(),
                path: "unknown".to_string(),
                reason: io_error.to_string(),
            })
            .with_suggestion("Check ownership of the data directory and the install path");
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(UpgradeError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax in your harvest.toml file");
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(UpgradeError::Other {
        message,
    })
}

fn create_error_context(error: UpgradeError) -> ErrorContext {
    match &error {
        UpgradeError::MissingBackup => ErrorContext::new(error)
            .with_suggestion("Run 'harvest upgrade' to create a backup before attempting a rollback"),

        UpgradeError::CorruptBackup { path, .. } => {
            let suggestion = format!(
                "Remove the damaged snapshot at {path} and create a new backup with 'harvest upgrade'"
            );
            ErrorContext::new(error)
                .with_suggestion(suggestion)
                .with_details("Every snapshot must contain all tracked data files and backup.json")
        }

        UpgradeError::IoFailure { .. } => ErrorContext::new(error)
            .with_suggestion("Check free disk space and permissions on the data directory"),

        UpgradeError::UnsupportedPlatform { .. } => ErrorContext::new(error)
            .with_suggestion("Download and install a release manually for your platform")
            .with_details("Releases are published for linux, darwin and windows on amd64, arm64 and 386"),

        UpgradeError::NetworkFailure { .. } => ErrorContext::new(error)
            .with_suggestion("Check your internet connection and try again")
            .with_details("Requests to the release source time out after the configured limit"),

        UpgradeError::AssetNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("The release may still be publishing; try again later or install manually"),

        UpgradeError::EmptyArtifact
        | UpgradeError::MissingArtifact { .. }
        | UpgradeError::ArtifactTooSmall { .. }
        | UpgradeError::InvalidArtifactShape { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'harvest upgrade' again to retry the download")
            .with_details("The staged download was rejected and removed"),

        UpgradeError::ChecksumMismatch { .. } => ErrorContext::new(error)
            .with_suggestion("Retry the upgrade; if the mismatch persists, report it to the maintainers")
            .with_details("The download did not match the published SHA-256 digest and was deleted"),

        UpgradeError::ChecksumUnavailable { .. } => ErrorContext::new(error).with_suggestion(
            "Set 'checksum_policy = \"warn-on-missing\"' under [upgrade] in harvest.toml to allow unverified downloads",
        ),

        UpgradeError::ArchiveCorrupt { .. } | UpgradeError::PathTraversal { .. } => {
            ErrorContext::new(error)
                .with_suggestion("Do not install this artifact; retry the download or install manually")
                .with_details("Nothing outside the scratch directory was written")
        }

        UpgradeError::BinaryNotFound { .. } => ErrorContext::new(error)
            .with_suggestion("The release archive layout is unexpected; install manually"),

        UpgradeError::VerificationFailed { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'harvest rollback --perform' to restore the previous version"),

        UpgradeError::NoBinaryBackup | UpgradeError::NoDataBackup => ErrorContext::new(error)
            .with_suggestion("Rollback needs both a binary backup and a data snapshot; see 'harvest rollback'"),

        UpgradeError::ConfigError { .. } => ErrorContext::new(error)
            .with_suggestion("Check the syntax of harvest.toml or pass --config with another file"),

        UpgradeError::Other { .. } => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        let err = UpgradeError::ArtifactTooSmall {
            path: "/tmp/a.tar.gz".to_string(),
            size: 10,
            minimum: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Artifact /tmp/a.tar.gz is too small (10 bytes, expected at least 1024)"
        );
    }

    #[test]
    fn test_downcast_through_context() {
        let result: anyhow::Result<()> =
            Err(anyhow::Error::from(UpgradeError::MissingBackup)).context("Backup verification failed");
        let err = result.unwrap_err();
        assert_eq!(err.downcast_ref::<UpgradeError>(), Some(&UpgradeError::MissingBackup));
    }

    #[test]
    fn test_user_friendly_error_keeps_stage() {
        let result: anyhow::Result<()> = Err(anyhow::Error::from(UpgradeError::NoBinaryBackup))
            .context("Rollback failed");
        let ctx = user_friendly_error(result.unwrap_err());
        assert_eq!(ctx.error, UpgradeError::NoBinaryBackup);
        assert!(ctx.details.as_deref().unwrap().contains("Rollback failed"));
        assert!(ctx.suggestion.is_some());
    }

    #[test]
    fn test_user_friendly_error_generic_chain() {
        let err = anyhow::anyhow!("root cause").context("outer");
        let ctx = user_friendly_error(err);
        match ctx.error {
            UpgradeError::Other { message } => {
                assert!(message.contains("outer"));
                assert!(message.contains("root cause"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new(UpgradeError::EmptyArtifact)
            .with_suggestion("retry")
            .with_details("details here");
        let rendered = ctx.to_string();
        assert!(rendered.contains("Downloaded artifact is empty"));
        assert!(rendered.contains("Details: details here"));
        assert!(rendered.contains("Suggestion: retry"));
    }
}
