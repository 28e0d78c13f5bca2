//! Integration test suite for Harvest
//!
//! End-to-end scenarios for the upgrade, backup and rollback machinery,
//! driven through the public library API with an in-memory release source,
//! plus a few runs of the `harvest` binary itself.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **backup_store**: snapshot round-trips, retention and the latest pointer
//! - **cli**: the `harvest` binary's rollback and help output
//! - **download**: rejection of corrupt artifacts
//! - **rollback**: recovery after a broken install
//! - **upgrade_flow**: complete upgrades, fresh systems and failed installs

#[path = "../common/mod.rs"]
mod common;

mod backup_store;
mod cli;
mod download;
mod rollback;
mod upgrade_flow;
