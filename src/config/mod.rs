//! Configuration management for Harvest.
//!
//! Harvest reads a single global TOML file, `~/.harvest/harvest.toml`, which
//! holds the data directory, the install path and the `[upgrade]` table. The
//! location can be overridden with `--config` or the `HARVEST_CONFIG_PATH`
//! environment variable. A missing file is not an error: defaults apply.
//!
//! ```toml
//! data_dir = "~/.harvest"
//! install_path = "~/.local/bin/harvest"
//!
//! [upgrade]
//! repo_owner = "harvest-cli"
//! repo_name = "harvest"
//! keep_backups = 5
//! checksum_policy = "required"
//! ```

mod global;

pub use global::GlobalConfig;
