//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use harvest_cli::test_utils::{ArchiveBuilder, fake_binary, sandbox_context};
use harvest_cli::upgrade::UpgradeContext;
use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary root holding a data directory, an install path and a context
/// pointing at both.
pub struct Sandbox {
    pub temp: TempDir,
    pub ctx: UpgradeContext,
}

impl Sandbox {
    pub fn new(current_version: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let mut ctx = sandbox_context(temp.path(), current_version);
        ctx.config.min_artifact_size = 16;
        Self {
            temp,
            ctx,
        }
    }

    pub fn write_data(&self, name: &str, content: &str) {
        std::fs::write(self.ctx.paths.data_dir.join(name), content).unwrap();
    }

    pub fn read_data(&self, name: &str) -> String {
        std::fs::read_to_string(self.ctx.paths.data_dir.join(name)).unwrap()
    }

    /// Put an executable script at the install path.
    pub fn install_binary(&self, body: &str) {
        fake_binary(&self.ctx.paths.install_path, body);
    }

    pub fn installed_binary(&self) -> String {
        std::fs::read_to_string(&self.ctx.paths.install_path).unwrap()
    }

    /// Gzipped tarball containing a `harvest` script running `body`.
    pub fn release_archive(&self, body: &str) -> Vec<u8> {
        let path = self.temp.path().join(format!("build-{}.tar.gz", uuid::Uuid::new_v4()));
        ArchiveBuilder::new()
            .file("README.md", b"Harvest release")
            .executable("harvest", format!("#!/bin/sh\n{body}\n").as_bytes())
            .write_to(&path);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(path).unwrap();
        bytes
    }

    /// Write a `harvest.toml` pointing at this sandbox and return its path.
    pub fn write_config(&self) -> PathBuf {
        let path = self.temp.path().join("harvest.toml");
        let content = format!(
            "data_dir = '{}'\ninstall_path = '{}'\n",
            self.ctx.paths.data_dir.display(),
            self.ctx.paths.install_path.display()
        );
        std::fs::write(&path, content).unwrap();
        path
    }
}
