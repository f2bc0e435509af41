//! Artifact archival for failing tests.
//!
//! Output of failing tests is packaged into a tar archive up to configured
//! size and file-count limits; a JSON manifest describing the archived
//! entries is written when archival is finalized. The orchestrator owns
//! the archival lifecycle and finalizes it during teardown, unless the run
//! was interrupted.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ArchivalConfig;

/// One archived test-output entry, as recorded in the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    /// Display name of the suite the test belonged to.
    pub suite: String,
    /// Test path or identifier.
    pub test: String,
    /// Path of the entry inside the archive.
    pub archive_path: String,
    /// Size of the archived output in bytes.
    pub size_bytes: u64,
    /// When the entry was archived.
    pub archived_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    archive_file: &'a PathBuf,
    entries: &'a [ArchiveEntry],
    limit_reached: bool,
}

struct Inner {
    builder: tar::Builder<File>,
    entries: Vec<ArchiveEntry>,
    total_bytes: u64,
    limit_reached: bool,
    seq: usize,
}

/// Packages selected test artifacts up to configured size/count limits.
pub struct Archival {
    config: ArchivalConfig,
    inner: Mutex<Inner>,
}

impl Archival {
    /// Creates the archive file and an empty manifest state.
    pub fn new(config: ArchivalConfig) -> Result<Self> {
        if let Some(parent) = config.file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create archive directory {}", parent.display())
                })?;
            }
        }
        let file = File::create(&config.file)
            .with_context(|| format!("Failed to create archive file {}", config.file.display()))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                builder: tar::Builder::new(file),
                entries: Vec::new(),
                total_bytes: 0,
                limit_reached: false,
                seq: 0,
            }),
            config,
        })
    }

    /// Archives one failing test's captured output. Entries past the
    /// configured limits are skipped with a warning.
    pub fn archive_test_output(
        &self,
        suite: &str,
        test: &str,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("archival state poisoned");

        let size = (stdout.len() + stderr.len()) as u64;
        let over_files = inner.entries.len() >= self.config.limit_files;
        let over_size =
            inner.total_bytes + size > self.config.limit_size_mb.saturating_mul(1024 * 1024);
        if over_files || over_size {
            if !inner.limit_reached {
                warn!(
                    "archive limits reached ({} files, {} bytes), skipping further artifacts",
                    inner.entries.len(),
                    inner.total_bytes
                );
                inner.limit_reached = true;
            }
            return Ok(());
        }

        inner.seq += 1;
        let archive_path = format!("{:04}/{}", inner.seq, sanitize(test));
        let mut body = Vec::with_capacity(stdout.len() + stderr.len());
        body.extend_from_slice(stdout);
        body.extend_from_slice(stderr);

        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        inner
            .builder
            .append_data(&mut header, &archive_path, body.as_slice())
            .with_context(|| format!("Failed to archive output of {}", test))?;

        inner.total_bytes += size;
        inner.entries.push(ArchiveEntry {
            suite: suite.to_string(),
            test: test.to_string(),
            archive_path,
            size_bytes: size,
            archived_at: Utc::now(),
        });
        Ok(())
    }

    /// Number of archived entries so far.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().expect("archival state poisoned").entries.len()
    }

    /// Closes the archive and writes the JSON manifest next to it.
    pub fn finalize(self) -> Result<()> {
        let inner = self.inner.into_inner().expect("archival state poisoned");
        let count = inner.entries.len();

        inner
            .builder
            .into_inner()
            .context("Failed to finish archive")?
            .sync_all()
            .ok();

        let manifest_path = self.config.file.with_extension("json");
        let manifest = Manifest {
            archive_file: &self.config.file,
            entries: &inner.entries,
            limit_reached: inner.limit_reached,
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).with_context(|| {
            format!("Failed to write archive manifest {}", manifest_path.display())
        })?;

        info!(
            "archived {} test output(s) to {}",
            count,
            self.config.file.display()
        );
        Ok(())
    }
}

fn sanitize(path: &str) -> String {
    path.replace(['/', '\\', ':'], "_")
}
