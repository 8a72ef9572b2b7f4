//! Per-call scratch directory for generated files.
//!
//! Generated files (the installer overlay) live in a fresh directory under
//! the configured work dir and are removed when the [`Workspace`] drops,
//! whether the call succeeded or not. Directories left behind by an
//! interrupted run are removed by [`sweep`].

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::desired::DesiredStateSpec;
use crate::error::{Error, Result};

/// Prefix of every workspace directory.
pub const WORKSPACE_PREFIX: &str = "meshobs-";

/// File name of the installer overlay.
pub const OVERLAY_FILE: &str = "istio-overlay.yaml";

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a new workspace under `work_dir`, creating `work_dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir).map_err(|e| {
            Error::Fatal(format!(
                "failed to create work dir {}: {e}",
                work_dir.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(work_dir)?;
        debug!(path = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the installer overlay for the desired mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_overlay(&self, desired: &DesiredStateSpec) -> Result<PathBuf> {
        let overlay = json!({
            "apiVersion": "install.istio.io/v1alpha1",
            "kind": "IstioOperator",
            "spec": {
                "profile": desired.mesh_profile.to_string(),
                "values": {
                    "global": {"istioNamespace": desired.namespace},
                },
                "meshConfig": {
                    "enablePrometheusMerge": true,
                },
            },
        });
        let path = self.path().join(OVERLAY_FILE);
        std::fs::write(&path, serde_yaml::to_string(&overlay)?)?;
        Ok(path)
    }
}

/// Remove workspace directories left behind under `work_dir`.
///
/// Returns how many were removed. A missing `work_dir` is not an error.
///
/// # Errors
///
/// Returns an error if `work_dir` exists but cannot be listed.
pub fn sweep(work_dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_workspace = entry.file_name().to_string_lossy().starts_with(WORKSPACE_PREFIX)
            && entry.file_type().is_ok_and(|t| t.is_dir());
        if !is_workspace {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale workspace"),
        }
    }
    Ok(removed)
}
