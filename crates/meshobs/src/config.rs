//! Settings file.
//!
//! Every field is optional; a missing file or key falls back to the
//! defaults. CLI flags are applied on top by the command layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::addon::AddonSource;
use crate::desired::DesiredStateSpec;
use crate::error::{Error, Result};
use crate::reconciler::ReconcilerOptions;
use crate::retry::RetryConfig;
use crate::verify::VerifyOptions;
use crate::wait::WaitPolicies;

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "meshobs.yaml";

/// (De)serialize a [`Duration`] as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Everything the CLI needs besides its flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub desired: DesiredStateSpec,
    pub waits: WaitPolicies,
    pub retry: RetryConfig,
    /// Mesh installer executable, looked up in `PATH` unless absolute.
    pub mesh_cli: String,
    pub addon: AddonSource,
    /// Parent of the per-call workspace directories.
    pub work_dir: PathBuf,
    /// Overall deadline of one command, in seconds.
    pub deadline_secs: Option<u64>,
    /// Scan the addon logs for config reload errors during verification.
    pub verify_logs: bool,
    pub log_tail_lines: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            desired: DesiredStateSpec::default(),
            waits: WaitPolicies::default(),
            retry: RetryConfig::default(),
            mesh_cli: "istioctl".to_string(),
            addon: AddonSource::Bundled,
            work_dir: std::env::temp_dir().join("meshobs"),
            deadline_secs: None,
            verify_logs: false,
            log_tail_lines: 200,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_SETTINGS_FILE`] if it
    /// exists, or use the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be read, or any
    /// file does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if !fallback.exists() {
                    debug!("No settings file, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Fatal(format!("failed to read settings {}: {e}", path.display()))
        })?;
        let settings = Self::parse(&text)
            .map_err(|e| Error::Fatal(format!("invalid settings {}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Parse settings YAML. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML does not match the settings shape or
    /// a value is out of range.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the values serde cannot: backoff shapes and the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.waits.validate()?;
        self.deadline_from(Instant::now())?;
        Ok(())
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// The overall deadline counted from `start`, if one is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the deadline is not representable.
    pub fn deadline_from(&self, start: Instant) -> Result<Option<Instant>> {
        self.deadline()
            .map(|timeout| {
                start.checked_add(timeout).ok_or_else(|| {
                    Error::InvalidSpec(format!(
                        "deadline_secs {} is out of range",
                        timeout.as_secs()
                    ))
                })
            })
            .transpose()
    }

    #[must_use]
    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            waits: self.waits.clone(),
            retry: self.retry.clone(),
            work_dir: self.work_dir.clone(),
            verify: VerifyOptions {
                check_logs: self.verify_logs,
                log_tail_lines: self.log_tail_lines,
            },
        }
    }
}
