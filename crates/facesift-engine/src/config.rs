use crate::batch::BatchOptions;
use crate::publish::{ArchiveOptions, HostKind};
use facesift_core::{DetectorMode, Tolerance};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Match tolerance, clamped into [0, 1].
    pub tolerance: Tolerance,
    /// Run the detector at full resolution.
    pub accurate: bool,
    /// Enhance matched photos.
    pub enhance: bool,
    /// Hosting fallback chain, highest priority first.
    pub hosts: Vec<HostKind>,
    /// Per-request timeout for uploads.
    pub upload_timeout_secs: u64,
    /// Deflate level for archives.
    pub compression_level: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from `FACESIFT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = lookup("FACESIFT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(facesift_core::default_model_dir);

        let tolerance = parsed::<f32>(&lookup, "FACESIFT_TOLERANCE")
            .map(Tolerance::clamped)
            .unwrap_or_default();

        Self {
            model_dir,
            tolerance,
            accurate: lookup("FACESIFT_ACCURATE").map(|v| v != "0").unwrap_or(true),
            enhance: lookup("FACESIFT_ENHANCE").map(|v| v == "1").unwrap_or(false),
            hosts: lookup("FACESIFT_HOSTS")
                .map(|v| parse_hosts(&v))
                .filter(|hosts| !hosts.is_empty())
                .unwrap_or_else(default_hosts),
            upload_timeout_secs: parsed(&lookup, "FACESIFT_UPLOAD_TIMEOUT_SECS").unwrap_or(60),
            compression_level: parsed::<i64>(&lookup, "FACESIFT_COMPRESSION_LEVEL")
                .map(|l| l.clamp(0, 9))
                .unwrap_or(crate::publish::archive::DEFAULT_COMPRESSION_LEVEL),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(facesift_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(facesift_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn detector_mode(&self) -> DetectorMode {
        if self.accurate {
            DetectorMode::Accurate
        } else {
            DetectorMode::Fast
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            tolerance: self.tolerance,
            detector_mode: self.detector_mode(),
            enhance: self.enhance,
        }
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            compression_level: self.compression_level,
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

fn default_hosts() -> Vec<HostKind> {
    vec![HostKind::TmpFiles, HostKind::ZeroXZero]
}

/// Comma-separated host names; unknown names are dropped with a warning.
pub fn parse_hosts(value: &str) -> Vec<HostKind> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|name| match HostKind::from_str(name) {
            Ok(kind) => Some(kind),
            Err(err) => {
                tracing::warn!("{err}, ignoring");
                None
            }
        })
        .collect()
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
