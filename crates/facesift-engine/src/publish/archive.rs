//! Zip archives of matched photos.

use crate::batch::MatchRecord;
use chrono::{DateTime, Utc};
use facesift_core::ImageFile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::str::FromStr;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_COMPRESSION_LEVEL: i64 = 6;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("nothing to archive")]
    Empty,
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("write error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which artifact of each match goes into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveVariant {
    #[default]
    Original,
    /// Enhanced copies named `enhanced_<name>`; matches whose enhancement
    /// failed fall back to the original bytes.
    Enhanced,
}

impl ArchiveVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveVariant::Original => "original",
            ArchiveVariant::Enhanced => "enhanced",
        }
    }

    /// Archive entries for `matches`, in match order, with unique names.
    pub fn entries(self, matches: &[MatchRecord]) -> Vec<ImageFile> {
        let mut taken = HashSet::new();
        matches
            .iter()
            .map(|record| {
                let (source, name) = match self {
                    ArchiveVariant::Original => (&record.image, record.name().to_string()),
                    ArchiveVariant::Enhanced => (
                        record.enhanced.as_ref().unwrap_or(&record.image),
                        format!("enhanced_{}", record.name()),
                    ),
                };
                source.renamed(unique_name(&mut taken, name))
            })
            .collect()
    }
}

impl FromStr for ArchiveVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" | "originals" => Ok(ArchiveVariant::Original),
            "enhanced" => Ok(ArchiveVariant::Enhanced),
            other => Err(format!("unknown archive variant '{other}'")),
        }
    }
}

/// Two candidates may share a file name when picked from different folders.
fn unique_name(taken: &mut HashSet<String>, name: String) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name.as_str(), ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// `matched_faces_<variant>_<unix-millis>.zip`
pub fn archive_name(variant: ArchiveVariant, now: DateTime<Utc>) -> String {
    format!(
        "matched_faces_{}_{}.zip",
        variant.as_str(),
        now.timestamp_millis()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Deflate level, 0 (store) to 9.
    pub compression_level: i64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

pub trait ArchiveBuilder: Send + Sync {
    fn build(&self, entries: &[ImageFile], options: &ArchiveOptions)
        -> Result<Vec<u8>, ArchiveError>;
}

/// Deflate-compressed zip, built in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveBuilder;

impl ArchiveBuilder for ZipArchiveBuilder {
    fn build(
        &self,
        entries: &[ImageFile],
        options: &ArchiveOptions,
    ) -> Result<Vec<u8>, ArchiveError> {
        if entries.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let file_options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(options.compression_level.clamp(0, 9)));

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in entries {
            zip.start_file(entry.name(), file_options)?;
            zip.write_all(entry.bytes())?;
        }
        let blob = zip.finish()?.into_inner();

        tracing::debug!(
            entries = entries.len(),
            bytes = blob.len(),
            level = options.compression_level,
            "archive built"
        );
        Ok(blob)
    }
}
