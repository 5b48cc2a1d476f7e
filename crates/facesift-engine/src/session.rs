//! The object a front end talks to: start a run, cancel it, publish or save
//! its matches, reset.

use crate::batch::{BatchError, BatchOptions, BatchOrchestrator, BatchRun};
use crate::events::{EventSink, LogLevel};
use crate::provider::DescriptorProvider;
use crate::publish::{
    archive_name, publish, ArchiveBuilder, ArchiveOptions, ArchiveVariant, HostingService,
    PublishError, Published, ZipArchiveBuilder,
};
use chrono::Utc;
use facesift_core::{Enhancer, ImageFile, ToneEnhancer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A built archive, ready to upload or write out.
#[derive(Debug, Clone)]
pub struct Archive {
    pub name: String,
    pub blob: Vec<u8>,
    pub entries: usize,
}

pub struct Session {
    provider: Arc<dyn DescriptorProvider>,
    enhancer: Arc<dyn Enhancer + Send + Sync>,
    archiver: Box<dyn ArchiveBuilder>,
    archive_options: ArchiveOptions,
    cancel: Arc<AtomicBool>,
    current: Option<BatchRun>,
}

impl Session {
    pub fn new(provider: Arc<dyn DescriptorProvider>) -> Self {
        Self {
            provider,
            enhancer: Arc::new(ToneEnhancer::default()),
            archiver: Box::new(ZipArchiveBuilder),
            archive_options: ArchiveOptions::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            current: None,
        }
    }

    pub fn with_enhancer(mut self, enhancer: impl Enhancer + Send + Sync + 'static) -> Self {
        self.enhancer = Arc::new(enhancer);
        self
    }

    pub fn with_archiver(mut self, archiver: impl ArchiveBuilder + 'static) -> Self {
        self.archiver = Box::new(archiver);
        self
    }

    pub fn with_archive_options(mut self, options: ArchiveOptions) -> Self {
        self.archive_options = options;
        self
    }

    /// Shared flag; setting it stops the current run before its next candidate.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// The last run, including an aborted one.
    pub fn current_run(&self) -> Option<&BatchRun> {
        self.current.as_ref()
    }

    /// Start a new run, discarding the previous one.
    pub async fn start(
        &mut self,
        references: &[ImageFile],
        candidates: &[ImageFile],
        options: BatchOptions,
        sink: &mut dyn EventSink,
    ) -> Result<&BatchRun, BatchError> {
        self.reset();

        let result = BatchOrchestrator::new(self.provider.as_ref())
            .with_enhancer(Arc::clone(&self.enhancer))
            .with_cancel_flag(self.cancel_flag())
            .run(references, candidates, options, sink)
            .await;

        match result {
            Ok(run) => Ok(self.current.insert(run)),
            Err(BatchError::ReferenceSetEmpty { run }) => {
                self.current = Some((*run).clone());
                Err(BatchError::ReferenceSetEmpty { run })
            }
            Err(err) => Err(err),
        }
    }

    /// Zip the current run's matches.
    pub fn archive(&self, variant: ArchiveVariant) -> Result<Archive, PublishError> {
        let run = self
            .current
            .as_ref()
            .filter(|run| !run.matches.is_empty())
            .ok_or(PublishError::NothingToPublish)?;

        let entries = variant.entries(&run.matches);
        let blob = self.archiver.build(&entries, &self.archive_options)?;
        Ok(Archive {
            name: archive_name(variant, Utc::now()),
            blob,
            entries: entries.len(),
        })
    }

    /// Archive the matches and upload them through the fallback chain.
    pub async fn publish(
        &self,
        variant: ArchiveVariant,
        services: &[Arc<dyn HostingService>],
        sink: &mut dyn EventSink,
    ) -> Result<Published, PublishError> {
        let archive = match self.archive(variant) {
            Ok(archive) => archive,
            Err(err) => {
                sink.log(LogLevel::Error, format!("Cannot share: {err}"));
                return Err(err);
            }
        };
        sink.log(
            LogLevel::Info,
            format!("Creating ZIP file with {} images...", archive.entries),
        );

        let published = publish(&archive.blob, &archive.name, services, sink).await?;
        sink.log(
            LogLevel::Success,
            format!(
                "Share link ready ({}, expires in {}): {}",
                published.link.service, published.link.expiry, published.link.url
            ),
        );
        Ok(published)
    }

    /// Write the archive into `dir` and return its path.
    pub fn save_archive(&self, variant: ArchiveVariant, dir: &Path) -> Result<PathBuf, PublishError> {
        let archive = self.archive(variant)?;
        let path = dir.join(&archive.name);
        std::fs::write(&path, &archive.blob)?;
        tracing::info!(path = %path.display(), entries = archive.entries, "archive saved");
        Ok(path)
    }

    /// Drop the current run and every image buffer it holds.
    pub fn reset(&mut self) {
        self.current = None;
        self.cancel.store(false, Ordering::Relaxed);
    }
}
