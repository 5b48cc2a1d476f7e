//! Batch matching runs.
//!
//! A run builds a reference set from the reference photos, then walks the
//! candidate photos one at a time in input order. Anything that goes wrong
//! with a single photo is logged and counted as processed; only an empty
//! reference set stops the run.

use crate::events::{EventSink, LogLevel, RunEvent, RunSummary};
use crate::provider::DescriptorProvider;
use chrono::{DateTime, Utc};
use facesift_core::{
    Descriptor, DetectorMode, DistanceMatcher, Enhancer, ImageFile, MatchOutcome, Matcher,
    ReferenceSet, Tolerance,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("no reference images selected")]
    NoReferences,
    #[error("no candidate images selected")]
    NoCandidates,
    #[error("no faces found in any reference image")]
    ReferenceSetEmpty { run: Box<BatchRun> },
}

impl BatchError {
    /// The aborted run, when the failure happened after the run started.
    pub fn run(&self) -> Option<&BatchRun> {
        match self {
            BatchError::ReferenceSetEmpty { run } => Some(run),
            _ => None,
        }
    }
}

/// User-facing knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchOptions {
    pub tolerance: Tolerance,
    pub detector_mode: DetectorMode,
    pub enhance: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            detector_mode: DetectorMode::default(),
            enhance: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    BuildingReferences,
    Running,
    Completed,
    Aborted,
    /// Stopped on request; matches found so far are kept.
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Aborted | RunStatus::Cancelled
        )
    }
}

/// A candidate photo that showed one of the reference faces.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    /// Position of the candidate in the input list.
    pub candidate_index: usize,
    pub image: ImageFile,
    /// `(1 - best_distance) * 100`.
    pub confidence: f32,
    pub best_distance: f32,
    /// Enhanced copy, when enhancement ran and succeeded.
    pub enhanced: Option<ImageFile>,
}

impl MatchRecord {
    fn new(candidate_index: usize, image: ImageFile, outcome: &MatchOutcome) -> Self {
        Self {
            candidate_index,
            image,
            confidence: outcome.confidence(),
            best_distance: outcome.best_distance,
            enhanced: None,
        }
    }

    pub fn name(&self) -> &str {
        self.image.name()
    }
}

/// Record of one execution of the matching pipeline.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub id: Uuid,
    pub options: BatchOptions,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reference_count: usize,
    pub total: usize,
    pub processed: usize,
    pub match_count: usize,
    pub matches: Vec<MatchRecord>,
}

impl BatchRun {
    fn new(total: usize, options: BatchOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            status: RunStatus::Idle,
            started_at: Utc::now(),
            finished_at: None,
            reference_count: 0,
            total,
            processed: 0,
            match_count: 0,
            matches: Vec::new(),
        }
    }

    /// Share of candidates that matched, in [0, 1].
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.match_count as f64 / self.total as f64
    }

    pub fn enhanced_count(&self) -> usize {
        self.matches.iter().filter(|m| m.enhanced.is_some()).count()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total,
            processed: self.processed,
            match_count: self.match_count,
            enhanced_count: self.enhanced_count(),
            success_rate: self.success_rate(),
        }
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// Drives a run: one provider call in flight at any time.
pub struct BatchOrchestrator<'a, M = DistanceMatcher> {
    provider: &'a dyn DescriptorProvider,
    matcher: M,
    enhancer: Option<Arc<dyn Enhancer + Send + Sync>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> BatchOrchestrator<'a, DistanceMatcher> {
    pub fn new(provider: &'a dyn DescriptorProvider) -> Self {
        Self {
            provider,
            matcher: DistanceMatcher,
            enhancer: None,
            cancel: None,
        }
    }
}

impl<'a, M: Matcher> BatchOrchestrator<'a, M> {
    pub fn with_matcher<N: Matcher>(self, matcher: N) -> BatchOrchestrator<'a, N> {
        BatchOrchestrator {
            provider: self.provider,
            matcher,
            enhancer: self.enhancer,
            cancel: self.cancel,
        }
    }

    /// Enhancer used for matches when [`BatchOptions::enhance`] is set. It runs
    /// on tokio's blocking pool.
    pub fn with_enhancer(mut self, enhancer: Arc<dyn Enhancer + Send + Sync>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Flag polled before each candidate; setting it stops the run early.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Execute a full run.
    ///
    /// Returns the finished run (`Completed` or `Cancelled`), or
    /// [`BatchError::ReferenceSetEmpty`] carrying the `Aborted` run when no
    /// reference face could be extracted.
    #[tracing::instrument(level = "debug", skip_all, fields(references = references.len(), candidates = candidates.len()))]
    pub async fn run(
        &self,
        references: &[ImageFile],
        candidates: &[ImageFile],
        options: BatchOptions,
        sink: &mut dyn EventSink,
    ) -> Result<BatchRun, BatchError> {
        if references.is_empty() {
            sink.log(LogLevel::Error, "No reference images selected".into());
            return Err(BatchError::NoReferences);
        }
        if candidates.is_empty() {
            sink.log(LogLevel::Error, "No photos selected for searching".into());
            return Err(BatchError::NoCandidates);
        }

        let mut run = BatchRun::new(candidates.len(), options);
        tracing::info!(run = %run.id, "batch run started");

        sink.log(LogLevel::Info, "Starting face matching process...".into());
        sink.log(
            LogLevel::Info,
            format!(
                "Settings: Tolerance={}, Detector={}, Enhancement={}",
                options.tolerance,
                match options.detector_mode {
                    DetectorMode::Accurate => "accurate",
                    DetectorMode::Fast => "fast",
                },
                options.enhance
            ),
        );
        if options.enhance && self.enhancer.is_none() {
            sink.log(
                LogLevel::Warning,
                "Enhancement requested but no enhancer is configured; keeping originals".into(),
            );
        }

        run.status = RunStatus::BuildingReferences;
        let reference_set = match self.build_reference_set(references, options, sink).await {
            Ok(set) => set,
            Err(_) => {
                run.finish(RunStatus::Aborted);
                sink.log(
                    LogLevel::Error,
                    "Error during processing: No faces found in any reference image!".into(),
                );
                tracing::warn!(run = %run.id, "batch run aborted: empty reference set");
                return Err(BatchError::ReferenceSetEmpty { run: Box::new(run) });
            }
        };
        run.reference_count = reference_set.len();
        sink.log(
            LogLevel::Success,
            format!("Total reference faces loaded: {}", reference_set.len()),
        );

        run.status = RunStatus::Running;
        for (index, candidate) in candidates.iter().enumerate() {
            if self.cancelled() {
                sink.log(
                    LogLevel::Warning,
                    format!(
                        "Processing cancelled after {} of {} photos",
                        run.processed, run.total
                    ),
                );
                run.finish(RunStatus::Cancelled);
                break;
            }

            let current = index + 1;
            sink.emit(RunEvent::Progress {
                current,
                total: run.total,
            });
            sink.log(
                LogLevel::Info,
                format!("[{current}/{}] Processing: {}", run.total, candidate.name()),
            );

            if let Some(record) = self
                .process_candidate(index, candidate, &reference_set, options, sink)
                .await
            {
                run.matches.push(record);
                run.match_count += 1;
            }
            run.processed += 1;
        }

        if !run.status.is_terminal() {
            run.finish(RunStatus::Completed);
            self.log_completion(&run, sink);
        }

        tracing::info!(
            run = %run.id,
            status = ?run.status,
            processed = run.processed,
            matches = run.match_count,
            "batch run finished"
        );
        sink.emit(RunEvent::Summary(run.summary()));
        Ok(run)
    }

    /// First face of every reference photo, in input order.
    async fn build_reference_set(
        &self,
        references: &[ImageFile],
        options: BatchOptions,
        sink: &mut dyn EventSink,
    ) -> Result<ReferenceSet, facesift_core::ReferenceSetEmpty> {
        sink.log(LogLevel::Info, "Loading reference images...".into());

        let mut descriptors: Vec<Descriptor> = Vec::new();
        for (i, image) in references.iter().enumerate() {
            let number = i + 1;
            match self.provider.detect(image, options.detector_mode).await {
                Ok(detections) => {
                    let found = detections.len();
                    match detections.into_iter().next() {
                        Some(first) => {
                            descriptors.push(first.descriptor);
                            sink.log(
                                LogLevel::Success,
                                format!("Found {found} face(s) in reference image {number}"),
                            );
                        }
                        None => sink.log(
                            LogLevel::Warning,
                            format!("No face found in reference image {number}"),
                        ),
                    }
                }
                Err(err) => {
                    tracing::debug!(image = image.name(), error = %err, "reference image failed");
                    sink.log(
                        LogLevel::Warning,
                        format!("No face found in reference image {number} ({err})"),
                    );
                }
            }
        }

        ReferenceSet::new(descriptors)
    }

    /// Match one candidate. Never fails: every problem becomes a log line.
    async fn process_candidate(
        &self,
        index: usize,
        candidate: &ImageFile,
        reference_set: &ReferenceSet,
        options: BatchOptions,
        sink: &mut dyn EventSink,
    ) -> Option<MatchRecord> {
        let detections = match self.provider.detect(candidate, options.detector_mode).await {
            Ok(detections) => detections,
            Err(err) => {
                tracing::debug!(image = candidate.name(), error = %err, "candidate failed");
                sink.log(LogLevel::Error, format!("  Error: {err}"));
                return None;
            }
        };

        if detections.is_empty() {
            sink.log(LogLevel::Warning, "  No faces detected".into());
            return None;
        }

        let descriptors: Vec<Descriptor> = detections.into_iter().map(|d| d.descriptor).collect();
        let outcome = self
            .matcher
            .match_candidate(&descriptors, reference_set, options.tolerance);
        tracing::debug!(
            image = candidate.name(),
            faces = descriptors.len(),
            matched = outcome.matched,
            best_distance = outcome.best_distance,
            "candidate matched"
        );

        if !outcome.matched {
            sink.log(
                LogLevel::Info,
                format!("  No match (best: {:.1}%)", outcome.confidence()),
            );
            return None;
        }

        sink.log(
            LogLevel::Success,
            format!("  MATCH FOUND - Confidence: {:.1}%", outcome.confidence()),
        );
        let mut record = MatchRecord::new(index, candidate.clone(), &outcome);

        if options.enhance {
            if let Some(enhancer) = &self.enhancer {
                sink.log(LogLevel::Info, "  Enhancing image...".into());
                match enhance_blocking(Arc::clone(enhancer), candidate.clone()).await {
                    Ok(enhanced) => {
                        record.enhanced = Some(enhanced);
                        sink.log(LogLevel::Success, "  Enhancement complete".into());
                    }
                    Err(err) => sink.log(
                        LogLevel::Warning,
                        format!("  Enhancement failed, keeping original: {err}"),
                    ),
                }
            }
        }

        Some(record)
    }

    fn log_completion(&self, run: &BatchRun, sink: &mut dyn EventSink) {
        let rule = "=".repeat(50);
        sink.log(LogLevel::Info, rule.clone());
        sink.log(LogLevel::Success, "PROCESSING COMPLETE!".into());
        sink.log(LogLevel::Info, rule);
        sink.log(
            LogLevel::Info,
            format!("Total photos processed: {}", run.processed),
        );
        sink.log(LogLevel::Success, format!("Matches found: {}", run.match_count));
        if run.options.enhance {
            sink.log(
                LogLevel::Success,
                format!("Photos enhanced: {}", run.enhanced_count()),
            );
        }
        sink.log(
            LogLevel::Info,
            format!("Success rate: {:.1}%", run.success_rate() * 100.0),
        );
    }
}

/// Decode, filter and re-encode off the async workers.
async fn enhance_blocking(
    enhancer: Arc<dyn Enhancer + Send + Sync>,
    image: ImageFile,
) -> Result<ImageFile, String> {
    match tokio::task::spawn_blocking(move || enhancer.enhance(&image)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(join) => Err(format!("enhancer panicked: {join}")),
    }
}
