use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use facesift_core::{confidence, DetectorMode, ImageFile, Tolerance};
use facesift_engine::publish::{hosting_chain, ArchiveVariant, HostKind};
use facesift_engine::{
    spawn_engine, BatchError, Config, EngineHandle, EventSink, LogLevel, RunStatus, Session,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod console;

use console::ConsoleSink;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff", "gif"];

#[derive(Parser)]
#[command(name = "facesift", about = "Find a person across a pile of photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search candidate photos for the person in the reference photos
    Run {
        /// Reference photo of the person (repeatable)
        #[arg(short, long = "reference", required = true)]
        references: Vec<PathBuf>,
        /// Photos or directories of photos to search
        #[arg(required = true)]
        candidates: Vec<PathBuf>,
        /// Match tolerance in [0, 1]; lower is stricter
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Use the faster, less accurate detector setting
        #[arg(long)]
        fast: bool,
        /// Enhance matched photos
        #[arg(long)]
        enhance: bool,
        /// Save a zip of the matches into this directory
        #[arg(long, value_name = "DIR")]
        save: Option<PathBuf>,
        /// Upload a zip of the matches (original or enhanced) and print the link
        #[arg(long, value_name = "VARIANT")]
        share: Option<ArchiveVariant>,
        /// Hosting service to try, in order (repeatable; default from FACESIFT_HOSTS)
        #[arg(long = "host")]
        hosts: Vec<HostKind>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show the distance between the most prominent faces of two photos
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(long)]
        fast: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    match cli.command {
        Commands::Run {
            references,
            candidates,
            tolerance,
            fast,
            enhance,
            save,
            share,
            hosts,
            json,
        } => {
            if let Some(t) = tolerance {
                config.tolerance = Tolerance::new(t).context("invalid --tolerance")?;
            }
            if fast {
                config.accurate = false;
            }
            if enhance {
                config.enhance = true;
            }
            if !hosts.is_empty() {
                config.hosts = hosts;
            }
            run(&config, &references, &candidates, save, share, json).await
        }
        Commands::Compare { a, b, fast } => {
            if fast {
                config.accurate = false;
            }
            compare(&config, &a, &b).await
        }
    }
}

async fn run(
    config: &Config,
    references: &[PathBuf],
    candidates: &[PathBuf],
    save: Option<PathBuf>,
    share: Option<ArchiveVariant>,
    json: bool,
) -> Result<()> {
    let mut sink = ConsoleSink::new(json);

    let (references, unreadable) = load_images(references);
    for err in unreadable {
        sink.log(LogLevel::Warning, format!("Skipping reference photo: {err:#}"));
    }
    let (candidates, unreadable) = load_images(candidates);
    for err in unreadable {
        sink.log(LogLevel::Error, format!("Skipping photo: {err:#}"));
    }
    if references.is_empty() {
        bail!("no readable reference photos");
    }
    if candidates.is_empty() {
        bail!("no photos found to search");
    }

    let engine = start_engine(config)?;
    let mut session = Session::new(Arc::new(engine)).with_archive_options(config.archive_options());

    let cancel = session.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupt received, stopping after the current photo");
        cancel.store(true, Ordering::Relaxed);
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("second interrupt, exiting");
            std::process::exit(130);
        }
    });

    let run = match session
        .start(&references, &candidates, config.batch_options(), &mut sink)
        .await
    {
        Ok(run) => run,
        Err(err @ BatchError::ReferenceSetEmpty { .. }) => {
            bail!("{err}; try clearer, front-facing reference photos")
        }
        Err(err) => return Err(err.into()),
    };

    if !json {
        for record in &run.matches {
            println!("{:>6.1}%  {}", record.confidence, record.name());
        }
    }
    if run.matches.is_empty() {
        return Ok(());
    }
    if !exports_results(run.status) && (save.is_some() || share.is_some()) {
        sink.log(
            LogLevel::Warning,
            "Run was cancelled; partial matches are not saved or shared".into(),
        );
        return Ok(());
    }

    if let Some(dir) = save {
        let variant = share.unwrap_or_default();
        let path = session
            .save_archive(variant, &dir)
            .with_context(|| format!("failed to save archive into {}", dir.display()))?;
        println!("Saved {}", path.display());
    }

    if let Some(variant) = share {
        let services = hosting_chain(&config.hosts, config.upload_timeout())?;
        match session.publish(variant, &services, &mut sink).await {
            Ok(published) => {
                if json {
                    println!("{}", serde_json::to_string(&published)?);
                } else {
                    println!(
                        "{} (via {}, expires in {})",
                        published.link.url, published.link.service, published.link.expiry
                    );
                }
            }
            Err(err) => {
                eprintln!("{}", err.guidance());
                return Err(err.into());
            }
        }
    }

    Ok(())
}

async fn compare(config: &Config, a: &Path, b: &Path) -> Result<()> {
    let (images, unreadable) = load_images(&[a.to_path_buf(), b.to_path_buf()]);
    if let Some(err) = unreadable.into_iter().next() {
        return Err(err);
    }
    if images.len() != 2 {
        bail!("compare needs exactly two photos");
    }
    let engine = start_engine(config)?;
    let mode = config.detector_mode();

    let mut descriptors = Vec::with_capacity(2);
    for image in images {
        let detections = engine
            .analyze(image.clone(), mode)
            .await
            .with_context(|| format!("failed to analyze {}", image.name()))?;
        println!("{}: {} face(s)", image.name(), detections.len());
        match detections.into_iter().next() {
            Some(first) => descriptors.push(first.descriptor),
            None => bail!("no face found in {}", image.name()),
        }
    }

    let distance = descriptors[0].distance(&descriptors[1]);
    let tolerance = config.tolerance;
    println!("distance:   {distance:.4}");
    println!("confidence: {:.1}%", confidence(distance.min(1.0)));
    println!(
        "verdict:    {} at tolerance {tolerance}",
        if tolerance.accepts(distance) { "same person" } else { "different people" }
    );
    Ok(())
}

fn start_engine(config: &Config) -> Result<EngineHandle> {
    let mode = match config.detector_mode() {
        DetectorMode::Accurate => "accurate",
        DetectorMode::Fast => "fast",
    };
    tracing::info!(model_dir = %config.model_dir.display(), mode, "starting face engine");
    spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path()).with_context(|| {
        format!(
            "could not load face models from {} (set FACESIFT_MODEL_DIR)",
            config.model_dir.display()
        )
    })
}

/// Only a run that went through every photo is saved or shared.
fn exports_results(status: RunStatus) -> bool {
    status == RunStatus::Completed
}

/// Load files as given and image files found directly inside directories,
/// preserving argument order and sorting each directory by name.
///
/// Unreadable files and directories are returned as errors next to the
/// images that did load.
fn load_images(paths: &[PathBuf]) -> (Vec<ImageFile>, Vec<anyhow::Error>) {
    let mut images = Vec::new();
    let mut unreadable = Vec::new();

    for path in paths {
        if !path.is_dir() {
            load_into(path, &mut images, &mut unreadable);
            continue;
        }
        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) => {
                unreadable
                    .push(anyhow!(err).context(format!("failed to read directory {}", path.display())));
                continue;
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        files.sort();
        for file in &files {
            load_into(file, &mut images, &mut unreadable);
        }
    }
    (images, unreadable)
}

fn load_into(path: &Path, images: &mut Vec<ImageFile>, unreadable: &mut Vec<anyhow::Error>) {
    match ImageFile::load(path) {
        Ok(image) => images.push(image),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "unreadable photo");
            unreadable.push(anyhow!(err));
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "facesift", "run", "-r", "me.jpg", "-r", "me2.jpg", "photos/", "extra.png",
            "--tolerance", "0.6", "--share", "enhanced", "--host", "0x0", "--fast",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                references,
                candidates,
                tolerance,
                share,
                hosts,
                fast,
                enhance,
                ..
            } => {
                assert_eq!(references.len(), 2);
                assert_eq!(candidates, vec![PathBuf::from("photos/"), PathBuf::from("extra.png")]);
                assert_eq!(tolerance, Some(0.6));
                assert_eq!(share, Some(ArchiveVariant::Enhanced));
                assert_eq!(hosts, vec![HostKind::ZeroXZero]);
                assert!(fast);
                assert!(!enhance);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_requires_reference() {
        assert!(Cli::try_parse_from(["facesift", "run", "photos/"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_host() {
        assert!(Cli::try_parse_from(["facesift", "run", "-r", "a.jpg", "b.jpg", "--host", "dropbox"]).is_err());
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("a/B.JPG")));
        assert!(is_image(Path::new("x.webp")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("README")));
    }

    #[test]
    fn test_load_images_scans_directories_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.png", "skip.txt"] {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let single = dir.path().join("b.jpg");

        let (images, unreadable) = load_images(&[single, dir.path().to_path_buf()]);
        let names: Vec<&str> = images.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["b.jpg", "a.png", "b.jpg"]);
        assert!(unreadable.is_empty());
    }

    #[test]
    fn test_load_images_skips_unreadable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.jpg");
        std::fs::write(&good, b"jpeg").unwrap();
        let gone = dir.path().join("gone.jpg");
        let no_dir = dir.path().join("missing").join("photos");

        let (images, unreadable) = load_images(&[gone, good.clone(), no_dir, good]);

        let names: Vec<&str> = images.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["good.jpg", "good.jpg"]);
        assert_eq!(unreadable.len(), 2);
        assert!(format!("{:#}", unreadable[0]).contains("gone.jpg"));
    }

    #[test]
    fn test_only_completed_runs_export() {
        assert!(exports_results(RunStatus::Completed));
        assert!(!exports_results(RunStatus::Cancelled));
        assert!(!exports_results(RunStatus::Aborted));
    }
}
