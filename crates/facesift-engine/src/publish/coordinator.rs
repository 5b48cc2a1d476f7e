//! Ordered fallback over hosting services.

use super::archive::ArchiveError;
use super::hosting::{HostedLink, HostingService};
use crate::events::{EventSink, LogLevel};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// What happened when one service was tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Uploaded { url: String, expiry: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostingAttempt {
    pub service: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct Published {
    pub link: HostedLink,
    /// Every attempt in order, the successful one last.
    pub attempts: Vec<HostingAttempt>,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("no matched photos to publish")]
    NothingToPublish,
    #[error("failed to build archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("all {} upload services failed", .attempts.len())]
    AllServicesFailed { attempts: Vec<HostingAttempt> },
    #[error("failed to write archive: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// What the user can do instead.
    pub fn guidance(&self) -> &'static str {
        match self {
            PublishError::AllServicesFailed { .. } => {
                "Save the archive locally and share it through Google Drive, \
                 Dropbox or WeTransfer, or try again in a few minutes."
            }
            PublishError::NothingToPublish => "Run a search that finds at least one match first.",
            PublishError::Archive(_) | PublishError::Io(_) => {
                "Check free disk space and memory, then try again."
            }
        }
    }
}

/// Upload `blob` to each service in order until one succeeds.
///
/// Every service is tried at most once; services after the first success are
/// never contacted.
pub async fn publish(
    blob: &[u8],
    suggested_name: &str,
    services: &[Arc<dyn HostingService>],
    sink: &mut dyn EventSink,
) -> Result<Published, PublishError> {
    let mut attempts = Vec::with_capacity(services.len());

    for service in services {
        let name = service.name().to_string();
        sink.log(LogLevel::Info, format!("Uploading to {name}..."));

        match service.upload(blob, suggested_name).await {
            Ok(link) => {
                tracing::info!(service = %name, url = %link.url, "archive published");
                sink.log(LogLevel::Success, format!("Uploaded to {name}"));
                attempts.push(HostingAttempt {
                    service: name,
                    outcome: AttemptOutcome::Uploaded {
                        url: link.url.clone(),
                        expiry: link.expiry.clone(),
                    },
                });
                return Ok(Published { link, attempts });
            }
            Err(err) => {
                tracing::warn!(service = %name, error = %err, "upload failed");
                sink.log(LogLevel::Warning, format!("{name} failed: {err}"));
                attempts.push(HostingAttempt {
                    service: name,
                    outcome: AttemptOutcome::Failed {
                        reason: err.to_string(),
                    },
                });
            }
        }
    }

    let err = PublishError::AllServicesFailed { attempts };
    sink.log(LogLevel::Error, format!("Upload failed: {err}"));
    sink.log(LogLevel::Info, err.guidance().to_string());
    Err(err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::RunEvent;
    use crate::publish::hosting::UploadError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Service that succeeds or fails on demand and counts its calls.
    pub(crate) struct FakeService {
        name: &'static str,
        succeed: bool,
        pub calls: AtomicUsize,
    }

    impl FakeService {
        pub(crate) fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                succeed: true,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                succeed: false,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HostingService for FakeService {
        fn name(&self) -> &str {
            self.name
        }

        async fn upload(
            &self,
            blob: &[u8],
            suggested_name: &str,
        ) -> Result<HostedLink, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(HostedLink {
                    service: self.name.to_string(),
                    url: format!("https://{}/{suggested_name}?len={}", self.name, blob.len()),
                    expiry: "1 hour".into(),
                })
            } else {
                Err(UploadError::Rejected(format!("{} is down", self.name)))
            }
        }
    }

    fn chain(services: &[&Arc<FakeService>]) -> Vec<Arc<dyn HostingService>> {
        services
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn HostingService>)
            .collect()
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = FakeService::failing("a");
        let b = FakeService::ok("b");
        let c = FakeService::ok("c");
        let mut events: Vec<RunEvent> = Vec::new();

        let published = publish(b"zip", "out.zip", &chain(&[&a, &b, &c]), &mut events)
            .await
            .unwrap();

        assert_eq!(published.link.service, "b");
        assert_eq!(published.link.url, "https://b/out.zip?len=3");
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));
        assert_eq!(published.attempts.len(), 2);
        assert_eq!(
            published.attempts[1],
            HostingAttempt {
                service: "b".into(),
                outcome: AttemptOutcome::Uploaded {
                    url: "https://b/out.zip?len=3".into(),
                    expiry: "1 hour".into(),
                },
            }
        );
        assert!(matches!(
            published.attempts[0].outcome,
            AttemptOutcome::Failed { ref reason } if reason.contains("a is down")
        ));
        assert!(events
            .iter()
            .filter_map(RunEvent::as_log)
            .any(|l| l.level == LogLevel::Warning && l.message.starts_with("a failed")));
    }

    #[tokio::test]
    async fn test_all_fail_tries_each_once() {
        let a = FakeService::failing("a");
        let b = FakeService::failing("b");
        let c = FakeService::failing("c");
        let mut events: Vec<RunEvent> = Vec::new();

        let err = publish(b"zip", "out.zip", &chain(&[&a, &b, &c]), &mut events)
            .await
            .unwrap_err();

        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
        match &err {
            PublishError::AllServicesFailed { attempts } => {
                let names: Vec<&str> = attempts.iter().map(|a| a.service.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.guidance().contains("Google Drive"));
        let warnings = events
            .iter()
            .filter_map(RunEvent::as_log)
            .filter(|l| l.level == LogLevel::Warning)
            .count();
        assert_eq!(warnings, 3);
    }

    #[test]
    fn test_attempt_json_carries_expiry() {
        let attempt = HostingAttempt {
            service: "0x0.st".into(),
            outcome: AttemptOutcome::Uploaded {
                url: "https://0x0.st/abc.zip".into(),
                expiry: "24 hours".into(),
            },
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["outcome"], "uploaded");
        assert_eq!(json["url"], "https://0x0.st/abc.zip");
        assert_eq!(json["expiry"], "24 hours");
    }

    #[tokio::test]
    async fn test_empty_chain_is_aggregate_failure() {
        let mut events: Vec<RunEvent> = Vec::new();
        let err = publish(b"zip", "out.zip", &[], &mut events)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::AllServicesFailed { ref attempts } if attempts.is_empty()));
    }
}
