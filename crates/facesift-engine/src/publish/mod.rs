//! Packaging matches into an archive and sharing it.

pub mod archive;
pub mod coordinator;
pub mod hosting;

pub use archive::{
    archive_name, ArchiveBuilder, ArchiveError, ArchiveOptions, ArchiveVariant, ZipArchiveBuilder,
};
pub use coordinator::{publish, AttemptOutcome, HostingAttempt, PublishError, Published};
pub use hosting::{
    hosting_chain, http_client, HostKind, HostedLink, HostingService, TmpFiles, UploadError,
    ZeroXZero,
};
