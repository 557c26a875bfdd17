pub mod dispatch;
mod error;
mod registry;
mod response;

pub use dispatch::{Dispatcher, Work};
pub use error::{ItemFailure, JobError};
pub use registry::Registry;
pub use response::{Response, ResponseCode};

use std::fmt;

use crossbeam_channel as chan;

use crate::containers::jobs::{
    BuildImageRequest, ContentRequest, DeleteRequest, InstallRequest, LinkRequest, LogRequest,
    PurgeRequest, StartedRequest, StoppedRequest,
};
use crate::git::CreateRepositoryRequest;
use crate::ssh::CreateKeysRequest;

/// Discriminates request kinds in the registry and on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Install,
    Started,
    Stopped,
    Delete,
    Link,
    Log,
    BuildImage,
    Content,
    CreateRepository,
    CreateKeys,
    Purge,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Delete => "delete",
            Self::Link => "link",
            Self::Log => "log",
            Self::BuildImage => "build-image",
            Self::Content => "content",
            Self::CreateRepository => "create-repository",
            Self::CreateKeys => "create-keys",
            Self::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// The typed catalogue of operator requests. Each variant carries enough for
/// both local execution and remote marshalling; which kinds are actually
/// runnable is decided by the handlers registered in a [`Registry`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Request {
    Install(InstallRequest),
    Started(StartedRequest),
    Stopped(StoppedRequest),
    Delete(DeleteRequest),
    Link(LinkRequest),
    Log(LogRequest),
    BuildImage(BuildImageRequest),
    Content(ContentRequest),
    CreateRepository(CreateRepositoryRequest),
    CreateKeys(CreateKeysRequest),
    Purge(PurgeRequest),
}

impl Request {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Install(_) => Kind::Install,
            Self::Started(_) => Kind::Started,
            Self::Stopped(_) => Kind::Stopped,
            Self::Delete(_) => Kind::Delete,
            Self::Link(_) => Kind::Link,
            Self::Log(_) => Kind::Log,
            Self::BuildImage(_) => Kind::BuildImage,
            Self::Content(_) => Kind::Content,
            Self::CreateRepository(_) => Kind::CreateRepository,
            Self::CreateKeys(_) => Kind::CreateKeys,
            Self::Purge(_) => Kind::Purge,
        }
    }
}

/// A runnable unit of work against the local host. `execute` is the sole
/// entry point; the remaining methods are optional capabilities.
pub trait Job: Send {
    fn execute(&self, resp: &mut dyn Response);

    /// Pre-execution validation. A job whose check fails is never executed.
    fn check(&self) -> Result<(), JobError> {
        Ok(())
    }

    /// Whether this job may bypass admission queueing.
    fn fast(&self) -> bool {
        false
    }

    /// Offer to deduplicate against an inflight twin. Returning true means
    /// the caller should wait for `complete` instead of running this job.
    fn join(&self, other: &Request, complete: &chan::Receiver<()>) -> Result<bool, JobError> {
        let _ = (other, complete);
        Ok(false)
    }
}

/// Correlates a request across hosts and log lines.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RequestId([u8; 16]);

impl RequestId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        for b in &mut bytes {
            *b = fastrand::u8(..);
        }
        Self(bytes)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({self})")
    }
}
