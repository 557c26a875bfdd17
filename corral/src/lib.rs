pub mod config;
pub mod containers;
pub mod ext;
pub mod fsutil;
pub mod git;
pub mod id;
pub mod job;
pub mod port;
pub mod ssh;
pub mod sysd;
pub mod transport;
#[cfg(any(test, feature = "test"))]
pub mod test;

pub use id::Identifier;
pub use port::{Port, PortPair, PortPairs};

pub mod prelude {
    use super::*;

    pub use id::{Fingerprint, Identifier};
    pub use job::{Job, JobError, Registry, Request, Response, ResponseCode};
    pub use port::{Port, PortPair, PortPairs};
    pub use transport::{Locator, ResourceLocator, Transport};
}
