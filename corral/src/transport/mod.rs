pub mod http;

use std::fmt;
use std::str::FromStr;

use crate::id::Identifier;
use crate::job::{Job, JobError, Request};
use crate::port::Port;

/// The literal that names the local sentinel.
pub const LOCAL: &str = "local";

/// A host reference. `Local` is the sentinel for in-process execution;
/// equality is structural and `identity` is the stable key batches are
/// grouped by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locator {
    Local,
    Remote(HostLocator),
}

impl Locator {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    pub fn identity(&self) -> String {
        match self {
            Self::Local => String::from(LOCAL),
            Self::Remote(host) => host.to_string(),
        }
    }
}

/// A hostname with an optional agent port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostLocator {
    pub host: String,
    pub port: Option<Port>,
}

impl fmt::Display for HostLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

impl FromStr for HostLocator {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || JobError::InvalidRequest(format!("the provided host is not valid '{s}'"));
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<Port>().map_err(|_| invalid())?;
                (host, Some(port))
            }
            None => (s, None),
        };
        if host.is_empty() || host.contains('/') || host.contains(':') {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// The layer that turns a `(locator, request)` pair into an executable job.
/// A transport may claim the literal `local` as the sentinel; everything
/// else resolves to a remote host.
pub trait Transport: Send + Sync {
    /// Parse a locator string.
    fn locator_for(&self, value: &str) -> Result<Locator, JobError>;

    /// Return a job that executes the request against the locator, either
    /// in-process or by remote dispatch. May fail with
    /// [`JobError::NotTransportable`] or [`JobError::NoJobForRequest`].
    fn remote_job_for(&self, locator: &Locator, request: Request) -> Result<Box<dyn Job>, JobError>;
}

/// Wraps a remote transport so that the `local` sentinel executes through
/// the in-process registry and everything else is delegated. This is what
/// lets one batch mix local and remote locators.
pub struct LocalTransport {
    registry: std::sync::Arc<crate::job::Registry>,
    remote: std::sync::Arc<dyn Transport>,
}

impl LocalTransport {
    pub fn new(
        registry: std::sync::Arc<crate::job::Registry>,
        remote: std::sync::Arc<dyn Transport>,
    ) -> Self {
        Self { registry, remote }
    }
}

impl Transport for LocalTransport {
    fn locator_for(&self, value: &str) -> Result<Locator, JobError> {
        if value == LOCAL {
            return Ok(Locator::Local);
        }
        self.remote.locator_for(value)
    }

    fn remote_job_for(&self, locator: &Locator, request: Request) -> Result<Box<dyn Job>, JobError> {
        match locator {
            Locator::Local => self.registry.job_for(request),
            remote => self.remote.remote_job_for(remote, request),
        }
    }
}

/// Which family of resources an identifier names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceKind {
    #[default]
    Container,
    Repository,
}

/// A host reference plus the resource it names, as given on the command
/// line: `[<host>[:<port>]/]<identifier>`. A missing host means local; a
/// missing identifier addresses the host itself, as purge does.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceLocator {
    pub host: Locator,
    pub id: Option<Identifier>,
    pub kind: ResourceKind,
}

impl ResourceLocator {
    pub fn host_only(host: Locator) -> Self {
        Self {
            host,
            id: None,
            kind: ResourceKind::default(),
        }
    }

    pub fn parse(
        transport: &dyn Transport,
        default_kind: ResourceKind,
        value: &str,
    ) -> Result<Self, JobError> {
        let (kind, rest) = match value.split_once("://") {
            Some(("ctr", rest)) => (ResourceKind::Container, rest),
            Some(("repo", rest)) => (ResourceKind::Repository, rest),
            Some((scheme, _)) => {
                return Err(JobError::InvalidRequest(format!(
                    "unknown resource type '{scheme}'"
                )))
            }
            None => (default_kind, value),
        };
        let (host, id) = match rest.rsplit_once('/') {
            Some((host, id)) => (transport.locator_for(host)?, id),
            None => (Locator::Local, rest),
        };
        let id = Identifier::new(id).map_err(|e| JobError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            host,
            id: Some(id),
            kind,
        })
    }

    /// The identifier this locator was parsed with. Panics on host-only
    /// locators, which only ever reach jobs that take no identifier.
    pub fn identifier(&self) -> &Identifier {
        self.id
            .as_ref()
            .expect("the locator was parsed with an identifier")
    }
}

/// Split a batch into the local group and one group per remote host,
/// preserving argument order within each group.
pub fn group_by_host(locators: &[ResourceLocator]) -> (Vec<ResourceLocator>, Vec<Vec<ResourceLocator>>) {
    let mut local = Vec::new();
    let mut remote: Vec<Vec<ResourceLocator>> = Vec::new();
    for locator in locators {
        if locator.host.is_local() {
            local.push(locator.clone());
            continue;
        }
        match remote
            .iter_mut()
            .find(|group| group[0].host == locator.host)
        {
            Some(group) => group.push(locator.clone()),
            None => remote.push(vec![locator.clone()]),
        }
    }
    (local, remote)
}
