mod build;
mod content;
mod delete;
mod install;
mod link;
mod log_tail;
mod purge;
mod state;

pub use build::BuildImageJob;
pub use content::ContentJob;
pub use delete::DeleteJob;
pub use install::InstallJob;
pub use link::LinkJob;
pub use log_tail::LogJob;
pub use purge::PurgeJob;
pub use state::{StartedJob, StoppedJob};

use crate::id::Identifier;
use crate::port::{Port, PortPairs};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstallRequest {
    pub id: Identifier,
    pub image: String,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub ports: PortPairs,
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StartedRequest {
    pub id: Identifier,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoppedRequest {
    pub id: Identifier,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteRequest {
    pub id: Identifier,
}

/// One hop of a container-to-container network link.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NetworkLink {
    pub from_host: String,
    pub from_port: Port,
    pub to_host: String,
    pub to_port: Port,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContainerLink {
    pub id: Identifier,
    pub network_links: Vec<NetworkLink>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkRequest {
    pub links: Vec<ContainerLink>,
}

pub const DEFAULT_LOG_LINES: u32 = 30;
pub const DEFAULT_LOG_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogRequest {
    pub id: Identifier,
    #[serde(default)]
    pub lines: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BuildImageRequest {
    pub name: Identifier,
    pub source: String,
    pub base_image: String,
    pub tag: String,
    #[serde(default)]
    pub runtime_image: Option<String>,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub verbose: bool,
}

/// What a content request retrieves.
pub const CONTENT_TYPE_ENVIRONMENT: &str = "env";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContentRequest {
    pub content_type: String,
    pub locator: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PurgeRequest {}
