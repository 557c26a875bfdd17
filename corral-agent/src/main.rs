use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tower_http::trace::TraceLayer;

use corral::config;
use corral::containers;
use corral::ext::{Extensions, WHEN_DAEMON};
use corral::git;
use corral::job::{dispatch, Dispatcher};
use corral::port::{Port, PortAllocator};
use corral::ssh;

use corral_agent::api;

pub const HELP: &str = "\
corrald: the per-host container agent

Usage: corrald [--listen <addr>] [--key-path <dir>]

Options:
    --listen <addr>     Address to listen on (default 0.0.0.0:43273)
    --key-path <dir>    Directory holding the token keys
    --help              Print this help
";

/// External port range the daemon leases installs from.
const PORT_RANGE: (u16, u16) = (4000, 60000);

struct Options {
    listen: SocketAddr,
    key_path: Option<PathBuf>,
}

impl Options {
    fn from_env() -> anyhow::Result<Self> {
        use lexopt::prelude::*;

        let mut parser = lexopt::Parser::from_env();
        let mut listen: SocketAddr = ([0, 0, 0, 0], corral::transport::http::DEFAULT_HTTP_PORT).into();
        let mut key_path = None;

        while let Some(arg) = parser.next()? {
            match arg {
                Long("listen") => {
                    let value = parser.value()?.string()?;
                    listen = value
                        .parse()
                        .with_context(|| format!("invalid listen address '{value}'"))?;
                }
                Long("key-path") => key_path = Some(PathBuf::from(parser.value()?.string()?)),
                Long("help") | Short('h') => {
                    print!("{HELP}");
                    std::process::exit(0);
                }
                arg => return Err(anyhow::Error::from(arg.unexpected())),
            }
        }
        Ok(Self { listen, key_path })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let options = Options::from_env()?;

    if let Some(path) = &options.key_path {
        // The encrypted-token envelope handler is an external subsystem; an
        // agent built without one cannot honor the flag.
        anyhow::bail!(
            "--key-path was given ({}) but no token handler is compiled into this agent",
            path.display()
        );
    }

    let mut handlers = ssh::Handlers::new();
    ssh::register_handlers(&mut handlers);
    git::register_permissions(&mut handlers);
    containers::register_authorized_keys(&mut handlers);
    let handlers = Arc::new(handlers);

    let allocator = Arc::new(PortAllocator::start(
        config::container_base_path(),
        Port::new(PORT_RANGE.0)?,
        Port::new(PORT_RANGE.1)?,
    ));

    let mut ext = Extensions::new(handlers.clone());
    containers::extend(&mut ext, allocator);
    git::extend(&mut ext);
    ssh::extend(&mut ext, handlers);

    // Initializer failures are fatal on the daemon path.
    ext.initialize(&[WHEN_DAEMON])?;

    let state = Arc::new(api::AppState {
        registry: Arc::new(std::mem::take(&mut ext.jobs)),
        dispatcher: Dispatcher::start(dispatch::Config::default()),
    });
    let app = api::router(std::mem::take(&mut ext.routes), state)
        .layer(TraceLayer::new_for_http());

    tracing::info!("listening for HTTP on {}", options.listen);
    axum::Server::bind(&options.listen)
        .serve(app.into_make_service())
        .await
        .context("the HTTP server terminated")
}
