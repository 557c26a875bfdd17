use std::sync::Arc;

use corral::config;
use corral::containers;
use corral::ext::{Extensions, InitError, WHEN_LOCAL};
use corral::git;
use corral::port::{Port, PortAllocator};
use corral::ssh;
use corral::transport::http::HttpTransport;
use corral::transport::{LocalTransport, Transport};

/// Name of the default transport.
pub const DEFAULT_TRANSPORT: &str = "http";

/// External port range leased by local installs.
pub const PORT_RANGE: (u16, u16) = (4000, 60000);

/// Everything a command needs: the composite transport, the SSH handler
/// tables, and the deferred local initialization hook.
pub struct Context {
    pub transport: Arc<dyn Transport>,
    pub handlers: Arc<ssh::Handlers>,
    pub local_init: Box<dyn FnMut() -> Result<(), InitError>>,
}

/// Assemble the compiled-in subsystems and select a transport. This is the
/// one place that names the subsystems; the core only sees the registries
/// they populate.
pub fn context(transport_name: &str) -> anyhow::Result<Context> {
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
    ssh::extend(&mut ext, handlers.clone());

    let remotes = Arc::new(std::mem::take(&mut ext.remotes));
    ext.register_transport(DEFAULT_TRANSPORT, Arc::new(HttpTransport::new(remotes)));

    let remote = ext.transport(transport_name)?;
    let registry = Arc::new(std::mem::take(&mut ext.jobs));
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new(registry, remote));

    let local_init = Box::new(move || ext.initialize(&[WHEN_LOCAL]));

    Ok(Context {
        transport,
        handlers,
        local_init,
    })
}
