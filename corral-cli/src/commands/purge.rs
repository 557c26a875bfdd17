use std::ffi::OsString;

use corral::containers::jobs::PurgeRequest;
use corral::job::Request;
use corral::transport::{Locator, ResourceLocator};

use crate::context::context;

use super::{executor, CommonOptions};

pub const USAGE: &str = "corral purge [<host>...] [--transport <name>]";

/// Remove every container on the named hosts, defaulting to the local one.
/// Purge is local-only: naming a remote host reports that the action cannot
/// run against a remote server.
pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    let options = CommonOptions::from_args(args)?;
    let mut ctx = context(&options.transport)?;

    let on: Vec<ResourceLocator> = if options.values.is_empty() {
        vec![ResourceLocator::host_only(Locator::Local)]
    } else {
        options
            .values
            .iter()
            .map(|value| Ok(ResourceLocator::host_only(ctx.transport.locator_for(value)?)))
            .collect::<Result<_, corral::job::JobError>>()?
    };

    Ok(executor(&mut ctx, on).run(&|_| Request::Purge(PurgeRequest::default())))
}
