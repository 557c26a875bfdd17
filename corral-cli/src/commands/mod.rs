pub mod authkeys;
pub mod build;
pub mod content;
pub mod delete;
pub mod install;
pub mod keys;
pub mod link;
pub mod log_tail;
pub mod purge;
pub mod repo;
pub mod start;
pub mod stop;

use std::ffi::OsString;

use anyhow::anyhow;

use corral::id::Identifier;
use corral::transport::{ResourceKind, ResourceLocator, Transport};

use crate::context::Context;
use crate::executor::Executor;
use crate::streamer::Stdout;

/// Parse the target arguments of a command into resource locators.
pub(crate) fn parse_targets(
    ctx: &Context,
    kind: ResourceKind,
    values: &[String],
) -> anyhow::Result<Vec<ResourceLocator>> {
    if values.is_empty() {
        return Err(anyhow!("one or more targets must be specified"));
    }
    values
        .iter()
        .map(|value| {
            ResourceLocator::parse(ctx.transport.as_ref(), kind, value)
                .map_err(|e| anyhow!("'{value}': {e}"))
        })
        .collect()
}

/// The identifier a target was parsed with.
pub(crate) fn target_id(locator: &ResourceLocator) -> Identifier {
    locator.identifier().clone()
}

/// Build the executor every command dispatches through.
pub(crate) fn executor<'a>(ctx: &'a mut Context, on: Vec<ResourceLocator>) -> Executor<'a> {
    Executor {
        on,
        transport: ctx.transport.as_ref(),
        local_init: Box::new(&mut ctx.local_init),
        output: &Stdout,
    }
}

/// Read one `--transport`-aware value argument list: positionals plus the
/// transport name.
pub(crate) struct CommonOptions {
    pub transport: String,
    pub values: Vec<String>,
}

impl CommonOptions {
    /// Parse a command line of plain positionals, rejecting unknown flags.
    pub fn from_args(args: Vec<OsString>) -> anyhow::Result<Self> {
        use lexopt::prelude::*;

        let mut parser = lexopt::Parser::from_args(args);
        let mut options = Self {
            transport: String::from(crate::context::DEFAULT_TRANSPORT),
            values: Vec::new(),
        };
        while let Some(arg) = parser.next()? {
            match arg {
                Long("transport") => options.transport = parser.value()?.string()?,
                Value(value) => options.values.push(value.string()?),
                arg => return Err(anyhow::Error::from(arg.unexpected())),
            }
        }
        Ok(options)
    }
}
