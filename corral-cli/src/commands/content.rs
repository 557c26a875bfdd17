use std::ffi::OsString;

use corral::containers::jobs::{ContentRequest, CONTENT_TYPE_ENVIRONMENT};
use corral::job::Request;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id};

pub const USAGE: &str = "corral content <locator>... [--type <kind>] [--transport <name>]";

/// Retrieve a piece of container content, by default the environment file.
pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut transport = String::from(crate::context::DEFAULT_TRANSPORT);
    let mut targets: Vec<String> = Vec::new();
    let mut content_type = String::from(CONTENT_TYPE_ENVIRONMENT);

    while let Some(arg) = parser.next()? {
        match arg {
            Long("transport") => transport = parser.value()?.string()?,
            Long("type") => content_type = parser.value()?.string()?,
            Value(value) => targets.push(value.string()?),
            arg => return Err(anyhow::Error::from(arg.unexpected())),
        }
    }

    let mut ctx = context(&transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, &targets)?;

    Ok(executor(&mut ctx, on).run_each(&|locator| {
        Request::Content(ContentRequest {
            content_type: content_type.clone(),
            locator: target_id(locator).to_string(),
        })
    }))
}
