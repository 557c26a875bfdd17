use std::ffi::OsString;

use corral::containers::jobs::LogRequest;
use corral::job::Request;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id};

pub const USAGE: &str =
    "corral log <locator>... [--lines <n>] [--timeout <seconds>] [--transport <name>]";

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut transport = String::from(crate::context::DEFAULT_TRANSPORT);
    let mut targets: Vec<String> = Vec::new();
    let mut lines: Option<u32> = None;
    let mut timeout_secs: Option<u64> = None;

    while let Some(arg) = parser.next()? {
        match arg {
            Long("transport") => transport = parser.value()?.string()?,
            Long("lines") => lines = Some(parser.value()?.parse()?),
            Long("timeout") => timeout_secs = Some(parser.value()?.parse()?),
            Value(value) => targets.push(value.string()?),
            arg => return Err(anyhow::Error::from(arg.unexpected())),
        }
    }

    let mut ctx = context(&transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, &targets)?;

    Ok(executor(&mut ctx, on).run_each(&|locator| {
        Request::Log(LogRequest {
            id: target_id(locator),
            lines,
            timeout_secs,
        })
    }))
}
