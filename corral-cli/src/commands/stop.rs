use std::ffi::OsString;

use corral::containers::jobs::StoppedRequest;
use corral::job::Request;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id, CommonOptions};

pub const USAGE: &str = "corral stop <locator>... [--transport <name>]";

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    let options = CommonOptions::from_args(args)?;
    let mut ctx = context(&options.transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, &options.values)?;

    Ok(executor(&mut ctx, on).run_each(&|locator| {
        Request::Stopped(StoppedRequest {
            id: target_id(locator),
        })
    }))
}
