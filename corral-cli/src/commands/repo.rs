use std::ffi::OsString;

use anyhow::anyhow;

use corral::git::CreateRepositoryRequest;
use corral::job::Request;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id, CommonOptions};

pub const USAGE: &str = "corral create-repo <locator> [<clone-url>] [--transport <name>]";

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    let mut options = CommonOptions::from_args(args)?;
    if options.values.is_empty() || options.values.len() > 2 {
        return Err(anyhow!("usage: {USAGE}"));
    }
    let clone_url = (options.values.len() == 2).then(|| options.values.remove(1));

    let mut ctx = context(&options.transport)?;
    let on = parse_targets(&ctx, ResourceKind::Repository, &options.values)?;

    Ok(executor(&mut ctx, on).run_each(&|locator| {
        Request::CreateRepository(CreateRepositoryRequest {
            id: target_id(locator),
            clone_url: clone_url.clone(),
        })
    }))
}
