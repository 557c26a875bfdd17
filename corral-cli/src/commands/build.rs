use std::ffi::OsString;

use anyhow::anyhow;

use corral::containers::jobs::BuildImageRequest;
use corral::job::Request;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id};

pub const USAGE: &str = "corral build-image <locator> <source> <base-image> <tag> \
                         [--runtime-image <image>] [--clean] [--verbose] [--transport <name>]";

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut transport = String::from(crate::context::DEFAULT_TRANSPORT);
    let mut positionals: Vec<String> = Vec::new();
    let mut runtime_image: Option<String> = None;
    let mut clean = false;
    let mut verbose = false;

    while let Some(arg) = parser.next()? {
        match arg {
            Long("transport") => transport = parser.value()?.string()?,
            Long("runtime-image") => runtime_image = Some(parser.value()?.string()?),
            Long("clean") => clean = true,
            Long("verbose") => verbose = true,
            Value(value) => positionals.push(value.string()?),
            arg => return Err(anyhow::Error::from(arg.unexpected())),
        }
    }

    let [target, source, base_image, tag] = positionals.as_slice() else {
        return Err(anyhow!("usage: {USAGE}"));
    };

    let mut ctx = context(&transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, std::slice::from_ref(target))?;

    Ok(executor(&mut ctx, on).run_each(&|locator| {
        Request::BuildImage(BuildImageRequest {
            name: target_id(locator),
            source: source.clone(),
            base_image: base_image.clone(),
            tag: tag.clone(),
            runtime_image: runtime_image.clone(),
            clean,
            verbose,
        })
    }))
}
