use std::ffi::OsString;

use anyhow::{anyhow, Context as _};

use corral::containers::jobs::{EnvironmentVariable, InstallRequest};
use corral::job::Request;
use corral::port::PortPairs;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id};

pub const USAGE: &str = "corral install <image> <locator>... [--ports <i:e,...>] [--env <K=V>]... [--start] [--transport <name>]";

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut transport = String::from(crate::context::DEFAULT_TRANSPORT);
    let mut positionals: Vec<String> = Vec::new();
    let mut ports = PortPairs::new();
    let mut environment: Vec<EnvironmentVariable> = Vec::new();
    let mut started = false;

    while let Some(arg) = parser.next()? {
        match arg {
            Long("transport") => transport = parser.value()?.string()?,
            Long("ports") => {
                let value = parser.value()?.string()?;
                ports = PortPairs::from_header(&value)
                    .with_context(|| format!("invalid port mapping '{value}'"))?;
            }
            Long("env") => {
                let value = parser.value()?.string()?;
                let (name, value) = value
                    .split_once('=')
                    .ok_or_else(|| anyhow!("environment entries are '<name>=<value>'"))?;
                environment.push(EnvironmentVariable {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            Long("start") => started = true,
            Value(value) => positionals.push(value.string()?),
            arg => return Err(anyhow::Error::from(arg.unexpected())),
        }
    }

    if positionals.len() < 2 {
        return Err(anyhow!("usage: {USAGE}"));
    }
    let image = positionals.remove(0);

    let mut ctx = context(&transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, &positionals)?;

    Ok(executor(&mut ctx, on).run_each(&|locator| {
        Request::Install(InstallRequest {
            id: target_id(locator),
            image: image.clone(),
            started,
            ports: ports.clone(),
            environment: environment.clone(),
        })
    }))
}
