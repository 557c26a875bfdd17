use std::ffi::OsString;

use anyhow::anyhow;

use corral::containers::jobs::{ContainerLink, LinkRequest, NetworkLink};
use corral::job::Request;
use corral::transport::ResourceKind;

use crate::context::context;

use super::{executor, parse_targets, target_id};

pub const USAGE: &str =
    "corral link <locator>... --net <fromhost:fromport:tohost:toport>... [--transport <name>]";

fn parse_network_link(value: &str) -> anyhow::Result<NetworkLink> {
    let parts: Vec<&str> = value.split(':').collect();
    let [from_host, from_port, to_host, to_port] = parts.as_slice() else {
        return Err(anyhow!(
            "network links are '<fromhost>:<fromport>:<tohost>:<toport>'"
        ));
    };
    Ok(NetworkLink {
        from_host: from_host.to_string(),
        from_port: from_port.parse()?,
        to_host: to_host.to_string(),
        to_port: to_port.parse()?,
    })
}

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut transport = String::from(crate::context::DEFAULT_TRANSPORT);
    let mut targets: Vec<String> = Vec::new();
    let mut network_links: Vec<NetworkLink> = Vec::new();

    while let Some(arg) = parser.next()? {
        match arg {
            Long("transport") => transport = parser.value()?.string()?,
            Long("net") => network_links.push(parse_network_link(&parser.value()?.string()?)?),
            Value(value) => targets.push(value.string()?),
            arg => return Err(anyhow::Error::from(arg.unexpected())),
        }
    }

    if network_links.is_empty() {
        return Err(anyhow!("usage: {USAGE}"));
    }

    let mut ctx = context(&transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, &targets)?;

    // One link job per host, covering all of that host's containers.
    Ok(executor(&mut ctx, on).run(&|locators| {
        Request::Link(LinkRequest {
            links: locators
                .iter()
                .map(|locator| ContainerLink {
                    id: target_id(locator),
                    network_links: network_links.clone(),
                })
                .collect(),
        })
    }))
}
