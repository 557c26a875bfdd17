use std::ffi::OsString;
use std::fs;
use std::io::Read as _;

use anyhow::{anyhow, Context as _};

use corral::job::Request;
use corral::ssh::{self, CreateKeysRequest, KeyData, KeyPermission};
use corral::transport::{ResourceKind, ResourceLocator};

use crate::context::context;

use super::{executor, parse_targets, target_id};

pub const USAGE: &str = "corral add-keys <locator>... [--key-file <path>] [--write] [--transport <name>]";

/// Read keys in `authorized_keys` format from the file, or from standard
/// input when no file is given.
fn read_keys(key_file: Option<&str>) -> anyhow::Result<Vec<KeyData>> {
    let contents = match key_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("unable to read the key file '{path}'"))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let mut keys = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let key = ssh::parse_authorized_key(line)
            .map_err(|e| anyhow!("unable to parse an authorized key: {e}"))?;
        keys.push(KeyData {
            kind: String::from(ssh::AUTHORIZED_KEYS_TYPE),
            value: key.marshal().into(),
        });
    }
    if keys.is_empty() {
        return Err(anyhow!("no keys were provided"));
    }
    Ok(keys)
}

fn permission_for(locator: &ResourceLocator, write: bool) -> KeyPermission {
    let id = target_id(locator);
    match locator.kind {
        ResourceKind::Container => KeyPermission {
            kind: String::from(ssh::CONTAINER_PERMISSION_TYPE),
            with: serde_json::json!(id.as_str()),
        },
        ResourceKind::Repository => KeyPermission {
            kind: String::from(corral::git::REPOSITORY_PERMISSION_TYPE),
            with: serde_json::json!({ "id": id.as_str(), "write": write }),
        },
    }
}

pub fn run(args: Vec<OsString>) -> anyhow::Result<i32> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_args(args);
    let mut transport = String::from(crate::context::DEFAULT_TRANSPORT);
    let mut targets: Vec<String> = Vec::new();
    let mut key_file: Option<String> = None;
    let mut write = false;

    while let Some(arg) = parser.next()? {
        match arg {
            Long("transport") => transport = parser.value()?.string()?,
            Long("key-file") => key_file = Some(parser.value()?.string()?),
            Long("write") => write = true,
            Value(value) => targets.push(value.string()?),
            arg => return Err(anyhow::Error::from(arg.unexpected())),
        }
    }

    let keys = read_keys(key_file.as_deref())?;
    let mut ctx = context(&transport)?;
    let on = parse_targets(&ctx, ResourceKind::Container, &targets)?;

    // One request per host, granting every key access to all of that host's
    // resources.
    Ok(executor(&mut ctx, on).run(&|locators| {
        Request::CreateKeys(CreateKeysRequest {
            keys: keys.clone(),
            permissions: locators
                .iter()
                .map(|locator| permission_for(locator, write))
                .collect(),
        })
    }))
}
