pub mod allocator;

pub use allocator::{release_external_ports, release_external_ports_in, PortAllocator};

use std::fmt;
use std::io::{self, BufRead};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config;

/// Ports are grouped on disk in blocks of this many; changing it breaks the
/// disk structure.
pub const PORTS_PER_BLOCK: u16 = 100;

/// Unit-file line carrying the port mappings of a container.
pub const PORT_MAPPING_PREFIX: &str = "X-PortMapping=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("port values must be between 1 and 65535")]
    OutOfRange,
    #[error("'{0}' is not a valid port number")]
    Malformed(String),
    #[error(
        "the port string '{0}' must be a comma delimited list of pairs <internal>:<external>"
    )]
    MalformedHeader(String),
    #[error("the internal port {0} is mapped to more than one external port")]
    DuplicateInternal(Port),
    #[error("a port could not be allocated")]
    AllocationFailed,
    #[error("unable to reserve port {port}: {reason}")]
    ReserveFailed { port: Port, reason: String },
}

/// A TCP port. Zero is reserved as the invalid / unallocated sentinel and is
/// never a legal value on its own.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Port(u16);

impl Port {
    /// The invalid / unallocated sentinel.
    pub const NONE: Port = Port(0);

    pub fn new(value: u16) -> Result<Self, PortError> {
        if value == 0 {
            return Err(PortError::OutOfRange);
        }
        Ok(Self(value))
    }

    pub fn number(self) -> u16 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Parse a port that may legitimately be the unallocated sentinel, as in
    /// the external half of a pair awaiting allocation.
    pub fn parse_allow_unassigned(value: &str) -> Result<Self, PortError> {
        let number: u16 = value
            .parse()
            .map_err(|_| PortError::Malformed(value.to_string()))?;
        Ok(Self(number))
    }

    /// Directory of the block this port belongs to, and the leaf path that is
    /// symlinked to the owning definition directory once reserved.
    pub fn block_paths_in(self, base: &Path) -> (PathBuf, PathBuf) {
        let root = base.join("ports/interfaces/1");
        let parent = root.join((self.0 / PORTS_PER_BLOCK).to_string());
        let leaf = parent.join(self.0.to_string());
        (parent, leaf)
    }

    pub fn block_paths(self) -> (PathBuf, PathBuf) {
        self.block_paths_in(config::container_base_path())
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Port {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let port = Self::parse_allow_unassigned(s)?;
        if port.is_none() {
            return Err(PortError::OutOfRange);
        }
        Ok(port)
    }
}

/// An internal container port and the external port it is published on.
/// `external == Port::NONE` means "allocate one".
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortPair {
    pub internal: Port,
    pub external: Port,
}

impl PortPair {
    pub fn new(internal: Port, external: Port) -> Self {
        Self { internal, external }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.internal, self.external)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PortPairs(pub Vec<PortPair>);

impl PortPairs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn find(&self, internal: Port) -> Option<&PortPair> {
        self.0.iter().find(|p| p.internal == internal)
    }

    /// Serialize as `internal:external[,internal:external…]`, the format used
    /// in unit files and on the wire.
    pub fn to_header(&self) -> String {
        let mut header = String::new();
        for (i, pair) in self.0.iter().enumerate() {
            if i != 0 {
                header.push(',');
            }
            header.push_str(&pair.internal.to_string());
            header.push(':');
            header.push_str(&pair.external.to_string());
        }
        header
    }

    /// Inverse of [`PortPairs::to_header`], order preserved. The external half
    /// of each pair may be `0`.
    pub fn from_header(value: &str) -> Result<Self, PortError> {
        let mut pairs = Vec::new();
        for entry in value.split(',') {
            let (internal, external) = entry
                .split_once(':')
                .ok_or_else(|| PortError::MalformedHeader(value.to_string()))?;
            let internal = internal.parse()?;
            let external = Port::parse_allow_unassigned(external)?;
            pairs.push(PortPair { internal, external });
        }
        Ok(Self(pairs))
    }
}

impl fmt::Display for PortPairs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{pair}")?;
        }
        Ok(())
    }
}

impl Deref for PortPairs {
    type Target = Vec<PortPair>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<PortPair> for PortPairs {
    fn from_iter<T: IntoIterator<Item = PortPair>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PortPairs {
    type Item = PortPair;
    type IntoIter = std::vec::IntoIter<PortPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PortPairs {
    type Item = &'a PortPair;
    type IntoIter = std::slice::Iter<'a, PortPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Collect the port mappings recorded in a unit file. Lines that fail to
/// parse are skipped rather than failing the read.
pub fn ports_from_unit_file(r: impl io::Read) -> io::Result<PortPairs> {
    let mut pairs = Vec::new();
    for line in io::BufReader::new(r).lines() {
        let line = line?;
        if let Some(header) = line.strip_prefix(PORT_MAPPING_PREFIX) {
            if let Ok(found) = PortPairs::from_header(header) {
                pairs.extend(found.0);
            }
        }
    }
    Ok(PortPairs(pairs))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn port_zero_is_invalid() {
        assert_eq!("0".parse::<Port>(), Err(PortError::OutOfRange));
        assert_eq!(Port::new(0), Err(PortError::OutOfRange));
        assert_eq!(Port::parse_allow_unassigned("0"), Ok(Port::NONE));
        assert!("65536".parse::<Port>().is_err());
        assert_eq!("8080".parse::<Port>(), Ok(Port(8080)));
    }

    #[test]
    fn header_round_trips() {
        let pairs = PortPairs(vec![
            PortPair::new(Port(8080), Port(41000)),
            PortPair::new(Port(8443), Port(41001)),
        ]);
        let header = pairs.to_header();

        assert_eq!(header, "8080:41000,8443:41001");
        assert_eq!(PortPairs::from_header(&header).unwrap(), pairs);
    }

    #[test]
    fn header_keeps_unassigned_external() {
        let pairs = PortPairs(vec![PortPair::new(Port(8080), Port::NONE)]);

        assert_eq!(pairs.to_header(), "8080:0");
        assert_eq!(PortPairs::from_header("8080:0").unwrap(), pairs);
    }

    #[test]
    fn header_rejects_malformed() {
        assert!(PortPairs::from_header("8080").is_err());
        assert!(PortPairs::from_header("8080:x").is_err());
        assert!(PortPairs::from_header("0:41000").is_err());
        assert!(PortPairs::from_header("").is_err());
    }

    #[test]
    fn block_paths_split_on_hundreds() {
        let (parent, leaf) = Port(41053).block_paths_in(std::path::Path::new("/base"));

        assert_eq!(parent, std::path::Path::new("/base/ports/interfaces/1/410"));
        assert_eq!(
            leaf,
            std::path::Path::new("/base/ports/interfaces/1/410/41053")
        );
    }

    #[test]
    fn unit_file_ports_are_collected() {
        let unit = "\
[Unit]
Description=Container mydb

X-ContainerId=mydb
X-PortMapping=8080:41000,8443:41001
X-PortMapping=9000:nonsense
X-PortMapping=5432:41002
";
        let pairs = ports_from_unit_file(unit.as_bytes()).unwrap();

        assert_eq!(
            pairs,
            PortPairs(vec![
                PortPair::new(Port(8080), Port(41000)),
                PortPair::new(Port(8443), Port(41001)),
                PortPair::new(Port(5432), Port(41002)),
            ])
        );
    }
}
