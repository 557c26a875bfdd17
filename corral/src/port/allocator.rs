use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel as chan;

use super::{Port, PortError, PortPair, PortPairs, PORTS_PER_BLOCK};
use crate::config;

/// Consecutive failed block scans tolerated before the producer starts
/// offering the unallocated sentinel.
pub const MAX_READ_FAILURES: usize = 3;

/// Leases external ports out of a configured range, backed by the block tree
/// of symlinks under `ports/interfaces/1`.
///
/// A single background producer walks the tree in blocks of
/// [`PORTS_PER_BLOCK`], offering each free port over a rendezvous channel.
/// Consumers take one port per [`PortAllocator::allocate`] call. Dropping the
/// allocator terminates the producer.
pub struct PortAllocator {
    base: PathBuf,
    ports: chan::Receiver<Port>,
    _done: chan::Sender<()>,
}

impl PortAllocator {
    /// Spawn the producer over `[min, max)` rooted at `base`.
    pub fn start(base: impl Into<PathBuf>, min: Port, max: Port) -> Self {
        let base = base.into();
        let (port_tx, port_rx) = chan::bounded(0);
        let (done_tx, done_rx) = chan::bounded::<()>(0);
        let producer = Producer {
            base: base.clone(),
            min,
            max,
            ports: port_tx,
            done: done_rx,
        };
        thread::Builder::new()
            .name(String::from("port-allocator"))
            .spawn(move || producer.find_ports())
            .expect("failed to spawn the port allocator producer");

        Self {
            base,
            ports: port_rx,
            _done: done_tx,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Take one free port. Returns [`Port::NONE`] when no port is available
    /// right now; more may become available later, so the sentinel is not a
    /// fatal state.
    pub fn allocate(&self) -> Port {
        match self.ports.recv() {
            Ok(port) => {
                if !port.is_none() {
                    log::debug!(target: "ports", "reserved port {port}");
                }
                port
            }
            Err(chan::RecvError) => Port::NONE,
        }
    }

    /// Bring the ports bound to `def_path` from `existing` to `desired`,
    /// adopting still-valid existing reservations, drawing fresh external
    /// ports where `desired` leaves them unallocated, committing new symlinks
    /// in order with best-effort rollback on failure, and releasing stale
    /// reservations last. Returns the set of pairs now in effect.
    pub fn atomic_reserve(
        &self,
        def_path: &Path,
        desired: &PortPairs,
        existing: &PortPairs,
    ) -> Result<PortPairs, PortError> {
        let mut reservations = reserve(desired)?;
        let unreserve = self.reuse(&mut reservations, existing)?;
        let reserved: PortPairs = reservations.iter().map(|r| r.pair).collect();

        commit(&self.base, def_path, &mut reservations)?;

        if !unreserve.is_empty() {
            log::debug!(target: "ports", "releasing {unreserve}");
        }
        // Stale reservations are released best-effort once the new set is
        // committed.
        let _ = release_external_ports_in(&self.base, def_path, &unreserve);

        Ok(reserved)
    }

    /// Use existing pairs where possible instead of allocating new ports.
    /// Returns the pairs that are no longer wanted.
    fn reuse(
        &self,
        reservations: &mut [Reservation],
        existing: &PortPairs,
    ) -> Result<PortPairs, PortError> {
        let mut unreserve = Vec::new();
        for ex in existing {
            let mut matched = false;
            for res in reservations
                .iter_mut()
                .filter(|r| r.pair.internal == ex.internal)
            {
                if res.exists {
                    return Err(PortError::DuplicateInternal(res.pair.internal));
                }
                if res.pair.external.is_none() {
                    // Use the already allocated port.
                    res.pair.external = ex.external;
                    res.exists = true;
                } else if res.pair.external != ex.external {
                    unreserve.push(PortPair::new(Port::NONE, ex.external));
                } else {
                    res.exists = true;
                }
                if res.exists {
                    let (_, leaf) = ex.external.block_paths_in(&self.base);
                    if fs::metadata(&leaf).is_err() {
                        // The reservation vanished; draw a fresh port below.
                        res.pair.external = Port::NONE;
                        res.exists = false;
                    }
                }
                matched = true;
            }
            if !matched {
                unreserve.push(*ex);
            }
        }
        for res in reservations.iter_mut() {
            if res.pair.external.is_none() {
                res.pair.external = self.allocate();
                if res.pair.external.is_none() {
                    return Err(PortError::AllocationFailed);
                }
                res.reserved = true;
            }
        }
        Ok(PortPairs(unreserve))
    }
}

/// A pending or committed claim on an external port. `exists` means the
/// target symlink already points at the same definition; `allocated` means
/// this call created the symlink and rollback must delete it.
struct Reservation {
    pair: PortPair,
    #[allow(dead_code)]
    reserved: bool,
    allocated: bool,
    exists: bool,
}

/// Lift the desired pairs into reservations, rejecting duplicate internal
/// ports before anything touches the filesystem.
fn reserve(desired: &PortPairs) -> Result<Vec<Reservation>, PortError> {
    let mut reservations: Vec<Reservation> = Vec::with_capacity(desired.len());
    for pair in desired {
        if reservations.iter().any(|r| r.pair.internal == pair.internal) {
            return Err(PortError::DuplicateInternal(pair.internal));
        }
        reservations.push(Reservation {
            pair: *pair,
            reserved: false,
            allocated: false,
            exists: false,
        });
    }
    Ok(reservations)
}

/// Write reservations to disk. Symlinks are created in iteration order; the
/// first failure removes the links created by this call and propagates.
fn commit(base: &Path, def_path: &Path, reservations: &mut [Reservation]) -> Result<(), PortError> {
    let mut failed: Option<PortError> = None;
    for res in reservations.iter_mut() {
        if res.exists {
            continue;
        }
        let (parent, leaf) = res.pair.external.block_paths_in(base);
        let _ = fs::create_dir_all(&parent);
        match std::os::unix::fs::symlink(def_path, &leaf) {
            Ok(()) => res.allocated = true,
            Err(e) => {
                log::warn!(target: "ports", "failed to reserve {}, rolling back: {e}", res.pair.external);
                failed = Some(PortError::ReserveFailed {
                    port: res.pair.external,
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    if let Some(err) = failed {
        for res in reservations.iter_mut() {
            if !res.allocated {
                continue;
            }
            let (_, leaf) = res.pair.external.block_paths_in(base);
            match fs::remove_file(&leaf) {
                Ok(()) => res.allocated = false,
                Err(e) => {
                    log::warn!(target: "ports", "unable to roll back allocation {}: {e}", res.pair.external)
                }
            }
        }
        return Err(err);
    }
    Ok(())
}

/// Remove the reservation symlinks for `pairs`. Dangling links are removed;
/// links whose target still exists but is not `directory` are left alone.
pub fn release_external_ports_in(
    base: &Path,
    directory: &Path,
    pairs: &PortPairs,
) -> io::Result<()> {
    let mut failed: Option<io::Error> = None;
    for pair in pairs {
        let (_, leaf) = pair.external.block_paths_in(base);
        let target = match fs::read_link(&leaf) {
            Ok(target) => target,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!(target: "ports", "path cannot be checked: {e}");
                    failed = Some(e);
                }
                continue;
            }
        };
        match fs::metadata(&target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let _ = fs::remove_file(&leaf);
                continue;
            }
            Err(_) => continue,
            Ok(_) => {}
        }
        if !directory.as_os_str().is_empty() && target != directory {
            log::warn!(
                target: "ports",
                "path {} is not under {} and will not be removed",
                target.display(),
                directory.display()
            );
            continue;
        }
        if let Err(e) = fs::remove_file(&leaf) {
            log::warn!(target: "ports", "unable to remove symlink: {e}");
            failed = Some(e);
        }
    }
    match failed {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn release_external_ports(directory: &Path, pairs: &PortPairs) -> io::Result<()> {
    release_external_ports_in(config::container_base_path(), directory, pairs)
}

struct Producer {
    base: PathBuf,
    min: Port,
    max: Port,
    ports: chan::Sender<Port>,
    done: chan::Receiver<()>,
}

impl Producer {
    /// Walk the block tree forever, offering free ports. Wraps back to the
    /// block containing `min` after passing `max`.
    fn find_ports(self) {
        let min = self.min.number();
        let max = self.max.number();
        let mut block = min / PORTS_PER_BLOCK;
        let mut failures = 0usize;

        loop {
            let mut found_in_block = 0usize;
            let start = (block * PORTS_PER_BLOCK).max(min);
            let end = {
                let next = (block + 1).saturating_mul(PORTS_PER_BLOCK);
                if next > max {
                    block = min / PORTS_PER_BLOCK;
                    max
                } else {
                    block += 1;
                    next
                }
            };
            log::trace!(target: "ports", "searching block {block}, {start}-{}", end.saturating_sub(1));

            let taken = match self.taken_in_block(start) {
                Ok(taken) => taken,
                Err(e) => {
                    log::warn!(target: "ports", "failed to read block for {start}: {e}");
                    if self.fail(&mut failures) {
                        return;
                    }
                    continue;
                }
            };

            for number in start..end {
                if taken.binary_search(&number).is_ok() {
                    continue;
                }
                chan::select! {
                    send(self.ports, Port(number)) -> sent => {
                        if sent.is_err() {
                            return;
                        }
                        found_in_block += 1;
                    }
                    recv(self.done) -> _ => return,
                }
            }

            if found_in_block == 0 {
                log::debug!(target: "ports", "failed to find a port between {start}-{}", end.saturating_sub(1));
                if self.fail(&mut failures) {
                    return;
                }
            } else {
                failures = 0;
            }
        }
    }

    /// Numeric entries in the block directory, sorted. A missing directory
    /// means the whole block is free.
    fn taken_in_block(&self, start: u16) -> io::Result<Vec<u16>> {
        let (parent, _) = Port(start).block_paths_in(&self.base);
        let entries = match fs::read_dir(&parent) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut taken = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Ok(number) = entry.file_name().to_string_lossy().parse::<u16>() {
                if number != 0 {
                    taken.push(number);
                }
            }
        }
        taken.sort_unstable();
        Ok(taken)
    }

    /// Count a failed scan. Past the budget, offer the sentinel so consumers
    /// can react without the producer shutting down. Returns true when the
    /// allocator is gone and the producer should exit.
    fn fail(&self, failures: &mut usize) -> bool {
        *failures += 1;
        if *failures > MAX_READ_FAILURES {
            chan::select! {
                send(self.ports, Port::NONE) -> sent => return sent.is_err(),
                recv(self.done) -> _ => return true,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;

    fn pairs(entries: &[(u16, u16)]) -> PortPairs {
        entries
            .iter()
            .map(|&(i, e)| PortPair::new(Port(i), Port(e)))
            .collect()
    }

    fn link_count(base: &Path) -> usize {
        let root = base.join("ports/interfaces/1");
        let mut count = 0;
        if let Ok(blocks) = fs::read_dir(root) {
            for block in blocks.flatten() {
                count += fs::read_dir(block.path()).map(|d| d.count()).unwrap_or(0);
            }
        }
        count
    }

    #[test]
    fn reserves_fresh_ports_in_range() {
        let tmp = tempfile::tempdir().unwrap();
        let def = tmp.path().join("defs/c1");
        fs::create_dir_all(&def).unwrap();
        let allocator = PortAllocator::start(tmp.path(), Port(4000), Port(4100));

        let reserved = allocator
            .atomic_reserve(&def, &pairs(&[(8080, 0), (8443, 0)]), &PortPairs::new())
            .unwrap();

        assert_eq!(reserved.len(), 2);
        assert_ne!(reserved[0].external, reserved[1].external);
        for pair in &reserved {
            let n = pair.external.number();
            assert!((4000..4100).contains(&n), "{n} outside [4000, 4100)");
            let (_, leaf) = pair.external.block_paths_in(tmp.path());
            assert_eq!(fs::read_link(leaf).unwrap(), def);
        }
        assert_eq!(link_count(tmp.path()), 2);
    }

    #[test]
    fn allocated_ports_stay_in_range() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PortAllocator::start(tmp.path(), Port(4050), Port(4070));

        for _ in 0..60 {
            let port = allocator.allocate();
            assert!((4050..4070).contains(&port.number()));
        }
    }

    #[test]
    fn reuses_existing_reservation() {
        let tmp = tempfile::tempdir().unwrap();
        let def = tmp.path().join("defs/c1");
        fs::create_dir_all(&def).unwrap();

        // 41000 already belongs to this definition.
        let (parent, leaf) = Port(41000).block_paths_in(tmp.path());
        fs::create_dir_all(parent).unwrap();
        std::os::unix::fs::symlink(&def, leaf).unwrap();

        let allocator = PortAllocator::start(tmp.path(), Port(4000), Port(4100));
        let reserved = allocator
            .atomic_reserve(
                &def,
                &pairs(&[(8080, 0), (8443, 0)]),
                &pairs(&[(8080, 41000)]),
            )
            .unwrap();

        assert_eq!(reserved[0], PortPair::new(Port(8080), Port(41000)));
        assert_ne!(reserved[1].external, Port(41000));
        assert!(!reserved[1].external.is_none());
        assert_eq!(
            reserved.to_header(),
            format!("8080:41000,8443:{}", reserved[1].external)
        );
        // One new symlink; the existing one untouched.
        assert_eq!(link_count(tmp.path()), 2);
        let (_, leaf) = Port(41000).block_paths_in(tmp.path());
        assert_eq!(fs::read_link(leaf).unwrap(), def);
    }

    #[test]
    fn rejects_duplicate_internal_ports() {
        let tmp = tempfile::tempdir().unwrap();
        let def = tmp.path().join("defs/c1");
        fs::create_dir_all(&def).unwrap();
        let allocator = PortAllocator::start(tmp.path(), Port(4000), Port(4100));

        let result =
            allocator.atomic_reserve(&def, &pairs(&[(8080, 0), (8080, 0)]), &PortPairs::new());

        assert_eq!(result, Err(PortError::DuplicateInternal(Port(8080))));
        assert_eq!(link_count(tmp.path()), 0);
    }

    #[test]
    fn reserve_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let def = tmp.path().join("defs/c1");
        fs::create_dir_all(&def).unwrap();
        let allocator = PortAllocator::start(tmp.path(), Port(4000), Port(4100));

        let desired = pairs(&[(8080, 0)]);
        let first = allocator
            .atomic_reserve(&def, &desired, &PortPairs::new())
            .unwrap();
        let second = allocator.atomic_reserve(&def, &first, &first).unwrap();

        assert_eq!(first, second);
        assert_eq!(link_count(tmp.path()), 1);
    }

    #[test]
    fn empty_desired_releases_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let def = tmp.path().join("defs/c1");
        fs::create_dir_all(&def).unwrap();
        let allocator = PortAllocator::start(tmp.path(), Port(4000), Port(4100));

        let reserved = allocator
            .atomic_reserve(&def, &pairs(&[(8080, 0)]), &PortPairs::new())
            .unwrap();
        assert_eq!(link_count(tmp.path()), 1);

        let now = allocator.atomic_reserve(&def, &PortPairs::new(), &reserved).unwrap();

        assert!(now.is_empty());
        assert_eq!(link_count(tmp.path()), 0);
    }

    #[test]
    fn release_refuses_foreign_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let ours = tmp.path().join("defs/c1");
        let theirs = tmp.path().join("defs/c2");
        fs::create_dir_all(&ours).unwrap();
        fs::create_dir_all(&theirs).unwrap();

        let (parent, leaf) = Port(4100).block_paths_in(tmp.path());
        fs::create_dir_all(parent).unwrap();
        std::os::unix::fs::symlink(&theirs, &leaf).unwrap();

        release_external_ports_in(tmp.path(), &ours, &pairs(&[(8080, 4100)])).unwrap();
        assert!(leaf.symlink_metadata().is_ok());

        // Once the target is gone the dangling link is reclaimed.
        fs::remove_dir_all(&theirs).unwrap();
        release_external_ports_in(tmp.path(), &ours, &pairs(&[(8080, 4100)])).unwrap();
        assert!(leaf.symlink_metadata().is_err());
    }

    #[test]
    fn exhausted_range_yields_the_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let allocator = PortAllocator::start(tmp.path(), Port(4000), Port(4000));

        assert_eq!(allocator.allocate(), Port::NONE);
    }
}
