//! Data-plane listener port allocation.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use weft::config::PortEntry;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Every port in the configured range is assigned.
    #[error("no free ports left in the configured range")]
    Exhausted,
}

/// Allocates listener ports from the configured range.
///
/// Assignments are stable: releasing a route's port and re-allocating under
/// the same name yields the same port, provided it is still free and in
/// range.
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    /// Canonical inclusive ranges, in configuration order.
    ranges: Vec<(u16, u16)>,
    /// Current assignments.
    assigned: BTreeMap<String, u16>,
    /// Ports currently in use.
    in_use: BTreeSet<u16>,
    /// Previous assignments of released names, for stable reuse.
    remembered: HashMap<String, u16>,
}

impl Allocator {
    /// Create an allocator over the given entries. Entries are expected to
    /// have been validated at configuration load time.
    pub fn new(entries: impl IntoIterator<Item = PortEntry>) -> Self {
        Self {
            ranges: entries.into_iter().map(|e| e.bounds()).collect(),
            ..Self::default()
        }
    }

    /// Current assignment for the given name.
    pub fn get(&self, name: &str) -> Option<u16> {
        self.assigned.get(name).copied()
    }

    /// Iterate over current assignments, ordered by name.
    pub fn assigned(&self) -> impl Iterator<Item = (&str, u16)> {
        self.assigned.iter().map(|(name, port)| (name.as_str(), *port))
    }

    /// Number of ports currently assigned.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// Whether the given port is covered by the configured range.
    pub fn in_range(&self, port: u16) -> bool {
        self.ranges
            .iter()
            .any(|(start, end)| port >= *start && port <= *end)
    }

    /// Assign a port to the given name. Returns the existing assignment if
    /// there is one, then the remembered previous assignment if it is free
    /// and still in range, then the lowest free port.
    pub fn allocate(&mut self, name: &str) -> Result<u16, Error> {
        if let Some(port) = self.assigned.get(name) {
            return Ok(*port);
        }
        let port = match self.remembered.get(name) {
            Some(port) if self.in_range(*port) && !self.in_use.contains(port) => *port,
            _ => self.lowest_free().ok_or(Error::Exhausted)?,
        };
        self.assigned.insert(name.to_owned(), port);
        self.in_use.insert(port);

        Ok(port)
    }

    /// Release the given name's port, remembering the assignment for
    /// potential reuse.
    pub fn release(&mut self, name: &str) -> Option<u16> {
        let port = self.assigned.remove(name)?;

        self.in_use.remove(&port);
        self.remembered.insert(name.to_owned(), port);

        Some(port)
    }

    fn lowest_free(&self) -> Option<u16> {
        let mut candidates: Vec<(u16, u16)> = self.ranges.clone();
        candidates.sort();

        for (start, end) in candidates {
            for port in start..=end {
                if !self.in_use.contains(&port) {
                    return Some(port);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> Allocator {
        Allocator::new([PortEntry::Range(9000, 9002), PortEntry::Single(8080)])
    }

    #[test]
    fn test_allocate_ascending() {
        let mut ports = allocator();

        assert_eq!(ports.allocate("a").unwrap(), 8080);
        assert_eq!(ports.allocate("b").unwrap(), 9000);
        assert_eq!(ports.allocate("c").unwrap(), 9001);
        assert_eq!(ports.allocate("d").unwrap(), 9002);
        assert!(matches!(ports.allocate("e"), Err(Error::Exhausted)));
    }

    #[test]
    fn test_allocate_idempotent() {
        let mut ports = allocator();

        let port = ports.allocate("a").unwrap();
        assert_eq!(ports.allocate("a").unwrap(), port);
        assert_eq!(ports.len(), 1);
    }

    #[test]
    fn test_release_and_reuse() {
        let mut ports = allocator();

        let a = ports.allocate("a").unwrap();
        let b = ports.allocate("b").unwrap();

        assert_eq!(ports.release("a"), Some(a));
        // A new name takes the lowest free port, which is the one released.
        assert_eq!(ports.allocate("c").unwrap(), a);
        // Releasing and re-allocating the same name is stable.
        assert_eq!(ports.release("b"), Some(b));
        assert_eq!(ports.allocate("b").unwrap(), b);
        assert_eq!(ports.allocate("d").unwrap(), 9001);
    }

    #[test]
    fn test_release_unknown() {
        let mut ports = allocator();
        assert_eq!(ports.release("nope"), None);
    }

    #[test]
    fn test_remembered_port_taken() {
        let mut ports = allocator();

        let a = ports.allocate("a").unwrap();
        ports.release("a");

        // Someone else takes the remembered port.
        assert_eq!(ports.allocate("b").unwrap(), a);
        // The original name falls back to the lowest free port.
        assert_ne!(ports.allocate("a").unwrap(), a);
    }
}
