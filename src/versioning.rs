/// Vector clocks and versioned values.
///
/// Metadata updates are made causally monotonic by reading the current
/// clock, incrementing the writer's slot, and writing back. Clocks are
/// immutable; `incremented` returns a new clock.
use chrono::Utc;

use crate::errors::Error;
use crate::proto;

/// One node's slot in a vector clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClockEntry {
    pub node_id: i32,
    pub version: u64,
}

/// Relationship between two vector clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occurred {
    Before,
    After,
    Equal,
    Concurrently,
}

/// Per-node monotonic counters plus the wall-clock time of the write that
/// produced this clock. Entries are kept sorted by node id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorClock {
    entries: Vec<ClockEntry>,
    timestamp_ms: i64,
}

impl Default for VectorClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorClock {
    pub fn new() -> VectorClock {
        VectorClock {
            entries: Vec::new(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_entries(mut entries: Vec<ClockEntry>) -> VectorClock {
        entries.sort_by_key(|entry| entry.node_id);

        VectorClock {
            entries,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn entries(&self) -> &[ClockEntry] {
        &self.entries
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Counter for a node; absent slots read as zero.
    pub fn get(&self, node_id: i32) -> u64 {
        self.entries
            .iter()
            .find(|entry| entry.node_id == node_id)
            .map(|entry| entry.version)
            .unwrap_or(0)
    }

    /// New clock with `node_id`'s slot bumped by one and a fresh timestamp.
    /// `self` is unchanged.
    pub fn incremented(&self, node_id: i32) -> VectorClock {
        let mut entries = self.entries.clone();

        match entries.iter_mut().find(|entry| entry.node_id == node_id) {
            Some(entry) => entry.version += 1,
            None => {
                entries.push(ClockEntry {
                    node_id,
                    version: 1,
                });
                entries.sort_by_key(|entry| entry.node_id);
            }
        }

        VectorClock {
            entries,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Dominance comparison. Timestamps do not participate; only the
    /// counters decide.
    pub fn compare(&self, other: &VectorClock) -> Occurred {
        let mut self_bigger = false;
        let mut other_bigger = false;

        let node_ids: Vec<i32> = {
            let mut ids: Vec<i32> = self
                .entries
                .iter()
                .chain(other.entries.iter())
                .map(|entry| entry.node_id)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        for node_id in node_ids {
            let ours = self.get(node_id);
            let theirs = other.get(node_id);

            if ours > theirs {
                self_bigger = true;
            } else if ours < theirs {
                other_bigger = true;
            }
        }

        match (self_bigger, other_bigger) {
            (false, false) => Occurred::Equal,
            (true, false) => Occurred::After,
            (false, true) => Occurred::Before,
            (true, true) => Occurred::Concurrently,
        }
    }

    pub(crate) fn to_proto(&self) -> proto::VectorClock {
        proto::VectorClock {
            entries: self
                .entries
                .iter()
                .map(|entry| proto::ClockEntry {
                    node_id: entry.node_id,
                    version: entry.version as i64,
                })
                .collect(),
            timestamp: Some(self.timestamp_ms),
        }
    }

    pub(crate) fn from_proto(clock: proto::VectorClock) -> VectorClock {
        let mut entries: Vec<ClockEntry> = clock
            .entries
            .into_iter()
            .map(|entry| ClockEntry {
                node_id: entry.node_id,
                version: entry.version.max(0) as u64,
            })
            .collect();
        entries.sort_by_key(|entry| entry.node_id);

        VectorClock {
            entries,
            timestamp_ms: clock
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        }
    }
}

/// A value paired with the vector clock of the write that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<V> {
    pub value: V,
    pub version: VectorClock,
}

impl<V> Versioned<V> {
    pub fn new(value: V, version: VectorClock) -> Versioned<V> {
        Versioned { value, version }
    }
}

impl Versioned<Vec<u8>> {
    pub(crate) fn to_proto(&self) -> proto::Versioned {
        proto::Versioned {
            value: self.value.clone(),
            version: Some(self.version.to_proto()),
        }
    }

    pub(crate) fn from_proto(versioned: proto::Versioned) -> Versioned<Vec<u8>> {
        Versioned {
            value: versioned.value,
            version: versioned
                .version
                .map(VectorClock::from_proto)
                .unwrap_or_default(),
        }
    }

    pub(crate) fn into_utf8(self) -> Result<Versioned<String>, Error> {
        let value = String::from_utf8(self.value)
            .map_err(|_| Error::InvalidMetadata("value is not UTF-8".to_string()))?;

        Ok(Versioned {
            value,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(i32, u64)]) -> VectorClock {
        VectorClock::with_entries(
            entries
                .iter()
                .map(|&(node_id, version)| ClockEntry { node_id, version })
                .collect(),
        )
    }

    #[test]
    fn increment_bumps_one_slot_and_leaves_the_original_alone() {
        let original = clock(&[(3, 5)]);
        let bumped = original.incremented(3);

        assert_eq!(original.get(3), 5);
        assert_eq!(bumped.get(3), 6);
        assert_eq!(bumped.compare(&original), Occurred::After);
    }

    #[test]
    fn increment_creates_missing_slot() {
        let original = clock(&[(1, 2)]);
        let bumped = original.incremented(7);

        assert_eq!(bumped.get(7), 1);
        assert_eq!(bumped.get(1), 2);
    }

    #[test]
    fn entries_stay_sorted_by_node_id() {
        let bumped = clock(&[(5, 1), (1, 1)]).incremented(3);
        let ids: Vec<i32> = bumped.entries().iter().map(|entry| entry.node_id).collect();

        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn comparison_detects_concurrency() {
        let a = clock(&[(1, 2), (2, 1)]);
        let b = clock(&[(1, 1), (2, 2)]);

        assert_eq!(a.compare(&b), Occurred::Concurrently);
        assert_eq!(a.compare(&a.clone()), Occurred::Equal);
        assert_eq!(clock(&[(1, 1)]).compare(&clock(&[(1, 2)])), Occurred::Before);
    }

    #[test]
    fn proto_round_trip_preserves_counters() {
        let original = clock(&[(0, 3), (4, 9)]);
        let decoded = VectorClock::from_proto(original.to_proto());

        assert_eq!(decoded.compare(&original), Occurred::Equal);
        assert_eq!(decoded.timestamp_ms(), original.timestamp_ms());
    }
}
