use std::collections::{BTreeSet, HashMap};

/// Per-partition bookkeeping of handed out and acknowledged offsets.
///
/// Kafka keeps a single committed position per partition, so acknowledgements
/// arriving out of order can only move that position up to the lowest offset
/// still outstanding.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, Progress>,
}

#[derive(Debug, Default)]
struct Progress {
    outstanding: BTreeSet<i64>,
    /// One past the highest acknowledged offset.
    next: i64,
    /// Last position handed to the broker, or the first offset seen.
    committed: Option<i64>,
}

impl OffsetTracker {
    pub fn received(&mut self, partition: i32, offset: i64) {
        let progress = self.partitions.entry(partition).or_default();
        if progress.committed.is_none() {
            progress.committed = Some(offset);
        }
        progress.outstanding.insert(offset);
    }

    /// Marks `offset` done and returns the position to store when it moved.
    pub fn completed(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let progress = self.partitions.get_mut(&partition)?;
        if !progress.outstanding.remove(&offset) {
            return None;
        }
        progress.next = progress.next.max(offset + 1);

        let position = progress
            .outstanding
            .first()
            .copied()
            .unwrap_or(progress.next);

        match progress.committed {
            Some(committed) if position <= committed => None,
            _ => {
                progress.committed = Some(position);
                Some(position)
            }
        }
    }
}
