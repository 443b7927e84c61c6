//! Per-stage work queue with deadline-bounded processing

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::core::GenerationError;
use crate::world::{Cube, CubeAccess, CubeCoord};

/// Work done on a single cube by one pipeline stage.
pub trait CubeProcessor {
    /// Process the cube at `coord`. `cubes` exposes every resident cube.
    fn process(&mut self, coord: CubeCoord, cubes: &mut dyn CubeAccess) -> Result<(), GenerationError>;
}

/// Adapts a closure over a single cube into a [`CubeProcessor`]
pub struct CubeFn<F>(pub F);

impl<F> CubeProcessor for CubeFn<F>
where
    F: FnMut(&mut Cube) -> Result<(), GenerationError>,
{
    fn process(&mut self, coord: CubeCoord, cubes: &mut dyn CubeAccess) -> Result<(), GenerationError> {
        let cube = cubes
            .loaded_cube_mut(coord)
            .ok_or(GenerationError::CubeNotLoaded(coord))?;
        (self.0)(cube)
    }
}

impl CubeProcessor for Box<dyn CubeProcessor> {
    fn process(&mut self, coord: CubeCoord, cubes: &mut dyn CubeAccess) -> Result<(), GenerationError> {
        (**self).process(coord, cubes)
    }
}

/// Running totals for reporting
#[derive(Clone, Debug, Default)]
pub struct QueueStats {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub busy_time: Duration,
}

/// Pending cube addresses for one stage plus the processor that works them off.
///
/// Adding an address already queued is a no-op. Failed items are retried on a
/// later call, or dropped once `max_retries` attempts have failed.
pub struct ProcessingQueue<P = Box<dyn CubeProcessor>> {
    name: String,
    processor: P,
    pending: VecDeque<u64>,
    queued: HashSet<u64>,
    processed: Vec<u64>,
    dropped: Vec<u64>,
    attempts: HashMap<u64, u32>,
    max_retries: Option<u32>,
    stats: QueueStats,
}

impl<P: CubeProcessor> ProcessingQueue<P> {
    pub fn new(name: impl Into<String>, processor: P, max_retries: Option<u32>) -> Self {
        Self {
            name: name.into(),
            processor,
            pending: VecDeque::new(),
            queued: HashSet::new(),
            processed: Vec::new(),
            dropped: Vec::new(),
            attempts: HashMap::new(),
            max_retries,
            stats: QueueStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an address. Returns `false` if it was already pending.
    pub fn add(&mut self, address: u64) -> bool {
        if !self.queued.insert(address) {
            return false;
        }
        self.pending.push_back(address);
        true
    }

    /// Forget a pending address. Returns whether it was queued.
    pub fn remove(&mut self, address: u64) -> bool {
        if !self.queued.remove(&address) {
            return false;
        }
        self.pending.retain(|&a| a != address);
        self.attempts.remove(&address);
        true
    }

    pub fn contains(&self, address: u64) -> bool {
        self.queued.contains(&address)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Addresses finished by the most recent [`process_until`](Self::process_until) call
    pub fn processed_addresses(&self) -> &[u64] {
        &self.processed
    }

    /// Addresses given up on since the last call to this method
    pub fn take_dropped(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.dropped)
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Work off pending addresses until `deadline` or the queue is empty.
    ///
    /// The first item always starts; the deadline is checked before each
    /// further item, so an item in flight is allowed to finish past it.
    /// Returns the number of addresses processed successfully.
    pub fn process_until(&mut self, deadline: Instant, cubes: &mut dyn CubeAccess) -> usize {
        self.processed.clear();
        let start = Instant::now();
        let mut retry_later = Vec::new();

        while let Some(address) = self.pending.pop_front() {
            let coord = CubeCoord::from_address(address);
            match self.processor.process(coord, cubes) {
                Ok(()) => {
                    self.queued.remove(&address);
                    self.attempts.remove(&address);
                    self.processed.push(address);
                }
                Err(e) => {
                    self.stats.failed += 1;
                    let attempts = self.attempts.entry(address).or_insert(0);
                    *attempts += 1;
                    if self.max_retries.is_some_and(|max| *attempts >= max) {
                        log::error!(
                            "{}: dropping {:?} after {} failed attempts: {}",
                            self.name, coord, attempts, e
                        );
                        self.attempts.remove(&address);
                        self.queued.remove(&address);
                        self.dropped.push(address);
                        self.stats.dropped += 1;
                    } else {
                        log::warn!("{}: failed to process {:?} (attempt {}): {}", self.name, coord, attempts, e);
                        retry_later.push(address);
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        self.pending.extend(retry_later);
        self.stats.processed += self.processed.len() as u64;
        self.stats.busy_time += start.elapsed();
        self.processed.len()
    }

    /// One-line summary for logs
    pub fn processing_report(&self) -> String {
        let per_cube = if self.stats.processed > 0 {
            self.stats.busy_time / self.stats.processed as u32
        } else {
            Duration::ZERO
        };
        format!(
            "{}: {} pending, {} processed ({:?}/cube), {} failed, {} dropped",
            self.name,
            self.pending.len(),
            self.stats.processed,
            per_cube,
            self.stats.failed,
            self.stats.dropped,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{CubeMap, CubePrimer};

    fn map_with(coords: &[CubeCoord]) -> CubeMap {
        let mut map = CubeMap::new();
        for &c in coords {
            map.insert(Cube::from_primer(c, CubePrimer::new()));
        }
        map
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn mark(cube: &mut Cube) -> Result<(), GenerationError> {
        cube.set_block(0, 0, 0, 1);
        Ok(())
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut queue = ProcessingQueue::new("test", CubeFn(mark), None);
        let a = CubeCoord::new(1, 2, 3).address();
        assert!(queue.add(a));
        assert!(!queue.add(a));
        assert_eq!(queue.pending_count(), 1);
        assert!(queue.contains(a));
    }

    #[test]
    fn test_process_until_drains_queue() {
        let coords = [CubeCoord::new(0, 0, 0), CubeCoord::new(1, 0, 0), CubeCoord::new(2, 0, 0)];
        let mut cubes = map_with(&coords);
        let mut queue = ProcessingQueue::new("test", CubeFn(mark), None);
        for c in &coords {
            queue.add(c.address());
        }

        let n = queue.process_until(far_deadline(), &mut cubes);
        assert_eq!(n, 3);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.processed_addresses().len(), 3);
        for c in &coords {
            assert_eq!(cubes.loaded_cube(*c).unwrap().block(0, 0, 0), 1);
        }
    }

    #[test]
    fn test_expired_deadline_processes_one_item() {
        let coords = [CubeCoord::new(0, 0, 0), CubeCoord::new(1, 0, 0)];
        let mut cubes = map_with(&coords);
        let mut queue = ProcessingQueue::new("test", CubeFn(mark), None);
        for c in &coords {
            queue.add(c.address());
        }

        let n = queue.process_until(Instant::now(), &mut cubes);
        assert_eq!(n, 1);
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_processed_cleared_each_call() {
        let coord = CubeCoord::new(0, 0, 0);
        let mut cubes = map_with(&[coord]);
        let mut queue = ProcessingQueue::new("test", CubeFn(mark), None);
        queue.add(coord.address());
        queue.process_until(far_deadline(), &mut cubes);
        assert_eq!(queue.processed_addresses(), &[coord.address()]);

        queue.process_until(far_deadline(), &mut cubes);
        assert!(queue.processed_addresses().is_empty());
    }

    #[test]
    fn test_failure_isolated_and_retried() {
        let bad = CubeCoord::new(5, 5, 5);
        let good = CubeCoord::new(0, 0, 0);
        let mut cubes = map_with(&[bad, good]);
        let mut queue = ProcessingQueue::new(
            "test",
            CubeFn(move |cube: &mut Cube| -> Result<(), GenerationError> {
                if cube.coord() == bad {
                    Err(GenerationError::failed(cube.coord(), "boom"))
                } else {
                    Ok(())
                }
            }),
            None,
        );
        queue.add(bad.address());
        queue.add(good.address());

        let n = queue.process_until(far_deadline(), &mut cubes);
        assert_eq!(n, 1);
        assert_eq!(queue.processed_addresses(), &[good.address()]);
        // Failed item stays pending for a later call
        assert_eq!(queue.pending_count(), 1);
        assert!(queue.contains(bad.address()));
        assert_eq!(queue.stats().failed, 1);
    }

    #[test]
    fn test_failure_dropped_after_retry_limit() {
        let bad = CubeCoord::new(5, 5, 5);
        let mut cubes = map_with(&[bad]);
        let mut queue = ProcessingQueue::new(
            "test",
            CubeFn(|cube: &mut Cube| -> Result<(), GenerationError> {
                Err(GenerationError::failed(cube.coord(), "always"))
            }),
            Some(2),
        );
        queue.add(bad.address());

        queue.process_until(far_deadline(), &mut cubes);
        assert_eq!(queue.pending_count(), 1);
        queue.process_until(far_deadline(), &mut cubes);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.take_dropped(), vec![bad.address()]);
        assert!(queue.take_dropped().is_empty());
        assert!(!queue.contains(bad.address()));
    }

    #[test]
    fn test_missing_cube_is_a_failure() {
        let mut cubes = CubeMap::new();
        let mut queue = ProcessingQueue::new("test", CubeFn(mark), Some(1));
        let a = CubeCoord::new(9, 9, 9).address();
        queue.add(a);
        assert_eq!(queue.process_until(far_deadline(), &mut cubes), 0);
        assert_eq!(queue.take_dropped(), vec![a]);
    }

    #[test]
    fn test_remove() {
        let mut queue = ProcessingQueue::new("test", CubeFn(mark), None);
        let a = CubeCoord::new(1, 1, 1).address();
        queue.add(a);
        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_report_mentions_name() {
        let queue = ProcessingQueue::new("features", CubeFn(mark), None);
        assert!(queue.processing_report().starts_with("features:"));
    }
}
