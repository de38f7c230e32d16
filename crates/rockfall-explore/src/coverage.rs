//! Basic-block coverage accounting.
//!
//! The checker appends every executed basic block's 64-bit identifier
//! to a packed binary log.  An input's score is the number of blocks
//! in its log that the global set has never seen.  During an
//! iteration, worker threads record fresh blocks into a delta set;
//! the main thread merges the delta into the global set exactly once
//! per successful iteration, after the pool has drained.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use log::info;

/// Thread-safe global + per-iteration delta coverage sets.
///
/// A single lock guards both sets; scoring is one short critical
/// section per checker run.
pub struct CoverageSet {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    global: BTreeSet<u64>,
    delta: BTreeSet<u64>,
}

impl CoverageSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Score a block log against the global set: the number of blocks
    /// not globally known.  Fresh blocks are recorded into the delta,
    /// or straight into the global set when `commit` is set (the
    /// sequential engine commits immediately so later queries in the
    /// same iteration see earlier queries' blocks).
    pub fn score_blocks(&self, blocks: &[u64], commit: bool) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let mut score = 0;
        for &block in blocks {
            if !inner.global.contains(&block) {
                score += 1;
                if commit {
                    inner.global.insert(block);
                } else {
                    inner.delta.insert(block);
                }
            }
        }
        score
    }

    /// Drop the delta accumulated so far (start of an iteration).
    pub fn clear_delta(&self) {
        self.inner.lock().unwrap().delta.clear();
    }

    /// Fold the delta into the global set; returns how many blocks
    /// were actually new.
    pub fn merge_delta(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let delta = std::mem::take(&mut inner.delta);
        let before = inner.global.len();
        inner.global.extend(delta);
        let added = inner.global.len() - before;
        if added > 0 {
            info!(
                "coverage: {added} new basic blocks (total {})",
                inner.global.len()
            );
        }
        added
    }

    /// Number of globally known blocks.
    pub fn global_len(&self) -> usize {
        self.inner.lock().unwrap().global.len()
    }

    #[cfg(test)]
    fn global_contains(&self, block: u64) -> bool {
        self.inner.lock().unwrap().global.contains(&block)
    }
}

impl Default for CoverageSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a packed basic-block log: an array of native-endian u64
/// block identifiers.  A trailing partial record is ignored.
pub fn read_block_log(path: impl AsRef<Path>) -> std::io::Result<Vec<u64>> {
    let raw = std::fs::read(path)?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fresh_blocks_score() {
        let cov = CoverageSet::new();
        assert_eq!(cov.score_blocks(&[1, 2, 3], false), 3);
    }

    #[test]
    fn duplicate_blocks_score_once_when_committing() {
        let cov = CoverageSet::new();
        assert_eq!(cov.score_blocks(&[7, 7, 7], true), 1);
    }

    #[test]
    fn delta_not_visible_until_merge() {
        let cov = CoverageSet::new();
        assert_eq!(cov.score_blocks(&[1, 2], false), 2);
        // Same blocks again, still scored fresh: the delta is not the
        // global set.
        assert_eq!(cov.score_blocks(&[1, 2], false), 2);
        assert_eq!(cov.merge_delta(), 2);
        assert_eq!(cov.score_blocks(&[1, 2], false), 0);
    }

    #[test]
    fn immediate_commit_is_visible_within_iteration() {
        let cov = CoverageSet::new();
        assert_eq!(cov.score_blocks(&[1, 2], true), 2);
        assert_eq!(cov.score_blocks(&[1, 2, 3], true), 1);
        assert_eq!(cov.global_len(), 3);
    }

    #[test]
    fn clear_delta_discards_iteration_blocks() {
        let cov = CoverageSet::new();
        cov.score_blocks(&[10], false);
        cov.clear_delta();
        assert_eq!(cov.merge_delta(), 0);
        assert!(!cov.global_contains(10));
    }

    #[test]
    fn coverage_grows_monotonically() {
        let cov = CoverageSet::new();
        let mut last = 0;
        for round in 0u64..5 {
            cov.score_blocks(&[round, round + 1], false);
            cov.merge_delta();
            let now = cov.global_len();
            assert!(now >= last);
            last = now;
        }
        // Union of {0,1},{1,2},{2,3},{3,4},{4,5}.
        assert_eq!(cov.global_len(), 6);
        // A round with nothing new leaves the set unchanged.
        cov.score_blocks(&[0, 5], false);
        assert_eq!(cov.merge_delta(), 0);
        assert_eq!(cov.global_len(), 6);
    }

    #[test]
    fn block_log_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("basic_blocks.log");
        let blocks: Vec<u64> = vec![0x400000, 0x400010, 0xFFFF_FFFF_0000_0001];
        let raw: Vec<u8> = blocks.iter().flat_map(|b| b.to_ne_bytes()).collect();
        std::fs::write(&path, raw).unwrap();

        assert_eq!(read_block_log(&path).unwrap(), blocks);
    }

    #[test]
    fn block_log_ignores_trailing_partial_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("basic_blocks.log");
        let mut raw: Vec<u8> = 0x1234u64.to_ne_bytes().to_vec();
        raw.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path, raw).unwrap();

        assert_eq!(read_block_log(&path).unwrap(), vec![0x1234]);
    }

    #[test]
    fn empty_block_log_scores_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("basic_blocks.log");
        std::fs::write(&path, b"").unwrap();
        let cov = CoverageSet::new();
        assert_eq!(cov.score_blocks(&read_block_log(&path).unwrap(), false), 0);
    }
}
