//! Hybrid quicksort over fixed-size byte elements.
//!
//! Partitions above the insertion threshold are split around a randomised
//! median-of-three pivot; smaller partitions are insertion sorted. Pending
//! ranges live on an explicit work-list rather than the call stack, and the
//! smaller half of every split is processed first so at most O(log n) ranges
//! are ever pending.
//!
//! The sort is **not stable**: elements whose keys compare equal may end up in
//! any relative order.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::{SortConfig, MIN_INSERTION_THRESHOLD};
use crate::error::Result;
use crate::slice::{check_value_size, Elements, ElementsMut, Slice};

/// Ascending lexicographic order of the raw element bytes.
pub fn bytes_ascending(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

pub fn bytes_descending(a: &[u8], b: &[u8]) -> Ordering {
    b.cmp(a)
}

/// Counters collected over one sort.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    pub partitions: usize,
    pub insertion_runs: usize,
    pub comparisons: usize,
    pub swaps: usize,
    /// Deepest the work-list of deferred ranges ever got.
    pub max_pending: usize,
}

// =============================================================================
// Comparison strategies
// =============================================================================

trait KeyCompare {
    fn compare(&mut self, bytes: &[u8], size: usize, a: usize, b: usize) -> Ordering;
}

fn element(bytes: &[u8], size: usize, index: usize) -> &[u8] {
    &bytes[index * size..(index + 1) * size]
}

struct ByElement<F>(F);

impl<F> KeyCompare for ByElement<F>
where
    F: FnMut(&[u8], &[u8]) -> Ordering,
{
    fn compare(&mut self, bytes: &[u8], size: usize, a: usize, b: usize) -> Ordering {
        (self.0)(element(bytes, size, a), element(bytes, size, b))
    }
}

struct ByKey<K, G, F> {
    key_of: G,
    compare: F,
    key: PhantomData<fn() -> K>,
}

impl<K, G, F> KeyCompare for ByKey<K, G, F>
where
    G: FnMut(&[u8], usize) -> K,
    F: FnMut(&K, &K) -> Ordering,
{
    fn compare(&mut self, bytes: &[u8], size: usize, a: usize, b: usize) -> Ordering {
        let key_a = (self.key_of)(element(bytes, size, a), a);
        let key_b = (self.key_of)(element(bytes, size, b), b);
        (self.compare)(&key_a, &key_b)
    }
}

// =============================================================================
// One sort pass over a borrowed element buffer
// =============================================================================

struct Pass<'p, C> {
    bytes: &'p mut [u8],
    size: usize,
    tmp: &'p mut [u8],
    compare: C,
    stats: SortStats,
}

impl<C: KeyCompare> Pass<'_, C> {
    fn cmp(&mut self, a: usize, b: usize) -> Ordering {
        self.stats.comparisons += 1;
        self.compare.compare(&*self.bytes, self.size, a, b)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.stats.swaps += 1;
        let size = self.size;
        self.tmp.copy_from_slice(&self.bytes[a * size..(a + 1) * size]);
        self.bytes.copy_within(b * size..(b + 1) * size, a * size);
        self.bytes[b * size..(b + 1) * size].copy_from_slice(&*self.tmp);
    }

    /// Sorts `[lo, hi)` by shifting each element left past greater predecessors.
    fn insertion(&mut self, lo: usize, hi: usize) {
        self.stats.insertion_runs += 1;
        for i in lo + 1..hi {
            let mut j = i;
            while j > lo && self.cmp(j - 1, j) == Ordering::Greater {
                self.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    /// Partitions `[lo, hi)` around the element at `pivot` and returns the
    /// pivot's final index. Everything left of it compares not greater, and
    /// everything right of it not less.
    fn partition(&mut self, lo: usize, hi: usize, pivot: usize) -> usize {
        self.stats.partitions += 1;
        let last = hi - 1;
        self.swap(pivot, last);

        let (mut i, mut j) = (lo, last);
        loop {
            while i < last && self.cmp(i, last) == Ordering::Less {
                i += 1;
            }
            while j > lo {
                j -= 1;
                if self.cmp(j, last) != Ordering::Greater {
                    break;
                }
            }
            if i >= j {
                break;
            }
            self.swap(i, j);
            i += 1;
        }

        self.swap(i, last);
        i
    }
}

// =============================================================================
// SortEngine
// =============================================================================

/// Sorts anything exposing [`ElementsMut`], slices and views alike.
///
/// Scratch space (a three-index buffer for pivot candidates and a one-element
/// swap buffer) comes from the target's own allocator. If that allocation
/// fails the sort returns `AllocationFailure` before touching any element.
#[derive(Debug)]
pub struct SortEngine {
    config: SortConfig,
    rng: StdRng,
}

impl Default for SortEngine {
    fn default() -> Self {
        SortEngine::new()
    }
}

impl SortEngine {
    pub fn new() -> Self {
        SortEngine::with_config(SortConfig::default())
    }

    /// Thresholds below two are raised to two.
    pub fn with_config(config: SortConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        SortEngine { config, rng }
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    fn threshold(&self) -> usize {
        self.config.insertion_threshold.max(MIN_INSERTION_THRESHOLD)
    }

    /// Ascending byte order.
    pub fn sort<'a, S>(&mut self, target: &mut S) -> Result<SortStats>
    where
        S: ElementsMut<'a> + ?Sized,
    {
        self.sort_by(target, bytes_ascending)
    }

    pub fn sort_by<'a, S, F>(&mut self, target: &mut S, compare: F) -> Result<SortStats>
    where
        S: ElementsMut<'a> + ?Sized,
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.run(target, ByElement(compare))
    }

    /// Orders elements by `compare` applied to `key_of(element, index)`, where
    /// `index` is the element's position at the time of the comparison.
    pub fn sort_by_key<'a, S, K, G, F>(
        &mut self,
        target: &mut S,
        key_of: G,
        compare: F,
    ) -> Result<SortStats>
    where
        S: ElementsMut<'a> + ?Sized,
        G: FnMut(&[u8], usize) -> K,
        F: FnMut(&K, &K) -> Ordering,
    {
        self.run(
            target,
            ByKey {
                key_of,
                compare,
                key: PhantomData,
            },
        )
    }

    /// Compares elements decoded as `T`, whose size must equal the element size.
    pub fn sort_values_by<'a, S, T, F>(
        &mut self,
        target: &mut S,
        mut compare: F,
    ) -> Result<SortStats>
    where
        S: ElementsMut<'a> + ?Sized,
        T: Pod,
        F: FnMut(&T, &T) -> Ordering,
    {
        check_value_size::<T>(target.element_size())?;
        self.sort_by(target, move |a: &[u8], b: &[u8]| {
            let a: T = bytemuck::pod_read_unaligned(a);
            let b: T = bytemuck::pod_read_unaligned(b);
            compare(&a, &b)
        })
    }

    fn run<'a, S, C>(&mut self, target: &mut S, compare: C) -> Result<SortStats>
    where
        S: ElementsMut<'a> + ?Sized,
        C: KeyCompare,
    {
        let len = target.len();
        if len <= 1 {
            return Ok(SortStats::default());
        }

        let size = target.element_size();
        let threshold = self.threshold();
        let allocator = target.allocator();

        let mut swap_slot = Slice::new_in(1, 1, size, allocator)?;
        let mut picks = if len > threshold {
            Some(Slice::new_in(3, 3, mem::size_of::<usize>(), allocator)?)
        } else {
            None
        };

        let mut pass = Pass {
            bytes: target.as_bytes_mut(),
            size,
            tmp: swap_slot.as_bytes_mut(),
            compare,
            stats: SortStats::default(),
        };

        match picks.as_mut() {
            Some(picks) => self.quicksort(&mut pass, picks, len, threshold)?,
            None => pass.insertion(0, len),
        }

        let stats = pass.stats;
        debug!(
            len,
            element_size = size,
            partitions = stats.partitions,
            insertion_runs = stats.insertion_runs,
            comparisons = stats.comparisons,
            swaps = stats.swaps,
            max_pending = stats.max_pending,
            "sort finished"
        );
        Ok(stats)
    }

    fn quicksort<C: KeyCompare>(
        &mut self,
        pass: &mut Pass<'_, C>,
        picks: &mut Slice<'_>,
        len: usize,
        threshold: usize,
    ) -> Result<()> {
        let mut pending: Vec<(usize, usize)> = Vec::with_capacity(usize::BITS as usize);
        pending.push((0, len));

        while let Some((mut lo, mut hi)) = pending.pop() {
            while hi - lo > threshold {
                let pivot = self.median_of_three(pass, picks, lo, hi)?;
                let split = pass.partition(lo, hi, pivot);

                let left = (lo, split);
                let right = (split + 1, hi);
                let (smaller, larger) = if split - lo <= hi - split - 1 {
                    (left, right)
                } else {
                    (right, left)
                };
                pending.push(larger);
                pass.stats.max_pending = pass.stats.max_pending.max(pending.len());
                (lo, hi) = smaller;
            }
            if hi - lo > 1 {
                pass.insertion(lo, hi);
            }
        }
        Ok(())
    }

    /// Picks three distinct random indices in `[lo, hi)`, orders them by key
    /// and returns the middle one.
    fn median_of_three<C: KeyCompare>(
        &mut self,
        pass: &mut Pass<'_, C>,
        picks: &mut Slice<'_>,
        lo: usize,
        hi: usize,
    ) -> Result<usize> {
        for slot in 0..3 {
            let mut candidate = self.rng.gen_range(lo..hi);
            while (0..slot).any(|taken| picks.get_value::<usize>(taken) == Ok(candidate)) {
                candidate = self.rng.gen_range(lo..hi);
            }
            picks.set_value(slot, candidate)?;
        }

        for slot in 1..3 {
            let mut at = slot;
            while at > 0 {
                let before: usize = picks.get_value(at - 1)?;
                let current: usize = picks.get_value(at)?;
                if pass.cmp(before, current) != Ordering::Greater {
                    break;
                }
                picks.set_value(at - 1, current)?;
                picks.set_value(at, before)?;
                at -= 1;
            }
        }

        picks.get_value(1)
    }
}

impl<'a> Slice<'a> {
    /// Sorts with a fresh entropy-seeded [`SortEngine`].
    pub fn sort_by<F>(&mut self, compare: F) -> Result<SortStats>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        SortEngine::new().sort_by(self, compare)
    }

    pub fn sort_by_key<K, G, F>(&mut self, key_of: G, compare: F) -> Result<SortStats>
    where
        G: FnMut(&[u8], usize) -> K,
        F: FnMut(&K, &K) -> Ordering,
    {
        SortEngine::new().sort_by_key(self, key_of, compare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Arena;
    use crate::error::SliceError;
    use proptest::prelude::*;

    fn engine() -> SortEngine {
        SortEngine::with_config(SortConfig::seeded(0x5eed))
    }

    fn random_ints(count: usize, seed: u64) -> Vec<i32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| rng.gen_range(-500..500)).collect()
    }

    fn sort_ints(values: &[i32]) -> (Vec<i32>, SortStats) {
        let mut slice = Slice::from_values(values).unwrap();
        let stats = engine().sort_values_by(&mut slice, i32::cmp).unwrap();
        (slice.to_vec::<i32>().unwrap(), stats)
    }

    fn assert_ascending(values: &[i32]) {
        assert!(values.windows(2).all(|pair| pair[0] <= pair[1]), "{values:?}");
    }

    #[test]
    fn test_sorts_required_sizes() {
        for (count, seed) in [(1, 1), (2, 2), (16, 3), (17, 4), (1000, 5)] {
            let input = random_ints(count, seed);
            let (sorted, _) = sort_ints(&input);

            let mut expected = input.clone();
            expected.sort_unstable();
            assert_eq!(sorted, expected, "count {count}");
            assert_ascending(&sorted);
        }
    }

    #[test]
    fn test_empty_and_single_do_nothing() {
        let mut slice = Slice::new(0, 4, 4).unwrap();
        assert_eq!(engine().sort(&mut slice).unwrap(), SortStats::default());

        let mut single = Slice::from_values(&[42u32]).unwrap();
        assert_eq!(engine().sort(&mut single).unwrap(), SortStats::default());
        assert_eq!(single.to_vec::<u32>().unwrap(), vec![42]);
    }

    #[test]
    fn test_small_input_uses_insertion_only() {
        let (sorted, stats) = sort_ints(&[5, 3, 9, 1, 1, 0, -4]);
        assert_eq!(sorted, vec![-4, 0, 1, 1, 3, 5, 9]);
        assert_eq!(stats.partitions, 0);
        assert_eq!(stats.insertion_runs, 1);
    }

    #[test]
    fn test_already_sorted_keeps_order() {
        let input: Vec<i32> = (0..500).collect();
        let (sorted, stats) = sort_ints(&input);
        assert_eq!(sorted, input);
        assert!(stats.partitions > 0);
    }

    #[test]
    fn test_all_equal_terminates() {
        let input = vec![7i32; 2000];
        let (sorted, stats) = sort_ints(&input);
        assert_eq!(sorted.len(), 2000);
        assert!(sorted.iter().all(|&v| v == 7));
        // Equal keys split evenly, so the work-list stays shallow.
        assert!(stats.max_pending <= 12, "{stats:?}");
    }

    #[test]
    fn test_descending_is_reverse_of_ascending() {
        let input = random_ints(300, 9);
        let mut asc = Slice::from_values(&input).unwrap();
        let mut desc = Slice::from_values(&input).unwrap();

        engine().sort_values_by(&mut asc, i32::cmp).unwrap();
        engine()
            .sort_values_by(&mut desc, |a: &i32, b: &i32| b.cmp(a))
            .unwrap();

        let mut reversed = asc.to_vec::<i32>().unwrap();
        reversed.reverse();
        assert_eq!(desc.to_vec::<i32>().unwrap(), reversed);
    }

    #[test]
    fn test_byte_comparators() {
        let mut slice = Slice::from_values(&[[3u8, 1], [1, 9], [3, 0], [0, 0]]).unwrap();
        let mut engine = engine();

        engine.sort(&mut slice).unwrap();
        assert_eq!(
            slice.to_vec::<[u8; 2]>().unwrap(),
            vec![[0, 0], [1, 9], [3, 0], [3, 1]]
        );

        engine.sort_by(&mut slice, bytes_descending).unwrap();
        assert_eq!(
            slice.to_vec::<[u8; 2]>().unwrap(),
            vec![[3, 1], [3, 0], [1, 9], [0, 0]]
        );
    }

    #[test]
    fn test_sort_by_key_extracts_field() {
        // Records of (key: u32, payload: u32); only the key takes part in ordering.
        let records: Vec<[u32; 2]> = (0..200u32).map(|i| [(i * 7919) % 101, i]).collect();
        let mut slice = Slice::from_values(&records).unwrap();

        engine()
            .sort_by_key(
                &mut slice,
                |element, _| bytemuck::pod_read_unaligned::<u32>(&element[..4]),
                |a: &u32, b: &u32| a.cmp(b),
            )
            .unwrap();

        let sorted = slice.to_vec::<[u32; 2]>().unwrap();
        assert!(sorted.windows(2).all(|pair| pair[0][0] <= pair[1][0]));
        let mut payloads: Vec<u32> = sorted.iter().map(|record| record[1]).collect();
        payloads.sort_unstable();
        assert_eq!(payloads, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_is_not_stable() {
        // Every key is equal; the payload records the original position.
        let records: Vec<[u32; 2]> = (0..64u32).map(|i| [1, i]).collect();
        let mut slice = Slice::from_values(&records).unwrap();

        engine()
            .sort_values_by(&mut slice, |a: &[u32; 2], b: &[u32; 2]| a[0].cmp(&b[0]))
            .unwrap();

        let payloads: Vec<u32> = slice
            .to_vec::<[u32; 2]>()
            .unwrap()
            .iter()
            .map(|record| record[1])
            .collect();
        assert_ne!(payloads, (0..64).collect::<Vec<_>>());

        let mut restored = payloads.clone();
        restored.sort_unstable();
        assert_eq!(restored, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_sorts_through_view() {
        let mut slice = Slice::from_values(&[9i32, 8, 7, 6, 5, 4, 3, 2, 1, 0]).unwrap();
        {
            let mut view = slice.view_mut(2, 6).unwrap();
            engine().sort_values_by(&mut view, i32::cmp).unwrap();
        }
        assert_eq!(
            slice.to_vec::<i32>().unwrap(),
            vec![9, 8, 2, 3, 4, 5, 6, 7, 1, 0]
        );
    }

    #[test]
    fn test_scratch_failure_leaves_elements_present() {
        let arena = Arena::new(96).unwrap();
        let input: Vec<u32> = (0..20).rev().collect();
        let mut slice = Slice::from_values_in(&input, &arena).unwrap();
        assert_eq!(arena.used(), 80);

        // The swap slot fits, the three pivot indices do not.
        let err = engine().sort(&mut slice).unwrap_err();
        assert!(matches!(err, SliceError::AllocationFailure(_)));
        assert_eq!(arena.used(), 80);

        let mut present = slice.to_vec::<u32>().unwrap();
        present.sort_unstable();
        assert_eq!(present, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_scratch_is_released() {
        let arena = Arena::new(512).unwrap();
        let input = random_ints(50, 11);
        let mut slice = Slice::from_values_in(&input, &arena).unwrap();
        let used = arena.used();
        let mut engine = engine();

        for round in 0..40 {
            engine.sort_values_by(&mut slice, |a: &i32, b: &i32| b.cmp(a)).unwrap();
            engine.sort_values_by(&mut slice, i32::cmp).unwrap();
            assert_eq!(arena.used(), used, "round {round}");
            assert_eq!(arena.live_blocks(), 1);
        }
        assert_ascending(&slice.to_vec::<i32>().unwrap());
    }

    #[test]
    fn test_value_size_mismatch_rejected() {
        let mut slice = Slice::from_values(&[3u64, 1, 2]).unwrap();
        let result = engine().sort_values_by(&mut slice, u32::cmp);
        assert!(matches!(result, Err(SliceError::InvalidArgument(_))));
    }

    #[test]
    fn test_threshold_from_config() {
        let input = random_ints(40, 21);

        let mut slice = Slice::from_values(&input).unwrap();
        let config = SortConfig {
            insertion_threshold: 64,
            seed: Some(1),
        };
        let stats = SortEngine::with_config(config)
            .sort_values_by(&mut slice, i32::cmp)
            .unwrap();
        assert_eq!(stats.partitions, 0);

        let mut slice = Slice::from_values(&input).unwrap();
        let config = SortConfig {
            insertion_threshold: 0,
            seed: Some(1),
        };
        let stats = SortEngine::with_config(config)
            .sort_values_by(&mut slice, i32::cmp)
            .unwrap();
        assert!(stats.partitions > 0);
        assert_ascending(&slice.to_vec::<i32>().unwrap());
    }

    #[test]
    fn test_seeded_engines_agree() {
        let input = random_ints(300, 13);
        let (_, first) = sort_ints(&input);
        let (_, second) = sort_ints(&input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_slice_convenience_methods() {
        let mut slice = Slice::from_values(&[4u8, 2, 8, 6]).unwrap();
        slice.sort_by(bytes_ascending).unwrap();
        assert_eq!(slice.to_vec::<u8>().unwrap(), vec![2, 4, 6, 8]);

        slice
            .sort_by_key(|element, _| element[0] % 4, |a: &u8, b: &u8| a.cmp(b))
            .unwrap();
        let keys: Vec<u8> = slice.iter().map(|element| element[0] % 4).collect();
        assert_eq!(keys, vec![0, 0, 2, 2]);
    }

    proptest! {
        #[test]
        fn prop_sort_matches_std(
            values in prop::collection::vec(any::<i32>(), 0..400),
            seed in any::<u64>(),
        ) {
            let mut slice = Slice::from_values(&values)
                .unwrap_or_else(|_| Slice::new(0, 1, 4).unwrap());
            SortEngine::with_config(SortConfig::seeded(seed))
                .sort_values_by(&mut slice, i32::cmp)
                .unwrap();

            let mut expected = values.clone();
            expected.sort_unstable();
            prop_assert_eq!(slice.to_vec::<i32>().unwrap(), expected);
        }

        #[test]
        fn prop_work_list_stays_logarithmic(values in prop::collection::vec(0u8..4, 32..2000)) {
            let mut slice = Slice::from_values(&values).unwrap();
            let stats = engine().sort(&mut slice).unwrap();
            let bound = (usize::BITS - values.len().leading_zeros()) as usize;
            prop_assert!(stats.max_pending <= bound, "{:?} for {}", stats, values.len());
        }
    }
}
