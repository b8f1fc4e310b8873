//! Open-Addressing Identifier Set
//!
//! An exact membership set for non-zero 64-bit method handles. Host runtimes
//! hand out method handles in tight numeric ranges, so the primary slot is
//! simply `id & mask`: neighbouring ids land in neighbouring slots and
//! lookups stay cache friendly. On collision the search walks a few slots
//! linearly and then jumps to an avalanche-hashed position, which keeps
//! clustered ids from building long runs.
//!
//! The set performs no locking. One writer owns an instance at a time.

use super::hash::AvalancheMix;
use crate::result::{RecorderError, RecorderResult};

/// Empty slot marker
const EMPTY: u64 = 0;

/// Default table size exponent (262,144 slots)
pub const DEFAULT_CAPACITY_BITS: u32 = 18;

/// Smallest table a caller may request
const MIN_CAPACITY_BITS: u32 = 4;

/// Largest table the slot index can address
pub const MAX_CAPACITY_BITS: u32 = 48;

/// Linear steps taken before re-hashing the search value
const LINEAR_STEPS: u8 = 3;

/// Exact set of non-zero `u64` identifiers
#[derive(Debug, Clone)]
pub struct IdentifierSet {
    slots: Vec<u64>,
    mask: u64,
    len: usize,
    initial_bits: u32,
    max_bits: u32,
}

/// Slot position generator shared by insert and lookup
///
/// Both operations must walk the identical sequence, otherwise a lookup could
/// stop at an empty slot before reaching the slot an insert chose.
struct SlotWalk {
    value: u64,
    position: usize,
    linear: u8,
    steps: usize,
    mask: u64,
}

impl SlotWalk {
    #[inline]
    fn start(id: u64, mask: u64) -> Self {
        Self {
            value: id,
            position: (id & mask) as usize,
            linear: 0,
            steps: 0,
            mask,
        }
    }

    #[inline]
    fn advance(&mut self) {
        self.steps += 1;
        // After a full table's worth of steps, fall back to a plain linear
        // walk. With load <= 0.5 this always reaches an empty slot.
        if self.steps as u64 > self.mask {
            self.position = (self.position + 1) & self.mask as usize;
            return;
        }
        if self.linear == LINEAR_STEPS {
            self.linear = 0;
            self.value = self.value.avalanche();
        } else {
            self.value = self.value.wrapping_add(1);
            self.linear += 1;
        }
        self.position = (self.value & self.mask) as usize;
    }
}

/// Result of walking the slot sequence for one id
enum Slot {
    Present,
    Vacant(usize),
}

impl IdentifierSet {
    /// Create a set with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity_bits(DEFAULT_CAPACITY_BITS)
    }

    /// Create a set with `2^bits` initial slots
    ///
    /// `bits` is clamped to a sane range; [`clear`](Self::clear) returns to
    /// this capacity.
    #[must_use]
    pub fn with_capacity_bits(bits: u32) -> Self {
        Self::with_capacity_limits(bits, MAX_CAPACITY_BITS)
    }

    /// Create a set with `2^initial_bits` slots that never grows past
    /// `2^max_bits` slots
    ///
    /// Once the ceiling is reached, inserting a new id fails with
    /// [`RecorderError::SetGrowth`].
    #[must_use]
    pub fn with_capacity_limits(initial_bits: u32, max_bits: u32) -> Self {
        let max_bits = max_bits.clamp(MIN_CAPACITY_BITS, MAX_CAPACITY_BITS);
        let bits = initial_bits.clamp(MIN_CAPACITY_BITS, max_bits);
        let capacity = 1usize << bits;
        Self {
            slots: vec![EMPTY; capacity],
            mask: (capacity - 1) as u64,
            len: 0,
            initial_bits: bits,
            max_bits,
        }
    }

    /// Insert an identifier
    ///
    /// Returns `Ok(true)` if the id was not present before. Zero is rejected
    /// with [`RecorderError::ReservedIdentifier`]; a failed table allocation
    /// surfaces as [`RecorderError::SetGrowth`] and leaves the set unchanged.
    pub fn insert(&mut self, id: u64) -> RecorderResult<bool> {
        debug_assert_ne!(id, EMPTY, "the empty-slot sentinel cannot be inserted");
        if id == EMPTY {
            return Err(RecorderError::ReservedIdentifier);
        }

        let position = match self.find(id) {
            Slot::Present => return Ok(false),
            Slot::Vacant(position) => position,
        };

        if (self.len + 1) * 2 > self.slots.len() {
            self.grow()?;
            let Slot::Vacant(position) = self.find(id) else {
                return Ok(false);
            };
            self.slots[position] = id;
        } else {
            self.slots[position] = id;
        }
        self.len += 1;
        Ok(true)
    }

    /// Check membership. Exact: no false positives, no false negatives.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        id != EMPTY && matches!(self.find(id), Slot::Present)
    }

    /// Remove all identifiers and shrink back to the initial capacity
    pub fn clear(&mut self) {
        let capacity = 1usize << self.initial_bits;
        self.slots = vec![EMPTY; capacity];
        self.mask = (capacity - 1) as u64;
        self.len = 0;
    }

    /// Number of identifiers in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, the upper bound for [`at`](Self::at)
    #[must_use]
    pub fn capacity_for_iteration(&self) -> usize {
        self.slots.len()
    }

    /// Identifier stored in slot `index`, or `None` for an empty or
    /// out-of-range slot
    #[must_use]
    pub fn at(&self, index: usize) -> Option<u64> {
        self.slots.get(index).copied().filter(|&id| id != EMPTY)
    }

    /// Iterate over all identifiers in slot order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots.iter().copied().filter(|&id| id != EMPTY)
    }

    /// Current load factor
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.slots.len() as f64
    }

    fn find(&self, id: u64) -> Slot {
        let mut walk = SlotWalk::start(id, self.mask);
        loop {
            let current = self.slots[walk.position];
            if current == id {
                return Slot::Present;
            }
            if current == EMPTY {
                return Slot::Vacant(walk.position);
            }
            walk.advance();
        }
    }

    /// Double the table and reinsert every element at its new slot position
    fn grow(&mut self) -> RecorderResult<()> {
        let capacity = self.slots.len() * 2;
        if capacity > 1usize << self.max_bits {
            return Err(RecorderError::SetGrowth { capacity });
        }

        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(capacity)
            .map_err(|_| RecorderError::SetGrowth { capacity })?;
        fresh.resize(capacity, EMPTY);

        let old = std::mem::replace(&mut self.slots, fresh);
        self.mask = (capacity - 1) as u64;
        for id in old.into_iter().filter(|&id| id != EMPTY) {
            if let Slot::Vacant(position) = self.find(id) {
                self.slots[position] = id;
            }
        }
        tracing::debug!(capacity, len = self.len, "identifier set grown");
        Ok(())
    }
}

impl Default for IdentifierSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<u64> for IdentifierSet {
    /// Zero ids are skipped; growth failures stop the extension early.
    fn extend<T: IntoIterator<Item = u64>>(&mut self, iter: T) {
        for id in iter {
            if id == EMPTY {
                continue;
            }
            if self.insert(id).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_insert_and_contains() {
        let mut set = IdentifierSet::with_capacity_bits(8);
        assert!(set.insert(42).unwrap());
        assert!(!set.insert(42).unwrap());
        assert!(set.contains(42));
        assert!(!set.contains(43));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_zero_is_never_contained() {
        let set = IdentifierSet::with_capacity_bits(8);
        assert!(!set.contains(0));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_zero_insert_returns_error() {
        let mut set = IdentifierSet::with_capacity_bits(8);
        assert!(matches!(
            set.insert(0),
            Err(RecorderError::ReservedIdentifier)
        ));
        assert!(set.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "sentinel")]
    fn test_zero_insert_asserts_in_debug() {
        let mut set = IdentifierSet::with_capacity_bits(8);
        let _ = set.insert(0);
    }

    #[test]
    fn test_growth_stops_at_ceiling() {
        let mut set = IdentifierSet::with_capacity_limits(4, 5);
        // 32 slots at load factor 1/2 hold 16 ids.
        for id in 1..=16u64 {
            assert!(set.insert(id).unwrap());
        }
        assert!(matches!(
            set.insert(17),
            Err(RecorderError::SetGrowth { capacity: 64 })
        ));
        assert_eq!(set.len(), 16);
        assert!(!set.contains(17));
        assert!((1..=16).all(|id| set.contains(id)));
        // Known ids are still answered without growing.
        assert!(!set.insert(16).unwrap());
    }

    #[test]
    fn test_initial_capacity_is_clamped_to_ceiling() {
        let set = IdentifierSet::with_capacity_limits(DEFAULT_CAPACITY_BITS, 6);
        assert_eq!(set.capacity_for_iteration(), 64);
    }

    #[test]
    fn test_default_capacity() {
        let set = IdentifierSet::new();
        assert_eq!(set.capacity_for_iteration(), 1 << DEFAULT_CAPACITY_BITS);
    }

    #[test]
    fn test_load_factor_never_exceeds_half() {
        let mut set = IdentifierSet::with_capacity_bits(4);
        for id in 1..=1_000u64 {
            set.insert(id * 7).unwrap();
            assert!(set.load_factor() <= 0.5, "load {} at {id}", set.load_factor());
        }
    }

    #[test]
    fn test_growth_preserves_membership_across_three_resizes() {
        let mut set = IdentifierSet::with_capacity_bits(6);
        let initial = set.capacity_for_iteration();
        let ids: Vec<u64> = (0..2_000u64).map(|i| 0x7ff8_0000 + i * 3).collect();
        for &id in &ids {
            set.insert(id).unwrap();
        }
        assert!(set.capacity_for_iteration() >= initial * 8);
        for &id in &ids {
            assert!(set.contains(id), "lost {id:#x}");
        }
        assert_eq!(set.len(), ids.len());
    }

    #[test]
    fn test_clustered_ids_with_shared_low_bits() {
        // Ids that all collide on the primary slot.
        let mut set = IdentifierSet::with_capacity_bits(10);
        let ids: Vec<u64> = (1..=300u64).map(|i| i << 20).collect();
        for &id in &ids {
            assert!(set.insert(id).unwrap());
        }
        assert!(ids.iter().all(|&id| set.contains(id)));
        assert!(!set.contains(301 << 20));
    }

    #[test]
    fn test_clear_resets_capacity() {
        let mut set = IdentifierSet::with_capacity_bits(5);
        for id in 1..=100 {
            set.insert(id).unwrap();
        }
        assert!(set.capacity_for_iteration() > 32);
        set.clear();
        assert_eq!(set.capacity_for_iteration(), 32);
        assert!(set.is_empty());
        assert!(!set.contains(50));
    }

    #[test]
    fn test_bulk_export_via_at() {
        let mut set = IdentifierSet::with_capacity_bits(6);
        for id in [5u64, 17, 99, u64::MAX] {
            set.insert(id).unwrap();
        }
        let mut exported: Vec<u64> = (0..set.capacity_for_iteration())
            .filter_map(|i| set.at(i))
            .collect();
        exported.sort_unstable();
        assert_eq!(exported, vec![5, 17, 99, u64::MAX]);
        assert_eq!(set.at(set.capacity_for_iteration()), None);
    }

    #[test]
    fn test_extend_skips_zero() {
        let mut set = IdentifierSet::with_capacity_bits(6);
        set.extend([0u64, 1, 2, 2, 3]);
        assert_eq!(set.len(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_set_is_exact(
            inserted in proptest::collection::hash_set(1u64..u64::MAX, 0..3_000),
            lookups in proptest::collection::vec(1u64..u64::MAX, 0..500),
        ) {
            let mut set = IdentifierSet::with_capacity_bits(5);
            for &id in &inserted {
                prop_assert!(set.insert(id).unwrap());
            }
            prop_assert_eq!(set.len(), inserted.len());
            for &id in &inserted {
                prop_assert!(set.contains(id));
            }
            for id in lookups {
                prop_assert_eq!(set.contains(id), inserted.contains(&id));
            }
        }

        #[test]
        fn prop_dense_ranges_are_exact(start in 1u64..u64::MAX / 2, count in 1usize..4_000) {
            let mut set = IdentifierSet::with_capacity_bits(4);
            for offset in 0..count as u64 {
                set.insert(start + offset * 2).unwrap();
            }
            for offset in 0..count as u64 {
                prop_assert!(set.contains(start + offset * 2));
                prop_assert!(!set.contains(start + offset * 2 + 1));
            }
        }
    }
}
