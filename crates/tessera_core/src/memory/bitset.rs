//! Live-slot tracking for chunk pools.

/// Growable bitset: 1 = chunk leased, 0 = chunk on the free-list.
///
/// At 64 slots per word, tracking 100K chunks costs ~12KB.
#[derive(Debug, Default)]
pub(crate) struct LiveSet {
    /// 64 slots per u64.
    bits: Vec<u64>,
    /// Cached number of set bits.
    live_count: usize,
}

impl LiveSet {
    /// Makes room for `slots` slots. Never shrinks.
    pub(crate) fn grow_to(&mut self, slots: usize) {
        let words = slots.div_ceil(64);
        if words > self.bits.len() {
            self.bits.resize(words, 0);
        }
    }

    /// Returns whether `slot` is live.
    #[inline]
    pub(crate) fn contains(&self, slot: usize) -> bool {
        let word = slot / 64;
        let bit = slot % 64;
        (self.bits.get(word).copied().unwrap_or(0) >> bit) & 1 == 1
    }

    /// Marks `slot` live. Returns `false` if it already was.
    #[inline]
    pub(crate) fn insert(&mut self, slot: usize) -> bool {
        let word = slot / 64;
        let mask = 1u64 << (slot % 64);
        let Some(bits) = self.bits.get_mut(word) else {
            return false;
        };
        if *bits & mask != 0 {
            return false;
        }
        *bits |= mask;
        self.live_count += 1;
        true
    }

    /// Marks `slot` free. Returns `false` if it was not live.
    #[inline]
    pub(crate) fn remove(&mut self, slot: usize) -> bool {
        let word = slot / 64;
        let mask = 1u64 << (slot % 64);
        let Some(bits) = self.bits.get_mut(word) else {
            return false;
        };
        if *bits & mask == 0 {
            return false;
        }
        *bits &= !mask;
        self.live_count -= 1;
        true
    }

    /// Number of live slots.
    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.live_count
    }

    /// Iterates live slot indices in ascending order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut remaining = word;
            std::iter::from_fn(move || {
                if remaining == 0 {
                    return None;
                }
                let bit = remaining.trailing_zeros() as usize;
                remaining &= remaining - 1;
                Some(word_idx * 64 + bit)
            })
        })
    }
}
