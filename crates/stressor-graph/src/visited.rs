use std::sync::atomic::{AtomicU32, Ordering};

/// Concurrent visited set packed into 32-bit words.
#[derive(Debug)]
pub struct VisitedBits {
    words: Vec<AtomicU32>,
    len: usize,
}

impl VisitedBits {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: (0..len.div_ceil(32)).map(|_| AtomicU32::new(0)).collect(),
            len,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Claim `vertex`. Returns `true` for exactly one caller per vertex; later
    /// and losing callers get `false`, as do out-of-range vertices.
    pub fn mark(&self, vertex: usize) -> bool {
        if vertex >= self.len {
            return false;
        }
        let word = &self.words[vertex >> 5];
        let mask = 1_u32 << (vertex & 31);
        let mut old = word.load(Ordering::Acquire);
        loop {
            if old & mask != 0 {
                return false;
            }
            let claimed = old | mask;
            match word.compare_exchange_weak(old, claimed, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(current) => old = current,
            }
        }
    }

    #[must_use]
    pub fn is_marked(&self, vertex: usize) -> bool {
        if vertex >= self.len {
            return false;
        }
        let word = self.words[vertex >> 5].load(Ordering::Acquire);
        word & (1 << (vertex & 31)) != 0
    }

    /// Number of claimed vertices.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_wins_second_loses() {
        let bits = VisitedBits::new(40);
        assert!(bits.mark(33));
        assert!(!bits.mark(33));
        assert!(bits.is_marked(33));
        assert!(!bits.is_marked(32));
        assert_eq!(bits.count(), 1);
    }

    #[test]
    fn out_of_range_is_never_marked() {
        let bits = VisitedBits::new(5);
        assert!(!bits.mark(5));
        assert!(!bits.is_marked(5));
        assert_eq!(bits.count(), 0);
    }

    #[test]
    fn concurrent_marks_have_one_winner_per_vertex() {
        let bits = VisitedBits::new(256);
        let wins: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| (0..256).filter(|&v| bits.mark(v)).count()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("marker thread"))
                .sum()
        });
        assert_eq!(wins, 256);
        assert_eq!(bits.count(), 256);
    }
}
