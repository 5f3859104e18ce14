//! Bitmap tracking of which byte ranges of a partial message have arrived.
//!
//! One bit per message byte. The bitmap is dropped the instant every bit is
//! set; an absent bitmap means the message is complete.

/// Coverage state of one in-progress message.
#[derive(Debug)]
enum Coverage {
    /// Bitmap with one bit per message byte, bit `i` at `bitmap[i / 8]`,
    /// position `i % 8`.
    Partial(Vec<u8>),
    /// Every byte has arrived. No bitmap is kept.
    Complete,
}

/// Tracks received byte ranges of one message and detects completion.
#[derive(Debug)]
pub struct FragmentReassembler {
    length: usize,
    coverage: Coverage,
}

impl FragmentReassembler {
    /// Create a reassembler for a message of `length` bytes.
    ///
    /// A zero-length message is complete from the start and never allocates
    /// a bitmap.
    pub fn new(length: usize) -> Self {
        let coverage = if length == 0 {
            Coverage::Complete
        } else {
            Coverage::Partial(vec![0; length.div_ceil(8)])
        };
        FragmentReassembler { length, coverage }
    }

    /// True once every byte of the message has been marked.
    pub fn is_complete(&self) -> bool {
        matches!(self.coverage, Coverage::Complete)
    }

    /// Whether the byte at `index` has already been marked.
    pub fn is_marked(&self, index: usize) -> bool {
        debug_assert!(index < self.length);
        match &self.coverage {
            Coverage::Complete => true,
            Coverage::Partial(bitmap) => bitmap[index / 8] & (1 << (index % 8)) != 0,
        }
    }

    /// Mark the byte range `[start, end)` as received.
    ///
    /// The range must lie within the message; a violation is a programming
    /// defect in the caller, not a wire condition.
    pub fn mark(&mut self, start: usize, end: usize) {
        assert!(
            start <= end && end <= self.length,
            "mark range out of bounds: [{start}, {end}) in {}",
            self.length
        );

        let Coverage::Partial(bitmap) = &mut self.coverage else {
            return;
        };

        if start < end {
            let first = start / 8;
            let last = (end - 1) / 8;
            let head = 0xffu8 << (start % 8);
            let tail = 0xffu8 >> (7 - (end - 1) % 8);

            if first == last {
                bitmap[first] |= head & tail;
            } else {
                bitmap[first] |= head;
                for b in &mut bitmap[first + 1..last] {
                    *b = 0xff;
                }
                bitmap[last] |= tail;
            }
        }

        // Full rescan after every mark. O(length / 8), acceptable for the
        // bounded message sizes this layer handles.
        if Self::scan_complete(bitmap, self.length) {
            self.coverage = Coverage::Complete;
        }
    }

    fn scan_complete(bitmap: &[u8], length: usize) -> bool {
        let full = length / 8;
        if bitmap[..full].iter().any(|b| *b != 0xff) {
            return false;
        }
        let trailing = length % 8;
        trailing == 0 || bitmap[full] == (1 << trailing) - 1
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_length_is_immediately_complete() {
        let r = FragmentReassembler::new(0);
        assert!(r.is_complete());
    }

    #[test]
    fn completes_exactly_when_covered() {
        let mut r = FragmentReassembler::new(300);
        r.mark(0, 100);
        assert!(!r.is_complete());
        r.mark(200, 300);
        assert!(!r.is_complete());
        r.mark(100, 200);
        assert!(r.is_complete());
    }

    #[test]
    fn order_independent_with_overlap() {
        // Cover [0, 61) with overlapping ranges in several permutations.
        let ranges = [(30usize, 61usize), (0, 17), (10, 40), (15, 35)];
        let perms: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];

        for perm in perms {
            let mut r = FragmentReassembler::new(61);
            let mut completions = 0;
            for i in perm {
                let (s, e) = ranges[i];
                let before = r.is_complete();
                r.mark(s, e);
                if !before && r.is_complete() {
                    completions += 1;
                }
            }
            assert!(r.is_complete());
            assert_eq!(completions, 1, "completion must trigger exactly once");
        }
    }

    #[test]
    fn remarking_never_uncompletes() {
        let mut r = FragmentReassembler::new(16);
        r.mark(0, 16);
        assert!(r.is_complete());
        r.mark(4, 12);
        assert!(r.is_complete());
    }

    #[test]
    fn partial_byte_masks() {
        let mut r = FragmentReassembler::new(20);
        // Range within a single bitmap byte.
        r.mark(2, 5);
        assert!(!r.is_marked(1));
        assert!(r.is_marked(2));
        assert!(r.is_marked(4));
        assert!(!r.is_marked(5));
        // Range spanning byte boundaries.
        r.mark(5, 19);
        assert!(r.is_marked(18));
        assert!(!r.is_marked(19));
        assert!(!r.is_complete());
        r.mark(0, 20);
        assert!(r.is_complete());
    }

    #[test]
    fn empty_range_is_allowed() {
        let mut r = FragmentReassembler::new(8);
        r.mark(3, 3);
        assert!(!r.is_complete());
        assert!(!r.is_marked(3));
    }

    #[test]
    #[should_panic]
    fn mark_beyond_length_panics() {
        let mut r = FragmentReassembler::new(8);
        r.mark(4, 9);
    }
}
