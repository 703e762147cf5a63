//! Row bitmaps used by filters.

/// A fixed-size set of row indexes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap of `len` bits with every bit cleared.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Creates a bitmap of `len` bits with every bit set.
    pub fn new_set(len: usize) -> Self {
        let mut bm = Self::new(len);
        bm.set_all();
        bm
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_all(&mut self) {
        for w in &mut self.words {
            *w = u64::MAX;
        }
        self.clear_tail();
    }

    pub fn reset_all(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }

    fn clear_tail(&mut self) {
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    pub fn is_set(&self, i: usize) -> bool {
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    pub fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    pub fn clear(&mut self, i: usize) {
        self.words[i / 64] &= !(1u64 << (i % 64));
    }

    /// Returns true if no bit is set.
    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Returns true if every bit is set.
    pub fn are_all_set(&self) -> bool {
        self.ones_count() == self.len
    }

    pub fn ones_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn copy_from(&mut self, src: &Bitmap) {
        self.words.clear();
        self.words.extend_from_slice(&src.words);
        self.len = src.len;
    }

    /// Clears the bits set in `x`.
    pub fn and_not(&mut self, x: &Bitmap) {
        assert_eq!(self.len, x.len, "BUG: bitmaps must have equal lengths");
        for (w, xw) in self.words.iter_mut().zip(&x.words) {
            *w &= !xw;
        }
    }

    pub fn and(&mut self, x: &Bitmap) {
        assert_eq!(self.len, x.len, "BUG: bitmaps must have equal lengths");
        for (w, xw) in self.words.iter_mut().zip(&x.words) {
            *w &= xw;
        }
    }

    pub fn or(&mut self, x: &Bitmap) {
        assert_eq!(self.len, x.len, "BUG: bitmaps must have equal lengths");
        for (w, xw) in self.words.iter_mut().zip(&x.words) {
            *w |= xw;
        }
    }

    /// Keeps only the set bits for which `f` returns true.
    pub fn for_each_set_bit(&mut self, mut f: impl FnMut(usize) -> bool) {
        for (wi, w) in self.words.iter_mut().enumerate() {
            let mut word = *w;
            if word == 0 {
                continue;
            }
            let mut keep = word;
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                if !f(wi * 64 + bit) {
                    keep &= !(1u64 << bit);
                }
            }
            *w = keep;
        }
    }

    /// Calls `f` for every set bit, in ascending order, without modifying the bitmap.
    pub fn for_each_set_bit_readonly(&self, mut f: impl FnMut(usize)) {
        for (wi, &w) in self.words.iter().enumerate() {
            let mut word = w;
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                f(wi * 64 + bit);
            }
        }
    }

    /// Returns the indexes of the set bits.
    pub fn set_indexes(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.ones_count());
        self.for_each_set_bit_readonly(|i| out.push(i));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_all_respects_len() {
        for len in [0usize, 1, 63, 64, 65, 130] {
            let bm = Bitmap::new_set(len);
            assert_eq!(bm.ones_count(), len);
            assert!(bm.are_all_set());
            assert_eq!(bm.is_zero(), len == 0);
        }
    }

    #[test]
    fn test_for_each_set_bit() {
        let mut bm = Bitmap::new_set(100);
        bm.for_each_set_bit(|i| i % 3 == 0);
        assert_eq!(bm.ones_count(), 34);
        assert!(bm.is_set(99));
        assert!(!bm.is_set(98));

        let mut visited = Vec::new();
        bm.for_each_set_bit_readonly(|i| visited.push(i));
        assert_eq!(visited, bm.set_indexes());
        assert_eq!(visited[..3], [0, 3, 6]);
    }

    #[test]
    fn test_boolean_ops() {
        let mut a = Bitmap::new(10);
        a.set(1);
        a.set(2);
        let mut b = Bitmap::new(10);
        b.set(2);
        b.set(3);

        let mut or = a.clone();
        or.or(&b);
        assert_eq!(or.set_indexes(), vec![1, 2, 3]);

        let mut and = a.clone();
        and.and(&b);
        assert_eq!(and.set_indexes(), vec![2]);

        let mut and_not = a.clone();
        and_not.and_not(&b);
        assert_eq!(and_not.set_indexes(), vec![1]);
    }
}
