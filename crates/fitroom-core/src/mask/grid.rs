//! Packed boolean pixel grid.

/// Boolean mask over a `width` x `height` pixel grid: one bit per pixel,
/// row-major, LSB of byte 0 = pixel (0, 0).
///
/// Bits past `width * height` in the last byte are always zero so that
/// [`Mask::area`] can count whole bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    bytes: Vec<u8>,
}

impl Mask {
    /// Empty mask (no pixel set).
    pub fn new(width: usize, height: usize) -> Self {
        let len = (width * height + 7) / 8;
        Mask {
            width,
            height,
            bytes: vec![0u8; len],
        }
    }

    /// Full-frame mask (every pixel set). Used when no segmentation is available.
    pub fn full(width: usize, height: usize) -> Self {
        let mut m = Mask {
            width,
            height,
            bytes: vec![0xFF; (width * height + 7) / 8],
        };
        m.clear_tail();
        m
    }

    /// Build a mask from a per-pixel predicate.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let mut m = Mask::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    m.set(x, y, true);
                }
            }
        }
        m
    }

    /// Decode a run-length mask: alternating unset/set run lengths in row-major
    /// order, starting with an unset run (which may be 0). Returns `None` when
    /// the runs do not cover exactly `width * height` pixels.
    pub fn from_runs(width: usize, height: usize, runs: &[u32]) -> Option<Self> {
        let total = width * height;
        let mut m = Mask::new(width, height);
        let mut pos = 0usize;
        for (i, &run) in runs.iter().enumerate() {
            let run = run as usize;
            if pos + run > total {
                return None;
            }
            if i % 2 == 1 {
                for p in pos..pos + run {
                    m.set_index(p);
                }
            }
            pos += run;
        }
        (pos == total).then_some(m)
    }

    /// Encode as run lengths (see [`Mask::from_runs`]).
    pub fn to_runs(&self) -> Vec<u32> {
        let mut runs = Vec::new();
        let mut current = false;
        let mut len = 0u32;
        for p in 0..self.len() {
            let v = self.get_index(p);
            if v != current {
                runs.push(len);
                current = v;
                len = 0;
            }
            len += 1;
        }
        runs.push(len);
        runs
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of pixels in the grid.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if both masks cover the same pixel grid.
    pub fn same_shape(&self, other: &Mask) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.get_index(y * self.width + x)
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y * self.width + x;
        if value {
            self.set_index(idx);
        } else {
            self.bytes[idx / 8] &= !(1 << (idx % 8));
        }
    }

    /// Set every pixel in `[x0, x1) x [y0, y1)`, clipped to the grid.
    pub fn fill_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize) {
        for y in y0..y1.min(self.height) {
            for x in x0..x1.min(self.width) {
                self.set_index(y * self.width + x);
            }
        }
    }

    /// Number of set pixels.
    pub fn area(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Fraction of the grid that is set, in [0.0, 1.0].
    pub fn coverage(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.area() as f64 / self.len() as f64
    }

    /// Number of pixels set in both masks. Masks of different shape share nothing.
    pub fn intersection_area(&self, other: &Mask) -> usize {
        if !self.same_shape(other) {
            return 0;
        }
        self.bytes
            .iter()
            .zip(&other.bytes)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// In-place union. A mask of a different shape is ignored.
    pub fn union_with(&mut self, other: &Mask) {
        if !self.same_shape(other) {
            return;
        }
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a |= b;
        }
    }

    pub(super) fn get_index(&self, idx: usize) -> bool {
        self.bytes
            .get(idx / 8)
            .map(|&b| (b & (1 << (idx % 8))) != 0)
            .unwrap_or(false)
    }

    pub(super) fn set_index(&mut self, idx: usize) {
        self.bytes[idx / 8] |= 1 << (idx % 8);
    }

    fn clear_tail(&mut self) {
        let rem = self.len() % 8;
        if rem > 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= (1u8 << rem) - 1;
            }
        }
    }
}
