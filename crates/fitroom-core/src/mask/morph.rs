//! Square-kernel morphology on packed masks.
//!
//! Kernels are anchored at `k / 2`, so a pixel's window spans
//! `[p - k/2, p + (k - 1 - k/2)]` on each axis. Outside the grid counts as
//! unset for dilation and as set for erosion; closing therefore never eats
//! into a mask that touches the image border.

use super::Mask;

#[derive(Clone, Copy)]
enum Op {
    Dilate,
    Erode,
}

#[derive(Clone, Copy)]
enum Axis {
    Rows,
    Cols,
}

/// Dilation with a `k` x `k` square structuring element.
pub(super) fn dilate(mask: &Mask, k: usize) -> Mask {
    if k <= 1 {
        return mask.clone();
    }
    let rows = sweep(mask, k, Op::Dilate, Axis::Rows);
    sweep(&rows, k, Op::Dilate, Axis::Cols)
}

/// Erosion with a `k` x `k` square structuring element.
pub(super) fn erode(mask: &Mask, k: usize) -> Mask {
    if k <= 1 {
        return mask.clone();
    }
    let rows = sweep(mask, k, Op::Erode, Axis::Rows);
    sweep(&rows, k, Op::Erode, Axis::Cols)
}

/// Morphological closing (dilate then erode): fills holes smaller than the kernel.
pub(super) fn close(mask: &Mask, k: usize) -> Mask {
    erode(&dilate(mask, k), k)
}

/// One separable pass along `axis`, using a prefix count per line so each
/// pixel costs O(1) regardless of kernel size.
fn sweep(src: &Mask, k: usize, op: Op, axis: Axis) -> Mask {
    let (w, h) = (src.width(), src.height());
    let (lines, line_len) = match axis {
        Axis::Rows => (h, w),
        Axis::Cols => (w, h),
    };
    let before = k / 2;
    let after = k - 1 - before;
    let index = |line: usize, pos: usize| match axis {
        Axis::Rows => line * w + pos,
        Axis::Cols => pos * w + line,
    };

    let mut out = Mask::new(w, h);
    let mut prefix = vec![0usize; line_len + 1];
    for line in 0..lines {
        for pos in 0..line_len {
            prefix[pos + 1] = prefix[pos] + usize::from(src.get_index(index(line, pos)));
        }
        for pos in 0..line_len {
            let start = pos.saturating_sub(before);
            let end = (pos + after).min(line_len - 1);
            let ones = prefix[end + 1] - prefix[start];
            let keep = match op {
                Op::Dilate => ones > 0,
                Op::Erode => ones == end - start + 1,
            };
            if keep {
                out.set_index(index(line, pos));
            }
        }
    }
    out
}
