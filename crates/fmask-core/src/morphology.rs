//! Binary morphology, connected components, and focal filters.
//!
//! Structuring elements are the two shapes the pipeline needs: a disk of
//! radius `r` (commission erosion/dilation) and a square of half-width `h`
//! (buffers and final mask dilation). Outside the grid counts as background
//! for both dilation and erosion. Connected-component labelling is
//! 8-connectivity throughout; grey-scale reconstruction (imfill) is
//! 4-connectivity, matching the hole/object connectivity duality.

use std::collections::VecDeque;

use crate::raster::{Mask, Raster};

// ── Structuring elements ─────────────────────────────────────────────────────

/// Per-row horizontal half-widths of a disk of radius `r`:
/// `(dr, hw)` with `dr² + hw² ≤ r²`, one entry per row offset.
fn disk_spans(radius: usize) -> Vec<(i64, usize)> {
    let r = radius as i64;
    (-r..=r)
        .map(|dr| {
            let hw = ((radius * radius) as f64 - (dr * dr) as f64).sqrt().floor() as usize;
            (dr, hw)
        })
        .collect()
}

/// Horizontal window-any over each row: `out[c] = any(mask[c−hw ..= c+hw])`.
fn row_any(mask: &Mask, hw: usize) -> Mask {
    if hw == 0 {
        return mask.clone();
    }
    let mut out = Mask::zeros(mask.rows, mask.cols);
    let mut prefix = vec![0u32; mask.cols + 1];
    for r in 0..mask.rows {
        let row = &mask.data[r * mask.cols..(r + 1) * mask.cols];
        for (c, &v) in row.iter().enumerate() {
            prefix[c + 1] = prefix[c] + v as u32;
        }
        for c in 0..mask.cols {
            let lo = c.saturating_sub(hw);
            let hi = (c + hw + 1).min(mask.cols);
            out.data[r * mask.cols + c] = prefix[hi] > prefix[lo];
        }
    }
    out
}

/// Vertical window-any over each column.
fn col_any(mask: &Mask, hw: usize) -> Mask {
    if hw == 0 {
        return mask.clone();
    }
    let mut out = Mask::zeros(mask.rows, mask.cols);
    let mut prefix = vec![0u32; mask.rows + 1];
    for c in 0..mask.cols {
        for r in 0..mask.rows {
            prefix[r + 1] = prefix[r] + mask.data[r * mask.cols + c] as u32;
        }
        for r in 0..mask.rows {
            let lo = r.saturating_sub(hw);
            let hi = (r + hw + 1).min(mask.rows);
            out.data[r * mask.cols + c] = prefix[hi] > prefix[lo];
        }
    }
    out
}

/// Binary dilation with a square structuring element of half-width `hw`
/// (side `2·hw + 1`). Half-width 0 is the identity.
pub fn dilate_square(mask: &Mask, hw: usize) -> Mask {
    col_any(&row_any(mask, hw), hw)
}

/// Binary dilation with a disk of radius `r`. Radius 0 is the identity.
pub fn dilate_disk(mask: &Mask, radius: usize) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let mut out = Mask::zeros(mask.rows, mask.cols);
    for (dr, hw) in disk_spans(radius) {
        let dilated_row = row_any(mask, hw);
        for r in 0..mask.rows {
            let src = r as i64 - dr;
            if src < 0 || src >= mask.rows as i64 {
                continue;
            }
            let src_off = src as usize * mask.cols;
            let dst_off = r * mask.cols;
            for c in 0..mask.cols {
                out.data[dst_off + c] |= dilated_row.data[src_off + c];
            }
        }
    }
    out
}

/// Binary erosion with a disk of radius `r`; pixels whose element extends
/// past the grid edge are eroded. Radius 0 is the identity.
pub fn erode_disk(mask: &Mask, radius: usize) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let spans = disk_spans(radius);
    let mut out = Mask::filled(mask.rows, mask.cols, true);
    let mut prefix = vec![0u32; mask.cols + 1];
    for (dr, hw) in &spans {
        // window-all along the shifted row; out-of-bounds fails the pixel
        for r in 0..mask.rows {
            let src = r as i64 + dr;
            let dst_off = r * mask.cols;
            if src < 0 || src >= mask.rows as i64 {
                for c in 0..mask.cols {
                    out.data[dst_off + c] = false;
                }
                continue;
            }
            let src_row = &mask.data[src as usize * mask.cols..(src as usize + 1) * mask.cols];
            for (c, &v) in src_row.iter().enumerate() {
                prefix[c + 1] = prefix[c] + v as u32;
            }
            for c in 0..mask.cols {
                if c < *hw || c + hw >= mask.cols {
                    out.data[dst_off + c] = false;
                    continue;
                }
                let full = (2 * hw + 1) as u32;
                if prefix[c + hw + 1] - prefix[c - hw] != full {
                    out.data[dst_off + c] = false;
                }
            }
        }
    }
    out
}

// ── Connected components ─────────────────────────────────────────────────────

/// Bounding box and size of one labelled component.
/// Rows span `[min_row, max_row)`, columns `[min_col, max_col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionProps {
    pub label: u32,
    pub area: usize,
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

const NEIGHBOURS_8: [(i64, i64); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1),           (0, 1),
    (1, -1),  (1, 0),  (1, 1),
];

/// 8-connected component labelling. Labels start at 1 in raster order;
/// background is 0. Returns the label raster and per-label properties.
pub fn label(mask: &Mask) -> (Raster<u32>, Vec<RegionProps>) {
    let mut labels: Raster<u32> = Raster::filled(mask.rows, mask.cols, 0);
    let mut props: Vec<RegionProps> = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    let mut next = 0u32;
    for r0 in 0..mask.rows {
        for c0 in 0..mask.cols {
            let idx = r0 * mask.cols + c0;
            if !mask.data[idx] || labels.data[idx] != 0 {
                continue;
            }
            next += 1;
            let mut prop = RegionProps {
                label: next,
                area: 0,
                min_row: r0,
                min_col: c0,
                max_row: r0 + 1,
                max_col: c0 + 1,
            };
            labels.data[idx] = next;
            stack.push((r0, c0));
            while let Some((r, c)) = stack.pop() {
                prop.area += 1;
                prop.min_row = prop.min_row.min(r);
                prop.min_col = prop.min_col.min(c);
                prop.max_row = prop.max_row.max(r + 1);
                prop.max_col = prop.max_col.max(c + 1);
                for (dr, dc) in NEIGHBOURS_8 {
                    let nr = r as i64 + dr;
                    let nc = c as i64 + dc;
                    if nr < 0 || nc < 0 || nr >= mask.rows as i64 || nc >= mask.cols as i64 {
                        continue;
                    }
                    let nidx = nr as usize * mask.cols + nc as usize;
                    if mask.data[nidx] && labels.data[nidx] == 0 {
                        labels.data[nidx] = next;
                        stack.push((nr as usize, nc as usize));
                    }
                }
            }
            props.push(prop);
        }
    }
    (labels, props)
}

/// Drop 8-connected components smaller than `min_size` pixels.
pub fn remove_small_objects(mask: &Mask, min_size: usize) -> Mask {
    let (labels, props) = label(mask);
    let mut keep = vec![false; props.len() + 1];
    for p in &props {
        keep[p.label as usize] = p.area >= min_size;
    }
    Raster {
        data: labels.data.iter().map(|&l| l != 0 && keep[l as usize]).collect(),
        rows: mask.rows,
        cols: mask.cols,
    }
}

// ── Grey-scale reconstruction (imfill) ───────────────────────────────────────

const NEIGHBOURS_4: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// Fill closed dark regions: morphological reconstruction by erosion with a
/// seed equal to the image with its interior set to the image maximum.
/// Sequential raster/anti-raster scans followed by FIFO-queue propagation.
pub fn imfill(img: &Raster<f32>) -> Raster<f32> {
    let rows = img.rows;
    let cols = img.cols;
    if rows < 3 || cols < 3 {
        return img.clone();
    }
    let max = img.data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    // Seed: border = image, interior = max.
    let mut j = img.clone();
    for r in 1..rows - 1 {
        for c in 1..cols - 1 {
            j.data[r * cols + c] = max;
        }
    }

    // Raster scan with the causal half-neighbourhood (N, W).
    for r in 0..rows {
        for c in 0..cols {
            let idx = r * cols + c;
            let mut v = j.data[idx];
            if r > 0 {
                v = v.min(j.data[idx - cols]);
            }
            if c > 0 {
                v = v.min(j.data[idx - 1]);
            }
            j.data[idx] = v.max(img.data[idx]);
        }
    }

    // Anti-raster scan with (S, E); queue boundary pixels still propagating.
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for r in (0..rows).rev() {
        for c in (0..cols).rev() {
            let idx = r * cols + c;
            let mut v = j.data[idx];
            if r + 1 < rows {
                v = v.min(j.data[idx + cols]);
            }
            if c + 1 < cols {
                v = v.min(j.data[idx + 1]);
            }
            let new = v.max(img.data[idx]);
            j.data[idx] = new;
            let south = r + 1 < rows && {
                let q = idx + cols;
                j.data[q] > new && j.data[q] > img.data[q]
            };
            let east = c + 1 < cols && {
                let q = idx + 1;
                j.data[q] > new && j.data[q] > img.data[q]
            };
            if south || east {
                queue.push_back((r, c));
            }
        }
    }

    while let Some((r, c)) = queue.pop_front() {
        let here = j.data[r * cols + c];
        for (dr, dc) in NEIGHBOURS_4 {
            let nr = r as i64 + dr;
            let nc = c as i64 + dc;
            if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                continue;
            }
            let q = nr as usize * cols + nc as usize;
            if j.data[q] > here && j.data[q] > img.data[q] {
                j.data[q] = here.max(img.data[q]);
                queue.push_back((nr as usize, nc as usize));
            }
        }
    }
    j
}

// ── Directional line enhancement ─────────────────────────────────────────────

/// 3×3 line-detection templates (horizontal, vertical, two diagonals), each
/// normalised by 6 when applied.
const LINE_KERNELS: [[[f32; 3]; 3]; 4] = [
    [[-1.0, -1.0, -1.0], [2.0, 2.0, 2.0], [-1.0, -1.0, -1.0]],
    [[-1.0, 2.0, -1.0], [-1.0, 2.0, -1.0], [-1.0, 2.0, -1.0]],
    [[2.0, -1.0, -1.0], [-1.0, 2.0, -1.0], [-1.0, -1.0, 2.0]],
    [[-1.0, -1.0, 2.0], [-1.0, 2.0, -1.0], [2.0, -1.0, -1.0]],
];

/// Per-pixel maximum response of the four directional line templates.
/// Borders are zero-padded.
pub fn enhance_line(img: &Raster<f32>) -> Raster<f32> {
    let rows = img.rows;
    let cols = img.cols;
    let mut out = Raster::filled(rows, cols, f32::NEG_INFINITY);
    for kernel in &LINE_KERNELS {
        for r in 0..rows {
            for c in 0..cols {
                let mut acc = 0.0f64;
                for (kr, krow) in kernel.iter().enumerate() {
                    for (kc, &w) in krow.iter().enumerate() {
                        let rr = r as i64 + kr as i64 - 1;
                        let cc = c as i64 + kc as i64 - 1;
                        if let Some(v) = img.get_checked(rr, cc) {
                            acc += w as f64 * v as f64;
                        }
                    }
                }
                let resp = (acc / 6.0) as f32;
                let idx = r * cols + c;
                if resp > out.data[idx] {
                    out.data[idx] = resp;
                }
            }
        }
    }
    out
}

// ── Focal box filters ────────────────────────────────────────────────────────

/// Sliding-window row sum with zero padding, via a per-row prefix sum.
fn row_box_sum(src: &[f64], dst: &mut [f64], hw: usize) {
    let cols = src.len();
    let mut prefix = vec![0.0f64; cols + 1];
    for (c, &v) in src.iter().enumerate() {
        prefix[c + 1] = prefix[c] + v;
    }
    for (c, out) in dst.iter_mut().enumerate() {
        let lo = c.saturating_sub(hw);
        let hi = (c + hw + 1).min(cols);
        *out = prefix[hi] - prefix[lo];
    }
}

/// Separable box sum with zero padding: `out[p] = Σ img[q]` over the
/// `window × window` neighbourhood of `p`. `window` must be odd.
/// Rows are independent, so the horizontal pass parallelises without
/// changing a single bit of the result.
pub fn box_sum(img: &Raster<f64>, window: usize) -> Raster<f64> {
    assert!(window % 2 == 1, "box window must be odd");
    let hw = window / 2;
    let rows = img.rows;
    let cols = img.cols;

    // Horizontal pass.
    let mut tmp = Raster::filled(rows, cols, 0.0f64);
    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        tmp.data
            .par_chunks_mut(cols)
            .zip(img.data.par_chunks(cols))
            .for_each(|(dst, src)| row_box_sum(src, dst, hw));
    }
    #[cfg(not(feature = "threading"))]
    for (dst, src) in tmp.data.chunks_mut(cols).zip(img.data.chunks(cols)) {
        row_box_sum(src, dst, hw);
    }

    // Vertical pass.
    let mut out = Raster::filled(rows, cols, 0.0f64);
    let mut col_prefix = vec![0.0f64; rows + 1];
    for c in 0..cols {
        for r in 0..rows {
            col_prefix[r + 1] = col_prefix[r] + tmp.data[r * cols + c];
        }
        for r in 0..rows {
            let lo = r.saturating_sub(hw);
            let hi = (r + hw + 1).min(rows);
            out.data[r * cols + c] = col_prefix[hi] - col_prefix[lo];
        }
    }
    out
}

/// Box mean with a constant `window²` divisor (zero padding), matching a
/// uniform filter in constant mode.
pub fn box_mean(img: &Raster<f64>, window: usize) -> Raster<f64> {
    let n = (window * window) as f64;
    let mut out = box_sum(img, window);
    for v in out.data.iter_mut() {
        *v /= n;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn block_mask(rows: usize, cols: usize, r0: usize, c0: usize, size: usize) -> Mask {
        Mask::from_fn(rows, cols, |r, c| {
            r >= r0 && r < r0 + size && c >= c0 && c < c0 + size
        })
    }

    #[test]
    fn dilation_radius_zero_is_identity() {
        let m = block_mask(10, 10, 3, 3, 3);
        assert_eq!(dilate_disk(&m, 0), m);
        assert_eq!(dilate_square(&m, 0), m);
        assert_eq!(erode_disk(&m, 0), m);
    }

    #[test]
    fn dilation_is_monotone() {
        let small = block_mask(20, 20, 8, 8, 2);
        let big = block_mask(20, 20, 7, 7, 5);
        let ds = dilate_disk(&small, 3);
        let db = dilate_disk(&big, 3);
        for (s, b) in ds.data.iter().zip(db.data.iter()) {
            assert!(!s | b, "dilation must preserve mask ordering");
        }
    }

    #[test]
    fn square_dilation_grows_chebyshev_ball() {
        let mut m = Mask::zeros(9, 9);
        m.set(4, 4, true);
        let d = dilate_square(&m, 2);
        assert_eq!(d.count(), 25);
        assert!(d.get(2, 2) && d.get(6, 6));
        assert!(!d.get(1, 4));
    }

    #[test]
    fn erode_then_dilate_stays_inside_original() {
        let m = block_mask(30, 30, 10, 10, 9);
        let e = erode_disk(&m, 2);
        assert!(e.count() > 0);
        let back = dilate_disk(&e, 2);
        for (o, b) in m.data.iter().zip(back.data.iter()) {
            assert!(!b | o, "opening must be anti-extensive");
        }
    }

    #[test]
    fn erosion_removes_thin_features() {
        let m = Mask::from_fn(10, 10, |r, _| r == 5);
        assert_eq!(erode_disk(&m, 1).count(), 0);
    }

    #[test]
    fn label_finds_diagonal_component() {
        // Two pixels touching only diagonally are one 8-connected component.
        let mut m = Mask::zeros(4, 4);
        m.set(0, 0, true);
        m.set(1, 1, true);
        m.set(3, 3, true);
        let (labels, props) = label(&m);
        assert_eq!(props.len(), 2);
        assert_eq!(labels.get(0, 0), labels.get(1, 1));
        assert_ne!(labels.get(0, 0), labels.get(3, 3));
        assert_eq!(props[0].area, 2);
        assert_eq!((props[0].min_row, props[0].max_row), (0, 2));
    }

    #[test]
    fn remove_small_objects_keeps_large() {
        let mut m = block_mask(10, 10, 1, 1, 3);
        m.set(8, 8, true);
        let cleaned = remove_small_objects(&m, 3);
        assert_eq!(cleaned.count(), 9);
        assert!(!cleaned.get(8, 8));
    }

    #[test]
    fn imfill_fills_closed_basin() {
        // A dark pit surrounded by a high rim is raised to the rim level.
        let mut img = Raster::filled(7, 7, 10.0f32);
        for (r, c) in [(2, 2), (2, 3), (2, 4), (3, 2), (3, 4), (4, 2), (4, 3), (4, 4)] {
            img.set(r, c, 50.0);
        }
        img.set(3, 3, 1.0);
        let filled = imfill(&img);
        assert_relative_eq!(filled.get(3, 3), 50.0);
        // Pixels outside the basin are untouched.
        assert_relative_eq!(filled.get(0, 0), 10.0);
        assert_relative_eq!(filled.get(6, 6), 10.0);
    }

    #[test]
    fn imfill_leaves_open_valley() {
        // A dark stripe reaching the border is connected to the outside and
        // must not be filled.
        let mut img = Raster::filled(7, 7, 10.0f32);
        for r in 0..7 {
            img.set(r, 3, 1.0);
        }
        let filled = imfill(&img);
        assert_relative_eq!(filled.get(3, 3), 1.0);
    }

    #[test]
    fn enhance_line_preserves_each_direction() {
        // A one-pixel line along each template direction keeps its amplitude.
        let n = 11;
        let mid = n / 2;
        let cases: [Box<dyn Fn(usize, usize) -> bool>; 4] = [
            Box::new(move |r, _| r == mid),
            Box::new(move |_, c| c == mid),
            Box::new(move |r, c| r == c),
            Box::new(move |r, c| r + c == n - 1),
        ];
        for case in &cases {
            let img = Raster::from_fn(n, n, |r, c| if case(r, c) { 60.0f32 } else { 0.0 });
            let enhanced = enhance_line(&img);
            assert_relative_eq!(enhanced.get(mid, mid), 60.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn box_sum_matches_naive() {
        let img = Raster::from_fn(6, 5, |r, c| (r * 5 + c) as f64);
        let fast = box_sum(&img, 3);
        for r in 0..6usize {
            for c in 0..5usize {
                let mut acc = 0.0;
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        if let Some(v) = img.get_checked(r as i64 + dr, c as i64 + dc) {
                            acc += v;
                        }
                    }
                }
                assert_relative_eq!(fast.get(r, c), acc, epsilon = 1e-9);
            }
        }
    }
}
