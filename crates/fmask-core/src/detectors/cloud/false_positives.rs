//! Commission candidates: urban and bright-rock surfaces, coastlines, and
//! snow on steep slopes, buffered to a 500-m neighbourhood.

use tracing::debug;

use crate::error::Result;
use crate::morphology::dilate_square;
use crate::raster::{Mask, Raster};
use crate::stats;

/// Detect surfaces likely to be mistaken for cloud.
///
/// `ndbi` is the line-enhanced built-up index. With BT, an Otsu split over
/// candidate-plus-cloud temperatures keeps only candidates at least as warm
/// as the warm class; with CDI (Sentinel-2), confidently parallactic pixels
/// (CDI < −0.8) are vetoed.
#[allow(clippy::too_many_arguments)]
pub fn detect_false_positive_pixels(
    ndbi: &Raster<f32>,
    ndvi: &Raster<f32>,
    bt: Option<&Raster<i16>>,
    slope: Option<&Raster<f32>>,
    cdi: Option<&Raster<f32>>,
    snow: &Mask,
    water: &Mask,
    cloud: &Mask,
    nodata_mask: &Mask,
    out_resolution: u32,
) -> Result<Mask> {
    let rows = ndbi.rows;
    let cols = ndbi.cols;

    // Urban and bright rock: built-up index positive and dominating NDVI.
    let mut candidates = Mask::from_fn(rows, cols, |r, c| {
        let b = ndbi.get(r, c);
        b > 0.0 && b > ndvi.get(r, c) && !nodata_mask.get(r, c) && !water.get(r, c)
    });

    if candidates.count() > 0 {
        if let Some(bt) = bt {
            let selection = candidates.or(cloud);
            let values = stats::masked_values(bt, &selection);
            if !values.is_empty() {
                let threshold = stats::otsu_threshold(&values)?;
                let above: Vec<f64> = values.iter().cloned().filter(|&v| v > threshold).collect();
                if !above.is_empty() {
                    let min_warm = above.iter().cloned().fold(f64::INFINITY, f64::min);
                    for (cand, &t) in candidates.data.iter_mut().zip(bt.data.iter()) {
                        if (t as f64) < min_warm {
                            *cand = false;
                        }
                    }
                }
            }
        }

        if let Some(cdi) = cdi {
            for (cand, &v) in candidates.data.iter_mut().zip(cdi.data.iter()) {
                if v < -0.8 {
                    *cand = false;
                }
            }
        }
    }

    // Snow on steep slopes (> 20 deg, Burbank et al. 1996).
    if let Some(slope) = slope {
        for i in 0..candidates.data.len() {
            candidates.data[i] |= snow.data[i] && slope.data[i] > 20.0;
        }
    }

    // 500-m buffer around candidate surfaces.
    let buffer_px = (250.0 / out_resolution as f64) as usize;
    let mut buffered = dilate_square(&candidates, buffer_px);

    buffered.or_assign(snow);
    buffered.clear_where(nodata_mask);
    debug!(pixels = buffered.count(), "potential false positive pixels");
    Ok(buffered)
}
