//! Two-tier water detection: a spectral base test, optionally widened by
//! Global Surface Water Occurrence.

use tracing::debug;

use crate::raster::{Mask, Raster};
use crate::stats;

/// The water mask pair. `all_water` keeps GSWO water even under snow; the
/// snow-free `water` mask drives the cloud probability split.
#[derive(Debug, Clone)]
pub struct WaterMasks {
    pub water: Mask,
    pub all_water: Mask,
}

/// Spectral base water plus GSWO augmentation.
///
/// The occurrence cut assumes water occurrence is similar across the scene:
/// the 17.5th percentile of GSWO over base-water pixels minus a 5 %
/// tolerance (90 when no base water exists), clamped to at most 90. A
/// negative cut means the occurrence map contradicts the spectral test and
/// augmentation is skipped.
pub fn detect_water(
    nir: &Raster<i16>,
    ndvi: &Raster<f32>,
    nodata_mask: &Mask,
    snow: Option<&Mask>,
    gswo: Option<&Raster<u8>>,
) -> WaterMasks {
    let mut water = Mask::from_fn(nir.rows, nir.cols, |r, c| {
        let v = ndvi.get(r, c);
        let n = nir.get(r, c);
        (v < 0.01 && n < 1100) || (v > 0.0 && v < 0.1 && n < 500)
    });
    water.clear_where(nodata_mask);
    let mut all_water = water.clone();

    let (gswo, snow) = match (gswo, snow) {
        (Some(g), Some(s)) => (g, s),
        _ => return WaterMasks { water, all_water },
    };

    if gswo.data.iter().all(|&v| v == 0) {
        return WaterMasks { water, all_water };
    }

    let occurrence_cut = if water.count() > 0 {
        let mut occ = stats::masked_values(gswo, &water);
        // count() > 0 makes the percentile selection non-empty
        stats::percentile(&mut occ, 17.5).expect("non-empty water selection") - 5.0
    } else {
        90.0
    };
    let occurrence_cut = occurrence_cut.min(90.0);
    debug!(occurrence_cut, "gswo occurrence cut");

    if occurrence_cut < 0.0 {
        return WaterMasks { water, all_water };
    }

    for i in 0..water.data.len() {
        let gs = gswo.data[i] as f64 > occurrence_cut;
        all_water.data[i] |= gs;
        water.data[i] |= gs && !snow.data[i];
    }
    water.clear_where(nodata_mask);
    all_water.clear_where(nodata_mask);

    debug!(pixels = water.count(), "detected water");
    WaterMasks { water, all_water }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_water_tests() {
        // dark flat NIR with no vegetation signal
        let nir = Raster::from_vec(1, 3, vec![800i16, 400, 3000]);
        let ndvi = Raster::from_vec(1, 3, vec![0.0f32, 0.05, 0.05]);
        let nodata = Mask::zeros(1, 3);
        let w = detect_water(&nir, &ndvi, &nodata, None, None);
        assert_eq!(w.water.data, vec![true, true, false]);
        assert_eq!(w.all_water.data, w.water.data);
    }

    #[test]
    fn nodata_is_never_water() {
        let nir = Raster::filled(1, 2, 500i16);
        let ndvi = Raster::filled(1, 2, 0.0f32);
        let nodata = Mask::from_vec(1, 2, vec![true, false]);
        let w = detect_water(&nir, &ndvi, &nodata, None, None);
        assert_eq!(w.water.data, vec![false, true]);
    }

    #[test]
    fn all_zero_gswo_leaves_water_untouched() {
        let nir = Raster::filled(2, 2, 500i16);
        let ndvi = Raster::filled(2, 2, 0.0f32);
        let nodata = Mask::zeros(2, 2);
        let snow = Mask::zeros(2, 2);
        let gswo = Raster::filled(2, 2, 0u8);
        let with = detect_water(&nir, &ndvi, &nodata, Some(&snow), Some(&gswo));
        let without = detect_water(&nir, &ndvi, &nodata, None, None);
        assert_eq!(with.water.data, without.water.data);
    }

    #[test]
    fn gswo_augments_with_occurrence_cut() {
        // 5% base water with GSWO 80 everywhere: cut = 80 - 5 = 75,
        // so GSWO > 75 floods the whole scene into all_water.
        let n = 20;
        let nir = Raster::from_fn(n, n, |r, _| if r == 0 { 500i16 } else { 3000 });
        let ndvi = Raster::filled(n, n, 0.0f32);
        let nodata = Mask::zeros(n, n);
        let mut snow = Mask::zeros(n, n);
        snow.set(5, 5, true);
        let gswo = Raster::filled(n, n, 80u8);

        let w = detect_water(&nir, &ndvi, &nodata, Some(&snow), Some(&gswo));
        assert_eq!(w.all_water.count(), n * n);
        // snow-free water mask excludes the snow pixel
        assert_eq!(w.water.count(), n * n - 1);
        assert!(!w.water.get(5, 5));
    }

    #[test]
    fn negative_cut_skips_augmentation() {
        // Base water sits on GSWO 2: cut = 2 - 5 < 0 -> no augmentation.
        let n = 10;
        let nir = Raster::from_fn(n, n, |r, _| if r == 0 { 500i16 } else { 3000 });
        let ndvi = Raster::filled(n, n, 0.0f32);
        let nodata = Mask::zeros(n, n);
        let snow = Mask::zeros(n, n);
        let gswo = Raster::from_fn(n, n, |r, _| if r == 0 { 2u8 } else { 90 });

        let w = detect_water(&nir, &ndvi, &nodata, Some(&snow), Some(&gswo));
        assert_eq!(w.water.count(), n);
    }
}
