//! Spectral index composites: NDVI, NDSI, NDBI, and the Sentinel-2 CDI.

use crate::morphology::box_mean;
use crate::raster::Raster;

const EPS: f64 = 1e-7;

fn normalized_difference(a: &Raster<i16>, b: &Raster<i16>) -> Raster<f32> {
    a.zip_map(b, |x, y| {
        let x = x as f64;
        let y = y as f64;
        ((x - y) / (x + y + EPS)) as f32
    })
}

/// NDVI = (NIR − RED) / (NIR + RED).
pub fn create_ndvi(red: &Raster<i16>, nir: &Raster<i16>) -> Raster<f32> {
    normalized_difference(nir, red)
}

/// NDSI = (GREEN − SWIR1) / (GREEN + SWIR1).
pub fn create_ndsi(green: &Raster<i16>, swir1: &Raster<i16>) -> Raster<f32> {
    normalized_difference(green, swir1)
}

/// NDBI = (SWIR1 − NIR) / (SWIR1 + NIR).
pub fn create_ndbi(swir1: &Raster<i16>, nir: &Raster<i16>) -> Raster<f32> {
    normalized_difference(swir1, nir)
}

/// Focal variance over a `window × window` box: `E[X²] − E[X]²`,
/// zero-padded at the borders.
pub fn focal_variance(img: &Raster<f32>, window: usize) -> Raster<f32> {
    let as_f64 = img.map(|v| v as f64);
    let squared = img.map(|v| v as f64 * v as f64);
    let mean = box_mean(&as_f64, window);
    let mean_sq = box_mean(&squared, window);
    mean_sq.zip_map(&mean, |m2, m| (m2 - m * m) as f32)
}

/// Cloud Displacement Index for Sentinel-2 (Frantz et al. 2018): contrast of
/// the 7×7 focal variances of the NIR/NIR2 and RED3/NIR2 band ratios.
/// Zero where the variance sum vanishes.
pub fn create_cdi(nir: &Raster<i16>, nir2: &Raster<i16>, red3: &Raster<i16>) -> Raster<f32> {
    let ratio_nir = nir.zip_map(nir2, |a, b| (a as f64 / (b as f64 + EPS)) as f32);
    let ratio_red3 = red3.zip_map(nir2, |a, b| (a as f64 / (b as f64 + EPS)) as f32);

    let var_nir = focal_variance(&ratio_nir, 7);
    let var_red3 = focal_variance(&ratio_red3, 7);

    var_red3.zip_map(&var_nir, |v7, v8| {
        let denom = v7 + v8;
        if denom == 0.0 {
            0.0
        } else {
            (v7 - v8) / denom
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ndvi_of_equal_bands_is_zero() {
        let red = Raster::filled(2, 2, 4000i16);
        let nir = Raster::filled(2, 2, 4000i16);
        let ndvi = create_ndvi(&red, &nir);
        assert_relative_eq!(ndvi.get(0, 0), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn ndvi_dense_vegetation_is_positive() {
        let red = Raster::filled(1, 1, 1000i16);
        let nir = Raster::filled(1, 1, 5000i16);
        assert_relative_eq!(create_ndvi(&red, &nir).get(0, 0), 4000.0 / 6000.0, epsilon = 1e-5);
    }

    #[test]
    fn focal_variance_matches_moment_identity() {
        // Deterministic pseudo-random raster; compare against the direct
        // windowed E[X²] − E[X]² at an interior pixel.
        let img = Raster::from_fn(9, 9, |r, c| {
            let h = (r as u64).wrapping_mul(2654435761).wrapping_add(c as u64 * 2246822519);
            ((h ^ (h >> 13)) & 0xFF) as f32
        });
        let var = focal_variance(&img, 3);

        let (r0, c0) = (4usize, 4usize);
        let mut sum = 0.0f64;
        let mut sum2 = 0.0f64;
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let v = img.get((r0 as i64 + dr) as usize, (c0 as i64 + dc) as usize) as f64;
                sum += v;
                sum2 += v * v;
            }
        }
        let expect = sum2 / 9.0 - (sum / 9.0) * (sum / 9.0);
        assert_relative_eq!(var.get(r0, c0) as f64, expect, epsilon = 1e-3);
    }

    #[test]
    fn cdi_is_zero_on_uniform_bands() {
        let b = Raster::filled(10, 10, 3000i16);
        let cdi = create_cdi(&b, &b, &b);
        // Uniform ratios have zero variance everywhere -> CDI 0 by convention.
        assert!(cdi.data.iter().all(|&v| v == 0.0));
    }
}
