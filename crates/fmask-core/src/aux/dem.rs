//! Slope and aspect from the warped elevation raster, Horn (1981) 3×3
//! weighted finite differences.

use crate::raster::{Raster, NO_DATA};

/// Horn gradient at interior cell `(r, c)`.
///
/// ```text
///   NW(-1,-1)  N(-1, 0)  NE(-1,+1)
///   W ( 0,-1)  *         E ( 0,+1)
///   SW(+1,-1)  S(+1, 0)  SE(+1,+1)
/// ```
///
/// `dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · cellsize)`
/// `dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · cellsize)`
fn horn_gradient(dem: &Raster<i16>, r: usize, c: usize, cellsize: f64) -> (f64, f64) {
    let nw = dem.get(r - 1, c - 1) as f64;
    let n = dem.get(r - 1, c) as f64;
    let ne = dem.get(r - 1, c + 1) as f64;
    let w = dem.get(r, c - 1) as f64;
    let e = dem.get(r, c + 1) as f64;
    let sw = dem.get(r + 1, c - 1) as f64;
    let s = dem.get(r + 1, c) as f64;
    let se = dem.get(r + 1, c + 1) as f64;

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * cellsize);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * cellsize);
    (dz_dx, dz_dy)
}

/// Gradient magnitudes below this are flat: slope 0, aspect 0.
const FLAT_GRADIENT_THRESHOLD: f64 = 1e-8;

/// Derive slope (degrees) and aspect (degrees clockwise from North, 0 for
/// flat cells) from elevation. Border cells and cells whose neighbourhood
/// touches the nodata sentinel are flat.
pub fn slope_aspect(dem: &Raster<i16>, cellsize_m: f64) -> (Raster<f32>, Raster<f32>) {
    let mut slope = Raster::filled(dem.rows, dem.cols, 0.0f32);
    let mut aspect = Raster::filled(dem.rows, dem.cols, 0.0f32);
    if dem.rows < 3 || dem.cols < 3 {
        return (slope, aspect);
    }

    for r in 1..dem.rows - 1 {
        for c in 1..dem.cols - 1 {
            let mut any_nodata = false;
            for dr in -1i64..=1 {
                for dc in -1i64..=1 {
                    if dem.get((r as i64 + dr) as usize, (c as i64 + dc) as usize) == NO_DATA {
                        any_nodata = true;
                    }
                }
            }
            if any_nodata {
                continue;
            }

            let (dz_dx, dz_dy) = horn_gradient(dem, r, c, cellsize_m);
            let magnitude = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();
            if magnitude < FLAT_GRADIENT_THRESHOLD {
                continue;
            }
            slope.set(r, c, magnitude.atan().to_degrees() as f32);

            // Downslope azimuth, clockwise from North.
            let mut az = (-dz_dx).atan2(-dz_dy).to_degrees();
            if az < 0.0 {
                az += 360.0;
            }
            aspect.set(r, c, az as f32);
        }
    }
    (slope, aspect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Eastward ramp rising `rise` metres per 30-m cell.
    fn east_ramp(n: usize, rise: f64) -> Raster<i16> {
        Raster::from_fn(n, n, |_, c| (c as f64 * rise) as i16)
    }

    #[test]
    fn ramp_slope_matches_analytic_angle() {
        // 30 m rise over 30 m run = 45 degrees.
        let dem = east_ramp(16, 30.0);
        let (slope, aspect) = slope_aspect(&dem, 30.0);
        assert_relative_eq!(slope.get(8, 8), 45.0, epsilon = 0.1);
        // Uphill to the east means the face points west (270°).
        assert_relative_eq!(aspect.get(8, 8), 270.0, epsilon = 0.5);
    }

    #[test]
    fn flat_dem_has_zero_slope_and_aspect() {
        let dem = Raster::filled(8, 8, 500i16);
        let (slope, aspect) = slope_aspect(&dem, 30.0);
        assert!(slope.data.iter().all(|&v| v == 0.0));
        assert!(aspect.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn nodata_neighbourhood_stays_flat() {
        let mut dem = east_ramp(8, 30.0);
        dem.set(4, 4, NO_DATA);
        let (slope, _) = slope_aspect(&dem, 30.0);
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                assert_eq!(slope.get((4 + dr) as usize, (4 + dc) as usize), 0.0);
            }
        }
        assert!(slope.get(1, 1) > 0.0);
    }
}
