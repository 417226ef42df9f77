//! Snow and absolute-snow detection.

use tracing::debug;

use crate::morphology::box_mean;
use crate::raster::{Mask, Raster};
use crate::scene::Sensor;

/// Basic snow test: bright in GREEN and NIR with a high NDSI, and colder
/// than 10 °C when brightness temperature is available.
pub fn detect_snow(
    ndsi: &Raster<f32>,
    nir: &Raster<i16>,
    green: &Raster<i16>,
    bt: Option<&Raster<i16>>,
) -> Mask {
    let mut snow = Mask::from_fn(ndsi.rows, ndsi.cols, |r, c| {
        ndsi.get(r, c) > 0.15 && nir.get(r, c) > 1100 && green.get(r, c) > 1000
    });
    if let Some(bt) = bt {
        for (s, &t) in snow.data.iter_mut().zip(bt.data.iter()) {
            *s = *s && t < 1000;
        }
    }
    debug!(pixels = snow.count(), "detected snow");
    snow
}

/// Absolute snow/ice: surfaces whose ~10 km local GREEN deviation, damped by
/// NDSI, stays below 9. Large homogeneous snowfields pass; bright broken
/// cloud does not.
///
/// The local deviation is a masked standard deviation (mean of squares minus
/// squared mean) over the sensor-specific window, with weights normalised by
/// the number of valid (GREEN ≠ 0) pixels in the window.
pub fn detect_absolute_snow(
    sensor: Sensor,
    detected_snow: &Mask,
    green: &Raster<i16>,
    vis_saturation: &Mask,
    ndsi: &Raster<f32>,
) -> Mask {
    let window = sensor.absolute_snow_window();

    let green_f = green.map(|v| if v < 0 { 0.0f64 } else { v as f64 });
    let valid = green_f.map(|v| v != 0.0);

    let mean = box_mean(&green_f, window);
    let mean_sq = box_mean(&green_f.map(|v| v * v), window);
    let weight = box_mean(&valid.map(|m| m as u8 as f64), window);

    let mut scsi = Raster::filled(green.rows, green.cols, 0.0f64);
    for i in 0..scsi.data.len() {
        if weight.data[i] <= 0.0 || !valid.data[i] {
            continue;
        }
        let m1 = mean.data[i] / (weight.data[i] + 1e-7);
        let m2 = mean_sq.data[i] / (weight.data[i] + 1e-7);
        let var = m2 - m1 * m1;
        if var > 0.0 {
            scsi.data[i] = var.sqrt();
        }
    }

    let absolute = Mask::from_fn(green.rows, green.cols, |r, c| {
        let damped = scsi.get(r, c) * (1.0 - ndsi.get(r, c) as f64);
        damped < 9.0 && detected_snow.get(r, c) && !vis_saturation.get(r, c)
    });
    debug!(pixels = absolute.count(), "detected absolute snow");
    absolute
}
