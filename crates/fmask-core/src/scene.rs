//! Scene record produced by ingestion and read by every pipeline stage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::raster::{GeoInfo, Mask, Raster};

/// Supported sensors. Sensor differences are a tag plus constants and
/// optional bands; stages dispatch on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    /// Landsat-8 OLI/TIRS.
    L08Oli,
    /// Sentinel-2 MSI.
    S2Msi,
}

impl Sensor {
    /// Scene-constant cloud probability threshold τ (percent).
    pub fn cloud_threshold(self) -> f64 {
        match self {
            Sensor::L08Oli => 17.5,
            Sensor::S2Msi => 20.0,
        }
    }

    /// Weight of the thin-cirrus probability term.
    pub fn probability_weight(self) -> f64 {
        match self {
            Sensor::L08Oli => 0.3,
            Sensor::S2Msi => 0.5,
        }
    }

    /// Output grid resolution in metres per pixel.
    pub fn out_resolution(self) -> u32 {
        match self {
            Sensor::L08Oli => 30,
            Sensor::S2Msi => 20,
        }
    }

    /// Disk radius (pixels) for commission erosion: 90 m at scene resolution.
    pub fn erode_pixels(self) -> usize {
        (90.0 / self.out_resolution() as f64).round() as usize
    }

    /// Window (pixels, ~10 km) for the absolute-snow local deviation.
    pub fn absolute_snow_window(self) -> usize {
        match self {
            Sensor::L08Oli => 333,
            Sensor::S2Msi => 501,
        }
    }
}

/// Band identifiers on the scene grid. `Red3` and `Nir2` exist only for
/// Sentinel-2; `Cirrus` and `Bt` are optional per product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    /// Narrow-band cirrus reflectance (L8 B9, S2 B10).
    Cirrus,
    /// Brightness temperature in hundredths of °C.
    Bt,
    /// Sentinel-2 red-edge B07.
    Red3,
    /// Sentinel-2 narrow NIR B8A.
    Nir2,
}

/// One ingested scene: bands, masks, and solar geometry on a shared grid.
///
/// The record is written by ingest and mutated at exactly two points of the
/// pipeline: `Cirrus` is replaced by its normalised version after the
/// potential-cloud-pixel stage, and `Bt` by its DEM-normalised version after
/// the potential-cloud probabilities. Both replacements are idempotent
/// within a run.
#[derive(Debug, Clone)]
pub struct SceneRecord {
    pub sensor: Sensor,
    pub scene_id: String,
    /// Sun elevation above the horizon, degrees.
    pub sun_elevation: f64,
    /// Sun azimuth clockwise from North, degrees.
    pub sun_azimuth: f64,
    pub rows: usize,
    pub cols: usize,
    pub geo: GeoInfo,
    /// True where any band DN was zero at ingest.
    pub nodata_mask: Mask,
    /// True where any visible band saturated at the sensor maximum DN.
    pub vis_saturation: Mask,
    pub band_data: HashMap<Band, Raster<i16>>,
}

impl SceneRecord {
    pub fn band(&self, band: Band) -> Option<&Raster<i16>> {
        self.band_data.get(&band)
    }

    /// Required band lookup; absence is an ingest-contract violation.
    pub fn require(&self, band: Band) -> &Raster<i16> {
        self.band_data
            .get(&band)
            .unwrap_or_else(|| panic!("scene record is missing required band {band:?}"))
    }

    pub fn replace_band(&mut self, band: Band, raster: Raster<i16>) {
        self.band_data.insert(band, raster);
    }
}
