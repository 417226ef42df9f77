//! Sentinel-2 L1C ingestion from an `MTD_*` granule metadata file.
//!
//! Bands are read from `IMG_DATA` as GeoTIFF files on the 20-m grid: the
//! 10-m bands (B02/B03/B04/B08) are reduced by 2×2 block mean, the 60-m
//! cirrus band (B10) is replicated 3×3, and the 20-m bands pass through.
//! DN values are already reflectance ×10000 and are stored as-is; the i16
//! narrowing wraps exactly as an int16 cast does upstream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FmaskError, Result};
use crate::io;
use crate::platforms::metadata::{extract_metadata, require_f64};
use crate::platforms::PlatformAdapter;
use crate::raster::{GeoInfo, Mask, Raster, NO_DATA};
use crate::scene::{Band, SceneRecord, Sensor};

/// MSI bands with their file-name identifiers and native resolution.
const BANDS: [(Band, &str, u32); 9] = [
    (Band::Blue, "B02", 10),
    (Band::Green, "B03", 10),
    (Band::Red, "B04", 10),
    (Band::Red3, "B07", 20),
    (Band::Nir, "B08", 10),
    (Band::Nir2, "B8A", 20),
    (Band::Cirrus, "B10", 60),
    (Band::Swir1, "B11", 20),
    (Band::Swir2, "B12", 20),
];

const SATURATION_DN: u16 = u16::MAX;

pub struct Sentinel2;

impl PlatformAdapter for Sentinel2 {
    fn name(&self) -> &'static str {
        "Sentinel2"
    }

    fn is_platform(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        name.contains("MTD_")
    }

    fn get_data(&self, path: &Path) -> Result<SceneRecord> {
        let targets = vec!["ZENITH_ANGLE".to_string(), "AZIMUTH_ANGLE".to_string()];
        let metadata = extract_metadata(path, &targets)?;
        let sun_azimuth = require_f64(&metadata, "AZIMUTH_ANGLE")?;
        let sun_elevation = 90.0 - require_f64(&metadata, "ZENITH_ANGLE")?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let scene_id = parent
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .unwrap_or_else(|| "sentinel2-scene".to_string());
        let band_files = find_band_files(&parent.join("IMG_DATA"))?;

        let mut band_data: HashMap<Band, Raster<i16>> = HashMap::new();
        let mut nodata_mask: Option<Mask> = None;
        let mut vis_saturation: Option<Mask> = None;
        let mut geo: Option<GeoInfo> = None;
        let mut size: Option<(usize, usize)> = None;

        for (band, identifier, resolution) in BANDS {
            let band_path = band_files
                .get(identifier)
                .ok_or_else(|| FmaskError::Input(format!("S2 band file {identifier} not found")))?;
            debug!(band = ?band, path = %band_path.display(), "reading band");

            let (native, band_geo) = io::read_band_u16(band_path)?;
            // Bring everything onto the 20-m grid.
            let dn = match resolution {
                10 => block_mean_2x2(&native),
                60 => replicate_3x3(&native),
                _ => native,
            };

            match size {
                None => size = Some((dn.rows, dn.cols)),
                Some(expected) if expected != (dn.rows, dn.cols) => {
                    return Err(FmaskError::Input(format!(
                        "{}: band grid {}x{} does not match the scene grid",
                        band_path.display(),
                        dn.rows,
                        dn.cols
                    )))
                }
                _ => {}
            }

            // SWIR1 (native 20 m) is the projection base.
            if band == Band::Swir1 {
                geo = band_geo;
            }

            let nodata = nodata_mask.get_or_insert_with(|| Mask::zeros(dn.rows, dn.cols));
            for (m, &v) in nodata.data.iter_mut().zip(dn.data.iter()) {
                *m = *m || v == 0;
            }
            let saturation = vis_saturation.get_or_insert_with(|| Mask::zeros(dn.rows, dn.cols));
            if matches!(band, Band::Red | Band::Green | Band::Blue) {
                for (m, &v) in saturation.data.iter_mut().zip(dn.data.iter()) {
                    *m = *m || v == SATURATION_DN;
                }
            }

            band_data.insert(band, dn.map(|v| if v == 0 { NO_DATA } else { v as i16 }));
        }

        let (rows, cols) = size.ok_or_else(|| FmaskError::Input("no bands were read".into()))?;
        Ok(SceneRecord {
            sensor: Sensor::S2Msi,
            scene_id,
            sun_elevation,
            sun_azimuth,
            rows,
            cols,
            geo: geo.unwrap_or_else(GeoInfo::unreferenced),
            nodata_mask: nodata_mask.expect("bands were read"),
            vis_saturation: vis_saturation.expect("bands were read"),
            band_data,
        })
    }
}

/// Locate each band file by its `Bxx` identifier inside `IMG_DATA`.
fn find_band_files(img_data: &Path) -> Result<HashMap<String, PathBuf>> {
    let mut files: HashMap<String, PathBuf> = HashMap::new();
    let entries = std::fs::read_dir(img_data)
        .map_err(|_| FmaskError::Input(format!("{}: IMG_DATA not found", img_data.display())))?;
    for entry in entries {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
        for (_, identifier, _) in BANDS {
            if name.contains(identifier) {
                files.insert(identifier.to_string(), path.clone());
                break;
            }
        }
    }
    if files.len() != BANDS.len() {
        return Err(FmaskError::Input(format!(
            "{}: found {} of {} S2 band files",
            img_data.display(),
            files.len(),
            BANDS.len()
        )));
    }
    Ok(files)
}

/// 10 m → 20 m by 2×2 block mean (odd trailing rows/columns drop).
fn block_mean_2x2(dn: &Raster<u16>) -> Raster<u16> {
    let rows = dn.rows / 2;
    let cols = dn.cols / 2;
    Raster::from_fn(rows, cols, |r, c| {
        let sum = dn.get(2 * r, 2 * c) as u32
            + dn.get(2 * r, 2 * c + 1) as u32
            + dn.get(2 * r + 1, 2 * c) as u32
            + dn.get(2 * r + 1, 2 * c + 1) as u32;
        (sum / 4) as u16
    })
}

/// 60 m → 20 m by nearest-neighbour replication.
fn replicate_3x3(dn: &Raster<u16>) -> Raster<u16> {
    Raster::from_fn(dn.rows * 3, dn.cols * 3, |r, c| dn.get(r / 3, c / 3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_mean_averages_quads() {
        let dn = Raster::from_vec(2, 4, vec![10u16, 20, 30, 50, 30, 40, 70, 90]);
        let out = block_mean_2x2(&dn);
        assert_eq!(out.rows, 1);
        assert_eq!(out.cols, 2);
        assert_eq!(out.get(0, 0), 25);
        assert_eq!(out.get(0, 1), 60);
    }

    #[test]
    fn replication_expands_each_pixel() {
        let dn = Raster::from_vec(1, 2, vec![7u16, 9]);
        let out = replicate_3x3(&dn);
        assert_eq!((out.rows, out.cols), (3, 6));
        assert_eq!(out.get(2, 2), 7);
        assert_eq!(out.get(0, 3), 9);
    }
}
