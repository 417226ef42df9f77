//! Landsat-8 Collection ingestion from an `*_MTL.txt`/`*_MTL.xml` product.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{FmaskError, Result};
use crate::io;
use crate::platforms::metadata::{extract_metadata, require_f64};
use crate::platforms::PlatformAdapter;
use crate::raster::{GeoInfo, Mask, Raster, NO_DATA};
use crate::scene::{Band, SceneRecord, Sensor};

/// OLI/TIRS band numbers used by the pipeline.
const BANDS: [(Band, u8); 8] = [
    (Band::Blue, 2),
    (Band::Green, 3),
    (Band::Red, 4),
    (Band::Nir, 5),
    (Band::Swir1, 6),
    (Band::Swir2, 7),
    (Band::Cirrus, 9),
    (Band::Bt, 10),
];

const SATURATION_DN: u16 = u16::MAX;

pub struct Landsat8;

impl PlatformAdapter for Landsat8 {
    fn name(&self) -> &'static str {
        "Landsat8"
    }

    fn is_platform(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        name.contains("LC08") && (name.contains("_MTL.txt") || name.contains("_MTL.xml"))
    }

    fn get_data(&self, path: &Path) -> Result<SceneRecord> {
        let metadata = read_metadata(path)?;

        let sun_elevation = require_f64(&metadata, "SUN_ELEVATION")?;
        let sun_azimuth = require_f64(&metadata, "SUN_AZIMUTH")?;
        let scene_id = metadata
            .get("LANDSAT_PRODUCT_ID")
            .cloned()
            .or_else(|| {
                path.parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| "landsat8-scene".to_string());

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut band_data: HashMap<Band, Raster<i16>> = HashMap::new();
        let mut nodata_mask: Option<Mask> = None;
        let mut vis_saturation: Option<Mask> = None;
        let mut geo: Option<GeoInfo> = None;
        let mut size: Option<(usize, usize)> = None;

        for (band, number) in BANDS {
            let file_key = format!("FILE_NAME_BAND_{number}");
            let file_name = metadata
                .get(&file_key)
                .ok_or_else(|| FmaskError::Input(format!("{file_key} missing from MTL")))?;
            let band_path = parent.join(file_name);
            debug!(band = ?band, path = %band_path.display(), "reading band");

            let (dn, band_geo) = io::read_band_u16(&band_path)?;
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

            // RED is the projection base.
            if band == Band::Red {
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

            let converted = if band == Band::Bt {
                convert_bt(&dn, &metadata, number)?
            } else {
                convert_reflectance(&dn, &metadata, number, sun_elevation)?
            };
            band_data.insert(band, converted);
        }

        let (rows, cols) = size.ok_or_else(|| FmaskError::Input("no bands were read".into()))?;
        Ok(SceneRecord {
            sensor: Sensor::L08Oli,
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

fn read_metadata(path: &Path) -> Result<HashMap<String, String>> {
    let mut targets: Vec<String> = vec![
        "SUN_ELEVATION".into(),
        "SUN_AZIMUTH".into(),
        "LANDSAT_PRODUCT_ID".into(),
        "K1_CONSTANT_BAND_10".into(),
        "K2_CONSTANT_BAND_10".into(),
        "RADIANCE_MULT_BAND_10".into(),
        "RADIANCE_ADD_BAND_10".into(),
    ];
    for (_, number) in BANDS {
        targets.push(format!("FILE_NAME_BAND_{number}"));
        if number != 10 {
            targets.push(format!("REFLECTANCE_MULT_BAND_{number}"));
            targets.push(format!("REFLECTANCE_ADD_BAND_{number}"));
        }
    }
    extract_metadata(path, &targets)
}

/// DN → TOA reflectance ×10000, sun-angle corrected; DN 0 is nodata.
fn convert_reflectance(
    dn: &Raster<u16>,
    metadata: &HashMap<String, String>,
    number: u8,
    sun_elevation: f64,
) -> Result<Raster<i16>> {
    let mult = require_f64(metadata, &format!("REFLECTANCE_MULT_BAND_{number}"))?;
    let add = require_f64(metadata, &format!("REFLECTANCE_ADD_BAND_{number}"))?;
    let sin_elev = sun_elevation.to_radians().sin();
    Ok(dn.map(|v| {
        if v == 0 {
            NO_DATA
        } else {
            let reflectance = 10_000.0 * (mult * v as f64 + add) / sin_elev;
            reflectance.clamp(i16::MIN as f64, i16::MAX as f64) as i16
        }
    }))
}

/// DN → brightness temperature in hundredths of °C via the K1/K2 Planck
/// inversion; DN 0 is nodata.
fn convert_bt(dn: &Raster<u16>, metadata: &HashMap<String, String>, number: u8) -> Result<Raster<i16>> {
    let mult = require_f64(metadata, &format!("RADIANCE_MULT_BAND_{number}"))?;
    let add = require_f64(metadata, &format!("RADIANCE_ADD_BAND_{number}"))?;
    let k1 = require_f64(metadata, &format!("K1_CONSTANT_BAND_{number}"))?;
    let k2 = require_f64(metadata, &format!("K2_CONSTANT_BAND_{number}"))?;
    Ok(dn.map(|v| {
        if v == 0 {
            NO_DATA
        } else {
            let radiance = mult * v as f64 + add;
            let kelvin = k2 / (k1 / radiance + 1.0).ln();
            let centi_celsius = 100.0 * (kelvin - 273.15);
            centi_celsius.clamp(i16::MIN as f64, i16::MAX as f64) as i16
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflectance_conversion_scales_and_flags_nodata() {
        let mut metadata = HashMap::new();
        metadata.insert("REFLECTANCE_MULT_BAND_2".to_string(), "0.00002".to_string());
        metadata.insert("REFLECTANCE_ADD_BAND_2".to_string(), "-0.1".to_string());
        let dn = Raster::from_vec(1, 3, vec![0u16, 10_000, 30_000]);
        let out = convert_reflectance(&dn, &metadata, 2, 90.0).unwrap();
        assert_eq!(out.get(0, 0), NO_DATA);
        // 0.00002*10000 - 0.1 = 0.1 -> 1000 at sin(90°) = 1
        assert_eq!(out.get(0, 1), 1000);
        assert_eq!(out.get(0, 2), 5000);
    }

    #[test]
    fn bt_conversion_matches_planck_inversion() {
        let mut metadata = HashMap::new();
        metadata.insert("RADIANCE_MULT_BAND_10".to_string(), "0.0003342".to_string());
        metadata.insert("RADIANCE_ADD_BAND_10".to_string(), "0.1".to_string());
        metadata.insert("K1_CONSTANT_BAND_10".to_string(), "774.8853".to_string());
        metadata.insert("K2_CONSTANT_BAND_10".to_string(), "1321.0789".to_string());
        let dn = Raster::from_vec(1, 1, vec![25_000u16]);
        let out = convert_bt(&dn, &metadata, 10).unwrap();
        // radiance = 8.455 -> T = 1321.0789 / ln(774.8853/8.455 + 1) ≈ 290.9 K
        let expected = {
            let radiance = 0.0003342 * 25_000.0 + 0.1;
            let kelvin = 1321.0789 / (774.8853f64 / radiance + 1.0).ln();
            (100.0 * (kelvin - 273.15)) as i16
        };
        assert_eq!(out.get(0, 0), expected);
    }
}
