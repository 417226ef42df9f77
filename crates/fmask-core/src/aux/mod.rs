//! Auxiliary data: digital elevation (with derived slope/aspect) and Global
//! Surface Water Occurrence, pre-warped onto the scene grid.
//!
//! Both sources are optional: a missing or unreadable file degrades to
//! `None` and every downstream stage takes its documented fallback.

pub mod dem;

use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::io;
use crate::raster::Raster;

/// Elevation plus Horn-derived slope and aspect, all on the scene grid.
#[derive(Debug, Clone)]
pub struct DemData {
    /// Metres; nodata sentinel −9999.
    pub elevation: Raster<i16>,
    /// Degrees.
    pub slope: Raster<f32>,
    /// Degrees clockwise from North; 0 for flat cells.
    pub aspect: Raster<f32>,
}

/// Surface-water occurrence in percent, 0–100.
#[derive(Debug, Clone)]
pub struct GswoData {
    pub occurrence: Raster<u8>,
}

/// Load a scene-grid-aligned elevation GeoTIFF and derive slope/aspect.
/// Returns `None` (with a warning) when the file is absent or unusable, or
/// when its grid does not match the scene.
pub fn load_dem(
    path: Option<&Path>,
    rows: usize,
    cols: usize,
    out_resolution: u32,
) -> Result<Option<DemData>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(None),
    };
    let elevation = match io::read_geotiff_i16(path) {
        Ok((raster, _)) => raster,
        Err(err) => {
            warn!(path = %path.display(), %err, "DEM unavailable, continuing without");
            return Ok(None);
        }
    };
    if elevation.rows != rows || elevation.cols != cols {
        warn!(
            path = %path.display(),
            "DEM grid {}x{} does not match scene {}x{}, continuing without",
            elevation.rows, elevation.cols, rows, cols,
        );
        return Ok(None);
    }
    let (slope, aspect) = dem::slope_aspect(&elevation, out_resolution as f64);
    Ok(Some(DemData { elevation, slope, aspect }))
}

/// Load a scene-grid-aligned GSWO GeoTIFF; the 255 ocean sentinel remaps
/// to 100 %.
pub fn load_gswo(path: Option<&Path>, rows: usize, cols: usize) -> Result<Option<GswoData>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(None),
    };
    let occurrence = match io::read_geotiff_u8(path) {
        Ok((raster, _)) => raster,
        Err(err) => {
            warn!(path = %path.display(), %err, "GSWO unavailable, continuing without");
            return Ok(None);
        }
    };
    if occurrence.rows != rows || occurrence.cols != cols {
        warn!(path = %path.display(), "GSWO grid does not match scene, continuing without");
        return Ok(None);
    }
    let occurrence = occurrence.map(|v| if v == 255 { 100 } else { v });
    Ok(Some(GswoData { occurrence }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_paths_are_absent_aux() {
        assert!(load_dem(None, 10, 10, 30).unwrap().is_none());
        assert!(load_gswo(None, 10, 10).unwrap().is_none());
    }

    #[test]
    fn unreadable_files_degrade_to_none() {
        let missing = Path::new("/definitely/not/here.tif");
        assert!(load_dem(Some(missing), 10, 10, 30).unwrap().is_none());
        assert!(load_gswo(Some(missing), 10, 10).unwrap().is_none());
    }
}
