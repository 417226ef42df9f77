//! GeoTIFF input and output.
//!
//! Band rasters are read with the pure-Rust `tiff` decoder; label and
//! probability outputs are written as DEFLATE-compressed byte rasters with
//! the scene's georeferencing (ModelPixelScale/ModelTiepoint + projection
//! string) attached.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::Gray8;
use tiff::encoder::compression::Deflate;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::error::{FmaskError, Result};
use crate::raster::{GeoInfo, Raster};

fn open_decoder(path: &Path) -> Result<Decoder<File>> {
    let file = File::open(path)?;
    Ok(Decoder::new(file)?.with_limits(Limits::unlimited()))
}

/// Extract georeferencing from an open decoder, when present.
fn read_geo_info(decoder: &mut Decoder<File>) -> Option<GeoInfo> {
    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)
        .ok()
        .flatten()?
        .into_f64_vec()
        .ok()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)
        .ok()
        .flatten()?
        .into_f64_vec()
        .ok()?;
    if scale.len() < 2 || tiepoint.len() < 5 {
        return None;
    }
    let projection = decoder
        .find_tag(Tag::GeoAsciiParamsTag)
        .ok()
        .flatten()
        .and_then(|v| v.into_string().ok())
        .unwrap_or_default();

    // Tiepoint (i, j) maps to (x, y); express as an origin-based transform.
    let (sx, sy) = (scale[0], scale[1]);
    let x0 = tiepoint[3] - tiepoint[0] * sx;
    let y0 = tiepoint[4] + tiepoint[1] * sy;
    Some(GeoInfo { geo_transform: [x0, sx, 0.0, y0, 0.0, -sy], projection })
}

/// Read a single-band unsigned 16-bit raster (Landsat/Sentinel DN files).
pub fn read_band_u16(path: &Path) -> Result<(Raster<u16>, Option<GeoInfo>)> {
    let mut decoder = open_decoder(path)?;
    let (cols, rows) = decoder.dimensions()?;
    let geo = read_geo_info(&mut decoder);
    let data = match decoder.read_image()? {
        DecodingResult::U16(v) => v,
        DecodingResult::U8(v) => v.into_iter().map(u16::from).collect(),
        other => {
            return Err(FmaskError::Input(format!(
                "{}: expected 8- or 16-bit DN raster, got {:?} samples",
                path.display(),
                sample_kind(&other)
            )))
        }
    };
    Ok((Raster::from_vec(rows as usize, cols as usize, data), geo))
}

/// Read a signed 16-bit raster (elevation tiles).
pub fn read_geotiff_i16(path: &Path) -> Result<(Raster<i16>, Option<GeoInfo>)> {
    let mut decoder = open_decoder(path)?;
    let (cols, rows) = decoder.dimensions()?;
    let geo = read_geo_info(&mut decoder);
    let data: Vec<i16> = match decoder.read_image()? {
        DecodingResult::I16(v) => v,
        DecodingResult::U16(v) => v.into_iter().map(|x| x.min(i16::MAX as u16) as i16).collect(),
        DecodingResult::U8(v) => v.into_iter().map(i16::from).collect(),
        other => {
            return Err(FmaskError::Input(format!(
                "{}: expected 16-bit raster, got {:?} samples",
                path.display(),
                sample_kind(&other)
            )))
        }
    };
    Ok((Raster::from_vec(rows as usize, cols as usize, data), geo))
}

/// Read a byte raster (surface-water occurrence tiles).
pub fn read_geotiff_u8(path: &Path) -> Result<(Raster<u8>, Option<GeoInfo>)> {
    let mut decoder = open_decoder(path)?;
    let (cols, rows) = decoder.dimensions()?;
    let geo = read_geo_info(&mut decoder);
    let data = match decoder.read_image()? {
        DecodingResult::U8(v) => v,
        other => {
            return Err(FmaskError::Input(format!(
                "{}: expected byte raster, got {:?} samples",
                path.display(),
                sample_kind(&other)
            )))
        }
    };
    Ok((Raster::from_vec(rows as usize, cols as usize, data), geo))
}

fn sample_kind(result: &DecodingResult) -> &'static str {
    match result {
        DecodingResult::U8(_) => "u8",
        DecodingResult::U16(_) => "u16",
        DecodingResult::U32(_) => "u32",
        DecodingResult::U64(_) => "u64",
        DecodingResult::I8(_) => "i8",
        DecodingResult::I16(_) => "i16",
        DecodingResult::I32(_) => "i32",
        DecodingResult::I64(_) => "i64",
        DecodingResult::F32(_) => "f32",
        DecodingResult::F64(_) => "f64",
    }
}

/// Write a byte raster as a DEFLATE-compressed GeoTIFF carrying the scene
/// georeferencing and a nodata value of 255.
pub fn write_byte_raster(path: &Path, raster: &Raster<u8>, geo: &GeoInfo) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image_with_compression::<Gray8, _>(
        raster.cols as u32,
        raster.rows as u32,
        Deflate::default(),
    )?;

    let gt = &geo.geo_transform;
    let pixel_scale = [gt[1].abs(), gt[5].abs(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt[0], gt[3], 0.0];
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &pixel_scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    if !geo.projection.is_empty() {
        image
            .encoder()
            .write_tag(Tag::GeoAsciiParamsTag, geo.projection.as_str())?;
    }
    image.encoder().write_tag(Tag::GdalNodata, "255")?;

    image.write_data(&raster.data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_raster_roundtrip_preserves_data_and_geo() {
        let dir = std::env::temp_dir().join("fmask-io-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("labels.tif");

        let raster = Raster::from_fn(16, 16, |r, c| ((r * 16 + c) % 5) as u8);
        let geo = GeoInfo {
            geo_transform: [300_000.0, 30.0, 0.0, 4_500_000.0, 0.0, -30.0],
            projection: "PROJCS[\"WGS 84 / UTM zone 33N\"]".to_string(),
        };
        write_byte_raster(&path, &raster, &geo).unwrap();

        let (read, read_geo) = read_geotiff_u8(&path).unwrap();
        assert_eq!(read.data, raster.data);
        let read_geo = read_geo.expect("geo tags should roundtrip");
        for (a, b) in read_geo.geo_transform.iter().zip(geo.geo_transform.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_geotiff_u8(Path::new("/no/such/file.tif")).unwrap_err();
        assert!(matches!(err, FmaskError::Io(_)));
    }
}
