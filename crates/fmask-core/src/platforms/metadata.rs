//! Plain-text metadata extraction for sensor products.
//!
//! Both supported formats carry flat `KEY = VALUE` pairs (Landsat MTL) or
//! `<TAG>value</TAG>` elements (Sentinel MTD); a line scan for the requested
//! attribute names is all the pipeline needs.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{FmaskError, Result};

/// Scan `path` for the requested attribute names. Returns whichever were
/// found; the caller decides which are mandatory.
pub fn extract_metadata(path: &Path, targets: &[String]) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)?;
    let mut found: HashMap<String, String> = HashMap::new();

    for line in text.lines() {
        let line = line.trim();

        // MTL style: KEY = VALUE
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if targets.iter().any(|t| t == key) {
                found
                    .entry(key.to_string())
                    .or_insert_with(|| value.trim().trim_matches('"').to_string());
                continue;
            }
        }

        // MTD style: <TAG ...>value</TAG>
        if let Some(rest) = line.strip_prefix('<') {
            if let Some((tag_part, rest)) = rest.split_once('>') {
                let tag = tag_part.split_whitespace().next().unwrap_or("");
                if targets.iter().any(|t| t == tag) {
                    if let Some((value, _)) = rest.split_once("</") {
                        found.entry(tag.to_string()).or_insert_with(|| value.trim().to_string());
                    }
                }
            }
        }
    }
    Ok(found)
}

/// Mandatory attribute lookup with a float conversion.
pub fn require_f64(metadata: &HashMap<String, String>, key: &str) -> Result<f64> {
    metadata
        .get(key)
        .ok_or_else(|| FmaskError::Input(format!("metadata attribute {key} not found")))?
        .parse::<f64>()
        .map_err(|_| FmaskError::Input(format!("metadata attribute {key} is not a number")))
}

/// Mandatory attribute lookup.
pub fn require<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| FmaskError::Input(format!("metadata attribute {key} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("fmask-metadata-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn scans_mtl_key_value_pairs() {
        let path = write_temp(
            "mtl.txt",
            "GROUP = LEVEL1\n  SUN_ELEVATION = 47.251\n  FILE_NAME_BAND_4 = \"LC08_B4.TIF\"\nEND_GROUP\n",
        );
        let targets = vec!["SUN_ELEVATION".to_string(), "FILE_NAME_BAND_4".to_string()];
        let md = extract_metadata(&path, &targets).unwrap();
        assert_eq!(require_f64(&md, "SUN_ELEVATION").unwrap(), 47.251);
        assert_eq!(require(&md, "FILE_NAME_BAND_4").unwrap(), "LC08_B4.TIF");
    }

    #[test]
    fn scans_mtd_xml_elements() {
        let path = write_temp(
            "mtd.xml",
            "<Mean_Sun_Angle>\n<ZENITH_ANGLE unit=\"deg\">31.1</ZENITH_ANGLE>\n<AZIMUTH_ANGLE unit=\"deg\">146.2</AZIMUTH_ANGLE>\n</Mean_Sun_Angle>\n",
        );
        let targets = vec!["ZENITH_ANGLE".to_string(), "AZIMUTH_ANGLE".to_string()];
        let md = extract_metadata(&path, &targets).unwrap();
        assert_eq!(require_f64(&md, "ZENITH_ANGLE").unwrap(), 31.1);
        assert_eq!(require_f64(&md, "AZIMUTH_ANGLE").unwrap(), 146.2);
    }

    #[test]
    fn missing_attribute_is_input_error() {
        let path = write_temp("empty.txt", "NOTHING = HERE\n");
        let md = extract_metadata(&path, &["X".to_string()]).unwrap();
        assert!(matches!(require_f64(&md, "X"), Err(FmaskError::Input(_))));
    }
}
