//! End-to-end pipeline scenarios over synthetic in-memory scenes.

use std::collections::HashMap;

use fmask_core::pipeline::{self, FmaskParams};
use fmask_core::raster::{GeoInfo, Mask, Raster, NO_DATA};
use fmask_core::scene::{Band, SceneRecord, Sensor};

/// Assemble a scene record the way ingest would: nodata wherever any band
/// holds the sentinel, no visible saturation, fixed solar geometry.
fn build_scene(sensor: Sensor, bands: Vec<(Band, Raster<i16>)>) -> SceneRecord {
    let rows = bands[0].1.rows;
    let cols = bands[0].1.cols;
    let mut nodata = Mask::zeros(rows, cols);
    for (_, raster) in &bands {
        for (m, &v) in nodata.data.iter_mut().zip(raster.data.iter()) {
            *m = *m || v == NO_DATA;
        }
    }
    SceneRecord {
        sensor,
        scene_id: "synthetic".to_string(),
        sun_elevation: 45.0,
        sun_azimuth: 135.0,
        rows,
        cols,
        geo: GeoInfo::unreferenced(),
        nodata_mask: nodata,
        vis_saturation: Mask::zeros(rows, cols),
        band_data: bands.into_iter().collect::<HashMap<_, _>>(),
    }
}

fn uniform_bands(rows: usize, cols: usize, values: &[(Band, i16)]) -> Vec<(Band, Raster<i16>)> {
    values.iter().map(|&(b, v)| (b, Raster::filled(rows, cols, v))).collect()
}

#[test]
fn all_nodata_scene_is_all_255() {
    let n = 100;
    let bands = uniform_bands(
        n,
        n,
        &[
            (Band::Blue, NO_DATA),
            (Band::Green, NO_DATA),
            (Band::Red, NO_DATA),
            (Band::Nir, NO_DATA),
            (Band::Swir1, NO_DATA),
            (Band::Swir2, NO_DATA),
            (Band::Bt, NO_DATA),
        ],
    );
    let mut scene = build_scene(Sensor::L08Oli, bands);
    let result = pipeline::run(&mut scene, None, None, &FmaskParams::default()).unwrap();
    assert!(result.results.data.iter().all(|&v| v == 255));
}

#[test]
fn clear_land_scene_is_all_clear() {
    let n = 250;
    let bands = uniform_bands(
        n,
        n,
        &[
            (Band::Blue, 500),
            (Band::Green, 1000),
            (Band::Red, 1000),
            (Band::Nir, 3000),
            (Band::Swir1, 1000),
            (Band::Swir2, 200),
            (Band::Bt, 2000),
        ],
    );
    let mut scene = build_scene(Sensor::L08Oli, bands);
    let result = pipeline::run(&mut scene, None, None, &FmaskParams::default()).unwrap();
    assert!(result.results.data.iter().all(|&v| v == 0));
    assert_eq!(result.cloud.count(), 0);
    assert_eq!(result.cloud_shadow.count(), 0);
    assert_eq!(result.snow.count(), 0);
    assert_eq!(result.water.count(), 0);
}

/// Scenario: a single bright, cold square over a dark background, with a
/// dark patch at the solar-projected position for a ~1000 m cloud base.
#[test]
fn single_square_cloud_finds_its_shadow() {
    let n = 300;
    let in_cloud = |r: usize, c: usize| (100..140).contains(&r) && (100..140).contains(&c);
    // projected by (dx, dy) = (-23, -23) for H = 1000 m at el 45 deg, az 135 deg
    let in_shadow = |r: usize, c: usize| (77..117).contains(&r) && (77..117).contains(&c);
    let in_nodata = |r: usize, c: usize| r >= 290 && c >= 290;

    let pick = |cloud_v: i16, shadow_v: i16, bg_v: i16| {
        move |r: usize, c: usize| {
            if in_nodata(r, c) {
                NO_DATA
            } else if in_cloud(r, c) {
                cloud_v
            } else if in_shadow(r, c) {
                shadow_v
            } else {
                bg_v
            }
        }
    };

    let bands = vec![
        (Band::Blue, Raster::from_fn(n, n, pick(9000, 1000, 1000))),
        (Band::Green, Raster::from_fn(n, n, pick(9000, 1000, 1000))),
        (Band::Red, Raster::from_fn(n, n, pick(9000, 600, 1000))),
        (Band::Nir, Raster::from_fn(n, n, pick(9000, 800, 2000))),
        (Band::Swir1, Raster::from_fn(n, n, pick(5000, 900, 2400))),
        (Band::Swir2, Raster::from_fn(n, n, pick(4000, 1800, 2000))),
        (Band::Bt, Raster::from_fn(n, n, pick(1500, 2000, 2000))),
    ];
    let mut scene = build_scene(Sensor::L08Oli, bands);
    let result = pipeline::run(&mut scene, None, None, &FmaskParams::default()).unwrap();

    // Cloud covers the block, within the 3-px dilation.
    assert_eq!(result.results.get(120, 120), 4);
    assert_eq!(result.results.get(98, 98), 4, "dilation extends the block");
    // The dark patch is recovered as matched shadow.
    assert_eq!(result.results.get(85, 85), 2);
    assert_eq!(result.results.get(80, 90), 2);
    // Background stays clear; nodata stays 255.
    assert_eq!(result.results.get(250, 250), 0);
    assert_eq!(result.results.get(295, 295), 255);
    // Final cloud remains a subset of the dilated block neighbourhood.
    for r in 0..n {
        for c in 0..n {
            if result.cloud.get(r, c) {
                assert!(
                    (97..143).contains(&r) && (97..143).contains(&c),
                    "unexpected cloud at ({r}, {c})"
                );
            }
        }
    }
}

/// Scenario: GSWO widens 5 % base water to the whole scene; snow pixels are
/// excluded from the snow-free water mask.
#[test]
fn gswo_augmentation_floods_scene_except_snow() {
    use fmask_core::aux::GswoData;

    let n = 250;
    let in_water = |r: usize, _c: usize| r < 12;
    let in_snow = |r: usize, c: usize| (100..110).contains(&r) && (100..110).contains(&c);

    let pick = |water_v: i16, snow_v: i16, bg_v: i16| {
        move |r: usize, c: usize| {
            if in_water(r, c) {
                water_v
            } else if in_snow(r, c) {
                snow_v
            } else {
                bg_v
            }
        }
    };
    let bands = vec![
        (Band::Blue, Raster::from_fn(n, n, pick(500, 1800, 500))),
        (Band::Green, Raster::from_fn(n, n, pick(800, 2000, 800))),
        (Band::Red, Raster::from_fn(n, n, pick(500, 1800, 500))),
        (Band::Nir, Raster::from_fn(n, n, pick(500, 2000, 500))),
        (Band::Swir1, Raster::from_fn(n, n, pick(300, 1000, 300))),
        (Band::Swir2, Raster::from_fn(n, n, pick(200, 200, 200))),
    ];
    let mut scene = build_scene(Sensor::L08Oli, bands);
    let gswo = GswoData { occurrence: Raster::filled(n, n, 80u8) };
    let result = pipeline::run(&mut scene, None, Some(&gswo), &FmaskParams::default()).unwrap();

    // occurrence cut = 80 - 5 = 75; GSWO 80 > 75 floods everything.
    assert_eq!(result.all_water.count(), n * n);
    assert_eq!(result.water.count(), n * n - 100);
    assert_eq!(result.results.get(5, 5), 1);
    assert_eq!(result.results.get(105, 105), 3);
}

/// Scenario: on Sentinel-2 a small bright object with no displacement
/// signal (CDI ~ 0) is removed by the commission gate.
#[test]
fn s2_small_object_without_cdi_signal_is_removed() {
    let n = 250;
    let in_blob = |r: usize, c: usize| (125..130).contains(&r) && (125..130).contains(&c);
    let pick = |blob_v: i16, bg_v: i16| {
        move |r: usize, c: usize| if in_blob(r, c) { blob_v } else { bg_v }
    };

    let nir = Raster::from_fn(n, n, pick(9000, 2000));
    let bands = vec![
        (Band::Blue, Raster::from_fn(n, n, pick(9000, 1000))),
        (Band::Green, Raster::from_fn(n, n, pick(9000, 1000))),
        (Band::Red, Raster::from_fn(n, n, pick(9000, 1000))),
        (Band::Nir, nir.clone()),
        (Band::Swir1, Raster::from_fn(n, n, pick(5000, 2400))),
        (Band::Swir2, Raster::from_fn(n, n, pick(4000, 2000))),
        // Flat band ratios -> CDI exactly 0 everywhere.
        (Band::Red3, nir.clone()),
        (Band::Nir2, nir),
    ];
    let mut scene = build_scene(Sensor::S2Msi, bands);
    let result = pipeline::run(&mut scene, None, None, &FmaskParams::default()).unwrap();
    assert_eq!(result.cloud.count(), 0, "CDI gate should drop the blob");
    assert!(result.results.data.iter().all(|&v| v != 4));
}

/// Degenerate geometry: a grazing sun must not overflow the displacement
/// arithmetic even with clouds present.
#[test]
fn grazing_sun_elevation_does_not_overflow() {
    let n = 250;
    let in_cloud = |r: usize, c: usize| (100..130).contains(&r) && (100..130).contains(&c);
    let pick = |cloud_v: i16, bg_v: i16| {
        move |r: usize, c: usize| if in_cloud(r, c) { cloud_v } else { bg_v }
    };
    let bands = vec![
        (Band::Blue, Raster::from_fn(n, n, pick(9000, 1000))),
        (Band::Green, Raster::from_fn(n, n, pick(9000, 1000))),
        (Band::Red, Raster::from_fn(n, n, pick(9000, 1000))),
        (Band::Nir, Raster::from_fn(n, n, pick(9000, 2000))),
        (Band::Swir1, Raster::from_fn(n, n, pick(5000, 2400))),
        (Band::Swir2, Raster::from_fn(n, n, pick(4000, 2000))),
    ];
    let mut scene = build_scene(Sensor::L08Oli, bands);
    scene.sun_elevation = 0.001;
    let result = pipeline::run(&mut scene, None, None, &FmaskParams::default()).unwrap();
    // The cloud itself is still detected; whether a shadow matches at this
    // geometry is unspecified, only that nothing overflows.
    assert!(result.cloud.count() > 0);
}
