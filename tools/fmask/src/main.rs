/// Fmask 4 driver: ingest a Landsat-8 or Sentinel-2 product, run the
/// detection pipeline, and write the label raster (and optionally the
/// cloud-probability raster) as GeoTIFF.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fmask_core::aux::{load_dem, load_gswo};
use fmask_core::pipeline::{self, cloud_probability_raster, FmaskParams, LabelCodes};
use fmask_core::platforms::PlatformRegistry;
use fmask_core::io::write_byte_raster;

#[derive(Parser, Debug)]
#[command(name = "fmask", about = "Cloud, shadow, snow and water masking for Landsat-8 and Sentinel-2")]
struct Args {
    /// Path to the *_MTL.txt (Landsat-8) or MTD_*.xml (Sentinel-2) metadata file.
    infile: PathBuf,

    /// Output directory for the label raster.
    out_dir: PathBuf,

    /// Output file name; defaults to "<scene_id>_fmask.tif".
    #[arg(long)]
    out_name: Option<String>,

    /// Dilation radius for cloud, in pixels.
    #[arg(long, default_value = "3")]
    cloud: usize,

    /// Dilation radius for cloud shadow, in pixels.
    #[arg(long, default_value = "3")]
    shadow: usize,

    /// Dilation radius for snow, in pixels.
    #[arg(long, default_value = "0")]
    snow: usize,

    /// Cloud probability threshold override (percent).
    #[arg(long)]
    cloud_threshold: Option<f64>,

    /// Scene-grid-aligned elevation GeoTIFF.
    #[arg(long)]
    dem_path: Option<PathBuf>,

    /// Scene-grid-aligned surface-water occurrence GeoTIFF.
    #[arg(long)]
    gswo_path: Option<PathBuf>,

    /// Also write the cloud-probability raster.
    #[arg(long)]
    save_cloud_prob: bool,

    /// Seed for the stratified regression sampling.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Output label codes.
    #[arg(long, default_value = "1")]
    water_value: u8,
    #[arg(long, default_value = "2")]
    shadow_value: u8,
    #[arg(long, default_value = "3")]
    snow_value: u8,
    #[arg(long, default_value = "4")]
    cloud_value: u8,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let registry = PlatformRegistry::default();
    let mut scene = registry
        .ingest(&args.infile)
        .with_context(|| format!("ingesting {}", args.infile.display()))?;

    let dem = load_dem(
        args.dem_path.as_deref(),
        scene.rows,
        scene.cols,
        scene.sensor.out_resolution(),
    )?;
    let gswo = load_gswo(args.gswo_path.as_deref(), scene.rows, scene.cols)?;

    let params = FmaskParams {
        cloud_dilation_px: args.cloud,
        shadow_dilation_px: args.shadow,
        snow_dilation_px: args.snow,
        cloud_probability_threshold: args.cloud_threshold,
        sampling_seed: args.seed,
        label_codes: LabelCodes {
            clear: 0,
            water: args.water_value,
            cloud_shadow: args.shadow_value,
            snow: args.snow_value,
            cloud: args.cloud_value,
            nodata: 255,
        },
        ..FmaskParams::default()
    };

    let result = pipeline::run(&mut scene, dem.as_ref(), gswo.as_ref(), &params)
        .with_context(|| format!("processing {}", scene.scene_id))?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let out_name = args.out_name.unwrap_or_else(|| format!("{}_fmask.tif", scene.scene_id));
    let label_path = args.out_dir.join(&out_name);
    write_byte_raster(&label_path, &result.results, &scene.geo)
        .with_context(|| format!("writing {}", label_path.display()))?;
    info!(path = %label_path.display(), "wrote label raster");

    if args.save_cloud_prob {
        let prob = cloud_probability_raster(&result, &scene.nodata_mask);
        let prob_path = args
            .out_dir
            .join(format!("{}_cloud-probability.tif", out_name.trim_end_matches(".tif")));
        write_byte_raster(&prob_path, &prob, &scene.geo)
            .with_context(|| format!("writing {}", prob_path.display()))?;
        info!(path = %prob_path.display(), "wrote cloud probability raster");
    }

    Ok(())
}
