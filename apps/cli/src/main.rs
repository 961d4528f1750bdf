use anyhow::{Context, Result};
use ardhi_pipeline::model::ModelDescriptor;
use ardhi_pipeline::types::{FeatureCollection, PipelineError};
use ardhi_pipeline::{
    CancellationToken, Connectivity, FailurePolicy, MergeStrategy, Pipeline, PipelineConfig,
    Source,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "ardhi",
    version,
    about = "Segment a georeferenced image and export the labelled regions as GeoJSON"
)]
struct Args {
    /// GeoTIFF to segment; PNG and JPEG are read without georeferencing
    #[arg(required_unless_present = "print_schema")]
    input: Option<PathBuf>,

    /// Destination of the FeatureCollection, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// ONNX network, or a `.json` model descriptor
    #[arg(short, long, conflicts_with = "constant_class")]
    model: Option<PathBuf>,

    /// Predict this class everywhere instead of running a network
    #[arg(long)]
    constant_class: Option<u8>,

    /// JSON pipeline configuration; ARDHI_* variables and flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    tile_size: Option<u32>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    /// Resolve overlapping masks with `last`, `first` or `max`
    #[arg(long)]
    merge: Option<MergeStrategy>,

    /// Pixel adjacency used to group regions: `four` or `eight`
    #[arg(long)]
    connectivity: Option<Connectivity>,

    /// Drop regions smaller than this many pixels
    #[arg(long)]
    min_region_pixels: Option<usize>,

    /// Leave failed tiles as background instead of aborting the run
    #[arg(long)]
    skip_failed_tiles: bool,

    /// Emit EPSG:4326 longitude/latitude coordinates
    #[arg(long)]
    wgs84: bool,

    /// Persist tiles, masks and the mosaic under `<dir>/<run id>/`
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Comma separated class names, indexed by label
    #[arg(long, value_delimiter = ',')]
    class_labels: Vec<String>,

    /// Print the JSON schema of the output and exit
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ardhi=info")))
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<PipelineError>() {
                Some(pipeline_err) => match serde_json::to_string_pretty(&pipeline_err.to_body()) {
                    Ok(body) => eprintln!("{body}"),
                    Err(_) => eprintln!("{pipeline_err}"),
                },
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    if args.print_schema {
        let schema = schemars::schema_for!(FeatureCollection);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let Some(input) = args.input.clone() else {
        anyhow::bail!("An input image is required");
    };

    let mut config = load_config(&args)?;
    let descriptor = model_descriptor(&args)?;
    if config.vectorize.class_labels.is_none() {
        config.vectorize.class_labels = descriptor.class_labels.clone();
    }

    let model = descriptor.load()?;
    if let Some(ep) = ardhi_pipeline::model::get_ep_info() {
        tracing::info!("Execution providers: {}", ep.active_providers.join(", "));
    }
    tracing::info!(
        "Segmenting {} with model {} (tile size {}, {} workers)",
        input.display(),
        model.name(),
        config.tile_size,
        config.inference.workers
    );
    let pipeline = Pipeline::new(config, model)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let output = pipeline.run(Source::path(input), cancel).await?;
    for skipped in &output.skipped_tiles {
        tracing::warn!("{} left as background: {}", skipped.tile, skipped.reason);
    }
    if let Some(dir) = &output.artifacts_dir {
        tracing::info!("Artifacts written to {}", dir.display());
    }

    let geojson = serde_json::to_string_pretty(&output.features)?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, geojson)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(
                "Wrote {} features to {}",
                output.features.len(),
                path.display()
            );
        }
        None => println!("{geojson}"),
    }
    Ok(())
}

/// File or environment configuration with command line overrides applied.
fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env(),
    };

    if let Some(tile_size) = args.tile_size {
        config.tile_size = tile_size;
    }
    if let Some(batch_size) = args.batch_size {
        config.inference.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        config.inference.workers = workers;
    }
    if let Some(strategy) = args.merge {
        config.mosaic.strategy = strategy;
    }
    if let Some(connectivity) = args.connectivity {
        config.vectorize.connectivity = connectivity;
    }
    if let Some(min) = args.min_region_pixels {
        config.vectorize.min_region_pixels = min;
    }
    if args.skip_failed_tiles {
        config.inference.failure_policy = FailurePolicy::Skip;
    }
    if args.wgs84 {
        config.vectorize.reproject_to_wgs84 = true;
    }
    if args.artifacts_dir.is_some() {
        config.artifacts_dir = args.artifacts_dir.clone();
    }
    if !args.class_labels.is_empty() {
        config.vectorize.class_labels = Some(args.class_labels.clone());
    }
    Ok(config)
}

fn model_descriptor(args: &Args) -> Result<ModelDescriptor> {
    if let Some(label) = args.constant_class {
        return Ok(ModelDescriptor::constant(label));
    }
    let Some(path) = &args.model else {
        anyhow::bail!("Pass --model <PATH> or --constant-class <LABEL>");
    };
    if path.extension().is_some_and(|ext| ext == "json") {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model descriptor {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("Invalid model descriptor {}", path.display()));
    }
    Ok(ModelDescriptor::onnx(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ardhi_pipeline::model::ModelBackend;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ardhi").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "scene.tif",
            "--constant-class",
            "1",
            "--tile-size",
            "512",
            "--merge",
            "max",
            "--connectivity",
            "four",
            "--skip-failed-tiles",
            "--class-labels",
            "background,building",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.tile_size, 512);
        assert_eq!(config.mosaic.strategy, MergeStrategy::Max);
        assert_eq!(config.vectorize.connectivity, Connectivity::Four);
        assert_eq!(config.inference.failure_policy, FailurePolicy::Skip);
        assert_eq!(
            config.vectorize.class_labels,
            Some(vec!["background".to_string(), "building".to_string()])
        );
    }

    #[test]
    fn test_model_selection() {
        let args = parse(&["scene.tif", "--constant-class", "3"]);
        assert_eq!(
            model_descriptor(&args).unwrap().backend,
            ModelBackend::Constant {
                label: 3,
                num_classes: None
            }
        );

        let args = parse(&["scene.tif", "--model", "buildings.onnx"]);
        assert_eq!(
            model_descriptor(&args).unwrap().backend,
            ModelBackend::Onnx {
                path: PathBuf::from("buildings.onnx")
            }
        );

        let args = parse(&["scene.tif"]);
        assert!(model_descriptor(&args).is_err());
    }

    #[test]
    fn test_descriptor_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"backend": "constant", "label": 2, "class_labels": ["bg", "a", "b"]}"#,
        )
        .unwrap();
        let args = parse(&["scene.tif", "--model", path.to_str().unwrap()]);
        let descriptor = model_descriptor(&args).unwrap();
        assert_eq!(descriptor.class_labels.map(|l| l.len()), Some(3));
    }

    #[test]
    fn test_input_required_unless_printing_schema() {
        assert!(Args::try_parse_from(["ardhi"]).is_err());
        assert!(Args::try_parse_from(["ardhi", "--print-schema"]).is_ok());
        assert!(
            Args::try_parse_from(["ardhi", "x.tif", "--model", "m.onnx", "--constant-class", "1"])
                .is_err()
        );
    }
}
