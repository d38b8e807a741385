use std::cell::RefCell;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use overpass_frontend::{
    BBoxOptions, BoundingBox, FeatureResult, FrontendOptions, GetOptions, OverpassFrontend,
    Properties, Result,
};

#[derive(Parser)]
#[command(name = "overpass-frontend")]
#[command(about = "Fetch OSM features from an Overpass API server as GeoJSON", long_about = None)]
struct Args {
    /// Overpass interpreter endpoint (overrides the config file)
    #[arg(long)]
    url: Option<String>,

    /// Options file in TOML; defaults to config.toml in the user config dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Effort budget of one round
    #[arg(long)]
    effort: Option<u32>,

    /// Also request full geometry
    #[arg(long)]
    geom: bool,

    /// Also request version, timestamp and author
    #[arg(long)]
    meta: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch features by id, e.g. `n1 w2 r3`
    Get {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Only report features touching this box (south,west,north,east)
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<BoundingBox>,
    },
    /// Fetch every feature matching a filter, e.g. `nwr[amenity=cafe]`
    Bbox {
        filter: String,

        /// south,west,north,east
        #[arg(value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: BoundingBox,
    },
}

fn parse_bbox(s: &str) -> std::result::Result<BoundingBox, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{v}: {e}")))
        .collect::<std::result::Result<_, _>>()?;
    match values[..] {
        [south, west, north, east] => Ok(BoundingBox::new(south, west, north, east)),
        _ => Err(format!("expected south,west,north,east, got {} values", values.len())),
    }
}

fn options(args: &Args) -> Result<FrontendOptions> {
    let mut options = match &args.config {
        Some(path) => FrontendOptions::load(path)?,
        None => FrontendOptions::from_config_dir()?,
    };
    if let Some(url) = &args.url {
        options.url = url.clone();
    }
    if let Some(effort) = args.effort {
        options.effort_per_request = effort;
    }
    Ok(options)
}

fn properties(args: &Args) -> Properties {
    let mut properties = Properties::DEFAULT;
    if args.geom {
        properties |= Properties::GEOM;
    }
    if args.meta {
        properties |= Properties::META;
    }
    properties
}

fn run(args: Args) -> Result<geojson::FeatureCollection> {
    let options = options(&args)?;
    let properties = properties(&args);
    let mut frontend = OverpassFrontend::with_http(options);

    let features: Rc<RefCell<Vec<geojson::Feature>>> = Rc::default();
    let outcome: Rc<RefCell<Option<Result<()>>>> = Rc::default();
    let sink = features.clone();
    let on_feature = move |result: FeatureResult<'_>, index: usize| match result {
        FeatureResult::Found(feature) => sink.borrow_mut().push(feature.to_geojson()),
        FeatureResult::NotFound => tracing::warn!("Feature {} not found", index),
        FeatureResult::OutsideBBox => tracing::debug!("Feature {} outside bbox", index),
    };
    let done = outcome.clone();
    let on_final = move |result: Result<()>| *done.borrow_mut() = Some(result);

    match args.command {
        Command::Get { ids, bbox } => {
            let get_options = GetOptions {
                bbox,
                properties,
                ..Default::default()
            };
            frontend.get(&ids, get_options, on_feature, on_final);
        }
        Command::Bbox { filter, bbox } => {
            let bbox_options = BBoxOptions {
                properties,
                ..Default::default()
            };
            frontend.bbox_query(&filter, bbox, bbox_options, on_feature, on_final);
        }
    }

    frontend.run_until_idle()?;
    if let Some(Err(e)) = outcome.borrow_mut().take() {
        return Err(e);
    }

    let features = features.take();
    Ok(geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).and_then(|collection| Ok(serde_json::to_string_pretty(&collection)?)) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
