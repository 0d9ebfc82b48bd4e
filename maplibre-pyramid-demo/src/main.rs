use clap::{Parser, Subcommand, ValueEnum};
use maplibre_pyramid::{
    coords::{LatLng, LatLngBounds},
    style::source::{SourceType, ZoomRange},
};

mod cover;
mod still;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Vector,
    Raster,
}

impl From<SourceKind> for SourceType {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Vector => SourceType::Vector,
            SourceKind::Raster => SourceType::Raster,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the tiles covering a bounding box at one zoom level.
    Cover {
        #[arg(long)]
        zoom: u8,
        /// South-west corner as "lat,lng".
        #[arg(value_parser = parse_lat_lng)]
        min: LatLng,
        /// North-east corner as "lat,lng".
        #[arg(value_parser = parse_lat_lng)]
        max: LatLng,
    },
    /// Counts the tiles of an offline region.
    Offline {
        #[arg(long, default_value_t = 0.0)]
        min_zoom: f64,
        #[arg(long, default_value_t = 10.0)]
        max_zoom: f64,
        #[arg(long, default_value_t = 512)]
        tile_size: u16,
        #[arg(long, value_enum, default_value_t = SourceKind::Vector)]
        source_type: SourceKind,
        /// Zoom levels the source provides tiles for, as "min,max".
        #[arg(long, value_parser = parse_zoom_range, default_value = "0,22")]
        source_zoom: ZoomRange,
        /// Lists every tile instead of only counting them.
        #[arg(long)]
        list: bool,
        #[arg(value_parser = parse_lat_lng)]
        min: LatLng,
        #[arg(value_parser = parse_lat_lng)]
        max: LatLng,
    },
    /// Loads a style and reports the tiles and labels of one viewport.
    Still {
        /// Path to a style JSON file.
        style: String,
        #[arg(long, value_parser = parse_lat_lng)]
        center: Option<LatLng>,
        #[arg(long)]
        zoom: Option<f64>,
        #[arg(long, default_value_t = 512)]
        width: u32,
        #[arg(long, default_value_t = 512)]
        height: u32,
        /// Directory of the HTTP cache.
        #[arg(long)]
        cache_path: Option<String>,
    },
}

fn parse_pair(input: &str) -> Result<(f64, f64), String> {
    let (a, b) = input
        .split_once(',')
        .ok_or_else(|| format!("expected two comma separated numbers, got {input}"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("{value}: {e}"))
    };
    Ok((parse(a)?, parse(b)?))
}

fn parse_lat_lng(input: &str) -> Result<LatLng, String> {
    let (latitude, longitude) = parse_pair(input)?;
    Ok(LatLng::new(latitude, longitude))
}

fn parse_zoom_range(input: &str) -> Result<ZoomRange, String> {
    let (min, max) = parse_pair(input)?;
    Ok(ZoomRange::new(min as u8, max as u8))
}

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();

    match cli.command {
        Commands::Cover { zoom, min, max } => {
            cover::run_cover(&LatLngBounds::hull(min, max), zoom);
        }
        Commands::Offline {
            min_zoom,
            max_zoom,
            tile_size,
            source_type,
            source_zoom,
            list,
            min,
            max,
        } => {
            if let Err(error) = cover::run_offline(
                LatLngBounds::hull(min, max),
                min_zoom,
                max_zoom,
                source_type.into(),
                tile_size,
                source_zoom,
                list,
            ) {
                eprintln!("{error}");
                std::process::exit(1);
            }
        }
        Commands::Still {
            style,
            center,
            zoom,
            width,
            height,
            cache_path,
        } => {
            if let Err(error) = still::run_still(&style, center, zoom, width, height, cache_path) {
                eprintln!("{error}");
                std::process::exit(1);
            }
        }
    }
}
