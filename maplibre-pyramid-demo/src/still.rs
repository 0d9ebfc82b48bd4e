use std::sync::Arc;

use maplibre_pyramid::{
    coords::LatLng,
    error::Error,
    io::source_client::HttpFileSource,
    map::Map,
    observer::LogObserver,
    options::{MapMode, MapOptions},
    platform::{build_runtime, http_client::ReqwestHttpClient, scheduler::TokioScheduler},
    render::transform_state::CameraOptions,
    style::Style,
};

pub fn run_still(
    style_path: &str,
    center: Option<LatLng>,
    zoom: Option<f64>,
    width: u32,
    height: u32,
    cache_path: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let style = Style::from_json(&std::fs::read_to_string(style_path)?)?;

    let runtime = build_runtime()?;
    let file_source = HttpFileSource::new(
        ReqwestHttpClient::new(cache_path),
        runtime.handle().clone(),
        TokioScheduler::DEFAULT_POOL_SIZE,
    );
    let mut map = Map::new(
        MapOptions::default().with_map_mode(MapMode::Static),
        Arc::new(file_source),
        Arc::new(TokioScheduler::new(runtime.handle().clone())),
        Arc::new(LogObserver),
    );
    map.set_size(width as f64, height as f64);
    map.set_style(style)?;
    map.jump_to(&CameraOptions {
        center,
        zoom,
        ..CameraOptions::default()
    });

    let mut result: Option<Error> = None;
    map.render_still(|error| result = error);
    if let Some(error) = result {
        return Err(error.into());
    }

    let mut labels = 0;
    let mut placed = 0;
    for source in map.sources() {
        println!("source {}", source.id());
        for (position, tile) in source.pyramid().rendered_tiles() {
            println!("  {position} ({} buckets)", tile.buckets().len());
            for bucket in tile.buckets().values().filter_map(|bucket| bucket.as_symbol()) {
                for instance in &bucket.instances {
                    labels += 1;
                    let is_placed = map
                        .placement()
                        .and_then(|placement| placement.placement(&instance.cross_tile_id))
                        .map_or(false, |placement| placement.placed());
                    if is_placed {
                        placed += 1;
                    }
                }
            }
        }
    }
    println!("{placed} of {labels} labels placed");
    Ok(())
}
