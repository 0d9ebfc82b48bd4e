use maplibre_pyramid::{
    coords::LatLngBounds,
    offline::{OfflineRegionDefinition, OfflineRegionError, OfflineTilePyramidRegionDefinition},
    style::source::{SourceType, ZoomRange},
    tile::tile_cover::{tile_count, tile_cover_bounds},
};

pub fn run_cover(bounds: &LatLngBounds, zoom: u8) {
    let tiles = tile_cover_bounds(bounds, zoom);
    for tile in &tiles {
        println!("{tile}");
    }
    log::info!(
        "{} tiles at zoom {zoom}, {} counted",
        tiles.len(),
        tile_count(bounds, zoom)
    );
}

pub fn run_offline(
    bounds: LatLngBounds,
    min_zoom: f64,
    max_zoom: f64,
    source_type: SourceType,
    tile_size: u16,
    source_zoom: ZoomRange,
    list: bool,
) -> Result<(), OfflineRegionError> {
    let region: OfflineRegionDefinition =
        OfflineTilePyramidRegionDefinition::new("", bounds, min_zoom, max_zoom, 1.0, false)?.into();

    match region.covering_zoom_range(source_type, tile_size, source_zoom) {
        Some(range) => log::info!("tiles from zoom {} to {}", range.min, range.max),
        None => log::info!("the source has no tiles at these zoom levels"),
    }

    if list {
        for tile in region.tile_cover(source_type, tile_size, source_zoom)? {
            println!("{tile}");
        }
    }
    println!(
        "{}",
        region.tile_count(source_type, tile_size, source_zoom)?
    );
    Ok(())
}
