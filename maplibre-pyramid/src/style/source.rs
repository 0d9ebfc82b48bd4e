//! Sources of tiled and untiled map data.

use serde::{Deserialize, Serialize};

use crate::coords::{LatLng, LatLngBounds, TILE_SIZE};

/// String url to a tile. May contain place holders like `{z}`, `{x}` and `{y}`.
pub type TileUrl = String;

/// Tiles can be positioned using either the xyz coordinates or the TMS (Tile Map Service) protocol.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileAddressingScheme {
    #[serde(rename = "xyz")]
    #[default]
    XYZ,
    #[serde(rename = "tms")]
    TMS,
}

/// Kind of a source, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Vector,
    Raster,
    RasterDem,
    GeoJson,
}

/// How elevations are packed into the color channels of a DEM tile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DemEncoding {
    #[default]
    Mapbox,
    Terrarium,
}

/// Inclusive range of zoom levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    pub min: u8,
    pub max: u8,
}

impl ZoomRange {
    pub fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, z: u8) -> bool {
        z >= self.min && z <= self.max
    }
}

/// Source properties for vector, raster and raster-dem tiles.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TileSetSource {
    /// String which contains attribution information for the used tiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    /// The bounds in which tiles are available as `[west, south, east, north]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,
    /// Max zoom level at which tiles are available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    /// Min zoom level at which tiles are available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(default)]
    pub scheme: TileAddressingScheme,
    /// Array of URLs which can contain place holders like {x}, {y}, {z}.
    #[serde(default)]
    pub tiles: Vec<TileUrl>,
    #[serde(rename = "tileSize")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u16>,
    /// Only used by raster-dem sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<DemEncoding>,
}

/// GeoJSON data, either an inline JSON value or a URL pointing to a GeoJSON file.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum GeoJsonData {
    Url(String),
    Inline(serde_json::Value),
}

/// Source properties for a GeoJSON source.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GeoJsonSource {
    pub data: GeoJsonData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    /// Size of the tile buffer on each side, in pixels of a 512px tile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<u16>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum Source {
    #[serde(rename = "vector")]
    Vector(TileSetSource),
    #[serde(rename = "raster")]
    Raster(TileSetSource),
    #[serde(rename = "raster-dem")]
    RasterDem(TileSetSource),
    #[serde(rename = "geojson")]
    GeoJson(GeoJsonSource),
}

pub const DEFAULT_MAX_ZOOM: u8 = 22;
pub const DEFAULT_GEOJSON_MAX_ZOOM: u8 = 18;

impl Source {
    pub fn source_type(&self) -> SourceType {
        match self {
            Source::Vector(_) => SourceType::Vector,
            Source::Raster(_) => SourceType::Raster,
            Source::RasterDem(_) => SourceType::RasterDem,
            Source::GeoJson(_) => SourceType::GeoJson,
        }
    }

    pub fn tile_set(&self) -> Option<&TileSetSource> {
        match self {
            Source::Vector(tile_set) | Source::Raster(tile_set) | Source::RasterDem(tile_set) => {
                Some(tile_set)
            }
            Source::GeoJson(_) => None,
        }
    }

    /// Size of a tile in pixels. Vector and GeoJSON tiles always measure 512 pixels.
    pub fn tile_size(&self) -> u16 {
        match self {
            Source::Raster(tile_set) | Source::RasterDem(tile_set) => {
                tile_set.tile_size.unwrap_or(TILE_SIZE as u16)
            }
            Source::Vector(_) | Source::GeoJson(_) => TILE_SIZE as u16,
        }
    }

    pub fn zoom_range(&self) -> ZoomRange {
        let (min, max, default_max) = match self {
            Source::Vector(tile_set) | Source::Raster(tile_set) | Source::RasterDem(tile_set) => {
                (tile_set.minzoom, tile_set.maxzoom, DEFAULT_MAX_ZOOM)
            }
            Source::GeoJson(geojson) => (geojson.minzoom, geojson.maxzoom, DEFAULT_GEOJSON_MAX_ZOOM),
        };
        let max = max.unwrap_or(default_max);
        ZoomRange::new(min.unwrap_or(0).min(max), max)
    }

    /// Geographic bounds outside of which the source has no tiles.
    pub fn bounds(&self) -> Option<LatLngBounds> {
        let [west, south, east, north] = self.tile_set()?.bounds?;
        Some(LatLngBounds::hull(
            LatLng::new(south, west),
            LatLng::new(north, east),
        ))
    }
}
