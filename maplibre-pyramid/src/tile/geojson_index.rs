//! Slicing of GeoJSON source data into tiles.

use rstar::{RTree, RTreeObject, AABB};

use crate::{
    coords::{LatLng, Projection, EXTENT, TILE_SIZE},
    error::ParseError,
    tile::{
        geometry_tile_data::{
            collect_geojson, CollectedFeature, FeatureType, GeoJsonTileData, GeometryTileData,
            GEOJSON_LAYER_NAME,
        },
        tile_id::CanonicalTileID,
    },
};

/// Default buffer around tiles in pixels of a 512 pixel tile.
pub const DEFAULT_BUFFER: u16 = 128;

type Point = [f64; 2];

/// A feature with its coordinates in the mercator plane of a world measuring 1 unit.
#[derive(Debug)]
struct WorldFeature {
    feature: CollectedFeature,
    envelope: AABB<Point>,
}

impl RTreeObject for WorldFeature {
    type Envelope = AABB<Point>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Indexes the features of a GeoJSON source and cuts tiles from them on demand.
///
/// Features are clipped to the tile plus its buffer, so lines and polygons crossing the tile
/// boundary render seamlessly.
pub struct GeoJsonIndex {
    tree: RTree<WorldFeature>,
    max_zoom: u8,
    /// Buffer in units of the world.
    buffer: f64,
}

impl GeoJsonIndex {
    pub fn parse(json: &str, max_zoom: u8, buffer: u16) -> Result<Self, ParseError> {
        let features = collect_geojson(json)?
            .into_iter()
            .filter_map(project_feature)
            .collect();
        Ok(Self {
            tree: RTree::bulk_load(features),
            max_zoom,
            buffer: buffer as f64 / TILE_SIZE,
        })
    }

    pub fn from_value(
        value: &serde_json::Value,
        max_zoom: u8,
        buffer: u16,
    ) -> Result<Self, ParseError> {
        Self::parse(&value.to_string(), max_zoom, buffer)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Features of the tile in tile units.
    #[tracing::instrument(skip(self))]
    pub fn get_tile(&self, id: &CanonicalTileID) -> GeometryTileData {
        let scale = (1u64 << id.z) as f64;
        let buffer = self.buffer;
        let min = [id.x as f64 - buffer, id.y as f64 - buffer];
        let max = [id.x as f64 + 1.0 + buffer, id.y as f64 + 1.0 + buffer];
        let query = AABB::from_corners(
            [min[0] / scale, min[1] / scale],
            [max[0] / scale, max[1] / scale],
        );

        let to_tile = |point: &Point| -> Point {
            [
                (point[0] * scale - id.x as f64) * EXTENT,
                (point[1] * scale - id.y as f64) * EXTENT,
            ]
        };
        let clip_min = [-buffer * EXTENT, -buffer * EXTENT];
        let clip_max = [(1.0 + buffer) * EXTENT, (1.0 + buffer) * EXTENT];

        let mut features = Vec::new();
        for world in self.tree.locate_in_envelope_intersecting(&query) {
            let feature = &world.feature;
            let lines: Vec<Vec<Point>> = feature
                .geometry
                .iter()
                .map(|line| line.iter().map(|(x, y)| to_tile(&[*x, *y])).collect())
                .collect();

            let clipped: Vec<Vec<Point>> = match feature.feature_type {
                Some(FeatureType::Polygon) => lines
                    .iter()
                    .map(|ring| clip_ring(ring, clip_min, clip_max))
                    .filter(|ring| ring.len() >= 4)
                    .collect(),
                Some(FeatureType::LineString) => lines
                    .iter()
                    .flat_map(|line| clip_line(line, clip_min, clip_max))
                    .collect(),
                _ => lines
                    .into_iter()
                    .filter(|points| points.iter().all(|point| inside(point, clip_min, clip_max)))
                    .collect(),
            };
            if clipped.is_empty() {
                continue;
            }

            let in_tile = CollectedFeature {
                feature_type: feature.feature_type,
                properties: feature.properties.clone(),
                geometry: clipped
                    .into_iter()
                    .map(|line| line.into_iter().map(|[x, y]| (x, y)).collect())
                    .collect(),
            };
            features.push(in_tile.to_tile_feature(|x, y| (x, y)));
        }

        log::debug!("cut {} GeoJSON features for tile {id}", features.len());
        GeometryTileData::GeoJson(GeoJsonTileData::from_features(
            GEOJSON_LAYER_NAME,
            features,
        ))
    }
}

fn project_feature(mut feature: CollectedFeature) -> Option<WorldFeature> {
    for line in &mut feature.geometry {
        for point in line.iter_mut() {
            let world = Projection::project_with_world_size(&LatLng::new(point.1, point.0), 1.0);
            *point = (world.x, world.y);
        }
    }

    let points: Vec<Point> = feature
        .geometry
        .iter()
        .flatten()
        .map(|(x, y)| [*x, *y])
        .collect();
    if points.is_empty() {
        return None;
    }
    Some(WorldFeature {
        envelope: AABB::from_points(points.iter()),
        feature,
    })
}

fn inside(point: &Point, min: Point, max: Point) -> bool {
    point[0] >= min[0] && point[0] <= max[0] && point[1] >= min[1] && point[1] <= max[1]
}

/// Clips a closed ring against the rectangle, edge by edge. The result is closed again.
fn clip_ring(ring: &[Point], min: Point, max: Point) -> Vec<Point> {
    let mut output: Vec<Point> = ring.to_vec();
    if output.first() == output.last() {
        output.pop();
    }

    for (axis, bound, keep_greater) in [
        (0, min[0], true),
        (0, max[0], false),
        (1, min[1], true),
        (1, max[1], false),
    ] {
        let input = std::mem::take(&mut output);
        let Some(&last) = input.last() else {
            break;
        };
        let is_inside = |p: &Point| {
            if keep_greater {
                p[axis] >= bound
            } else {
                p[axis] <= bound
            }
        };
        let intersect = |a: &Point, b: &Point| -> Point {
            let t = (bound - a[axis]) / (b[axis] - a[axis]);
            let mut point = [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t];
            point[axis] = bound;
            point
        };

        let mut previous = last;
        for current in input {
            match (is_inside(&current), is_inside(&previous)) {
                (true, true) => output.push(current),
                (true, false) => {
                    output.push(intersect(&previous, &current));
                    output.push(current);
                }
                (false, true) => output.push(intersect(&previous, &current)),
                (false, false) => {}
            }
            previous = current;
        }
    }

    if let Some(&first) = output.first() {
        output.push(first);
    }
    output
}

/// Clips a line against the rectangle. Parts leaving and entering the rectangle become separate
/// lines.
fn clip_line(line: &[Point], min: Point, max: Point) -> Vec<Vec<Point>> {
    let mut lines: Vec<Vec<Point>> = Vec::new();
    let mut current: Vec<Point> = Vec::new();

    for segment in line.windows(2) {
        match clip_segment(segment[0], segment[1], min, max) {
            Some((a, b)) => {
                if current.last() != Some(&a) {
                    if current.len() >= 2 {
                        lines.push(std::mem::take(&mut current));
                    }
                    current.clear();
                    current.push(a);
                }
                current.push(b);
            }
            None => {
                if current.len() >= 2 {
                    lines.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
    }
    if current.len() >= 2 {
        lines.push(current);
    }
    lines
}

/// Liang-Barsky clipping of one segment.
fn clip_segment(a: Point, b: Point, min: Point, max: Point) -> Option<(Point, Point)> {
    let delta = [b[0] - a[0], b[1] - a[1]];
    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;

    for axis in 0..2 {
        for (p, q) in [(-delta[axis], a[axis] - min[axis]), (delta[axis], max[axis] - a[axis])] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let t = q / p;
            if p < 0.0 {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
        }
    }

    if t0 > t1 {
        return None;
    }
    let at = |t: f64| [a[0] + delta[0] * t, a[1] + delta[1] * t];
    Some((at(t0), at(t1)))
}
