//! Anchor points of symbols.

use lyon::geom::euclid::Point2D;

use crate::{
    coords::{TileSpace, EXTENT},
    tile::geometry_tile_data::{
        classify_rings, FeatureType, GeometryCoordinates, GeometryTileFeature,
    },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub point: Point2D<f64, TileSpace>,
    /// Index of the line segment starting before the anchor, for anchors on lines.
    pub segment: Option<usize>,
}

impl Anchor {
    pub fn is_inside_tile(&self) -> bool {
        (0.0..EXTENT).contains(&self.point.x) && (0.0..EXTENT).contains(&self.point.y)
    }
}

fn point(p: &Point2D<i16, TileSpace>) -> Point2D<f64, TileSpace> {
    Point2D::new(p.x as f64, p.y as f64)
}

pub fn line_length(line: &GeometryCoordinates) -> f64 {
    line.windows(2)
        .map(|segment| point(&segment[0]).distance_to(point(&segment[1])))
        .sum()
}

/// Point halfway along `line`.
pub fn line_midpoint(line: &GeometryCoordinates) -> Option<Anchor> {
    let half = line_length(line) / 2.0;
    let mut travelled = 0.0;
    for (index, segment) in line.windows(2).enumerate() {
        let (a, b) = (point(&segment[0]), point(&segment[1]));
        let length = a.distance_to(b);
        if length > 0.0 && travelled + length >= half {
            let t = (half - travelled) / length;
            return Some(Anchor {
                point: a.lerp(b, t),
                segment: Some(index),
            });
        }
        travelled += length;
    }
    None
}

/// Area weighted centroid of a ring. Degenerate rings use the average of their vertices.
pub fn ring_centroid(ring: &GeometryCoordinates) -> Option<Point2D<f64, TileSpace>> {
    if ring.is_empty() {
        return None;
    }

    let mut area = 0.0;
    let (mut cx, mut cy) = (0.0, 0.0);
    for segment in ring.windows(2) {
        let (a, b) = (point(&segment[0]), point(&segment[1]));
        let cross = a.x * b.y - b.x * a.y;
        area += cross;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }

    if area.abs() < f64::EPSILON {
        let count = ring.len() as f64;
        let (sx, sy) = ring
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
        return Some(Point2D::new(sx / count, sy / count));
    }
    Some(Point2D::new(cx / (3.0 * area), cy / (3.0 * area)))
}

/// Anchors of a feature: every point of point features, the midpoint of each line and the
/// centroid of the outer ring of each polygon.
pub fn get_anchors(feature: &GeometryTileFeature) -> Vec<(Anchor, Option<GeometryCoordinates>)> {
    match feature.feature_type {
        FeatureType::Point => feature
            .geometry
            .iter()
            .flatten()
            .map(|p| {
                (
                    Anchor {
                        point: point(p),
                        segment: None,
                    },
                    None,
                )
            })
            .collect(),
        FeatureType::LineString => feature
            .geometry
            .iter()
            .filter_map(|line| line_midpoint(line).map(|anchor| (anchor, Some(line.clone()))))
            .collect(),
        FeatureType::Polygon => classify_rings(&feature.geometry)
            .iter()
            .filter_map(|polygon| polygon.first())
            .filter_map(ring_centroid)
            .map(|centroid| {
                (
                    Anchor {
                        point: centroid,
                        segment: None,
                    },
                    None,
                )
            })
            .collect(),
        FeatureType::Unknown => Vec::new(),
    }
}
