//! Computes the set of tiles covering a viewport, a bounding box or a geometry.

use std::collections::VecDeque;

use geo::CoordsIter;
use geo_types::{Coord, Geometry, LineString, Polygon};
use thiserror::Error;

use crate::{
    coords::{LatLng, LatLngBounds, Projection, ScreenCoordinate, TileCoordinate, LATITUDE_MAX, TILE_SIZE},
    render::transform_state::TransformState,
    style::source::SourceType,
    tile::{tile_cover_impl::ScanlineCover, tile_id::UnwrappedTileID},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TileCoverError {
    #[error("latitude {0} is outside of [-90, 90]")]
    InvalidLatitude(f64),
}

/// Edge of a triangle, oriented such that `y0 <= y1`.
#[derive(Copy, Clone, Debug)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    dx: f64,
    dy: f64,
}

impl Edge {
    fn new(mut a: TileCoordinate, mut b: TileCoordinate) -> Self {
        if a.y > b.y {
            std::mem::swap(&mut a, &mut b);
        }
        Self {
            x0: a.x,
            y0: a.y,
            x1: b.x,
            y1: b.y,
            dx: b.x - a.x,
            dy: b.y - a.y,
        }
    }
}

fn scan_spans<F>(mut e0: Edge, mut e1: Edge, ymin: i32, ymax: i32, scan_line: &mut F)
where
    F: FnMut(i32, i32, i32),
{
    let y0 = (ymin as f64).max(e1.y0.floor());
    let y1 = (ymax as f64).min(e1.y1.ceil());

    // Sort edges by x-coordinate
    let swap = if e0.x0 == e1.x0 && e0.y0 == e1.y0 {
        e0.x0 + e1.dy / e0.dy * e0.dx < e1.x1
    } else {
        e0.x1 - e1.dy / e0.dy * e0.dx < e1.x0
    };
    if swap {
        std::mem::swap(&mut e0, &mut e1);
    }

    let m0 = e0.dx / e0.dy;
    let m1 = e1.dx / e1.dy;
    // Use y + 1 to compute x0 or x1 respectively
    let d0 = if e0.dx > 0.0 { 1.0 } else { 0.0 };
    let d1 = if e1.dx < 0.0 { 1.0 } else { 0.0 };

    let mut y = y0 as i32;
    while (y as f64) < y1 {
        let x0 = m0 * (e0.dy.min(y as f64 + d0 - e0.y0)).max(0.0) + e0.x0;
        let x1 = m1 * (e1.dy.min(y as f64 + d1 - e1.y0)).max(0.0) + e1.x0;
        scan_line(x1.floor() as i32, x0.ceil() as i32, y);
        y += 1;
    }
}

fn scan_triangle<F>(
    a: TileCoordinate,
    b: TileCoordinate,
    c: TileCoordinate,
    ymin: i32,
    ymax: i32,
    scan_line: &mut F,
) where
    F: FnMut(i32, i32, i32),
{
    let mut ab = Edge::new(a, b);
    let mut bc = Edge::new(b, c);
    let mut ca = Edge::new(c, a);

    // Sort edges by y-length
    if ab.dy > bc.dy {
        std::mem::swap(&mut ab, &mut bc);
    }
    if ab.dy > ca.dy {
        std::mem::swap(&mut ab, &mut ca);
    }
    if bc.dy > ca.dy {
        std::mem::swap(&mut bc, &mut ca);
    }

    if ab.dy != 0.0 {
        scan_spans(ca, ab, ymin, ymax, scan_line);
    }
    if bc.dy != 0.0 {
        scan_spans(ca, bc, ymin, ymax, scan_line);
    }
}

/// Covers the quad `tl, tr, br, bl` given in tile units at zoom `z`. Tiles are sorted by their
/// distance to `center`.
fn tile_cover_quad(
    tl: TileCoordinate,
    tr: TileCoordinate,
    br: TileCoordinate,
    bl: TileCoordinate,
    center: TileCoordinate,
    z: u8,
) -> Vec<UnwrappedTileID> {
    struct Id {
        x: i32,
        y: i32,
        sq_dist: f64,
    }

    let tiles = 1i32 << z;
    let mut ids: Vec<Id> = Vec::new();

    let mut scan_line = |x0: i32, x1: i32, y: i32| {
        if y >= 0 && y <= tiles {
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - center.x;
                let dy = y as f64 + 0.5 - center.y;
                ids.push(Id {
                    x,
                    y,
                    sq_dist: dx * dx + dy * dy,
                });
            }
        }
    };

    // Divide the quad into two triangles and scan each of them:
    // \---+
    // | \ |
    // +---\.
    scan_triangle(tl, tr, br, 0, tiles, &mut scan_line);
    scan_triangle(br, bl, tl, 0, tiles, &mut scan_line);

    ids.sort_by(|a, b| {
        a.sq_dist
            .total_cmp(&b.sq_dist)
            .then(a.x.cmp(&b.x))
            .then(a.y.cmp(&b.y))
    });
    // Duplicates occur along the shared edge of both triangles
    ids.dedup_by(|a, b| a.x == b.x && a.y == b.y);

    ids.into_iter()
        .map(|id| UnwrappedTileID::from_zxy(z, id.x as i64, id.y as i64))
        .collect()
}

/// Whether `bounds` cover any area within the web mercator latitude range.
fn is_coverable(bounds: &LatLngBounds) -> bool {
    !(bounds.is_empty()
        || bounds.south() > LATITUDE_MAX
        || bounds.north() < -LATITUDE_MAX
        || bounds.south() == bounds.north()
        || bounds.west() == bounds.east())
}

fn clamp_to_mercator(bounds: &LatLngBounds) -> LatLngBounds {
    LatLngBounds::hull(
        LatLng::new(bounds.south().max(-LATITUDE_MAX), bounds.west()),
        LatLng::new(bounds.north().min(LATITUDE_MAX), bounds.east()),
    )
}

/// Tiles at zoom `z` covering `bounds`, nearest to the center of the bounds first.
pub fn tile_cover_bounds(bounds: &LatLngBounds, z: u8) -> Vec<UnwrappedTileID> {
    if !is_coverable(bounds) {
        return Vec::new();
    }
    let bounds = clamp_to_mercator(bounds);

    tile_cover_quad(
        Projection::project(&bounds.northwest(), z),
        Projection::project(&bounds.northeast(), z),
        Projection::project(&bounds.southeast(), z),
        Projection::project(&bounds.southwest(), z),
        Projection::project(&bounds.center(), z),
        z,
    )
}

/// Tiles at zoom `z` visible in the viewport of `state`, nearest to the center of the screen
/// first.
#[tracing::instrument(skip_all)]
pub fn tile_cover_transform(state: &TransformState, z: u8) -> Vec<UnwrappedTileID> {
    if !state.valid() {
        debug_assert!(false, "tile cover of a transform without size");
        return Vec::new();
    }

    let w = state.width();
    let h = state.height();
    let corner = |x: f64, y: f64| state.screen_coordinate_to_tile_coordinate(&ScreenCoordinate::new(x, y), z);

    match (
        corner(0.0, 0.0),
        corner(w, 0.0),
        corner(w, h),
        corner(0.0, h),
        corner(w / 2.0, h / 2.0),
    ) {
        (Some(tl), Some(tr), Some(br), Some(bl), Some(center)) => {
            tile_cover_quad(tl, tr, br, bl, center, z)
        }
        _ => Vec::new(),
    }
}

fn validate(geometry: &Geometry<f64>) -> Result<(), TileCoverError> {
    for coord in geometry.coords_iter() {
        if !(-90.0..=90.0).contains(&coord.y) {
            return Err(TileCoverError::InvalidLatitude(coord.y));
        }
    }
    Ok(())
}

/// Tiles at zoom `z` touched by `geometry` in row-major order. Coordinates are longitude/latitude.
pub fn tile_cover_geometry(
    geometry: &Geometry<f64>,
    z: u8,
) -> Result<Vec<UnwrappedTileID>, TileCoverError> {
    Ok(TileCover::from_geometry(geometry, z)?.collect())
}

/// Number of tiles [`tile_cover_bounds`] returns, computed without materializing them.
pub fn tile_count(bounds: &LatLngBounds, z: u8) -> u64 {
    if !is_coverable(bounds) {
        return 0;
    }

    let bounds = clamp_to_mercator(bounds);
    let sw = Projection::project(&bounds.southwest(), z);
    let ne = Projection::project(&bounds.northeast(), z);
    let max_tile = 1i64 << z;

    let x1 = sw.x.floor() as i64;
    let x2 = ne.x.ceil() as i64 - 1;
    let y1 = (sw.y.floor() as i64).clamp(0, max_tile - 1);
    let y2 = (ne.y.floor() as i64).clamp(0, max_tile - 1);

    let dx = if x1 > x2 {
        (max_tile - x1) + x2
    } else {
        x2 - x1
    };
    let dy = y1 - y2;
    ((dx + 1) * (dy + 1)) as u64
}

/// Number of tiles [`tile_cover_geometry`] returns.
pub fn tile_count_geometry(geometry: &Geometry<f64>, z: u8) -> Result<u64, TileCoverError> {
    Ok(TileCover::from_geometry(geometry, z)?.count() as u64)
}

/// Zoom level of the tiles needed to display `zoom` with tiles of `tile_size` pixels.
pub fn covering_zoom_level(zoom: f64, source_type: SourceType, tile_size: u16) -> i32 {
    let zoom = zoom + (TILE_SIZE / tile_size as f64).log2();
    match source_type {
        SourceType::Raster | SourceType::RasterDem => zoom.round() as i32,
        _ => zoom.floor() as i32,
    }
}

/// Streams the tiles covering bounds or a geometry row by row without collecting them first.
pub struct TileCover {
    zoom: u8,
    scanline: Option<ScanlineCover>,
    spans: VecDeque<(i32, i32, u32)>,
}

impl TileCover {
    pub fn from_bounds(bounds: &LatLngBounds, z: u8) -> Self {
        if !is_coverable(bounds) {
            return Self::empty(z);
        }
        let bounds = clamp_to_mercator(bounds);

        let coord = |position: LatLng| {
            let point = Projection::project(&position, z);
            Coord {
                x: point.x,
                y: point.y,
            }
        };
        let ring = LineString::new(vec![
            coord(bounds.southwest()),
            coord(bounds.northwest()),
            coord(bounds.northeast()),
            coord(bounds.southeast()),
            coord(bounds.southwest()),
        ]);
        let polygon = Geometry::Polygon(Polygon::new(ring, Vec::new()));

        Self {
            zoom: z,
            scanline: Some(ScanlineCover::new(z, &polygon, false)),
            spans: VecDeque::new(),
        }
    }

    pub fn from_geometry(geometry: &Geometry<f64>, z: u8) -> Result<Self, TileCoverError> {
        validate(geometry)?;
        Ok(Self {
            zoom: z,
            scanline: Some(ScanlineCover::new(z, geometry, true)),
            spans: VecDeque::new(),
        })
    }

    fn empty(z: u8) -> Self {
        Self {
            zoom: z,
            scanline: None,
            spans: VecDeque::new(),
        }
    }

    pub fn has_next(&self) -> bool {
        self.spans.iter().any(|(x0, x1, _)| x0 < x1)
            || self
                .scanline
                .as_ref()
                .map(|scanline| scanline.has_next())
                .unwrap_or(false)
    }
}

impl Iterator for TileCover {
    type Item = UnwrappedTileID;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((x0, x1, y)) = self.spans.front_mut() {
                if *x0 < *x1 {
                    let x = *x0;
                    *x0 += 1;
                    return Some(UnwrappedTileID::from_zxy(self.zoom, x as i64, *y as i64));
                }
                self.spans.pop_front();
                continue;
            }

            let scanline = self.scanline.as_mut()?;
            if !scanline.has_next() {
                return None;
            }
            let spans = &mut self.spans;
            scanline.scan_row(|x0, x1, y| spans.push_back((x0, x1, y)));
        }
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{
        line_string, point, polygon, Geometry, MultiLineString, MultiPoint, MultiPolygon, Polygon,
    };

    use crate::{
        coords::{LatLng, LatLngBounds},
        render::transform_state::{CameraOptions, TransformState},
        style::source::SourceType,
        tile::{
            tile_cover::{
                covering_zoom_level, tile_count, tile_count_geometry, tile_cover_bounds,
                tile_cover_geometry, tile_cover_transform, TileCover, TileCoverError,
            },
            tile_id::UnwrappedTileID,
        },
    };

    fn ids(list: &[(u8, i64, i64)]) -> Vec<UnwrappedTileID> {
        list.iter()
            .map(|(z, x, y)| UnwrappedTileID::from_zxy(*z, *x, *y))
            .collect()
    }

    fn sorted(mut list: Vec<UnwrappedTileID>) -> Vec<UnwrappedTileID> {
        list.sort();
        list
    }

    fn san_francisco() -> LatLngBounds {
        LatLngBounds::hull(LatLng::new(37.6609, -122.5744), LatLng::new(37.8271, -122.3204))
    }

    fn san_francisco_wrapped() -> LatLngBounds {
        LatLngBounds::hull(LatLng::new(37.6609, 238.5744), LatLng::new(37.8271, 238.3204))
    }

    #[test]
    fn empty() {
        assert!(tile_cover_bounds(&LatLngBounds::empty(), 0).is_empty());
        assert_eq!(tile_count(&LatLngBounds::empty(), 0), 0);
    }

    #[test]
    fn arctic_and_antarctic() {
        let arctic = LatLngBounds::hull(LatLng::new(86.0, -180.0), LatLng::new(90.0, 180.0));
        assert!(tile_cover_bounds(&arctic, 0).is_empty());
        let antarctic = LatLngBounds::hull(LatLng::new(-86.0, -180.0), LatLng::new(-90.0, 180.0));
        assert!(tile_cover_bounds(&antarctic, 0).is_empty());
        assert_eq!(tile_count(&antarctic, 3), 0);
    }

    #[test]
    fn world() {
        assert_eq!(tile_cover_bounds(&LatLngBounds::world(), 0), ids(&[(0, 0, 0)]));
        assert_eq!(
            sorted(tile_cover_bounds(&LatLngBounds::world(), 1)),
            ids(&[(1, 0, 0), (1, 0, 1), (1, 1, 0), (1, 1, 1)])
        );
        assert_eq!(tile_count(&LatLngBounds::world(), 0), 1);
        assert_eq!(tile_count(&LatLngBounds::world(), 1), 4);
    }

    #[test]
    fn singleton() {
        let singleton = LatLngBounds::singleton(LatLng::new(0.0, 0.0));
        assert!(tile_cover_bounds(&singleton, 0).is_empty());
        assert!(tile_cover_bounds(&singleton, 1).is_empty());
    }

    #[test]
    fn san_francisco_bounds() {
        assert_eq!(tile_cover_bounds(&san_francisco(), 0), ids(&[(0, 0, 0)]));
        assert_eq!(
            sorted(tile_cover_bounds(&san_francisco(), 10)),
            ids(&[(10, 163, 395), (10, 163, 396), (10, 164, 395), (10, 164, 396)])
        );
        assert_eq!(tile_count(&san_francisco(), 10), 4);
        assert_eq!(tile_count(&san_francisco(), 22), 7254450);
    }

    #[test]
    fn san_francisco_wrapped_bounds() {
        assert_eq!(
            tile_cover_bounds(&san_francisco_wrapped(), 0),
            vec![UnwrappedTileID::from_zxy(0, 1, 0)]
        );
        assert_eq!(tile_cover_bounds(&san_francisco_wrapped(), 0)[0].wrap, 1);
        assert_eq!(tile_count(&san_francisco_wrapped(), 10), 4);
    }

    #[test]
    fn crossing_antimeridian() {
        let crossing = LatLngBounds::hull(LatLng::new(-20.9615, -214.309), LatLng::new(19.477, -155.830));
        // The single tile at z0 is covered once per world copy.
        assert_eq!(tile_count(&crossing, 0), 2);
        assert_eq!(tile_cover_bounds(&crossing, 0).len(), 2);
        assert_eq!(tile_count(&crossing, 3), 4);
        assert_eq!(tile_count(&crossing, 4), 8);
        assert_eq!(tile_cover_bounds(&crossing, 4).len(), 8);
        assert!(tile_cover_bounds(&crossing, 4).iter().any(|id| id.wrap == -1));
    }

    #[test]
    fn cover_size_matches_count() {
        let bounds = [
            LatLngBounds::world(),
            san_francisco(),
            san_francisco_wrapped(),
            LatLngBounds::hull(LatLng::new(-20.9615, -214.309), LatLng::new(19.477, -155.830)),
            LatLngBounds::hull(LatLng::new(40.1, -74.3), LatLng::new(41.2, -73.1)),
        ];
        for bounds in &bounds {
            for z in 0..=12 {
                let cover = tile_cover_bounds(bounds, z);
                assert_eq!(cover.len() as u64, tile_count(bounds, z), "{bounds:?} at z{z}");

                let mut deduped = cover.clone();
                deduped.sort();
                deduped.dedup();
                assert_eq!(deduped.len(), cover.len());
            }
        }
    }

    #[test]
    fn ordered_by_distance_to_center() {
        let bounds = LatLngBounds::hull(LatLng::new(40.1, -74.3), LatLng::new(41.2, -73.1));
        let cover = tile_cover_bounds(&bounds, 9);
        let center = crate::coords::Projection::project(&bounds.center(), 9);
        let distances: Vec<f64> = cover
            .iter()
            .map(|id| {
                let dx = id.unwrapped_x() as f64 + 0.5 - center.x;
                let dy = id.canonical.y as f64 + 0.5 - center.y;
                dx * dx + dy * dy
            })
            .collect();
        assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn streams_row_major() {
        let streamed: Vec<UnwrappedTileID> = TileCover::from_bounds(&LatLngBounds::world(), 1).collect();
        assert_eq!(
            streamed,
            ids(&[(1, 0, 0), (1, 1, 0), (1, 0, 1), (1, 1, 1)])
        );
        assert_eq!(TileCover::from_bounds(&LatLngBounds::empty(), 3).count(), 0);
        assert_eq!(TileCover::from_bounds(&san_francisco(), 10).count(), 4);
    }

    #[test]
    fn streams_same_tiles_as_cover() {
        let arctic = LatLngBounds::hull(LatLng::new(84.0, -180.0), LatLng::new(70.0, 180.0));
        let mut streamed: Vec<UnwrappedTileID> = TileCover::from_bounds(&arctic, 3).collect();
        let mut covered = tile_cover_bounds(&arctic, 3);
        assert_eq!(streamed.len(), covered.len());
        streamed.sort();
        covered.sort();
        assert_eq!(streamed, covered);
    }

    #[test]
    fn geometry_point() {
        let point = Geometry::Point(point!(x: -122.5744, y: 37.6609));
        assert_eq!(tile_cover_geometry(&point, 2).unwrap(), ids(&[(2, 0, 1)]));
    }

    #[test]
    fn geometry_multi_point() {
        let points = Geometry::MultiPoint(MultiPoint::from(vec![(-122.5, 37.76), (-122.4, 37.76)]));
        assert_eq!(
            tile_cover_geometry(&points, 20).unwrap(),
            ids(&[(20, 167480, 405351), (20, 167772, 405351)])
        );
    }

    #[test]
    fn geometry_line() {
        let line = Geometry::LineString(line_string![
            (x: -121.49368286132812, y: 38.57903714667459),
            (x: -122.4422836303711, y: 37.773157169570695)
        ]);
        assert_eq!(
            tile_cover_geometry(&line, 10).unwrap(),
            ids(&[
                (10, 166, 392),
                (10, 165, 393),
                (10, 166, 393),
                (10, 164, 394),
                (10, 165, 394),
                (10, 163, 395),
                (10, 164, 395),
            ])
        );
    }

    #[test]
    fn geometry_wrapped_line() {
        let line = Geometry::LineString(line_string![
            (x: -179.93342914581299, y: 38.892101707724315),
            (x: -180.02394485473633, y: 38.89203490311832)
        ]);
        assert_eq!(
            tile_cover_geometry(&line, 10).unwrap(),
            ids(&[(10, -1, 391), (10, 0, 391)])
        );

        let line = Geometry::LineString(line_string![
            (x: 179.93342914581299, y: 38.892101707724315),
            (x: 180.02394485473633, y: 38.89203490311832)
        ]);
        assert_eq!(
            tile_cover_geometry(&line, 10).unwrap(),
            ids(&[(10, 1023, 391), (10, 1024, 391)])
        );
    }

    #[test]
    fn geometry_multi_line() {
        let lines = Geometry::MultiLineString(MultiLineString::new(vec![
            line_string![(x: -122.5, y: 37.76), (x: -122.4, y: 37.76)],
            line_string![(x: -122.5, y: 37.72), (x: -122.4, y: 37.72)],
        ]));
        let mut expected = Vec::new();
        for y in [6333, 6335] {
            for x in 2616..=2621 {
                expected.push((14, x, y));
            }
        }
        assert_eq!(tile_cover_geometry(&lines, 14).unwrap(), ids(&expected));
    }

    #[test]
    fn geometry_open_polygon() {
        let polygon = Geometry::Polygon(polygon![
            (x: 1.0, y: 34.2),
            (x: 1.0, y: 34.4),
            (x: 0.5, y: 34.3),
        ]);
        assert_eq!(
            tile_cover_geometry(&polygon, 10).unwrap(),
            ids(&[(10, 513, 407), (10, 514, 407), (10, 513, 408), (10, 514, 408)])
        );
    }

    fn europe_with_hole() -> Polygon<f64> {
        polygon!(
            exterior: [
                (x: 5.09765625, y: 53.067626642387374),
                (x: 2.373046875, y: 43.389081939117496),
                (x: -4.74609375, y: 48.45835188280866),
                (x: -1.494140625, y: 37.09023980307208),
                (x: 22.587890625, y: 36.24427318493909),
                (x: 31.640625, y: 46.13417004624326),
                (x: 17.841796875, y: 54.7246201949245),
                (x: 5.09765625, y: 53.067626642387374),
            ],
            interiors: [[
                (x: 19.6875, y: 49.66762782262194),
                (x: 22.8515625, y: 43.51668853502906),
                (x: 13.623046875, y: 45.089035564831036),
                (x: 16.34765625, y: 39.095962936305476),
                (x: 5.185546875, y: 41.244772343082076),
                (x: 8.701171874999998, y: 50.233151832472245),
                (x: 19.6875, y: 49.66762782262194),
            ]],
        )
    }

    #[test]
    fn geometry_polygon_with_hole() {
        let polygon = Geometry::Polygon(europe_with_hole());
        let cover = tile_cover_geometry(&polygon, 8).unwrap();
        let contains = |x: i64, y: i64| cover.contains(&UnwrappedTileID::from_zxy(8, x, y));
        assert!(contains(134, 87));
        assert!(contains(139, 87));
        assert!(!contains(136, 87));
        assert_eq!(cover.len() as u64, tile_count_geometry(&polygon, 8).unwrap());
    }

    #[test]
    fn geometry_multi_polygon() {
        let (exterior, _) = europe_with_hole().into_inner();
        let multi_polygon = Geometry::MultiPolygon(MultiPolygon::new(vec![
            Polygon::new(exterior, Vec::new()),
            polygon![
                (x: 59.150390625, y: 45.460130637921004),
                (x: 65.126953125, y: 41.11246878918088),
                (x: 69.169921875, y: 47.45780853075031),
                (x: 63.896484375, y: 50.064191736659104),
                (x: 59.150390625, y: 45.460130637921004),
            ],
        ]));
        let cover = tile_cover_geometry(&multi_polygon, 8).unwrap();
        let contains = |x: i64, y: i64| cover.contains(&UnwrappedTileID::from_zxy(8, x, y));
        assert!(contains(139, 87));
        assert!(contains(136, 87));
        assert!(contains(174, 94));
    }

    #[test]
    fn geometry_san_francisco_polygon() {
        let polygon = Geometry::Polygon(polygon![
            (x: -122.5143814086914, y: 37.779127216982424),
            (x: -122.50811576843262, y: 37.72721239056709),
            (x: -122.50313758850099, y: 37.70820178063929),
            (x: -122.3938751220703, y: 37.707454835665274),
            (x: -122.37567901611328, y: 37.70663997801684),
            (x: -122.36297607421874, y: 37.71343018466285),
            (x: -122.354736328125, y: 37.727280276860036),
            (x: -122.36469268798828, y: 37.73868429065797),
            (x: -122.38014221191408, y: 37.75442980295571),
            (x: -122.38391876220702, y: 37.78753873820529),
            (x: -122.35919952392578, y: 37.8065289741725),
            (x: -122.35679626464844, y: 37.820632846207864),
            (x: -122.3712158203125, y: 37.835276322922695),
            (x: -122.3818588256836, y: 37.82958198283902),
            (x: -122.37190246582031, y: 37.80788523279169),
            (x: -122.38735198974608, y: 37.791337175930686),
            (x: -122.40966796874999, y: 37.812767557570204),
            (x: -122.46425628662108, y: 37.807071480609274),
            (x: -122.46803283691405, y: 37.810326435534755),
            (x: -122.47901916503906, y: 37.81168262440736),
            (x: -122.48966217041016, y: 37.78916666399649),
            (x: -122.50579833984375, y: 37.78781006166096),
            (x: -122.5143814086914, y: 37.779127216982424),
        ]);
        assert_eq!(
            tile_cover_geometry(&polygon, 12).unwrap(),
            ids(&[
                (12, 654, 1582),
                (12, 655, 1582),
                (12, 654, 1583),
                (12, 655, 1583),
                (12, 654, 1584),
                (12, 655, 1584),
            ])
        );
    }

    #[test]
    fn geometry_invalid_latitude() {
        let point = Geometry::Point(point!(x: -122.5744, y: 97.6609));
        assert_eq!(
            tile_cover_geometry(&point, 2),
            Err(TileCoverError::InvalidLatitude(97.6609))
        );

        let single_point_ring = Geometry::Polygon(polygon![(x: 1.0, y: 35.0)]);
        assert!(tile_cover_geometry(&single_point_ring, 16).unwrap().is_empty());
    }

    #[test]
    fn transform() {
        let mut state = TransformState::new(512.0, 512.0);
        state.jump_to(
            &CameraOptions::default()
                .with_center(LatLng::new(37.8, -122.5))
                .with_zoom(10.0),
        );
        assert_eq!(
            sorted(tile_cover_transform(&state, 10)),
            ids(&[(10, 163, 395), (10, 163, 396), (10, 164, 395), (10, 164, 396)])
        );
    }

    #[test]
    fn transform_pitched() {
        let mut state = TransformState::new(512.0, 512.0);
        state.jump_to(
            &CameraOptions::default()
                .with_center(LatLng::new(0.1, -0.1))
                .with_zoom(2.0)
                .with_bearing(5.0),
        );
        let flat = tile_cover_transform(&state, 2);

        state.jump_to(&CameraOptions::default().with_pitch(40.0));
        let pitched = tile_cover_transform(&state, 2);

        let center = UnwrappedTileID::from_zxy(2, 1, 1);
        assert_eq!(flat.first(), Some(&center));
        assert!(pitched.contains(&center));
        assert!(pitched.len() >= flat.len());

        let mut deduped = pitched.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), pitched.len());
    }

    #[test]
    fn covering_zoom() {
        assert_eq!(covering_zoom_level(1.3, SourceType::Vector, 512), 1);
        assert_eq!(covering_zoom_level(1.3, SourceType::Vector, 256), 2);
        assert_eq!(covering_zoom_level(1.6, SourceType::Raster, 512), 2);
        assert_eq!(covering_zoom_level(1.3, SourceType::Raster, 256), 2);
        assert_eq!(covering_zoom_level(0.2, SourceType::Vector, 1024), -1);
    }
}
