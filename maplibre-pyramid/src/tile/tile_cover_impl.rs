//! Scanline rasterization of geometries into tile rows.
//!
//! Every ring or line is split into monotonic "bounds" which are stored in an edge table keyed by
//! the first row they touch. Rows are then scanned top to bottom while maintaining the set of
//! active bounds. Polygons are filled with the non-zero winding rule.

use std::collections::{BTreeMap, VecDeque};

use geo_types::{Coord, Geometry, LineString, Polygon};

use crate::coords::{LatLng, Projection, TileCoordinate};

/// A y-monotonic chain of points.
#[derive(Clone, Debug, Default)]
pub(crate) struct Bound {
    points: Vec<TileCoordinate>,
    current_point_index: usize,
    winding: bool,
}

impl Bound {
    fn interpolate(&self, y: u32) -> f64 {
        let y = y as f64;
        let p0 = &self.points[self.current_point_index];
        let p1 = &self.points[self.current_point_index + 1];

        let dx = p1.x - p0.x;
        let dy = p1.y - p0.y;
        if dx == 0.0 {
            return p0.x;
        } else if dy == 0.0 {
            return if y <= p0.y { p0.x } else { p1.x };
        }
        if y < p0.y {
            return p0.x;
        }
        if y > p1.y {
            return p1.x;
        }
        (dx / dy) * (y - p0.y) + p0.x
    }
}

pub(crate) type EdgeTable = BTreeMap<u32, Vec<Bound>>;

/// Columns `[x0, x1)` crossed by one bound in one row.
#[derive(Copy, Clone, Debug)]
struct TileCoverRange {
    x0: i32,
    x1: i32,
    winding: bool,
}

/// Rotates a closed ring so that it starts at a local minimum.
fn start_list_on_local_minimum(points: &mut Vec<TileCoordinate>) {
    let n = points.len();
    debug_assert!(n > 2);

    let mut prev = n - 2;
    let mut pt = 0;
    let mut next = 1;
    while pt < n {
        if points[pt].y <= points[prev].y && points[pt].y < points[next].y {
            break;
        }
        prev = pt;
        pt += 1;
        next += 1;
        if next == n {
            next = 1;
        }
    }

    // Re-close the ring
    points.pop();
    let len = points.len();
    points.rotate_left(pt % len);
    points.push(points[0]);
}

fn create_bound_towards_maximum(points: &[TileCoordinate], pt: &mut usize) -> Bound {
    let n = points.len();
    if n - *pt < 2 {
        return Bound::default();
    }
    if n - *pt == 2 {
        let mut points = points[*pt..].to_vec();
        if points[0].y > points[1].y {
            points.reverse();
        }
        *pt = n;
        return Bound {
            points,
            ..Bound::default()
        };
    }

    let begin = *pt;
    let mut prev = if *pt == 0 { n - 2 } else { *pt - 1 };
    let mut next = if *pt + 1 == n { 1 } else { *pt + 1 };
    while *pt < n {
        if points[*pt].y >= points[prev].y && points[*pt].y > points[next].y {
            break;
        }
        prev = *pt;
        *pt += 1;
        next += 1;
        if next == n {
            next = 1;
        }
    }

    let end = if *pt + 1 >= n {
        *pt = n;
        n
    } else {
        *pt + 1
    };
    Bound {
        points: points[begin..end].to_vec(),
        current_point_index: 0,
        winding: true,
    }
}

fn create_bound_towards_minimum(points: &[TileCoordinate], pt: &mut usize) -> Bound {
    let n = points.len();
    if n - *pt < 2 {
        return Bound::default();
    }
    if n - *pt == 2 {
        let mut points = points[*pt..].to_vec();
        if points[0].y > points[1].y {
            points.reverse();
        }
        *pt = n;
        return Bound {
            points,
            ..Bound::default()
        };
    }

    let begin = *pt;
    let mut prev = if *pt == 0 { n - 2 } else { *pt - 1 };
    let mut next = if *pt + 1 == n { 1 } else { *pt + 1 };
    while *pt < n {
        if points[*pt].y <= points[prev].y && points[*pt].y < points[next].y {
            break;
        }
        prev = *pt;
        *pt += 1;
        next += 1;
        if next == n {
            next = 1;
        }
    }

    let end = if *pt + 1 >= n {
        *pt = n;
        n
    } else {
        *pt + 1
    };
    let mut points = points[begin..end].to_vec();
    points.reverse();
    Bound {
        points,
        current_point_index: 0,
        winding: false,
    }
}

fn edge_table_row(y: f64, max_tile: u32) -> u32 {
    // Projections may result in values beyond the bounds due to double precision
    y.clamp(0.0, max_tile as f64).floor() as u32
}

fn build_edge_table(
    mut points: Vec<TileCoordinate>,
    max_tile: u32,
    edge_table: &mut EdgeTable,
    closed: bool,
) {
    if closed {
        if points.len() <= 2 {
            return;
        }
        start_list_on_local_minimum(&mut points);
    }

    let mut pt = 0;
    while pt < points.len() {
        let start = pt;
        let to_max = create_bound_towards_maximum(&points, &mut pt);
        let to_min = create_bound_towards_minimum(&points, &mut pt);

        for bound in [to_max, to_min] {
            if let Some(first) = bound.points.first() {
                edge_table
                    .entry(edge_table_row(first.y, max_tile))
                    .or_default()
                    .push(bound);
            }
        }

        if pt == start {
            break;
        }
    }
}

fn scan_row(y: u32, active_edge_table: &mut Vec<Bound>) -> Vec<TileCoverRange> {
    let mut tile_range = Vec::with_capacity(active_edge_table.len());

    for bound in active_edge_table.iter_mut() {
        let mut range = TileCoverRange {
            x0: i32::MAX,
            x1: 0,
            winding: bound.winding,
        };
        let num_edges = bound.points.len() - 1;
        debug_assert!(num_edges >= 1);

        let mut extend = |x: f64| {
            range.x0 = range.x0.min(x.floor() as i32);
            range.x1 = range.x1.max(x.ceil() as i32);
        };

        while bound.current_point_index < num_edges {
            extend(bound.interpolate(y));

            // If this edge ends beyond the current row, take the x value at the exit and be done
            // with this bound
            let p1 = bound.points[bound.current_point_index + 1];
            if p1.y > (y + 1) as f64 {
                extend(bound.interpolate(y + 1));
                break;
            } else if bound.current_point_index == num_edges - 1 {
                extend(p1.x);
            }
            bound.current_point_index += 1;
        }
        tile_range.push(range);
    }

    // Drop bounds whose last edge ends inside this row
    active_edge_table.retain(|bound| {
        !(bound.current_point_index == bound.points.len() - 1
            && bound.points[bound.current_point_index].y <= (y + 1) as f64)
    });

    tile_range.sort_by(|a, b| (a.x0, a.x1).cmp(&(b.x0, b.x1)));
    tile_range
}

fn project(coord: &Coord<f64>, z: u8) -> TileCoordinate {
    Projection::project(&LatLng::new(coord.y, coord.x), z)
}

/// Streams the covered columns of a geometry row by row.
pub(crate) struct ScanlineCover {
    pending: VecDeque<(u32, Vec<Bound>)>,
    active_edge_table: Vec<Bound>,
    current_row: u32,
    max_y: u32,
    is_closed: bool,
}

impl ScanlineCover {
    /// Builds the edge table of `geometry`. Coordinates are longitude/latitude and projected to
    /// zoom `z` when `project` is set, tile coordinates at zoom `z` otherwise.
    pub(crate) fn new(z: u8, geometry: &Geometry<f64>, project: bool) -> Self {
        let max_tile = 1u32 << z;
        let to_tile = |coord: &Coord<f64>| {
            if project {
                self::project(coord, z)
            } else {
                TileCoordinate::new(coord.x, coord.y)
            }
        };

        let point_bound = |coord: &Coord<f64>| {
            let point = to_tile(coord);
            (
                edge_table_row(point.y, max_tile),
                Bound {
                    points: vec![point, point],
                    current_point_index: 0,
                    winding: false,
                },
            )
        };

        let line_table = |line: &LineString<f64>, edge_table: &mut EdgeTable, closed: bool| {
            let points = line.coords().map(to_tile).collect();
            build_edge_table(points, max_tile, edge_table, closed);
        };

        let polygon_table = |polygon: &Polygon<f64>, edge_table: &mut EdgeTable| {
            line_table(polygon.exterior(), edge_table, true);
            for interior in polygon.interiors() {
                line_table(interior, edge_table, true);
            }
        };

        let mut edge_table = EdgeTable::new();
        let mut is_closed = false;
        match geometry {
            Geometry::Point(point) => {
                let (row, bound) = point_bound(&point.0);
                edge_table.entry(row).or_default().push(bound);
            }
            Geometry::MultiPoint(points) => {
                for point in points {
                    let (row, bound) = point_bound(&point.0);
                    edge_table.entry(row).or_default().push(bound);
                }
            }
            Geometry::Line(line) => {
                line_table(&LineString::from(*line), &mut edge_table, false);
            }
            Geometry::LineString(line) => line_table(line, &mut edge_table, false),
            Geometry::MultiLineString(lines) => {
                for line in lines {
                    line_table(line, &mut edge_table, false);
                }
            }
            Geometry::Polygon(polygon) => {
                is_closed = true;
                polygon_table(polygon, &mut edge_table);
            }
            Geometry::MultiPolygon(polygons) => {
                is_closed = true;
                for polygon in polygons {
                    polygon_table(polygon, &mut edge_table);
                }
            }
            Geometry::Rect(rect) => {
                is_closed = true;
                polygon_table(&rect.to_polygon(), &mut edge_table);
            }
            Geometry::Triangle(triangle) => {
                is_closed = true;
                polygon_table(&triangle.to_polygon(), &mut edge_table);
            }
            Geometry::GeometryCollection(_) => {}
        }

        let mut cover = Self {
            pending: edge_table.into_iter().collect(),
            active_edge_table: Vec::new(),
            current_row: 0,
            max_y: max_tile,
            is_closed,
        };
        if let Some((row, bounds)) = cover.pending.pop_front() {
            cover.current_row = row;
            cover.active_edge_table = bounds;
        }
        cover
    }

    pub(crate) fn has_next(&self) -> bool {
        !self.active_edge_table.is_empty() && self.current_row < self.max_y
    }

    /// Scans the current row and reports each covered span `[x0, x1)` with its row to
    /// `scan_cover`. Returns whether more rows remain.
    pub(crate) fn scan_row<F>(&mut self, mut scan_cover: F) -> bool
    where
        F: FnMut(i32, i32, u32),
    {
        if !self.has_next() {
            return false;
        }

        let row = self.current_row;
        let ranges = scan_row(row, &mut self.active_edge_table);
        if let Some(first) = ranges.first() {
            let mut x_min = first.x0;
            let mut x_max = first.x1;
            let mut non_zero: i32 = if first.winding { 1 } else { -1 };
            for range in &ranges[1..] {
                if !(self.is_closed && non_zero != 0) && range.x0 >= x_max {
                    scan_cover(x_min, x_max, row);
                    x_min = range.x0;
                }
                non_zero += if range.winding { 1 } else { -1 };
                x_max = x_min.max(range.x1);
            }
            scan_cover(x_min, x_max, row);
        }

        // Advance the active edge table to the next row
        self.current_row += 1;
        if let Some(&(next_row, _)) = self.pending.front() {
            if self.active_edge_table.is_empty() && next_row > self.current_row {
                // Multi geometries continue at the next row with a starting bound
                self.current_row = next_row;
            }
            if self.current_row == next_row {
                if let Some((_, bounds)) = self.pending.pop_front() {
                    self.active_edge_table.extend(bounds);
                }
            }
        }
        self.has_next()
    }
}
