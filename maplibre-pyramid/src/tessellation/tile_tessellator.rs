//! Tessellator implementation for the geometries of tile features.

use lyon::{
    geom::point,
    path::Path,
    tessellation::{
        self, BuffersBuilder, FillOptions, FillRule, FillTessellator, StrokeOptions,
        StrokeTessellator, TessellationError,
    },
};

use crate::{
    style::layer::{LineCap, LineJoin},
    tessellation::{
        ExtrusionVertex, IndexDataType, RoofConstructor, ShaderVertex, TessellatedBuffer,
        VertexConstructor, DEFAULT_TOLERANCE,
    },
    tile::geometry_tile_data::{GeometryCollection, GeometryCoordinates},
};

fn build_path<'a, I>(rings: I, close: bool) -> Path
where
    I: IntoIterator<Item = &'a GeometryCoordinates>,
{
    let mut builder = Path::builder();
    for ring in rings {
        let mut points = ring.iter();
        let Some(first) = points.next() else {
            continue;
        };
        builder.begin(point(first.x as f32, first.y as f32));
        for p in points {
            builder.line_to(point(p.x as f32, p.y as f32));
        }
        builder.end(close);
    }
    builder.build()
}

/// Fills a polygon given as outer ring followed by its holes.
pub fn tessellate_polygon(
    polygon: &GeometryCollection,
    buffer: &mut TessellatedBuffer<ShaderVertex, IndexDataType>,
) -> Result<(), TessellationError> {
    FillTessellator::new().tessellate_path(
        &build_path(polygon, true),
        &FillOptions::tolerance(DEFAULT_TOLERANCE).with_fill_rule(FillRule::NonZero),
        &mut BuffersBuilder::new(&mut buffer.buffer, VertexConstructor {}),
    )
}

pub struct LineOptions {
    pub join: LineJoin,
    pub cap: LineCap,
    pub miter_limit: f64,
}

/// Strokes lines. The width is applied by extruding vertices along their normal later on, hence
/// lines are tessellated with a unit width.
pub fn tessellate_lines(
    lines: &GeometryCollection,
    options: &LineOptions,
    buffer: &mut TessellatedBuffer<ShaderVertex, IndexDataType>,
) -> Result<(), TessellationError> {
    let join = match options.join {
        LineJoin::Miter => tessellation::LineJoin::Miter,
        LineJoin::Bevel => tessellation::LineJoin::Bevel,
        LineJoin::Round => tessellation::LineJoin::Round,
    };
    let cap = match options.cap {
        LineCap::Butt => tessellation::LineCap::Butt,
        LineCap::Round => tessellation::LineCap::Round,
        LineCap::Square => tessellation::LineCap::Square,
    };
    let stroke_options = StrokeOptions::tolerance(DEFAULT_TOLERANCE)
        .with_line_join(join)
        .with_line_cap(cap)
        .with_miter_limit((options.miter_limit as f32).max(StrokeOptions::MINIMUM_MITER_LIMIT));

    StrokeTessellator::new().tessellate_path(
        &build_path(lines, false),
        &stroke_options,
        &mut BuffersBuilder::new(&mut buffer.buffer, VertexConstructor {}),
    )
}

/// Extrudes a polygon between `base` and `height`: a roof plus one quad per ring edge.
pub fn tessellate_extrusion(
    polygon: &GeometryCollection,
    base: f32,
    height: f32,
    buffer: &mut TessellatedBuffer<ExtrusionVertex, IndexDataType>,
) -> Result<(), TessellationError> {
    FillTessellator::new().tessellate_path(
        &build_path(polygon, true),
        &FillOptions::tolerance(DEFAULT_TOLERANCE).with_fill_rule(FillRule::NonZero),
        &mut BuffersBuilder::new(&mut buffer.buffer, RoofConstructor { height }),
    )?;

    for ring in polygon {
        for edge in ring.windows(2) {
            let (a, b) = (edge[0], edge[1]);
            if a == b {
                continue;
            }
            let (dx, dy) = ((b.x - a.x) as f32, (b.y - a.y) as f32);
            let length = (dx * dx + dy * dy).sqrt();
            let normal = [dy / length, -dx / length, 0.0];

            let first = buffer.buffer.vertices.len() as IndexDataType;
            for (p, z) in [(a, base), (a, height), (b, base), (b, height)] {
                buffer.buffer.vertices.push(ExtrusionVertex {
                    position: [p.x as f32, p.y as f32, z],
                    normal,
                });
            }
            buffer.buffer.indices.extend_from_slice(&[
                first,
                first + 1,
                first + 2,
                first + 1,
                first + 3,
                first + 2,
            ]);
        }
    }
    Ok(())
}

/// Adds a quad around `center` whose corners are marked by their extrusion direction.
pub fn add_point_quad(
    x: i16,
    y: i16,
    buffer: &mut TessellatedBuffer<ShaderVertex, IndexDataType>,
) {
    let first = buffer.buffer.vertices.len() as IndexDataType;
    for extrude in [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]] {
        buffer
            .buffer
            .vertices
            .push(ShaderVertex::new([x as f32, y as f32], extrude));
    }
    buffer.buffer.indices.extend_from_slice(&[
        first,
        first + 1,
        first + 2,
        first,
        first + 2,
        first + 3,
    ]);
}

#[cfg(test)]
mod tests {
    use crate::{
        style::layer::{LineCap, LineJoin},
        tessellation::{
            tile_tessellator::{
                add_point_quad, tessellate_extrusion, tessellate_lines, tessellate_polygon,
                LineOptions,
            },
            TessellatedBuffer,
        },
        tile::geometry_tile_data::{GeometryCollection, GeometryCoordinate},
    };

    fn square() -> GeometryCollection {
        vec![[(0, 0), (100, 0), (100, 100), (0, 100), (0, 0)]
            .iter()
            .map(|(x, y)| GeometryCoordinate::new(*x, *y))
            .collect()]
    }

    #[test]
    fn fills_square_with_two_triangles() {
        let mut buffer = TessellatedBuffer::default();
        tessellate_polygon(&square(), &mut buffer).unwrap();
        buffer.end_feature();
        assert_eq!(buffer.buffer.indices.len(), 6);
        assert_eq!(buffer.feature_indices, vec![6]);
    }

    #[test]
    fn strokes_lines() {
        let mut buffer = TessellatedBuffer::default();
        let line = vec![vec![GeometryCoordinate::new(0, 0), GeometryCoordinate::new(100, 0)]];
        tessellate_lines(
            &line,
            &LineOptions {
                join: LineJoin::Miter,
                cap: LineCap::Butt,
                miter_limit: 2.0,
            },
            &mut buffer,
        )
        .unwrap();
        assert!(!buffer.is_empty());
        assert!(buffer
            .buffer
            .vertices
            .iter()
            .all(|v| v.normal[0].abs() < 1e-6 && (v.normal[1].abs() - 1.0).abs() < 1e-6));
    }

    #[test]
    fn extrudes_walls_and_roof() {
        let mut buffer = TessellatedBuffer::default();
        tessellate_extrusion(&square(), 0.0, 10.0, &mut buffer).unwrap();
        // Two roof triangles plus two triangles for each of the four walls.
        assert_eq!(buffer.buffer.indices.len(), 6 + 4 * 6);
    }

    #[test]
    fn point_quads() {
        let mut buffer = TessellatedBuffer::default();
        add_point_quad(10, 20, &mut buffer);
        add_point_quad(30, 40, &mut buffer);
        assert_eq!(buffer.buffer.vertices.len(), 8);
        assert_eq!(buffer.buffer.indices[6..], [4, 5, 6, 4, 6, 7]);
    }
}
