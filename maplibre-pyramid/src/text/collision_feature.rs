//! Collision geometry of labels and icons.

use lyon::geom::euclid::Point2D;

use crate::{
    coords::{ScreenSpace, TileSpace},
    text::{
        anchor::Anchor,
        grid_index::{Circle, ScreenBox},
    },
    tile::geometry_tile_data::GeometryCoordinates,
};

/// A box or circle around a point of a tile.
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct CollisionBox {
    /// Center of the box in tile units.
    pub anchor: Point2D<f64, TileSpace>,
    // Distances to the edges from the anchor, in pixels.
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Distance along the line to the label anchor in tile units. Negative before the anchor.
    pub signed_distance_from_anchor: f64,
}

impl CollisionBox {
    pub fn radius(&self) -> f64 {
        (self.x2 - self.x1) / 2.0
    }
}

/// The collision geometry of one text or icon.
///
/// Point labels have a single box. Labels along lines are approximated by a row of circles
/// following the line, of which placement picks those covered by the label at the current zoom.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollisionFeature {
    pub boxes: Vec<CollisionBox>,
    pub along_line: bool,
    /// Half the label length in pixels, for labels along lines.
    pub half_length: f64,
    /// Length of the line before and after the anchor in tile units.
    pub line_extent: (f64, f64),
}

/// The size of a label relative to its anchor in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelBounds {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl CollisionFeature {
    /// A single box for labels at points.
    pub fn new_point(anchor: &Anchor, bounds: LabelBounds, box_scale: f64, padding: f64) -> Self {
        if bounds.top == bounds.bottom && bounds.left == bounds.right {
            return Self::default();
        }

        Self {
            boxes: vec![CollisionBox {
                anchor: anchor.point,
                x1: bounds.left * box_scale - padding,
                y1: bounds.top * box_scale - padding,
                x2: bounds.right * box_scale + padding,
                y2: bounds.bottom * box_scale + padding,
                signed_distance_from_anchor: 0.0,
            }],
            ..Self::default()
        }
    }

    /// Circles along `line` reaching up to twice the label length in both directions, so that
    /// labels which grow with zoom remain covered. `tile_units_per_pixel` relates the pixel sizes
    /// of the label to the line geometry at the zoom level of the tile.
    pub fn new_line(
        line: &GeometryCoordinates,
        anchor: &Anchor,
        bounds: LabelBounds,
        box_scale: f64,
        padding: f64,
        tile_units_per_pixel: f64,
    ) -> Self {
        let height = (bounds.bottom - bounds.top) * box_scale + 2.0 * padding;
        let length = (bounds.right - bounds.left) * box_scale + 2.0 * padding;
        let mut feature = Self {
            along_line: true,
            half_length: length / 2.0,
            ..Self::default()
        };
        if height <= 0.0 || tile_units_per_pixel <= 0.0 {
            return feature;
        }

        let points: Vec<Point2D<f64, TileSpace>> = line
            .iter()
            .map(|p| Point2D::new(p.x as f64, p.y as f64))
            .collect();
        let Some(segment) = anchor.segment.filter(|segment| segment + 1 < points.len()) else {
            return feature;
        };

        let mut distances = Vec::with_capacity(points.len());
        let mut total = 0.0;
        distances.push(0.0);
        for pair in points.windows(2) {
            total += pair[0].distance_to(pair[1]);
            distances.push(total);
        }
        let anchor_distance = distances[segment] + points[segment].distance_to(anchor.point);
        feature.line_extent = (anchor_distance, total - anchor_distance);

        let radius = height / 2.0;
        let step = radius * tile_units_per_pixel;
        let reach = length * tile_units_per_pixel;
        let count = (reach / step).ceil() as i64;

        let mut index = 0;
        for i in -count..=count {
            let offset = i as f64 * step;
            let distance = anchor_distance + offset;
            if distance < 0.0 || distance > total {
                continue;
            }
            while index + 2 < distances.len() && distances[index + 1] < distance {
                index += 1;
            }
            let segment_length = distances[index + 1] - distances[index];
            let t = if segment_length > 0.0 {
                (distance - distances[index]) / segment_length
            } else {
                0.0
            };
            feature.boxes.push(CollisionBox {
                anchor: points[index].lerp(points[index + 1], t),
                x1: -radius,
                y1: -radius,
                x2: radius,
                y2: radius,
                signed_distance_from_anchor: offset,
            });
        }
        feature
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// A collision box projected to the screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProjectedCollisionBox {
    Circle(Circle),
    Box(ScreenBox),
}

impl ProjectedCollisionBox {
    pub fn as_box(&self) -> Option<&ScreenBox> {
        match self {
            ProjectedCollisionBox::Box(bbox) => Some(bbox),
            ProjectedCollisionBox::Circle(_) => None,
        }
    }

    pub fn as_circle(&self) -> Option<&Circle> {
        match self {
            ProjectedCollisionBox::Circle(circle) => Some(circle),
            ProjectedCollisionBox::Box(_) => None,
        }
    }

    pub fn bounding_box(&self) -> ScreenBox {
        match self {
            ProjectedCollisionBox::Box(bbox) => *bbox,
            ProjectedCollisionBox::Circle(circle) => ScreenBox::new(
                Point2D::<f64, ScreenSpace>::new(
                    circle.center.x - circle.radius,
                    circle.center.y - circle.radius,
                ),
                Point2D::new(circle.center.x + circle.radius, circle.center.y + circle.radius),
            ),
        }
    }
}
