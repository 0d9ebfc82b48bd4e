//! Screen space index of placed labels.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use cgmath::{Matrix4, Vector4};
use lyon::geom::euclid::{Point2D, Vector2D};

use crate::{
    coords::{ScreenSpace, TileSpace, EXTENT},
    options::MapMode,
    render::transform_state::TransformState,
    text::{
        collision_feature::{CollisionBox, CollisionFeature, ProjectedCollisionBox},
        grid_index::{Circle, GridIndex, ScreenBox},
    },
    tile::feature_index::IndexedSubfeature,
};

bitflags! {
    /// Tile borders crossed by a collision box.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IntersectStatusFlags: u8 {
        const HORIZONTAL_BORDERS = 1 << 0;
        const VERTICAL_BORDERS = 1 << 1;
    }
}

impl Default for IntersectStatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntersectStatus {
    pub flags: IntersectStatusFlags,
    /// Length of the smaller part of the box on either side of the crossed border.
    pub min_section_length: i32,
}

/// Labels within this many pixels outside of the viewport take part in collision detection, so
/// that most placement changes happen offscreen.
pub const VIEWPORT_PADDING_DEFAULT: f64 = 100.0;
/// Still tiles need a larger padding to avoid clipped labels.
pub const VIEWPORT_PADDING_FOR_STATIC_TILES: f64 = 1024.0;
const GRID_CELL_SIZE: u32 = 25;

fn find_viewport_padding(transform_state: &TransformState, map_mode: MapMode) -> f64 {
    if map_mode == MapMode::Tile {
        return VIEWPORT_PADDING_FOR_STATIC_TILES;
    }
    if transform_state.pitch().0 != 0.0 {
        VIEWPORT_PADDING_DEFAULT * 2.0
    } else {
        VIEWPORT_PADDING_DEFAULT
    }
}

/// Outcome of testing a feature against the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeaturePlacement {
    pub placed: bool,
    /// The feature lies in the padding around the viewport.
    pub offscreen: bool,
    pub projected_boxes: Vec<ProjectedCollisionBox>,
}

pub type CollisionGrid = GridIndex<IndexedSubfeature>;

pub struct CollisionIndex {
    transform_state: TransformState,
    viewport_padding: f64,
    collision_grid: CollisionGrid,
    ignored_grid: CollisionGrid,
    screen_right_boundary: f64,
    screen_bottom_boundary: f64,
    grid_right_boundary: f64,
    grid_bottom_boundary: f64,
}

impl CollisionIndex {
    pub fn new(transform_state: &TransformState, map_mode: MapMode) -> Self {
        Self::with_padding(
            transform_state,
            find_viewport_padding(transform_state, map_mode),
        )
    }

    pub fn with_padding(transform_state: &TransformState, viewport_padding: f64) -> Self {
        let grid_width = transform_state.width() + 2.0 * viewport_padding;
        let grid_height = transform_state.height() + 2.0 * viewport_padding;
        Self {
            transform_state: transform_state.clone(),
            viewport_padding,
            collision_grid: CollisionGrid::new(grid_width, grid_height, GRID_CELL_SIZE),
            ignored_grid: CollisionGrid::new(grid_width, grid_height, GRID_CELL_SIZE),
            screen_right_boundary: transform_state.width() + viewport_padding,
            screen_bottom_boundary: transform_state.height() + viewport_padding,
            grid_right_boundary: grid_width,
            grid_bottom_boundary: grid_height,
        }
    }

    pub fn transform_state(&self) -> &TransformState {
        &self.transform_state
    }

    pub fn viewport_padding(&self) -> f64 {
        self.viewport_padding
    }

    /// Which tile borders the box of a label crosses.
    pub fn intersects_tile_edges(
        &self,
        collision_box: &CollisionBox,
        shift: Vector2D<f64, ScreenSpace>,
        pos_matrix: &Matrix4<f64>,
        tile_edges: &ScreenBox,
    ) -> IntersectStatus {
        let mut result = IntersectStatus::default();
        let Some(boundaries) = self.projected_collision_boundaries(pos_matrix, shift, collision_box)
        else {
            return result;
        };
        let (x1, y1, x2, y2) = (
            boundaries.min.x,
            boundaries.min.y,
            boundaries.max.x,
            boundaries.max.y,
        );

        // Left border, then right border.
        let mut min_section_length = (tile_edges.min.x - x1).min(x2 - tile_edges.min.x) as i32;
        if min_section_length <= 0 {
            min_section_length = (tile_edges.max.x - x1).min(x2 - tile_edges.max.x) as i32;
        }
        if min_section_length > 0 {
            result.flags |= IntersectStatusFlags::VERTICAL_BORDERS;
            result.min_section_length = min_section_length;
        }

        // Top border, then bottom border.
        min_section_length = (tile_edges.min.y - y1).min(y2 - tile_edges.min.y) as i32;
        if min_section_length <= 0 {
            min_section_length = (tile_edges.max.y - y1).min(y2 - tile_edges.max.y) as i32;
        }
        if min_section_length > 0 {
            if result.flags.is_empty() {
                result.min_section_length = min_section_length;
            } else {
                result.min_section_length = result.min_section_length.min(min_section_length);
            }
            result.flags |= IntersectStatusFlags::HORIZONTAL_BORDERS;
        }
        result
    }

    /// Tests `feature` against the labels inserted so far. `tile_units_per_pixel` converts the
    /// label length of line labels into tile units of the tile at the current zoom.
    #[allow(clippy::too_many_arguments)]
    pub fn place_feature<F>(
        &self,
        feature: &CollisionFeature,
        shift: Vector2D<f64, ScreenSpace>,
        pos_matrix: &Matrix4<f64>,
        tile_units_per_pixel: f64,
        allow_overlap: bool,
        avoid_edges: Option<&ScreenBox>,
        collision_group_predicate: F,
    ) -> FeaturePlacement
    where
        F: Fn(&IndexedSubfeature) -> bool,
    {
        if feature.along_line {
            return self.place_line_feature(
                feature,
                pos_matrix,
                tile_units_per_pixel,
                allow_overlap,
                avoid_edges,
                collision_group_predicate,
            );
        }

        let Some(collision_box) = feature.boxes.first() else {
            return FeaturePlacement::default();
        };
        let Some(boundaries) = self.projected_collision_boundaries(pos_matrix, shift, collision_box)
        else {
            return FeaturePlacement::default();
        };
        let projected_boxes = vec![ProjectedCollisionBox::Box(boundaries)];

        if let Some(avoid_edges) = avoid_edges {
            if !Self::is_inside_tile(&boundaries, avoid_edges) {
                return FeaturePlacement {
                    projected_boxes,
                    ..FeaturePlacement::default()
                };
            }
        }

        if !self.is_inside_grid(&boundaries)
            || (!allow_overlap
                && self
                    .collision_grid
                    .hit_test(&boundaries, collision_group_predicate))
        {
            return FeaturePlacement {
                projected_boxes,
                ..FeaturePlacement::default()
            };
        }

        FeaturePlacement {
            placed: true,
            offscreen: self.is_offscreen(&boundaries),
            projected_boxes,
        }
    }

    fn place_line_feature<F>(
        &self,
        feature: &CollisionFeature,
        pos_matrix: &Matrix4<f64>,
        tile_units_per_pixel: f64,
        allow_overlap: bool,
        avoid_edges: Option<&ScreenBox>,
        collision_group_predicate: F,
    ) -> FeaturePlacement
    where
        F: Fn(&IndexedSubfeature) -> bool,
    {
        let half_length = feature.half_length * tile_units_per_pixel;
        let (backward, forward) = feature.line_extent;
        if half_length > backward || half_length > forward {
            // The line is too short for the label at this zoom.
            return FeaturePlacement::default();
        }

        let mut projected_boxes: Vec<ProjectedCollisionBox> = Vec::new();
        let mut in_grid = false;
        let mut entirely_offscreen = true;
        let mut previous_circle: Option<Circle> = None;

        let used = |circle: &CollisionBox| circle.signed_distance_from_anchor.abs() <= half_length;
        for (i, circle) in feature.boxes.iter().enumerate() {
            if !used(circle) {
                previous_circle = None;
                continue;
            }
            let Some((center, perspective_ratio)) = self.project(pos_matrix, &circle.anchor) else {
                previous_circle = None;
                continue;
            };
            let radius = circle.radius() * perspective_ratio;

            if let Some(previous) = previous_circle {
                let dx = center.x - previous.center.x;
                let dy = center.y - previous.center.y;
                // Circles closer than √2 radii to their predecessor are dropped, unless they are
                // the last usable one.
                let placed_too_densely = radius * radius * 2.0 > dx * dx + dy * dy;
                let more_circles = feature.boxes.get(i + 1).map_or(false, used);
                if placed_too_densely && more_circles {
                    previous_circle = None;
                    continue;
                }
            }

            let projected = Circle::new(center, radius);
            previous_circle = Some(projected);
            let boundaries = ScreenBox::new(
                Point2D::new(center.x - radius, center.y - radius),
                Point2D::new(center.x + radius, center.y + radius),
            );
            projected_boxes.push(ProjectedCollisionBox::Circle(projected));

            entirely_offscreen &= self.is_offscreen(&boundaries);
            in_grid |= self.is_inside_grid(&boundaries);

            if let Some(avoid_edges) = avoid_edges {
                if !Self::is_inside_tile(&boundaries, avoid_edges) {
                    return FeaturePlacement::default();
                }
            }

            if !allow_overlap
                && self
                    .collision_grid
                    .hit_test_circle(&projected, &collision_group_predicate)
            {
                return FeaturePlacement::default();
            }
        }

        FeaturePlacement {
            placed: in_grid && !projected_boxes.is_empty(),
            offscreen: entirely_offscreen,
            projected_boxes,
        }
    }

    /// Adds a placed feature. Features placed with `ignore_placement` are recorded for queries
    /// but do not block other labels.
    pub fn insert_feature(
        &mut self,
        projected_boxes: &[ProjectedCollisionBox],
        ignore_placement: bool,
        subfeature: &IndexedSubfeature,
    ) {
        let grid = if ignore_placement {
            &mut self.ignored_grid
        } else {
            &mut self.collision_grid
        };
        for projected in projected_boxes {
            match projected {
                ProjectedCollisionBox::Box(bbox) => grid.insert(subfeature.clone(), *bbox),
                ProjectedCollisionBox::Circle(circle) => {
                    grid.insert_circle(subfeature.clone(), *circle)
                }
            }
        }
    }

    /// Placed symbols intersecting `query` in screen pixels, by bucket instance.
    pub fn query_rendered_symbols(
        &self,
        query: &ScreenBox,
    ) -> HashMap<u32, Vec<IndexedSubfeature>> {
        let mut result: HashMap<u32, Vec<IndexedSubfeature>> = HashMap::new();
        let padding = Vector2D::new(self.viewport_padding, self.viewport_padding);
        let query = ScreenBox::new(query.min + padding, query.max + padding);

        let mut seen = HashSet::new();
        let features = self
            .collision_grid
            .query(&query)
            .into_iter()
            .chain(self.ignored_grid.query(&query));
        for feature in features {
            let key = (
                feature.bucket_instance_id,
                feature.feature_index,
                feature.layer_id.clone(),
            );
            if seen.insert(key) {
                result
                    .entry(feature.bucket_instance_id)
                    .or_default()
                    .push(feature);
            }
        }
        result
    }

    /// Screen box of the tile transformed with `pos_matrix`.
    pub fn project_tile_boundaries(&self, pos_matrix: &Matrix4<f64>) -> Option<ScreenBox> {
        let (top_left, _) = self.project(pos_matrix, &Point2D::zero())?;
        let (bottom_right, _) = self.project(pos_matrix, &Point2D::new(EXTENT, EXTENT))?;
        Some(ScreenBox::new(
            Point2D::new(top_left.x.min(bottom_right.x), top_left.y.min(bottom_right.y)),
            Point2D::new(top_left.x.max(bottom_right.x), top_left.y.max(bottom_right.y)),
        ))
    }

    pub fn is_offscreen(&self, boundaries: &ScreenBox) -> bool {
        boundaries.max.x < self.viewport_padding
            || boundaries.min.x >= self.screen_right_boundary
            || boundaries.max.y < self.viewport_padding
            || boundaries.min.y >= self.screen_bottom_boundary
    }

    pub fn is_inside_grid(&self, boundaries: &ScreenBox) -> bool {
        boundaries.max.x >= 0.0
            && boundaries.min.x < self.grid_right_boundary
            && boundaries.max.y >= 0.0
            && boundaries.min.y < self.grid_bottom_boundary
    }

    pub fn is_inside_tile(boundaries: &ScreenBox, tile_boundaries: &ScreenBox) -> bool {
        boundaries.min.x >= tile_boundaries.min.x
            && boundaries.min.y >= tile_boundaries.min.y
            && boundaries.max.x < tile_boundaries.max.x
            && boundaries.max.y < tile_boundaries.max.y
    }

    /// Position in the padded grid and the perspective ratio at `point`. Points behind the camera
    /// have no position.
    fn project(
        &self,
        pos_matrix: &Matrix4<f64>,
        point: &Point2D<f64, TileSpace>,
    ) -> Option<(Point2D<f64, ScreenSpace>, f64)> {
        let clip = pos_matrix * Vector4::new(point.x, point.y, 0.0, 1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let screen = self.transform_state.clip_to_screen(&clip);
        Some((
            Point2D::new(
                screen.x + self.viewport_padding,
                screen.y + self.viewport_padding,
            ),
            // Labels in the distance are smaller.
            0.5 + 0.5 * self.transform_state.camera_to_center_distance() / clip.w,
        ))
    }

    fn projected_collision_boundaries(
        &self,
        pos_matrix: &Matrix4<f64>,
        shift: Vector2D<f64, ScreenSpace>,
        collision_box: &CollisionBox,
    ) -> Option<ScreenBox> {
        let (center, scale) = self.project(pos_matrix, &collision_box.anchor)?;
        Some(ScreenBox::new(
            Point2D::new(
                (collision_box.x1 + shift.x) * scale + center.x,
                (collision_box.y1 + shift.y) * scale + center.y,
            ),
            Point2D::new(
                (collision_box.x2 + shift.x) * scale + center.x,
                (collision_box.y2 + shift.y) * scale + center.y,
            ),
        ))
    }
}
