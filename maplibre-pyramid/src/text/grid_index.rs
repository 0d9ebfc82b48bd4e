//! Uniform grid of boxes and circles in screen space, used to detect colliding labels.

use std::collections::HashSet;

use lyon::geom::euclid::{Box2D, Point2D};

use crate::coords::ScreenSpace;

pub type ScreenBox = Box2D<f64, ScreenSpace>;

#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub center: Point2D<f64, ScreenSpace>,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Point2D<f64, ScreenSpace>, radius: f64) -> Self {
        Self { center, radius }
    }

    fn bounding_box(&self) -> ScreenBox {
        Box2D::new(
            Point2D::new(self.center.x - self.radius, self.center.y - self.radius),
            Point2D::new(self.center.x + self.radius, self.center.y + self.radius),
        )
    }
}

pub fn boxes_collide(first: &ScreenBox, second: &ScreenBox) -> bool {
    first.min.x <= second.max.x
        && first.min.y <= second.max.y
        && first.max.x >= second.min.x
        && first.max.y >= second.min.y
}

pub fn circles_collide(first: &Circle, second: &Circle) -> bool {
    let dx = second.center.x - first.center.x;
    let dy = second.center.y - first.center.y;
    let both_radii = first.radius + second.radius;
    both_radii * both_radii > dx * dx + dy * dy
}

pub fn circle_and_box_collide(circle: &Circle, bbox: &ScreenBox) -> bool {
    let half_width = (bbox.max.x - bbox.min.x) / 2.0;
    let dist_x = (circle.center.x - (bbox.min.x + half_width)).abs();
    if dist_x > half_width + circle.radius {
        return false;
    }

    let half_height = (bbox.max.y - bbox.min.y) / 2.0;
    let dist_y = (circle.center.y - (bbox.min.y + half_height)).abs();
    if dist_y > half_height + circle.radius {
        return false;
    }

    if dist_x <= half_width || dist_y <= half_height {
        return true;
    }

    let dx = dist_x - half_width;
    let dy = dist_y - half_height;
    dx * dx + dy * dy <= circle.radius * circle.radius
}

/// Elements are stored once and referenced from every cell they overlap. Queries visit each
/// element at most once.
pub struct GridIndex<T: Clone> {
    width: f64,
    height: f64,
    x_cell_count: usize,
    y_cell_count: usize,
    x_scale: f64,
    y_scale: f64,
    box_elements: Vec<(T, ScreenBox)>,
    circle_elements: Vec<(T, Circle)>,
    box_cells: Vec<Vec<u32>>,
    circle_cells: Vec<Vec<u32>>,
}

impl<T: Clone> GridIndex<T> {
    pub fn new(width: f64, height: f64, cell_size: u32) -> Self {
        debug_assert!(width > 0.0 && height > 0.0);
        let width = width.max(1.0);
        let height = height.max(1.0);
        let x_cell_count = ((width / cell_size as f64).ceil() as usize).max(1);
        let y_cell_count = ((height / cell_size as f64).ceil() as usize).max(1);

        Self {
            width,
            height,
            x_cell_count,
            y_cell_count,
            x_scale: x_cell_count as f64 / width,
            y_scale: y_cell_count as f64 / height,
            box_elements: Vec::new(),
            circle_elements: Vec::new(),
            box_cells: vec![Vec::new(); x_cell_count * y_cell_count],
            circle_cells: vec![Vec::new(); x_cell_count * y_cell_count],
        }
    }

    pub fn insert(&mut self, t: T, bbox: ScreenBox) {
        let uid = self.box_elements.len() as u32;
        for cell in self.cells(&bbox) {
            self.box_cells[cell].push(uid);
        }
        self.box_elements.push((t, bbox));
    }

    pub fn insert_circle(&mut self, t: T, circle: Circle) {
        let uid = self.circle_elements.len() as u32;
        for cell in self.cells(&circle.bounding_box()) {
            self.circle_cells[cell].push(uid);
        }
        self.circle_elements.push((t, circle));
    }

    /// Keys of all elements intersecting `query_box`.
    pub fn query(&self, query_box: &ScreenBox) -> Vec<T> {
        let mut result = Vec::new();
        self.query_box(query_box, |t, _| {
            result.push(t.clone());
            false
        });
        result
    }

    pub fn query_with_boxes(&self, query_box: &ScreenBox) -> Vec<(T, ScreenBox)> {
        let mut result = Vec::new();
        self.query_box(query_box, |t, bbox| {
            result.push((t.clone(), bbox));
            false
        });
        result
    }

    /// Whether any element accepted by `predicate` intersects `query_box`.
    pub fn hit_test<F>(&self, query_box: &ScreenBox, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let mut hit = false;
        self.query_box(query_box, |t, _| {
            hit = predicate(t);
            hit
        });
        hit
    }

    pub fn hit_test_circle<F>(&self, circle: &Circle, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let mut hit = false;
        self.query_circle(circle, |t, _| {
            hit = predicate(t);
            hit
        });
        hit
    }

    pub fn is_empty(&self) -> bool {
        self.box_elements.is_empty() && self.circle_elements.is_empty()
    }

    fn no_intersection(&self, query_box: &ScreenBox) -> bool {
        query_box.max.x < 0.0
            || query_box.min.x >= self.width
            || query_box.max.y < 0.0
            || query_box.min.y >= self.height
    }

    fn complete_intersection(&self, query_box: &ScreenBox) -> bool {
        query_box.min.x <= 0.0
            && query_box.min.y <= 0.0
            && self.width <= query_box.max.x
            && self.height <= query_box.max.y
    }

    fn cells(&self, bbox: &ScreenBox) -> Vec<usize> {
        let cx1 = self.x_cell(bbox.min.x);
        let cy1 = self.y_cell(bbox.min.y);
        let cx2 = self.x_cell(bbox.max.x);
        let cy2 = self.y_cell(bbox.max.y);

        let mut cells = Vec::with_capacity((cx2 - cx1 + 1) * (cy2 - cy1 + 1));
        for x in cx1..=cx2 {
            for y in cy1..=cy2 {
                cells.push(self.x_cell_count * y + x);
            }
        }
        cells
    }

    /// Calls `result_fn` for every colliding element until it returns true.
    fn visit<F, BC, CC>(
        &self,
        query_box: &ScreenBox,
        box_collides: BC,
        circle_collides: CC,
        mut result_fn: F,
    ) where
        F: FnMut(&T, ScreenBox) -> bool,
        BC: Fn(&ScreenBox) -> bool,
        CC: Fn(&Circle) -> bool,
    {
        if self.no_intersection(query_box) {
            return;
        }

        if self.complete_intersection(query_box) {
            for (t, bbox) in &self.box_elements {
                if result_fn(t, *bbox) {
                    return;
                }
            }
            for (t, circle) in &self.circle_elements {
                if result_fn(t, circle.bounding_box()) {
                    return;
                }
            }
            return;
        }

        let mut seen_boxes = HashSet::new();
        let mut seen_circles = HashSet::new();

        for cell in self.cells(query_box) {
            for uid in &self.box_cells[cell] {
                if !seen_boxes.insert(*uid) {
                    continue;
                }
                let (t, bbox) = &self.box_elements[*uid as usize];
                if box_collides(bbox) && result_fn(t, *bbox) {
                    return;
                }
            }

            for uid in &self.circle_cells[cell] {
                if !seen_circles.insert(*uid) {
                    continue;
                }
                let (t, circle) = &self.circle_elements[*uid as usize];
                if circle_collides(circle) && result_fn(t, circle.bounding_box()) {
                    return;
                }
            }
        }
    }

    fn query_box<F>(&self, query_box: &ScreenBox, result_fn: F)
    where
        F: FnMut(&T, ScreenBox) -> bool,
    {
        self.visit(
            query_box,
            |bbox| boxes_collide(query_box, bbox),
            |circle| circle_and_box_collide(circle, query_box),
            result_fn,
        )
    }

    fn query_circle<F>(&self, query: &Circle, result_fn: F)
    where
        F: FnMut(&T, ScreenBox) -> bool,
    {
        self.visit(
            &query.bounding_box(),
            |bbox| circle_and_box_collide(query, bbox),
            |circle| circles_collide(query, circle),
            result_fn,
        )
    }

    fn x_cell(&self, x: f64) -> usize {
        (x * self.x_scale)
            .floor()
            .clamp(0.0, (self.x_cell_count - 1) as f64) as usize
    }

    fn y_cell(&self, y: f64) -> usize {
        (y * self.y_scale)
            .floor()
            .clamp(0.0, (self.y_cell_count - 1) as f64) as usize
    }
}
