//! The viewport of a map: size, camera position and the projection derived from them.

use std::f64::consts::{FRAC_PI_2, PI};

use cgmath::{num_traits::clamp, prelude::*, Deg, Matrix4, Rad, Vector3, Vector4};

use crate::{
    coords::{LatLng, Projection, ScreenCoordinate, TileCoordinate, EXTENT, TILE_SIZE},
    tile::tile_id::UnwrappedTileID,
};

/// Vertical field of view in radians. Chosen such that the camera is 1.5 screen heights above
/// the ground.
pub const DEFAULT_FOV: f64 = 0.6435011087932844;
pub const MAX_PITCH: Deg<f64> = Deg(60.0);
pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 25.5;

/// Changes of the camera. Fields which are `None` stay untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraOptions {
    pub center: Option<LatLng>,
    pub zoom: Option<f64>,
    /// Clockwise rotation in degrees.
    pub bearing: Option<f64>,
    /// Tilt towards the horizon in degrees.
    pub pitch: Option<f64>,
}

impl CameraOptions {
    pub fn with_center(mut self, center: LatLng) -> Self {
        self.center = Some(center);
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = Some(zoom);
        self
    }

    pub fn with_bearing(mut self, bearing: f64) -> Self {
        self.bearing = Some(bearing);
        self
    }

    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = Some(pitch);
        self
    }
}

#[derive(Clone, Debug)]
pub struct TransformState {
    width: f64,
    height: f64,
    center: LatLng,
    zoom: f64,
    bearing: Rad<f64>,
    pitch: Rad<f64>,
    fov: Rad<f64>,
}

impl Default for TransformState {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl TransformState {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            center: LatLng::default(),
            zoom: 0.0,
            bearing: Rad(0.0),
            pitch: Rad(0.0),
            fov: Rad(DEFAULT_FOV),
        }
    }

    /// A transform is usable once it has a non-empty size.
    pub fn valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    pub fn jump_to(&mut self, camera: &CameraOptions) {
        if let Some(center) = camera.center {
            self.center = center;
        }
        if let Some(zoom) = camera.zoom {
            self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        if let Some(bearing) = camera.bearing {
            self.bearing = Deg(bearing).into();
        }
        if let Some(pitch) = camera.pitch {
            self.pitch = Deg(pitch.clamp(0.0, MAX_PITCH.0)).into();
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn integer_zoom(&self) -> u8 {
        self.zoom.floor() as u8
    }

    pub fn scale(&self) -> f64 {
        2f64.powf(self.zoom)
    }

    pub fn world_size(&self) -> f64 {
        TILE_SIZE * self.scale()
    }

    pub fn bearing(&self) -> Rad<f64> {
        self.bearing
    }

    pub fn pitch(&self) -> Rad<f64> {
        self.pitch
    }

    pub fn camera_to_center_distance(&self) -> f64 {
        0.5 * self.height / (self.fov.0 / 2.0).tan()
    }

    /// Center of the viewport in world pixels at the current zoom.
    fn center_point(&self) -> TileCoordinate {
        Projection::project_with_world_size(&self.center, self.world_size())
    }

    /// Distance to the furthest visible fragment. Past the horizon this is clamped by a tiny
    /// ground angle.
    fn far_z(&self) -> f64 {
        let camera_to_center_distance = self.camera_to_center_distance();
        let half_fov = self.fov.0 / 2.0;
        let ground_angle = FRAC_PI_2 + self.pitch.0;
        let top_half_surface_distance = half_fov.sin() * camera_to_center_distance
            / clamp(PI - ground_angle - half_fov, 0.01, PI - 0.01).sin();
        ((FRAC_PI_2 - self.pitch.0).cos() * top_half_surface_distance + camera_to_center_distance)
            * 1.01
    }

    /// Matrix transforming world pixels into clip space.
    pub fn proj_matrix(&self) -> Matrix4<f64> {
        let center = self.center_point();
        let near_z = self.height / 50.0;
        let perspective = cgmath::perspective(
            self.fov,
            self.width / self.height,
            near_z,
            self.far_z(),
        );

        perspective
            * Matrix4::from_nonuniform_scale(1.0, -1.0, 1.0)
            * Matrix4::from_translation(Vector3::new(
                0.0,
                0.0,
                -self.camera_to_center_distance(),
            ))
            * Matrix4::from_angle_x(self.pitch)
            * Matrix4::from_angle_z(-self.bearing)
            * Matrix4::from_translation(Vector3::new(-center.x, -center.y, 0.0))
    }

    /// Matrix transforming tile units of `tile_id` into clip space.
    pub fn matrix_for_tile(&self, tile_id: &UnwrappedTileID) -> Matrix4<f64> {
        let tile_scale = self.world_size() / tile_id.canonical.dimension() as f64;
        self.proj_matrix()
            * Matrix4::from_translation(Vector3::new(
                tile_id.unwrapped_x() as f64 * tile_scale,
                tile_id.canonical.y as f64 * tile_scale,
                0.0,
            ))
            * Matrix4::from_nonuniform_scale(tile_scale / EXTENT, tile_scale / EXTENT, 1.0)
    }

    /// Converts a clip space position to screen pixels.
    pub fn clip_to_screen(&self, clip: &Vector4<f64>) -> ScreenCoordinate {
        ScreenCoordinate::new(
            (clip.x / clip.w + 1.0) / 2.0 * self.width,
            (1.0 - clip.y / clip.w) / 2.0 * self.height,
        )
    }

    pub fn lat_lng_to_screen_coordinate(&self, position: &LatLng) -> ScreenCoordinate {
        let point = Projection::project_with_world_size(position, self.world_size());
        let clip = self.proj_matrix() * Vector4::new(point.x, point.y, 0.0, 1.0);
        self.clip_to_screen(&clip)
    }

    /// Intersects the ray through `point` with the ground plane. The result is in world pixels
    /// at the current zoom.
    fn screen_to_world(&self, point: &ScreenCoordinate) -> Option<TileCoordinate> {
        let inverted = self.proj_matrix().invert()?;

        let ndc_x = 2.0 * point.x / self.width - 1.0;
        let ndc_y = 1.0 - 2.0 * point.y / self.height;

        let near = inverted * Vector4::new(ndc_x, ndc_y, -1.0, 1.0);
        let far = inverted * Vector4::new(ndc_x, ndc_y, 1.0, 1.0);

        let (x0, y0, z0) = (near.x / near.w, near.y / near.w, near.z / near.w);
        let (x1, y1, z1) = (far.x / far.w, far.y / far.w, far.z / far.w);

        let t = if z0 == z1 { 0.0 } else { (0.0 - z0) / (z1 - z0) };

        Some(TileCoordinate::new(
            x0 + (x1 - x0) * t,
            y0 + (y1 - y0) * t,
        ))
    }

    /// Position under `point` in tile units at zoom level `z`.
    pub fn screen_coordinate_to_tile_coordinate(
        &self,
        point: &ScreenCoordinate,
        z: u8,
    ) -> Option<TileCoordinate> {
        let world = self.screen_to_world(point)?;
        let scale = 2f64.powi(z as i32) / self.world_size();
        Some(TileCoordinate::new(world.x * scale, world.y * scale))
    }

    pub fn screen_coordinate_to_lat_lng(&self, point: &ScreenCoordinate) -> Option<LatLng> {
        let world = self.screen_to_world(point)?;
        Some(Projection::unproject(&world, self.world_size()))
    }
}
