use std::fmt;

use bitflags::bitflags;
use image::RgbaImage;

use crate::{
    bucket::{raster::decode_image, TextureFormat, TextureHandle, UploadPass},
    error::ParseError,
    style::source::DemEncoding,
};

/// Elevations of a raster-dem tile in meters with a one pixel border.
///
/// The border initially repeats the outermost pixels of the tile and is replaced by the pixels
/// of neighbouring tiles once they are loaded, so that slopes are continuous across tile edges.
#[derive(Clone, PartialEq)]
pub struct DemData {
    dim: i32,
    stride: i32,
    elevations: Vec<f32>,
}

impl fmt::Debug for DemData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemData").field("dim", &self.dim).finish()
    }
}

fn unpack(pixel: [u8; 4], encoding: DemEncoding) -> f32 {
    let [r, g, b, _] = pixel.map(f64::from);
    let elevation = match encoding {
        DemEncoding::Mapbox => -10000.0 + (r * 256.0 * 256.0 + g * 256.0 + b) * 0.1,
        DemEncoding::Terrarium => r * 256.0 + g + b / 256.0 - 32768.0,
    };
    elevation as f32
}

impl DemData {
    pub fn new(image: &RgbaImage, encoding: DemEncoding) -> Result<Self, ParseError> {
        if image.width() != image.height() || image.width() == 0 {
            return Err(ParseError::Image(format!(
                "DEM tiles must be square, got {}x{}",
                image.width(),
                image.height()
            )));
        }
        let dim = image.width() as i32;
        let stride = dim + 2;
        let mut dem = Self {
            dim,
            stride,
            elevations: vec![0.0; (stride * stride) as usize],
        };
        for (x, y, pixel) in image.enumerate_pixels() {
            dem.set(x as i32, y as i32, unpack(pixel.0, encoding));
        }

        for x in 0..dim {
            dem.set(-1, x, dem.get(0, x));
            dem.set(dim, x, dem.get(dim - 1, x));
            dem.set(x, -1, dem.get(x, 0));
            dem.set(x, dim, dem.get(x, dim - 1));
        }
        dem.set(-1, -1, dem.get(0, 0));
        dem.set(dim, -1, dem.get(dim - 1, 0));
        dem.set(-1, dim, dem.get(0, dim - 1));
        dem.set(dim, dim, dem.get(dim - 1, dim - 1));
        Ok(dem)
    }

    pub fn decode(data: &[u8], encoding: DemEncoding) -> Result<Self, ParseError> {
        Self::new(&decode_image(data)?, encoding)
    }

    pub fn dim(&self) -> i32 {
        self.dim
    }

    pub fn stride(&self) -> i32 {
        self.stride
    }

    /// Elevations of the tile including the border, row by row.
    pub fn elevations(&self) -> &[f32] {
        &self.elevations
    }

    fn index(&self, x: i32, y: i32) -> usize {
        debug_assert!(x >= -1 && x <= self.dim && y >= -1 && y <= self.dim);
        ((y + 1) * self.stride + (x + 1)) as usize
    }

    /// Elevation at pixel `(x, y)`. Coordinates range from -1 to `dim` to address the border.
    pub fn get(&self, x: i32, y: i32) -> f32 {
        self.elevations[self.index(x, y)]
    }

    fn set(&mut self, x: i32, y: i32, elevation: f32) {
        let index = self.index(x, y);
        self.elevations[index] = elevation;
    }

    /// Copies the pixels of the neighbour at offset `(dx, dy)` tiles into the border facing it.
    pub fn backfill_border(&mut self, neighbour: &DemData, dx: i32, dy: i32) {
        if neighbour.dim != self.dim {
            log::warn!(
                "skipping DEM backfill between tiles of size {} and {}",
                self.dim,
                neighbour.dim
            );
            return;
        }
        let dim = self.dim;
        let (mut x_min, mut x_max) = (dx * dim, dx * dim + dim);
        let (mut y_min, mut y_max) = (dy * dim, dy * dim + dim);
        match dx {
            -1 => x_min = x_max - 1,
            1 => x_max = x_min + 1,
            _ => {}
        }
        match dy {
            -1 => y_min = y_max - 1,
            1 => y_max = y_min + 1,
            _ => {}
        }
        let (ox, oy) = (-dx * dim, -dy * dim);
        for y in y_min..y_max {
            for x in x_min..x_max {
                self.set(x, y, neighbour.get(x + ox, y + oy));
            }
        }
    }
}

bitflags! {
    /// The neighbouring tiles whose pixels were copied into the border of a DEM.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DemNeighbors: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const TOP_LEFT = 1 << 2;
        const TOP_CENTER = 1 << 3;
        const TOP_RIGHT = 1 << 4;
        const BOTTOM_LEFT = 1 << 5;
        const BOTTOM_CENTER = 1 << 6;
        const BOTTOM_RIGHT = 1 << 7;
    }
}

impl DemNeighbors {
    /// The flag of the neighbour at tile offset `(dx, dy)`.
    pub fn from_offset(dx: i32, dy: i32) -> Self {
        match (dx, dy) {
            (-1, 0) => DemNeighbors::LEFT,
            (1, 0) => DemNeighbors::RIGHT,
            (-1, -1) => DemNeighbors::TOP_LEFT,
            (0, -1) => DemNeighbors::TOP_CENTER,
            (1, -1) => DemNeighbors::TOP_RIGHT,
            (-1, 1) => DemNeighbors::BOTTOM_LEFT,
            (0, 1) => DemNeighbors::BOTTOM_CENTER,
            (1, 1) => DemNeighbors::BOTTOM_RIGHT,
            _ => DemNeighbors::empty(),
        }
    }
}

#[derive(Debug)]
pub struct HillshadeBucket {
    pub dem: DemData,
    pub backfilled: DemNeighbors,
    texture: Option<TextureHandle>,
    dirty: bool,
}

impl HillshadeBucket {
    pub fn new(dem: DemData) -> Self {
        Self {
            dem,
            backfilled: DemNeighbors::empty(),
            texture: None,
            dirty: true,
        }
    }

    /// Takes over the border facing the neighbour at `(dx, dy)`. Each neighbour is only applied
    /// once.
    pub fn backfill(&mut self, neighbour: &DemData, dx: i32, dy: i32) {
        let flag = DemNeighbors::from_offset(dx, dy);
        if flag.is_empty() || self.backfilled.contains(flag) {
            return;
        }
        self.dem.backfill_border(neighbour, dx, dy);
        self.backfilled.insert(flag);
        self.dirty = true;
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn needs_upload(&self) -> bool {
        self.dirty
    }

    /// Uploads the elevations. A backfilled border requires uploading the texture again.
    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        if !self.dirty {
            return;
        }
        let stride = self.dem.stride() as u32;
        self.texture = Some(pass.create_texture(
            stride,
            stride,
            TextureFormat::R32Float,
            bytemuck::cast_slice(self.dem.elevations()),
        ));
        self.dirty = false;
    }
}
