use std::{fmt, sync::Arc};

use image::RgbaImage;

use crate::{
    bucket::{TextureFormat, TextureHandle, UploadPass},
    error::ParseError,
};

/// Decodes PNG, JPEG or WebP tile bytes into RGBA pixels.
pub fn decode_image(data: &[u8]) -> Result<RgbaImage, ParseError> {
    image::load_from_memory(data)
        .map(|image| image.to_rgba8())
        .map_err(|error| ParseError::Image(error.to_string()))
}

/// A decoded raster tile. The image is shared with tiles substituting for the same data.
pub struct RasterBucket {
    pub image: Arc<RgbaImage>,
    texture: Option<TextureHandle>,
}

impl fmt::Debug for RasterBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBucket")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("texture", &self.texture)
            .finish()
    }
}

impl RasterBucket {
    pub fn new(image: impl Into<Arc<RgbaImage>>) -> Self {
        Self {
            image: image.into(),
            texture: None,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        decode_image(data).map(|image| Self::new(image))
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn needs_upload(&self) -> bool {
        self.texture.is_none()
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        if self.texture.is_none() {
            self.texture = Some(pass.create_texture(
                self.image.width(),
                self.image.height(),
                TextureFormat::Rgba8,
                self.image.as_raw(),
            ));
        }
    }
}
