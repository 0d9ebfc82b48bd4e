//! Buckets hold the data of one style layer within one tile, ready for upload to the GPU.

use std::fmt;

use bytemuck::Pod;

use crate::tessellation::{IndexDataType, TessellatedBuffer};

pub mod circle;
pub mod fill;
pub mod fill_extrusion;
pub mod heatmap;
pub mod hillshade;
pub mod line;
pub mod raster;
pub mod symbol;

pub use circle::CircleBucket;
pub use fill::FillBucket;
pub use fill_extrusion::FillExtrusionBucket;
pub use heatmap::HeatmapBucket;
pub use hillshade::HillshadeBucket;
pub use line::LineBucket;
pub use raster::RasterBucket;
pub use symbol::SymbolBucket;

/// Opaque handle of a buffer created by an [`UploadPass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Opaque handle of a texture created by an [`UploadPass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    /// Single channel elevations.
    R32Float,
}

/// The graphics layer buckets upload their data to. Implementations may only be used while the
/// graphics context is active.
pub trait UploadPass {
    fn create_vertex_buffer(&mut self, data: &[u8], stride: usize) -> BufferHandle;
    fn create_index_buffer(&mut self, data: &[u8]) -> BufferHandle;
    fn update_vertex_buffer(&mut self, buffer: BufferHandle, data: &[u8]);
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: &[u8],
    ) -> TextureHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryBuffers {
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
}

/// Tessellated vertices and indices of a layer together with the buffers they were uploaded to.
pub struct GeometryBucket<V> {
    pub buffer: TessellatedBuffer<V, IndexDataType>,
    uploaded: Option<GeometryBuffers>,
}

impl<V> Default for GeometryBucket<V> {
    fn default() -> Self {
        Self {
            buffer: TessellatedBuffer::default(),
            uploaded: None,
        }
    }
}

impl<V> fmt::Debug for GeometryBucket<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryBucket")
            .field("vertices", &self.buffer.buffer.vertices.len())
            .field("indices", &self.buffer.buffer.indices.len())
            .field("uploaded", &self.uploaded)
            .finish()
    }
}

impl<V: Pod> GeometryBucket<V> {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.buffer.buffer.vertices.len()
    }

    pub fn needs_upload(&self) -> bool {
        self.uploaded.is_none() && !self.is_empty()
    }

    pub fn buffers(&self) -> Option<GeometryBuffers> {
        self.uploaded
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        if !self.needs_upload() {
            return;
        }
        self.uploaded = Some(GeometryBuffers {
            vertices: pass
                .create_vertex_buffer(self.buffer.vertex_bytes(), std::mem::size_of::<V>()),
            indices: pass.create_index_buffer(self.buffer.index_bytes()),
        });
    }
}

/// A vertex attribute with one value per vertex, such as line widths.
#[derive(Debug, Default)]
pub struct VertexAttribute {
    pub values: Vec<f32>,
    uploaded: Option<BufferHandle>,
}

impl VertexAttribute {
    /// Repeats `value` until there is one value per vertex.
    pub fn fill_to(&mut self, vertex_count: usize, value: f32) {
        self.values.resize(vertex_count.max(self.values.len()), value);
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.uploaded
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        if self.uploaded.is_none() && !self.values.is_empty() {
            self.uploaded = Some(pass.create_vertex_buffer(
                bytemuck::cast_slice(&self.values),
                std::mem::size_of::<f32>(),
            ));
        }
    }
}

/// The data of one layer within one tile. Each layer type has its own layout.
#[derive(Debug)]
pub enum Bucket {
    Fill(FillBucket),
    Line(LineBucket),
    Circle(CircleBucket),
    Heatmap(HeatmapBucket),
    FillExtrusion(FillExtrusionBucket),
    Raster(RasterBucket),
    Hillshade(HillshadeBucket),
    Symbol(SymbolBucket),
}

impl Bucket {
    pub fn has_data(&self) -> bool {
        match self {
            Bucket::Fill(bucket) => !bucket.geometry.is_empty(),
            Bucket::Line(bucket) => !bucket.geometry.is_empty(),
            Bucket::Circle(bucket) => !bucket.geometry.is_empty(),
            Bucket::Heatmap(bucket) => !bucket.geometry.is_empty(),
            Bucket::FillExtrusion(bucket) => !bucket.geometry.is_empty(),
            Bucket::Raster(_) | Bucket::Hillshade(_) => true,
            Bucket::Symbol(bucket) => bucket.has_data(),
        }
    }

    pub fn needs_upload(&self) -> bool {
        match self {
            Bucket::Fill(bucket) => bucket.geometry.needs_upload(),
            Bucket::Line(bucket) => bucket.geometry.needs_upload(),
            Bucket::Circle(bucket) => bucket.geometry.needs_upload(),
            Bucket::Heatmap(bucket) => bucket.geometry.needs_upload(),
            Bucket::FillExtrusion(bucket) => bucket.geometry.needs_upload(),
            Bucket::Raster(bucket) => bucket.needs_upload(),
            Bucket::Hillshade(bucket) => bucket.needs_upload(),
            Bucket::Symbol(bucket) => bucket.needs_upload(),
        }
    }

    /// Creates the buffers and textures of the bucket once and refreshes symbol opacities.
    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        match self {
            Bucket::Fill(bucket) => bucket.geometry.upload(pass),
            Bucket::Line(bucket) => bucket.upload(pass),
            Bucket::Circle(bucket) => bucket.upload(pass),
            Bucket::Heatmap(bucket) => bucket.upload(pass),
            Bucket::FillExtrusion(bucket) => bucket.geometry.upload(pass),
            Bucket::Raster(bucket) => bucket.upload(pass),
            Bucket::Hillshade(bucket) => bucket.upload(pass),
            Bucket::Symbol(bucket) => bucket.upload(pass),
        }
    }

    pub fn as_symbol(&self) -> Option<&SymbolBucket> {
        match self {
            Bucket::Symbol(bucket) => Some(bucket),
            _ => None,
        }
    }

    pub fn as_symbol_mut(&mut self) -> Option<&mut SymbolBucket> {
        match self {
            Bucket::Symbol(bucket) => Some(bucket),
            _ => None,
        }
    }
}
