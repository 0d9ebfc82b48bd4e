//! Tessellation for lines and polygons is implemented here.

use bytemuck::{Pod, Zeroable};
use lyon::tessellation::{
    FillVertex, FillVertexConstructor, StrokeVertex, StrokeVertexConstructor, VertexBuffers,
};

pub mod tile_tessellator;

pub const DEFAULT_TOLERANCE: f32 = 0.02;

/// Vertex buffers index data type.
pub type IndexDataType = u32;

/// Vertex of fills, lines, circles and heatmap points in tile units.
///
/// Lines are extruded along `normal` by the line width. Circles use it as the corner of the quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderVertex {
    pub position: [f32; 2],
    pub normal: [f32; 2],
}

impl ShaderVertex {
    pub fn new(position: [f32; 2], normal: [f32; 2]) -> Self {
        Self { position, normal }
    }
}

/// Vertex of extruded polygons. `z` is the height in meters.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ExtrusionVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// Constructor for Fill and Stroke vertices.
pub struct VertexConstructor {}

impl FillVertexConstructor<ShaderVertex> for VertexConstructor {
    fn new_vertex(&mut self, vertex: FillVertex) -> ShaderVertex {
        ShaderVertex::new(vertex.position().to_array(), [0.0, 0.0])
    }
}

impl StrokeVertexConstructor<ShaderVertex> for VertexConstructor {
    fn new_vertex(&mut self, vertex: StrokeVertex) -> ShaderVertex {
        ShaderVertex::new(
            vertex.position_on_path().to_array(),
            vertex.normal().to_array(),
        )
    }
}

/// Constructs the roof vertices of an extrusion.
pub struct RoofConstructor {
    pub height: f32,
}

impl FillVertexConstructor<ExtrusionVertex> for RoofConstructor {
    fn new_vertex(&mut self, vertex: FillVertex) -> ExtrusionVertex {
        let [x, y] = vertex.position().to_array();
        ExtrusionVertex {
            position: [x, y, self.height],
            normal: [0.0, 0.0, 1.0],
        }
    }
}

/// Tessellated geometry of a bucket together with the number of indices each feature produced.
#[derive(Clone, Debug)]
pub struct TessellatedBuffer<V, I> {
    pub buffer: VertexBuffers<V, I>,
    /// Holds for each feature the count of indices.
    pub feature_indices: Vec<u32>,
}

impl<V, I> Default for TessellatedBuffer<V, I> {
    fn default() -> Self {
        Self {
            buffer: VertexBuffers::new(),
            feature_indices: Vec::new(),
        }
    }
}

impl<V, I> TessellatedBuffer<V, I> {
    pub fn is_empty(&self) -> bool {
        self.buffer.indices.is_empty()
    }

    /// Records the indices added since the last call as one feature.
    pub fn end_feature(&mut self) {
        let recorded: u32 = self.feature_indices.iter().sum();
        let total = self.buffer.indices.len() as u32;
        self.feature_indices.push(total - recorded);
    }
}

impl<V: Pod, I: Pod> TessellatedBuffer<V, I> {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.buffer.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.buffer.indices)
    }
}
