//! Vertices and collision geometry of text and icon labels.

use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use bytemuck::{Pod, Zeroable};

use crate::{
    bucket::{BufferHandle, GeometryBuffers, UploadPass},
    coords::EXTENT,
    style::layer::StyleLayer,
    tessellation::IndexDataType,
    text::{anchor::Anchor, collision_feature::CollisionFeature},
    tile::{geometry_tile_data::GeometryTileFeature, tile_id::UnwrappedTileID},
};

/// Anchor positions are compared on a grid of this many cells per world, independent of zoom.
const CROSS_TILE_GRID: f64 = 65536.0;

/// Identifies a label independent of the tile it was laid out in.
///
/// The same feature of the same layer at the same position gets the same id in a parent tile, a
/// child tile or a reparsed tile, which lets its opacity carry over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrossTileId(pub u64);

impl CrossTileId {
    pub fn new(
        feature: &GeometryTileFeature,
        layer_id: &str,
        sort_key: f64,
        tile: &UnwrappedTileID,
        anchor: &Anchor,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        match feature.id {
            Some(id) => id.hash(&mut hasher),
            None => serde_json::Value::Object(feature.properties.clone())
                .to_string()
                .hash(&mut hasher),
        }
        layer_id.hash(&mut hasher);
        sort_key.to_bits().hash(&mut hasher);

        let dimension = tile.canonical.dimension() as f64;
        let world = |tile_coordinate: f64, local: f64| {
            ((tile_coordinate + local / EXTENT) / dimension * CROSS_TILE_GRID).round() as i64
        };
        world(tile.unwrapped_x() as f64, anchor.point.x).hash(&mut hasher);
        world(tile.canonical.y as f64, anchor.point.y).hash(&mut hasher);
        Self(hasher.finish())
    }
}

static NEXT_BUCKET_INSTANCE_ID: AtomicU32 = AtomicU32::new(1);

/// Numbers symbol buckets so that collision queries can refer back to them.
pub fn next_bucket_instance_id() -> u32 {
    NEXT_BUCKET_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Corner of a glyph or icon quad: the anchor in tile units plus the offset in pixels.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SymbolVertex {
    pub anchor: [f32; 2],
    pub offset: [f32; 2],
}

/// The opacity a vertex is currently drawn with and the one it fades to.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct OpacityVertex {
    pub opacity: f32,
    pub target_opacity: f32,
}

/// Quads of either the texts or the icons of a layer.
#[derive(Default)]
pub struct SymbolBuffers {
    pub vertices: Vec<SymbolVertex>,
    pub indices: Vec<IndexDataType>,
    /// One entry per vertex, rewritten by placement.
    pub opacity: Vec<OpacityVertex>,
    handles: Option<GeometryBuffers>,
    opacity_handle: Option<BufferHandle>,
    opacity_dirty: bool,
}

impl fmt::Debug for SymbolBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolBuffers")
            .field("vertices", &self.vertices.len())
            .field("handles", &self.handles)
            .field("opacity_dirty", &self.opacity_dirty)
            .finish()
    }
}

impl SymbolBuffers {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Adds a quad spanning `top_left` to `bottom_right` pixels around `anchor` and returns the
    /// index of its first vertex.
    pub fn add_quad(&mut self, anchor: [f32; 2], top_left: [f32; 2], bottom_right: [f32; 2]) -> usize {
        let first = self.vertices.len();
        for offset in [
            top_left,
            [bottom_right[0], top_left[1]],
            bottom_right,
            [top_left[0], bottom_right[1]],
        ] {
            self.vertices.push(SymbolVertex { anchor, offset });
            self.opacity.push(OpacityVertex::default());
        }
        let index = first as IndexDataType;
        self.indices
            .extend_from_slice(&[index, index + 1, index + 2, index, index + 2, index + 3]);
        first
    }

    /// Sets the opacity of a range of vertices. Returns whether anything changed.
    pub fn set_opacity(&mut self, vertices: Range<usize>, opacity: OpacityVertex) -> bool {
        let mut changed = false;
        for vertex in &mut self.opacity[vertices] {
            if *vertex != opacity {
                *vertex = opacity;
                changed = true;
            }
        }
        self.opacity_dirty |= changed;
        changed
    }

    pub fn handles(&self) -> Option<GeometryBuffers> {
        self.handles
    }

    fn needs_upload(&self) -> bool {
        !self.is_empty() && (self.handles.is_none() || self.opacity_dirty)
    }

    fn upload(&mut self, pass: &mut dyn UploadPass) {
        if self.is_empty() {
            return;
        }
        if self.handles.is_none() {
            self.handles = Some(GeometryBuffers {
                vertices: pass.create_vertex_buffer(
                    bytemuck::cast_slice(&self.vertices),
                    std::mem::size_of::<SymbolVertex>(),
                ),
                indices: pass.create_index_buffer(bytemuck::cast_slice(&self.indices)),
            });
        }
        match self.opacity_handle {
            Some(handle) if self.opacity_dirty => {
                pass.update_vertex_buffer(handle, bytemuck::cast_slice(&self.opacity))
            }
            Some(_) => {}
            None => {
                self.opacity_handle = Some(pass.create_vertex_buffer(
                    bytemuck::cast_slice(&self.opacity),
                    std::mem::size_of::<OpacityVertex>(),
                ))
            }
        }
        self.opacity_dirty = false;
    }
}

/// The quads and collision geometry of a text or an icon.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSymbol {
    pub collision: CollisionFeature,
    pub vertex_start: usize,
    pub vertex_count: usize,
}

impl PlacedSymbol {
    pub fn vertices(&self) -> Range<usize> {
        self.vertex_start..self.vertex_start + self.vertex_count
    }
}

/// A label at one anchor of a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInstance {
    pub cross_tile_id: CrossTileId,
    pub anchor: Anchor,
    /// Index of the feature within its source layer.
    pub feature_index: usize,
    pub sort_key: f64,
    pub text: Option<PlacedSymbol>,
    pub icon: Option<PlacedSymbol>,
}

#[derive(Debug)]
pub struct SymbolBucket {
    pub layer: Arc<StyleLayer>,
    /// `text-size` and `icon-size` evaluated at the zoom level of the tile.
    pub text_size: f64,
    pub icon_size: f64,
    pub pitch_with_map: bool,
    /// Ordered by sort key, then by feature order.
    pub instances: Vec<SymbolInstance>,
    pub text: SymbolBuffers,
    pub icon: SymbolBuffers,
    /// Set while the bucket replaces one of a previous layout and has not been placed yet.
    pub just_reloaded: bool,
    pub bucket_instance_id: u32,
}

impl SymbolBucket {
    pub fn new(layer: Arc<StyleLayer>, text_size: f64, icon_size: f64, pitch_with_map: bool) -> Self {
        Self {
            layer,
            text_size,
            icon_size,
            pitch_with_map,
            instances: Vec::new(),
            text: SymbolBuffers::default(),
            icon: SymbolBuffers::default(),
            just_reloaded: false,
            bucket_instance_id: next_bucket_instance_id(),
        }
    }

    pub fn has_data(&self) -> bool {
        !self.instances.is_empty()
    }

    pub fn needs_upload(&self) -> bool {
        self.text.needs_upload() || self.icon.needs_upload()
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        self.text.upload(pass);
        self.icon.upload(pass);
    }

    /// Sorts instances by sort key. The sort is stable so features keep their order otherwise.
    pub fn sort_instances(&mut self) {
        self.instances
            .sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));
    }
}
