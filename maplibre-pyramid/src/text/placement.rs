//! Collision detection across all symbol layers and the fading of labels between placements.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    time::Duration,
};

use cgmath::Matrix4;
use instant::Instant;
use lyon::geom::euclid::Vector2D;

use crate::{
    bucket::symbol::{CrossTileId, OpacityVertex, SymbolBucket, SymbolInstance},
    options::{MapMode, MapOptions, DEFAULT_FADE_DURATION},
    render::transform_state::TransformState,
    style::layer::{SymbolPlacement, SymbolProperties},
    text::{
        collision_feature::ProjectedCollisionBox,
        collision_index::{CollisionIndex, IntersectStatus},
        grid_index::ScreenBox,
    },
    tile::{feature_index::IndexedSubfeature, tile_id::OverscaledTileID},
};

/// Opacity of a text or icon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityState {
    pub opacity: f64,
    pub placed: bool,
}

impl OpacityState {
    /// The state of a symbol seen for the first time. Symbols which should not fade in start
    /// fully visible.
    pub fn new(placed: bool, skip_fade: bool) -> Self {
        Self {
            opacity: if skip_fade && placed { 1.0 } else { 0.0 },
            placed,
        }
    }

    /// Moves the previous opacity `increment` closer to the target of the previous placement.
    pub fn from_previous(previous: &OpacityState, increment: f64, placed: bool) -> Self {
        let step = if previous.placed {
            increment
        } else {
            -increment
        };
        Self {
            opacity: (previous.opacity + step).clamp(0.0, 1.0),
            placed,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.opacity == 0.0 && !self.placed
    }

    fn vertex(&self) -> OpacityVertex {
        OpacityVertex {
            opacity: self.opacity as f32,
            target_opacity: if self.placed { 1.0 } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointOpacityState {
    pub icon: OpacityState,
    pub text: OpacityState,
}

impl JointOpacityState {
    pub fn new(placed_text: bool, placed_icon: bool, skip_fade: bool) -> Self {
        Self {
            icon: OpacityState::new(placed_icon, skip_fade),
            text: OpacityState::new(placed_text, skip_fade),
        }
    }

    pub fn from_previous(
        previous: &JointOpacityState,
        increment: f64,
        placed_text: bool,
        placed_icon: bool,
    ) -> Self {
        Self {
            icon: OpacityState::from_previous(&previous.icon, increment, placed_icon),
            text: OpacityState::from_previous(&previous.text, increment, placed_text),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.icon.is_hidden() && self.text.is_hidden()
    }
}

/// Outcome of placing one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointPlacement {
    pub text: bool,
    pub icon: bool,
    /// The symbol appears without fading in, either because it was offscreen or its tile was
    /// just reloaded.
    pub skip_fade: bool,
}

impl JointPlacement {
    pub fn placed(&self) -> bool {
        self.text || self.icon
    }
}

/// A collision group id plus whether labels only collide within the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionGroup {
    pub id: u16,
    pub exclusive: bool,
}

impl CollisionGroup {
    pub fn collides_with(&self, feature: &IndexedSubfeature) -> bool {
        !self.exclusive || feature.collision_group_id == self.id
    }
}

/// Assigns each source its own collision group unless labels collide across sources.
#[derive(Debug, Clone)]
pub struct CollisionGroups {
    cross_source_collisions: bool,
    max_group_id: u16,
    groups: HashMap<String, u16>,
}

impl CollisionGroups {
    pub fn new(cross_source_collisions: bool) -> Self {
        Self {
            cross_source_collisions,
            max_group_id: 0,
            groups: HashMap::new(),
        }
    }

    pub fn get(&mut self, source_id: &str) -> CollisionGroup {
        if self.cross_source_collisions {
            return CollisionGroup {
                id: 0,
                exclusive: false,
            };
        }
        if let Some(id) = self.groups.get(source_id) {
            return CollisionGroup {
                id: *id,
                exclusive: true,
            };
        }
        self.max_group_id += 1;
        self.groups.insert(source_id.to_string(), self.max_group_id);
        CollisionGroup {
            id: self.max_group_id,
            exclusive: true,
        }
    }
}

/// A symbol bucket of one tile handed to placement.
#[derive(Clone, Copy)]
pub struct BucketPlacementData<'a> {
    pub source_id: &'a str,
    pub tile: OverscaledTileID,
    pub bucket: &'a SymbolBucket,
}

/// What is needed to resolve collision query results of a bucket back to features.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedQueryData {
    pub source_id: String,
    pub tile: OverscaledTileID,
    pub layer_id: String,
}

struct PlacementContext<'a> {
    bucket: &'a SymbolBucket,
    layout: &'a SymbolProperties,
    pos_matrix: Matrix4<f64>,
    tile_units_per_pixel: f64,
    collision_group: CollisionGroup,
    avoid_edges: Option<ScreenBox>,
    always_show_text: bool,
    always_show_icon: bool,
}

impl<'a> PlacementContext<'a> {
    fn has_text(&self) -> bool {
        !self.bucket.text.is_empty()
    }

    fn has_icon(&self) -> bool {
        !self.bucket.icon.is_empty()
    }
}

/// Label shown irrespective of collisions if it overlaps anyway. Waits for placement if it
/// depends on a partner which may not overlap.
fn always_show(layout: &SymbolProperties, has_text: bool, has_icon: bool) -> (bool, bool) {
    (
        layout.text_allow_overlap
            && (layout.icon_allow_overlap || !has_icon || layout.icon_optional),
        layout.icon_allow_overlap
            && (layout.text_allow_overlap || !has_text || layout.text_optional),
    )
}

/// A symbol crossing tile edges, placed first in [`MapMode::Tile`].
struct Intersection<'a> {
    instance: &'a SymbolInstance,
    data: BucketPlacementData<'a>,
    status: IntersectStatus,
    priority: usize,
}

/// Orders intersections: earlier layers first, then symbols crossing more borders, then larger
/// cut-offs, then by position.
fn compare_intersections(a: &Intersection, b: &Intersection) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.status.flags.bits().cmp(&a.status.flags.bits()))
        .then_with(|| b.status.min_section_length.cmp(&a.status.min_section_length))
        .then_with(|| a.instance.anchor.point.y.total_cmp(&b.instance.anchor.point.y))
        .then_with(|| a.instance.anchor.point.x.total_cmp(&b.instance.anchor.point.x))
        .then_with(|| a.instance.cross_tile_id.cmp(&b.instance.cross_tile_id))
}

/// Places the symbols of all layers for one viewport and tracks their opacities over time.
///
/// A placement is computed from scratch each time but starts its opacities from the previous
/// placement, so labels fade instead of popping.
pub struct Placement {
    collision_index: CollisionIndex,
    map_mode: MapMode,
    fade_duration: Duration,
    placement_zoom: f64,
    commit_time: Instant,
    fade_start_time: Instant,
    prev_zoom_adjustment: f64,
    collision_groups: CollisionGroups,
    placements: HashMap<CrossTileId, JointPlacement>,
    opacities: HashMap<CrossTileId, JointOpacityState>,
    retained_query_data: HashMap<u32, RetainedQueryData>,
    prev: Option<Box<Placement>>,
}

impl Placement {
    pub fn new(
        transform_state: &TransformState,
        map_mode: MapMode,
        options: &MapOptions,
        prev: Option<Placement>,
    ) -> Self {
        let now = Instant::now();
        let prev = prev.map(|mut prev| {
            // Only one placement back is needed.
            prev.prev = None;
            Box::new(prev)
        });
        Self {
            collision_index: CollisionIndex::new(transform_state, map_mode),
            map_mode,
            fade_duration: options.fade_duration,
            placement_zoom: transform_state.zoom(),
            commit_time: now,
            fade_start_time: now,
            prev_zoom_adjustment: 0.0,
            collision_groups: CollisionGroups::new(options.cross_source_collisions),
            placements: HashMap::new(),
            opacities: HashMap::new(),
            retained_query_data: HashMap::new(),
            prev,
        }
    }

    fn transitions_enabled(&self) -> bool {
        self.map_mode == MapMode::Continuous
    }

    pub fn collision_index(&self) -> &CollisionIndex {
        &self.collision_index
    }

    pub fn commit_time(&self) -> Instant {
        self.commit_time
    }

    /// Runs collision detection over `layers`, given in paint order with the symbol buckets of
    /// each layer. Layers drawn on top are placed first.
    #[tracing::instrument(skip_all)]
    pub fn place_layers(&mut self, layers: &[Vec<BucketPlacementData>]) {
        let sorted: Vec<Vec<BucketPlacementData>> = layers
            .iter()
            .map(|buckets| {
                let mut buckets = buckets.clone();
                // Symbols of the most detailed tiles win over their duplicates in parents.
                buckets.sort_by(|a, b| {
                    b.tile
                        .overscaled_z
                        .cmp(&a.tile.overscaled_z)
                        .then_with(|| a.tile.cmp(&b.tile))
                });
                buckets
            })
            .collect();

        let mut seen_in_tile_mode = HashSet::new();
        if self.map_mode == MapMode::Tile {
            self.place_intersections(&sorted, &mut seen_in_tile_mode);
        }

        for buckets in sorted.iter().rev() {
            let mut seen = seen_in_tile_mode.clone();
            for data in buckets {
                self.place_bucket(*data, &mut seen);
            }
        }
        log::debug!(
            "placed {} of {} symbols",
            self.placements.values().filter(|p| p.placed()).count(),
            self.placements.len()
        );
    }

    fn context<'a>(&mut self, data: &BucketPlacementData<'a>) -> Option<PlacementContext<'a>> {
        let layout = data.bucket.layer.symbol()?;
        let state = self.collision_index.transform_state();
        let unwrapped = data.tile.to_unwrapped();
        let pos_matrix = state.matrix_for_tile(&unwrapped);
        let tile_units_per_pixel = unwrapped.pixels_to_tile_units(1.0, self.placement_zoom);

        let avoid_edges = layout.symbol_avoid_edges
            || (self.map_mode == MapMode::Tile
                && layout.symbol_placement == SymbolPlacement::Line);
        let avoid_edges = if avoid_edges {
            self.collision_index.project_tile_boundaries(&pos_matrix)
        } else {
            None
        };

        let (always_show_text, always_show_icon) = always_show(
            layout,
            !data.bucket.text.is_empty(),
            !data.bucket.icon.is_empty(),
        );
        Some(PlacementContext {
            bucket: data.bucket,
            layout,
            pos_matrix,
            tile_units_per_pixel,
            collision_group: self.collision_groups.get(data.source_id),
            avoid_edges,
            always_show_text,
            always_show_icon,
        })
    }

    fn place_bucket(&mut self, data: BucketPlacementData, seen: &mut HashSet<CrossTileId>) {
        let Some(ctx) = self.context(&data) else {
            return;
        };
        for instance in &data.bucket.instances {
            if seen.contains(&instance.cross_tile_id) {
                continue;
            }
            self.place_symbol(instance, &ctx);
            seen.insert(instance.cross_tile_id);
        }

        self.retained_query_data.insert(
            data.bucket.bucket_instance_id,
            RetainedQueryData {
                source_id: data.source_id.to_string(),
                tile: data.tile,
                layer_id: data.bucket.layer.id.clone(),
            },
        );
    }

    /// Places symbols crossing tile borders before all others, so that neighbouring tiles
    /// rendered independently agree on them.
    fn place_intersections(
        &mut self,
        layers: &[Vec<BucketPlacementData>],
        seen: &mut HashSet<CrossTileId>,
    ) {
        let mut intersections = Vec::new();
        let mut priority = 0;
        for buckets in layers.iter().rev() {
            for data in buckets {
                let Some(layout) = data.bucket.layer.symbol() else {
                    continue;
                };
                if layout.symbol_placement != SymbolPlacement::Point || layout.symbol_avoid_edges {
                    continue;
                }
                let pos_matrix = self
                    .collision_index
                    .transform_state()
                    .matrix_for_tile(&data.tile.to_unwrapped());
                let Some(tile_edges) = self.collision_index.project_tile_boundaries(&pos_matrix)
                else {
                    continue;
                };

                for instance in &data.bucket.instances {
                    let mut status = IntersectStatus::default();
                    let boxes = [&instance.text, &instance.icon];
                    for collision_box in boxes
                        .iter()
                        .filter_map(|symbol| symbol.as_ref()?.collision.boxes.first())
                    {
                        let intersects = self.collision_index.intersects_tile_edges(
                            collision_box,
                            Vector2D::zero(),
                            &pos_matrix,
                            &tile_edges,
                        );
                        status.flags |= intersects.flags;
                        status.min_section_length =
                            status.min_section_length.max(intersects.min_section_length);
                    }
                    if !status.flags.is_empty() {
                        intersections.push(Intersection {
                            instance,
                            data: *data,
                            status,
                            priority,
                        });
                    }
                }
                priority += 1;
            }
        }

        intersections.sort_by(compare_intersections);
        for intersection in intersections {
            if seen.contains(&intersection.instance.cross_tile_id) {
                continue;
            }
            let Some(ctx) = self.context(&intersection.data) else {
                continue;
            };
            self.place_symbol(intersection.instance, &ctx);
            seen.insert(intersection.instance.cross_tile_id);
        }
    }

    fn place_symbol(&mut self, instance: &SymbolInstance, ctx: &PlacementContext) -> JointPlacement {
        let group = ctx.collision_group;
        let predicate = |feature: &IndexedSubfeature| group.collides_with(feature);

        let mut offscreen = true;
        let mut text_boxes: Vec<ProjectedCollisionBox> = Vec::new();
        let mut icon_boxes: Vec<ProjectedCollisionBox> = Vec::new();
        let mut place_text = false;
        let mut place_icon = false;

        if let Some(text) = &instance.text {
            let placed = self.collision_index.place_feature(
                &text.collision,
                Vector2D::zero(),
                &ctx.pos_matrix,
                ctx.tile_units_per_pixel,
                ctx.layout.text_allow_overlap,
                ctx.avoid_edges.as_ref(),
                predicate,
            );
            place_text = placed.placed;
            offscreen &= placed.offscreen;
            text_boxes = placed.projected_boxes;
        }

        if let Some(icon) = &instance.icon {
            let placed = self.collision_index.place_feature(
                &icon.collision,
                Vector2D::zero(),
                &ctx.pos_matrix,
                ctx.tile_units_per_pixel,
                ctx.layout.icon_allow_overlap,
                ctx.avoid_edges.as_ref(),
                predicate,
            );
            place_icon = placed.placed;
            offscreen &= placed.offscreen;
            icon_boxes = placed.projected_boxes;
        }

        let icon_without_text = instance.text.is_none() || ctx.layout.text_optional;
        let text_without_icon = instance.icon.is_none() || ctx.layout.icon_optional;
        if !icon_without_text && !text_without_icon {
            place_text = place_text && place_icon;
            place_icon = place_text;
        } else if !text_without_icon {
            place_text = place_text && place_icon;
        } else if !icon_without_text {
            place_icon = place_text && place_icon;
        }

        let layer = &ctx.bucket.layer;
        let subfeature = IndexedSubfeature {
            bucket_instance_id: ctx.bucket.bucket_instance_id,
            collision_group_id: group.id,
            ..IndexedSubfeature::new(
                instance.feature_index,
                layer.source_layer.as_deref().unwrap_or_default(),
                &layer.id,
            )
        };
        if place_text {
            self.collision_index.insert_feature(
                &text_boxes,
                ctx.layout.text_ignore_placement,
                &subfeature,
            );
        }
        if place_icon {
            self.collision_index.insert_feature(
                &icon_boxes,
                ctx.layout.icon_ignore_placement,
                &subfeature,
            );
        }

        let result = JointPlacement {
            text: place_text || (ctx.always_show_text && ctx.has_text()),
            icon: place_icon || (ctx.always_show_icon && ctx.has_icon()),
            skip_fade: offscreen || ctx.bucket.just_reloaded,
        };
        // A result of a fading tile is superseded.
        self.placements.insert(instance.cross_tile_id, result);
        result
    }

    /// Derives the opacities of this placement from the previous one at `now`.
    pub fn commit(&mut self, now: Instant) {
        self.commit_time = now;
        self.fade_start_time = now;

        let prev = self.prev.take();
        if !self.transitions_enabled() {
            // Without transitions opacities jump to their final value.
            for (id, placement) in &self.placements {
                self.opacities
                    .insert(*id, JointOpacityState::new(placement.text, placement.icon, true));
            }
            return;
        }
        let Some(prev) = prev else {
            // Symbols of the first placement fade in from zero.
            for (id, placement) in &self.placements {
                self.opacities.insert(
                    *id,
                    JointOpacityState::new(placement.text, placement.icon, placement.skip_fade),
                );
            }
            return;
        };

        self.prev_zoom_adjustment = prev.zoom_adjustment(self.placement_zoom);
        let increment = prev.symbol_fade_change(now);
        let mut placement_changed = false;

        for (id, placement) in &self.placements {
            let opacity = match prev.opacities.get(id) {
                Some(previous) => {
                    placement_changed |= placement.icon != previous.icon.placed
                        || placement.text != previous.text.placed;
                    JointOpacityState::from_previous(
                        previous,
                        increment,
                        placement.text,
                        placement.icon,
                    )
                }
                None => {
                    placement_changed |= placement.icon || placement.text;
                    JointOpacityState::new(placement.text, placement.icon, placement.skip_fade)
                }
            };
            self.opacities.insert(*id, opacity);
        }

        // Symbols which disappeared keep fading out.
        for (id, previous) in &prev.opacities {
            if self.opacities.contains_key(id) {
                continue;
            }
            let opacity = JointOpacityState::from_previous(previous, increment, false, false);
            if !opacity.is_hidden() {
                self.opacities.insert(*id, opacity);
                placement_changed |= previous.icon.placed || previous.text.placed;
            }
        }

        if !placement_changed {
            self.fade_start_time = prev.fade_start_time;
        }
    }

    /// Writes the opacities of this placement into the vertices of `bucket`. Symbols whose id is
    /// in `seen` already showed up in another tile of the same layer and are hidden.
    pub fn update_bucket_opacities(&self, bucket: &mut SymbolBucket, seen: &mut HashSet<CrossTileId>) {
        let has_text = !bucket.text.is_empty();
        let has_icon = !bucket.icon.is_empty();
        let (text_default, icon_default) = bucket
            .layer
            .symbol()
            .map_or((false, false), |layout| always_show(layout, has_text, has_icon));
        // Symbols which may overlap are shown before placement ran on them.
        let default_state = JointOpacityState::new(text_default, icon_default, true);
        let duplicate_state = JointOpacityState::new(false, false, true);

        let SymbolBucket {
            instances,
            text,
            icon,
            ..
        } = bucket;
        for instance in instances.iter() {
            let state = if !seen.insert(instance.cross_tile_id) {
                duplicate_state
            } else {
                self.opacities
                    .get(&instance.cross_tile_id)
                    .copied()
                    .unwrap_or(default_state)
            };
            if let Some(placed) = &instance.text {
                text.set_opacity(placed.vertices(), state.text.vertex());
            }
            if let Some(placed) = &instance.icon {
                icon.set_opacity(placed.vertices(), state.icon.vertex());
            }
        }
        bucket.just_reloaded = false;
    }

    /// Progress of fading at `now` as a fraction of the fade duration.
    pub fn symbol_fade_change(&self, now: Instant) -> f64 {
        if self.transitions_enabled() && !self.fade_duration.is_zero() {
            now.saturating_duration_since(self.commit_time).as_secs_f64()
                / self.fade_duration.as_secs_f64()
                + self.prev_zoom_adjustment
        } else {
            1.0
        }
    }

    /// Whether labels are still fading at `now`.
    pub fn has_transitions(&self, now: Instant) -> bool {
        self.transitions_enabled()
            && now.saturating_duration_since(self.fade_start_time) < self.fade_duration
    }

    /// Labels overlap quickly when zooming out, so fading and placing speed up.
    pub fn zoom_adjustment(&self, zoom: f64) -> f64 {
        ((self.placement_zoom - zoom) / 1.5).max(0.0)
    }

    fn update_period(&self, zoom: f64) -> Duration {
        // Placements are never recomputed faster than the default fade duration.
        self.fade_duration
            .max(DEFAULT_FADE_DURATION)
            .mul_f64((1.0 - self.zoom_adjustment(zoom)).max(0.0))
    }

    /// Whether this placement is recent enough at `now` to skip placing again.
    pub fn still_recent(&self, now: Instant, zoom: f64) -> bool {
        self.transitions_enabled() && self.commit_time + self.update_period(zoom) > now
    }

    pub fn placement(&self, id: &CrossTileId) -> Option<&JointPlacement> {
        self.placements.get(id)
    }

    pub fn opacity(&self, id: &CrossTileId) -> Option<&JointOpacityState> {
        self.opacities.get(id)
    }

    /// Placed symbols intersecting `query` in screen pixels, grouped by bucket instance.
    pub fn query_rendered_symbols(&self, query: &ScreenBox) -> HashMap<u32, Vec<IndexedSubfeature>> {
        self.collision_index.query_rendered_symbols(query)
    }

    pub fn query_data(&self, bucket_instance_id: u32) -> Option<&RetainedQueryData> {
        self.retained_query_data.get(&bucket_instance_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, time::Duration};

    use instant::Instant;
    use lyon::geom::euclid::Point2D;

    use crate::{
        bucket::symbol::{CrossTileId, PlacedSymbol, SymbolBucket, SymbolInstance},
        coords::LatLng,
        options::{MapMode, MapOptions},
        render::transform_state::{CameraOptions, TransformState},
        style::layer::{LayerProperties, StyleLayer, SymbolProperties},
        text::{
            anchor::Anchor,
            collision_feature::{CollisionFeature, LabelBounds},
            grid_index::ScreenBox,
            placement::{
                BucketPlacementData, CollisionGroups, JointOpacityState, OpacityState, Placement,
            },
        },
        tile::{feature_index::IndexedSubfeature, tile_id::OverscaledTileID},
    };

    fn world_view() -> TransformState {
        let mut state = TransformState::new(512.0, 512.0);
        state.jump_to(
            &CameraOptions::default()
                .with_center(LatLng::new(0.0, 0.0))
                .with_zoom(0.0),
        );
        state
    }

    fn layer(id: &str, configure: impl FnOnce(&mut SymbolProperties)) -> Arc<StyleLayer> {
        let mut properties = SymbolProperties::default();
        configure(&mut properties);
        Arc::new(
            StyleLayer::new(id, LayerProperties::Symbol(Box::new(properties)))
                .with_source("places", Some("poi")),
        )
    }

    /// A bucket with one 40x20 pixel text label per anchor, in tile units of a zoom 0 tile.
    fn bucket(layer: Arc<StyleLayer>, labels: &[(u64, f64, f64)]) -> SymbolBucket {
        let mut bucket = SymbolBucket::new(layer, 16.0, 1.0, false);
        for (feature_index, (id, x, y)) in labels.iter().enumerate() {
            let anchor = Anchor {
                point: Point2D::new(*x, *y),
                segment: None,
            };
            let collision = CollisionFeature::new_point(
                &anchor,
                LabelBounds {
                    top: -10.0,
                    bottom: 10.0,
                    left: -20.0,
                    right: 20.0,
                },
                1.0,
                0.0,
            );
            let vertex_start =
                bucket
                    .text
                    .add_quad([*x as f32, *y as f32], [-20.0, -10.0], [20.0, 10.0]);
            bucket.instances.push(SymbolInstance {
                cross_tile_id: CrossTileId(*id),
                anchor,
                feature_index,
                sort_key: 0.0,
                text: Some(PlacedSymbol {
                    collision,
                    vertex_start,
                    vertex_count: 4,
                }),
                icon: None,
            });
        }
        bucket
    }

    fn data<'a>(bucket: &'a SymbolBucket, source_id: &'a str) -> BucketPlacementData<'a> {
        BucketPlacementData {
            source_id,
            tile: OverscaledTileID::from_zxy(0, 0, 0),
            bucket,
        }
    }

    fn place(
        mode: MapMode,
        options: &MapOptions,
        layers: &[Vec<BucketPlacementData>],
        prev: Option<Placement>,
        now: Instant,
    ) -> Placement {
        let mut placement = Placement::new(&world_view(), mode, options, prev);
        placement.place_layers(layers);
        placement.commit(now);
        placement
    }

    fn placed(placement: &Placement, id: u64) -> bool {
        placement
            .placement(&CrossTileId(id))
            .map_or(false, |p| p.text)
    }

    #[test]
    fn opacity_states() {
        assert_eq!(OpacityState::new(true, true).opacity, 1.0);
        assert_eq!(OpacityState::new(true, false).opacity, 0.0);
        let fading_in = OpacityState::from_previous(&OpacityState::new(true, false), 0.4, true);
        assert_eq!(fading_in.opacity, 0.4);
        let fading_out = OpacityState::from_previous(
            &OpacityState {
                opacity: 0.3,
                placed: false,
            },
            0.5,
            false,
        );
        assert_eq!(fading_out.opacity, 0.0);
        assert!(fading_out.is_hidden());
        assert!(!JointOpacityState::new(true, false, false).is_hidden());
    }

    #[test]
    fn collision_groups() {
        let mut shared = CollisionGroups::new(true);
        assert_eq!(shared.get("a").id, 0);
        assert!(shared.get("b").collides_with(&IndexedSubfeature {
            collision_group_id: 7,
            ..IndexedSubfeature::new(0, "", "")
        }));

        let mut separate = CollisionGroups::new(false);
        let a = separate.get("a");
        let b = separate.get("b");
        assert_ne!(a.id, b.id);
        assert_eq!(separate.get("a"), a);
        let from_a = IndexedSubfeature {
            collision_group_id: a.id,
            ..IndexedSubfeature::new(0, "", "")
        };
        assert!(a.collides_with(&from_a));
        assert!(!b.collides_with(&from_a));
    }

    #[test]
    fn first_symbol_wins_and_placement_is_deterministic() {
        let layer = layer("labels", |_| {});
        // The second label overlaps the first, the third is far away.
        let bucket = bucket(layer, &[(1, 4096.0, 4096.0), (2, 4200.0, 4096.0), (3, 1000.0, 1000.0)]);
        let layers = vec![vec![data(&bucket, "places")]];
        let options = MapOptions::default();

        let now = Instant::now();
        let first = place(MapMode::Continuous, &options, &layers, None, now);
        let second = place(MapMode::Continuous, &options, &layers, None, now);
        for placement in [&first, &second] {
            assert!(placed(placement, 1));
            assert!(!placed(placement, 2));
            assert!(placed(placement, 3));
        }
    }

    #[test]
    fn upper_layers_are_placed_first() {
        let bottom = bucket(layer("bottom", |_| {}), &[(1, 4096.0, 4096.0)]);
        let top = bucket(layer("top", |_| {}), &[(2, 4150.0, 4096.0)]);
        let layers = vec![vec![data(&bottom, "places")], vec![data(&top, "places")]];
        let placement = place(MapMode::Continuous, &MapOptions::default(), &layers, None, Instant::now());
        assert!(placed(&placement, 2));
        assert!(!placed(&placement, 1));
    }

    #[test]
    fn allow_overlap_and_groups() {
        let overlapping = bucket(
            layer("overlap", |p| p.text_allow_overlap = true),
            &[(1, 4096.0, 4096.0), (2, 4100.0, 4096.0)],
        );
        let placement = place(
            MapMode::Continuous,
            &MapOptions::default(),
            &[vec![data(&overlapping, "places")]],
            None,
            Instant::now(),
        );
        assert!(placed(&placement, 1) && placed(&placement, 2));

        let a = bucket(layer("a", |_| {}), &[(1, 4096.0, 4096.0)]);
        let b = bucket(layer("b", |_| {}), &[(2, 4096.0, 4096.0)]);
        let layers = vec![vec![data(&a, "first")], vec![data(&b, "second")]];
        let options = MapOptions::default().with_cross_source_collisions(false);
        let placement = place(MapMode::Continuous, &options, &layers, None, Instant::now());
        assert!(placed(&placement, 1) && placed(&placement, 2));
    }

    #[test]
    fn opacities_fade_across_placements() {
        let bucket = bucket(layer("labels", |_| {}), &[(1, 4096.0, 4096.0)]);
        let layers = vec![vec![data(&bucket, "places")]];
        let options = MapOptions::default();
        let start = Instant::now();

        let first = place(MapMode::Continuous, &options, &layers, None, start);
        let opacity = |placement: &Placement| placement.opacity(&CrossTileId(1)).unwrap().text;
        assert_eq!(opacity(&first).opacity, 0.0);
        assert!(opacity(&first).placed);
        assert!(first.has_transitions(start + Duration::from_millis(100)));

        let second = place(MapMode::Continuous, &options, &layers, Some(first), start + Duration::from_millis(150));
        assert!((opacity(&second).opacity - 0.5).abs() < 1e-9);

        let third = place(MapMode::Continuous, &options, &layers, Some(second), start + Duration::from_millis(450));
        assert_eq!(opacity(&third).opacity, 1.0);
        // Nothing changed since the first placement started fading.
        assert!(!third.has_transitions(start + Duration::from_millis(500)));

        // The label disappears and fades out.
        let fourth = place(MapMode::Continuous, &options, &[], Some(third), start + Duration::from_millis(750));
        let fading = opacity(&fourth);
        assert!(!fading.placed);
        assert_eq!(fading.opacity, 1.0);
        let fifth = place(MapMode::Continuous, &options, &[], Some(fourth), start + Duration::from_millis(1200));
        assert!(fifth.opacity(&CrossTileId(1)).is_none());
    }

    #[test]
    fn reloaded_buckets_skip_fading() {
        let mut reloaded = bucket(layer("labels", |_| {}), &[(1, 4096.0, 4096.0)]);
        reloaded.just_reloaded = true;
        let placement = place(
            MapMode::Continuous,
            &MapOptions::default(),
            &[vec![data(&reloaded, "places")]],
            None,
            Instant::now(),
        );
        assert_eq!(placement.opacity(&CrossTileId(1)).unwrap().text.opacity, 1.0);

        let mut seen = HashSet::new();
        placement.update_bucket_opacities(&mut reloaded, &mut seen);
        assert!(!reloaded.just_reloaded);
        assert!(reloaded.text.opacity.iter().all(|v| v.opacity == 1.0));
    }

    #[test]
    fn static_placement_shows_labels_immediately() {
        let bucket = bucket(layer("labels", |_| {}), &[(1, 4096.0, 4096.0)]);
        let now = Instant::now();
        let placement = place(
            MapMode::Static,
            &MapOptions::default(),
            &[vec![data(&bucket, "places")]],
            None,
            now,
        );
        assert_eq!(placement.symbol_fade_change(now), 1.0);
        assert!(!placement.has_transitions(now));
        assert!(!placement.still_recent(now, 0.0));
        let state = placement.opacity(&CrossTileId(1)).unwrap();
        assert!(state.text.placed);
        assert_eq!(state.text.opacity, 1.0);
    }

    #[test]
    fn duplicates_are_hidden() {
        let layer = layer("labels", |_| {});
        let mut child = bucket(layer.clone(), &[(1, 4096.0, 4096.0)]);
        let mut parent = bucket(layer, &[(1, 4096.0, 4096.0), (2, 1000.0, 1000.0)]);
        let layers = vec![vec![
            BucketPlacementData {
                source_id: "places",
                tile: OverscaledTileID::from_zxy(0, 0, 0),
                bucket: &parent,
            },
            BucketPlacementData {
                source_id: "places",
                tile: OverscaledTileID::new(1, 0, OverscaledTileID::from_zxy(0, 0, 0).canonical),
                bucket: &child,
            },
        ]];
        let placement = place(MapMode::Static, &MapOptions::default(), &layers, None, Instant::now());
        assert!(placed(&placement, 1));
        assert!(placed(&placement, 2));

        let mut seen = HashSet::new();
        placement.update_bucket_opacities(&mut child, &mut seen);
        placement.update_bucket_opacities(&mut parent, &mut seen);
        assert!(child.text.opacity[..4].iter().all(|v| v.opacity == 1.0));
        // The duplicate in the parent is hidden, the other label shows.
        assert!(parent.text.opacity[..4].iter().all(|v| v.opacity == 0.0 && v.target_opacity == 0.0));
        assert!(parent.text.opacity[4..].iter().all(|v| v.opacity == 1.0));
    }

    #[test]
    fn tile_mode_places_labels_on_edges_first() {
        // Both labels overlap. The later one crosses the left tile edge.
        let bucket = bucket(layer("labels", |_| {}), &[(1, 168.0, 4096.0), (2, 8.0, 4096.0)]);
        let layers = vec![vec![data(&bucket, "places")]];

        let continuous = place(MapMode::Continuous, &MapOptions::default(), &layers, None, Instant::now());
        assert!(placed(&continuous, 1));
        assert!(!placed(&continuous, 2));

        let tile = place(MapMode::Tile, &MapOptions::default(), &layers, None, Instant::now());
        assert!(placed(&tile, 2));
        assert!(!placed(&tile, 1));
    }

    #[test]
    fn zoom_adjustment_and_recency() {
        let mut state = world_view();
        state.jump_to(&CameraOptions::default().with_zoom(3.0));
        let placement = Placement::new(&state, MapMode::Continuous, &MapOptions::default(), None);
        assert_eq!(placement.zoom_adjustment(4.0), 0.0);
        assert_eq!(placement.zoom_adjustment(1.5), 1.0);

        let now = placement.commit_time();
        assert!(placement.still_recent(now + Duration::from_millis(100), 3.0));
        assert!(!placement.still_recent(now + Duration::from_millis(400), 3.0));
        // Zooming out shortens the period.
        assert!(!placement.still_recent(now + Duration::from_millis(100), 2.0));
    }

    #[test]
    fn queries_placed_symbols() {
        let bucket = bucket(layer("labels", |_| {}), &[(1, 4096.0, 4096.0)]);
        let placement = place(
            MapMode::Continuous,
            &MapOptions::default(),
            &[vec![data(&bucket, "places")]],
            None,
            Instant::now(),
        );
        let hits = placement.query_rendered_symbols(&ScreenBox::new(
            Point2D::new(250.0, 250.0),
            Point2D::new(262.0, 262.0),
        ));
        let features = &hits[&bucket.bucket_instance_id];
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].layer_id, "labels");
        assert_eq!(features[0].source_layer, "poi");
        let retained = placement.query_data(bucket.bucket_instance_id).unwrap();
        assert_eq!(retained.source_id, "places");

        let misses = placement.query_rendered_symbols(&ScreenBox::new(
            Point2D::new(5.0, 5.0),
            Point2D::new(15.0, 15.0),
        ));
        assert!(misses.is_empty());
    }
}
