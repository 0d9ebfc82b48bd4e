use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use instant::Instant;
use lyon::geom::euclid::Point2D;
use maplibre_pyramid::{
    bucket::symbol::{CrossTileId, PlacedSymbol, SymbolBucket, SymbolInstance},
    coords::{LatLng, EXTENT},
    options::{MapMode, MapOptions},
    render::transform_state::{CameraOptions, TransformState},
    style::layer::{LayerProperties, StyleLayer, SymbolProperties},
    text::{
        anchor::Anchor,
        collision_feature::{CollisionFeature, LabelBounds},
        placement::{BucketPlacementData, Placement},
    },
    tile::tile_id::OverscaledTileID,
};

/// A zoom 0 tile with `count` labels on a grid. Neighbouring labels overlap.
fn dense_bucket(count: usize) -> SymbolBucket {
    let layer = Arc::new(
        StyleLayer::new(
            "labels",
            LayerProperties::Symbol(Box::new(SymbolProperties::default())),
        )
        .with_source("places", Some("poi")),
    );
    let mut bucket = SymbolBucket::new(layer, 16.0, 1.0, false);

    let side = (count as f64).sqrt().ceil() as usize;
    let step = EXTENT / side as f64;
    for index in 0..count {
        let x = (index % side) as f64 * step + step / 2.0;
        let y = (index / side) as f64 * step + step / 2.0;
        let anchor = Anchor {
            point: Point2D::new(x, y),
            segment: None,
        };
        let collision = CollisionFeature::new_point(
            &anchor,
            LabelBounds {
                top: -10.0,
                bottom: 10.0,
                left: -40.0,
                right: 40.0,
            },
            1.0,
            2.0,
        );
        let vertex_start = bucket
            .text
            .add_quad([x as f32, y as f32], [-40.0, -10.0], [40.0, 10.0]);
        bucket.instances.push(SymbolInstance {
            cross_tile_id: CrossTileId(index as u64),
            anchor,
            feature_index: index,
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

fn bench_placement(c: &mut Criterion) {
    let mut state = TransformState::new(1024.0, 1024.0);
    state.jump_to(
        &CameraOptions::default()
            .with_center(LatLng::new(0.0, 0.0))
            .with_zoom(1.0),
    );
    let options = MapOptions::default().with_map_mode(MapMode::Static);
    let bucket = dense_bucket(2500);
    let layers = vec![vec![BucketPlacementData {
        source_id: "places",
        tile: OverscaledTileID::from_zxy(0, 0, 0),
        bucket: &bucket,
    }]];

    c.bench_function("place_2500_labels", |b| {
        b.iter(|| {
            let mut placement = Placement::new(&state, MapMode::Static, &options, None);
            placement.place_layers(&layers);
            placement.commit(Instant::now());
            placement
        })
    });
}

criterion_group!(benches, bench_placement);
criterion_main!(benches);
