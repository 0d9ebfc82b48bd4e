//! Spatial index of the features of a tile, answering rendered and source feature queries.

use geo::{BoundingRect, Contains, EuclideanDistance, Intersects};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Point, Polygon};
use rstar::{RTree, RTreeObject, AABB};

use crate::{
    error::ParseError,
    style::filter::Filter,
    tile::{
        geometry_tile_data::{
            classify_rings, FeatureType, GeometryCollection, GeometryCoordinates,
            GeometryTileData, GeometryTileFeature, PropertyMap,
        },
        tile_id::OverscaledTileID,
    },
};

/// Reference from an indexed geometry or collision box back to its feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexedSubfeature {
    pub feature_index: usize,
    pub source_layer: String,
    pub layer_id: String,
    // Only used for symbols.
    pub bucket_instance_id: u32,
    pub collision_group_id: u16,
}

impl IndexedSubfeature {
    pub fn new(feature_index: usize, source_layer: &str, layer_id: &str) -> Self {
        Self {
            feature_index,
            source_layer: source_layer.to_string(),
            layer_id: layer_id.to_string(),
            bucket_instance_id: 0,
            collision_group_id: 0,
        }
    }
}

/// A feature matched by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub layer_id: String,
    pub source_layer: String,
    pub tile: OverscaledTileID,
    pub id: Option<u64>,
    pub properties: PropertyMap,
    pub feature_type: FeatureType,
    /// In tile units.
    pub geometry: GeometryCollection,
}

impl Feature {
    fn new(
        feature: GeometryTileFeature,
        layer_id: &str,
        source_layer: &str,
        tile: OverscaledTileID,
    ) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            source_layer: source_layer.to_string(),
            tile,
            id: feature.id,
            properties: feature.properties,
            feature_type: feature.feature_type,
            geometry: feature.geometry,
        }
    }
}

#[derive(Debug, Clone)]
enum ExactGeometry {
    Points(Vec<Point<f64>>),
    Lines(Vec<LineString<f64>>),
    Polygons(MultiPolygon<f64>),
}

impl ExactGeometry {
    fn from_feature(feature_type: FeatureType, geometry: &GeometryCollection) -> Option<Self> {
        let line = |coordinates: &GeometryCoordinates| -> LineString<f64> {
            coordinates
                .iter()
                .map(|p| Coord {
                    x: p.x as f64,
                    y: p.y as f64,
                })
                .collect()
        };

        match feature_type {
            FeatureType::Point => Some(ExactGeometry::Points(
                geometry
                    .iter()
                    .flatten()
                    .map(|p| Point::new(p.x as f64, p.y as f64))
                    .collect(),
            )),
            FeatureType::LineString => {
                Some(ExactGeometry::Lines(geometry.iter().map(line).collect()))
            }
            FeatureType::Polygon => Some(ExactGeometry::Polygons(MultiPolygon::new(
                classify_rings(geometry)
                    .iter()
                    .filter_map(|rings| {
                        let (exterior, interiors) = rings.split_first()?;
                        Some(Polygon::new(line(exterior), interiors.iter().map(line).collect()))
                    })
                    .collect(),
            ))),
            FeatureType::Unknown => None,
        }
    }

    /// Whether the geometry lies within `tolerance` of `query`. Queries are points, lines or
    /// polygons.
    fn intersects(&self, query: &Geometry<f64>, tolerance: f64) -> bool {
        match (self, query) {
            (ExactGeometry::Points(points), Geometry::Point(query)) => points
                .iter()
                .any(|point| point.euclidean_distance(query) <= tolerance),
            (ExactGeometry::Points(points), Geometry::LineString(query)) => points
                .iter()
                .any(|point| point.euclidean_distance(query) <= tolerance),
            (ExactGeometry::Points(points), Geometry::Polygon(query)) => points.iter().any(|point| {
                query.contains(point) || point.euclidean_distance(query.exterior()) <= tolerance
            }),
            (ExactGeometry::Lines(lines), Geometry::Point(query)) => lines
                .iter()
                .any(|line| query.euclidean_distance(line) <= tolerance),
            (ExactGeometry::Lines(lines), Geometry::LineString(query)) => lines
                .iter()
                .any(|line| line.intersects(query) || line.euclidean_distance(query) <= tolerance),
            (ExactGeometry::Lines(lines), Geometry::Polygon(query)) => lines.iter().any(|line| {
                line.intersects(query) || line.euclidean_distance(query.exterior()) <= tolerance
            }),
            (ExactGeometry::Polygons(polygons), Geometry::Point(query)) => {
                polygons.intersects(query)
                    || polygons
                        .iter()
                        .any(|polygon| query.euclidean_distance(polygon.exterior()) <= tolerance)
            }
            (ExactGeometry::Polygons(polygons), Geometry::LineString(query)) => {
                polygons.intersects(query)
            }
            (ExactGeometry::Polygons(polygons), Geometry::Polygon(query)) => {
                polygons.intersects(query)
            }
            _ => false,
        }
    }
}

/// Turns a query in tile units into a point, a line or a closed polygon depending on how many
/// coordinates it has.
pub fn query_geometry(coords: Vec<Coord<f64>>) -> Option<Geometry<f64>> {
    match coords.len() {
        0 => None,
        1 => Some(Geometry::Point(Point(coords[0]))),
        2 => Some(Geometry::LineString(LineString::new(coords))),
        // Polygon::new closes the ring.
        _ => Some(Geometry::Polygon(Polygon::new(LineString::new(coords), Vec::new()))),
    }
}

#[derive(Debug, Clone)]
struct IndexedGeometry {
    envelope: AABB<[f64; 2]>,
    exact: ExactGeometry,
    subfeature: IndexedSubfeature,
}

impl RTreeObject for IndexedGeometry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over the geometries of all features which ended up in a bucket of a tile.
#[derive(Debug, Default)]
pub struct FeatureIndex {
    tree: RTree<IndexedGeometry>,
}

impl FeatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn insert(&mut self, feature: &GeometryTileFeature, subfeature: IndexedSubfeature) {
        let points: Vec<[f64; 2]> = feature
            .geometry
            .iter()
            .flatten()
            .map(|p| [p.x as f64, p.y as f64])
            .collect();
        if points.is_empty() {
            return;
        }
        let Some(exact) = ExactGeometry::from_feature(feature.feature_type, &feature.geometry) else {
            return;
        };
        self.tree.insert(IndexedGeometry {
            envelope: AABB::from_points(points.iter()),
            exact,
            subfeature,
        });
    }

    /// Features of `layer_ids` whose geometry lies within `tolerance` tile units of `query`.
    /// Results are ordered by layer as given and then by feature index.
    pub fn query_rendered_features(
        &self,
        query: &Geometry<f64>,
        tolerance: f64,
        layer_ids: &[String],
        data: &GeometryTileData,
        tile: OverscaledTileID,
        filter: Option<&Filter>,
    ) -> Result<Vec<Feature>, ParseError> {
        let Some(bounds) = query.bounding_rect() else {
            return Ok(Vec::new());
        };
        let (lower, upper) = (bounds.min(), bounds.max());
        let envelope = AABB::from_corners(
            [lower.x - tolerance, lower.y - tolerance],
            [upper.x + tolerance, upper.y + tolerance],
        );

        let mut candidates: Vec<&IndexedGeometry> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|candidate| layer_ids.contains(&candidate.subfeature.layer_id))
            .filter(|candidate| candidate.exact.intersects(query, tolerance))
            .collect();
        candidates.sort_by_key(|candidate| {
            (
                layer_ids
                    .iter()
                    .position(|id| *id == candidate.subfeature.layer_id),
                candidate.subfeature.feature_index,
            )
        });

        let mut features = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(feature) = lookup(data, &candidate.subfeature, tile, filter)? {
                features.push(feature);
            }
        }
        Ok(features)
    }
}

/// Resolves an indexed subfeature to its feature, if it passes `filter`.
pub fn lookup(
    data: &GeometryTileData,
    subfeature: &IndexedSubfeature,
    tile: OverscaledTileID,
    filter: Option<&Filter>,
) -> Result<Option<Feature>, ParseError> {
    let Some(feature) = data.feature(&subfeature.source_layer, subfeature.feature_index)? else {
        return Ok(None);
    };
    if filter.map_or(false, |filter| !filter.evaluate(&feature)) {
        return Ok(None);
    }
    Ok(Some(Feature::new(
        feature,
        &subfeature.layer_id,
        &subfeature.source_layer,
        tile,
    )))
}

/// All features of `source_layer` which pass `filter`, independent of whether they are rendered.
pub fn query_source_features(
    data: &GeometryTileData,
    source_layer: &str,
    tile: OverscaledTileID,
    filter: Option<&Filter>,
) -> Result<Vec<Feature>, ParseError> {
    Ok(data
        .features(source_layer)?
        .into_iter()
        .filter(|feature| filter.map_or(true, |filter| filter.evaluate(feature)))
        .map(|feature| Feature::new(feature, "", source_layer, tile))
        .collect())
}

#[cfg(test)]
mod tests {
    use geo_types::{coord, polygon, Geometry};
    use serde_json::json;

    use crate::{
        style::filter::Filter,
        tile::{
            feature_index::{query_geometry, query_source_features, FeatureIndex, IndexedSubfeature},
            geometry_tile_data::{tests::encode_test_tile, GeometryTileData, VectorTileData},
            tile_id::OverscaledTileID,
        },
    };

    fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ])
    }

    fn indexed() -> (GeometryTileData, FeatureIndex) {
        let data = GeometryTileData::Vector(
            VectorTileData::parse(&encode_test_tile("landuse")).unwrap(),
        );
        let mut index = FeatureIndex::new();
        for (i, feature) in data.features("landuse").unwrap().iter().enumerate() {
            index.insert(feature, IndexedSubfeature::new(i, "landuse", "parks"));
        }
        (data, index)
    }

    #[test]
    fn queries_polygons_and_points() {
        let (data, index) = indexed();
        let tile = OverscaledTileID::from_zxy(0, 0, 0);
        let layers = vec!["parks".to_string()];
        assert_eq!(index.len(), 2);

        // Inside the square, away from the point.
        let features = index
            .query_rendered_features(&square(1100.0, 1100.0, 10.0), 0.0, &layers, &data, tile, None)
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, Some(7));

        // Close to the point within tolerance.
        let features = index
            .query_rendered_features(&square(2050.0, 2050.0, 4.0), 8.0, &layers, &data, tile, None)
            .unwrap();
        assert_eq!(
            features.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![Some(7), Some(8)]
        );

        // Outside of everything.
        assert!(index
            .query_rendered_features(&square(5000.0, 5000.0, 10.0), 0.0, &layers, &data, tile, None)
            .unwrap()
            .is_empty());

        // Other layers are not matched.
        assert!(index
            .query_rendered_features(
                &square(1100.0, 1100.0, 10.0),
                0.0,
                &["water".to_string()],
                &data,
                tile,
                None
            )
            .unwrap()
            .is_empty());
    }

    #[test]
    fn filters_results() {
        let (data, index) = indexed();
        let tile = OverscaledTileID::from_zxy(0, 0, 0);
        let filter = Filter::parse(&json!(["==", "name", "Golden Gate"])).unwrap();
        let features = index
            .query_rendered_features(
                &square(2040.0, 2040.0, 16.0),
                0.0,
                &["parks".to_string()],
                &data,
                tile,
                Some(&filter),
            )
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id, Some(8));

        let all = query_source_features(&data, "landuse", tile, None).unwrap();
        assert_eq!(all.len(), 2);
        let filtered = query_source_features(&data, "landuse", tile, Some(&filter)).unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn queries_at_a_single_point() {
        let (data, index) = indexed();
        let tile = OverscaledTileID::from_zxy(0, 0, 0);
        let layers = vec!["parks".to_string()];

        let inside = query_geometry(vec![coord! { x: 1100.0, y: 1100.0 }]).unwrap();
        assert!(matches!(inside, Geometry::Point(_)));
        let features = index
            .query_rendered_features(&inside, 0.0, &layers, &data, tile, None)
            .unwrap();
        assert_eq!(features.iter().map(|f| f.id).collect::<Vec<_>>(), vec![Some(7)]);

        let outside = query_geometry(vec![coord! { x: 5000.0, y: 5000.0 }]).unwrap();
        assert!(index
            .query_rendered_features(&outside, 0.0, &layers, &data, tile, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn query_geometry_by_coordinate_count() {
        assert!(query_geometry(Vec::new()).is_none());
        assert!(matches!(
            query_geometry(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }]),
            Some(Geometry::LineString(_))
        ));
        let Some(Geometry::Polygon(polygon)) = query_geometry(vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.0, y: 0.0 },
            coord! { x: 1.0, y: 1.0 },
        ]) else {
            panic!("expected a polygon");
        };
        assert!(polygon.exterior().is_closed());
    }
}
