//! GeoJSON output types (RFC 7946 layout).
//!
//! The collection additionally carries a named `crs` member because the
//! pipeline emits coordinates in the mosaic's CRS rather than WGS84.

use crate::Crs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Position = [f64; 2];
pub type Ring = Vec<Position>;

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

impl Geometry {
    /// Polygons of this geometry, each as `[exterior, holes...]`.
    pub fn polygons(&self) -> Vec<&Vec<Ring>> {
        match self {
            Geometry::Point { .. } => Vec::new(),
            Geometry::Polygon { coordinates } => vec![coordinates],
            Geometry::MultiPolygon { coordinates } => coordinates.iter().collect(),
        }
    }

    /// Planar area: exteriors minus holes.
    pub fn area(&self) -> f64 {
        self.polygons()
            .into_iter()
            .map(|rings| {
                rings
                    .iter()
                    .enumerate()
                    .map(|(i, ring)| {
                        let a = signed_area(ring).abs();
                        if i == 0 { a } else { -a }
                    })
                    .sum::<f64>()
            })
            .sum()
    }

    pub fn map_positions(&mut self, mut f: impl FnMut(Position) -> Position) {
        match self {
            Geometry::Point { coordinates } => *coordinates = f(*coordinates),
            Geometry::Polygon { coordinates } => coordinates
                .iter_mut()
                .flatten()
                .for_each(|p| *p = f(*p)),
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter_mut()
                .flatten()
                .flatten()
                .for_each(|p| *p = f(*p)),
        }
    }

    fn positions(&self) -> Box<dyn Iterator<Item = &Position> + '_> {
        match self {
            Geometry::Point { coordinates } => Box::new(std::iter::once(coordinates)),
            Geometry::Polygon { coordinates } => Box::new(coordinates.iter().flatten()),
            Geometry::MultiPolygon { coordinates } => {
                Box::new(coordinates.iter().flatten().flatten())
            }
        }
    }
}

/// Shoelace area of a closed ring; positive when counter-clockwise in a
/// y-up coordinate system.
///
/// Coordinates are taken relative to the first vertex so projected
/// coordinates in the millions keep their precision.
pub fn signed_area(ring: &[Position]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let [ox, oy] = ring[0];
    let local = |[x, y]: Position| [x - ox, y - oy];
    let mut sum = 0.0;
    for pair in ring.windows(2) {
        let ([x0, y0], [x1, y1]) = (local(pair[0]), local(pair[1]));
        sum += x0 * y1 - x1 * y0;
    }
    let (first, last) = (ring[0], ring[ring.len() - 1]);
    if first != last {
        let ([x0, y0], [x1, y1]) = (local(last), local(first));
        sum += x0 * y1 - x1 * y0;
    }
    sum / 2.0
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Old-style named CRS member: `{"type": "name", "properties": {"name": "EPSG:32637"}}`.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct NamedCrs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: NamedCrsProperties,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct NamedCrsProperties {
    pub name: Crs,
}

impl From<Crs> for NamedCrs {
    fn from(crs: Crs) -> Self {
        Self {
            kind: "name".to_string(),
            properties: NamedCrsProperties { name: crs },
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Default)]
#[serde(tag = "type")]
pub struct FeatureCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<NamedCrs>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>, crs: Crs) -> Self {
        let mut collection = Self {
            bbox: None,
            crs: crs.is_defined().then(|| crs.into()),
            features,
        };
        collection.update_bbox();
        collection
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn crs(&self) -> Crs {
        self.crs
            .as_ref()
            .map(|c| c.properties.name)
            .unwrap_or_default()
    }

    pub fn set_crs(&mut self, crs: Crs) {
        self.crs = crs.is_defined().then(|| crs.into());
    }

    /// Recomputes the bounding box over all feature coordinates.
    pub fn update_bbox(&mut self) {
        let mut positions = self
            .features
            .iter()
            .flat_map(|f| f.geometry.positions())
            .peekable();
        if positions.peek().is_none() {
            self.bbox = None;
            return;
        }
        let bbox = positions.fold(
            [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |acc, p| [acc[0].min(p[0]), acc[1].min(p[1]), acc[2].max(p[0]), acc[3].max(p[1])],
        );
        self.bbox = Some(bbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit_square() -> Geometry {
        Geometry::Polygon {
            coordinates: vec![vec![
                [0.0, 0.0],
                [1.0, 0.0],
                [1.0, 1.0],
                [0.0, 1.0],
                [0.0, 0.0],
            ]],
        }
    }

    #[test]
    fn test_feature_collection_wire_format() {
        let fc = FeatureCollection::new(
            vec![Feature::new(unit_square()).with_property("class", 1)],
            Crs::Epsg(32637),
        );
        let value = serde_json::to_value(&fc).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"][0]["type"], "Feature");
        assert_eq!(value["features"][0]["geometry"]["type"], "Polygon");
        assert_eq!(value["features"][0]["properties"]["class"], 1);
        assert_eq!(value["crs"]["properties"]["name"], "EPSG:32637");
        assert_eq!(value["bbox"], json!([0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn test_point_deserializes() {
        let feature: Feature = serde_json::from_value(json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [36.8, -1.28]},
            "properties": {"name": "Nairobi"}
        }))
        .unwrap();
        assert_eq!(
            feature.geometry,
            Geometry::Point {
                coordinates: [36.8, -1.28]
            }
        );
        assert_eq!(feature.property("name").unwrap(), "Nairobi");
    }

    #[test]
    fn test_area_subtracts_holes() {
        let geometry = Geometry::Polygon {
            coordinates: vec![
                vec![[0.0, 0.0], [3.0, 0.0], [3.0, 3.0], [0.0, 3.0], [0.0, 0.0]],
                vec![[1.0, 1.0], [1.0, 2.0], [2.0, 2.0], [2.0, 1.0], [1.0, 1.0]],
            ],
        };
        assert_eq!(geometry.area(), 8.0);
        assert_eq!(unit_square().area(), 1.0);
    }

    #[test]
    fn test_signed_area_keeps_precision_far_from_origin() {
        let square = |x: f64, y: f64, side: f64| {
            vec![[x, y], [x + side, y], [x + side, y + side], [x, y + side], [x, y]]
        };
        let ring = square(250_009.6, 9_699_990.4, 0.05);
        assert!((signed_area(&ring) - 0.0025).abs() < 1e-9);

        let ring = square(318_447.21, 9_660_112.37, 0.01);
        assert!((signed_area(&ring) - 1e-4).abs() < 1e-9);
        let reversed: Ring = ring.iter().rev().copied().collect();
        assert!((signed_area(&reversed) + 1e-4).abs() < 1e-9);
    }

    #[test]
    fn test_undefined_crs_is_omitted() {
        let fc = FeatureCollection::new(Vec::new(), Crs::Undefined);
        let value = serde_json::to_value(&fc).unwrap();
        assert!(value.get("crs").is_none());
        assert!(value.get("bbox").is_none());
        assert_eq!(fc.crs(), Crs::Undefined);
    }
}
