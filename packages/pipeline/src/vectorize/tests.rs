use super::*;
use crate::config::Connectivity;
use ardhi_types::Crs;
use ardhi_types::geojson::signed_area;
use ndarray::{Array2, array, s};

fn mosaic(labels: Array2<u8>, crs: Crs) -> Raster {
    Raster::from_band(labels, crs, GeoTransform::north_up(300_000.0, 9_000_000.0, 0.5, 0.5))
}

fn options() -> VectorizeOptions {
    VectorizeOptions::default()
}

#[test]
fn test_single_region_area_matches_pixels() {
    let mut labels = Array2::<u8>::zeros((10, 10));
    labels.slice_mut(s![2..5, 3..7]).fill(1);
    let collection = vectorize(&mosaic(labels, Crs::Epsg(32737)), &options()).unwrap();

    assert_eq!(collection.len(), 1);
    let feature = &collection.features[0];
    assert_eq!(feature.property("class"), Some(&serde_json::json!(1)));
    assert_eq!(feature.property("pixel_count"), Some(&serde_json::json!(12)));
    assert_eq!(feature.property("id"), Some(&serde_json::json!(1)));
    assert!((feature.geometry.area() - 3.0).abs() < 1e-9);
    assert_eq!(feature.property("area"), Some(&serde_json::json!(3.0)));

    let Geometry::Polygon { coordinates } = &feature.geometry else {
        panic!("expected a polygon");
    };
    assert_eq!(coordinates.len(), 1);
    assert_eq!(coordinates[0].len(), 5);
    assert_eq!(coordinates[0].first(), coordinates[0].last());
    assert!(signed_area(&coordinates[0]) > 0.0);
    assert_eq!(collection.crs(), Crs::Epsg(32737));
    assert_eq!(
        collection.bbox,
        Some([300_001.5, 8_999_997.5, 300_003.5, 8_999_999.0])
    );
}

#[test]
fn test_all_background_is_empty_raster_error() {
    let labels = Array2::<u8>::zeros((4, 4));
    let err = vectorize(&mosaic(labels, Crs::Epsg(32737)), &options()).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyRaster { background: 0 }));
}

#[test]
fn test_area_filter_may_leave_empty_collection() {
    let labels = array![[1u8, 0, 0], [0, 0, 0], [0, 0, 2]];
    let opts = VectorizeOptions {
        min_region_pixels: 2,
        ..options()
    };
    let collection = vectorize(&mosaic(labels, Crs::Epsg(32737)), &opts).unwrap();
    assert!(collection.is_empty());
    assert!(collection.bbox.is_none());
}

#[test]
fn test_hole_is_clockwise_and_subtracted() {
    let mut labels = Array2::<u8>::from_elem((5, 5), 3);
    labels[[2, 2]] = 0;
    let collection = vectorize(&mosaic(labels, Crs::Epsg(32737)), &options()).unwrap();
    assert_eq!(collection.len(), 1);

    let Geometry::Polygon { coordinates } = &collection.features[0].geometry else {
        panic!("expected a polygon");
    };
    assert_eq!(coordinates.len(), 2);
    assert!(signed_area(&coordinates[0]) > 0.0);
    assert!(signed_area(&coordinates[1]) < 0.0);
    assert!((collection.features[0].geometry.area() - 24.0 * 0.25).abs() < 1e-9);
}

#[test]
fn test_centimetre_pixels_far_from_origin_keep_orientation() {
    let mut labels = Array2::<u8>::from_elem((3, 3), 1);
    labels[[1, 1]] = 0;
    let raster = Raster::from_band(
        labels,
        Crs::Epsg(32737),
        GeoTransform::north_up(318_447.21, 9_660_112.37, 0.01, 0.01),
    );
    let collection = vectorize(&raster, &options()).unwrap();

    let Geometry::Polygon { coordinates } = &collection.features[0].geometry else {
        panic!("expected a polygon");
    };
    assert_eq!(coordinates.len(), 2);
    assert!(signed_area(&coordinates[0]) > 0.0);
    assert!(signed_area(&coordinates[1]) < 0.0);
    assert!((collection.features[0].geometry.area() - 8e-4).abs() < 1e-9);
}

#[test]
fn test_diagonal_region_is_multipolygon_under_eight_connectivity() {
    let labels = array![[1u8, 0, 0], [0, 1, 0], [0, 0, 0]];
    let raster = mosaic(labels, Crs::Epsg(32737));

    let eight = vectorize(&raster, &options()).unwrap();
    assert_eq!(eight.len(), 1);
    match &eight.features[0].geometry {
        Geometry::MultiPolygon { coordinates } => {
            assert_eq!(coordinates.len(), 2);
            assert!(coordinates.iter().all(|p| signed_area(&p[0]) > 0.0));
        }
        other => panic!("expected a multipolygon, got {other:?}"),
    }

    let four = vectorize(
        &raster,
        &VectorizeOptions {
            connectivity: Connectivity::Four,
            ..options()
        },
    )
    .unwrap();
    assert_eq!(four.len(), 2);
    assert!(
        four.features
            .iter()
            .all(|f| matches!(f.geometry, Geometry::Polygon { .. }))
    );
}

#[test]
fn test_ids_follow_discovery_order_and_labels_attach() {
    let labels = array![[0u8, 2, 2], [1, 0, 0], [1, 0, 2]];
    let opts = VectorizeOptions {
        class_labels: Some(vec!["background".into(), "building".into(), "road".into()]),
        connectivity: Connectivity::Four,
        ..options()
    };
    let collection = vectorize(&mosaic(labels, Crs::Epsg(32737)), &opts).unwrap();
    let summary: Vec<(u64, u64, String)> = collection
        .features
        .iter()
        .map(|f| {
            (
                f.property("id").and_then(|v| v.as_u64()).unwrap(),
                f.property("class").and_then(|v| v.as_u64()).unwrap(),
                f.property("label").and_then(|v| v.as_str()).unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, 2, "road".to_string()),
            (2, 1, "building".to_string()),
            (3, 2, "road".to_string()),
        ]
    );
}

#[test]
fn test_ungeoreferenced_mosaic_keeps_pixel_space() {
    let raster = Raster::from_band(
        array![[0u8, 1], [0, 1]],
        Crs::Undefined,
        GeoTransform::identity(),
    );
    let collection = vectorize(&raster, &options()).unwrap();
    assert!(collection.crs.is_none());
    assert_eq!(collection.bbox, Some([1.0, 0.0, 2.0, 2.0]));
    let Geometry::Polygon { coordinates } = &collection.features[0].geometry else {
        panic!("expected a polygon");
    };
    assert!(signed_area(&coordinates[0]) > 0.0);

    let err = vectorize(
        &raster,
        &VectorizeOptions {
            reproject_to_wgs84: true,
            ..options()
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), "reprojection_error");
}

#[test]
fn test_utm_output_reprojects_to_wgs84() {
    let mut labels = Array2::<u8>::zeros((4, 4));
    labels.slice_mut(s![1..3, 1..3]).fill(1);
    let raster = Raster::from_band(
        labels,
        Crs::Epsg(32737),
        GeoTransform::north_up(318_000.0, 9_660_000.0, 10.0, 10.0),
    );
    let opts = VectorizeOptions {
        reproject_to_wgs84: true,
        ..options()
    };
    let collection = vectorize(&raster, &opts).unwrap();
    assert_eq!(collection.crs(), Crs::WGS84);

    let [min_lon, min_lat, max_lon, max_lat] = collection.bbox.unwrap();
    assert!(min_lon > 37.0 && max_lon < 37.5);
    assert!(min_lat > -3.5 && max_lat < -2.5);
    assert!(max_lon > min_lon && max_lat > min_lat);

    let Geometry::Polygon { coordinates } = &collection.features[0].geometry else {
        panic!("expected a polygon");
    };
    assert!(signed_area(&coordinates[0]) > 0.0);
}

#[test]
fn test_arc_1960_output_reprojects_to_wgs84() {
    let mut labels = Array2::<u8>::zeros((4, 4));
    labels.slice_mut(s![1..3, 1..3]).fill(1);
    let transform = GeoTransform::north_up(318_000.0, 9_660_000.0, 10.0, 10.0);
    let opts = VectorizeOptions {
        reproject_to_wgs84: true,
        ..options()
    };
    let arc = vectorize(
        &Raster::from_band(labels.clone(), Crs::Epsg(21037), transform),
        &opts,
    )
    .unwrap();
    let wgs = vectorize(&Raster::from_band(labels, Crs::Epsg(32737), transform), &opts).unwrap();
    assert_eq!(arc.crs(), Crs::WGS84);

    let [min_lon, min_lat, max_lon, max_lat] = arc.bbox.unwrap();
    assert!(min_lon > 37.0 && max_lon < 37.5);
    assert!(min_lat > -3.5 && max_lat < -2.5);
    // the Arc 1960 datum shift moves the region, but by well under 0.01 degrees
    let shifted = arc.bbox.unwrap()[0] - wgs.bbox.unwrap()[0];
    assert!(shifted.abs() > 1e-7 && shifted.abs() < 0.01);
}

#[test]
fn test_collection_serializes_as_geojson() {
    let labels = array![[1u8]];
    let collection = vectorize(&mosaic(labels, Crs::Epsg(3857)), &options()).unwrap();
    let value = serde_json::to_value(&collection).unwrap();
    assert_eq!(value["type"], "FeatureCollection");
    assert_eq!(value["features"][0]["type"], "Feature");
    assert_eq!(value["features"][0]["geometry"]["type"], "Polygon");
    assert_eq!(value["crs"]["properties"]["name"], "EPSG:3857");
    assert_eq!(value["features"][0]["properties"]["class"], 1);
}
