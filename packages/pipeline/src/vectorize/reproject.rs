//! Reprojection of vector output to WGS84 longitude/latitude.
//!
//! Web Mercator goes through the closed-form inverse. Every other supported
//! EPSG code is mapped to its proj4 definition and transformed with
//! `proj4rs`, datum shifts included.

use ardhi_types::{Crs, FeatureCollection, PipelineError, PipelineResult, Position};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use std::borrow::Cow;
use std::f64::consts::PI;

/// Half the Web Mercator extent in metres.
const HALF_EARTH: f64 = 20_037_508.342_789_244;

const EPSG_WGS84: u16 = 4326;

const ARC_1960_TOWGS84: &str = "+ellps=clrk80 +towgs84=-160,-6,-302,0,0,0,0";
const ADINDAN_TOWGS84: &str = "+ellps=clrk80 +towgs84=-166,-15,204,0,0,0,0";
const GRS80_TOWGS84: &str = "+ellps=GRS80 +towgs84=0,0,0,0,0,0,0";

/// proj4 definition of an EPSG code. Covers geographic WGS84, Web Mercator
/// and the UTM families imagery is usually delivered in.
pub fn get_proj_string(code: u16) -> Option<Cow<'static, str>> {
    let utm = |zone: u16, south: bool, datum: &str| {
        let hemisphere = if south { " +south" } else { "" };
        Cow::Owned(format!(
            "+proj=utm +zone={zone}{hemisphere} {datum} +units=m +no_defs"
        ))
    };
    let def = match code {
        4326 => Cow::Borrowed("+proj=longlat +datum=WGS84 +no_defs"),
        3857 => Cow::Borrowed(
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs",
        ),
        // Arc 1960
        4210 => Cow::Owned(format!("+proj=longlat {ARC_1960_TOWGS84} +no_defs")),
        21035..=21037 => utm(code - 21000, true, ARC_1960_TOWGS84),
        21095..=21097 => utm(code - 21060, false, ARC_1960_TOWGS84),
        // Adindan
        20135..=20138 => utm(code - 20100, false, ADINDAN_TOWGS84),
        // ETRS89 and NAD83
        25828..=25838 => utm(code - 25800, false, GRS80_TOWGS84),
        26901..=26923 => utm(code - 26900, false, GRS80_TOWGS84),
        // WGS84
        32601..=32660 => utm(code - 32600, false, "+datum=WGS84"),
        32701..=32760 => utm(code - 32700, true, "+datum=WGS84"),
        _ => return None,
    };
    Some(def)
}

#[inline]
pub fn web_mercator_to_wgs84([x, y]: Position) -> Position {
    let lon = x * 180.0 / HALF_EARTH;
    let lat = (2.0 * (y * PI / HALF_EARTH).exp().atan() - PI / 2.0).to_degrees();
    [lon, lat]
}

/// Maps coordinates of one CRS to `[lon, lat]` degrees.
pub enum Wgs84Transform {
    Identity,
    /// Inline inverse for EPSG:3857
    FastMercator,
    Proj4rs {
        source: Proj,
        target: Proj,
        /// Source axes are degrees and must be fed to proj4rs as radians
        source_is_geographic: bool,
    },
}

impl Wgs84Transform {
    pub fn new(from: Crs) -> PipelineResult<Self> {
        let unsupported = || PipelineError::Reprojection {
            from,
            to: Crs::WGS84,
        };
        let code = from.epsg().ok_or_else(unsupported)?;
        if code == EPSG_WGS84 {
            return Ok(Wgs84Transform::Identity);
        }
        if from == Crs::WEB_MERCATOR {
            return Ok(Wgs84Transform::FastMercator);
        }

        let source_str = get_proj_string(code).ok_or_else(|| {
            tracing::warn!("No projection definition for {}", from);
            unsupported()
        })?;
        let target_str = get_proj_string(EPSG_WGS84).ok_or_else(unsupported)?;
        let source = Proj::from_proj_string(&source_str).map_err(|e| {
            tracing::warn!("Invalid projection {} ({}): {:?}", from, source_str, e);
            unsupported()
        })?;
        let target = Proj::from_proj_string(&target_str).map_err(|e| {
            tracing::warn!("Invalid projection {}: {:?}", Crs::WGS84, e);
            unsupported()
        })?;

        Ok(Wgs84Transform::Proj4rs {
            source,
            target,
            source_is_geographic: source_str.contains("+proj=longlat"),
        })
    }

    pub fn transform(&self, [x, y]: Position) -> Result<Position, String> {
        match self {
            Wgs84Transform::Identity => Ok([x, y]),
            Wgs84Transform::FastMercator => Ok(web_mercator_to_wgs84([x, y])),
            Wgs84Transform::Proj4rs {
                source,
                target,
                source_is_geographic,
            } => {
                let mut point = if *source_is_geographic {
                    (x.to_radians(), y.to_radians(), 0.0)
                } else {
                    (x, y, 0.0)
                };
                transform(source, target, &mut point)
                    .map_err(|e| format!("Transform of ({x}, {y}) failed: {e:?}"))?;
                Ok([point.0.to_degrees(), point.1.to_degrees()])
            }
        }
    }
}

/// Rewrites every coordinate of the collection into EPSG:4326.
pub fn reproject_to_wgs84(collection: &mut FeatureCollection) -> PipelineResult<()> {
    let from = collection.crs();
    let transformer = Wgs84Transform::new(from)?;

    let mut failure: Option<String> = None;
    for feature in &mut collection.features {
        feature
            .geometry
            .map_positions(|p| match transformer.transform(p) {
                Ok(projected) => projected,
                Err(e) => {
                    failure.get_or_insert(e);
                    p
                }
            });
    }
    if let Some(message) = failure {
        tracing::warn!("Reprojection from {} failed: {}", from, message);
        return Err(PipelineError::Reprojection {
            from,
            to: Crs::WGS84,
        });
    }

    collection.set_crs(Crs::WGS84);
    collection.update_bbox();
    tracing::debug!("Reprojected {} features from {} to {}", collection.len(), from, Crs::WGS84);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Position, b: Position, tol: f64) -> bool {
        (a[0] - b[0]).abs() < tol && (a[1] - b[1]).abs() < tol
    }

    fn to_wgs84(code: u16, p: Position) -> Position {
        Wgs84Transform::new(Crs::Epsg(code))
            .unwrap()
            .transform(p)
            .unwrap()
    }

    #[test]
    fn test_web_mercator_extremes() {
        assert!(close(web_mercator_to_wgs84([0.0, 0.0]), [0.0, 0.0], 1e-12));
        let east = web_mercator_to_wgs84([HALF_EARTH, 0.0]);
        assert!((east[0] - 180.0).abs() < 1e-9);
        // 45 degrees north
        let y = HALF_EARTH / PI * (PI / 4.0 + (45f64).to_radians() / 2.0).tan().ln();
        assert!(close(web_mercator_to_wgs84([0.0, y]), [0.0, 45.0], 1e-9));
        assert!(matches!(
            Wgs84Transform::new(Crs::WEB_MERCATOR),
            Ok(Wgs84Transform::FastMercator)
        ));
    }

    #[test]
    fn test_utm_central_meridian_on_equator() {
        assert!(close(to_wgs84(32637, [500_000.0, 0.0]), [39.0, 0.0], 1e-7));
        assert!(close(
            to_wgs84(32737, [500_000.0, 10_000_000.0]),
            [39.0, 0.0],
            1e-7
        ));
    }

    #[test]
    fn test_utm_hemispheres_mirror() {
        let north = to_wgs84(32636, [612_000.0, 1_100_000.0]);
        let south = to_wgs84(32736, [612_000.0, 10_000_000.0 - 1_100_000.0]);
        assert!((north[0] - south[0]).abs() < 1e-7);
        assert!((north[1] + south[1]).abs() < 1e-7);
        // east of the central meridian, roughly 10 degrees north
        assert!(north[0] > 33.0 && north[0] < 35.0);
        assert!(north[1] > 9.5 && north[1] < 10.5);
    }

    #[test]
    fn test_utm_meridian_arc_to_latitude() {
        // meridian arc from the equator to 10 degrees north is ~1 105 855 m
        let northing = 0.9996 * 1_105_854.8;
        assert!(close(to_wgs84(32633, [500_000.0, northing]), [15.0, 10.0], 1e-3));
    }

    #[test]
    fn test_arc_1960_utm_lands_near_wgs84_utm() {
        let p = [318_000.0, 9_660_000.0];
        let arc = to_wgs84(21037, p);
        let wgs = to_wgs84(32737, p);
        // the datum shift is a few hundred metres at most
        assert!(close(arc, wgs, 0.01));
        assert!(arc[0] > 37.0 && arc[0] < 37.5);
        assert!(arc[1] > -3.5 && arc[1] < -2.5);
    }

    #[test]
    fn test_unknown_crs_is_reprojection_error() {
        assert!(matches!(
            Wgs84Transform::new(Crs::Epsg(1)).err(),
            Some(PipelineError::Reprojection { .. })
        ));
        assert!(Wgs84Transform::new(Crs::Undefined).is_err());
        assert!(matches!(
            Wgs84Transform::new(Crs::WGS84),
            Ok(Wgs84Transform::Identity)
        ));
    }
}
