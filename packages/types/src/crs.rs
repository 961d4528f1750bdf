use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Coordinate reference system of a raster or feature collection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(into = "String", try_from = "String")]
pub enum Crs {
    /// An EPSG registry code, e.g. `EPSG:32637`.
    Epsg(u16),
    /// No georeferencing information; coordinates are pixel space.
    #[default]
    Undefined,
}

impl Crs {
    pub const WGS84: Crs = Crs::Epsg(4326);
    pub const WEB_MERCATOR: Crs = Crs::Epsg(3857);

    pub fn epsg(&self) -> Option<u16> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Crs::Epsg(_))
    }

    /// Geographic (lat/lon) codes live in the EPSG 4000 block.
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Epsg(code) if (4000..5000).contains(code))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{code}"),
            Crs::Undefined => write!(f, "undefined"),
        }
    }
}

impl FromStr for Crs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("undefined") || trimmed.is_empty() {
            return Ok(Crs::Undefined);
        }
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        code.parse::<u16>()
            .map(Crs::Epsg)
            .map_err(|_| format!("Invalid CRS identifier: {s}"))
    }
}

impl JsonSchema for Crs {
    fn schema_name() -> Cow<'static, str> {
        "Crs".into()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "description": "EPSG code such as `EPSG:32637`, or `undefined`"
        })
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl TryFrom<String> for Crs {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("EPSG:32637".parse::<Crs>().unwrap(), Crs::Epsg(32637));
        assert_eq!("4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("undefined".parse::<Crs>().unwrap(), Crs::Undefined);
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert_eq!(Crs::Epsg(3857).to_string(), "EPSG:3857");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Crs::Epsg(32737)).unwrap();
        assert_eq!(json, "\"EPSG:32737\"");
        let back: Crs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Crs::Epsg(32737));
    }

    #[test]
    fn test_geographic_detection() {
        assert!(Crs::WGS84.is_geographic());
        assert!(!Crs::Epsg(32637).is_geographic());
    }
}
