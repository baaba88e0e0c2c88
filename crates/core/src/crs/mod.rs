//! Coordinate Reference System handling

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System representation.
///
/// Products are usually delivered in UTM zones or in the European LAEA grid,
/// so the EPSG code is the primary key and WKT is carried along when a
/// reader provides it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// Attach an EPSG code to a CRS read from WKT
    pub fn with_epsg(mut self, code: u32) -> Self {
        self.epsg = Some(code);
        self
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether this is a geographic (lat/lon) system.
    ///
    /// Only answerable from the EPSG code: the 4000-4999 block holds the
    /// geographic 2D systems.
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, Some(code) if (4000..5000).contains(&code))
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            let head: String = wkt.chars().take(50).collect();
            return format!("WKT:{}", head);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg() {
        let crs = CRS::from_epsg(32632);
        assert_eq!(crs.epsg(), Some(32632));
        assert_eq!(crs.identifier(), "EPSG:32632");
        assert!(!crs.is_geographic());
    }

    #[test]
    fn test_geographic_block() {
        assert!(CRS::from_epsg(4326).is_geographic());
        assert!(!CRS::from_epsg(3035).is_geographic());
        assert!(!CRS::from_wkt("GEOGCS[\"WGS 84\"]").is_geographic());
    }

    #[test]
    fn test_wkt_identifier_is_truncated() {
        let wkt = "PROJCS[\"ETRS89-extended / LAEA Europe\",GEOGCS[\"ETRS89\",DATUM[...]]]";
        let crs = CRS::from_wkt(wkt).with_epsg(3035);
        assert_eq!(crs.identifier(), "EPSG:3035");
        assert_eq!(crs.wkt(), Some(wkt));

        let bare = CRS::from_wkt(wkt);
        assert_eq!(bare.identifier().len(), "WKT:".len() + 50);
    }
}
