//! Assemble polygon geometry from GML coordinate lists.
//!
//! Each `posList` is read as `X Y Z` triplets with `Z` discarded. A list is
//! treated as one ring; rings that are ragged, non-numeric, shorter than
//! [`MIN_RING_VERTICES`] or invalid are discarded. One surviving ring yields a
//! `POLYGON`, several yield a `MULTIPOLYGON`.

use geo::{BoundingRect, Coord, Geometry, LineString, MultiPolygon, Polygon, Rect, Validation};
use log::debug;
use thiserror::Error;
use wkt::ToWkt;

/// Minimum vertex count of a usable ring, closing vertex included.
pub const MIN_RING_VERTICES: usize = 4;

const COORDINATES_PER_VERTEX: usize = 3;

/// Geometry markup captured from one feature before assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawGeometry {
    /// First `srsName` declared inside the geometry property, if any.
    pub srs_name: Option<String>,
    /// Text of every `posList` element, in document order.
    pub pos_lists: Vec<String>,
}

/// Assembled geometry in the layer's spatial reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureGeometry {
    /// Well-known text of the polygon or multi-polygon.
    pub wkt: String,
    /// EPSG code the coordinates are expressed in.
    pub srid: u32,
    /// Axis-aligned bounding box, used for spatial indexing.
    pub bounds: Rect<f64>,
    /// Number of polygons that survived validation.
    pub polygons: usize,
}

/// Reasons a feature's geometry is rejected as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum GeometryError {
    /// The geometry property held no coordinate lists.
    #[error("geometry contains no coordinate lists")]
    Empty,
    /// Every ring was discarded.
    #[error("none of the {rings} coordinate lists formed a valid polygon")]
    NoValidRings {
        /// Number of rings inspected.
        rings: usize,
    },
    /// The geometry declared a spatial reference other than the layer's.
    #[error("geometry declares '{declared}' but the layer uses EPSG:{expected}")]
    CrsMismatch {
        /// Declared `srsName`.
        declared: String,
        /// Configured EPSG code.
        expected: u32,
    },
}

/// Why a single ring was discarded.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
enum RingRejection {
    #[error("coordinate list contains a non-numeric token")]
    NotNumeric,
    #[error("{values} values do not form X Y Z triplets")]
    Ragged { values: usize },
    #[error("ring has {vertices} vertices, fewer than {MIN_RING_VERTICES}")]
    TooFewVertices { vertices: usize },
    #[error("ring does not form a valid polygon")]
    Invalid,
}

/// Build the feature geometry for a layer using EPSG code `srid`.
///
/// # Examples
///
/// ```
/// use terrasync_core::{RawGeometry, assemble_geometry};
///
/// let raw = RawGeometry {
///     srs_name: Some("urn:ogc:def:crs:EPSG::25832".into()),
///     pos_lists: vec!["0 0 0 4 0 0 4 4 0 0 4 0 0 0 0".into()],
/// };
/// let geometry = assemble_geometry(&raw, 25832)?;
/// assert!(geometry.wkt.starts_with("POLYGON"));
/// # Ok::<(), terrasync_core::GeometryError>(())
/// ```
pub fn assemble_geometry(raw: &RawGeometry, srid: u32) -> Result<FeatureGeometry, GeometryError> {
    if let Some(declared) = raw.srs_name.as_deref() {
        if srid_from_srs_name(declared) != Some(srid) {
            return Err(GeometryError::CrsMismatch {
                declared: declared.to_owned(),
                expected: srid,
            });
        }
    }
    if raw.pos_lists.is_empty() {
        return Err(GeometryError::Empty);
    }

    let rings = raw.pos_lists.len();
    let mut polygons: Vec<Polygon<f64>> = raw
        .pos_lists
        .iter()
        .filter_map(|pos_list| match ring_polygon(pos_list) {
            Ok(polygon) => Some(polygon),
            Err(reason) => {
                debug!("discarding ring: {reason}");
                None
            }
        })
        .collect();

    let count = polygons.len();
    let geometry: Geometry<f64> = if count > 1 {
        MultiPolygon::new(polygons).into()
    } else if let Some(single) = polygons.pop() {
        single.into()
    } else {
        return Err(GeometryError::NoValidRings { rings });
    };
    let bounds = geometry
        .bounding_rect()
        .ok_or(GeometryError::NoValidRings { rings })?;

    Ok(FeatureGeometry {
        wkt: geometry.wkt_string(),
        srid,
        bounds,
        polygons: count,
    })
}

/// Extract the EPSG code from an `srsName` such as `EPSG:25832`,
/// `urn:ogc:def:crs:EPSG::25832` or `http://www.opengis.net/def/crs/EPSG/0/25832`.
#[must_use]
pub fn srid_from_srs_name(srs_name: &str) -> Option<u32> {
    srs_name
        .trim()
        .rsplit([':', '/'])
        .next()
        .and_then(|code| code.parse().ok())
}

fn ring_polygon(pos_list: &str) -> Result<Polygon<f64>, RingRejection> {
    let values = pos_list
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RingRejection::NotNumeric)?;
    let triplets = values.chunks_exact(COORDINATES_PER_VERTEX);
    if !triplets.remainder().is_empty() {
        return Err(RingRejection::Ragged {
            values: values.len(),
        });
    }
    let coords: Vec<Coord<f64>> = triplets
        .filter_map(|triplet| match triplet {
            [x, y, _] => Some(Coord { x: *x, y: *y }),
            _ => None,
        })
        .collect();
    if coords.len() < MIN_RING_VERTICES {
        return Err(RingRejection::TooFewVertices {
            vertices: coords.len(),
        });
    }

    let polygon = Polygon::new(LineString::from(coords), Vec::new());
    if polygon.is_valid() {
        Ok(polygon)
    } else {
        Err(RingRejection::Invalid)
    }
}
