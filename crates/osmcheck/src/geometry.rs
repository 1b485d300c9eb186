//! Output geometries for anomaly records.

use crate::entity::{Entity, Path};
use crate::error::GeometryError;
use crate::location::Location;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geometry {
    Point(Location),
    LineString(Vec<Location>),
}

impl Geometry {
    /// Well-known text with 7 decimal places (the full Q7 precision).
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(loc) => format!("POINT({:.7} {:.7})", loc.lon(), loc.lat()),
            Geometry::LineString(points) => {
                let mut out = String::with_capacity(12 + points.len() * 24);
                out.push_str("LINESTRING(");
                for (i, loc) in points.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{:.7} {:.7}", loc.lon(), loc.lat());
                }
                out.push(')');
                out
            }
        }
    }
}

fn linestring(path: &Path) -> Result<Geometry, GeometryError> {
    if path.locations.is_empty() {
        return Err(GeometryError::MissingLocations(path.id));
    }

    if let Some(pos) = path.locations.iter().position(|l| !l.is_valid()) {
        let node = path.nodes.get(pos).copied().unwrap_or(path.id);
        return Err(GeometryError::InvalidLocation(node));
    }

    let mut points = path.locations.clone();
    points.dedup();

    if points.len() < 2 {
        return Err(GeometryError::TooFewPoints(path.id));
    }

    Ok(Geometry::LineString(points))
}

/// Geometry of a point or path. Containers have none.
pub fn geometry_of(entity: &Entity) -> Result<Option<Geometry>, GeometryError> {
    match entity {
        Entity::Point(point) => {
            if !point.location.is_valid() {
                return Err(GeometryError::InvalidLocation(point.id));
            }
            Ok(Some(Geometry::Point(point.location)))
        }
        Entity::Path(path) => linestring(path).map(Some),
        Entity::Container(_) => Ok(None),
    }
}
