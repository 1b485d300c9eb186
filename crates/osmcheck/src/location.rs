use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use std::fmt;

/// Fixed-point ticks per degree (Q7: 1e-7 degree).
pub const COORDINATE_PRECISION: i32 = 10_000_000;

/// A point on the map in Q7 fixed-point coordinates.
///
/// Equality is exact integer equality. Ordering is lexicographic on
/// `(x, y)`, which is what the bucket sort and the duplicate set rely on.
/// The layout doubles as the on-disk bucket record: 8 bytes, no padding.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable, Serialize,
)]
pub struct Location {
    /// Longitude in 1e-7 degrees.
    pub x: i32,
    /// Latitude in 1e-7 degrees.
    pub y: i32,
}

impl Location {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Quantizes floating-point degrees to the Q7 lattice.
    #[inline]
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            x: (lon * COORDINATE_PRECISION as f64).round() as i32,
            y: (lat * COORDINATE_PRECISION as f64).round() as i32,
        }
    }

    #[inline]
    pub fn lon(self) -> f64 {
        self.x as f64 / COORDINATE_PRECISION as f64
    }

    #[inline]
    pub fn lat(self) -> f64 {
        self.y as f64 / COORDINATE_PRECISION as f64
    }

    /// True if the coordinate lies within the WGS-84 degree ranges.
    #[inline]
    pub fn is_valid(self) -> bool {
        (-180 * COORDINATE_PRECISION..=180 * COORDINATE_PRECISION).contains(&self.x)
            && (-90 * COORDINATE_PRECISION..=90 * COORDINATE_PRECISION).contains(&self.y)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.7} {:.7})", self.lon(), self.lat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_x_then_y() {
        let mut locations = vec![
            Location::new(2, 1),
            Location::new(1, 5),
            Location::new(1, -3),
            Location::new(-7, 9),
        ];
        locations.sort();

        assert_eq!(
            locations,
            vec![
                Location::new(-7, 9),
                Location::new(1, -3),
                Location::new(1, 5),
                Location::new(2, 1),
            ]
        );
    }

    #[test]
    fn degrees_round_trip_on_the_lattice() {
        let loc = Location::from_degrees(13.377_702_5, 52.516_272_9);
        assert_eq!(loc, Location::new(133_777_025, 525_162_729));
        assert!((loc.lon() - 13.377_702_5).abs() < 1e-9);
        assert!(loc.is_valid());
        assert!(!Location::new(i32::MAX, 0).is_valid());
    }

    #[test]
    fn record_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<Location>(), 8);
        let loc = Location::new(1, 2);
        let bytes: &[u8] = bytemuck::bytes_of(&loc);
        assert_eq!(bytes.len(), 8);
    }
}
