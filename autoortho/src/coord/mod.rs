//! Conversions between geographic coordinates and slippy-map tile
//! coordinates, using the spherical-Mercator projection.

use std::f64::consts::PI;

/// Converts a geographic position to the tile coordinates of the tile
/// that contains it, at the given zoom level.
///
/// `x = floor((lon+180)/360 * 2^z)`, `y = floor((1 - asinh(tan(lat_rad))/pi)/2 * 2^z)`.
#[inline]
pub fn deg2tile(lat: f64, lon: f64, zoom: u32) -> (i64, i64) {
    let n = 2.0_f64.powi(zoom as i32);
    let lat_rad = lat.to_radians();
    let x = ((lon + 180.0) / 360.0 * n).floor() as i64;
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor() as i64;
    (x, y)
}

/// Converts tile coordinates back to the geographic position of the
/// tile's northwest corner. Inverse of [`deg2tile`].
#[inline]
pub fn tile2deg(x: i64, y: i64, zoom: u32) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let lon = x as f64 / n * 360.0 - 180.0;
    let lat_rad = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan();
    let lat = lat_rad.to_degrees();
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_york_city_at_zoom_16() {
        let (x, y) = deg2tile(40.7128, -74.0060, 16);
        assert_eq!(x, 19295);
        assert_eq!(y, 24640);
    }

    #[test]
    fn round_trip_exact_at_tile_corner() {
        // tile2deg returns the exact northwest corner, so feeding it back
        // through deg2tile must land on the same tile.
        for zoom in [0u32, 5, 10, 16, 18, 20] {
            let max = 1i64 << zoom;
            for &(x, y) in &[(0, 0), (max - 1, max - 1), (max / 2, max / 3)] {
                let (lat, lon) = tile2deg(x, y, zoom);
                let (rx, ry) = deg2tile(lat, lon, zoom);
                assert_eq!((rx, ry), (x, y), "zoom {zoom} tile ({x},{y})");
            }
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn round_trip_property(
                zoom in 0u32..=20,
                xf in 0.0..1.0_f64,
                yf in 0.0..1.0_f64,
            ) {
                let max = 1i64 << zoom;
                let x = ((xf * max as f64) as i64).min(max - 1);
                let y = ((yf * max as f64) as i64).min(max - 1);

                let (lat, lon) = tile2deg(x, y, zoom);
                let (rx, ry) = deg2tile(lat, lon, zoom);
                prop_assert_eq!((rx, ry), (x, y));
            }
        }
    }
}
