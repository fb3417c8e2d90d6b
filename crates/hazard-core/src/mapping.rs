//! Pixel to airfield-map coordinate mapping and zone lookup

use crate::ZoneId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 3x3 perspective transform from image pixels to the ground plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homography(pub [[f64; 3]; 3]);

impl Homography {
    pub const IDENTITY: Self = Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Apply the transform; None when the point maps to infinity
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.0;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < f64::EPSILON {
            return None;
        }

        let gx = (m[0][0] * x + m[0][1] * y + m[0][2]) / w;
        let gy = (m[1][0] * x + m[1][1] * y + m[1][2]) / w;
        Some((gx, gy))
    }
}

/// Committed calibration for one camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub homography: Homography,
    /// Ground-plane units to world units (meters)
    pub scale: f64,
}

/// Frame, world and map dimensions used by the mapping formulas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub frame_width: f64,
    pub frame_height: f64,
    pub map_width: f64,
    pub map_height: f64,
    /// World extent in meters covered by the map
    pub world_width: f64,
    pub world_height: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            frame_width: 1920.0,
            frame_height: 1080.0,
            map_width: 1000.0,
            map_height: 600.0,
            world_width: 3000.0,
            world_height: 1800.0,
        }
    }
}

impl ProjectionConfig {
    /// Map a pixel position to map units, through the camera calibration when present
    pub fn to_map(&self, pixel: (f64, f64), calibration: Option<&CalibrationEntry>) -> (f64, f64) {
        if let Some(entry) = calibration {
            match entry.homography.project(pixel.0, pixel.1) {
                Some((gx, gy)) => {
                    let wx = gx * entry.scale;
                    let wy = gy * entry.scale;
                    return (
                        wx / self.world_width * self.map_width,
                        wy / self.world_height * self.map_height,
                    );
                }
                None => debug!("Degenerate homography at pixel {:?}, using linear mapping", pixel),
            }
        }

        self.linear(pixel)
    }

    /// Fallback for uncalibrated cameras: pixel / frame size * map size
    pub fn linear(&self, pixel: (f64, f64)) -> (f64, f64) {
        (
            pixel.0 / self.frame_width * self.map_width,
            pixel.1 / self.frame_height * self.map_height,
        )
    }
}

/// Axis-aligned zone rectangle in map units, `[min, max)` on both axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Zone {
    pub const fn new(id: u8, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { id: ZoneId(id), x1, y1, x2, y2 }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }
}

/// Static zone table; the first matching zone wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneTable {
    pub zones: Vec<Zone>,
}

impl Default for ZoneTable {
    fn default() -> Self {
        Self {
            zones: vec![
                Zone::new(1, 0.0, 0.0, 500.0, 120.0),      // west apron
                Zone::new(2, 500.0, 0.0, 1000.0, 120.0),   // east apron
                Zone::new(3, 0.0, 120.0, 1000.0, 200.0),   // north taxiway
                Zone::new(4, 0.0, 300.0, 1000.0, 350.0),   // center taxiway
                Zone::new(5, 0.0, 200.0, 1000.0, 300.0),   // runway A
                Zone::new(6, 0.0, 350.0, 1000.0, 450.0),   // runway B
                Zone::new(7, 0.0, 450.0, 500.0, 600.0),    // south-west grass
                Zone::new(8, 500.0, 450.0, 1000.0, 600.0), // south-east grass
            ],
        }
    }
}

impl ZoneTable {
    pub fn resolve(&self, x: f64, y: f64) -> Option<ZoneId> {
        let mut matches = self.zones.iter().filter(|z| z.contains(x, y));
        let first = matches.next();

        match first {
            None => debug!("No zone matches map point ({:.1}, {:.1})", x, y),
            Some(zone) => {
                let extra: Vec<ZoneId> = matches.map(|z| z.id).collect();
                if !extra.is_empty() {
                    warn!(
                        "Map point ({:.1}, {:.1}) matches zones {} and {:?}; using {}",
                        x, y, zone.id, extra, zone.id
                    );
                }
            }
        }

        first.map(|z| z.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!((actual.0 - expected.0).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        assert!((actual.1 - expected.1).abs() < 1e-9, "{:?} != {:?}", actual, expected);
    }

    #[test]
    fn test_linear_fallback() {
        let projection = ProjectionConfig::default();
        assert_close(projection.to_map((960.0, 540.0), None), (500.0, 300.0));
        assert_close(projection.to_map((0.0, 1080.0), None), (0.0, 600.0));
    }

    #[test]
    fn test_calibrated_mapping() {
        let projection = ProjectionConfig::default();
        let entry = CalibrationEntry {
            homography: Homography::IDENTITY,
            scale: 1.5,
        };

        // (100, 200) px -> (150, 300) m -> (50, 100) map units
        assert_close(projection.to_map((100.0, 200.0), Some(&entry)), (50.0, 100.0));
    }

    #[test]
    fn test_perspective_divide() {
        let h = Homography([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]);
        assert_close(h.project(10.0, 20.0).unwrap(), (10.0, 20.0));

        let degenerate = Homography([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]);
        assert!(degenerate.project(0.0, 0.0).is_none());

        let projection = ProjectionConfig::default();
        let entry = CalibrationEntry { homography: degenerate, scale: 1.0 };
        assert_close(projection.to_map((960.0, 540.0), Some(&entry)), (500.0, 300.0));
    }

    #[test]
    fn test_zone_resolution() {
        let table = ZoneTable::default();
        assert_eq!(table.resolve(10.0, 10.0), Some(ZoneId(1)));
        assert_eq!(table.resolve(700.0, 250.0), Some(ZoneId(5)));
        assert_eq!(table.resolve(700.0, 400.0), Some(ZoneId(6)));
        assert_eq!(table.resolve(-5.0, 10.0), None);
    }

    #[test]
    fn test_zone_first_match_wins() {
        let table = ZoneTable {
            zones: vec![Zone::new(3, 0.0, 0.0, 10.0, 10.0), Zone::new(1, 0.0, 0.0, 20.0, 20.0)],
        };
        assert_eq!(table.resolve(5.0, 5.0), Some(ZoneId(3)));
        assert_eq!(table.resolve(15.0, 15.0), Some(ZoneId(1)));
    }
}
