//! Canvas geometry: global pixel coordinates and the 1000×1000 tile grid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Edge length of one host tile in pixels.  All grid math depends on this
/// matching the host's own tiling.
pub const TILE_SIZE: u32 = 1000;

/// Absolute pixel position on the host canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalCoordinate {
    pub x: u32,
    pub y: u32,
}

impl GlobalCoordinate {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// `tile * TILE_SIZE + pixel` on both axes; `None` on overflow.
    pub fn from_tile_pixel(tile: (u32, u32), pixel: (u32, u32)) -> Option<Self> {
        let x = tile.0.checked_mul(TILE_SIZE)?.checked_add(pixel.0)?;
        let y = tile.1.checked_mul(TILE_SIZE)?.checked_add(pixel.1)?;
        Some(Self { x, y })
    }
}

impl fmt::Display for GlobalCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for GlobalCoordinate {
    type Err = String;

    /// Accepts `x,y` (whitespace around either number is allowed).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected \"x,y\", got {:?}", s))?;
        let x = x
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid x {:?}: {}", x.trim(), e))?;
        let y = y
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid y {:?}: {}", y.trim(), e))?;
        Ok(Self { x, y })
    }
}

/// Tile-grid index.  Orders row-major (y, then x) so iteration follows the
/// same order the chunker fills tiles in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Tile that contains `coord`.
    pub fn containing(coord: GlobalCoordinate) -> Self {
        Self {
            x: coord.x / TILE_SIZE,
            y: coord.y / TILE_SIZE,
        }
    }

    /// Top-left corner of this tile in global space (u64: the far tiles of a
    /// u32 canvas start beyond u32::MAX).
    pub fn origin(&self) -> (u64, u64) {
        (
            self.x as u64 * TILE_SIZE as u64,
            self.y as u64 * TILE_SIZE as u64,
        )
    }
}

impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

/// Zero-padded to four digits, never truncated: `0007,0012`, `12345,0001`.
impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04},{:04}", self.x, self.y)
    }
}

impl FromStr for TileKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("tile key {:?} has no comma", s))?;
        let parse = |part: &str| -> Result<u32, String> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("tile key {:?} is not decimal", s));
            }
            part.parse::<u32>()
                .map_err(|e| format!("tile key {:?}: {}", s, e))
        };
        Ok(Self {
            x: parse(x)?,
            y: parse(y)?,
        })
    }
}

impl Serialize for TileKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_key_pads_but_never_truncates() {
        assert_eq!(TileKey::new(7, 12).to_string(), "0007,0012");
        assert_eq!(TileKey::new(12345, 0).to_string(), "12345,0000");
        assert_eq!(TileKey::new(12, 67).to_string(), "0012,0067");
    }

    #[test]
    fn tile_key_parses_its_own_format() {
        assert_eq!("0012,0067".parse::<TileKey>(), Ok(TileKey::new(12, 67)));
        assert_eq!("12345,7".parse::<TileKey>(), Ok(TileKey::new(12345, 7)));
        assert!("12;67".parse::<TileKey>().is_err());
        assert!("-1,2".parse::<TileKey>().is_err());
        assert!(",2".parse::<TileKey>().is_err());
    }

    #[test]
    fn tile_key_orders_row_major() {
        let mut keys = vec![TileKey::new(1, 0), TileKey::new(0, 1), TileKey::new(0, 0)];
        keys.sort();
        assert_eq!(keys, vec![TileKey::new(0, 0), TileKey::new(1, 0), TileKey::new(0, 1)]);
    }

    #[test]
    fn containing_tile_floor_divides() {
        assert_eq!(TileKey::containing(GlobalCoordinate::new(999, 1000)), TileKey::new(0, 1));
        assert_eq!(TileKey::containing(GlobalCoordinate::new(12_345, 67_001)), TileKey::new(12, 67));
    }

    #[test]
    fn global_from_tile_and_pixel() {
        assert_eq!(
            GlobalCoordinate::from_tile_pixel((12, 67), (345, 6)),
            Some(GlobalCoordinate::new(12_345, 67_006))
        );
        assert_eq!(GlobalCoordinate::from_tile_pixel((u32::MAX, 0), (0, 0)), None);
    }

    #[test]
    fn coordinate_text_round_trip() {
        assert_eq!("12, 34".parse::<GlobalCoordinate>(), Ok(GlobalCoordinate::new(12, 34)));
        assert!("-1,2".parse::<GlobalCoordinate>().is_err());
        assert!("12".parse::<GlobalCoordinate>().is_err());
    }
}
