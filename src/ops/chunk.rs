// ============================================================================
// TILE CHUNKING: slice a placed image into host-tile-sized buffers
// ============================================================================

use std::collections::BTreeMap;

use image::RgbaImage;
use rayon::prelude::*;
use thiserror::Error;

use crate::io::{self, ImageIoError};
use crate::tiles::{GlobalCoordinate, TILE_SIZE, TileKey};

#[derive(Debug, Error)]
pub enum ChunkError {
    /// Nothing to pin the image to yet.  Recoverable by the user.
    #[error("no anchor coordinate is set; capture a position on the canvas first")]
    MissingAnchor,
}

/// The part of the source image that lands on one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub key: TileKey,
    /// Top-left of the copied region inside the source image.
    pub src_x: u32,
    pub src_y: u32,
    /// Where that region starts inside the tile buffer.
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
    /// `TILE_SIZE × TILE_SIZE`, transparent outside the copied region.
    pub pixels: RgbaImage,
}

/// Tile-keyed chunks of one placed image, ordered row-major by tile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMap {
    anchor: GlobalCoordinate,
    chunks: BTreeMap<TileKey, Chunk>,
}

impl ChunkMap {
    pub fn anchor(&self) -> GlobalCoordinate {
        self.anchor
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, key: &TileKey) -> Option<&Chunk> {
        self.chunks.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.chunks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// PNG data URLs keyed by tile, the persisted `chunkedTiles` form.
    pub fn encode(&self) -> Result<BTreeMap<TileKey, String>, ImageIoError> {
        let encoded: Vec<(TileKey, Result<String, ImageIoError>)> = self
            .chunks
            .par_iter()
            .map(|(key, chunk)| (*key, io::to_png_data_url(&chunk.pixels)))
            .collect();

        let mut out = BTreeMap::new();
        for (key, url) in encoded {
            out.insert(key, url?);
        }
        Ok(out)
    }
}

/// Partition `image`, placed with its top-left at `anchor`, into tile buffers.
///
/// Fails fast with [`ChunkError::MissingAnchor`] when no anchor is given.
/// A zero-area image yields an empty map.  Pure: the same input always
/// produces the same map.
pub fn chunk(image: &RgbaImage, anchor: Option<GlobalCoordinate>) -> Result<ChunkMap, ChunkError> {
    let anchor = anchor.ok_or(ChunkError::MissingAnchor)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(ChunkMap {
            anchor,
            chunks: BTreeMap::new(),
        });
    }

    let tile = TILE_SIZE as u64;
    let (ax, ay) = (anchor.x as u64, anchor.y as u64);
    let (w, h) = (width as u64, height as u64);

    let start_tx = ax / tile;
    let start_ty = ay / tile;
    let end_tx = (ax + w - 1) / tile;
    let end_ty = (ay + h - 1) / tile;

    let tiles: Vec<(u64, u64)> = (start_ty..=end_ty)
        .flat_map(|ty| (start_tx..=end_tx).map(move |tx| (tx, ty)))
        .collect();

    let src_raw = image.as_raw();
    let src_stride = width as usize * 4;

    let chunks: Vec<Chunk> = tiles
        .into_par_iter()
        .filter_map(|(tx, ty)| {
            let (ox, oy) = (tx * tile, ty * tile);

            // Overlap of [ax, ax+w) × [ay, ay+h) with the tile, in global space
            let gx0 = ax.max(ox);
            let gy0 = ay.max(oy);
            let gx1 = (ax + w).min(ox + tile);
            let gy1 = (ay + h).min(oy + tile);
            if gx1 <= gx0 || gy1 <= gy0 {
                return None;
            }

            let src_x = (gx0 - ax) as u32;
            let src_y = (gy0 - ay) as u32;
            let dst_x = (gx0 - ox) as u32;
            let dst_y = (gy0 - oy) as u32;
            let cw = (gx1 - gx0) as u32;
            let ch = (gy1 - gy0) as u32;

            let tile_stride = TILE_SIZE as usize * 4;
            let mut data = vec![0u8; tile_stride * TILE_SIZE as usize];
            let byte_len = cw as usize * 4;
            for ly in 0..ch as usize {
                let src_start = (src_y as usize + ly) * src_stride + src_x as usize * 4;
                let dst_start = (dst_y as usize + ly) * tile_stride + dst_x as usize * 4;
                data[dst_start..dst_start + byte_len]
                    .copy_from_slice(&src_raw[src_start..src_start + byte_len]);
            }

            let pixels = RgbaImage::from_raw(TILE_SIZE, TILE_SIZE, data)?;
            Some(Chunk {
                key: TileKey::new(tx as u32, ty as u32),
                src_x,
                src_y,
                dst_x,
                dst_y,
                width: cw,
                height: ch,
                pixels,
            })
        })
        .collect();

    Ok(ChunkMap {
        anchor,
        chunks: chunks.into_iter().map(|c| (c.key, c)).collect(),
    })
}
