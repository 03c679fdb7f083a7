use image::{Rgba, RgbaImage};
use proptest::prelude::*;

use pixel_overlay::ops::{ChunkError, chunk, quantize};
use pixel_overlay::palette::{SelectedColorSet, color_key};
use pixel_overlay::tiles::{GlobalCoordinate, TILE_SIZE, TileKey};

fn gradient(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 251) as u8, (y % 241) as u8, ((x + y) % 7) as u8, 255]))
}

fn keys(anchor: (u32, u32), size: (u32, u32)) -> Vec<TileKey> {
    let map = chunk(&gradient(size.0, size.1), Some(GlobalCoordinate::new(anchor.0, anchor.1))).unwrap();
    map.keys().copied().collect()
}

#[test]
fn partition_counts() {
    assert_eq!(keys((0, 0), (10, 10)), vec![TileKey::new(0, 0)]);
    assert_eq!(
        keys((999, 999), (2, 2)),
        vec![TileKey::new(0, 0), TileKey::new(1, 0), TileKey::new(0, 1), TileKey::new(1, 1)]
    );
    assert_eq!(keys((999, 999), (1, 1)), vec![TileKey::new(0, 0)]);
    assert_eq!(keys((0, 0), (TILE_SIZE, TILE_SIZE)), vec![TileKey::new(0, 0)]);
    assert_eq!(keys((1, 0), (TILE_SIZE, 1)).len(), 2);
}

#[test]
fn missing_anchor_is_reported() {
    assert!(matches!(chunk(&gradient(3, 3), None), Err(ChunkError::MissingAnchor)));
}

#[test]
fn chunk_keys_render_as_tile_keys() {
    let map = chunk(&gradient(5, 5), Some(GlobalCoordinate::new(12_998, 67_000))).unwrap();
    let rendered: Vec<String> = map.keys().map(ToString::to_string).collect();
    assert_eq!(rendered, vec!["0012,0067", "0013,0067"]);
}

#[test]
fn encoded_tiles_are_png_data_urls() {
    let map = chunk(&gradient(4, 4), Some(GlobalCoordinate::new(998, 3))).unwrap();
    let encoded = map.encode().unwrap();
    assert_eq!(encoded.len(), 2);
    for (key, url) in &encoded {
        let decoded = pixel_overlay::io::decode_data_url(url).unwrap();
        assert_eq!(&decoded, &map.get(key).unwrap().pixels);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn chunks_tile_the_placed_image_exactly(
        w in 1u32..1400,
        h in 1u32..1400,
        ax in 0u32..4000,
        ay in 0u32..4000,
    ) {
        let img = gradient(w, h);
        let map = chunk(&img, Some(GlobalCoordinate::new(ax, ay))).unwrap();

        let mut hits = vec![0u8; (w * h) as usize];
        for c in map.iter() {
            let (ox, oy) = c.key.origin();
            prop_assert!(c.width > 0 && c.height > 0);
            prop_assert!(c.dst_x + c.width <= TILE_SIZE && c.dst_y + c.height <= TILE_SIZE);
            prop_assert_eq!(ox + c.dst_x as u64, ax as u64 + c.src_x as u64);
            prop_assert_eq!(oy + c.dst_y as u64, ay as u64 + c.src_y as u64);

            for y in c.src_y..c.src_y + c.height {
                for x in c.src_x..c.src_x + c.width {
                    hits[(y * w + x) as usize] += 1;
                }
            }

            // Corner pixels land where the offsets say
            let last = (c.src_x + c.width - 1, c.src_y + c.height - 1);
            prop_assert_eq!(c.pixels.get_pixel(c.dst_x, c.dst_y), img.get_pixel(c.src_x, c.src_y));
            prop_assert_eq!(
                c.pixels.get_pixel(c.dst_x + c.width - 1, c.dst_y + c.height - 1),
                img.get_pixel(last.0, last.1)
            );
        }
        prop_assert!(hits.iter().all(|&n| n == 1));
    }

    #[test]
    fn quantized_opaque_pixels_use_allowed_colors(
        pixels in proptest::collection::vec(any::<[u8; 4]>(), 1..64),
    ) {
        let w = pixels.len() as u32;
        let img = RgbaImage::from_fn(w, 1, |x, _| Rgba(pixels[x as usize]));
        let selection = SelectedColorSet::new_session();
        let out = quantize(&img, &selection);

        for (src, dst) in img.pixels().zip(out.pixels()) {
            if src[3] == 0 {
                prop_assert_eq!(src, dst);
            } else {
                prop_assert_eq!(src[3], dst[3]);
                prop_assert!(selection.contains(
                    pixel_overlay::palette::Tier::Free,
                    &color_key([dst[0], dst[1], dst[2]])
                ));
            }
        }
        prop_assert_eq!(&quantize(&img, &SelectedColorSet::none()), &img);
    }
}
