// ============================================================================
// PALETTE QUANTIZATION: nearest allowed colour per opaque pixel
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

use crate::palette::{Rgb, SelectedColorSet};

/// Map every opaque pixel of `image` to its nearest allowed colour.
///
/// * Fully transparent pixels (alpha 0) are copied through untouched.
/// * Alpha is always preserved.
/// * An empty selection returns an unmodified copy of the input.
///
/// Always returns a new buffer; `image` is never modified.
pub fn quantize(image: &RgbaImage, allowed: &SelectedColorSet) -> RgbaImage {
    let palette = allowed.allowed_colors();
    quantize_with_palette(image, &palette)
}

/// Same as [`quantize`] against an explicit palette.  Ties resolve to the
/// earliest palette entry.
pub fn quantize_with_palette(image: &RgbaImage, palette: &[Rgb]) -> RgbaImage {
    let mut out = image.clone();
    if palette.is_empty() || image.width() == 0 || image.height() == 0 {
        return out;
    }

    let row_bytes = image.width() as usize * 4;
    let raw: &mut [u8] = &mut out;
    raw.par_chunks_mut(row_bytes).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            if px[3] == 0 {
                continue;
            }
            let nearest = nearest_color([px[0], px[1], px[2]], palette);
            px[..3].copy_from_slice(&nearest);
        }
    });
    out
}

/// Closest palette entry by Euclidean RGB distance; the first minimum wins.
/// With an empty palette the input colour is returned.
pub fn nearest_color(rgb: Rgb, palette: &[Rgb]) -> Rgb {
    let mut best = rgb;
    let mut best_dist = u32::MAX;
    for &candidate in palette {
        let d = color_dist_sq(rgb, candidate);
        if d < best_dist {
            best_dist = d;
            best = candidate;
        }
    }
    best
}

/// Squared Euclidean distance in RGB space (ordering matches the true distance).
#[inline]
fn color_dist_sq(a: Rgb, b: Rgb) -> u32 {
    let dr = a[0] as i32 - b[0] as i32;
    let dg = a[1] as i32 - b[1] as i32;
    let db = a[2] as i32 - b[2] as i32;
    (dr * dr + dg * dg + db * db) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Tier;
    use image::Rgba;

    const BLACK_WHITE: [Rgb; 2] = [[0, 0, 0], [255, 255, 255]];

    fn sample_image() -> RgbaImage {
        RgbaImage::from_fn(7, 5, |x, y| {
            let a = if (x + y) % 4 == 0 { 0 } else { 40 + (x * 30) as u8 };
            Rgba([(x * 37) as u8, (y * 51) as u8, ((x + y) * 19) as u8, a])
        })
    }

    #[test]
    fn empty_selection_is_identity() {
        let img = sample_image();
        let out = quantize(&img, &SelectedColorSet::none());
        assert_eq!(out.as_raw(), img.as_raw());
        assert_eq!(out.dimensions(), img.dimensions());
    }

    #[test]
    fn grey_maps_to_nearest_of_black_and_white() {
        assert_eq!(nearest_color([100, 100, 100], &BLACK_WHITE), [0, 0, 0]);
        assert_eq!(nearest_color([200, 200, 200], &BLACK_WHITE), [255, 255, 255]);
    }

    #[test]
    fn ties_resolve_to_first_palette_entry() {
        let palette = [[10, 0, 0], [0, 10, 0]];
        assert_eq!(nearest_color([5, 5, 0], &palette), [10, 0, 0]);
        let reversed = [[0, 10, 0], [10, 0, 0]];
        assert_eq!(nearest_color([5, 5, 0], &reversed), [0, 10, 0]);
    }

    #[test]
    fn transparent_pixels_untouched_and_alpha_kept() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([100, 100, 100, 0]));
        img.put_pixel(1, 0, Rgba([200, 190, 210, 17]));
        let out = quantize_with_palette(&img, &BLACK_WHITE);
        assert_eq!(out.get_pixel(0, 0), &Rgba([100, 100, 100, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([255, 255, 255, 17]));
    }

    #[test]
    fn opaque_output_stays_within_selection() {
        let img = sample_image();
        let selection = SelectedColorSet::new_session();
        let allowed = selection.allowed_colors();
        let out = quantize(&img, &selection);
        for (src, dst) in img.pixels().zip(out.pixels()) {
            if src[3] == 0 {
                assert_eq!(src, dst);
            } else {
                assert!(allowed.contains(&[dst[0], dst[1], dst[2]]));
                assert_eq!(src[3], dst[3]);
            }
        }
    }

    #[test]
    fn quantize_is_deterministic() {
        let img = sample_image();
        let mut selection = SelectedColorSet::new_session();
        selection.toggle_all(Tier::Paid);
        let a = quantize(&img, &selection);
        let b = quantize(&img, &selection);
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
