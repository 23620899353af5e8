// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC Hextile encoding implementation.
//!
//! Hextile divides the rectangle into 16x16 tiles and encodes each
//! independently. Each tile can be: solid background, raw, monochrome with
//! subrects, or colored with subrects. Trailing tiles on the right and
//! bottom edges may be smaller than 16x16.

use super::common::{
    bgra_to_pixel_keys, extract_tile, find_subrects, get_background_color, put_color,
};
use super::Encoding;
use crate::protocol::{
    HEXTILE_ANY_SUBRECTS, HEXTILE_BACKGROUND_SPECIFIED, HEXTILE_FOREGROUND_SPECIFIED, HEXTILE_RAW,
    HEXTILE_SUBRECTS_COLOURED, PixelFormat,
};
use bytes::{BufMut, BytesMut};

/// Implements the VNC "Hextile" encoding.
///
/// Each tile opens with a subencoding mask byte. A tile with no
/// non-background pixels is just `BackgroundSpecified` plus the background
/// pixel; a busy tile (more subrects than a quarter of its cells) falls back
/// to `Raw`; otherwise the subrects are sent packed, with their color once
/// up front when a single foreground color covers them all.
pub struct HextileEncoding;

impl Encoding for HextileEncoding {
    #[allow(clippy::cast_possible_truncation)] // Hextile packs coordinates into u8 (tiles are at most 16x16)
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut {
        let mut buf = BytesMut::new();
        let pixels = bgra_to_pixel_keys(data);

        // Process tiles (16x16)
        for tile_y in (0..height).step_by(16) {
            for tile_x in (0..width).step_by(16) {
                let tile_w = std::cmp::min(16, width - tile_x);
                let tile_h = std::cmp::min(16, height - tile_y);

                // Extract tile data
                let tile_pixels = extract_tile(
                    &pixels,
                    width as usize,
                    tile_x as usize,
                    tile_y as usize,
                    tile_w as usize,
                    tile_h as usize,
                );

                let bg = get_background_color(&tile_pixels);
                let subrects =
                    find_subrects(&tile_pixels, tile_w as usize, tile_h as usize, bg);

                // Solid tile
                if subrects.is_empty() {
                    buf.put_u8(HEXTILE_BACKGROUND_SPECIFIED);
                    put_color(&mut buf, bg, format);
                    continue;
                }

                // Too fragmented for subrects; send the tile raw
                if subrects.len() > (tile_w as usize * tile_h as usize) / 4 {
                    buf.put_u8(HEXTILE_RAW);
                    for &pixel in &tile_pixels {
                        put_color(&mut buf, pixel, format);
                    }
                    continue;
                }

                let foreground = subrects[0].color;
                let is_mono = subrects.iter().all(|sr| sr.color == foreground);

                if is_mono {
                    // One foreground color: carry it once, subrects are bare coordinates
                    buf.put_u8(
                        HEXTILE_BACKGROUND_SPECIFIED
                            | HEXTILE_FOREGROUND_SPECIFIED
                            | HEXTILE_ANY_SUBRECTS,
                    );
                    put_color(&mut buf, bg, format);
                    put_color(&mut buf, foreground, format);
                    buf.put_u8(subrects.len() as u8);

                    for sr in subrects {
                        buf.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
                        buf.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
                    }
                } else {
                    // Colored subrects
                    buf.put_u8(
                        HEXTILE_BACKGROUND_SPECIFIED
                            | HEXTILE_ANY_SUBRECTS
                            | HEXTILE_SUBRECTS_COLOURED,
                    );
                    put_color(&mut buf, bg, format);
                    buf.put_u8(subrects.len() as u8);

                    for sr in subrects {
                        put_color(&mut buf, sr.color, format);
                        buf.put_u8(((sr.x as u8) << 4) | (sr.y as u8)); // packed X,Y
                        buf.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8)); // packed W-1,H-1
                    }
                }
            }
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    fn frame_from_keys(keys: &[u32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(keys.len() * 4);
        for key in keys {
            data.push((key & 0xFF) as u8);
            data.push(((key >> 8) & 0xFF) as u8);
            data.push(((key >> 16) & 0xFF) as u8);
            data.push(0xFF);
        }
        data
    }

    /// Applies a Hextile payload back onto a pixel grid (default 32bpp
    /// format), walking tiles in the same row-major order as the encoder.
    fn decode(payload: &[u8], width: usize, height: usize) -> Vec<u32> {
        let mut buf = payload;
        let mut pixels = vec![0u32; width * height];

        let get_pixel = |buf: &mut &[u8]| buf.get_u32_le() & 0x00FF_FFFF;

        for tile_y in (0..height).step_by(16) {
            for tile_x in (0..width).step_by(16) {
                let tile_w = 16.min(width - tile_x);
                let tile_h = 16.min(height - tile_y);
                let mask = buf.get_u8();

                if mask & HEXTILE_RAW != 0 {
                    for dy in 0..tile_h {
                        for dx in 0..tile_w {
                            pixels[(tile_y + dy) * width + tile_x + dx] = get_pixel(&mut buf);
                        }
                    }
                    continue;
                }

                assert_ne!(mask & HEXTILE_BACKGROUND_SPECIFIED, 0);
                let bg = get_pixel(&mut buf);
                for dy in 0..tile_h {
                    for dx in 0..tile_w {
                        pixels[(tile_y + dy) * width + tile_x + dx] = bg;
                    }
                }

                let fg = if mask & HEXTILE_FOREGROUND_SPECIFIED != 0 {
                    Some(get_pixel(&mut buf))
                } else {
                    None
                };

                if mask & HEXTILE_ANY_SUBRECTS == 0 {
                    continue;
                }

                let count = buf.get_u8() as usize;
                for _ in 0..count {
                    let color = if mask & HEXTILE_SUBRECTS_COLOURED != 0 {
                        get_pixel(&mut buf)
                    } else {
                        fg.expect("mono subrects need a foreground")
                    };
                    let xy = buf.get_u8() as usize;
                    let wh = buf.get_u8() as usize;
                    let (x, y) = (xy >> 4, xy & 0xF);
                    let (w, h) = ((wh >> 4) + 1, (wh & 0xF) + 1);
                    for dy in 0..h {
                        for dx in 0..w {
                            pixels[(tile_y + y + dy) * width + tile_x + x + dx] = color;
                        }
                    }
                }
            }
        }

        assert!(!buf.has_remaining());
        pixels
    }

    #[test]
    fn test_solid_red_tile_bytes() {
        // 16x16 tile of pure red in BGRA
        let data = [0x00, 0x00, 0xFF, 0xFF].repeat(256);
        let payload = HextileEncoding.encode(&data, 16, 16, &PixelFormat::bgra32());
        assert_eq!(payload.len(), 5);
        assert_eq!(&payload[..], &[0x02, 0x00, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_solid_screen_is_one_background_per_tile() {
        // 48x32 solid screen: 3x2 tiles, each mask byte + one pixel
        let keys = vec![0x0012_3456u32; 48 * 32];
        let payload = HextileEncoding.encode(&frame_from_keys(&keys), 48, 32, &PixelFormat::bgra32());
        assert_eq!(payload.len(), 6 * (1 + 4));
        assert_eq!(decode(&payload, 48, 32), keys);
    }

    #[test]
    fn test_mono_tile_carries_foreground_once() {
        // Black tile with two white rectangles
        let mut keys = vec![0u32; 256];
        for x in 1..5 {
            keys[2 * 16 + x] = 0x00FF_FFFF;
        }
        for x in 8..12 {
            keys[9 * 16 + x] = 0x00FF_FFFF;
        }

        let payload = HextileEncoding.encode(&frame_from_keys(&keys), 16, 16, &PixelFormat::bgra32());
        assert_eq!(
            payload[0],
            HEXTILE_BACKGROUND_SPECIFIED | HEXTILE_FOREGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS
        );
        // mask + bg + fg + count + 2 packed subrects
        assert_eq!(payload.len(), 1 + 4 + 4 + 1 + 2 * 2);
        assert_eq!(decode(&payload, 16, 16), keys);
    }

    #[test]
    fn test_colored_tile_carries_color_per_subrect() {
        let mut keys = vec![0u32; 256];
        keys[3 * 16 + 3] = 0x00FF_0000;
        keys[12 * 16 + 12] = 0x0000_00FF;

        let payload = HextileEncoding.encode(&frame_from_keys(&keys), 16, 16, &PixelFormat::bgra32());
        assert_eq!(
            payload[0],
            HEXTILE_BACKGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS | HEXTILE_SUBRECTS_COLOURED
        );
        // mask + bg + count + 2 subrects of (pixel + 2 packed bytes)
        assert_eq!(payload.len(), 1 + 4 + 1 + 2 * 6);
        assert_eq!(decode(&payload, 16, 16), keys);
    }

    #[test]
    fn test_fragmented_tile_falls_back_to_raw() {
        // Checkerboard: every non-background cell is its own subrect, far
        // beyond a quarter of the tile.
        let mut keys = vec![0u32; 256];
        for y in 0..16 {
            for x in 0..16 {
                if (x + y) % 2 == 0 {
                    keys[y * 16 + x] = 0x00FF_FFFF;
                }
            }
        }

        let payload = HextileEncoding.encode(&frame_from_keys(&keys), 16, 16, &PixelFormat::bgra32());
        assert_eq!(payload[0], HEXTILE_RAW);
        assert_eq!(payload.len(), 1 + 256 * 4);
        assert_eq!(decode(&payload, 16, 16), keys);
    }

    #[test]
    fn test_trailing_tiles_are_clipped() {
        // 20x18: four tiles, three of them partial
        let mut keys = vec![0x0055_5555u32; 20 * 18];
        keys[17 * 20 + 19] = 0x00AB_CDEF; // inside the bottom-right 4x2 tile

        let payload = HextileEncoding.encode(&frame_from_keys(&keys), 20, 18, &PixelFormat::bgra32());
        assert_eq!(decode(&payload, 20, 18), keys);
    }

    #[test]
    fn test_mixed_content_roundtrip() {
        // 40x24 with a gradient band, solid areas and a few rectangles
        let mut keys = vec![0x0080_8080u32; 40 * 24];
        for x in 0..40 {
            keys[5 * 40 + x] = 0x0000_0100 + x as u32;
        }
        for y in 10..20 {
            for x in 4..30 {
                keys[y * 40 + x] = 0x0000_FF00;
            }
        }

        let payload = HextileEncoding.encode(&frame_from_keys(&keys), 40, 24, &PixelFormat::bgra32());
        assert_eq!(decode(&payload, 40, 24), keys);
    }
}
