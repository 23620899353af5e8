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


//! Common helper functions shared across multiple VNC encodings.

use bytes::BytesMut;
use std::collections::HashMap;

use crate::protocol::PixelFormat;

/// Represents a subrectangle in RRE/Hextile encoding.
#[derive(Debug)]
pub struct Subrect {
    /// The color value of this subrectangle as a packed `0x00RRGGBB` key
    pub color: u32,
    /// The X coordinate of the subrectangle's top-left corner
    pub x: u16,
    /// The Y coordinate of the subrectangle's top-left corner
    pub y: u16,
    /// The width of the subrectangle in pixels
    pub w: u16,
    /// The height of the subrectangle in pixels
    pub h: u16,
}

/// Convert BGRA (4 bytes/pixel) to packed color keys.
/// Blue lands at bits 0-7, green at 8-15, red at 16-23; the alpha byte is
/// dropped. The key therefore equals the pixel value of the server's native
/// format, so equal keys mean equal on-wire pixels.
pub fn bgra_to_pixel_keys(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|chunk| {
            (chunk[0] as u32) | // B at bits 0-7
            ((chunk[1] as u32) << 8)  | // G at bits 8-15
            ((chunk[2] as u32) << 16)   // R at bits 16-23
        })
        .collect()
}

/// Serialize a packed color key as one pixel under the client's format.
#[allow(clippy::cast_possible_truncation)] // each channel is masked to one byte
pub fn put_color(buf: &mut BytesMut, color: u32, format: &PixelFormat) {
    let bgra = [
        (color & 0xFF) as u8,
        ((color >> 8) & 0xFF) as u8,
        ((color >> 16) & 0xFF) as u8,
        0,
    ];
    format.put_pixel(buf, bgra);
}

/// Find the most common color in the pixel array.
pub fn get_background_color(pixels: &[u32]) -> u32 {
    if pixels.is_empty() {
        return 0;
    }

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *counts.entry(pixel).or_insert(0) += 1;
    }

    counts.into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(color, _)| color)
        .unwrap_or(pixels[0])
}

/// Find subrectangles of non-background pixels.
///
/// Scans in row-major order. Each unprocessed pixel that differs from the
/// background seeds a rectangle that is grown greedily: first to the right
/// while the color matches, then downward row by row while the whole strip
/// matches. Covered cells are marked and never revisited, so the returned
/// rectangles are disjoint and cover every non-background pixel exactly once.
#[allow(clippy::cast_possible_truncation)] // coordinates are bounded by u16 dimensions
pub fn find_subrects(pixels: &[u32], width: usize, height: usize, bg_color: u32) -> Vec<Subrect> {
    let mut subrects = Vec::new();
    let mut marked = vec![false; pixels.len()];

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if marked[idx] || pixels[idx] == bg_color {
                continue;
            }

            let color = pixels[idx];

            // Extend right while the color holds
            let mut w = 1;
            for test_x in (x + 1)..width {
                let test_idx = y * width + test_x;
                if marked[test_idx] || pixels[test_idx] != color {
                    break;
                }
                w = test_x - x + 1;
            }

            // Extend down while the whole strip holds
            let mut h = 1;
            'rows: for test_y in (y + 1)..height {
                for test_x in x..(x + w) {
                    let test_idx = test_y * width + test_x;
                    if marked[test_idx] || pixels[test_idx] != color {
                        break 'rows;
                    }
                }
                h = test_y - y + 1;
            }

            // Mark pixels as used
            for dy in 0..h {
                for dx in 0..w {
                    marked[(y + dy) * width + (x + dx)] = true;
                }
            }

            subrects.push(Subrect {
                color,
                x: x as u16,
                y: y as u16,
                w: w as u16,
                h: h as u16,
            });
        }
    }

    subrects
}

/// Extract a tile from the pixel array.
pub fn extract_tile(pixels: &[u32], width: usize, x: usize, y: usize, tw: usize, th: usize) -> Vec<u32> {
    let mut tile = Vec::with_capacity(tw * th);
    for dy in 0..th {
        for dx in 0..tw {
            tile.push(pixels[(y + dy) * width + (x + dx)]);
        }
    }
    tile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_keys_drop_alpha() {
        // Pure red BGRA pixel with opaque alpha
        let keys = bgra_to_pixel_keys(&[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(keys, vec![0x00FF_0000]);
    }

    #[test]
    fn test_background_is_most_frequent() {
        let pixels = vec![7, 7, 7, 3, 3, 9];
        assert_eq!(get_background_color(&pixels), 7);
    }

    #[test]
    fn test_find_subrects_covers_non_background_exactly() {
        // 4x3: background 0 with an L of 1s and a lone 2
        let pixels = vec![
            1, 1, 0, 0, //
            1, 0, 0, 0, //
            0, 0, 0, 2,
        ];
        let subrects = find_subrects(&pixels, 4, 3, 0);

        let mut covered = vec![0u8; pixels.len()];
        for sr in &subrects {
            assert_ne!(sr.color, 0);
            for dy in 0..sr.h as usize {
                for dx in 0..sr.w as usize {
                    covered[(sr.y as usize + dy) * 4 + sr.x as usize + dx] += 1;
                }
            }
        }
        for (idx, &pixel) in pixels.iter().enumerate() {
            assert_eq!(covered[idx], u8::from(pixel != 0), "cell {idx}");
        }
    }

    #[test]
    fn test_find_subrects_grows_right_then_down() {
        // A 2x2 block of one color collapses into a single rectangle.
        let pixels = vec![
            5, 5, 0, //
            5, 5, 0, //
        ];
        let subrects = find_subrects(&pixels, 3, 2, 0);
        assert_eq!(subrects.len(), 1);
        let sr = &subrects[0];
        assert_eq!((sr.x, sr.y, sr.w, sr.h), (0, 0, 2, 2));
    }
}
