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

//! VNC RRE (Rise-and-Run-length Encoding) implementation.
//!
//! RRE encodes a rectangle as a background color plus a list of subrectangles
//! with their own colors. Effective for large solid regions.

use super::common::{bgra_to_pixel_keys, find_subrects, get_background_color, put_color};
use super::Encoding;
use crate::protocol::PixelFormat;
use bytes::{BufMut, BytesMut};

/// Maximum subrectangle count up to which RRE is considered worthwhile.
const MAX_EFFICIENT_SUBRECTS: usize = 50;

/// Implements the VNC "RRE" (Rise-and-Run-length Encoding).
///
/// RRE encodes a rectangle as a background color plus a list of subrectangles
/// with their own colors. Format: \[nSubrects(u32)\]\[bgColor\]\[subrect1\]...\[subrectN\]
/// Each subrect: \[color\]\[x(u16)\]\[y(u16)\]\[w(u16)\]\[h(u16)\], with
/// coordinates relative to the rectangle origin.
pub struct RreEncoding;

impl Encoding for RreEncoding {
    #[allow(clippy::cast_possible_truncation)] // Subrectangle count limited to image size per VNC protocol
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut {
        let pixels = bgra_to_pixel_keys(data);

        // Find background color (most common pixel)
        let bg_color = get_background_color(&pixels);

        // Find all subrectangles
        let subrects = find_subrects(&pixels, width as usize, height as usize, bg_color);

        let bpp = format.bytes_per_pixel();
        let mut buf = BytesMut::with_capacity(4 + bpp + subrects.len() * (bpp + 8));

        buf.put_u32(subrects.len() as u32); // number of subrectangles (big-endian)
        put_color(&mut buf, bg_color, format);

        for subrect in subrects {
            put_color(&mut buf, subrect.color, format);
            buf.put_u16(subrect.x); // protocol coordinates (big-endian)
            buf.put_u16(subrect.y);
            buf.put_u16(subrect.w);
            buf.put_u16(subrect.h);
        }

        buf
    }
}

/// Whether an RRE encoding is worth sending instead of Raw.
///
/// True iff the subrectangle count stays at or below 50 and the encoded
/// payload is smaller than half the raw payload. The runtime never selects
/// RRE on its own; this predicate is for callers with an explicit policy.
#[must_use]
pub fn is_efficient(num_subrects: usize, encoded_len: usize, raw_len: usize) -> bool {
    num_subrects <= MAX_EFFICIENT_SUBRECTS && encoded_len * 2 < raw_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    /// Applies an RRE payload back onto a pixel grid (default 32bpp format).
    fn decode(payload: &[u8], width: usize, height: usize) -> Vec<u32> {
        let mut buf = payload;
        let num_subrects = buf.get_u32() as usize;
        let bg = buf.get_u32_le() & 0x00FF_FFFF;

        let mut pixels = vec![bg; width * height];
        for _ in 0..num_subrects {
            let color = buf.get_u32_le() & 0x00FF_FFFF;
            let x = buf.get_u16() as usize;
            let y = buf.get_u16() as usize;
            let w = buf.get_u16() as usize;
            let h = buf.get_u16() as usize;
            for dy in 0..h {
                for dx in 0..w {
                    pixels[(y + dy) * width + (x + dx)] = color;
                }
            }
        }
        assert!(!buf.has_remaining());
        pixels
    }

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

    #[test]
    fn test_solid_rect_has_no_subrects() {
        let keys = vec![0x0000_FF00u32; 8 * 8];
        let payload = RreEncoding.encode(&frame_from_keys(&keys), 8, 8, &PixelFormat::bgra32());

        // count + background pixel only
        assert_eq!(payload.len(), 8);
        assert_eq!(&payload[0..4], &[0, 0, 0, 0]);
        assert_eq!(decode(&payload, 8, 8), keys);
    }

    #[test]
    fn test_decode_reconstructs_input() {
        // White background with a red square and a blue bar
        let mut keys = vec![0x00FF_FFFFu32; 16 * 8];
        for y in 2..5 {
            for x in 3..7 {
                keys[y * 16 + x] = 0x00FF_0000;
            }
        }
        for x in 9..16 {
            keys[6 * 16 + x] = 0x0000_00FF;
        }

        let payload = RreEncoding.encode(&frame_from_keys(&keys), 16, 8, &PixelFormat::bgra32());
        assert_eq!(decode(&payload, 16, 8), keys);
    }

    #[test]
    fn test_two_disjoint_rects_is_efficient() {
        let mut keys = vec![0u32; 64 * 64];
        for y in 0..10 {
            for x in 0..10 {
                keys[y * 64 + x] = 0x00AA_BBCC;
                keys[(y + 40) * 64 + x + 40] = 0x0011_2233;
            }
        }
        let payload = RreEncoding.encode(&frame_from_keys(&keys), 64, 64, &PixelFormat::bgra32());

        // count + bg + two 12-byte subrect records at 32bpp
        assert_eq!(payload.len(), 4 + 4 + 2 * 12);
        assert!(is_efficient(2, payload.len(), 64 * 64 * 4));
    }

    #[test]
    fn test_is_efficient_thresholds() {
        assert!(is_efficient(50, 100, 1000));
        assert!(!is_efficient(51, 100, 1000)); // too many subrects
        assert!(!is_efficient(10, 500, 1000)); // not under half of raw
        assert!(is_efficient(10, 499, 1000));
    }
}
