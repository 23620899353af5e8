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


//! VNC Raw encoding implementation.
//!
//! The simplest encoding that sends pixel data directly without compression.
//! High bandwidth but universally supported.

use super::Encoding;
use crate::protocol::PixelFormat;
use bytes::BytesMut;

/// Implements the VNC "Raw" encoding, which sends pixel data directly
/// without compression.
///
/// Each BGRA framebuffer pixel is serialized under the client's negotiated
/// pixel format, row by row. The payload is always exactly
/// `width * height * bytes_per_pixel` bytes.
pub struct RawEncoding;

impl Encoding for RawEncoding {
    fn encode(&self, data: &[u8], _width: u16, _height: u16, format: &PixelFormat) -> BytesMut {
        let mut buf = BytesMut::with_capacity(data.len() / 4 * format.bytes_per_pixel());
        for chunk in data.chunks_exact(4) {
            format.put_pixel(&mut buf, [chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        buf
    }
}
