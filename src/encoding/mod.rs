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

//! VNC encoding implementations.
//!
//! This module provides the rectangle encoders used for framebuffer
//! transmission: Raw, CopyRect, RRE and Hextile. Every encoder is a pure
//! function from a BGRA sub-rectangle to the encoding's payload bytes; the
//! per-rectangle header is written by the session.

use crate::protocol::{ENCODING_HEXTILE, ENCODING_RAW, ENCODING_RRE, PixelFormat};
use bytes::BytesMut;

pub mod common;
pub mod copyrect;
pub mod hextile;
pub mod raw;
pub mod rre;

// Re-export common types
pub use common::*;

// Re-export encoding implementations
pub use copyrect::copy_rect_payload;
pub use hextile::HextileEncoding;
pub use raw::RawEncoding;
pub use rre::RreEncoding;

/// Trait defining the interface for VNC encoding implementations.
pub trait Encoding: Send {
    /// Encodes the pixels of one sub-rectangle into the encoding's payload.
    ///
    /// # Arguments
    ///
    /// * `data` - BGRA pixel data of the sub-rectangle (4 bytes per pixel,
    ///   row-major, `width * height * 4` bytes)
    /// * `width` - Width of the sub-rectangle
    /// * `height` - Height of the sub-rectangle
    /// * `format` - The client's negotiated pixel format
    ///
    /// # Returns
    ///
    /// Encoded payload as `BytesMut`, without the rectangle header.
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut;
}

/// Creates an encoder instance for the specified encoding type.
///
/// CopyRect is absent deliberately: its payload is the source position, not
/// pixel data, so it goes through [`copy_rect_payload`] instead.
#[must_use] pub fn get_encoder(encoding_type: i32) -> Option<Box<dyn Encoding>> {
    match encoding_type {
        ENCODING_RAW => Some(Box::new(RawEncoding)),
        ENCODING_RRE => Some(Box::new(RreEncoding)),
        ENCODING_HEXTILE => Some(Box::new(HextileEncoding)),
        _ => None,
    }
}

/// Picks the encoding for ordinary framebuffer updates.
///
/// Hextile when the client advertised it, Raw otherwise. CopyRect is only
/// used when the caller supplies an explicit source position, and RRE is
/// never selected automatically.
#[must_use]
pub fn choose_encoding(advertised: &[i32]) -> i32 {
    if advertised.contains(&ENCODING_HEXTILE) {
        ENCODING_HEXTILE
    } else {
        ENCODING_RAW
    }
}
