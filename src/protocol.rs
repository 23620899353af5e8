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

//! VNC Remote Framebuffer (RFB) protocol constants and structures.
//!
//! This module provides the fundamental building blocks for VNC protocol
//! communication: protocol version negotiation, message types, security
//! handshake constants, encoding identifiers, and pixel format handling.
//! It implements the RFB protocol as specified in RFC 6143, with graceful
//! downgrade to the legacy 3.3 and 3.7 versions.
//!
//! # Protocol Overview
//!
//! The VNC RFB protocol operates in the following phases:
//! 1. **Protocol Version** - Server and client agree on protocol version
//! 2. **Security Handshake** - Authentication method selection and execution
//! 3. **Initialization** - Exchange of framebuffer parameters and capabilities
//! 4. **Normal Operation** - Ongoing message exchange for input events and screen updates
//!
//! All multi-byte integers on the wire are network byte order; the
//! big-endian putters and getters of the [`bytes`] crate are the single
//! integer codec for the crate. Pixel serialization under a negotiated
//! format lives in [`PixelFormat::put_pixel`].

use bytes::{Buf, BufMut, BytesMut};
use std::io;

/// The RFB protocol version string advertised by the server.
///
/// This server implements RFB protocol version 3.8 and downgrades to 3.7 or
/// 3.3 based on the client's reply. The version string must be exactly 12
/// bytes including the newline character as specified by the RFB protocol.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

// Client-to-Server Message Types

/// Message type: Client requests to change the pixel format.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: Client specifies supported encodings.
///
/// The client sends a list of encoding types it supports, ordered by
/// preference. The server will use the first mutually supported encoding.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: Client requests a framebuffer update.
///
/// The client can request either an incremental update (changes only) or
/// a full refresh of a specified rectangular region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: Client sends a keyboard event.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: Client sends a pointer (mouse) event.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: Client sends cut text (clipboard data).
///
/// Clipboard relay is out of scope for this server; the payload is consumed
/// and discarded.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

/// Message type: Client requests a desktop resize (ExtendedDesktopSize).
///
/// This server never honors client-initiated resizes; the request is
/// acknowledged with a non-zero status when the client advertised the
/// pseudo-encoding, and silently dropped otherwise.
pub const CLIENT_MSG_SET_DESKTOP_SIZE: u8 = 251;

// Server-to-Client Message Types

/// Message type: Server sends a framebuffer update.
///
/// Contains one or more rectangles of pixel data representing screen changes.
/// This is the primary message for transmitting visual updates to the client.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

// Encoding Types

/// Encoding type: Raw pixel data.
///
/// The simplest encoding that sends uncompressed pixel data directly.
/// High bandwidth but universally supported.
pub const ENCODING_RAW: i32 = 0;

/// Encoding type: Copy Rectangle.
///
/// Instructs the client to copy a rectangular region from one location
/// to another on the screen. Highly efficient for scrolling operations.
pub const ENCODING_COPYRECT: i32 = 1;

/// Encoding type: Rise-and-Run-length Encoding.
///
/// A simple compression scheme for rectangular regions.
pub const ENCODING_RRE: i32 = 2;

/// Encoding type: Hextile.
///
/// Divides rectangles into 16x16 tiles for efficient encoding.
pub const ENCODING_HEXTILE: i32 = 5;

/// Pseudo-encoding: Rich Cursor.
///
/// Capability advertisement only; this server does not send cursor shapes.
pub const ENCODING_CURSOR: i32 = -239;

/// Pseudo-encoding: Desktop Size.
///
/// Notifies the client of framebuffer dimension changes.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Pseudo-encoding: Extended Desktop Size.
///
/// Clients advertising this receive an ExtendedDesktopSize rectangle when
/// the server resizes its framebuffer, and a rejection status when they
/// attempt a resize themselves.
pub const ENCODING_EXTENDED_DESKTOP_SIZE: i32 = -308;

// Hextile subencoding flags

/// Hextile: Raw pixel data for this tile.
pub const HEXTILE_RAW: u8 = 1 << 0;

/// Hextile: Background color is specified.
pub const HEXTILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;

/// Hextile: Foreground color is specified.
pub const HEXTILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;

/// Hextile: Tile contains subrectangles.
pub const HEXTILE_ANY_SUBRECTS: u8 = 1 << 3;

/// Hextile: Subrectangles are colored (not monochrome).
pub const HEXTILE_SUBRECTS_COLOURED: u8 = 1 << 4;

// Security Types

/// Security type: Invalid/Unknown.
///
/// Indicates an error or unsupported security mechanism.
#[allow(dead_code)]
pub const SECURITY_TYPE_INVALID: u8 = 0;

/// Security type: None (no authentication).
///
/// No authentication is required. The connection proceeds directly
/// to the initialization phase.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type: VNC Authentication.
///
/// Standard VNC authentication using DES-encrypted challenge-response.
/// The server sends a 16-byte challenge, which the client encrypts with
/// the password and returns.
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

// Security Results

/// Security result: Authentication successful.
pub const SECURITY_RESULT_OK: u32 = 0;

/// Security result: Authentication failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// The negotiated RFB protocol version of a session.
///
/// The server always offers 3.8; the effective version is whatever the
/// client replies with, clamped to the three versions the protocol family
/// defines. Anything unrecognized is treated as 3.3, matching the behavior
/// RFC 6143 prescribes for servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// RFB 3.3: server dictates the security type as a `u32`.
    V33,
    /// RFB 3.7: security type list and client selection, no reason strings.
    V37,
    /// RFB 3.8: security type list, client selection, and failure reasons.
    V38,
}

impl ProtocolVersion {
    /// Parses the client's 12-byte `ProtocolVersion` reply.
    ///
    /// The reply must have the shape `RFB 003.NNN\n`; minor versions other
    /// than 003, 007 and 008 downgrade to 3.3.
    ///
    /// # Errors
    ///
    /// Returns `Err(io::Error)` with kind `InvalidData` when the reply does
    /// not have the `RFB ` prefix / newline terminator shape at all.
    pub fn from_client_reply(buf: &[u8; 12]) -> io::Result<Self> {
        if &buf[0..4] != b"RFB " || buf[7] != b'.' || buf[11] != b'\n' {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed ProtocolVersion reply",
            ));
        }

        let minor = std::str::from_utf8(&buf[8..11])
            .ok()
            .and_then(|m| m.parse::<u16>().ok());

        Ok(match minor {
            Some(8) => Self::V38,
            Some(7) => Self::V37,
            // 3.3 proper, and the downgrade path for anything unknown.
            _ => Self::V33,
        })
    }

    /// True when this version carries the security type list and the
    /// client's one-byte selection (3.7 and 3.8).
    #[must_use]
    pub fn has_security_list(self) -> bool {
        !matches!(self, Self::V33)
    }

    /// True when authentication failures carry a reason string (3.8 only).
    #[must_use]
    pub fn has_failure_reason(self) -> bool {
        matches!(self, Self::V38)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V33 => write!(f, "3.3"),
            Self::V37 => write!(f, "3.7"),
            Self::V38 => write!(f, "3.8"),
        }
    }
}

/// Represents the pixel format of the VNC framebuffer.
///
/// This struct defines how pixel data is interpreted, including color depth,
/// endianness, and RGB component details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel.
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// Flag indicating if the pixel data is big-endian (1) or little-endian (0).
    pub big_endian_flag: u8,
    /// Flag indicating if the pixel format is true-colour (1) or colormapped (0).
    pub true_colour_flag: u8,
    /// Maximum red color value.
    pub red_max: u16,
    /// Maximum green color value.
    pub green_max: u16,
    /// Maximum blue color value.
    pub blue_max: u16,
    /// Number of shifts to apply to get the red color component.
    pub red_shift: u8,
    /// Number of shifts to apply to get the green color component.
    pub green_shift: u8,
    /// Number of shifts to apply to get the blue color component.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Creates the server's native pixel format.
    ///
    /// 32 bits per pixel, depth 24, little-endian, true colour, 255 per
    /// channel, red at bits 16-23, green at 8-15, blue at 0-7. One pixel on
    /// the wire is the four bytes `B G R 0`, which matches the BGRA byte
    /// order of the framebuffer store.
    #[must_use]
    pub fn bgra32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Number of bytes one pixel occupies on the wire under this format.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    /// Validates that this pixel format is supported by the server.
    ///
    /// Checks that the format uses a valid bits-per-pixel value, a sane
    /// depth, and true-colour channel ranges that fit within the depth.
    ///
    /// # Returns
    ///
    /// `true` if the format is valid and supported, `false` otherwise.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.bits_per_pixel != 8 && self.bits_per_pixel != 16 && self.bits_per_pixel != 32 {
            return false;
        }

        if self.depth == 0 || self.depth > self.bits_per_pixel {
            return false;
        }

        // Only true-colour formats are served; colour maps are not.
        if self.true_colour_flag == 0 {
            return false;
        }

        // Check that max values fit in the bit depth
        #[allow(clippy::cast_possible_truncation)]
        // leading_zeros() returns max 16, result always fits in u8
        let bits_needed = |max: u16| -> u8 {
            if max == 0 {
                0
            } else {
                (16 - max.leading_zeros()) as u8
            }
        };

        let red_bits = bits_needed(self.red_max);
        let green_bits = bits_needed(self.green_max);
        let blue_bits = bits_needed(self.blue_max);

        // Total bits should not exceed depth
        if red_bits + green_bits + blue_bits > self.depth {
            return false;
        }

        // Shifts must stay inside the pixel
        if self.red_shift >= 32 || self.green_shift >= 32 || self.blue_shift >= 32 {
            return false;
        }

        true
    }

    /// Serializes one framebuffer pixel under this format.
    ///
    /// `bgra` is a 4-byte pixel from the framebuffer store (blue, green,
    /// red, alpha). The channels are scaled to the format's per-channel
    /// maxima, shifted into place, and written as `bits_per_pixel / 8`
    /// bytes respecting the format's endianness. The alpha byte is never
    /// transmitted; its slot in 32bpp formats is zero padding.
    #[allow(clippy::cast_possible_truncation)] // pixel values are masked to the format width
    pub fn put_pixel(&self, buf: &mut BytesMut, bgra: [u8; 4]) {
        let scale = |v: u8, max: u16| -> u32 {
            if max == 255 {
                u32::from(v)
            } else {
                u32::from(v) * u32::from(max) / 255
            }
        };

        let pixel = (scale(bgra[2], self.red_max) << self.red_shift)
            | (scale(bgra[1], self.green_max) << self.green_shift)
            | (scale(bgra[0], self.blue_max) << self.blue_shift);

        match self.bits_per_pixel {
            8 => buf.put_u8(pixel as u8),
            16 => {
                if self.big_endian_flag != 0 {
                    buf.put_u16(pixel as u16);
                } else {
                    buf.put_u16_le(pixel as u16);
                }
            }
            _ => {
                if self.big_endian_flag != 0 {
                    buf.put_u32(pixel);
                } else {
                    buf.put_u32_le(pixel);
                }
            }
        }
    }

    /// Writes the pixel format data into a `BytesMut` buffer.
    ///
    /// This function serializes the `PixelFormat` into the 16-byte RFB wire
    /// form (including the three trailing padding bytes).
    ///
    /// # Arguments
    ///
    /// * `buf` - A mutable reference to the `BytesMut` buffer to write into.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Reads and deserializes a `PixelFormat` from its 16-byte wire form.
    ///
    /// # Arguments
    ///
    /// * `buf` - The 16 bytes of a `PixelFormat` as they appeared on the wire.
    ///
    /// # Errors
    ///
    /// Returns `Err(io::Error)` if fewer than 16 bytes are supplied.
    pub fn from_bytes(mut buf: &[u8]) -> io::Result<Self> {
        if buf.len() < 16 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes for PixelFormat",
            ));
        }

        let pf = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        Ok(pf)
    }
}

/// Represents the `ServerInit` message sent during VNC initialization.
///
/// This message is sent by the server after security negotiation is complete.
/// It provides the client with framebuffer dimensions, pixel format, and
/// the desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// The width of the framebuffer in pixels.
    pub framebuffer_width: u16,
    /// The height of the framebuffer in pixels.
    pub framebuffer_height: u16,
    /// The pixel format used by the framebuffer.
    pub pixel_format: PixelFormat,
    /// The name of the desktop.
    pub name: String,
}

impl ServerInit {
    /// Serializes the `ServerInit` message into a byte buffer.
    ///
    /// The format follows the RFB protocol specification:
    /// - 2 bytes: framebuffer width
    /// - 2 bytes: framebuffer height
    /// - 16 bytes: pixel format
    /// - 4 bytes: name length
    /// - N bytes: name string (UTF-8)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the serialized message into.
    #[allow(clippy::cast_possible_truncation)] // Desktop name length limited to u32 per VNC protocol
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// A pending `FramebufferUpdateRequest` from the client.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest {
    /// If true, only send changes since the last update; if false, send full refresh.
    pub incremental: bool,
    /// X coordinate of the requested region.
    pub x: u16,
    /// Y coordinate of the requested region.
    pub y: u16,
    /// Width of the requested region.
    pub width: u16,
    /// Height of the requested region.
    pub height: u16,
}

/// Represents a rectangle header in a framebuffer update message.
///
/// Each framebuffer update can contain multiple rectangles, each with its own
/// encoding type. The rectangle header specifies the position, dimensions,
/// and encoding of the pixel data that follows.
#[derive(Debug)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the rectangle in pixels.
    pub width: u16,
    /// Height of the rectangle in pixels.
    pub height: u16,
    /// The encoding type used for this rectangle's pixel data.
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the rectangle header to a byte buffer.
    ///
    /// The header format is:
    /// - 2 bytes: x position
    /// - 2 bytes: y position
    /// - 2 bytes: width
    /// - 2 bytes: height
    /// - 4 bytes: encoding type (signed 32-bit integer)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the header into.
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

/// Writes a complete ExtendedDesktopSize rectangle.
///
/// Used both to announce a server-initiated resize (`status == 0`) and to
/// reject a client-initiated one (`status != 0`). The rectangle carries the
/// status in its y position per the extension, followed by a single screen
/// record covering the full framebuffer.
pub fn put_extended_desktop_size(buf: &mut BytesMut, status: u16, width: u16, height: u16) {
    let rect = Rectangle {
        x: 0,
        y: status,
        width,
        height,
        encoding: ENCODING_EXTENDED_DESKTOP_SIZE,
    };
    rect.write_header(buf);

    buf.put_u8(1); // number-of-screens
    buf.put_bytes(0, 3); // padding
    buf.put_u32(0); // screen id
    buf.put_u16(0); // x
    buf.put_u16(0); // y
    buf.put_u16(width);
    buf.put_u16(height);
    buf.put_u32(0); // flags
}
