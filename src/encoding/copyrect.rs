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

//! VNC CopyRect encoding implementation.
//!
//! CopyRect carries no pixels at all: the client is told to copy the
//! rectangle from a source position in its own current framebuffer. The
//! server never searches for motion; callers supply the source position
//! explicitly (for example after scrolling a window).

use bytes::{BufMut, BytesMut};

/// Builds the 4-byte CopyRect payload.
///
/// The payload is the source position only: `src_x` and `src_y` as
/// big-endian `u16`s. The destination and dimensions travel in the
/// rectangle header.
#[must_use]
pub fn copy_rect_payload(src_x: u16, src_y: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(src_x);
    buf.put_u16(src_y);
    buf
}
