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

//! Shared framebuffer storage and per-client change tracking.
//!
//! The server owns one canonical framebuffer: a `width * height * 4` byte
//! BGRA pixel store behind a read-write lock. Sessions never hold the lock
//! across network I/O; they take a short-lived [`Frame`] copy and encode
//! from that.
//!
//! Each client diffs independently against its own previous snapshot using
//! a [`DirtyTracker`], so a freshly connected viewer receives a full screen
//! while long-running ones only receive the tiles that changed.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, VncError};

/// Edge length of the square tiles the dirty tracker compares.
pub const DIFF_TILE_SIZE: usize = 64;

/// A rectangular region of the framebuffer in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRegion {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the region in pixels.
    pub width: u16,
    /// Height of the region in pixels.
    pub height: u16,
}

impl DirtyRegion {
    /// Creates a new region.
    #[must_use]
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the region covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Computes the intersection with another region.
    ///
    /// Returns `None` when the regions do not overlap.
    #[allow(clippy::cast_possible_truncation)] // results are bounded by the u16 inputs
    #[must_use]
    pub fn intersect(&self, other: &DirtyRegion) -> Option<DirtyRegion> {
        let x0 = u32::from(self.x).max(u32::from(other.x));
        let y0 = u32::from(self.y).max(u32::from(other.y));
        let x1 = (u32::from(self.x) + u32::from(self.width))
            .min(u32::from(other.x) + u32::from(other.width));
        let y1 = (u32::from(self.y) + u32::from(self.height))
            .min(u32::from(other.y) + u32::from(other.height));

        if x1 > x0 && y1 > y0 {
            Some(DirtyRegion::new(
                x0 as u16,
                y0 as u16,
                (x1 - x0) as u16,
                (y1 - y0) as u16,
            ))
        } else {
            None
        }
    }
}

/// A consistent copy of the framebuffer taken under the lock.
///
/// Sessions encode from this copy after the lock has been released.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width of the framebuffer when the copy was taken.
    pub width: u16,
    /// Height of the framebuffer when the copy was taken.
    pub height: u16,
    /// BGRA pixel bytes, `width * height * 4` long.
    pub pixels: Vec<u8>,
}

impl Frame {
    /// The full-screen region of this frame.
    #[must_use]
    pub fn bounds(&self) -> DirtyRegion {
        DirtyRegion::new(0, 0, self.width, self.height)
    }

    /// Copies the BGRA bytes of a sub-rectangle, row by row.
    ///
    /// The region must lie within the frame; callers clamp beforehand.
    #[must_use]
    pub fn extract(&self, region: &DirtyRegion) -> Vec<u8> {
        let stride = self.width as usize * 4;
        let mut out = Vec::with_capacity(region.width as usize * region.height as usize * 4);
        for row in region.y..region.y + region.height {
            let start = row as usize * stride + region.x as usize * 4;
            let end = start + region.width as usize * 4;
            out.extend_from_slice(&self.pixels[start..end]);
        }
        out
    }
}

struct FramebufferInner {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

/// Thread-safe BGRA framebuffer shared between the capture side and all
/// client sessions.
///
/// Cloning is cheap; all clones refer to the same pixel store.
#[derive(Clone)]
pub struct Framebuffer {
    inner: Arc<RwLock<FramebufferInner>>,
}

impl Framebuffer {
    /// Creates a zeroed framebuffer of the given dimensions.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FramebufferInner {
                width,
                height,
                pixels: vec![0u8; width as usize * height as usize * 4],
            })),
        }
    }

    /// Current `(width, height)` of the framebuffer.
    pub async fn dimensions(&self) -> (u16, u16) {
        let inner = self.inner.read().await;
        (inner.width, inner.height)
    }

    /// Takes a consistent copy of the framebuffer contents.
    pub async fn snapshot(&self) -> Frame {
        let inner = self.inner.read().await;
        Frame {
            width: inner.width,
            height: inner.height,
            pixels: inner.pixels.clone(),
        }
    }

    /// Replaces the framebuffer contents with a new full frame.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::InvalidOperation`] when `data` does not match the
    /// current `width * height * 4` length.
    pub async fn set_frame(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if data.len() != inner.pixels.len() {
            return Err(VncError::InvalidOperation(format!(
                "frame is {} bytes, framebuffer needs {}",
                data.len(),
                inner.pixels.len()
            )));
        }
        inner.pixels.copy_from_slice(data);
        Ok(())
    }

    /// Replaces the framebuffer dimensions and zeroes the pixel store.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::InvalidOperation`] when the dimensions equal the
    /// current ones; resizing to the same size is always a caller bug.
    pub async fn resize(&self, width: u16, height: u16) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.width == width && inner.height == height {
            return Err(VncError::InvalidOperation(format!(
                "framebuffer is already {width}x{height}"
            )));
        }
        inner.width = width;
        inner.height = height;
        inner.pixels = vec![0u8; width as usize * height as usize * 4];
        Ok(())
    }

    /// Moves a rectangle of pixels within the framebuffer.
    ///
    /// The source rectangle starts at `(src_x, src_y)` and has the
    /// dimensions of `dst`; it is copied to `dst`'s position. Overlapping
    /// source and destination are handled.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::InvalidOperation`] when either rectangle falls
    /// outside the framebuffer.
    pub async fn copy_rect(&self, src_x: u16, src_y: u16, dst: DirtyRegion) -> Result<()> {
        let mut inner = self.inner.write().await;

        let in_bounds = |x: u16, y: u16| {
            u32::from(x) + u32::from(dst.width) <= u32::from(inner.width)
                && u32::from(y) + u32::from(dst.height) <= u32::from(inner.height)
        };
        if !in_bounds(src_x, src_y) || !in_bounds(dst.x, dst.y) {
            return Err(VncError::InvalidOperation(format!(
                "copy_rect {}x{} from ({src_x},{src_y}) to ({},{}) exceeds {}x{}",
                dst.width, dst.height, dst.x, dst.y, inner.width, inner.height
            )));
        }

        let stride = inner.width as usize * 4;
        let row_len = dst.width as usize * 4;

        // Stage the source region so overlapping copies stay correct.
        let mut staged = Vec::with_capacity(row_len * dst.height as usize);
        for row in 0..dst.height as usize {
            let start = (src_y as usize + row) * stride + src_x as usize * 4;
            staged.extend_from_slice(&inner.pixels[start..start + row_len]);
        }

        for row in 0..dst.height as usize {
            let start = (dst.y as usize + row) * stride + dst.x as usize * 4;
            inner.pixels[start..start + row_len]
                .copy_from_slice(&staged[row * row_len..(row + 1) * row_len]);
        }
        Ok(())
    }
}

/// Detects which part of the framebuffer changed since a client's last
/// update.
///
/// Holds the previous frame this client was sent and compares on a fixed
/// tile grid. One tracker exists per session; trackers are never shared.
pub struct DirtyTracker {
    previous: Option<Vec<u8>>,
    tile_size: usize,
}

impl Default for DirtyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DirtyTracker {
    /// Creates a tracker with the default 64-pixel tile grid.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tile_size(DIFF_TILE_SIZE)
    }

    /// Creates a tracker with a custom tile edge length.
    #[must_use]
    pub fn with_tile_size(tile_size: usize) -> Self {
        Self {
            previous: None,
            tile_size,
        }
    }

    /// Compares `current` against the previously seen frame.
    ///
    /// Returns the bounding rectangle of all changed tiles in pixel
    /// coordinates, `None` when nothing changed, or the full screen when no
    /// usable previous frame exists (first use, after
    /// [`force_full_update`](Self::force_full_update), or after a dimension
    /// change). On any non-`None` return the current frame becomes the new
    /// comparison baseline.
    #[allow(clippy::cast_possible_truncation)] // tile coordinates are bounded by u16 dimensions
    pub fn diff(&mut self, current: &[u8], width: u16, height: u16) -> Option<DirtyRegion> {
        let full = DirtyRegion::new(0, 0, width, height);

        let prev = match &self.previous {
            Some(p) if p.len() == current.len() => p,
            _ => {
                self.previous = Some(current.to_vec());
                return Some(full);
            }
        };

        let width = width as usize;
        let height = height as usize;
        let stride = width * 4;
        let tiles_x = width.div_ceil(self.tile_size);
        let tiles_y = height.div_ceil(self.tile_size);

        let mut bbox: Option<(usize, usize, usize, usize)> = None;

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * self.tile_size;
                let y0 = ty * self.tile_size;
                let tw = self.tile_size.min(width - x0);
                let th = self.tile_size.min(height - y0);

                if tile_differs(prev, current, x0, y0, tw, th, stride) {
                    let (min_x, min_y, max_x, max_y) =
                        bbox.unwrap_or((usize::MAX, usize::MAX, 0, 0));
                    bbox = Some((
                        min_x.min(x0),
                        min_y.min(y0),
                        max_x.max(x0 + tw),
                        max_y.max(y0 + th),
                    ));
                }
            }
        }

        let (min_x, min_y, max_x, max_y) = bbox?;
        self.previous = Some(current.to_vec());
        Some(DirtyRegion::new(
            min_x as u16,
            min_y as u16,
            (max_x - min_x) as u16,
            (max_y - min_y) as u16,
        ))
    }

    /// Discards the comparison baseline so the next [`diff`](Self::diff)
    /// reports the full screen.
    pub fn force_full_update(&mut self) {
        self.previous = None;
    }

    /// Replaces the comparison baseline with `current` without diffing.
    ///
    /// Used after a CopyRect was sent: the client already holds the moved
    /// pixels, so they must not be re-sent on the next incremental update.
    pub fn mark_clean(&mut self, current: &[u8]) {
        self.previous = Some(current.to_vec());
    }
}

fn tile_differs(
    prev: &[u8],
    curr: &[u8],
    x0: usize,
    y0: usize,
    tw: usize,
    th: usize,
    stride: usize,
) -> bool {
    for row in y0..y0 + th {
        let start = row * stride + x0 * 4;
        let end = start + tw * 4;
        if prev[start..end] != curr[start..end] {
            return true;
        }
    }
    false
}
