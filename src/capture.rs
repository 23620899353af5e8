//! Screen-capture and input-injection boundaries.
//!
//! The server core neither captures screens nor injects input; both are
//! platform concerns behind the two traits here. A [`FrameSource`] hands
//! BGRA frames to the server, an [`InputSink`] receives the key and pointer
//! events clients send. The capture cadence belongs to the source; the
//! keysym-to-native translation belongs to the sink.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::server::VncServer;

/// Supplies captured frames to the server.
///
/// Implementations own the display device and decide when a frame is new.
pub trait FrameSource: Send {
    /// Returns the latest captured frame as BGRA bytes
    /// (`4 * width * height` long), or `None` when nothing new is
    /// available. On `None` the previously delivered frame stays current;
    /// it is not an error.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Receives input events forwarded from connected clients.
///
/// Any keysym-to-platform-keycode translation is the sink's concern.
pub trait InputSink: Send + Sync {
    /// A key press (`down == true`) or release, as an X11 keysym.
    fn key_event(&self, down: bool, keysym: u32);

    /// A pointer state report. The button mask follows the RFB convention:
    /// bit 0 left, 1 middle, 2 right, 3 wheel-up, 4 wheel-down.
    fn pointer_event(&self, button_mask: u8, x: u16, y: u16);
}

/// Drives a [`FrameSource`] and broadcasts every fresh frame.
///
/// Polls the source on `interval` from a dedicated task and pushes each new
/// frame through [`VncServer::broadcast_update`]. Stale polls are skipped.
/// Returns once the server has been stopped.
pub async fn run_capture<S: FrameSource>(server: VncServer, mut source: S, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if server.is_stopped() {
            return;
        }

        if let Some(frame) = source.next_frame() {
            if let Err(e) = server.broadcast_update(&frame).await {
                warn!("Dropping captured frame: {e}");
            }
        }
    }
}

/// Convenience sink that discards every input event.
///
/// Useful for view-only deployments where the host must not be driven
/// remotely.
pub struct NullInputSink;

impl InputSink for NullInputSink {
    fn key_event(&self, _down: bool, _keysym: u32) {}
    fn pointer_event(&self, _button_mask: u8, _x: u16, _y: u16) {}
}

/// Shared handle to an input sink, as stored by the server.
pub type SharedInputSink = Arc<dyn InputSink>;
