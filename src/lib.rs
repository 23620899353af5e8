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


//! # vncshare
//!
//! A pure Rust VNC (RFB) server that streams a shared framebuffer to one or
//! more remote viewers over TCP.
//!
//! The library implements the RFB protocol as specified in RFC 6143 (3.8),
//! with graceful downgrade to the 3.7 and 3.3 handshakes, VNC
//! authentication, per-client pixel format translation, and the Raw,
//! CopyRect, RRE and Hextile encodings. Screen capture and input injection
//! stay outside the library behind the [`capture::FrameSource`] and
//! [`capture::InputSink`] boundaries: the server consumes BGRA frames and
//! emits the key and pointer events clients send.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vncshare::VncServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a VNC server with a 1920x1080 framebuffer
//!     let server = VncServer::new(1920, 1080);
//!
//!     // Optional: Set a password
//!     server.set_password(Some("secret".to_string()));
//!
//!     // Start listening on port 5900
//!     let server_handle = {
//!         let server = server.clone();
//!         tokio::spawn(async move { server.listen(5900).await })
//!     };
//!
//!     // Push frames as they are captured
//!     // server.broadcast_update(&bgra_pixels).await?;
//!
//!     server_handle.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Your Application              │
//! │                                         │
//! │  • Provide BGRA frames                  │
//! │  • Receive input events                 │
//! │  • Control server lifecycle             │
//! └──────────────────┬──────────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │           VncServer (Public)            │
//! │                                         │
//! │  • TCP listener                         │
//! │  • Session management                   │
//! │  • Update fan-out                       │
//! └──────────────────┬──────────────────────┘
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌────────┐ ┌────────┐ ┌────────┐
//!   │Client 1│ │Client 2│ │Client N│
//!   └────────┘ └────────┘ └────────┘
//!        │           │           │
//!        └───────────┴───────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │      Framebuffer (Thread-safe)          │
//! │                                         │
//! │  • BGRA pixel storage                   │
//! │  • Per-client change tracking           │
//! │  • CopyRect operations                  │
//! └─────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod error;
pub mod events;
pub mod framebuffer;
pub mod protocol;
pub mod server;

// Internal modules
mod auth;
mod client;
pub mod encoding;

// Re-exports
pub use capture::{FrameSource, InputSink};
pub use encoding::Encoding;
pub use error::{Result, VncError};
pub use events::ServerEvent;
pub use framebuffer::{DirtyRegion, DirtyTracker, Frame, Framebuffer};
pub use protocol::{PixelFormat, ProtocolVersion};
pub use server::VncServer;

/// VNC protocol version.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
