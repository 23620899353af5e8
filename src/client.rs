//! VNC client connection handling and protocol implementation.
//!
//! This module manages individual VNC client sessions, handling:
//! - RFB protocol handshake and negotiation (3.3 / 3.7 / 3.8)
//! - Client message processing (input events, encoding requests, etc.)
//! - Framebuffer update transmission against the session's own change tracker
//! - Client-specific state management (pixel format, encodings)
//!
//! # Protocol Flow
//!
//! 1. **Handshake**: Protocol version exchange and security negotiation
//! 2. **Initialization**: Send framebuffer dimensions and pixel format
//! 3. **Message Loop**: Handle incoming client messages and send framebuffer updates
//!
//! # Update model
//!
//! Updates follow the RFB pull model. A `FramebufferUpdateRequest` is
//! recorded as the session's pending request and serviced immediately; when
//! the diff against the session's previous snapshot is empty the request
//! stays pending until the next [`broadcast`](crate::server::VncServer)
//! delivers a changed frame. Nothing is queued for slow clients - the next
//! request always pulls the latest frame.

use bytes::{BufMut, BytesMut};
use log::{debug, info};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;

use crate::auth::VncAuth;
use crate::encoding;
use crate::error::{Result, VncError};
use crate::framebuffer::{DirtyRegion, DirtyTracker, Framebuffer};
use crate::protocol::*;

/// How long a stream read or write may stall before the session dies.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on ClientCutText payloads. The text is discarded either way;
/// the cap only prevents a hostile client from forcing huge reads.
const MAX_CUT_TEXT: usize = 10 * 1024 * 1024;

/// Represents events that a VNC client session reports to the server.
pub(crate) enum ClientEvent {
    /// A key press or release event.
    KeyPress {
        /// Session that produced the event.
        client_id: usize,
        /// `true` if the key is pressed, `false` if released.
        down: bool,
        /// The X Window System keysym of the key.
        key: u32,
    },
    /// A pointer (mouse) movement or button event.
    PointerMove {
        /// Session that produced the event.
        client_id: usize,
        /// The X-coordinate of the pointer.
        x: u16,
        /// The Y-coordinate of the pointer.
        y: u16,
        /// A bitmask indicating which mouse buttons are pressed.
        button_mask: u8,
    },
    /// The session ended (cleanly or not) and left the session set.
    Disconnected {
        /// Session that ended.
        client_id: usize,
    },
}

/// Manages a single VNC client connection.
///
/// One `VncClient` exists per accepted socket. The session owns the
/// connection exclusively: the read half is driven by [`run`](Self::run) on
/// the session task, the write half sits behind the send mutex so one
/// complete message is written at a time no matter which task triggers it.
pub(crate) struct VncClient {
    /// Unique client ID assigned by the server.
    client_id: usize,
    /// Remote peer address, for log lines.
    remote_host: String,
    /// Negotiated protocol version.
    version: ProtocolVersion,
    /// The shared framebuffer updates are read from.
    framebuffer: Framebuffer,
    /// Send mutex: writes of one message never interleave with another.
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    /// The pixel format requested by the client.
    pixel_format: RwLock<PixelFormat>,
    /// The encodings advertised by the client.
    encodings: RwLock<Vec<i32>>,
    /// This session's change tracker (previous snapshot + tile diff).
    tracker: Mutex<DirtyTracker>,
    /// The most recent unserviced FramebufferUpdateRequest.
    pending_request: Mutex<Option<UpdateRequest>>,
    /// Channel for input events and lifecycle notifications.
    event_tx: mpsc::UnboundedSender<ClientEvent>,
}

impl VncClient {
    /// Performs the RFB handshake on a fresh connection.
    ///
    /// Walks the strict handshake sequence: send our version, read and
    /// negotiate the client's, run the security phase appropriate to that
    /// version (with `password` deciding between VncAuth and None), consume
    /// ClientInit and send ServerInit.
    ///
    /// # Returns
    ///
    /// The constructed session plus the read half of the stream, which the
    /// server feeds back into [`run`](Self::run) on the session task.
    ///
    /// # Errors
    ///
    /// Any I/O failure, malformed version reply, security mismatch or
    /// failed authentication aborts the handshake. Where the protocol
    /// version defines a failure path (SecurityResult, reason string) it is
    /// written before the error is returned.
    pub(crate) async fn accept(
        client_id: usize,
        mut stream: TcpStream,
        framebuffer: Framebuffer,
        desktop_name: String,
        password: Option<String>,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<(Arc<Self>, OwnedReadHalf)> {
        let remote_host = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for immediate frame delivery
        stream.set_nodelay(true)?;

        // Send protocol version
        write_timed(&mut stream, PROTOCOL_VERSION.as_bytes()).await?;

        // Read and negotiate the client protocol version
        let mut version_buf = [0u8; 12];
        read_timed(&mut stream, &mut version_buf).await?;
        let version = ProtocolVersion::from_client_reply(&version_buf)
            .map_err(|e| VncError::Protocol(e.to_string()))?;
        info!("Client {remote_host} negotiated RFB {version}");

        let offered = if password.is_some() {
            SECURITY_TYPE_VNC_AUTH
        } else {
            SECURITY_TYPE_NONE
        };

        if version.has_security_list() {
            // 3.7/3.8: one-entry list, then the client's choice
            write_timed(&mut stream, &[1, offered]).await?;

            let mut choice = [0u8; 1];
            read_timed(&mut stream, &mut choice).await?;
            if choice[0] != offered {
                reject_security(
                    &mut stream,
                    version,
                    &format!("security type {} not offered", choice[0]),
                )
                .await?;
                return Err(VncError::AuthenticationFailed);
            }
        } else {
            // 3.3: the server dictates the type as a u32
            let mut buf = BytesMut::with_capacity(4);
            buf.put_u32(u32::from(offered));
            write_timed(&mut stream, &buf).await?;
        }

        if offered == SECURITY_TYPE_VNC_AUTH {
            let auth = VncAuth::new(password);
            let challenge = auth.generate_challenge();
            write_timed(&mut stream, &challenge).await?;

            let mut response = [0u8; 16];
            read_timed(&mut stream, &mut response).await?;

            if !auth.verify_response(&response, &challenge) {
                reject_security(&mut stream, version, "authentication failed").await?;
                return Err(VncError::AuthenticationFailed);
            }
        }

        // SecurityResult OK, for every version (3.3/3.7 clients in the wild
        // expect it even where the protocol text omits it).
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(SECURITY_RESULT_OK);
        write_timed(&mut stream, &buf).await?;

        // ClientInit: the shared-session flag is read and ignored
        let mut shared = [0u8; 1];
        read_timed(&mut stream, &mut shared).await?;

        // ServerInit
        let (width, height) = framebuffer.dimensions().await;
        let server_init = ServerInit {
            framebuffer_width: width,
            framebuffer_height: height,
            pixel_format: PixelFormat::bgra32(),
            name: desktop_name,
        };
        let mut init_buf = BytesMut::new();
        server_init.write_to(&mut init_buf);
        write_timed(&mut stream, &init_buf).await?;

        info!("Client {remote_host} handshake completed ({width}x{height})");

        let (reader, writer) = stream.into_split();

        let client = Arc::new(Self {
            client_id,
            remote_host,
            version,
            framebuffer,
            writer: Mutex::new(BufWriter::with_capacity(64 * 1024, writer)),
            pixel_format: RwLock::new(PixelFormat::bgra32()),
            encodings: RwLock::new(vec![ENCODING_RAW]),
            tracker: Mutex::new(DirtyTracker::new()),
            pending_request: Mutex::new(None),
            event_tx,
        });
        Ok((client, reader))
    }

    /// The unique client ID assigned by the server.
    pub(crate) fn client_id(&self) -> usize {
        self.client_id
    }

    /// The remote peer address of this session.
    pub(crate) fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// The protocol version negotiated during the handshake.
    pub(crate) fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Whether the client listed `encoding` in its last SetEncodings.
    pub(crate) async fn advertised(&self, encoding: i32) -> bool {
        self.encodings.read().await.contains(&encoding)
    }

    /// Drives the message loop until the client disconnects or misbehaves.
    ///
    /// Reads one message at a time with length-complete reads; every read
    /// and write is bounded by the 30-second I/O timeout. Input events are
    /// forwarded through the event channel, capability messages mutate the
    /// session state, and update requests are serviced inline.
    pub(crate) async fn run(&self, mut reader: OwnedReadHalf) -> Result<()> {
        loop {
            let mut msg_type = [0u8; 1];
            read_timed(&mut reader, &mut msg_type).await?;

            match msg_type[0] {
                CLIENT_MSG_SET_PIXEL_FORMAT => {
                    let mut buf = [0u8; 19]; // 3 padding + 16 pixel format
                    read_timed(&mut reader, &mut buf).await?;
                    let requested = PixelFormat::from_bytes(&buf[3..])?;

                    if !requested.is_valid() {
                        return Err(VncError::InvalidPixelFormat);
                    }

                    info!(
                        "Client {} set pixel format: {}bpp depth {}, R{}:{} G{}:{} B{}:{}",
                        self.remote_host,
                        requested.bits_per_pixel,
                        requested.depth,
                        requested.red_shift,
                        requested.red_max,
                        requested.green_shift,
                        requested.green_max,
                        requested.blue_shift,
                        requested.blue_max,
                    );
                    *self.pixel_format.write().await = requested;
                }
                CLIENT_MSG_SET_ENCODINGS => {
                    let mut head = [0u8; 3]; // 1 padding + 2 count
                    read_timed(&mut reader, &mut head).await?;
                    let count = u16::from_be_bytes([head[1], head[2]]) as usize;

                    let mut body = vec![0u8; count * 4];
                    read_timed(&mut reader, &mut body).await?;

                    let encodings_list: Vec<i32> = body
                        .chunks_exact(4)
                        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                        .collect();
                    info!(
                        "Client {} set {count} encodings: {encodings_list:?}",
                        self.remote_host
                    );
                    *self.encodings.write().await = encodings_list;
                }
                CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                    let mut buf = [0u8; 9];
                    read_timed(&mut reader, &mut buf).await?;
                    let request = UpdateRequest {
                        incremental: buf[0] != 0,
                        x: u16::from_be_bytes([buf[1], buf[2]]),
                        y: u16::from_be_bytes([buf[3], buf[4]]),
                        width: u16::from_be_bytes([buf[5], buf[6]]),
                        height: u16::from_be_bytes([buf[7], buf[8]]),
                    };
                    debug!(
                        "Client {} update request: incremental={} region=({},{} {}x{})",
                        self.remote_host,
                        request.incremental,
                        request.x,
                        request.y,
                        request.width,
                        request.height
                    );

                    *self.pending_request.lock().await = Some(request);
                    self.service_pending().await?;
                }
                CLIENT_MSG_KEY_EVENT => {
                    let mut buf = [0u8; 7]; // down + 2 padding + keysym
                    read_timed(&mut reader, &mut buf).await?;
                    let _ = self.event_tx.send(ClientEvent::KeyPress {
                        client_id: self.client_id,
                        down: buf[0] != 0,
                        key: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
                    });
                }
                CLIENT_MSG_POINTER_EVENT => {
                    let mut buf = [0u8; 5]; // button mask + x + y
                    read_timed(&mut reader, &mut buf).await?;
                    let _ = self.event_tx.send(ClientEvent::PointerMove {
                        client_id: self.client_id,
                        x: u16::from_be_bytes([buf[1], buf[2]]),
                        y: u16::from_be_bytes([buf[3], buf[4]]),
                        button_mask: buf[0],
                    });
                }
                CLIENT_MSG_CLIENT_CUT_TEXT => {
                    let mut head = [0u8; 7]; // 3 padding + 4 length
                    read_timed(&mut reader, &mut head).await?;
                    let length =
                        u32::from_be_bytes([head[3], head[4], head[5], head[6]]) as usize;

                    if length > MAX_CUT_TEXT {
                        return Err(VncError::Protocol(format!(
                            "cut text of {length} bytes exceeds limit"
                        )));
                    }

                    // Clipboard relay is out of scope; consume and discard.
                    let mut text = vec![0u8; length];
                    read_timed(&mut reader, &mut text).await?;
                }
                CLIENT_MSG_SET_DESKTOP_SIZE => {
                    let mut head = [0u8; 7]; // padding + w + h + screens + padding
                    read_timed(&mut reader, &mut head).await?;
                    let screens = head[5] as usize;
                    let mut screen_buf = vec![0u8; screens * 16];
                    read_timed(&mut reader, &mut screen_buf).await?;

                    // Client-initiated resizes are never honored. Clients
                    // that advertised ExtendedDesktopSize get told so.
                    if self.advertised(ENCODING_EXTENDED_DESKTOP_SIZE).await {
                        let (width, height) = self.framebuffer.dimensions().await;
                        self.send_desktop_size(1, width, height).await?;
                    }
                    info!("Client {} requested a resize; rejected", self.remote_host);
                }
                other => {
                    return Err(VncError::Protocol(format!("unknown message type {other}")));
                }
            }
        }
    }

    /// Services the pending update request, if any.
    ///
    /// Takes a snapshot of the framebuffer, diffs it against this session's
    /// previous snapshot, and sends one `FramebufferUpdate` rectangle with
    /// the session's preferred encoding. When nothing changed the request
    /// is left pending so the next broadcast can satisfy it.
    pub(crate) async fn service_pending(&self) -> Result<()> {
        let Some(request) = self.pending_request.lock().await.take() else {
            return Ok(());
        };

        // Short-lived copy under the framebuffer lock; encoding happens
        // against the copy with the lock released.
        let frame = self.framebuffer.snapshot().await;

        let dirty = {
            let mut tracker = self.tracker.lock().await;
            if !request.incremental {
                tracker.force_full_update();
            }
            tracker.diff(&frame.pixels, frame.width, frame.height)
        };

        let Some(dirty) = dirty else {
            // Nothing changed: send nothing and wait for the next frame.
            *self.pending_request.lock().await = Some(request);
            return Ok(());
        };

        let mut region = match dirty.intersect(&frame.bounds()) {
            Some(region) => region,
            None => return Ok(()),
        };
        if request.incremental {
            let requested = DirtyRegion::new(request.x, request.y, request.width, request.height);
            match region.intersect(&requested) {
                Some(clipped) => region = clipped,
                None => {
                    // The change lies outside the area this client watches.
                    *self.pending_request.lock().await = Some(request);
                    return Ok(());
                }
            }
        }

        let chosen = encoding::choose_encoding(&self.encodings.read().await);
        let format = self.pixel_format.read().await.clone();
        let encoder = encoding::get_encoder(chosen)
            .ok_or_else(|| VncError::Encoding(format!("no encoder for type {chosen}")))?;

        let data = frame.extract(&region);
        let payload = encoder.encode(&data, region.width, region.height, &format);

        let mut msg = BytesMut::with_capacity(16 + payload.len());
        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(1); // number of rectangles
        Rectangle {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            encoding: chosen,
        }
        .write_header(&mut msg);
        msg.extend_from_slice(&payload);

        self.send_message(&msg).await
    }

    /// Sends a CopyRect rectangle instructing the client to move pixels it
    /// already has from `(src_x, src_y)` to `region`.
    ///
    /// The session's tracker baseline is refreshed afterwards so the moved
    /// pixels are not re-sent by the next incremental update.
    pub(crate) async fn send_copy_rect(
        &self,
        src_x: u16,
        src_y: u16,
        region: DirtyRegion,
    ) -> Result<()> {
        let mut msg = BytesMut::with_capacity(20);
        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(1); // number of rectangles
        Rectangle {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            encoding: ENCODING_COPYRECT,
        }
        .write_header(&mut msg);
        msg.extend_from_slice(&encoding::copy_rect_payload(src_x, src_y));

        self.send_message(&msg).await?;

        let frame = self.framebuffer.snapshot().await;
        self.tracker.lock().await.mark_clean(&frame.pixels);
        Ok(())
    }

    /// Announces the framebuffer dimensions via ExtendedDesktopSize.
    ///
    /// `status` 0 announces a server-initiated resize; non-zero values
    /// reject a client-initiated one. Callers check that the client
    /// advertised the pseudo-encoding.
    pub(crate) async fn send_desktop_size(
        &self,
        status: u16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        let mut msg = BytesMut::with_capacity(36);
        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(1); // number of rectangles
        put_extended_desktop_size(&mut msg, status, width, height);
        self.send_message(&msg).await
    }

    /// Forces this session's next update to cover the full screen.
    pub(crate) async fn force_full(&self) {
        self.tracker.lock().await.force_full_update();
    }

    /// Reports this session's disconnection to the event channel.
    pub(crate) fn notify_disconnected(&self) {
        let _ = self.event_tx.send(ClientEvent::Disconnected {
            client_id: self.client_id,
        });
    }

    /// Writes one complete message under the send mutex and flushes.
    async fn send_message(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_timed(&mut *writer, bytes).await?;
        match timeout(IO_TIMEOUT, writer.flush()).await {
            Ok(result) => result.map_err(map_io_error),
            Err(_) => Err(VncError::Timeout),
        }
    }
}

/// Writes the security failure result, plus a reason string where the
/// protocol version carries one.
async fn reject_security(
    stream: &mut TcpStream,
    version: ProtocolVersion,
    reason: &str,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(8 + reason.len());
    buf.put_u32(SECURITY_RESULT_FAILED);
    if version.has_failure_reason() {
        buf.put_u32(reason.len() as u32);
        buf.put_slice(reason.as_bytes());
    }
    write_timed(stream, &buf).await
}

/// Length-complete read bounded by the session I/O timeout.
async fn read_timed<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match timeout(IO_TIMEOUT, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(map_io_error(e)),
        Err(_) => Err(VncError::Timeout),
    }
}

/// Full write bounded by the session I/O timeout.
async fn write_timed<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match timeout(IO_TIMEOUT, writer.write_all(bytes)).await {
        Ok(result) => result.map_err(map_io_error),
        Err(_) => Err(VncError::Timeout),
    }
}

fn map_io_error(e: io::Error) -> VncError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => VncError::ConnectionClosed,
        _ => VncError::Io(e),
    }
}
