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

//! The VNC server: TCP listener, session set and update fan-out.
//!
//! [`VncServer`] owns the canonical framebuffer and the set of live
//! sessions. Each accepted connection runs on its own task; errors in one
//! session never affect the others, and the server keeps accepting until
//! [`stop`](VncServer::stop). Frames pushed through
//! [`broadcast_update`](VncServer::broadcast_update) are diffed per session
//! against that session's own previous snapshot, so every client receives
//! exactly what it has not seen yet.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::capture::SharedInputSink;
use crate::client::{ClientEvent, VncClient};
use crate::error::Result;
use crate::events::ServerEvent;
use crate::framebuffer::{DirtyRegion, Framebuffer};
use crate::protocol::{ENCODING_COPYRECT, ENCODING_EXTENDED_DESKTOP_SIZE};

struct ServerInner {
    framebuffer: Framebuffer,
    desktop_name: std::sync::Mutex<String>,
    /// Copy-on-read: sessions snapshot the password at accept time, so a
    /// change never affects already-connected clients.
    password: std::sync::Mutex<Option<String>>,
    sessions: RwLock<HashMap<usize, Arc<VncClient>>>,
    tasks: RwLock<HashMap<usize, JoinHandle<()>>>,
    next_client_id: AtomicUsize,
    stopped: AtomicBool,
    stop_notify: Notify,
    client_tx: mpsc::UnboundedSender<ClientEvent>,
    client_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    event_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
    input_sink: std::sync::Mutex<Option<SharedInputSink>>,
}

impl ServerInner {
    fn publish(&self, event: ServerEvent) {
        let mut slot = self.event_tx.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            if tx.send(event).is_err() {
                // Receiver is gone; stop publishing.
                *slot = None;
            }
        }
    }
}

/// A VNC (RFB) server streaming a shared framebuffer to remote viewers.
///
/// The handle is cheaply cloneable; all clones drive the same server. The
/// usual life cycle is: create, optionally set a password and an input
/// sink, spawn [`listen`](Self::listen), then feed frames through
/// [`broadcast_update`](Self::broadcast_update).
#[derive(Clone)]
pub struct VncServer {
    inner: Arc<ServerInner>,
}

impl VncServer {
    /// Creates a server with a zeroed framebuffer of the given dimensions.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ServerInner {
                framebuffer: Framebuffer::new(width, height),
                desktop_name: std::sync::Mutex::new("vncshare".to_string()),
                password: std::sync::Mutex::new(None),
                sessions: RwLock::new(HashMap::new()),
                tasks: RwLock::new(HashMap::new()),
                next_client_id: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                stop_notify: Notify::new(),
                client_tx,
                client_rx: std::sync::Mutex::new(Some(client_rx)),
                event_tx: std::sync::Mutex::new(None),
                input_sink: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Sets the desktop name sent in ServerInit to newly connecting clients.
    pub fn set_desktop_name(&self, name: impl Into<String>) {
        *self.inner.desktop_name.lock().unwrap() = name.into();
    }

    /// Sets or clears the VNC password.
    ///
    /// Takes effect for connections accepted from now on; existing sessions
    /// keep the password they authenticated against.
    pub fn set_password(&self, password: Option<String>) {
        *self.inner.password.lock().unwrap() = password;
    }

    /// Installs the sink that receives key and pointer events from clients.
    pub fn set_input_sink(&self, sink: SharedInputSink) {
        *self.inner.input_sink.lock().unwrap() = Some(sink);
    }

    /// Subscribes to server events (connections, input, disconnections).
    ///
    /// Only one subscriber is active at a time; a later call replaces the
    /// earlier stream.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.event_tx.lock().unwrap() = Some(tx);
        rx
    }

    /// The shared framebuffer this server serves from.
    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.inner.framebuffer
    }

    /// Number of currently connected clients.
    pub async fn client_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Snapshot of the connected clients as `(id, remote address)` pairs.
    pub async fn clients(&self) -> Vec<(usize, String)> {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .map(|c| (c.client_id(), c.remote_host().to_string()))
            .collect()
    }

    /// True once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Binds to `0.0.0.0:port` and serves until stopped.
    ///
    /// # Errors
    ///
    /// Bind failures propagate; they are the one fatal error class that
    /// halts the server instead of a single session.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("VNC server listening on port {port}");
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        // The event pump moves client events to the input sink and the
        // application's event stream. First serve call takes the receiver.
        if let Some(rx) = self.inner.client_rx.lock().unwrap().take() {
            let inner = self.inner.clone();
            tokio::spawn(event_pump(inner, rx));
        }

        // One pinned notified future so a stop fired between loop
        // iterations is never missed.
        let stopped = self.inner.stop_notify.notified();
        tokio::pin!(stopped);

        while !self.is_stopped() {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("Connection from {peer}");
                            self.spawn_session(stream, peer).await;
                        }
                        Err(e) => {
                            if self.is_stopped() {
                                break;
                            }
                            warn!("Accept failed: {e}");
                        }
                    }
                }
                () = &mut stopped => {
                    break;
                }
            }
        }

        self.disconnect_all().await;
        info!("VNC server stopped");
        Ok(())
    }

    /// Replaces the framebuffer contents without notifying sessions.
    ///
    /// Sessions pick the new contents up when their next update request is
    /// serviced. Use [`broadcast_update`](Self::broadcast_update) to also
    /// service pending requests immediately.
    ///
    /// # Errors
    ///
    /// Fails when `data` does not match the framebuffer size.
    pub async fn set_frame(&self, data: &[u8]) -> Result<()> {
        self.inner.framebuffer.set_frame(data).await
    }

    /// Publishes a new frame and services every session's pending request.
    ///
    /// Each session diffs the frame against its own previous snapshot; a
    /// session with no outstanding request is left alone (the RFB pull
    /// model - it will ask when it is ready). Sessions whose stream fails
    /// are evicted; their errors never propagate to the caller.
    ///
    /// # Errors
    ///
    /// Fails only when `data` does not match the framebuffer size.
    pub async fn broadcast_update(&self, data: &[u8]) -> Result<()> {
        self.inner.framebuffer.set_frame(data).await?;

        for client in self.session_handles().await {
            if let Err(e) = client.service_pending().await {
                self.evict(client.client_id(), &e.to_string()).await;
            }
        }
        Ok(())
    }

    /// Forces every session's next update to cover the full screen.
    pub async fn broadcast_full(&self) {
        for client in self.session_handles().await {
            client.force_full().await;
        }
    }

    /// Moves a rectangle within the framebuffer and tells clients about it.
    ///
    /// Sessions that advertised CopyRect receive the 4-byte move
    /// instruction; everyone else picks the change up through their own
    /// diff on the next update.
    ///
    /// # Errors
    ///
    /// Fails when the rectangles fall outside the framebuffer.
    pub async fn copy_rect(&self, src_x: u16, src_y: u16, region: DirtyRegion) -> Result<()> {
        self.inner.framebuffer.copy_rect(src_x, src_y, region).await?;

        for client in self.session_handles().await {
            if client.advertised(ENCODING_COPYRECT).await {
                if let Err(e) = client.send_copy_rect(src_x, src_y, region).await {
                    self.evict(client.client_id(), &e.to_string()).await;
                }
            }
        }
        Ok(())
    }

    /// Resizes the framebuffer and announces the new dimensions.
    ///
    /// Every session's tracker is reset so the next update covers the new
    /// full screen; sessions that advertised ExtendedDesktopSize receive
    /// the resize rectangle immediately.
    ///
    /// # Errors
    ///
    /// Fails when the dimensions equal the current ones.
    pub async fn resize(&self, width: u16, height: u16) -> Result<()> {
        self.inner.framebuffer.resize(width, height).await?;
        info!("Framebuffer resized to {width}x{height}");

        for client in self.session_handles().await {
            client.force_full().await;
            if client.advertised(ENCODING_EXTENDED_DESKTOP_SIZE).await {
                if let Err(e) = client.send_desktop_size(0, width, height).await {
                    self.evict(client.client_id(), &e.to_string()).await;
                }
            }
        }
        Ok(())
    }

    /// Stops the server: the accept loop ends and all sessions disconnect.
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop_notify.notify_waiters();
        self.disconnect_all().await;
    }

    /// Copies the live session handles out under the lock, so no I/O ever
    /// happens while the session set is locked.
    async fn session_handles(&self) -> Vec<Arc<VncClient>> {
        self.inner.sessions.read().await.values().cloned().collect()
    }

    async fn spawn_session(&self, stream: TcpStream, peer: std::net::SocketAddr) {
        let client_id = self.inner.next_client_id.fetch_add(1, Ordering::SeqCst);
        let password = self.inner.password.lock().unwrap().clone();
        let desktop_name = self.inner.desktop_name.lock().unwrap().clone();
        let framebuffer = self.inner.framebuffer.clone();
        let client_tx = self.inner.client_tx.clone();
        let server = self.clone();

        let task = tokio::spawn(async move {
            let (client, reader) = match VncClient::accept(
                client_id,
                stream,
                framebuffer,
                desktop_name,
                password,
                client_tx,
            )
            .await
            {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Client {peer} handshake failed: {e}");
                    return;
                }
            };

            server
                .inner
                .sessions
                .write()
                .await
                .insert(client_id, client.clone());
            server.inner.publish(ServerEvent::ClientConnected {
                id: client_id,
                address: peer,
            });
            info!(
                "Client {peer} session started (RFB {})",
                client.protocol_version()
            );

            match client.run(reader).await {
                Ok(()) => info!("Client {peer} disconnected"),
                Err(e) => info!("Client {peer} session ended: {e}"),
            }

            server.inner.sessions.write().await.remove(&client_id);
            client.notify_disconnected();
        });

        // Finished tasks are swept here rather than removing themselves,
        // which would race with this insert.
        let mut tasks = self.inner.tasks.write().await;
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(client_id, task);
    }

    /// Drops a session after a send failure on the broadcast path.
    async fn evict(&self, client_id: usize, reason: &str) {
        warn!("Evicting client {client_id}: {reason}");
        let client = self.inner.sessions.write().await.remove(&client_id);
        if let Some(task) = self.inner.tasks.write().await.remove(&client_id) {
            task.abort();
        }
        if let Some(client) = client {
            client.notify_disconnected();
        }
    }

    async fn disconnect_all(&self) {
        let clients: Vec<Arc<VncClient>> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();
        for (_, task) in self.inner.tasks.write().await.drain() {
            task.abort();
        }
        for client in clients {
            client.notify_disconnected();
        }
    }
}

/// Moves session events to the input sink and the application stream.
async fn event_pump(inner: Arc<ServerInner>, mut rx: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ClientEvent::KeyPress {
                client_id,
                down,
                key,
            } => {
                let sink = inner.input_sink.lock().unwrap().clone();
                if let Some(sink) = sink {
                    sink.key_event(down, key);
                }
                inner.publish(ServerEvent::KeyEvent {
                    client_id,
                    key,
                    pressed: down,
                });
            }
            ClientEvent::PointerMove {
                client_id,
                x,
                y,
                button_mask,
            } => {
                let sink = inner.input_sink.lock().unwrap().clone();
                if let Some(sink) = sink {
                    sink.pointer_event(button_mask, x, y);
                }
                inner.publish(ServerEvent::PointerEvent {
                    client_id,
                    x,
                    y,
                    button_mask,
                });
            }
            ClientEvent::Disconnected { client_id } => {
                inner.publish(ServerEvent::ClientDisconnected { id: client_id });
            }
        }
    }
}
