//! Interactive operator CLI for the VNC server.
//!
//! Binds the server, pushes a static test pattern, and accepts the
//! commands `status`, `clients` and `quit` on stdin. Exits 0 on a normal
//! shutdown and non-zero when the listener cannot be bound.
//!
//! Usage:
//!   cargo run --example cli -- --port 5900 --width 800 --height 600

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use vncshare::capture::InputSink;
use vncshare::VncServer;

#[derive(Parser, Debug)]
#[command(name = "vncshare", about = "VNC server with an interactive operator console")]
struct Config {
    /// VNC listen port
    #[arg(short, long, default_value_t = 5900)]
    port: u16,

    /// Framebuffer width
    #[arg(long, default_value_t = 800)]
    width: u16,

    /// Framebuffer height
    #[arg(long, default_value_t = 600)]
    height: u16,

    /// VNC password for authentication. No auth if omitted.
    #[arg(long)]
    password: Option<String>,

    /// Desktop name shown to clients
    #[arg(long, default_value = "vncshare")]
    name: String,
}

/// Sink that prints input events instead of injecting them anywhere.
struct LoggingSink;

impl InputSink for LoggingSink {
    fn key_event(&self, down: bool, keysym: u32) {
        println!("key {} keysym=0x{keysym:x}", if down { "down" } else { "up" });
    }

    fn pointer_event(&self, button_mask: u8, x: u16, y: u16) {
        if button_mask != 0 {
            println!("pointer ({x},{y}) buttons={button_mask:#04x}");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let config = Config::parse();

    let server = VncServer::new(config.width, config.height);
    server.set_desktop_name(config.name.clone());
    server.set_password(config.password.clone());
    server.set_input_sink(Arc::new(LoggingSink));

    // Static test pattern (BGRA gradient)
    let mut pixels = vec![0u8; config.width as usize * config.height as usize * 4];
    for y in 0..config.height as usize {
        for x in 0..config.width as usize {
            let offset = (y * config.width as usize + x) * 4;
            pixels[offset] = 128; // B
            pixels[offset + 1] = (y * 255 / config.height as usize) as u8; // G
            pixels[offset + 2] = (x * 255 / config.width as usize) as u8; // R
            pixels[offset + 3] = 255;
        }
    }
    server
        .set_frame(&pixels)
        .await
        .expect("pattern matches framebuffer size");

    let mut listen_handle = {
        let server = server.clone();
        let port = config.port;
        tokio::spawn(async move { server.listen(port).await })
    };

    println!(
        "Serving {}x{} on port {} (auth: {})",
        config.width,
        config.height,
        config.port,
        if config.password.is_some() { "vnc" } else { "none" }
    );
    println!("Commands: status, clients, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.ok().flatten().as_deref().map(str::trim) {
                    Some("status") => {
                        println!(
                            "port={} framebuffer={}x{} clients={}",
                            config.port,
                            config.width,
                            config.height,
                            server.client_count().await
                        );
                    }
                    Some("clients") => {
                        let clients = server.clients().await;
                        if clients.is_empty() {
                            println!("no clients connected");
                        }
                        for (id, addr) in clients {
                            println!("client {id}: {addr}");
                        }
                    }
                    Some("quit") | None => {
                        server.stop().await;
                        break;
                    }
                    Some("") => {}
                    Some(other) => println!("unknown command: {other}"),
                }
            }
            result = &mut listen_handle => {
                // Listener ended on its own: bind failure or stop.
                return match result {
                    Ok(Ok(())) => ExitCode::SUCCESS,
                    Ok(Err(e)) => {
                        eprintln!("server error: {e}");
                        ExitCode::FAILURE
                    }
                    Err(e) => {
                        eprintln!("server task failed: {e}");
                        ExitCode::FAILURE
                    }
                };
            }
        }
    }

    ExitCode::SUCCESS
}
