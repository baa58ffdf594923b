// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! LMTP server

use anyhow::{Context, Result};
use std::{
    fs::{self, Permissions},
    io,
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::{Mutex, Notify},
    time,
};

use crate::{config, util};
use super::{handler::Handler, proto::{Connection, Response}};

/// Longest line we are willing to buffer
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// LMTP server accepting connections on a UNIX socket, one at a time
pub struct Server<H> {
    config: config::Lmtp,
    hostname: String,
    /// Shared with the task serving the current client
    handler: Arc<Mutex<H>>,
    stopper: Stopper,
}

/// Handle used to stop a running [`Server`] from another task or thread
#[derive(Clone, Default)]
pub struct Stopper {
    signal: Arc<StopSignal>,
}

#[derive(Default)]
struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl Stopper {
    /// Request the server to stop
    ///
    /// An idle server stops immediately; a connection in progress is served
    /// to completion first.
    pub fn stop(&self) {
        self.signal.stopped.store(true, Ordering::SeqCst);
        self.signal.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.stopped.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.signal.stopped.store(false, Ordering::SeqCst);
    }

    async fn stopped(&self) {
        while !self.is_stopped() {
            self.signal.notify.notified().await;
        }
    }
}

impl<H: Handler + Send + 'static> Server<H> {
    /// Create a new server
    ///
    /// Fails if anything already exists at the configured socket path.
    pub fn new(config: config::Lmtp, handler: H) -> Result<Self> {
        if fs::symlink_metadata(&config.socket).is_ok() {
            anyhow::bail!("socket path {} already exists", config.socket.display());
        }

        let hostname = config.hostname.clone().unwrap_or_else(util::hostname);

        Ok(Server {
            config,
            hostname,
            handler: Arc::new(Mutex::new(handler)),
            stopper: Stopper::default(),
        })
    }

    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Extensions announced in addition to the built-in ones
    pub fn extensions_mut(&mut self) -> &mut Vec<String> {
        &mut self.config.extensions
    }

    pub fn set_success_message(&mut self, message: impl Into<String>) {
        self.config.success_message = message.into();
    }

    /// Bind the socket and serve clients until stopped
    ///
    /// The socket file is removed when this returns, whatever the reason.
    /// A stop request ends only the run it interrupts, after which the server
    /// may be started again.
    pub async fn start(&mut self) -> Result<()> {
        let listener = UnixListener::bind(&self.config.socket)
            .with_context(|| format!("could not bind UNIX socket at {}", self.config.socket.display()))?;
        let _socket = SocketFile(self.config.socket.clone());

        if let Some(mode) = self.config.mode {
            fs::set_permissions(&self.config.socket, Permissions::from_mode(mode))
                .with_context(|| format!("could not set mode {mode:o} on {}", self.config.socket.display()))?;
        }

        log::info!("Started LMTP server on {}", self.config.socket.display());

        while !self.stopper.is_stopped() {
            let socket = tokio::select! {
                accepted = listener.accept() => accepted.context("could not accept connection")?.0,
                _ = self.stopper.stopped() => break,
            };

            log::info!("Client connected");
            self.serve(socket).await;
            log::info!("Client disconnected");
        }

        self.stopper.reset();
        log::info!("Stopped LMTP server on {}", self.config.socket.display());

        Ok(())
    }

    /// Handle one LMTP connection, never failing
    ///
    /// The client is served in its own task; a panic in the handler ends only
    /// that task.
    async fn serve(&self, socket: UnixStream) {
        let config = self.config.clone();
        let hostname = self.hostname.clone();
        let handler = self.handler.clone();

        let client = tokio::spawn(async move {
            let mut handler = handler.lock().await;
            serve_client(&config, &hostname, &mut *handler, socket).await;
        });

        match client.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => log::error!("handler panicked while serving client"),
            Err(err) => log::error!("client task failed: {err}"),
        }
    }
}

async fn serve_client<H: Handler>(
    config: &config::Lmtp,
    hostname: &str,
    handler: &mut H,
    mut socket: UnixStream,
) {
    let timeout = Duration::from_secs(config.timeout);
    let mut lmtp = Connection::new(config, hostname, handler);

    if let Err(err) = handle_client(&mut lmtp, &mut socket, timeout).await {
        log::error!("error serving client: {err:?}");
    }

    let _ = socket.shutdown().await;
}

async fn handle_client<H: Handler>(
    lmtp: &mut Connection<'_, H>,
    socket: &mut UnixStream,
    timeout: Duration,
) -> Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    send(&mut writer, &lmtp.connect()).await?;

    let mut line = Vec::new();

    loop {
        line.clear();

        let response = match time::timeout(timeout, read_line(&mut reader, &mut line)).await {
            Err(_) => lmtp.timeout(),
            Ok(read) => match read.context("could not read from client")? {
                Line::Complete => {
                    log::trace!(">> {}", util::maybe_ascii(&line));
                    match lmtp.line(&line) {
                        Some(response) => response,
                        None => continue,
                    }
                }
                Line::Overflow => lmtp.overflow(),
                Line::End => {
                    lmtp.disconnect();
                    break;
                }
            },
        };

        send(&mut writer, &response).await?;

        if response.close_connection {
            break;
        }
    }

    Ok(())
}

async fn send(writer: &mut (impl AsyncWrite + Unpin), response: &Response) -> Result<()> {
    log::trace!("<< {}", util::maybe_ascii(response.data.as_bytes()));
    writer.write_all(response.data.as_bytes())
        .await
        .context("could not write to client")?;
    writer.flush().await?;
    Ok(())
}

enum Line {
    /// A line terminated with LF, or the last line before end of stream
    Complete,
    /// The line exceeded [`MAX_LINE_LENGTH`]
    Overflow,
    /// The client closed the connection
    End,
}

/// Read a single line, including its terminator, into `line`
async fn read_line(reader: &mut (impl AsyncBufRead + Unpin), line: &mut Vec<u8>)
-> io::Result<Line> {
    loop {
        let buffer = reader.fill_buf().await?;

        if buffer.is_empty() {
            // An unterminated last line is still a line
            return Ok(if line.is_empty() { Line::End } else { Line::Complete });
        }

        let (length, complete) = match memchr::memchr(b'\n', buffer) {
            Some(offset) => (offset + 1, true),
            None => (buffer.len(), false),
        };

        line.extend_from_slice(&buffer[..length]);
        reader.consume(length);

        if complete {
            return Ok(Line::Complete);
        }

        if line.len() > MAX_LINE_LENGTH {
            return Ok(Line::Overflow);
        }
    }
}

/// Removes the socket file when dropped
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => log::debug!("Removed {}", self.0.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("could not remove {}: {err}", self.0.display()),
        }
    }
}
