//! Control server implementation

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use spymeo_common::Signal;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{ControlError, PROTOCOL_VERSION, Request, Response, Result, protocol::wire_config};

/// Largest request frame the server will read
const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Per-connection read and write timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler trait for processing control requests
///
/// Implement this trait to handle specific command types
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Control server for managing the mail service via Unix domain socket
pub struct ControlServer {
    socket_path: PathBuf,
    handler: Arc<dyn CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    ///
    /// # Errors
    ///
    /// Returns an error if the socket path is empty
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        let socket_path = socket_path.into();
        if socket_path.as_os_str().is_empty() {
            return Err(ControlError::InvalidSocketPath(
                "socket path must not be empty".to_string(),
            ));
        }

        Ok(Self {
            socket_path,
            handler,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start the control server
    ///
    /// This function runs until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another running instance owns the socket
    /// - The socket cannot be bound
    /// - A fatal I/O error occurs
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = self.socket_path.as_path();
        if socket_path.exists() {
            // Test if socket is active by attempting connection
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!(
                        "Socket already in use by running instance: {}",
                        socket_path.display()
                    ),
                )));
            }
            // Stale socket from crashed process, safe to remove
            info!("Removing stale socket file: {}", socket_path.display());
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;

        // Owner read/write only
        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(socket_path).await?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(socket_path, perms).await?;
            info!(
                "Control socket created with mode 0600 (owner only): {}",
                socket_path.display()
            );
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    error!("Error handling control connection: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting control connection: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            info!("Control server shutting down");
                        }
                        Err(e) => {
                            error!("Control server shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        if socket_path.exists() {
            debug!("Removing socket file: {}", socket_path.display());
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }

    /// Serve requests on one connection until the client hangs up.
    ///
    /// Each request must arrive within the connection timeout.
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        loop {
            let request =
                match tokio::time::timeout(CONNECTION_TIMEOUT, Self::read_request(&mut stream))
                    .await
                    .map_err(|_| ControlError::Timeout)?
                {
                    Ok(request) => request,
                    Err(ControlError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                };

            trace!("Received request: {request:?}");

            let response = Self::respond(handler.as_ref(), request).await;

            trace!("Sending response: {response:?}");

            tokio::time::timeout(
                CONNECTION_TIMEOUT,
                Self::write_response(&mut stream, &response),
            )
            .await
            .map_err(|_| ControlError::Timeout)??;
        }
    }

    async fn respond(handler: &dyn CommandHandler, request: Request) -> Response {
        if !request.is_version_compatible() {
            warn!(
                "Rejecting request with protocol version {} (server speaks {PROTOCOL_VERSION})",
                request.version
            );
            return Response::error(
                ControlError::IncompatibleVersion {
                    server: PROTOCOL_VERSION,
                    client: request.version,
                }
                .to_string(),
            );
        }

        match handler.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error handling request: {e}");
                Response::error(e.to_string())
            }
        }
    }

    /// Read a request from the stream
    async fn read_request(stream: &mut UnixStream) -> Result<Request> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ControlError::ConnectionClosed
            } else {
                ControlError::Io(e)
            }
        })?;

        let request_len = u32::from_be_bytes(len_buf);
        if request_len > MAX_REQUEST_SIZE {
            return Err(ControlError::FrameTooLarge {
                size: request_len,
                max: MAX_REQUEST_SIZE,
            });
        }

        let mut request_bytes = vec![0u8; request_len as usize];
        stream.read_exact(&mut request_bytes).await?;

        let (request, _): (Request, _) =
            bincode::serde::decode_from_slice(request_bytes.as_slice(), wire_config())?;
        Ok(request)
    }

    /// Write a response to the stream
    async fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
        let response_bytes = bincode::serde::encode_to_vec(response, wire_config())?;
        let response_len = u32::try_from(response_bytes.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        stream.write_all(&response_len.to_be_bytes()).await?;
        stream.write_all(&response_bytes).await?;
        stream.flush().await?;

        Ok(())
    }
}
