//! Client for connecting to the control socket

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::Mutex,
};
use tracing::{debug, trace, warn};

use crate::{
    ControlError, PROTOCOL_VERSION, Request, Response, ResponsePayload, Result,
    protocol::wire_config,
};

/// Maximum response size accepted from the server (10MB)
const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Client for communicating with the SPYMEO control server
pub struct ControlClient {
    socket_path: PathBuf,
    timeout: Duration,
    /// Reused across requests in watch mode
    persistent_connection: Option<Arc<Mutex<Option<UnixStream>>>>,
}

impl ControlClient {
    /// Create a new control client with the given socket path
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
            persistent_connection: None,
        }
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep one connection open across requests instead of reconnecting for
    /// each one. The connection is re-established once if it drops.
    #[must_use]
    pub fn with_persistent_connection(mut self) -> Self {
        self.persistent_connection = Some(Arc::new(Mutex::new(None)));
        self
    }

    async fn connect(&self) -> Result<UnixStream> {
        debug!("Connecting to control socket: {}", self.socket_path.display());
        Ok(UnixStream::connect(&self.socket_path).await?)
    }

    /// Send a request and receive a response
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Connection fails
    /// - Protocol error occurs
    /// - Request times out
    /// - Server returns an error
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.send_request_internal(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn send_request_internal(&self, request: Request) -> Result<Response> {
        if let Some(persistent) = &self.persistent_connection {
            self.send_request_persistent(request, persistent).await
        } else {
            let mut stream = self.connect().await?;
            Self::send_and_receive(&mut stream, &request).await
        }
    }

    async fn send_request_persistent(
        &self,
        request: Request,
        persistent: &Arc<Mutex<Option<UnixStream>>>,
    ) -> Result<Response> {
        let mut guard = persistent.lock().await;

        if let Some(stream) = guard.as_mut() {
            match Self::send_and_receive(stream, &request).await {
                Err(ControlError::ServerError(message)) => {
                    return Err(ControlError::ServerError(message));
                }
                Err(e) => {
                    warn!(
                        "Persistent connection failed ({e}), reconnecting to {}",
                        self.socket_path.display()
                    );
                    *guard = None;
                }
                ok => return ok,
            }
        }

        let mut stream = self.connect().await?;
        let result = Self::send_and_receive(&mut stream, &request).await;
        *guard = Some(stream);
        result
    }

    /// Send request and receive response on an existing stream
    async fn send_and_receive(stream: &mut UnixStream, request: &Request) -> Result<Response> {
        let request_bytes = bincode::serde::encode_to_vec(request, wire_config())?;
        let request_len = u32::try_from(request_bytes.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        trace!("Sending request: {request_len} bytes");

        stream.write_all(&request_len.to_be_bytes()).await?;
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ControlError::ConnectionClosed
            } else {
                ControlError::Io(e)
            }
        })?;
        let response_len = u32::from_be_bytes(len_buf);

        if response_len > MAX_RESPONSE_SIZE {
            return Err(ControlError::FrameTooLarge {
                size: response_len,
                max: MAX_RESPONSE_SIZE,
            });
        }

        trace!("Receiving response: {response_len} bytes");

        let mut response_bytes = vec![0u8; response_len as usize];
        stream.read_exact(&mut response_bytes).await?;

        let (response, _): (Response, _) =
            bincode::serde::decode_from_slice(&response_bytes, wire_config())?;

        if !response.is_version_compatible() {
            return Err(ControlError::IncompatibleVersion {
                server: response.version,
                client: PROTOCOL_VERSION,
            });
        }

        if let ResponsePayload::Error(ref err) = response.payload {
            return Err(ControlError::ServerError(err.clone()));
        }

        Ok(response)
    }

    /// Check if the control socket exists
    ///
    /// # Errors
    ///
    /// Returns an error if the socket doesn't exist
    pub fn check_socket_exists(&self) -> Result<()> {
        if !Path::new(&self.socket_path).exists() {
            return Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ControlClient::new("/tmp/test.sock");
        assert_eq!(client.socket_path, PathBuf::from("/tmp/test.sock"));
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert!(client.persistent_connection.is_none());
    }

    #[test]
    fn test_client_builder_chain() {
        let client = ControlClient::new("/tmp/test.sock")
            .with_timeout(Duration::from_secs(5))
            .with_persistent_connection();
        assert_eq!(client.timeout, Duration::from_secs(5));
        assert!(client.persistent_connection.is_some());
    }

    #[test]
    fn test_missing_socket_is_reported() {
        let client = ControlClient::new("/nonexistent/spymeo-test.sock");
        assert!(matches!(
            client.check_socket_exists(),
            Err(ControlError::InvalidSocketPath(_))
        ));
    }
}
