//! Unix socket gRPC dialing.

use crate::error::{PluginError, Result};
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Pause between connection attempts while waiting for a socket.
const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Connect to a gRPC server on a Unix socket, retrying until `timeout`.
///
/// Mirrors a blocking dial: a socket that does not exist yet or refuses
/// connections is retried until the deadline passes.
pub async fn dial(socket_path: &Path, timeout: Duration) -> Result<Channel> {
    let deadline = Instant::now() + timeout;
    let mut last_error = String::from("deadline exceeded");

    // The URI is required by tonic but not used for Unix sockets
    let endpoint = Endpoint::from_static("http://[::]:50051");

    loop {
        let path = socket_path.to_path_buf();
        let connect = endpoint
            .connect_with_connector(service_fn(move |_: Uri| UnixStream::connect(path.clone())));

        match tokio::time::timeout_at(deadline, connect).await {
            Ok(Ok(channel)) => return Ok(channel),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => break,
        }

        if Instant::now() + DIAL_RETRY_INTERVAL >= deadline {
            break;
        }
        tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
    }

    Err(PluginError::DialTimeout {
        endpoint: socket_path.to_path_buf(),
        timeout,
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_missing_socket_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("absent.sock");

        let started = std::time::Instant::now();
        let err = dial(&socket, Duration::from_millis(300)).await.unwrap_err();

        assert!(matches!(err, PluginError::DialTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
