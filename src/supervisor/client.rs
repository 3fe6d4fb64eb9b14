//! Helper RPC client for one uid

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use super::error::{Result, SupervisorError};
use super::protocol::{HelperRequest, HelperResponse};
use super::ProcessStatus;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Connection parameters for one helper instance
#[derive(Debug, Clone)]
pub struct HelperClient {
    socket: PathBuf,
    ping_timeout: Duration,
}

impl HelperClient {
    /// Client for the helper listening on `socket`
    pub fn new(socket: impl Into<PathBuf>, ping_timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            ping_timeout,
        }
    }

    /// Socket this client talks to
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn call(&self, request: &HelperRequest) -> Result<()> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|source| SupervisorError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;
        trace!(?request, socket = %self.socket.display(), "Sent helper request");

        let mut reply = String::new();
        let read = BufReader::new(read_half).read_line(&mut reply).await?;
        if read == 0 {
            return Err(SupervisorError::Protocol(
                "connection closed before reply".to_string(),
            ));
        }

        let response: HelperResponse = serde_json::from_str(reply.trim_end())?;
        if response.ok {
            Ok(())
        } else {
            Err(SupervisorError::Rejected(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Check the helper is alive
    ///
    /// With `wait`, connection failures are retried until the ping timeout
    /// elapses so a freshly spawned helper has time to bind its socket.
    pub async fn ping(&self, wait: bool) -> Result<()> {
        if !wait {
            return self.call(&HelperRequest::Ping).await;
        }

        let attempt = async {
            loop {
                match self.call(&HelperRequest::Ping).await {
                    Err(SupervisorError::Connect { .. }) => {
                        tokio::time::sleep(RETRY_INTERVAL).await;
                    }
                    result => return result,
                }
            }
        };

        tokio::time::timeout(self.ping_timeout, attempt)
            .await
            .map_err(|_| SupervisorError::Timeout)?
    }

    /// Start fileshare inside the helper
    pub async fn start_fileshare(&self) -> Result<()> {
        self.call(&HelperRequest::StartFileshare).await
    }

    /// Stop fileshare inside the helper
    pub async fn stop_fileshare(&self) -> Result<()> {
        self.call(&HelperRequest::StopFileshare).await
    }

    /// Ask the helper to exit, optionally disabling autostart
    pub async fn stop(&self, disable: bool) -> Result<()> {
        self.call(&HelperRequest::Stop {
            disable,
            restart: false,
        })
        .await
    }

    /// Ask the helper to restart itself
    pub async fn restart(&self) -> Result<()> {
        self.call(&HelperRequest::Stop {
            disable: false,
            restart: true,
        })
        .await
    }

    /// Classify the helper by a single ping
    pub async fn process_status(&self) -> ProcessStatus {
        match self.ping(false).await {
            Ok(()) => ProcessStatus::Running,
            Err(e) if e.is_permission_denied() => ProcessStatus::RunningForOtherUser,
            Err(e) => {
                debug!(socket = %self.socket.display(), "Helper not reachable: {}", e);
                ProcessStatus::NotRunning
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio::sync::Mutex;

    /// Serve `reply` to every connection and record the requests
    pub(crate) fn fake_helper(
        listener: UnixListener,
        reply: HelperResponse,
    ) -> Arc<Mutex<Vec<HelperRequest>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read_half, mut write_half) = stream.into_split();
                let mut line = String::new();
                if BufReader::new(read_half).read_line(&mut line).await.is_err() {
                    continue;
                }
                if let Ok(request) = serde_json::from_str::<HelperRequest>(line.trim_end()) {
                    recorded.lock().await.push(request);
                }
                let mut out = serde_json::to_vec(&reply).unwrap();
                out.push(b'\n');
                let _ = write_half.write_all(&out).await;
            }
        });

        seen
    }

    fn client(dir: &TempDir) -> HelperClient {
        HelperClient::new(dir.path().join("helper.sock"), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        let listener = UnixListener::bind(client.socket()).unwrap();
        let seen = fake_helper(listener, HelperResponse::ok());

        client.ping(false).await.unwrap();
        assert_eq!(*seen.lock().await, vec![HelperRequest::Ping]);
        assert_eq!(client.process_status().await, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn test_stop_and_restart_requests() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        let listener = UnixListener::bind(client.socket()).unwrap();
        let seen = fake_helper(listener, HelperResponse::ok());

        client.stop(true).await.unwrap();
        client.restart().await.unwrap();

        assert_eq!(
            *seen.lock().await,
            vec![
                HelperRequest::Stop {
                    disable: true,
                    restart: false
                },
                HelperRequest::Stop {
                    disable: false,
                    restart: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        let listener = UnixListener::bind(client.socket()).unwrap();
        fake_helper(listener, HelperResponse::error("meshnet not enabled"));

        match client.start_fileshare().await {
            Err(SupervisorError::Rejected(message)) => assert_eq!(message, "meshnet not enabled"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_socket() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);

        assert!(matches!(
            client.ping(false).await,
            Err(SupervisorError::Connect { .. })
        ));
        assert_eq!(client.process_status().await, ProcessStatus::NotRunning);
    }

    #[tokio::test]
    async fn test_waiting_ping_retries_until_bound() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        let socket = client.socket().to_path_buf();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let listener = UnixListener::bind(socket).unwrap();
            fake_helper(listener, HelperResponse::ok());
        });

        client.ping(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiting_ping_times_out() {
        let dir = TempDir::new().unwrap();
        let client = HelperClient::new(dir.path().join("none.sock"), Duration::from_millis(300));

        assert!(matches!(
            client.ping(true).await,
            Err(SupervisorError::Timeout)
        ));
    }
}
