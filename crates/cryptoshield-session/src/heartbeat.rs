use std::time::Duration;

use cryptoshield_drive::MonitorState;
use tokio::{sync::watch, task::JoinHandle, time::interval};
use tracing::{debug, instrument};

pub const DEFAULT_HEARTBEAT_URL: &str = "http://127.0.0.1:5000/api/heartbeat";
/// Floor for the beat period.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Where and how often to announce that a session is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub url: String,
    pub interval: Duration,
    /// Per-request bound, covering connect and response.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_HEARTBEAT_URL.to_string(),
            interval: Duration::from_secs(2),
            timeout: Duration::from_millis(800),
        }
    }
}

/// Empty POSTs to a local companion service. Every failure is ignored.
pub struct Heartbeat {
    client: reqwest::Client,
    settings: HeartbeatSettings,
}

impl Heartbeat {
    pub fn new(settings: HeartbeatSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    #[instrument(skip_all, fields(url = %self.settings.url))]
    pub async fn beat(&self) -> Result<reqwest::StatusCode, reqwest::Error> {
        let response = self.client.post(&self.settings.url).send().await?;
        Ok(response.status())
    }

    /// Beat immediately, then on every interval, until stopped or until the
    /// session state turns `Revoked`.
    pub fn spawn(self, mut session: watch::Receiver<MonitorState>) -> HeartbeatHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(self.settings.interval.max(MIN_HEARTBEAT_INTERVAL));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => return,
                    changed = session.changed() => {
                        if changed.is_err() || *session.borrow() == MonitorState::Revoked {
                            debug!("session ended; heartbeat stopping");
                            return;
                        }
                        continue;
                    }
                }
                match self.beat().await {
                    Ok(status) => debug!(%status, "heartbeat sent"),
                    Err(err) => debug!(error = %err, "heartbeat failed"),
                }
            }
        });
        HeartbeatHandle { stop_tx, task }
    }
}

pub struct HeartbeatHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Minimal HTTP receiver that answers 200 and counts POSTs.
    async fn receiver() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if buf[..n].starts_with(b"POST /api/heartbeat") {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        (format!("http://{addr}/api/heartbeat"), hits)
    }

    fn settings(url: String) -> HeartbeatSettings {
        HeartbeatSettings {
            url,
            interval: Duration::from_millis(30),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn beat_reaches_local_receiver() {
        let (url, hits) = receiver().await;
        let heartbeat = Heartbeat::new(settings(url)).expect("client");
        let status = heartbeat.beat().await.expect("beat");
        assert!(status.is_success());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_receiver_is_an_error_not_a_hang() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let heartbeat =
            Heartbeat::new(settings(format!("http://{addr}/api/heartbeat"))).expect("client");
        let result = tokio::time::timeout(Duration::from_secs(2), heartbeat.beat())
            .await
            .expect("bounded");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn loop_stops_when_session_is_revoked() {
        let (url, hits) = receiver().await;
        let (state_tx, state_rx) = watch::channel(MonitorState::Watching);
        let handle = Heartbeat::new(settings(url)).expect("client").spawn(state_rx);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(hits.load(Ordering::SeqCst) >= 2);

        state_tx.send(MonitorState::Revoked).expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
        let after = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after);
        handle.stop().await;
    }

    #[tokio::test]
    async fn zero_interval_is_clamped_instead_of_panicking() {
        let (url, hits) = receiver().await;
        let (_state_tx, state_rx) = watch::channel(MonitorState::Watching);
        let mut zero = settings(url);
        zero.interval = Duration::ZERO;
        let handle = Heartbeat::new(zero).expect("client").spawn(state_rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!handle.is_finished());
        assert!(hits.load(Ordering::SeqCst) >= 1);
        handle.stop().await;
    }
}
