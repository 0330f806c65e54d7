use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

/// Poll until the stream port accepts TCP connections or `timeout` passes.
pub async fn wait_for_stream_ready(port: u16, timeout: Duration, poll_interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            debug!(port, "Browser stream is accepting connections");
            return true;
        }
        if Instant::now() + poll_interval > deadline {
            debug!(port, "Browser stream not ready before timeout");
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
