// UDP listener - Receives logger datagrams and signals end of day on silence
use crate::application::clock::Clock;
use crate::application::ingest_service::IngestService;
use crate::infrastructure::raw_log::{RawFrameLog, format_hex_line};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 1024;

pub struct UdpListener {
    socket: UdpSocket,
    idle_timeout: Duration,
    verbose: bool,
    clock: Arc<dyn Clock>,
    raw_log: Option<RawFrameLog>,
    service: IngestService,
}

impl UdpListener {
    pub async fn bind(
        addr: SocketAddr,
        idle_timeout: Duration,
        clock: Arc<dyn Clock>,
        service: IngestService,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            idle_timeout,
            verbose: false,
            clock,
            raw_log: None,
            service,
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_raw_log(mut self, raw_log: Option<RawFrameLog>) -> Self {
        self.raw_log = raw_log;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until `shutdown` resolves, then close the current day.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tracing::info!(
            "Listening for logger datagrams on {} (idle timeout {:?})",
            self.local_addr()?,
            self.idle_timeout
        );

        let mut buf = vec![0u8; MAX_DATAGRAM];
        tokio::pin!(shutdown);

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => None,
                received = tokio::time::timeout(self.idle_timeout, self.socket.recv_from(&mut buf)) => Some(received),
            };

            match received {
                None => {
                    tracing::info!("Shutting down listener");
                    self.close_day().await;
                    return Ok(());
                }
                Some(Ok(Ok((len, peer)))) => self.on_datagram(&buf[..len], peer).await,
                Some(Ok(Err(e))) => tracing::warn!("Receive failed: {}", e),
                Some(Err(_)) => {
                    tracing::debug!("No datagram for {:?}", self.idle_timeout);
                    self.close_day().await;
                }
            }
        }
    }

    async fn on_datagram(&mut self, raw: &[u8], peer: SocketAddr) {
        let received_at = self.clock.now();

        if self.verbose {
            tracing::info!("{} {}", peer, format_hex_line(received_at, raw));
        }
        if let Some(log) = &self.raw_log {
            if let Err(e) = log.append(received_at, raw).await {
                tracing::error!("Failed to journal datagram in {}: {}", log.dir().display(), e);
            }
        }

        self.service.handle_datagram(raw, received_at.time());
    }

    async fn close_day(&mut self) {
        if let Err(e) = self.service.end_of_day().await {
            tracing::error!("Could not save day readings: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::SystemClock;
    use crate::application::day_aggregator::DayAggregator;
    use crate::application::day_aggregator::tests::RecordingSink;
    use crate::domain::frame::tests::long_frame;
    use crate::domain::frame::{Field, FrameDecoder};
    use tokio::sync::oneshot;

    async fn start(
        sink: Arc<RecordingSink>,
        idle_timeout: Duration,
        raw_log: Option<RawFrameLog>,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = IngestService::new(
            FrameDecoder::default(),
            DayAggregator::new(sink, clock.clone(), 1),
        );
        let listener = UdpListener::bind("127.0.0.1:0".parse().unwrap(), idle_timeout, clock, service)
            .await
            .unwrap()
            .with_raw_log(raw_log);
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(listener.run(async move {
            let _ = rx.await;
        }));
        (addr, tx, handle)
    }

    async fn send(addr: SocketAddr, payload: &[u8]) {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(payload, addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout_flushes_day_once() {
        let sink = Arc::new(RecordingSink::default());
        let (addr, tx, handle) = start(sink.clone(), Duration::from_millis(200), None).await;

        send(addr, &long_frame(&[(Field::Power, 750)])).await;
        // several idle periods elapse, only the first one writes
        tokio::time::sleep(Duration::from_millis(900)).await;

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(*sink.calls.lock().unwrap(), 1);
        let tables = sink.tables.lock().unwrap();
        assert_eq!(tables[0].rows.len(), 1);
        assert_eq!(tables[0].rows[0].telemetry().current_power, 750.0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_open_day() {
        let sink = Arc::new(RecordingSink::default());
        let dir = tempfile::tempdir().unwrap();
        let raw_log = RawFrameLog::new(dir.path());
        let (addr, tx, handle) = start(sink.clone(), Duration::from_secs(3600), Some(raw_log)).await;

        send(addr, &[0u8; 14]).await;
        send(addr, &long_frame(&[(Field::Power, 1)])).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let tables = sink.tables.lock().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 1);

        let journal: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(journal.len(), 1);
        let path = journal[0].as_ref().unwrap().path();
        assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 2);
    }
}
