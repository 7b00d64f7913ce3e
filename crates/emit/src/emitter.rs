use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::warn;

use traceline_core::context::SegmentSink;
use traceline_core::model::SegmentSnapshot;

use crate::wire;

/// Fire-and-forget UDP emitter toward the local collector daemon. `submit`
/// never blocks or fails request handling; a full channel or unreachable
/// daemon only produces a warning.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<SegmentSnapshot>,
}

pub struct EmitterConfig {
    pub daemon_addr: String,
    pub channel_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            daemon_addr: "127.0.0.1:2000".to_string(),
            channel_capacity: 256,
        }
    }
}

impl Emitter {
    /// Spawns the background sender task on the current tokio runtime.
    pub fn spawn(cfg: EmitterConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        tokio::spawn(run_sender(cfg.daemon_addr, rx));
        Self { tx }
    }
}

impl SegmentSink for Emitter {
    fn submit(&self, segment: SegmentSnapshot) {
        if self.tx.try_send(segment).is_err() {
            warn!("emitter dropped segment: channel full or sender task gone");
        }
    }
}

async fn run_sender(daemon_addr: String, mut rx: mpsc::Receiver<SegmentSnapshot>) {
    let socket = match UdpSocket::bind("127.0.0.1:0").await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "emitter failed to bind UDP socket, segments will be dropped");
            while rx.recv().await.is_some() {}
            return;
        }
    };

    while let Some(segment) = rx.recv().await {
        let datagram = match wire::encode_datagram(&segment) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(error = %e, trace_id = segment.trace_id.as_str(), "failed to encode segment");
                continue;
            }
        };
        if let Err(e) = socket.send_to(&datagram, &daemon_addr).await {
            warn!(error = %e, daemon = %daemon_addr, "failed to send segment datagram");
        }
    }
}
