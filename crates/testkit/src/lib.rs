use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use traceline_core::context::SegmentSink;
use traceline_core::model::SegmentSnapshot;
use traceline_emit::wire::{self, WireEntity};

/// In-process sink that records every submitted segment snapshot.
#[derive(Default, Clone)]
pub struct CollectingSink {
    inner: Arc<Mutex<Vec<SegmentSnapshot>>>,
}

impl CollectingSink {
    pub fn segments(&self) -> Vec<SegmentSnapshot> {
        self.inner.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SegmentSink for CollectingSink {
    fn submit(&self, segment: SegmentSnapshot) {
        self.inner.lock().unwrap().push(segment);
    }
}

/// Fake collector daemon: receives segment datagrams over UDP and queues
/// the decoded documents.
pub struct FakeDaemon {
    pub addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<WireEntity>,
}

impl FakeDaemon {
    pub async fn spawn() -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .context("bind fake daemon UDP socket")?;
        let addr = socket.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 128 * 1024];
            loop {
                let Ok((n, _)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                if let Ok(doc) = wire::decode_datagram(&buf[..n]) {
                    if tx.send(doc).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self { addr, rx })
    }

    pub async fn recv_document(&mut self, timeout: Duration) -> anyhow::Result<WireEntity> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .context("timed out waiting for segment document")?
            .context("fake daemon receiver closed")
    }
}
