//! Cross-process links.
//!
//! A link between a client node and a server node is carried by a pair of
//! `Duplex` frame streams. Two bridge tasks translate between the nodes'
//! in-process `Flow`/credit channels and frames; payloads are encoded with
//! `serde_json`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use flowline_core::element::Payload;
use flowline_core::error::SystemError;
use flowline_core::id::{LinkId, RunId};

use crate::link::{Flow, Inlet, Outlet};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Unit of the wire protocol. Ordered and reliable; end of stream is
/// explicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Data(Vec<u8>),
    Demand(u64),
    End,
}

/// One end of a frame connection.
#[derive(Debug)]
pub struct Duplex {
    pub tx: mpsc::UnboundedSender<Frame>,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

pub trait Transport: Send + Sync {
    /// Open a connection for `link`; returns the client end and the server end.
    fn open(&self, run_id: RunId, link: LinkId) -> BoxFuture<'_, Result<(Duplex, Duplex), SystemError>>;
}

/// In-memory transport. Counts frames so tests can see traffic crossed it.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    opened: Arc<AtomicU64>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, run_id: RunId, link: LinkId) -> BoxFuture<'_, Result<(Duplex, Duplex), SystemError>> {
        Box::pin(async move {
            let (client_tx, server_rx) = mpsc::unbounded_channel();
            let (server_tx, client_rx) = mpsc::unbounded_channel();
            self.opened.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(%run_id, %link, "opened loopback connection");
            Ok((
                Duplex {
                    tx: client_tx,
                    rx: client_rx,
                },
                Duplex {
                    tx: server_tx,
                    rx: server_rx,
                },
            ))
        })
    }
}

/// Forward an upstream node's output over `duplex`, and the far side's
/// credit back to it.
pub(crate) fn bridge_upstream(
    link: LinkId,
    inlet: Inlet,
    duplex: Duplex,
    mut cancel: watch::Receiver<bool>,
    faults: mpsc::UnboundedSender<SystemError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Inlet {
            mut flow_rx,
            demand_tx,
        } = inlet;
        let Duplex { tx, mut rx } = duplex;
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                flow = flow_rx.recv() => match flow {
                    Some(Flow::Push(payload)) => match serde_json::to_vec(&payload) {
                        Ok(bytes) => {
                            if tx.send(Frame::Data(bytes)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = faults.send(SystemError::ConnectionLost(format!(
                                "{link}: cannot encode payload: {e}"
                            )));
                            break;
                        }
                    },
                    Some(Flow::End) => {
                        let _ = tx.send(Frame::End);
                        break;
                    }
                    // Upstream stopped abnormally; closing tells the far side.
                    None => break,
                },
                frame = rx.recv() => match frame {
                    Some(Frame::Demand(n)) => {
                        if demand_tx.send(n).is_err() {
                            break;
                        }
                    }
                    Some(other) => {
                        tracing::warn!(%link, ?other, "unexpected frame on upstream side");
                    }
                    // Downstream side is gone; so is our reason to produce.
                    None => break,
                },
            }
        }
        tracing::trace!(%link, "upstream bridge closed");
    })
}

/// Deliver frames from `duplex` to a downstream node, and send its credit
/// back over the wire.
pub(crate) fn bridge_downstream(
    link: LinkId,
    outlet: Outlet,
    duplex: Duplex,
    mut cancel: watch::Receiver<bool>,
    faults: mpsc::UnboundedSender<SystemError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Outlet {
            flow_tx,
            mut demand_rx,
        } = outlet;
        let Duplex { tx, mut rx } = duplex;
        let mut demand_open = true;
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                frame = rx.recv() => match frame {
                    Some(Frame::Data(bytes)) => match serde_json::from_slice::<Payload>(&bytes) {
                        Ok(payload) => {
                            if flow_tx.send(Flow::Push(payload)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = faults.send(SystemError::ConnectionLost(format!(
                                "{link}: cannot decode payload: {e}"
                            )));
                            break;
                        }
                    },
                    Some(Frame::End) => {
                        let _ = flow_tx.send(Flow::End);
                        break;
                    }
                    Some(Frame::Demand(_)) => {
                        tracing::warn!(%link, "unexpected demand frame on downstream side");
                    }
                    None => {
                        if !*cancel.borrow() {
                            let _ = faults.send(SystemError::ConnectionLost(format!(
                                "{link} closed before end of stream"
                            )));
                        }
                        break;
                    }
                },
                demand = demand_rx.recv(), if demand_open => match demand {
                    Some(n) => {
                        // A failed send means the far side is closing; its
                        // frames still drain through `rx`.
                        let _ = tx.send(Frame::Demand(n));
                    }
                    None => {
                        // Downstream node is done.
                        demand_open = false;
                        break;
                    }
                },
            }
        }
        tracing::trace!(%link, demand_open, "downstream bridge closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link;
    use flowline_core::element::Chunk;
    use flowline_core::schema::{DataType, Field, Schema};
    use flowline_core::types::{EventBatch, Scalar};

    fn chunk(bytes: &[u8]) -> Payload {
        Payload::Bytes(Chunk::new(bytes.to_vec()))
    }

    #[tokio::test]
    async fn test_bridges_carry_flow_and_credit() {
        let transport = LoopbackTransport::new();
        let (client, server) = transport
            .open(RunId::generate(), LinkId::new(0))
            .await
            .expect("open");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();

        let (mut up_outlet, up_inlet) = link();
        let (down_outlet, mut down_inlet) = link();
        let a = bridge_upstream(LinkId::new(0), up_inlet, client, cancel_rx.clone(), faults_tx.clone());
        let b = bridge_downstream(LinkId::new(0), down_outlet, server, cancel_rx, faults_tx);

        assert!(down_inlet.demand(7));
        assert_eq!(up_outlet.credit().await, Some(7));
        assert!(up_outlet.push(Flow::Push(chunk(b"abc"))));
        assert!(up_outlet.push(Flow::End));
        assert_eq!(down_inlet.recv().await, Some(Flow::Push(chunk(b"abc"))));
        assert_eq!(down_inlet.recv().await, Some(Flow::End));

        a.await.expect("upstream bridge");
        b.await.expect("downstream bridge");
        assert!(faults_rx.try_recv().is_err());
        assert_eq!(transport.connections(), 1);
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn test_lost_connection_is_reported() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();
        let (down_outlet, _down_inlet) = link();
        let (tx, _peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, rx) = mpsc::unbounded_channel::<Frame>();
        drop(peer_tx);
        bridge_downstream(LinkId::new(3), down_outlet, Duplex { tx, rx }, cancel_rx, faults_tx)
            .await
            .expect("bridge");
        assert!(matches!(faults_rx.recv().await, Some(SystemError::ConnectionLost(_))));
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn test_ragged_batch_frame_is_a_decode_fault() {
        let schema = Arc::new(Schema::new(
            "test.pair",
            vec![
                Field::new("id", DataType::Int64, false),
                Field::new("msg", DataType::Utf8, true),
            ],
        ));
        let rows = (0..3)
            .map(|i| vec![Scalar::I64(i), Scalar::Str(format!("m{i}"))])
            .collect();
        let batch = EventBatch::from_rows(schema, rows).expect("rows");
        let mut json = serde_json::to_value(Payload::Events(batch)).expect("serialize");
        json["data"]["columns"][1]["values"] = serde_json::json!([{"Str": "m0"}]);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();
        let (down_outlet, mut down_inlet) = link();
        let (tx, _peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, rx) = mpsc::unbounded_channel::<Frame>();
        peer_tx
            .send(Frame::Data(serde_json::to_vec(&json).expect("encode")))
            .expect("send");
        bridge_downstream(LinkId::new(4), down_outlet, Duplex { tx, rx }, cancel_rx, faults_tx)
            .await
            .expect("bridge");

        match faults_rx.recv().await {
            Some(SystemError::ConnectionLost(message)) => {
                assert!(message.contains("cannot decode payload"), "{message}")
            }
            other => panic!("expected decode fault, got {other:?}"),
        }
        assert_eq!(down_inlet.recv().await, None);
        drop((cancel_tx, peer_tx));
    }
}
