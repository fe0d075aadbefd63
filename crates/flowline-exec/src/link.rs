//! In-process link between two neighboring nodes.
//!
//! Elements travel downstream as `Flow`; credit travels upstream as plain
//! `u64` demand messages. Both channels are unbounded: the credit protocol,
//! not the channel, bounds what is in flight.

use tokio::sync::mpsc;

use flowline_core::element::Payload;

#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Push(Payload),
    /// Upstream finished; nothing follows.
    End,
}

/// Downstream end: receives elements, grants credit.
#[derive(Debug)]
pub struct Inlet {
    pub(crate) flow_rx: mpsc::UnboundedReceiver<Flow>,
    pub(crate) demand_tx: mpsc::UnboundedSender<u64>,
}

/// Upstream end: sends elements, receives credit.
#[derive(Debug)]
pub struct Outlet {
    pub(crate) flow_tx: mpsc::UnboundedSender<Flow>,
    pub(crate) demand_rx: mpsc::UnboundedReceiver<u64>,
}

pub fn link() -> (Outlet, Inlet) {
    let (flow_tx, flow_rx) = mpsc::unbounded_channel();
    let (demand_tx, demand_rx) = mpsc::unbounded_channel();
    (
        Outlet { flow_tx, demand_rx },
        Inlet { flow_rx, demand_tx },
    )
}

impl Inlet {
    pub fn demand(&self, n: u64) -> bool {
        self.demand_tx.send(n).is_ok()
    }

    pub async fn recv(&mut self) -> Option<Flow> {
        self.flow_rx.recv().await
    }
}

impl Outlet {
    pub fn push(&self, flow: Flow) -> bool {
        self.flow_tx.send(flow).is_ok()
    }

    pub async fn credit(&mut self) -> Option<u64> {
        self.demand_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::element::Chunk;

    #[tokio::test]
    async fn test_flow_and_demand_travel_opposite_ways() {
        let (mut outlet, mut inlet) = link();
        assert!(inlet.demand(3));
        assert_eq!(outlet.credit().await, Some(3));
        assert!(outlet.push(Flow::Push(Payload::Bytes(Chunk::new(vec![1, 2, 3])))));
        assert!(outlet.push(Flow::End));
        assert!(matches!(inlet.recv().await, Some(Flow::Push(_))));
        assert_eq!(inlet.recv().await, Some(Flow::End));
        drop(outlet);
        assert_eq!(inlet.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropping_inlet_closes_credit() {
        let (mut outlet, inlet) = link();
        drop(inlet);
        assert_eq!(outlet.credit().await, None);
        assert!(!outlet.push(Flow::End));
    }
}
