//! Transport Adapter (component K): the minimal in-process contract
//! between the Frame Scheduler and whatever actually owns the socket to
//! the relay server.
//!
//! The TCP connection, reconnection policy, and JSON/byte framing are a
//! host concern (see spec §1's explicit out-of-scope list); this crate
//! only needs an outbound sink and an inbound mailbox it can drain once
//! per frame.

use protocol::{InboundMessage, OutboundMessage};

/// Pull-style adapter: the scheduler calls `send` whenever a component
/// emits an outbound message, and calls `poll_inbound` once per frame to
/// drain whatever arrived since the last tick.
pub trait TransportAdapter {
    fn send(&mut self, message: OutboundMessage);

    /// Drains and returns every inbound message queued since the last
    /// call. Order is preserved; nothing is dropped.
    fn poll_inbound(&mut self) -> Vec<InboundMessage>;
}

/// A reference [`TransportAdapter`] backed by a pair of channels: a host
/// process owns the `Sender<InboundMessage>` half (fed by its actual
/// socket read loop) and the `Receiver<OutboundMessage>` half (drained
/// into its actual socket write loop). Nothing here touches a socket.
pub struct ChannelTransportAdapter {
    outbound_tx: std::sync::mpsc::Sender<OutboundMessage>,
    inbound_rx: std::sync::mpsc::Receiver<InboundMessage>,
}

impl ChannelTransportAdapter {
    pub fn new() -> (Self, std::sync::mpsc::Receiver<OutboundMessage>, std::sync::mpsc::Sender<InboundMessage>) {
        let (outbound_tx, outbound_rx) = std::sync::mpsc::channel();
        let (inbound_tx, inbound_rx) = std::sync::mpsc::channel();
        (ChannelTransportAdapter { outbound_tx, inbound_rx }, outbound_rx, inbound_tx)
    }
}

impl TransportAdapter for ChannelTransportAdapter {
    fn send(&mut self, message: OutboundMessage) {
        // The host's write-loop end may have been dropped (e.g. socket
        // closed); per the error taxonomy this is a transport concern and
        // never propagates into a component tick.
        let _ = self.outbound_tx.send(message);
    }

    fn poll_inbound(&mut self) -> Vec<InboundMessage> {
        self.inbound_rx.try_iter().collect()
    }
}
