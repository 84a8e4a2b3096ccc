#[cfg(test)] use mockall::automock;

/// Hooks through which the endpoint notifies the layer above it. All callbacks run
///  synchronously on the endpoint's task; the reliability channel is the canonical
///  implementation, but applications driving an endpoint directly can implement this
///  themselves.
#[cfg_attr(test, automock)]
pub trait PacketDispatcher {
    /// called right after a datagram carrying `seq` was committed to the transport -
    ///  for fragmented packets, once per fragment
    fn on_transmit(&mut self, seq: u16, datagram: &[u8]);

    /// called when a packet's payload has been received (and reassembled, if it was
    ///  fragmented) and is ready for consumption
    fn on_process(&mut self, seq: u16, payload: &[u8]);

    /// called exactly once per newly acknowledged sequence number
    fn on_ack(&mut self, seq: u16);
}
