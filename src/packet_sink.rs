use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for handing a finished datagram to the transport, introduced to
///  facilitate mocking the I/O part away for testing. The transport is datagram oriented:
///  each `transmit` call corresponds to exactly one packet on the wire.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketSink: Send + Sync + 'static {
    async fn transmit(&self, packet: &[u8]) -> std::io::Result<usize>;
}

/// The socket must be connected to the peer - the endpoint is strictly point-to-point.
#[async_trait]
impl PacketSink for UdpSocket {
    async fn transmit(&self, packet: &[u8]) -> std::io::Result<usize> {
        trace!("UDP socket: sending datagram of {} byte(s)", packet.len());
        self.send(packet).await
    }
}
