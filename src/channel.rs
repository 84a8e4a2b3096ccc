use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use crate::buffers::buffer_pool::BufferPool;
use crate::buffers::sequence_buffer::SequenceBuffer;
use crate::config::ChannelConfig;
use crate::end_point::Endpoint;
use crate::error::ProtocolError;
use crate::packet_dispatcher::PacketDispatcher;
use crate::packet_sink::PacketSink;
use crate::sequence::seq_lte;

/// a packet held in the send window until its ack arrives
#[derive(Default)]
pub struct BufferedPayload {
    pub time: f64,
    pub written: bool,
    pub buf: BytesMut,
}

/// The channel's half of the endpoint dispatcher: the in-flight window keyed by the
///  endpoint's outgoing sequence numbers, the overflow queue for writes that do not fit
///  into the window, and the window's lower edge.
struct FlightWindow {
    window: SequenceBuffer<BufferedPayload>,
    overflow: VecDeque<BytesMut>,
    oldest_unacked: u16,
    now: f64,
    /// how many queued payloads the last window advance made room for
    drainable: u16,
    pool: BufferPool,
}

impl PacketDispatcher for FlightWindow {
    fn on_transmit(&mut self, seq: u16, datagram: &[u8]) {
        let mut copy = self.pool.get_buffer();
        copy.put_slice(datagram);

        if let Some(entry) = self.window.insert(seq) {
            *entry = BufferedPayload {
                time: self.now,
                written: true,
                buf: copy,
            };
        }
        else {
            self.pool.return_buffer(copy);
        }
    }

    fn on_process(&mut self, _seq: u16, _payload: &[u8]) {
        // nothing to do at this layer - reliability only concerns the send direction
    }

    fn on_ack(&mut self, seq: u16) {
        let Some(entry) = self.window.find_mut(seq) else {
            return;
        };

        let buf = mem::take(&mut entry.buf);
        self.pool.return_buffer(buf);
        self.window.remove(seq);

        if seq != self.oldest_unacked {
            return;
        }

        // the window's lower edge was acked: advance it to the next in-flight packet,
        //  or all the way to the upper edge if nothing is in flight
        let previous = self.oldest_unacked;
        let max = previous.wrapping_add(self.window.capacity());

        let mut next = previous.wrapping_add(1);
        let mut advanced = false;
        while seq_lte(next, max) {
            if self.window.find(next).is_some() {
                self.oldest_unacked = next;
                advanced = true;
                break;
            }
            next = next.wrapping_add(1);
        }
        if !advanced {
            self.oldest_unacked = max;
        }

        self.drainable = self.drainable.wrapping_add(self.oldest_unacked.wrapping_sub(previous));
        trace!("window advanced from {} to {}", previous, self.oldest_unacked);
    }
}

/// A reliability layer on top of an [`Endpoint`]: sent payloads are kept in a sliding
///  window and retransmitted on a fixed timeout until the peer acknowledges them. Writes
///  that do not fit into the window are queued and drained as acks make room.
///
/// Retransmissions bypass the endpoint and re-send the originally transmitted bytes, so a
///  retransmitted packet carries the same sequence number (and the same piggybacked ack
///  state) as the original.
pub struct Channel {
    endpoint: Endpoint,
    flight: FlightWindow,
    sink: Arc<dyn PacketSink>,
    retransmit_interval: f64,
    window_size: u16,
}

impl Channel {
    pub fn new(sink: Arc<dyn PacketSink>, config: ChannelConfig) -> anyhow::Result<Channel> {
        config.validate()?;

        let window_size = config.endpoint.recv_packet_buffer_size;
        let pool_size = config.endpoint.buffer_pool_size;
        let endpoint = Endpoint::new(sink.clone(), config.endpoint)?;

        Ok(Channel {
            endpoint,
            flight: FlightWindow {
                window: SequenceBuffer::new(window_size),
                overflow: VecDeque::new(),
                oldest_unacked: 0,
                now: 0.0,
                drainable: 0,
                pool: BufferPool::new(pool_size),
            },
            sink,
            retransmit_interval: config.retransmit_interval,
            window_size,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Non-blocking write: the payload is sent right away if the window has room, and
    ///  queued otherwise.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if self.flight.oldest_unacked.wrapping_add(self.window_size) == self.endpoint.next_seq() {
            debug!("send window is full: queueing payload of {} byte(s)", payload.len());

            let mut copy = self.flight.pool.get_buffer();
            copy.put_slice(payload);
            self.flight.overflow.push_back(copy);
            return Ok(());
        }

        self.endpoint.send_packet(payload, &mut self.flight).await?;
        Ok(())
    }

    /// Feeds one inbound datagram through the endpoint. Acks processed here free window
    ///  slots, and any room they make is used immediately to drain queued payloads.
    pub async fn read(&mut self, datagram: &[u8]) -> Result<(), ProtocolError> {
        let result = self.endpoint.recv_packet(datagram, &mut self.flight);
        self.drain_overflow().await?;
        result
    }

    /// Time-driven work: refreshes the endpoint statistics, then retransmits every window
    ///  entry whose ack is overdue. Timestamps are not refreshed, so an overdue packet is
    ///  re-sent on every update until its ack arrives.
    pub async fn update(&mut self, now: f64) -> Result<(), ProtocolError> {
        self.flight.now = now;
        self.endpoint.update(now);

        let max = self.flight.oldest_unacked.wrapping_add(self.window_size);
        let mut seq = self.flight.oldest_unacked;

        while seq_lte(seq, max) {
            if let Some(entry) = self.flight.window.find(seq) {
                if entry.written && now - entry.time >= self.retransmit_interval {
                    trace!("retransmitting packet {}", seq);
                    self.sink.transmit(&entry.buf).await?;
                }
            }
            seq = seq.wrapping_add(1);
        }

        Ok(())
    }

    async fn drain_overflow(&mut self) -> Result<(), ProtocolError> {
        // unused credit is discarded: draining happens only as a direct consequence of
        //  the acks that were just processed
        let mut credit = mem::take(&mut self.flight.drainable);

        while credit > 0 {
            let Some(buf) = self.flight.overflow.pop_front() else {
                break;
            };
            credit -= 1;

            trace!("draining queued payload into the send window");
            let result = self.endpoint.send_packet(&buf, &mut self.flight).await;
            self.flight.pool.return_buffer(buf);
            result?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_header::PacketHeader;
    use crate::packet_sink::MockPacketSink;
    use std::sync::Mutex;
    use tokio::runtime::Builder;

    #[derive(Default)]
    struct WireTap {
        datagrams: Mutex<Vec<Vec<u8>>>,
    }

    impl WireTap {
        fn take(&self) -> Vec<Vec<u8>> {
            mem::take(&mut *self.datagrams.lock().unwrap())
        }
    }

    #[async_trait::async_trait]
    impl PacketSink for WireTap {
        async fn transmit(&self, packet: &[u8]) -> std::io::Result<usize> {
            self.datagrams.lock().unwrap().push(packet.to_vec());
            Ok(packet.len())
        }
    }

    fn rt() -> tokio::runtime::Runtime {
        Builder::new_current_thread().enable_all().build().unwrap()
    }

    /// a datagram from the peer that acknowledges exactly `ack`
    fn ack_datagram(peer_seq: u16, ack: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        PacketHeader { seq: peer_seq, ack, acks: 1 }.ser(&mut buf);
        buf
    }

    #[test]
    fn test_window_overflow_and_drain() {
        rt().block_on(async {
            let wire = Arc::new(WireTap::default());
            let mut channel = Channel::new(wire.clone(), ChannelConfig::default()).unwrap();

            // the window holds 256 packets; the 257th write is the first to be queued
            for _ in 0..256 {
                channel.write(&[]).await.unwrap();
                assert!(channel.flight.overflow.is_empty());
            }
            channel.write(&[]).await.unwrap();

            assert_eq!(channel.flight.overflow.len(), 1);
            assert_eq!(channel.flight.window.latest(), 256);
            assert_eq!(wire.take().len(), 256);

            // ack everything except sequence number 0: the window edge must not move
            let mut peer_seq = 0;
            for ack in (1..=255u16).rev() {
                channel.read(&ack_datagram(peer_seq, ack)).await.unwrap();
                peer_seq += 1;
            }

            assert_eq!(channel.flight.oldest_unacked, 0);
            assert!(channel.flight.window.find(256).is_none());
            assert_eq!(channel.flight.overflow.len(), 1);

            // acking 0 slides the window all the way and makes room for the queued write
            channel.read(&ack_datagram(peer_seq, 0)).await.unwrap();

            assert_eq!(channel.flight.oldest_unacked, 256);
            assert!(channel.flight.window.find(256).is_some());
            assert!(channel.flight.overflow.is_empty());
            assert_eq!(channel.flight.window.latest(), 257);
            assert_eq!(wire.take().len(), 1);
        });
    }

    #[test]
    fn test_queued_write_does_not_touch_the_transport() {
        rt().block_on(async {
            let mut sink = MockPacketSink::new();
            sink.expect_transmit()
                .times(256)
                .returning(|packet| Ok(packet.len()));

            let mut channel = Channel::new(Arc::new(sink), ChannelConfig::default()).unwrap();

            for _ in 0..257 {
                channel.write(&[]).await.unwrap();
            }

            assert_eq!(channel.flight.overflow.len(), 1);
        });
    }

    #[test]
    fn test_retransmission_cadence() {
        rt().block_on(async {
            let wire = Arc::new(WireTap::default());
            let mut channel = Channel::new(wire.clone(), ChannelConfig::default()).unwrap();

            channel.write(b"payload").await.unwrap();
            let original = wire.take();
            assert_eq!(original.len(), 1);

            channel.update(0.05).await.unwrap();
            assert!(wire.take().is_empty());

            channel.update(0.1).await.unwrap();
            assert_eq!(wire.take(), original);

            // the timestamp is not refreshed: still overdue, so it goes out again
            channel.update(0.2).await.unwrap();
            assert_eq!(wire.take(), original);

            // once acked, retransmissions stop
            channel.read(&ack_datagram(0, 0)).await.unwrap();
            channel.update(0.3).await.unwrap();
            assert!(wire.take().is_empty());
        });
    }

    #[test]
    fn test_window_snapshot_matches_transmitted_bytes() {
        rt().block_on(async {
            let wire = Arc::new(WireTap::default());
            let mut channel = Channel::new(wire.clone(), ChannelConfig::default()).unwrap();

            channel.write(b"first").await.unwrap();
            channel.write(b"second").await.unwrap();

            let datagrams = wire.take();
            assert_eq!(channel.endpoint.next_seq(), 2);
            assert_eq!(&channel.flight.window.find(0).unwrap().buf[..], &datagrams[0][..]);
            assert_eq!(&channel.flight.window.find(1).unwrap().buf[..], &datagrams[1][..]);
            assert!(channel.flight.window.find(0).unwrap().written);
        });
    }

    #[test]
    fn test_ack_frees_window_slot() {
        rt().block_on(async {
            let wire = Arc::new(WireTap::default());
            let mut channel = Channel::new(wire.clone(), ChannelConfig::default()).unwrap();

            channel.write(b"a").await.unwrap();
            channel.write(b"b").await.unwrap();
            wire.take();

            // acking the window edge advances it to the next in-flight packet
            channel.read(&ack_datagram(0, 0)).await.unwrap();

            assert!(channel.flight.window.find(0).is_none());
            assert!(channel.flight.window.find(1).is_some());
            assert_eq!(channel.flight.oldest_unacked, 1);

            // an ack for a sequence number that is not in flight is ignored
            channel.read(&ack_datagram(1, 100)).await.unwrap();
            assert_eq!(channel.flight.oldest_unacked, 1);
        });
    }
}
