use std::cmp::min;
use std::mem;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use crate::buffers::buffer_pool::BufferPool;
use crate::buffers::sequence_buffer::SequenceBuffer;
use crate::config::EndpointConfig;
use crate::error::ProtocolError;
use crate::packet_dispatcher::PacketDispatcher;
use crate::packet_header::{FragmentHeader, HeaderFlags, PacketHeader, FRAGMENT_HEADER_SIZE, MAX_PACKET_HEADER_SIZE};
use crate::packet_sink::PacketSink;

/// bookkeeping for a packet this endpoint sent and may still see an ack for
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SentMeta {
    pub time: f64,
    pub acked: bool,
    /// bytes on the wire including nominal header overhead
    pub size: u32,
}

/// bookkeeping for a packet this endpoint received
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RecvMeta {
    pub time: f64,
    pub size: u32,
}

/// A packet in reassembly. The scratch buffer is laid out as
///  `[reserved header region][fragment 0 body][fragment 1 body]...` so that once the last
///  fragment arrives, `[packet header ‖ packet body]` can be handed to the compact receive
///  path as one contiguous slice.
pub struct Fragment {
    received: u16,
    total: u16,
    buf: BytesMut,
    header_size: usize,
    packet_size: usize,
    marked: [u64; 4],
}

impl Default for Fragment {
    fn default() -> Fragment {
        Fragment {
            received: 0,
            total: 0,
            buf: BytesMut::new(),
            header_size: 0,
            packet_size: 0,
            marked: [0; 4],
        }
    }
}

impl Fragment {
    pub(crate) fn mark_received(&mut self, id: u8) -> Result<(), ProtocolError> {
        let (word, bit) = (id as usize / 64, id as usize % 64);
        if self.marked[word] & (1 << bit) != 0 {
            return Err(ProtocolError::DuplicateFragment { id });
        }
        self.marked[word] |= 1 << bit;
        Ok(())
    }
}

/// The endpoint is where the protocol comes together: it stamps outgoing payloads with a
///  sequence number and the current acknowledgement state, fragments and reassembles
///  oversized payloads, matches incoming acks against sent packets, and derives round-trip
///  time, packet loss and bandwidth estimates from the two packet histories.
///
/// All state mutation runs on a single task; time is supplied by the caller through
///  [`Endpoint::update`], the endpoint never reads a clock.
pub struct Endpoint {
    config: EndpointConfig,
    sink: Arc<dyn PacketSink>,

    seq: u16,
    time: f64,
    rtt: f64,
    packet_loss: f64,
    sent_bandwidth_kbps: f64,
    recv_bandwidth_kbps: f64,
    acked_bandwidth_kbps: f64,

    sent: SequenceBuffer<SentMeta>,
    recv: SequenceBuffer<RecvMeta>,
    assembler: SequenceBuffer<Fragment>,

    pool: BufferPool,
}

impl Endpoint {
    pub fn new(sink: Arc<dyn PacketSink>, config: EndpointConfig) -> anyhow::Result<Endpoint> {
        config.validate()?;

        let sent = SequenceBuffer::new(config.sent_packet_buffer_size);
        let recv = SequenceBuffer::new(config.recv_packet_buffer_size);
        let assembler = SequenceBuffer::new(config.fragment_reassembly_buffer_size);
        let pool = BufferPool::new(config.buffer_pool_size);

        Ok(Endpoint {
            config,
            sink,
            seq: 0,
            time: 0.0,
            rtt: 0.0,
            packet_loss: 0.0,
            sent_bandwidth_kbps: 0.0,
            recv_bandwidth_kbps: 0.0,
            acked_bandwidth_kbps: 0.0,
            sent,
            recv,
            assembler,
            pool,
        })
    }

    /// the sequence number the next sent packet will carry
    pub fn next_seq(&self) -> u16 {
        self.seq
    }

    /// smoothed round-trip time in milliseconds
    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    /// smoothed packet loss in percent
    pub fn packet_loss(&self) -> f64 {
        self.packet_loss
    }

    /// smoothed (sent, received, acked) bandwidth in kbps
    pub fn bandwidth(&self) -> (f64, f64, f64) {
        (self.sent_bandwidth_kbps, self.recv_bandwidth_kbps, self.acked_bandwidth_kbps)
    }

    /// Stamps `payload` with the next sequence number and the current acknowledgement
    ///  state and hands it to the transport - as a single datagram, or as a train of
    ///  fragments if it is bigger than `fragment_above`. Returns the number of bytes
    ///  written to the transport.
    pub async fn send_packet(&mut self, payload: &[u8], dispatcher: &mut dyn PacketDispatcher) -> Result<usize, ProtocolError> {
        let size = payload.len();
        if size > self.config.max_packet_size {
            return Err(ProtocolError::PacketTooLarge { size, max: self.config.max_packet_size });
        }

        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let meta = self.sent.insert(seq)
            .expect("freshly allocated sequence numbers are never stale");
        *meta = SentMeta {
            time: self.time,
            acked: false,
            size: (self.config.packet_header_size + size) as u32,
        };

        let (ack, acks) = self.recv.next_ack();
        let header = PacketHeader { seq, ack, acks };

        trace!("sending packet {} ({} byte(s), ack {} / {:08x})", seq, size, ack, acks);

        let mut scratch = self.pool.get_buffer();

        if size <= self.config.fragment_above {
            header.ser(&mut scratch);
            scratch.put_slice(payload);

            let written = self.sink.transmit(&scratch).await;
            if written.is_ok() {
                dispatcher.on_transmit(seq, &scratch);
            }
            self.pool.return_buffer(scratch);
            return Ok(written?);
        }

        let total = size.div_ceil(self.config.fragment_size);
        let fragment_header = FragmentHeader {
            seq,
            id: 0,
            total: (total - 1) as u8,
        };

        trace!("splitting packet {} into {} fragment(s)", seq, total);

        let mut remaining = payload;
        let mut written = 0;

        for id in 0..total {
            scratch.clear();

            FragmentHeader { id: id as u8, ..fragment_header }.ser(&mut scratch);
            if id == 0 {
                header.ser(&mut scratch);
            }

            let cutoff = min(remaining.len(), self.config.fragment_size);
            scratch.put_slice(&remaining[..cutoff]);
            remaining = &remaining[cutoff..];

            match self.sink.transmit(&scratch).await {
                Ok(n) => {
                    dispatcher.on_transmit(seq, &scratch);
                    written += n;
                }
                Err(e) => {
                    self.pool.return_buffer(scratch);
                    return Err(e.into());
                }
            }
        }

        self.pool.return_buffer(scratch);
        Ok(written)
    }

    /// Processes one inbound datagram: a fragment goes to reassembly, everything else is
    ///  a complete packet. Errors terminate processing of this datagram only; the endpoint
    ///  stays usable.
    pub fn recv_packet(&mut self, datagram: &[u8], dispatcher: &mut dyn PacketDispatcher) -> Result<(), ProtocolError> {
        if datagram.is_empty() {
            return Err(ProtocolError::EmptyPacket);
        }

        if HeaderFlags::from_bits_truncate(datagram[0]).contains(HeaderFlags::FRAGMENT) {
            self.recv_fragmented(datagram, dispatcher)
        }
        else {
            self.recv_compact(datagram, dispatcher)
        }
    }

    fn recv_compact(&mut self, datagram: &[u8], dispatcher: &mut dyn PacketDispatcher) -> Result<(), ProtocolError> {
        let mut buf = datagram;
        let header = PacketHeader::deser(&mut buf)?;

        if self.recv.insert(header.seq).is_none() {
            debug!("dropping stale packet {}", header.seq);
            return Err(ProtocolError::StaleSequence { seq: header.seq });
        }

        // deliver before recording receive metadata, so a rejected delivery leaves no trace
        dispatcher.on_process(header.seq, buf);

        let meta = self.recv.find_mut(header.seq)
            .expect("the sequence number was inserted just above");
        *meta = RecvMeta {
            time: self.time,
            size: (self.config.packet_header_size + buf.len()) as u32,
        };

        self.process_acks(header.ack, header.acks, dispatcher);
        Ok(())
    }

    fn recv_fragmented(&mut self, datagram: &[u8], dispatcher: &mut dyn PacketDispatcher) -> Result<(), ProtocolError> {
        let mut buf = datagram;
        let fragment_header = FragmentHeader::deser(&mut buf)?;
        fragment_header.validate(self.config.max_fragments)?;

        // fragment 0 carries the packet header of the reassembled packet; keep its bytes
        //  for splicing into the scratch buffer
        let mut header_bytes: &[u8] = &[];
        if fragment_header.id == 0 {
            let before = buf.len();
            let packet_header = PacketHeader::deser(&mut buf)?;
            if packet_header.seq != fragment_header.seq {
                return Err(ProtocolError::FragmentSeqMismatch {
                    fragment_seq: fragment_header.seq,
                    packet_seq: packet_header.seq,
                });
            }
            header_bytes = &datagram[FRAGMENT_HEADER_SIZE..FRAGMENT_HEADER_SIZE + before - buf.len()];
        }

        if buf.len() > self.config.fragment_size {
            return Err(ProtocolError::FragmentInvalid {
                id: fragment_header.id,
                total: fragment_header.total as u16 + 1,
            });
        }

        if self.assembler.find(fragment_header.seq).is_none() {
            let total = fragment_header.total as u16 + 1;

            let mut scratch = self.pool.get_buffer();
            scratch.resize(MAX_PACKET_HEADER_SIZE + total as usize * self.config.fragment_size, 0);

            match self.assembler.insert(fragment_header.seq) {
                Some(entry) => {
                    *entry = Fragment {
                        received: 0,
                        total,
                        buf: scratch,
                        header_size: 0,
                        packet_size: 0,
                        marked: [0; 4],
                    };
                }
                None => {
                    self.pool.return_buffer(scratch);
                    return Err(ProtocolError::ReassemblyFull { seq: fragment_header.seq });
                }
            }
        }

        let entry = self.assembler.find_mut(fragment_header.seq)
            .expect("the reassembly entry was found or inserted just above");

        // all fragments of one packet must agree on the fragment count
        if fragment_header.total as u16 + 1 != entry.total {
            return Err(ProtocolError::FragmentInvalid {
                id: fragment_header.id,
                total: fragment_header.total as u16 + 1,
            });
        }

        entry.mark_received(fragment_header.id)?;

        if fragment_header.id == 0 {
            entry.header_size = header_bytes.len();
            entry.buf[MAX_PACKET_HEADER_SIZE - header_bytes.len()..MAX_PACKET_HEADER_SIZE]
                .copy_from_slice(header_bytes);
        }

        // only the last fragment may be short, so it alone determines the packet size
        if fragment_header.id == fragment_header.total {
            entry.packet_size = fragment_header.total as usize * self.config.fragment_size + buf.len();
        }

        let offset = MAX_PACKET_HEADER_SIZE + fragment_header.id as usize * self.config.fragment_size;
        entry.buf[offset..offset + buf.len()].copy_from_slice(buf);

        entry.received += 1;

        trace!("fragment {}/{} of packet {} received", fragment_header.id, entry.total, fragment_header.seq);

        if entry.received == entry.total {
            let scratch = mem::take(&mut entry.buf);
            let (header_size, packet_size) = (entry.header_size, entry.packet_size);
            self.assembler.remove(fragment_header.seq);

            let assembled = &scratch[MAX_PACKET_HEADER_SIZE - header_size..MAX_PACKET_HEADER_SIZE + packet_size];
            let result = self.recv_compact(assembled, dispatcher);

            self.pool.return_buffer(scratch);
            return result;
        }

        Ok(())
    }

    fn process_acks(&mut self, ack: u16, mut bitset: u32, dispatcher: &mut dyn PacketDispatcher) {
        for k in 0..32u16 {
            if bitset & 1 != 0 {
                let seq = ack.wrapping_sub(k);

                let sample = match self.sent.find_mut(seq) {
                    Some(meta) if !meta.acked => {
                        meta.acked = true;
                        (self.time - meta.time) * 1000.0
                    }
                    _ => {
                        bitset >>= 1;
                        continue;
                    }
                };

                trace!("packet {} acked, rtt sample {:.3} ms", seq, sample);
                dispatcher.on_ack(seq);

                if (self.rtt == 0.0 && sample > 0.0) || (self.rtt - sample).abs() < 0.000_01 {
                    self.rtt = sample;
                }
                else {
                    self.rtt += (sample - self.rtt) * self.config.rtt_smoothing_factor;
                }
            }
            bitset >>= 1;
        }
    }

    /// Advances the endpoint's notion of time and refreshes the packet loss and bandwidth
    ///  estimates from the most recent half of the sent and received packet histories.
    pub fn update(&mut self, now: f64) {
        self.time = now;
        self.update_statistics();
    }

    fn update_statistics(&mut self) {
        let sent_samples = self.config.sent_packet_buffer_size / 2;
        let sent_base = self.sent.latest().wrapping_sub(sent_samples);
        let recv_samples = self.config.recv_packet_buffer_size / 2;
        let recv_base = self.recv.latest().wrapping_sub(recv_samples);

        let mut dropped = 0usize;
        let (mut written, mut start_writing, mut finish_writing) = (0u64, f64::MAX, 0.0f64);
        let (mut acked, mut start_acking, mut finish_acking) = (0u64, f64::MAX, 0.0f64);
        let (mut received, mut start_receiving, mut finish_receiving) = (0u64, f64::MAX, 0.0f64);

        for i in 0..sent_samples {
            let Some(entry) = self.sent.find(sent_base.wrapping_add(i)) else {
                continue;
            };

            if !entry.acked {
                dropped += 1;
            }
            else {
                acked += entry.size as u64;
                start_acking = start_acking.min(entry.time);
                finish_acking = finish_acking.max(entry.time);
            }

            written += entry.size as u64;
            start_writing = start_writing.min(entry.time);
            finish_writing = finish_writing.max(entry.time);
        }

        for i in 0..recv_samples {
            let Some(entry) = self.recv.find(recv_base.wrapping_add(i)) else {
                continue;
            };

            received += entry.size as u64;
            start_receiving = start_receiving.min(entry.time);
            finish_receiving = finish_receiving.max(entry.time);
        }

        if sent_samples > 0 {
            let loss = dropped as f64 / sent_samples as f64 * 100.0;
            self.packet_loss = Self::smooth(self.packet_loss, loss, self.config.packet_loss_smoothing_factor);
        }

        if start_writing != f64::MAX && finish_writing != 0.0 {
            let kbps = written as f64 / (finish_writing - start_writing) * 8.0 / 1000.0;
            self.sent_bandwidth_kbps = Self::smooth(self.sent_bandwidth_kbps, kbps, self.config.bandwidth_smoothing_factor);
        }

        if start_receiving != f64::MAX && finish_receiving != 0.0 {
            let kbps = received as f64 / (finish_receiving - start_receiving) * 8.0 / 1000.0;
            self.recv_bandwidth_kbps = Self::smooth(self.recv_bandwidth_kbps, kbps, self.config.bandwidth_smoothing_factor);
        }

        if start_acking != f64::MAX && finish_acking != 0.0 {
            let kbps = acked as f64 / (finish_acking - start_acking) * 8.0 / 1000.0;
            self.acked_bandwidth_kbps = Self::smooth(self.acked_bandwidth_kbps, kbps, self.config.bandwidth_smoothing_factor);
        }
    }

    fn smooth(current: f64, sample: f64, factor: f64) -> f64 {
        if (current - sample).abs() > 0.000_01 {
            current + (sample - current) * factor
        }
        else {
            sample
        }
    }

    #[cfg(test)]
    pub(crate) fn sent(&self) -> &SequenceBuffer<SentMeta> {
        &self.sent
    }

    #[cfg(test)]
    pub(crate) fn recv(&self) -> &SequenceBuffer<RecvMeta> {
        &self.recv
    }

    #[cfg(test)]
    pub(crate) fn assembler(&self) -> &SequenceBuffer<Fragment> {
        &self.assembler
    }
}
