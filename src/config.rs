use anyhow::bail;

/// Tuning knobs for an endpoint. The defaults are a reasonable starting point for
///  full-Ethernet-frame UDP; applications with jumbo frames or tight memory budgets
///  should adjust fragment and buffer sizes accordingly.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// payload size above which a packet is split into fragments
    pub fragment_above: usize,

    /// payload bytes per fragment
    pub fragment_size: usize,

    /// upper limit for the number of fragments a single packet may be split into.
    ///
    /// The fragment id is a single byte on the wire, so this can be at most 256.
    pub max_fragments: usize,

    /// hard upper limit for payload size, fragmented or not
    pub max_packet_size: usize,

    /// nominal per-packet header overhead used for bandwidth accounting only - this is
    ///  meant to approximate the full on-wire cost (protocol header plus UDP/IP framing),
    ///  not the exact size of the serialized header
    pub packet_header_size: usize,

    /// number of sent packets tracked for ack matching and statistics
    pub sent_packet_buffer_size: u16,

    /// number of received packets tracked for ack generation and statistics
    pub recv_packet_buffer_size: u16,

    /// number of packets that may be in reassembly at the same time
    pub fragment_reassembly_buffer_size: u16,

    /// number of scratch buffers retained for reuse; buffers beyond this are dropped
    ///  when returned
    pub buffer_pool_size: usize,

    pub rtt_smoothing_factor: f64,
    pub packet_loss_smoothing_factor: f64,
    pub bandwidth_smoothing_factor: f64,
}

impl Default for EndpointConfig {
    fn default() -> EndpointConfig {
        EndpointConfig {
            fragment_above: 1024,
            fragment_size: 1024,
            max_fragments: 16,
            max_packet_size: 16 * 1024,
            packet_header_size: 20,
            sent_packet_buffer_size: 256,
            recv_packet_buffer_size: 256,
            fragment_reassembly_buffer_size: 256,
            buffer_pool_size: 64,
            rtt_smoothing_factor: 0.0025,
            packet_loss_smoothing_factor: 0.1,
            bandwidth_smoothing_factor: 0.1,
        }
    }
}

impl EndpointConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fragment_size == 0 {
            bail!("fragment size must not be zero");
        }
        if self.max_fragments == 0 || self.max_fragments > 256 {
            bail!("max fragments must be in 1..=256, was {}", self.max_fragments);
        }
        if self.max_packet_size > self.max_fragments * self.fragment_size {
            bail!("max packet size {} exceeds what {} fragment(s) of {} byte(s) can carry",
                self.max_packet_size, self.max_fragments, self.fragment_size);
        }
        for (name, size) in [
            ("sent packet buffer", self.sent_packet_buffer_size),
            ("recv packet buffer", self.recv_packet_buffer_size),
            ("fragment reassembly buffer", self.fragment_reassembly_buffer_size),
        ] {
            // sequence buffers distinguish 'outdated' from 'future' by cyclic distance,
            //  which requires the capacity to stay below half the sequence number range
            if size == 0 || size > 32767 {
                bail!("{} size must be in 1..=32767, was {}", name, size);
            }
        }
        for (name, factor) in [
            ("rtt", self.rtt_smoothing_factor),
            ("packet loss", self.packet_loss_smoothing_factor),
            ("bandwidth", self.bandwidth_smoothing_factor),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                bail!("{} smoothing factor must be in (0, 1], was {}", name, factor);
            }
        }
        Ok(())
    }
}

/// Configuration for the reliability channel wrapped around an endpoint.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub endpoint: EndpointConfig,

    /// seconds after which an unacked packet in the send window is retransmitted.
    ///
    /// The timestamp is not refreshed on retransmission, so once a packet crosses the
    ///  threshold it is re-sent on every `update` until its ack arrives.
    pub retransmit_interval: f64,
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig {
            endpoint: EndpointConfig::default(),
            retransmit_interval: 0.1,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.endpoint.validate()?;
        if !(self.retransmit_interval > 0.0) {
            bail!("retransmit interval must be positive, was {}", self.retransmit_interval);
        }
        Ok(())
    }
}
