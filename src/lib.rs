//! A reliable-datagram endpoint: a bidirectional protocol engine layered on top of an
//!  unreliable, unordered, message-oriented transport (typically UDP).
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *packets* (defined-length chunks of data), not
//!   streams of bytes
//! * Every outgoing packet gets a 16-bit wrap-around sequence number, and every outgoing
//!   packet piggybacks acknowledgements for the 32 most recently received sequence numbers
//!   * there is no explicit handshake - peers sync on the packet stream 'on the go'
//!   * there is no ordering guarantee at the endpoint layer: packets are delivered to the
//!     application in arrival order
//! * Payloads bigger than a configured threshold are split into fragments and re-assembled
//!   on the receiving side, so the network never sees IP-level fragmentation
//! * The endpoint continuously measures round-trip time, packet loss and bandwidth
//!   (sent / received / acked) from the acknowledgement stream
//! * An optional [`channel::Channel`] sits on top of an endpoint and turns at-most-once
//!   delivery into at-least-once delivery: it keeps sent packets in a sliding window,
//!   retransmits them on a fixed timeout until they are acked, and queues writes that
//!   do not fit into the window
//! * The core is single-threaded and sans-socket: the transport is a collaborator behind
//!   the [`packet_sink::PacketSink`] trait, time is supplied by the caller, and the only
//!   suspension points are the transport's own I/O calls
//!
//! ## Packet header
//!
//! All multi-byte numbers in network byte order (BE):
//! ```ascii
//! 0:  flags (8 bits):
//!     * bit 0: FRAGMENT - this datagram is a fragment, not a whole packet
//!     * bit 1-4: one per byte of the 32-bit ack bitset; set means the byte is present
//!        on the wire, clear means the byte is implicitly FF ('all acknowledged')
//!     * bit 5: ACK_DELTA - the ack sequence is encoded as a 1-byte delta below seq
//!        instead of a 2-byte absolute value
//! 1:  sequence number (u16)
//! 3:  ack sequence number (u8 delta or u16 absolute, depending on bit 5)
//! *:  0 to 4 ack bitset bytes, ascending significance, present per bits 1-4
//! ```
//!
//! The packet header is 3 to 9 bytes. Bit `k` of the decoded ack bitset acknowledges
//!  sequence number `ack - k`.
//!
//! ## Fragment header
//!
//! ```ascii
//! 0: flags (only FRAGMENT set)
//! 1: sequence number (u16) - shared by all fragments of one packet
//! 3: fragment id (u8)
//! 4: total number of fragments minus one (u8)
//! ```
//!
//! Fragment 0 additionally carries the full packet header right after the fragment
//!  header; all other fragments carry only their slice of the payload.

pub mod buffers;
pub mod channel;
pub mod config;
pub mod end_point;
pub mod error;
pub mod packet_dispatcher;
pub mod packet_header;
pub mod packet_sink;
pub mod sequence;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
