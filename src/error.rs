use thiserror::Error;

/// Errors are reported per datagram: a failed decode or reassembly terminates processing
///  of that one datagram, and the endpoint remains fully usable afterwards. The send path
///  can only fail with [`ProtocolError::PacketTooLarge`] or a transport error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet is too large: size is {size}, but max is {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("received an empty datagram")]
    EmptyPacket,

    #[error("got {got} byte(s), expected at least {expected} byte(s)")]
    TruncatedHeader { got: usize, expected: usize },

    #[error("fragment flag does not match the framing context")]
    BadFlag,

    #[error("invalid fragment header: id {id}, {total} total fragment(s)")]
    FragmentInvalid { id: u8, total: u16 },

    #[error("packet header inside fragment has seq {packet_seq}, but the fragment header has seq {fragment_seq}")]
    FragmentSeqMismatch { fragment_seq: u16, packet_seq: u16 },

    #[error("fragment {id} was already received")]
    DuplicateFragment { id: u8 },

    #[error("failed to insert seq {seq} into the reassembly buffer")]
    ReassemblyFull { seq: u16 },

    #[error("packet with sequence number {seq} is stale")]
    StaleSequence { seq: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
