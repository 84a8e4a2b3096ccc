use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// biggest possible serialized packet header: flags + seq + 2-byte ack + 4 bitset bytes
pub const MAX_PACKET_HEADER_SIZE: usize = 9;
pub const FRAGMENT_HEADER_SIZE: usize = 5;

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub(crate) struct HeaderFlags: u8 {
        const FRAGMENT   = 0b0000_0001;
        const ACK_BYTE_A = 0b0000_0010;
        const ACK_BYTE_B = 0b0000_0100;
        const ACK_BYTE_C = 0b0000_1000;
        const ACK_BYTE_D = 0b0001_0000;
        const ACK_DELTA  = 0b0010_0000;
    }
}

impl HeaderFlags {
    const ACK_BYTES: HeaderFlags = HeaderFlags::ACK_BYTE_A
        .union(HeaderFlags::ACK_BYTE_B)
        .union(HeaderFlags::ACK_BYTE_C)
        .union(HeaderFlags::ACK_BYTE_D);
}

/// Header of a regular (non-fragment) packet. The ack bitset is run-length compressed on
///  the wire: a bitset byte that is all-ones ('everything acknowledged') is omitted and
///  marked absent in the flag byte, and the ack sequence number is written as a one-byte
///  delta below `seq` whenever it is close enough.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PacketHeader {
    pub seq: u16,
    /// most recently received sequence number on the sending side
    pub ack: u16,
    /// bit `k` acknowledges sequence number `ack - k`
    pub acks: u32,
}

impl PacketHeader {
    fn flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::empty();
        if self.acks & 0x0000_00ff != 0x0000_00ff {
            flags |= HeaderFlags::ACK_BYTE_A;
        }
        if self.acks & 0x0000_ff00 != 0x0000_ff00 {
            flags |= HeaderFlags::ACK_BYTE_B;
        }
        if self.acks & 0x00ff_0000 != 0x00ff_0000 {
            flags |= HeaderFlags::ACK_BYTE_C;
        }
        if self.acks & 0xff00_0000 != 0xff00_0000 {
            flags |= HeaderFlags::ACK_BYTE_D;
        }
        if self.ack_delta() <= 255 {
            flags |= HeaderFlags::ACK_DELTA;
        }
        flags
    }

    fn ack_delta(&self) -> u16 {
        self.seq.wrapping_sub(self.ack)
    }

    pub fn serialized_len(&self) -> usize {
        let flags = self.flags();
        let ack_len = if flags.contains(HeaderFlags::ACK_DELTA) { 1 } else { 2 };
        3 + ack_len + (flags & HeaderFlags::ACK_BYTES).bits().count_ones() as usize
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let flags = self.flags();

        buf.put_u8(flags.bits());
        buf.put_u16(self.seq);

        if flags.contains(HeaderFlags::ACK_DELTA) {
            buf.put_u8(self.ack_delta() as u8);
        }
        else {
            buf.put_u16(self.ack);
        }

        if flags.contains(HeaderFlags::ACK_BYTE_A) {
            buf.put_u8(self.acks as u8);
        }
        if flags.contains(HeaderFlags::ACK_BYTE_B) {
            buf.put_u8((self.acks >> 8) as u8);
        }
        if flags.contains(HeaderFlags::ACK_BYTE_C) {
            buf.put_u8((self.acks >> 16) as u8);
        }
        if flags.contains(HeaderFlags::ACK_BYTE_D) {
            buf.put_u8((self.acks >> 24) as u8);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> Result<PacketHeader, ProtocolError> {
        if buf.remaining() < 3 {
            return Err(ProtocolError::TruncatedHeader { got: buf.remaining(), expected: 3 });
        }

        let flags = HeaderFlags::from_bits_truncate(buf.get_u8());
        if flags.contains(HeaderFlags::FRAGMENT) {
            return Err(ProtocolError::BadFlag);
        }

        let seq = buf.get_u16();

        let ack = if flags.contains(HeaderFlags::ACK_DELTA) {
            if buf.remaining() < 1 {
                return Err(ProtocolError::TruncatedHeader { got: 0, expected: 1 });
            }
            seq.wrapping_sub(buf.get_u8() as u16)
        }
        else {
            if buf.remaining() < 2 {
                return Err(ProtocolError::TruncatedHeader { got: buf.remaining(), expected: 2 });
            }
            buf.get_u16()
        };

        let num_ack_bytes = (flags & HeaderFlags::ACK_BYTES).bits().count_ones() as usize;
        if buf.remaining() < num_ack_bytes {
            return Err(ProtocolError::TruncatedHeader { got: buf.remaining(), expected: num_ack_bytes });
        }

        // absent bytes mean 'everything acknowledged'
        let mut acks = 0xffff_ffffu32;

        if flags.contains(HeaderFlags::ACK_BYTE_A) {
            acks = (acks & 0xffff_ff00) | buf.get_u8() as u32;
        }
        if flags.contains(HeaderFlags::ACK_BYTE_B) {
            acks = (acks & 0xffff_00ff) | ((buf.get_u8() as u32) << 8);
        }
        if flags.contains(HeaderFlags::ACK_BYTE_C) {
            acks = (acks & 0xff00_ffff) | ((buf.get_u8() as u32) << 16);
        }
        if flags.contains(HeaderFlags::ACK_BYTE_D) {
            acks = (acks & 0x00ff_ffff) | ((buf.get_u8() as u32) << 24);
        }

        Ok(PacketHeader { seq, ack, acks })
    }
}

/// Header of one fragment of an oversized packet, exactly five bytes on the wire.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FragmentHeader {
    /// sequence number of the packet this fragment belongs to
    pub seq: u16,
    pub id: u8,
    /// number of fragments the packet was split into, minus one
    pub total: u8,
}

impl FragmentHeader {
    pub fn validate(&self, max_fragments: usize) -> Result<(), ProtocolError> {
        if self.id > self.total {
            return Err(ProtocolError::FragmentInvalid { id: self.id, total: self.total as u16 + 1 });
        }
        if self.total as usize + 1 > max_fragments {
            return Err(ProtocolError::FragmentInvalid { id: self.id, total: self.total as u16 + 1 });
        }
        Ok(())
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(HeaderFlags::FRAGMENT.bits());
        buf.put_u16(self.seq);
        buf.put_u8(self.id);
        buf.put_u8(self.total);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<FragmentHeader, ProtocolError> {
        if buf.remaining() < FRAGMENT_HEADER_SIZE {
            return Err(ProtocolError::TruncatedHeader { got: buf.remaining(), expected: FRAGMENT_HEADER_SIZE });
        }

        let flags = HeaderFlags::from_bits_truncate(buf.get_u8());
        if !flags.contains(HeaderFlags::FRAGMENT) {
            return Err(ProtocolError::BadFlag);
        }

        let seq = buf.get_u16();
        let id = buf.get_u8();
        let total = buf.get_u8();

        Ok(FragmentHeader { seq, id, total })
    }
}
