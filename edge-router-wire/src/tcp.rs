use core::net::Ipv4Addr;

use log::trace;

use super::bytes::{BytesIn, BytesOut};

use super::{checksum_accumulate, checksum_finish, Error};

bitflags::bitflags! {
    /// TCP control bits (RFC 793), used by the link table to detect flow teardown.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[allow(clippy::type_complexity)]
pub fn decode(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: &[u8],
    filter_src: Option<u16>,
    filter_dst: Option<u16>,
) -> Result<Option<(u16, u16, Flags, &[u8])>, Error> {
    let data = TcpPacketHeader::decode_with_payload(packet, src, dst, filter_src, filter_dst)?
        .map(|(hdr, payload)| (hdr.src, hdr.dst, hdr.flags, payload));

    Ok(data)
}

/// Represents a parsed TCP header. Only the fields the router needs to inspect or rewrite are
/// kept structured; options (if any) are left untouched in the header bytes.
#[derive(Clone, Debug)]
pub struct TcpPacketHeader {
    /// Source port
    pub src: u16,
    /// Destination port
    pub dst: u16,
    pub seq: u32,
    pub ack: u32,
    /// Data offset in 32-bit words (header length including options)
    pub doff: u8,
    pub flags: Flags,
    pub window: u16,
    pub sum: u16,
    pub urgent: u16,
}

impl TcpPacketHeader {
    pub const PROTO: u8 = 6;

    pub const MIN_SIZE: usize = 20;
    pub const CHECKSUM_WORD: usize = 8;

    /// Decodes the header from a byte slice
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut bytes = BytesIn::new(data);

        let src = u16::from_be_bytes(bytes.arr()?);
        let dst = u16::from_be_bytes(bytes.arr()?);
        let seq = u32::from_be_bytes(bytes.arr()?);
        let ack = u32::from_be_bytes(bytes.arr()?);
        let doff_flags_hi = bytes.byte()?;
        let flags_lo = bytes.byte()?;
        let window = u16::from_be_bytes(bytes.arr()?);
        let sum = u16::from_be_bytes(bytes.arr()?);
        let urgent = u16::from_be_bytes(bytes.arr()?);

        Ok(Self {
            src,
            dst,
            seq,
            ack,
            doff: doff_flags_hi >> 4,
            flags: Flags::from_bits_truncate(flags_lo),
            window,
            sum,
            urgent,
        })
    }

    /// Encodes the header into the provided buf slice, preserving the already-computed checksum
    /// and the data offset previously decoded (use `patch_*` to rewrite a decoded packet instead
    /// of re-encoding from scratch when options must be preserved byte-for-byte).
    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut bytes = BytesOut::new(buf);

        bytes
            .push(&u16::to_be_bytes(self.src))?
            .push(&u16::to_be_bytes(self.dst))?
            .push(&u32::to_be_bytes(self.seq))?
            .push(&u32::to_be_bytes(self.ack))?
            .byte(self.doff << 4)?
            .byte(self.flags.bits())?
            .push(&u16::to_be_bytes(self.window))?
            .push(&u16::to_be_bytes(self.sum))?
            .push(&u16::to_be_bytes(self.urgent))?;

        let len = bytes.len();

        Ok(&buf[..len])
    }

    /// Decodes the provided packet into a header and a payload slice, validating the TCP
    /// checksum against the IP pseudo-header.
    pub fn decode_with_payload(
        packet: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        filter_src: Option<u16>,
        filter_dst: Option<u16>,
    ) -> Result<Option<(Self, &[u8])>, Error> {
        if packet.len() < Self::MIN_SIZE {
            Err(Error::DataUnderflow)?;
        }

        let hdr = Self::decode(packet)?;

        if let Some(filter_src) = filter_src {
            if filter_src != hdr.src {
                return Ok(None);
            }
        }

        if let Some(filter_dst) = filter_dst {
            if filter_dst != hdr.dst {
                return Ok(None);
            }
        }

        let hdr_len = hdr.doff as usize * 4;
        if hdr_len < Self::MIN_SIZE || packet.len() < hdr_len {
            Err(Error::InvalidFormat)?;
        }

        let checksum = Self::checksum(packet, src, dst);

        trace!(
            "TCP header decoded, src={}, dst={}, flags={:?}, checksum={}, ours={}",
            hdr.src,
            hdr.dst,
            hdr.flags,
            hdr.sum,
            checksum
        );

        if checksum != hdr.sum {
            Err(Error::InvalidChecksum)?;
        }

        Ok(Some((hdr, &packet[hdr_len..])))
    }

    /// Injects the checksum into the provided packet
    pub fn inject_checksum(packet: &mut [u8], checksum: u16) {
        let checksum = checksum.to_be_bytes();

        let offset = Self::CHECKSUM_WORD << 1;
        packet[offset] = checksum[0];
        packet[offset + 1] = checksum[1];
    }

    /// Computes the checksum for an already encoded packet
    pub fn checksum(packet: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
        let mut buf = [0; 12];

        let len = BytesOut::new(&mut buf)
            .push(&u32::to_be_bytes(src.into()))
            .unwrap()
            .push(&u32::to_be_bytes(dst.into()))
            .unwrap()
            .byte(0)
            .unwrap()
            .byte(Self::PROTO)
            .unwrap()
            .push(&u16::to_be_bytes(packet.len() as u16))
            .unwrap()
            .len();

        let sum = checksum_accumulate(&buf[..len], usize::MAX)
            + checksum_accumulate(packet, Self::CHECKSUM_WORD);

        checksum_finish(sum)
    }

    const SRC_PORT_OFFSET: usize = 0;
    const DST_PORT_OFFSET: usize = 2;

    /// Rewrites the source port of an already encoded TCP segment in place and recomputes the
    /// checksum. Used by the NAT path; leaves options and payload untouched.
    pub fn patch_src_port(
        packet: &mut [u8],
        port: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        Self::patch_port(packet, Self::SRC_PORT_OFFSET, port, src, dst)
    }

    /// Rewrites the destination port of an already encoded TCP segment in place and recomputes
    /// the checksum.
    pub fn patch_dst_port(
        packet: &mut [u8],
        port: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        Self::patch_port(packet, Self::DST_PORT_OFFSET, port, src, dst)
    }

    fn patch_port(
        packet: &mut [u8],
        offset: usize,
        port: u16,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        if packet.len() < offset + 2 {
            Err(Error::DataUnderflow)?;
        }

        packet[offset..offset + 2].copy_from_slice(&port.to_be_bytes());

        let checksum = Self::checksum(packet, src, dst);
        Self::inject_checksum(packet, checksum);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn encoded(flags: Flags, payload: &[u8]) -> ([u8; 64], usize) {
        let hdr = TcpPacketHeader {
            src: 1234,
            dst: 80,
            seq: 1,
            ack: 0,
            doff: 5,
            flags,
            window: 1024,
            sum: 0,
            urgent: 0,
        };

        let mut buf = [0u8; 64];
        hdr.encode(&mut buf).unwrap();

        let total = TcpPacketHeader::MIN_SIZE + payload.len();
        buf[TcpPacketHeader::MIN_SIZE..total].copy_from_slice(payload);

        let checksum = TcpPacketHeader::checksum(&buf[..total], SRC, DST);
        TcpPacketHeader::inject_checksum(&mut buf, checksum);

        (buf, total)
    }

    #[test]
    fn decode_recovers_flags_and_payload_from_a_freshly_encoded_segment() {
        let (buf, total) = encoded(Flags::SYN | Flags::ACK, b"hi");

        let (src, dst, flags, payload) = decode(SRC, DST, &buf[..total], None, None).unwrap().unwrap();
        assert_eq!(src, 1234);
        assert_eq!(dst, 80);
        assert_eq!(flags, Flags::SYN | Flags::ACK);
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn decode_rejects_a_corrupted_checksum() {
        let (mut buf, total) = encoded(Flags::ACK, b"hi");
        buf[total - 1] ^= 0xff;

        assert!(matches!(
            decode(SRC, DST, &buf[..total], None, None),
            Err(Error::InvalidChecksum)
        ));
    }

    #[test]
    fn decode_rejects_a_data_offset_shorter_than_the_minimum_header() {
        let (mut buf, total) = encoded(Flags::ACK, b"hi");
        buf[12] = 4 << 4; // doff = 4 words = 16 bytes, below MIN_SIZE

        assert!(matches!(
            decode(SRC, DST, &buf[..total], None, None),
            Err(Error::InvalidFormat)
        ));
    }

    #[test]
    fn patch_dst_port_rewrites_the_port_and_keeps_the_checksum_valid() {
        let (mut buf, total) = encoded(Flags::ACK, b"hi");

        TcpPacketHeader::patch_dst_port(&mut buf[..total], 8080, SRC, DST).unwrap();

        let (_, dst, _, payload) = decode(SRC, DST, &buf[..total], None, None).unwrap().unwrap();
        assert_eq!(dst, 8080);
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn fin_and_rst_are_the_flags_the_link_table_watches_for() {
        let flags = Flags::FIN | Flags::ACK;
        assert!(flags.contains(Flags::FIN));
        assert!(!flags.contains(Flags::RST));
    }
}
