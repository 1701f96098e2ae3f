// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIMv2 wire codec for IPv6 (RFC 7761 section 4.9)
//!
//! Pure transforms between bytes and message structures. No state is kept
//! here; the interface and neighbor modules decide what a decoded message
//! means.
//!
//! ## Message Types
//!
//! | Type | Value | Handling |
//! |------|-------|----------|
//! | Hello | 0 | Neighbor discovery, DR election |
//! | Register | 1 | Recognized only |
//! | Register-Stop | 2 | Recognized only |
//! | Join/Prune | 3 | Decoded and validated |
//! | Bootstrap | 4 | Recognized only |
//! | Assert | 5 | Recognized only |
//! | Graft | 6 | Recognized only |
//! | Graft-Ack | 7 | Recognized only |
//! | Candidate-RP | 8 | Recognized only |
//!
//! ## Encoded addresses
//!
//! Only address family 2 (IPv6) with encoding type 0 (native) is accepted.
//! Anything else aborts decoding of the whole message.

use std::net::Ipv6Addr;

use thiserror::Error;

use super::PacketBuilder;

pub const PIM_VERSION: u8 = 2;
pub const PIM_HEADER_LEN: usize = 4;

// PIM message types
pub const PIM_HELLO: u8 = 0;
pub const PIM_REGISTER: u8 = 1;
pub const PIM_REGISTER_STOP: u8 = 2;
pub const PIM_JOIN_PRUNE: u8 = 3;
pub const PIM_BOOTSTRAP: u8 = 4;
pub const PIM_ASSERT: u8 = 5;
pub const PIM_GRAFT: u8 = 6;
pub const PIM_GRAFT_ACK: u8 = 7;
pub const PIM_CANDIDATE_RP: u8 = 8;
pub const PIM_TYPE_MAX: u8 = PIM_CANDIDATE_RP;

// Hello option types
pub const PIM_HELLO_HOLDTIME: u16 = 1;
pub const PIM_HELLO_LAN_PRUNE_DELAY: u16 = 2;
pub const PIM_HELLO_DR_PRIORITY: u16 = 19;
pub const PIM_HELLO_GENERATION_ID: u16 = 20;
pub const PIM_HELLO_BIDIR_CAPABLE: u16 = 22;
pub const PIM_HELLO_ADDRESS_LIST: u16 = 24;

const TLV_HEADER_LEN: usize = 4;

/// Holdtime value meaning "never expire"
pub const HOLDTIME_INFINITE: u16 = 0xffff;

// Encoded address prefix
pub const ADDRESS_FAMILY_IPV6: u8 = 2;
pub const ENCODING_NATIVE: u8 = 0;

pub const ENCODED_UNICAST_LEN: usize = 18;
pub const ENCODED_GROUP_LEN: usize = 20;
pub const ENCODED_SOURCE_LEN: usize = 20;

// Encoded-Group flags
pub const GROUP_FLAG_BIDIR: u8 = 0x80;
pub const GROUP_FLAG_ADMIN_SCOPE: u8 = 0x01;

// Encoded-Source flags
pub const SOURCE_FLAG_SPARSE: u8 = 0x04;
pub const SOURCE_FLAG_WILDCARD: u8 = 0x02;
pub const SOURCE_FLAG_RPT: u8 = 0x01;

/// Errors produced while decoding PIM messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("message truncated: need {needed} bytes, {available} available")]
    TruncatedMessage { needed: usize, available: usize },

    #[error("option {option_type} has invalid length {length}")]
    MalformedOption { option_type: u16, length: u16 },

    #[error("unsupported address family {0}")]
    UnsupportedAddressFamily(u8),

    #[error("unsupported address encoding type {0}")]
    UnsupportedEncodingType(u8),

    #[error("unsupported PIM version {0}")]
    InvalidVersion(u8),

    #[error("unknown PIM message type {0}")]
    UnknownMessageType(u8),
}

/// Bounds-checked reader over a message body
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::TruncatedMessage {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(len)?;
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn ipv6(&mut self) -> Result<Ipv6Addr, CodecError> {
        let b = self.take(16)?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(b);
        Ok(Ipv6Addr::from(octets))
    }

    /// Address family and encoding type prefix shared by all encoded addresses
    fn address_prefix(&mut self) -> Result<(), CodecError> {
        let family = self.u8()?;
        let encoding = self.u8()?;
        if family != ADDRESS_FAMILY_IPV6 {
            return Err(CodecError::UnsupportedAddressFamily(family));
        }
        if encoding != ENCODING_NATIVE {
            return Err(CodecError::UnsupportedEncodingType(encoding));
        }
        Ok(())
    }
}

/// Parsed PIM header (common header for all PIM messages)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PimHeader {
    /// PIM version (must be 2)
    pub version: u8,
    /// Message type
    pub msg_type: u8,
    /// Reserved field
    pub reserved: u8,
    /// Checksum (verified by the kernel for IPv6)
    pub checksum: u16,
}

impl PimHeader {
    /// Parse and sanity-check a PIM header
    ///
    /// A message consisting of the header alone is rejected: every type this
    /// engine handles carries a body.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() <= PIM_HEADER_LEN {
            return Err(CodecError::TruncatedMessage {
                needed: PIM_HEADER_LEN + 1,
                available: data.len(),
            });
        }

        let version = (data[0] >> 4) & 0x0F;
        let msg_type = data[0] & 0x0F;

        if version != PIM_VERSION {
            return Err(CodecError::InvalidVersion(version));
        }
        if msg_type > PIM_TYPE_MAX {
            return Err(CodecError::UnknownMessageType(msg_type));
        }

        Ok(Self {
            version,
            msg_type,
            reserved: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
        })
    }

    /// Append a version 2 header with a zero checksum
    fn write(msg_type: u8, out: &mut Vec<u8>) {
        out.push((PIM_VERSION << 4) | msg_type);
        out.push(0);
        out.extend_from_slice(&[0, 0]);
    }

    /// Get the message type as a string
    pub fn type_name(&self) -> &'static str {
        match self.msg_type {
            PIM_HELLO => "Hello",
            PIM_REGISTER => "Register",
            PIM_REGISTER_STOP => "Register-Stop",
            PIM_JOIN_PRUNE => "Join/Prune",
            PIM_BOOTSTRAP => "Bootstrap",
            PIM_ASSERT => "Assert",
            PIM_GRAFT => "Graft",
            PIM_GRAFT_ACK => "Graft-Ack",
            PIM_CANDIDATE_RP => "Candidate-RP",
            _ => "Unknown",
        }
    }
}

/// Split a datagram into its validated header and the body that follows
pub fn split_message(data: &[u8]) -> Result<(PimHeader, &[u8]), CodecError> {
    let header = PimHeader::parse(data)?;
    Ok((header, &data[PIM_HEADER_LEN..]))
}

/// Decoded Hello option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloOption {
    /// Holdtime in seconds (0xffff = infinite)
    Holdtime(u16),
    /// LAN Prune Delay, recognized but not interpreted
    LanPruneDelay { length: u16 },
    /// Bidirectional-capable marker
    BidirCapable,
    /// DR Priority
    DrPriority(u32),
    /// Generation ID
    GenerationId(u32),
    /// Secondary address list, recognized but not interpreted
    AddressList { length: u16 },
    /// Unknown option, skipped
    Unknown { option_type: u16, length: u16 },
}

/// Iterator over the TLVs of a Hello body
///
/// Yields each option in wire order. After the first error the iterator is
/// exhausted, so a caller applying options as they arrive keeps whatever was
/// applied before the failure.
pub struct HelloOptions<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> HelloOptions<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            data: body,
            offset: 0,
            failed: false,
        }
    }

    fn fail(&mut self, err: CodecError) -> Option<Result<HelloOption, CodecError>> {
        self.failed = true;
        Some(Err(err))
    }
}

fn expect_len(option_type: u16, length: u16, expected: u16) -> Result<(), CodecError> {
    if length != expected {
        return Err(CodecError::MalformedOption {
            option_type,
            length,
        });
    }
    Ok(())
}

fn decode_option(option_type: u16, value: &[u8]) -> Result<HelloOption, CodecError> {
    let length = value.len() as u16;
    let option = match option_type {
        PIM_HELLO_HOLDTIME => {
            expect_len(option_type, length, 2)?;
            HelloOption::Holdtime(u16::from_be_bytes([value[0], value[1]]))
        }
        PIM_HELLO_LAN_PRUNE_DELAY => HelloOption::LanPruneDelay { length },
        PIM_HELLO_BIDIR_CAPABLE => {
            expect_len(option_type, length, 0)?;
            HelloOption::BidirCapable
        }
        PIM_HELLO_DR_PRIORITY => {
            expect_len(option_type, length, 4)?;
            HelloOption::DrPriority(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
        }
        PIM_HELLO_GENERATION_ID => {
            expect_len(option_type, length, 4)?;
            HelloOption::GenerationId(u32::from_be_bytes([
                value[0], value[1], value[2], value[3],
            ]))
        }
        PIM_HELLO_ADDRESS_LIST => HelloOption::AddressList { length },
        _ => HelloOption::Unknown {
            option_type,
            length,
        },
    };
    Ok(option)
}

impl Iterator for HelloOptions<'_> {
    type Item = Result<HelloOption, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Fewer than a TLV header's worth of trailing bytes is padding
        if self.failed || self.data.len() - self.offset < TLV_HEADER_LEN {
            return None;
        }

        let rest = &self.data[self.offset..];
        let option_type = u16::from_be_bytes([rest[0], rest[1]]);
        let value_len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
        let total = value_len + TLV_HEADER_LEN;

        if rest.len() < total {
            return self.fail(CodecError::TruncatedMessage {
                needed: total,
                available: rest.len(),
            });
        }

        let value = &rest[TLV_HEADER_LEN..total];
        self.offset += total;

        match decode_option(option_type, value) {
            Ok(option) => Some(Ok(option)),
            Err(e) => self.fail(e),
        }
    }
}

/// Decode every option of a Hello body, failing on the first bad TLV
pub fn decode_hello(body: &[u8]) -> Result<Vec<HelloOption>, CodecError> {
    HelloOptions::new(body).collect()
}

/// Builder for PIM Hello packets
///
/// `new` produces the standard HoldTime, DR-Priority, Generation-ID triple.
/// Omitting DR-Priority models routers that predate the option.
#[derive(Debug, Clone)]
pub struct PimHelloBuilder {
    /// Holdtime in seconds
    pub holdtime: u16,
    /// DR Priority, omitted from the packet when None
    pub dr_priority: Option<u32>,
    /// Generation ID, omitted from the packet when None
    pub generation_id: Option<u32>,
    /// Emit the Bidirectional-capable option
    pub bidir_capable: bool,
}

impl PimHelloBuilder {
    pub fn new(holdtime: u16, dr_priority: u32, generation_id: u32) -> Self {
        Self {
            holdtime,
            dr_priority: Some(dr_priority),
            generation_id: Some(generation_id),
            bidir_capable: false,
        }
    }

    pub fn without_dr_priority(mut self) -> Self {
        self.dr_priority = None;
        self
    }

    pub fn without_generation_id(mut self) -> Self {
        self.generation_id = None;
        self
    }

    pub fn with_bidir_capable(mut self) -> Self {
        self.bidir_capable = true;
        self
    }
}

fn push_tlv(out: &mut Vec<u8>, option_type: u16, value: &[u8]) {
    out.extend_from_slice(&option_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
}

impl PacketBuilder for PimHelloBuilder {
    fn build(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(26);
        PimHeader::write(PIM_HELLO, &mut packet);

        push_tlv(&mut packet, PIM_HELLO_HOLDTIME, &self.holdtime.to_be_bytes());
        if let Some(priority) = self.dr_priority {
            push_tlv(&mut packet, PIM_HELLO_DR_PRIORITY, &priority.to_be_bytes());
        }
        if let Some(gen_id) = self.generation_id {
            push_tlv(&mut packet, PIM_HELLO_GENERATION_ID, &gen_id.to_be_bytes());
        }
        if self.bidir_capable {
            push_tlv(&mut packet, PIM_HELLO_BIDIR_CAPABLE, &[]);
        }
        packet
    }
}

/// Encode a complete Hello message (header included)
pub fn encode_hello(holdtime: u16, dr_priority: u32, generation_id: u32) -> Vec<u8> {
    PimHelloBuilder::new(holdtime, dr_priority, generation_id).build()
}

/// Encoded-Group address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedGroup {
    pub address: Ipv6Addr,
    pub mask_len: u8,
    pub bidirectional: bool,
    pub admin_scope: bool,
}

impl EncodedGroup {
    pub fn new(address: Ipv6Addr, mask_len: u8) -> Self {
        Self {
            address,
            mask_len,
            bidirectional: false,
            admin_scope: false,
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        reader.ensure(ENCODED_GROUP_LEN)?;
        reader.address_prefix()?;
        let flags = reader.u8()?;
        let mask_len = reader.u8()?;
        let address = reader.ipv6()?;
        Ok(Self {
            address,
            mask_len,
            bidirectional: flags & GROUP_FLAG_BIDIR != 0,
            admin_scope: flags & GROUP_FLAG_ADMIN_SCOPE != 0,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0;
        if self.bidirectional {
            flags |= GROUP_FLAG_BIDIR;
        }
        if self.admin_scope {
            flags |= GROUP_FLAG_ADMIN_SCOPE;
        }
        out.extend_from_slice(&[ADDRESS_FAMILY_IPV6, ENCODING_NATIVE, flags, self.mask_len]);
        out.extend_from_slice(&self.address.octets());
    }
}

/// Encoded-Source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSource {
    pub address: Ipv6Addr,
    pub mask_len: u8,
    pub sparse: bool,
    pub wildcard: bool,
    pub rpt: bool,
}

impl EncodedSource {
    /// (S,G) source with a host mask and the sparse bit set
    pub fn host(address: Ipv6Addr) -> Self {
        Self {
            address,
            mask_len: 128,
            sparse: true,
            wildcard: false,
            rpt: false,
        }
    }

    /// (*,G) entry: the RP address with wildcard and RPT bits set
    pub fn wildcard(rp: Ipv6Addr) -> Self {
        Self {
            address: rp,
            mask_len: 128,
            sparse: true,
            wildcard: true,
            rpt: true,
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        reader.ensure(ENCODED_SOURCE_LEN)?;
        reader.address_prefix()?;
        let flags = reader.u8()?;
        let mask_len = reader.u8()?;
        let address = reader.ipv6()?;
        Ok(Self {
            address,
            mask_len,
            sparse: flags & SOURCE_FLAG_SPARSE != 0,
            wildcard: flags & SOURCE_FLAG_WILDCARD != 0,
            rpt: flags & SOURCE_FLAG_RPT != 0,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0;
        if self.sparse {
            flags |= SOURCE_FLAG_SPARSE;
        }
        if self.wildcard {
            flags |= SOURCE_FLAG_WILDCARD;
        }
        if self.rpt {
            flags |= SOURCE_FLAG_RPT;
        }
        out.extend_from_slice(&[ADDRESS_FAMILY_IPV6, ENCODING_NATIVE, flags, self.mask_len]);
        out.extend_from_slice(&self.address.octets());
    }
}

/// One group record of a Join/Prune message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub group: EncodedGroup,
    pub joins: Vec<EncodedSource>,
    pub prunes: Vec<EncodedSource>,
}

/// Decoded Join/Prune message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPrune {
    /// Upstream neighbor the message is addressed to
    pub upstream: Ipv6Addr,
    pub holdtime: u16,
    pub groups: Vec<GroupRecord>,
}

fn decode_sources(reader: &mut Reader<'_>, count: u16) -> Result<Vec<EncodedSource>, CodecError> {
    let mut sources = Vec::with_capacity(count as usize);
    for _ in 0..count {
        sources.push(EncodedSource::decode(reader)?);
    }
    Ok(sources)
}

/// Decode a Join/Prune body (the bytes after the PIM header)
pub fn decode_join_prune(body: &[u8]) -> Result<JoinPrune, CodecError> {
    let mut reader = Reader::new(body);

    // Upstream unicast address, reserved, group count, holdtime
    reader.ensure(ENCODED_UNICAST_LEN + 4)?;
    reader.address_prefix()?;
    let upstream = reader.ipv6()?;
    let _reserved = reader.u8()?;
    let group_count = reader.u8()?;
    let holdtime = reader.u16()?;

    let mut groups = Vec::with_capacity(group_count as usize);
    for _ in 0..group_count {
        reader.ensure(ENCODED_GROUP_LEN + 4)?;
        let group = EncodedGroup::decode(&mut reader)?;
        let join_count = reader.u16()?;
        let prune_count = reader.u16()?;

        let sources_len = (join_count as usize + prune_count as usize) * ENCODED_SOURCE_LEN;
        reader.ensure(sources_len)?;

        let joins = decode_sources(&mut reader, join_count)?;
        let prunes = decode_sources(&mut reader, prune_count)?;
        groups.push(GroupRecord {
            group,
            joins,
            prunes,
        });
    }

    Ok(JoinPrune {
        upstream,
        holdtime,
        groups,
    })
}

/// Builder for Join/Prune messages
#[derive(Debug, Clone)]
pub struct JoinPruneBuilder {
    pub message: JoinPrune,
}

impl JoinPruneBuilder {
    pub fn new(upstream: Ipv6Addr, holdtime: u16) -> Self {
        Self {
            message: JoinPrune {
                upstream,
                holdtime,
                groups: Vec::new(),
            },
        }
    }

    pub fn group(
        mut self,
        group: EncodedGroup,
        joins: Vec<EncodedSource>,
        prunes: Vec<EncodedSource>,
    ) -> Self {
        self.message.groups.push(GroupRecord {
            group,
            joins,
            prunes,
        });
        self
    }
}

impl PacketBuilder for JoinPruneBuilder {
    fn build(&self) -> Vec<u8> {
        let msg = &self.message;
        let mut packet = Vec::with_capacity(PIM_HEADER_LEN + ENCODED_UNICAST_LEN + 4);
        PimHeader::write(PIM_JOIN_PRUNE, &mut packet);

        packet.extend_from_slice(&[ADDRESS_FAMILY_IPV6, ENCODING_NATIVE]);
        packet.extend_from_slice(&msg.upstream.octets());
        packet.push(0);
        packet.push(msg.groups.len() as u8);
        packet.extend_from_slice(&msg.holdtime.to_be_bytes());

        for record in &msg.groups {
            record.group.encode(&mut packet);
            packet.extend_from_slice(&(record.joins.len() as u16).to_be_bytes());
            packet.extend_from_slice(&(record.prunes.len() as u16).to_be_bytes());
            for source in record.joins.iter().chain(record.prunes.iter()) {
                source.encode(&mut packet);
            }
        }
        packet
    }
}
