//! Wire codec for the 12-byte fragment header.
//!
//! One record payload may carry several consecutive fragment records with no
//! padding in between. [`fragments`] walks such a payload until it is
//! exhausted.

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::Error;

/// Encoded size of [`FragmentHeader`].
pub const FRAGMENT_HEADER_LEN: usize = 12;

/// The fixed single-byte body of a ChangeCipherSpec record.
pub const CCS_BODY: u8 = 1;

/// Record-level content type, as reported by the record layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }
}

/// Header prepended to every handshake message fragment.
///
/// Wire layout, all integers big-endian:
/// type(1) + length(3) + message_seq(2) + fragment_offset(3) + fragment_length(3).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Handshake message type. Opaque to this layer.
    pub msg_type: u8,
    /// Total length of the reassembled message (u24 on the wire).
    pub length: u32,
    /// Handshake message sequence number.
    pub message_seq: u16,
    /// Offset of this fragment into the message (u24 on the wire).
    pub fragment_offset: u32,
    /// Number of body bytes following this header (u24 on the wire).
    pub fragment_length: u32,
}

impl FragmentHeader {
    pub fn parse(input: &[u8]) -> IResult<&[u8], FragmentHeader> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            FragmentHeader {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.msg_type);
        output.extend_from_slice(&self.length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&self.fragment_offset.to_be_bytes()[1..]);
        output.extend_from_slice(&self.fragment_length.to_be_bytes()[1..]);
    }
}

/// One fragment record: a header and a view into its body bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub header: FragmentHeader,
    pub body: &'a [u8],
}

impl<'a> Fragment<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Fragment<'a>> {
        let (input, header) = FragmentHeader::parse(input)?;
        let (input, body) = take(header.fragment_length as usize)(input)?;
        Ok((input, Fragment { header, body }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.header.serialize(output);
        output.extend_from_slice(self.body);
    }
}

/// Iterate the consecutive fragment records of one record payload.
///
/// Yields `Error::MalformedHeader` if the remaining bytes cannot hold a
/// header or the declared fragment length.
pub fn fragments(payload: &[u8]) -> FragmentIter {
    FragmentIter { rest: payload }
}

pub struct FragmentIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for FragmentIter<'a> {
    type Item = Result<Fragment<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match Fragment::parse(self.rest) {
            Ok((rest, fragment)) => {
                self.rest = rest;
                Some(Ok(fragment))
            }
            Err(_) => {
                // Stop after reporting, the payload is unusable.
                self.rest = &[];
                Some(Err(Error::MalformedHeader))
            }
        }
    }
}
