//! The seam to the AEAD record layer.
//!
//! Sealing, opening, key schedules and record headers are someone else's
//! problem; this layer only decides *which* epoch context a message is
//! sealed under.

use crate::buffer::Buf;
use crate::codec::ContentType;
use crate::Error;

/// Which key epoch a record is sealed under.
///
/// Only the current and the immediately previous epoch are ever relevant:
/// a message queued just before a rekey is still sealed under the epoch it
/// was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealEpoch {
    Current,
    Previous,
}

/// Opaque AEAD record operations, provided by the surrounding connection.
pub trait RecordLayer {
    /// Seal one record and append its full wire form (record header plus
    /// ciphertext) to `out`.
    fn seal_record(
        &mut self,
        epoch: SealEpoch,
        content_type: ContentType,
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<(), Error>;

    /// Open the record at the start of `input`. Appends the plaintext to
    /// `out` and returns the content type plus the number of wire bytes
    /// consumed, so a datagram holding several records can be walked.
    fn open_record(&mut self, input: &[u8], out: &mut Buf) -> Result<(ContentType, usize), Error>;

    /// Wire overhead of one sealed record beyond its plaintext bytes
    /// (record header plus AEAD expansion). Used for packet budgeting.
    fn seal_overhead(&self, epoch: SealEpoch) -> usize;

    /// Feed one complete handshake message (header plus body) into the
    /// transcript hash. Called once per sent and received message, never
    /// for ChangeCipherSpec.
    fn transcript_update(&mut self, message: &[u8]);
}

/// Plaintext record layer for tests: 4-byte header of content type,
/// epoch marker and a big-endian length, no encryption.
#[cfg(test)]
pub(crate) mod plaintext {
    use super::*;

    pub const OVERHEAD: usize = 4;

    #[derive(Default)]
    pub struct PlainRecordLayer {
        pub transcript: Buf,
    }

    impl RecordLayer for PlainRecordLayer {
        fn seal_record(
            &mut self,
            epoch: SealEpoch,
            content_type: ContentType,
            plaintext: &[u8],
            out: &mut Buf,
        ) -> Result<(), Error> {
            out.push(content_type.as_u8());
            out.push(match epoch {
                SealEpoch::Current => 0,
                SealEpoch::Previous => 1,
            });
            let len = u16::try_from(plaintext.len())
                .map_err(|_| Error::Crypto("record too long".into()))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(plaintext);
            Ok(())
        }

        fn open_record(
            &mut self,
            input: &[u8],
            out: &mut Buf,
        ) -> Result<(ContentType, usize), Error> {
            if input.len() < OVERHEAD {
                return Err(Error::Crypto("short record".into()));
            }
            let content_type = ContentType::from_u8(input[0]);
            let len = u16::from_be_bytes([input[2], input[3]]) as usize;
            let total = OVERHEAD + len;
            if input.len() < total {
                return Err(Error::Crypto("truncated record".into()));
            }
            out.extend_from_slice(&input[OVERHEAD..total]);
            Ok((content_type, total))
        }

        fn seal_overhead(&self, _epoch: SealEpoch) -> usize {
            OVERHEAD
        }

        fn transcript_update(&mut self, message: &[u8]) {
            self.transcript.extend_from_slice(message);
        }
    }
}
