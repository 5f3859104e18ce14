//! Outgoing flight buffering and MTU-bounded packetization.
//!
//! A flight is a batch of at most [`WINDOW_SIZE`] messages retransmitted as
//! one atomic unit. Packetization is resumable: an explicit cursor of
//! message index plus byte offset records how far sealing got, and only
//! advances once a packet was actually written. Nothing sealed is cached;
//! a retried packet is re-derived from the same cursor and is byte
//! identical.

use std::fmt;

use arrayvec::ArrayVec;

use crate::buffer::Buf;
use crate::codec::{ContentType, FragmentHeader, CCS_BODY, FRAGMENT_HEADER_LEN};
use crate::record::{RecordLayer, SealEpoch};
use crate::{Error, WINDOW_SIZE};

/// One composed message waiting in the current flight.
///
/// The epoch is captured when the message is appended and never changes,
/// even if the write epoch advances before the message goes out.
pub(crate) struct OutgoingMessage {
    pub msg_type: u8,
    pub message_seq: u16,
    pub body: Buf,
    pub epoch: u16,
    pub is_ccs: bool,
}

/// Resumable packetization position: which message, and how far into it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub index: usize,
    pub offset: usize,
}

/// The current outgoing flight.
pub(crate) struct Flight {
    messages: ArrayVec<OutgoingMessage, WINDOW_SIZE>,
    cursor: Cursor,
    complete: bool,
    got_reply: bool,
}

impl Flight {
    pub fn new() -> Self {
        Flight {
            messages: ArrayVec::new(),
            cursor: Cursor::default(),
            complete: false,
            got_reply: false,
        }
    }

    /// Append a message to the flight.
    ///
    /// If the previous flight was already completed, this append supersedes
    /// it: the old messages are released first (lazy flight rotation).
    pub fn append(&mut self, message: OutgoingMessage) -> Result<(), Error> {
        if self.complete {
            trace!("New message supersedes completed flight");
            self.clear();
        }
        if self.messages.is_full() {
            return Err(Error::Internal("flight exceeds window size"));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Mark the flight ready to go out as a unit.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Restart sending from the first byte of the first message. The
    /// retransmission unit is always the whole flight.
    pub fn rewind(&mut self) {
        self.cursor = Cursor::default();
    }

    /// Release all buffered messages and reset sending state.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.cursor = Cursor::default();
        self.complete = false;
        self.got_reply = false;
    }

    pub fn set_got_reply(&mut self) {
        self.got_reply = true;
    }

    pub fn got_reply(&self) -> bool {
        self.got_reply
    }

    /// Whether the cursor has passed the last message.
    pub fn is_sent(&self) -> bool {
        self.cursor.index >= self.messages.len()
    }

    /// Commit a cursor returned by [`next_packet`][Self::next_packet] after
    /// the packet was successfully written.
    pub fn commit_cursor(&mut self, cursor: Cursor) {
        debug_assert!(cursor >= self.cursor);
        self.cursor = cursor;
    }

    /// Build the next packet from the stored cursor without advancing it.
    ///
    /// Seals records into `out` until the budget is exhausted or the flight
    /// runs out of messages; `scratch` is plaintext working space. Returns
    /// the cursor to commit once the packet is written, or `None` when
    /// there is nothing left to send.
    ///
    /// Fails with `MtuTooSmall` if the first message attempted cannot make
    /// any forward progress within `budget`.
    pub fn next_packet(
        &self,
        budget: usize,
        write_epoch: u16,
        record_layer: &mut dyn RecordLayer,
        scratch: &mut Buf,
        out: &mut Buf,
    ) -> Result<Option<Cursor>, Error> {
        out.clear();

        let mut cursor = self.cursor;
        if cursor.index >= self.messages.len() {
            return Ok(None);
        }

        let mut first_in_packet = true;

        while cursor.index < self.messages.len() {
            let message = &self.messages[cursor.index];
            let epoch = seal_epoch(message.epoch, write_epoch)?;
            let overhead = record_layer.seal_overhead(epoch);
            let remaining = budget.saturating_sub(out.len());

            if message.is_ccs {
                // CCS is its own record, all-or-nothing, never split.
                if overhead + 1 > remaining {
                    if first_in_packet {
                        return Err(Error::MtuTooSmall(budget));
                    }
                    break;
                }
                record_layer.seal_record(
                    epoch,
                    ContentType::ChangeCipherSpec,
                    &[CCS_BODY],
                    out,
                )?;
                cursor.index += 1;
                cursor.offset = 0;
                first_in_packet = false;
                continue;
            }

            let total = message.body.len();
            let rest = total - cursor.offset;
            let body_budget = remaining.saturating_sub(overhead + FRAGMENT_HEADER_LEN);
            let chunk = rest.min(body_budget);

            let header_fits = remaining >= overhead + FRAGMENT_HEADER_LEN;
            let no_progress = !header_fits || (rest > 0 && chunk == 0);
            if no_progress {
                if first_in_packet {
                    return Err(Error::MtuTooSmall(budget));
                }
                break;
            }

            // Re-offset the header to the cursor position; total length is
            // unchanged from the original message.
            let header = FragmentHeader {
                msg_type: message.msg_type,
                length: total as u32,
                message_seq: message.message_seq,
                fragment_offset: cursor.offset as u32,
                fragment_length: chunk as u32,
            };

            scratch.clear();
            header.serialize(scratch);
            scratch.extend_from_slice(&message.body[cursor.offset..cursor.offset + chunk]);
            record_layer.seal_record(epoch, ContentType::Handshake, scratch, out)?;

            cursor.offset += chunk;
            first_in_packet = false;

            if cursor.offset == total {
                cursor.index += 1;
                cursor.offset = 0;
            } else {
                // Partial fit ends the packet; the rest resumes here.
                break;
            }
        }

        Ok(Some(cursor))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.offset).cmp(&(other.index, other.offset))
    }
}

/// Select the sealing context for a message's captured epoch.
///
/// Anything other than the current or immediately previous write epoch is a
/// defect in flight rotation, not something a peer can cause.
fn seal_epoch(message_epoch: u16, write_epoch: u16) -> Result<SealEpoch, Error> {
    if message_epoch == write_epoch {
        Ok(SealEpoch::Current)
    } else if write_epoch > 0 && message_epoch == write_epoch - 1 {
        Ok(SealEpoch::Previous)
    } else {
        Err(Error::Internal("message epoch out of sealing range"))
    }
}

// Metadata only, keep payload bytes out of logs.
impl fmt::Debug for Flight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_bytes: usize = self.messages.iter().map(|m| m.body.len()).sum();
        f.debug_struct("Flight")
            .field("messages", &self.messages.len())
            .field("total_bytes", &total_bytes)
            .field("cursor", &self.cursor)
            .field("complete", &self.complete)
            .field("got_reply", &self.got_reply)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::{fragments, Fragment};
    use crate::record::plaintext::{PlainRecordLayer, OVERHEAD};

    fn message(seq: u16, len: usize, epoch: u16) -> OutgoingMessage {
        let body: Vec<u8> = (0..len).map(|i| (i + seq as usize) as u8).collect();
        OutgoingMessage {
            msg_type: 14,
            message_seq: seq,
            body: Buf::from_slice(&body),
            epoch,
            is_ccs: false,
        }
    }

    fn ccs(epoch: u16) -> OutgoingMessage {
        OutgoingMessage {
            msg_type: 0,
            message_seq: 0,
            body: Buf::from_slice(&[CCS_BODY]),
            epoch,
            is_ccs: true,
        }
    }

    /// Decode the plaintext-sealed records of one packet into fragments.
    fn decode_packet(packet: &[u8]) -> Vec<(u8, FragmentHeader, Vec<u8>)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < packet.len() {
            let ctype = packet[i];
            let epoch_marker = packet[i + 1];
            let len = u16::from_be_bytes([packet[i + 2], packet[i + 3]]) as usize;
            let payload = &packet[i + OVERHEAD..i + OVERHEAD + len];
            if ctype == 22 {
                for frag in fragments(payload) {
                    let Fragment { header, body } = frag.unwrap();
                    out.push((epoch_marker, header, body.to_vec()));
                }
            } else {
                out.push((
                    epoch_marker,
                    FragmentHeader::default(),
                    payload.to_vec(),
                ));
            }
            i += OVERHEAD + len;
        }
        out
    }

    fn drain_packets(flight: &mut Flight, budget: usize, write_epoch: u16) -> Vec<Vec<u8>> {
        let mut rl = PlainRecordLayer::default();
        let mut scratch = Buf::new();
        let mut out = Buf::new();
        let mut packets = Vec::new();
        while let Some(cursor) = flight
            .next_packet(budget, write_epoch, &mut rl, &mut scratch, &mut out)
            .unwrap()
        {
            packets.push(out.to_vec());
            flight.commit_cursor(cursor);
        }
        packets
    }

    #[test]
    fn small_and_large_message_split_across_packets() {
        let mut flight = Flight::new();
        flight.append(message(0, 50, 0)).unwrap();
        flight.append(message(1, 4000, 0)).unwrap();
        flight.mark_complete();

        let budget = 1200;
        let mut rl = PlainRecordLayer::default();
        let mut scratch = Buf::new();
        let mut out = Buf::new();

        let cursor = flight
            .next_packet(budget, 0, &mut rl, &mut scratch, &mut out)
            .unwrap()
            .unwrap();

        assert!(out.len() <= budget);
        let frags = decode_packet(&out);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].1.message_seq, 0);
        assert_eq!(frags[0].1.fragment_length, 50);
        assert_eq!(frags[1].1.message_seq, 1);
        assert_eq!(frags[1].1.fragment_offset, 0);

        // Message 1 took 50 + header + overhead; the remainder of the budget
        // went to message 2's first chunk.
        let expected_chunk = budget - 2 * (OVERHEAD + FRAGMENT_HEADER_LEN) - 50;
        assert_eq!(frags[1].1.fragment_length as usize, expected_chunk);
        assert_eq!(cursor, Cursor { index: 1, offset: expected_chunk });

        // Resume from the committed cursor: the next chunk starts exactly
        // where the first ended.
        flight.commit_cursor(cursor);
        let cursor2 = flight
            .next_packet(budget, 0, &mut rl, &mut scratch, &mut out)
            .unwrap()
            .unwrap();
        let frags2 = decode_packet(&out);
        assert_eq!(frags2[0].1.fragment_offset as usize, expected_chunk);
        assert!(cursor2 > cursor);
    }

    #[test]
    fn uncommitted_packet_regenerates_identically() {
        let mut flight = Flight::new();
        flight.append(message(0, 500, 0)).unwrap();
        flight.append(message(1, 900, 0)).unwrap();
        flight.mark_complete();

        let mut rl = PlainRecordLayer::default();
        let mut scratch = Buf::new();
        let mut first = Buf::new();
        let mut second = Buf::new();

        // Two builds without a commit in between, as after a blocked write.
        flight
            .next_packet(700, 0, &mut rl, &mut scratch, &mut first)
            .unwrap()
            .unwrap();
        flight
            .next_packet(700, 0, &mut rl, &mut scratch, &mut second)
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn arbitrary_budgets_reproduce_message_bytes() {
        // Shrinking budgets with resumption must still deliver every body
        // byte exactly once, in non-decreasing offset order.
        let sizes = [0usize, 137, 1, 4000, 229];
        let budgets = [1400usize, 700, 333, 229];

        for budget in budgets {
            let mut flight = Flight::new();
            for (i, size) in sizes.iter().enumerate() {
                flight.append(message(i as u16, *size, 0)).unwrap();
            }
            flight.mark_complete();

            let packets = drain_packets(&mut flight, budget, 0);

            let mut rebuilt: Vec<Vec<u8>> = sizes.iter().map(|_| Vec::new()).collect();
            let mut last_offset = vec![0u32; sizes.len()];
            for packet in &packets {
                assert!(packet.len() <= budget);
                for (_, header, body) in decode_packet(packet) {
                    let i = header.message_seq as usize;
                    assert!(header.fragment_offset >= last_offset[i]);
                    last_offset[i] = header.fragment_offset;
                    assert_eq!(rebuilt[i].len(), header.fragment_offset as usize);
                    rebuilt[i].extend_from_slice(&body);
                    assert_eq!(header.length as usize, sizes[i]);
                }
            }

            for (i, size) in sizes.iter().enumerate() {
                let expected = message(i as u16, *size, 0).body.to_vec();
                assert_eq!(rebuilt[i], expected, "budget {budget}, message {i}");
            }
        }
    }

    #[test]
    fn too_small_budget_is_mtu_too_small() {
        let mut flight = Flight::new();
        flight.append(message(0, 100, 0)).unwrap();
        flight.mark_complete();

        let mut rl = PlainRecordLayer::default();
        let mut scratch = Buf::new();
        let mut out = Buf::new();

        let err = flight
            .next_packet(OVERHEAD + FRAGMENT_HEADER_LEN, 0, &mut rl, &mut scratch, &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::MtuTooSmall(_)));
    }

    #[test]
    fn empty_message_emits_header_only_record() {
        let mut flight = Flight::new();
        flight.append(message(0, 0, 0)).unwrap();
        flight.mark_complete();

        let packets = drain_packets(&mut flight, 1200, 0);
        assert_eq!(packets.len(), 1);
        let frags = decode_packet(&packets[0]);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].1.length, 0);
        assert_eq!(frags[0].1.fragment_length, 0);
        assert!(flight.is_sent());
    }

    #[test]
    fn ccs_is_never_split_and_carries_epoch() {
        let mut flight = Flight::new();
        flight.append(message(0, 10, 0)).unwrap();
        flight.append(ccs(0)).unwrap();
        flight.append(message(1, 10, 1)).unwrap();
        flight.mark_complete();

        // Write epoch already advanced to 1: the pre-CCS messages seal under
        // the previous context, the post-CCS message under the current one.
        let packets = drain_packets(&mut flight, 1200, 1);
        assert_eq!(packets.len(), 1);
        let records = decode_packet(&packets[0]);
        assert_eq!(records.len(), 3);
        // Epoch markers: 1 = Previous, 0 = Current in the test record layer.
        assert_eq!(records[0].0, 1);
        assert_eq!(records[1].0, 1);
        assert_eq!(records[1].2, vec![CCS_BODY]);
        assert_eq!(records[2].0, 0);
    }

    #[test]
    fn stale_epoch_is_internal_error() {
        let mut flight = Flight::new();
        flight.append(message(0, 10, 0)).unwrap();
        flight.mark_complete();

        let mut rl = PlainRecordLayer::default();
        let mut scratch = Buf::new();
        let mut out = Buf::new();

        // Write epoch jumped two ahead of the message's captured epoch.
        let err = flight
            .next_packet(1200, 2, &mut rl, &mut scratch, &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn append_past_window_is_internal_error() {
        let mut flight = Flight::new();
        for i in 0..WINDOW_SIZE {
            flight.append(message(i as u16, 1, 0)).unwrap();
        }
        let err = flight.append(message(99, 1, 0)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn append_after_complete_rotates_flight() {
        let mut flight = Flight::new();
        flight.append(message(0, 5, 0)).unwrap();
        flight.mark_complete();
        drain_packets(&mut flight, 1200, 0);
        flight.set_got_reply();

        flight.append(message(1, 5, 0)).unwrap();
        assert!(!flight.is_complete());
        assert!(!flight.got_reply());

        // Only the new message remains.
        flight.mark_complete();
        let packets = drain_packets(&mut flight, 1200, 0);
        let frags = decode_packet(&packets[0]);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].1.message_seq, 1);
    }
}
