//! Receive window for in-progress and complete incoming messages.
//!
//! A fixed window of [`WINDOW_SIZE`] slots, indexed by sequence number modulo
//! the window size. Fragments are dispatched into the slot for their sequence
//! number; complete messages are handed out in strict sequence order.

use std::fmt;

use crate::buffer::Buf;
use crate::codec::{Fragment, FragmentHeader};
use crate::reassembly::FragmentReassembler;
use crate::{Error, WINDOW_SIZE};

/// One message being reassembled (or done and awaiting consumption).
#[derive(Debug)]
pub(crate) struct IncomingMessage {
    msg_type: u8,
    length: u32,
    data: Buf,
    reassembly: FragmentReassembler,
}

impl IncomingMessage {
    fn new(header: &FragmentHeader) -> Self {
        let mut data = Buf::new();
        data.resize(header.length as usize, 0);
        IncomingMessage {
            msg_type: header.msg_type,
            length: header.length,
            data,
            reassembly: FragmentReassembler::new(header.length as usize),
        }
    }

    fn is_complete(&self) -> bool {
        self.reassembly.is_complete()
    }

    /// Copy a fragment body into place and mark its range.
    ///
    /// Re-received ranges are overwritten (last write wins), but a byte
    /// conflict against already received data is suspicious enough to log.
    fn insert(&mut self, message_seq: u16, offset: usize, bytes: &[u8]) {
        let conflicting = bytes
            .iter()
            .enumerate()
            .filter(|(i, b)| {
                self.reassembly.is_marked(offset + i) && self.data[offset + i] != **b
            })
            .count();

        if conflicting > 0 {
            warn!(
                "Duplicate fragment for message_seq {} conflicts in {} byte(s) at [{}, {})",
                message_seq,
                conflicting,
                offset,
                offset + bytes.len()
            );
        }

        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.reassembly.mark(offset, offset + bytes.len());
    }
}

/// A fully reassembled message released from the window.
#[derive(Debug)]
pub struct CompleteMessage {
    pub msg_type: u8,
    pub message_seq: u16,
    pub body: Buf,
}

/// What [`IncomingStore::feed`] did with a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Out-of-window sequence number, silently dropped.
    Ignored,
    /// Fragment stored, message still incomplete.
    Stored,
    /// The fragment's message is complete (possibly already was).
    Complete,
}

/// Bounded window of incoming messages with in-order release.
pub struct IncomingStore {
    slots: [Option<IncomingMessage>; WINDOW_SIZE],
    next_read_seq: u16,
    ccs_pending: bool,
    max_message_size: usize,
}

impl IncomingStore {
    pub fn new(max_message_size: usize) -> Self {
        IncomingStore {
            slots: Default::default(),
            next_read_seq: 0,
            ccs_pending: false,
            max_message_size,
        }
    }

    /// Dispatch one fragment into the window.
    ///
    /// Sequence numbers below the window were already consumed; above the
    /// window the peer got ahead of us. Both are dropped without error, a
    /// retransmission will carry anything we still need. All validation
    /// happens before any slot is created or mutated.
    pub fn feed(&mut self, fragment: &Fragment) -> Result<FeedOutcome, Error> {
        let header = &fragment.header;
        let seq = header.message_seq;

        if seq < self.next_read_seq {
            trace!("Drop fragment below window: message_seq {}", seq);
            return Ok(FeedOutcome::Ignored);
        }
        if seq as u32 >= self.next_read_seq as u32 + WINDOW_SIZE as u32 {
            debug!(
                "Drop fragment above window: message_seq {} (window starts at {})",
                seq, self.next_read_seq
            );
            return Ok(FeedOutcome::Ignored);
        }

        let slot = &mut self.slots[seq as usize % WINDOW_SIZE];

        if let Some(existing) = slot {
            if existing.msg_type != header.msg_type || existing.length != header.length {
                return Err(Error::FragmentMismatch);
            }
        }

        if header.length as usize > self.max_message_size {
            return Err(Error::ExcessiveMessageSize(header.length as usize));
        }
        if header.fragment_offset + header.fragment_length > header.length {
            return Err(Error::ExcessiveMessageSize(
                (header.fragment_offset + header.fragment_length) as usize,
            ));
        }

        let message = slot.get_or_insert_with(|| IncomingMessage::new(header));

        message.insert(
            seq,
            header.fragment_offset as usize,
            &fragment.body[..header.fragment_length as usize],
        );

        if message.is_complete() {
            Ok(FeedOutcome::Complete)
        } else {
            Ok(FeedOutcome::Stored)
        }
    }

    /// Whether the message at the front of the window is complete.
    pub fn is_current_complete(&self) -> bool {
        self.slots[self.next_read_seq as usize % WINDOW_SIZE]
            .as_ref()
            .map(|m| m.is_complete())
            .unwrap_or(false)
    }

    /// Release the front message and advance the window.
    ///
    /// Returns `None` unless the front message is complete; messages are
    /// never released early or out of order.
    pub fn take_current(&mut self) -> Option<CompleteMessage> {
        if !self.is_current_complete() {
            return None;
        }

        let slot = &mut self.slots[self.next_read_seq as usize % WINDOW_SIZE];
        // Unwrap is OK, is_current_complete checked the slot.
        let message = slot.take().unwrap();

        let message_seq = self.next_read_seq;
        self.next_read_seq += 1;

        Some(CompleteMessage {
            msg_type: message.msg_type,
            message_seq,
            body: message.data,
        })
    }

    /// Note a received ChangeCipherSpec for the caller to pick up.
    pub fn set_ccs_pending(&mut self) {
        self.ccs_pending = true;
    }

    /// Take the pending ChangeCipherSpec, if any.
    pub fn take_ccs_pending(&mut self) -> bool {
        std::mem::take(&mut self.ccs_pending)
    }

    /// True if anything in the window still needs the caller's attention:
    /// a complete front message, buffered later fragments, or a pending
    /// ChangeCipherSpec.
    pub fn has_unprocessed_data(&self) -> bool {
        self.ccs_pending || self.slots.iter().any(|s| s.is_some())
    }
}

impl fmt::Debug for IncomingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let occupied = self.slots.iter().filter(|s| s.is_some()).count();
        let complete = self
            .slots
            .iter()
            .flatten()
            .filter(|m| m.is_complete())
            .count();
        f.debug_struct("IncomingStore")
            .field("next_read_seq", &self.next_read_seq)
            .field("occupied", &occupied)
            .field("complete", &complete)
            .field("ccs_pending", &self.ccs_pending)
            .finish()
    }
}
