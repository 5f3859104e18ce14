//! The delivery engine: glue between the incoming window, the outgoing
//! flight, the retransmission timer and the record layer.
//!
//! Single-threaded and poll-driven. The caller feeds received datagrams
//! into [`Engine::handle_packet`], drains complete messages with
//! [`Engine::next_message`], and reports time into
//! [`Engine::handle_timeout`]. Nothing happens between calls.

use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{Buf, BufferPool};
use crate::codec::{fragments, ContentType, FragmentHeader, CCS_BODY};
use crate::config::MIN_MTU;
use crate::flight::{Flight, OutgoingMessage};
use crate::incoming::{CompleteMessage, FeedOutcome, IncomingStore};
use crate::record::RecordLayer;
use crate::timer::RetransmitTimer;
use crate::transport::{IoStatus, Transport};
use crate::{Config, Error};

/// Reliable delivery engine for one connection.
///
/// Owns the connection's read/write epoch counters: they live in exactly
/// one place, and outgoing messages capture the write epoch at the moment
/// they are appended.
pub struct Engine<R: RecordLayer> {
    config: Arc<Config>,

    /// Record sealing/opening and transcript, behind the crypto seam.
    record_layer: R,

    /// Pool of scratch buffers.
    buffers_free: BufferPool,

    /// Receive window of in-progress and complete messages.
    store: IncomingStore,

    /// The current outgoing flight.
    flight: Flight,

    /// Retransmission timeout for the current flight.
    timer: RetransmitTimer,

    /// Sequence number for the next composed outgoing message.
    next_send_seq: u16,

    /// Key epoch for outgoing records.
    write_epoch: u16,

    /// Key epoch for incoming records.
    read_epoch: u16,

    /// Current packetization bound. Starts at the configured MTU, clamped
    /// to the transport's fallback MTU after repeated timeouts.
    mtu: usize,
}

impl<R: RecordLayer> Engine<R> {
    pub fn new(config: Arc<Config>, record_layer: R) -> Self {
        let store = IncomingStore::new(config.max_message_size());
        let timer = RetransmitTimer::new(config.initial_rto());
        let mtu = config.mtu();

        Engine {
            config,
            record_layer,
            buffers_free: BufferPool::default(),
            store,
            flight: Flight::new(),
            timer,
            next_send_seq: 0,
            write_epoch: 0,
            read_epoch: 0,
            mtu,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn record_layer(&self) -> &R {
        &self.record_layer
    }

    pub fn record_layer_mut(&mut self) -> &mut R {
        &mut self.record_layer
    }

    /// Epoch outgoing records are sealed under.
    pub fn write_epoch(&self) -> u16 {
        self.write_epoch
    }

    /// Epoch incoming records are expected under.
    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    /// Advance the write epoch after a rekey. Messages already queued keep
    /// the epoch they were created under.
    pub fn bump_write_epoch(&mut self) -> Result<(), Error> {
        self.write_epoch = self
            .write_epoch
            .checked_add(1)
            .ok_or(Error::Internal("write epoch overflow"))?;
        debug!("Write epoch is now {}", self.write_epoch);
        Ok(())
    }

    /// Advance the read epoch after the peer's rekey.
    pub fn bump_read_epoch(&mut self) -> Result<(), Error> {
        self.read_epoch = self
            .read_epoch
            .checked_add(1)
            .ok_or(Error::Internal("read epoch overflow"))?;
        debug!("Read epoch is now {}", self.read_epoch);
        Ok(())
    }

    /// Number of times the current flight has timed out.
    pub fn retransmit_count(&self) -> u32 {
        self.timer.timeout_count()
    }

    /// Current packetization bound.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Apply a path MTU discovered by the surrounding connection.
    ///
    /// Takes effect from the next packet, including retransmissions of the
    /// current flight.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), Error> {
        if mtu < MIN_MTU {
            return Err(Error::Config("mtu below minimum path MTU"));
        }
        debug!("Packetization MTU set to {}", mtu);
        self.mtu = mtu;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Append one composed handshake message to the current flight.
    ///
    /// Assigns the next message sequence number, stamps the message with
    /// the current write epoch, and feeds the unfragmented form into the
    /// transcript. If the previous flight was already completed, it is
    /// superseded.
    pub fn queue_message(&mut self, msg_type: u8, body: &[u8]) -> Result<(), Error> {
        if body.len() > self.config.max_message_size() {
            return Err(Error::ExcessiveMessageSize(body.len()));
        }

        let message_seq = self.next_send_seq;

        self.flight.append(OutgoingMessage {
            msg_type,
            message_seq,
            body: Buf::from_slice(body),
            epoch: self.write_epoch,
            is_ccs: false,
        })?;
        self.next_send_seq += 1;

        // Transcript sees the message whole, never its fragments.
        let header = FragmentHeader {
            msg_type,
            length: body.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        };
        let mut full = self.buffers_free.pop();
        header.serialize(&mut full);
        full.extend_from_slice(body);
        self.record_layer.transcript_update(&full);
        self.buffers_free.push(full);

        trace!(
            "Queued message_seq {} type {} ({} bytes, epoch {})",
            message_seq,
            msg_type,
            body.len(),
            self.write_epoch
        );

        Ok(())
    }

    /// Append a ChangeCipherSpec to the current flight.
    ///
    /// CCS has no sequence number and never enters the transcript.
    pub fn queue_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.flight.append(OutgoingMessage {
            msg_type: 0,
            message_seq: 0,
            body: Buf::from_slice(&[CCS_BODY]),
            epoch: self.write_epoch,
            is_ccs: true,
        })
    }

    /// Mark the flight complete, arm the retransmission timer and make the
    /// first send pass.
    pub fn flight_complete<T: Transport>(
        &mut self,
        transport: &mut T,
        now: Instant,
    ) -> Result<IoStatus, Error> {
        if self.flight.is_empty() {
            return Err(Error::Internal("completing an empty flight"));
        }

        let first_arm = !self.flight.is_complete();
        self.flight.mark_complete();

        if first_arm {
            debug!("Flight complete: {:?}", self.flight);
            self.timer.reset();
        }
        self.timer.arm(now);

        self.flush(transport)
    }

    /// Continue sending the current flight from the stored cursor.
    ///
    /// Resumable: a blocked write leaves the cursor where it was and the
    /// identical packet is regenerated on the next call.
    pub fn flush<T: Transport>(&mut self, transport: &mut T) -> Result<IoStatus, Error> {
        if self.flight.is_sent() {
            return Ok(IoStatus::Done);
        }

        let mut scratch = self.buffers_free.pop();
        let mut packet = self.buffers_free.pop();

        let result = self.flush_inner(transport, &mut scratch, &mut packet);

        self.buffers_free.push(scratch);
        self.buffers_free.push(packet);
        result
    }

    fn flush_inner<T: Transport>(
        &mut self,
        transport: &mut T,
        scratch: &mut Buf,
        packet: &mut Buf,
    ) -> Result<IoStatus, Error> {
        loop {
            let cursor = self.flight.next_packet(
                self.mtu,
                self.write_epoch,
                &mut self.record_layer,
                scratch,
                packet,
            )?;

            let Some(cursor) = cursor else {
                return Ok(IoStatus::Done);
            };

            match transport.write_packet(packet)? {
                IoStatus::Done => self.flight.commit_cursor(cursor),
                IoStatus::WouldBlock => {
                    trace!("Transport blocked, cursor stays at {:?}", self.flight);
                    return Ok(IoStatus::WouldBlock);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Timeout path
    // ------------------------------------------------------------------

    /// Deadline the caller should wake us at, if any.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timer.poll_timeout()
    }

    /// Check the retransmission timer against `now`.
    ///
    /// On expiry the backoff doubles and the whole flight is resent from
    /// the start; after the limit the handshake is abandoned with
    /// `ReadTimeoutExpired`.
    pub fn handle_timeout<T: Transport>(
        &mut self,
        now: Instant,
        transport: &mut T,
    ) -> Result<IoStatus, Error> {
        if !self.timer.is_expired(now) {
            return Ok(IoStatus::Done);
        }

        let action = self.timer.on_expiry(now)?;

        if action.query_fallback_mtu {
            if let Some(fallback) = transport.query_fallback_mtu() {
                let clamped = fallback.clamp(MIN_MTU, self.config.mtu());
                debug!("Clamping packetization to fallback MTU {}", clamped);
                self.mtu = clamped;
            }
        }

        debug!(
            "Retransmit timeout {} (next rto {:?}), resending flight",
            self.timer.timeout_count(),
            self.timer.rto()
        );

        self.flight.rewind();
        self.flush(transport)
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Process one received datagram.
    ///
    /// Opens each record, splits handshake payloads into fragment records
    /// and dispatches them into the receive window. Any complete message
    /// observed while our flight is out counts as a reply and stops the
    /// retransmission timer (the flight data stays resendable).
    pub fn handle_packet(&mut self, datagram: &[u8]) -> Result<(), Error> {
        let mut plaintext = self.buffers_free.pop();
        let result = self.handle_packet_inner(datagram, &mut plaintext);
        self.buffers_free.push(plaintext);
        result
    }

    fn handle_packet_inner(&mut self, datagram: &[u8], plaintext: &mut Buf) -> Result<(), Error> {
        let mut offset = 0;

        while offset < datagram.len() {
            plaintext.clear();
            let (content_type, used) = self
                .record_layer
                .open_record(&datagram[offset..], plaintext)?;
            offset += used;

            match content_type {
                ContentType::Handshake => {
                    for fragment in fragments(plaintext) {
                        let fragment = fragment?;
                        let outcome = self.store.feed(&fragment)?;
                        if outcome == FeedOutcome::Complete {
                            self.note_reply();
                        }
                    }
                }
                ContentType::ChangeCipherSpec => {
                    if plaintext.len() != 1 || plaintext[0] != CCS_BODY {
                        return Err(Error::MalformedHeader);
                    }
                    debug!("ChangeCipherSpec received");
                    self.store.set_ccs_pending();
                    self.note_reply();
                }
                other => {
                    // Alerts and application data belong to the layers
                    // around us.
                    debug!("Ignoring record of type {:?}", other);
                }
            }
        }

        Ok(())
    }

    fn note_reply(&mut self) {
        if self.flight.is_complete() && !self.flight.got_reply() {
            debug!("Reply observed, stopping retransmission timer");
            self.flight.set_got_reply();
            self.timer.disarm();
        }
    }

    // ------------------------------------------------------------------
    // Consumption
    // ------------------------------------------------------------------

    /// Whether the next in-order message is fully reassembled.
    pub fn is_current_message_complete(&self) -> bool {
        self.store.is_current_complete()
    }

    /// Release the next in-order message, feeding it into the transcript.
    ///
    /// Returns `None` until the message at the front of the window is
    /// complete; messages are never delivered early or out of order.
    pub fn next_message(&mut self) -> Option<CompleteMessage> {
        let message = self.store.take_current()?;

        let header = FragmentHeader {
            msg_type: message.msg_type,
            length: message.body.len() as u32,
            message_seq: message.message_seq,
            fragment_offset: 0,
            fragment_length: message.body.len() as u32,
        };
        let mut full = self.buffers_free.pop();
        header.serialize(&mut full);
        full.extend_from_slice(&message.body);
        self.record_layer.transcript_update(&full);
        self.buffers_free.push(full);

        trace!(
            "Delivering message_seq {} type {} ({} bytes)",
            message.message_seq,
            message.msg_type,
            message.body.len()
        );

        Some(message)
    }

    /// Take a pending received ChangeCipherSpec, if any.
    pub fn take_change_cipher_spec(&mut self) -> bool {
        self.store.take_ccs_pending()
    }

    /// True if buffered incoming data still needs attention: a complete
    /// front message, later fragments, or a pending ChangeCipherSpec.
    pub fn has_unprocessed_data(&self) -> bool {
        self.store.has_unprocessed_data()
    }
}
