// SPDX-License-Identifier: Apache-2.0

//! The stateful connection engine: ties packet protection, the three
//! packet-number spaces, stream multiplexing, loss recovery, and the
//! connection lifetime state machine into a single-threaded event loop
//! driven by the caller feeding in datagrams, timer expirations, and
//! application calls.
//!
//! This type never touches a socket or a TLS library. The embedder is
//! responsible for receiving/sending datagrams, driving the handshake, and
//! handing this connection the resulting secrets via `install_*_keys`.

use crate::{
    cid_manager::{derive_stateless_reset_token, LocalIdRegistry, RemoteIdRegistry},
    close::{CloseState, LifetimeState},
    config::Config,
    crypto::{derive_directional_keys, CipherSuite, DirectionalKeys, HeaderProtectionKey, InitialKeys, KeyPhase, KeyPhaseLadder},
    error::{ConnectionError, LocalError, PeerError},
    packet_protection::{apply_header_protection, remove_header_protection, HeaderForm},
    recovery_manager::LossRecovery,
    space::{AckTracker, PacketNumberAllocator},
    stream::{RecvBuffer, SendBuffer, SendState, StreamManager, StreamScheduler},
    subscriber::{KeyUpdated, NoopSubscriber, PacketLost, PacketReceived, PacketSent, Subscriber},
};
use alloc::{boxed::Box, vec::Vec};
use core::time::Duration;
use hashbrown::HashMap;
use quic_core::{
    connection_id::{ConnectionId, StatelessResetToken},
    frame::{self, Frame},
    interval_set::Range,
    packet::{
        header::{LongHeader, LongPacketType, ShortHeader, QUIC_VERSION_1},
        PacketNumber, PacketNumberSpace, TruncatedPacketNumber,
    },
    recovery::{NewReno, RttEstimator},
    stream_id::{Direction, Side, StreamId},
    time::Timestamp,
    transport_error,
    transport_parameters::{TransportParameters, DEFAULT_ACK_DELAY_EXPONENT, DEFAULT_MAX_ACK_DELAY},
    varint::VarInt,
};
use quic_wire::{DecoderBuffer, Encoder, EncoderBuffer, EncoderValue};

/// Bytes of padding an Initial packet is grown to before address
/// validation, per RFC 9000 §14.1's anti-amplification floor.
const MIN_INITIAL_PACKET_SIZE: usize = 1200;

/// Conservative upper bound on a single UDP datagram this engine emits;
/// comfortably under the common 1500-byte Ethernet MTU once IP/UDP headers
/// are accounted for.
const MAX_DATAGRAM_SIZE: usize = 1350;

/// Every cipher suite this crate supports uses a 16-byte AEAD tag (AES-GCM
/// and ChaCha20-Poly1305 alike), so packet assembly can budget for it
/// without borrowing the key first.
const AEAD_TAG_LEN: usize = 16;

/// A generously large flow-control window for the Initial/Handshake/1-RTT
/// CRYPTO streams: the handshake data itself is bounded by the TLS
/// capability, not by peer-driven flow control.
const CRYPTO_STREAM_WINDOW: u64 = 1 << 32;

struct SpaceContext {
    ack_tracker: AckTracker,
    recovery: LossRecovery,
    packet_numbers: PacketNumberAllocator,
    /// Frames carried by each still-in-flight packet number, consulted on
    /// ACK/loss to reconcile send-buffer state.
    sent_frames: HashMap<u64, Vec<SentFrame>>,
}

impl SpaceContext {
    fn new(space: PacketNumberSpace, max_ack_delay: Duration) -> Self {
        Self {
            ack_tracker: AckTracker::new(space, max_ack_delay),
            recovery: LossRecovery::new(space),
            packet_numbers: PacketNumberAllocator::new(space),
            sent_frames: HashMap::new(),
        }
    }

    fn largest_received(&self) -> Option<PacketNumber> {
        self.ack_tracker.largest_received()
    }
}

/// The frames a single sent packet carried, recorded so a later ACK or
/// loss declaration for that packet number knows what to reconcile.
enum SentFrame {
    Crypto { offset: u64, len: u64 },
    Stream { id: StreamId, offset: u64, len: u64 },
    HandshakeDone,
}

struct ApplicationKeys {
    tx_header: HeaderProtectionKey,
    rx_header: HeaderProtectionKey,
    tx: KeyPhaseLadder,
    rx: KeyPhaseLadder,
}

enum HandshakeKeys {
    NotAvailable,
    Available { tx: DirectionalKeys, rx: DirectionalKeys },
}

/// Data the application has queued to hand the TLS capability, or that the
/// TLS capability has produced for us to send, for one packet-number space.
/// Backed by the same send/receive buffers stream data uses, just with a
/// window generous enough that handshake flow control never binds.
struct CryptoStream {
    send: SendBuffer,
    recv: RecvBuffer,
}

impl CryptoStream {
    fn new() -> Self {
        Self {
            send: SendBuffer::new(CRYPTO_STREAM_WINDOW),
            recv: RecvBuffer::new(CRYPTO_STREAM_WINDOW),
        }
    }
}

pub struct Connection {
    local_side: Side,
    config: Config,
    close: CloseState,
    streams: StreamManager,
    scheduler: StreamScheduler,
    local_cids: LocalIdRegistry,
    remote_cids: RemoteIdRegistry,

    initial_keys: InitialKeys,
    initial_space: SpaceContext,
    initial_crypto: CryptoStream,

    handshake_keys: HandshakeKeys,
    handshake_space: SpaceContext,
    handshake_crypto: CryptoStream,

    application_keys: Option<ApplicationKeys>,
    application_space: SpaceContext,
    application_crypto: CryptoStream,

    rtt: RttEstimator,
    congestion: NewReno,
    max_ack_delay: Duration,
    ack_delay_exponent: u8,

    handshake_confirmed: bool,
    /// Set once the server side has confirmed the handshake and still owes
    /// the client a HANDSHAKE_DONE frame.
    handshake_done_pending: bool,
    is_address_validated: bool,
    bytes_received_before_validation: u64,
    bytes_sent_before_validation: u64,

    peer_max_data: u64,
    sent_connection_data: u64,
    local_max_data: u64,
    local_max_data_sent: u64,
    delivered_connection_data: u64,
    /// A raised connection-level receive limit waiting to go out as MAX_DATA.
    max_data_to_send: Option<u64>,

    queued_new_connection_ids: Vec<(u64, ConnectionId, StatelessResetToken)>,
    queued_retire_connection_ids: Vec<u64>,

    /// RFC 9000 §17.4 latency spin bit to set on the next short header
    /// packet sent: echoed by the server, toggled by the client, each time
    /// a new largest application packet number is observed.
    spin_bit: bool,

    subscriber: Box<dyn Subscriber>,
}

impl Connection {
    /// Builds a client connection. `destination_cid` is the randomly chosen
    /// DCID the client addresses its first flight to.
    pub fn new_client(config: Config, destination_cid: ConnectionId, local_cid: ConnectionId) -> Self {
        Self::new(Side::Client, config, destination_cid, local_cid)
    }

    /// Builds a server connection from the client's chosen destination CID
    /// (used only to derive the shared Initial secret) and the server's own
    /// chosen local CID.
    pub fn new_server(config: Config, client_destination_cid: ConnectionId, local_cid: ConnectionId) -> Self {
        Self::new(Side::Server, config, client_destination_cid, local_cid)
    }

    fn new(local_side: Side, config: Config, initial_secret_cid: ConnectionId, local_cid: ConnectionId) -> Self {
        let max_ack_delay = DEFAULT_MAX_ACK_DELAY;
        let ack_delay_exponent = DEFAULT_ACK_DELAY_EXPONENT;
        let local_reset_token = derive_stateless_reset_token(&config.stateless_reset_key, &local_cid);
        let placeholder_remote_token = StatelessResetToken::from_bytes([0u8; 16]);

        Self {
            local_side,
            streams: StreamManager::new(
                local_side,
                0,
                0,
                config.max_bidi_remote_streams,
                config.max_uni_remote_streams,
                config.max_stream_write_buffer_size,
                config.max_stream_read_buffer_size,
            ),
            scheduler: StreamScheduler::new(),
            local_cids: LocalIdRegistry::new(local_cid, local_reset_token, config.active_connection_id_limit),
            remote_cids: RemoteIdRegistry::new(initial_secret_cid, placeholder_remote_token),

            initial_keys: crate::crypto::initial_keys(initial_secret_cid.as_bytes()),
            initial_space: SpaceContext::new(PacketNumberSpace::Initial, max_ack_delay),
            initial_crypto: CryptoStream::new(),

            handshake_keys: HandshakeKeys::NotAvailable,
            handshake_space: SpaceContext::new(PacketNumberSpace::Handshake, max_ack_delay),
            handshake_crypto: CryptoStream::new(),

            application_keys: None,
            application_space: SpaceContext::new(PacketNumberSpace::ApplicationData, max_ack_delay),
            application_crypto: CryptoStream::new(),

            rtt: RttEstimator::new(max_ack_delay),
            congestion: NewReno::new(1200),
            max_ack_delay,
            ack_delay_exponent,

            handshake_confirmed: false,
            handshake_done_pending: false,
            is_address_validated: local_side == Side::Client,
            bytes_received_before_validation: 0,
            bytes_sent_before_validation: 0,

            peer_max_data: 0,
            sent_connection_data: 0,
            local_max_data: config.max_conn_read_buffer_size,
            local_max_data_sent: config.max_conn_read_buffer_size,
            delivered_connection_data: 0,
            max_data_to_send: None,

            queued_new_connection_ids: Vec::new(),
            queued_retire_connection_ids: Vec::new(),

            spin_bit: false,
            subscriber: Box::new(NoopSubscriber),

            close: CloseState::new(),
            config,
        }
    }

    /// Replaces the default no-op event sink. Typically called once, right
    /// after construction, before the first `poll_transmit`/`receive_datagram`.
    pub fn set_subscriber(&mut self, subscriber: Box<dyn Subscriber>) {
        self.subscriber = subscriber;
    }

    // -- key installation, driven by the external TLS capability --------

    pub fn install_handshake_keys(&mut self, suite: CipherSuite, local_secret: [u8; 32], remote_secret: [u8; 32]) {
        let local_prk = ring::hkdf::Prk::new_less_safe(ring::hkdf::HKDF_SHA256, &local_secret);
        let remote_prk = ring::hkdf::Prk::new_less_safe(ring::hkdf::HKDF_SHA256, &remote_secret);
        self.handshake_keys = HandshakeKeys::Available {
            tx: derive_directional_keys(suite, &local_prk),
            rx: derive_directional_keys(suite, &remote_prk),
        };
    }

    pub fn install_application_keys(&mut self, suite: CipherSuite, local_secret: [u8; 32], remote_secret: [u8; 32]) {
        let local_prk = ring::hkdf::Prk::new_less_safe(ring::hkdf::HKDF_SHA256, &local_secret);
        let remote_prk = ring::hkdf::Prk::new_less_safe(ring::hkdf::HKDF_SHA256, &remote_secret);
        let tx_directional = derive_directional_keys(suite, &local_prk);
        let rx_directional = derive_directional_keys(suite, &remote_prk);
        self.application_keys = Some(ApplicationKeys {
            tx_header: tx_directional.header,
            rx_header: rx_directional.header,
            tx: KeyPhaseLadder::new(suite, local_secret),
            rx: KeyPhaseLadder::new(suite, remote_secret),
        });
    }

    /// The client calls this on receipt of HANDSHAKE_DONE; the server calls
    /// it once the TLS capability reports the handshake complete, which
    /// additionally queues HANDSHAKE_DONE for the client. Confirmation
    /// discards the Handshake space per RFC 9000 §4.9.2.
    pub fn on_handshake_confirmed(&mut self) {
        self.handshake_confirmed = true;
        self.is_address_validated = true;
        if self.local_side == Side::Server {
            self.handshake_done_pending = true;
            // The client's first packet landed on our transient sequence-0
            // CID; now that stable CIDs have had a chance to reach the
            // client via NEW_CONNECTION_ID, that one is retired (§4.6).
            let _ = self.local_cids.retire(0);
        }
    }

    pub fn crypto_outbound(&mut self, space: PacketNumberSpace, data: &[u8]) {
        self.crypto_stream_mut(space).send.write(data);
    }

    pub fn crypto_inbound(&mut self, space: PacketNumberSpace) -> Vec<u8> {
        let crypto = self.crypto_stream_mut(space);
        let mut out = alloc::vec![0u8; crypto.recv.readable_len()];
        let read = crypto.recv.read(&mut out);
        out.truncate(read);
        out
    }

    fn crypto_stream_mut(&mut self, space: PacketNumberSpace) -> &mut CryptoStream {
        match space {
            PacketNumberSpace::Initial => &mut self.initial_crypto,
            PacketNumberSpace::Handshake => &mut self.handshake_crypto,
            PacketNumberSpace::ApplicationData => &mut self.application_crypto,
        }
    }

    // -- transport parameters ---------------------------------------------

    /// Applies the peer's transport parameters once the TLS capability has
    /// decoded them. Streams opened before this point keep the configured
    /// defaults for their initial limits; only connection-level state and
    /// future stream limits move.
    pub fn on_peer_transport_parameters(&mut self, params: &TransportParameters) {
        self.peer_max_data = self.peer_max_data.max(params.initial_max_data.as_u64());
        self.streams
            .on_peer_max_streams(Direction::Bidirectional, params.initial_max_streams_bidi.as_u64());
        self.streams
            .on_peer_max_streams(Direction::Unidirectional, params.initial_max_streams_uni.as_u64());
        self.ack_delay_exponent = params.ack_delay_exponent;
        self.max_ack_delay = params.max_ack_delay;
        if let Some(token) = params.stateless_reset_token {
            self.remote_cids.set_initial_token(StatelessResetToken::from_bytes(token));
        }
    }

    /// Hands the engine a connection ID the embedder has freshly issued
    /// (sourcing the bytes and stateless reset token itself), queuing it
    /// for a NEW_CONNECTION_ID frame if the peer's limit allows it.
    pub fn issue_connection_id(&mut self, id: ConnectionId, token: StatelessResetToken) -> Option<u64> {
        let sequence_number = self.local_cids.issue(id, token)?;
        self.queued_new_connection_ids.push((sequence_number, id, token));
        Some(sequence_number)
    }

    // -- stream API -------------------------------------------------------

    pub fn open_stream(&mut self, direction: Direction) -> Result<StreamId, LocalError> {
        self.streams.open_local(direction)
    }

    pub fn accept_stream(&mut self) -> Option<StreamId> {
        self.streams.accept()
    }

    pub fn stream_write(&mut self, id: StreamId, bytes: &[u8]) -> Result<usize, LocalError> {
        let stream = self
            .streams
            .get_mut(id)
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let send = stream
            .send
            .as_mut()
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let written = send.write(bytes);
        if written > 0 {
            self.scheduler.mark_data_pending(id);
        }
        stream.writable_gate.unlock(!send.is_flow_blocked());
        Ok(written)
    }

    pub fn stream_finish(&mut self, id: StreamId) -> Result<(), LocalError> {
        let stream = self
            .streams
            .get_mut(id)
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let send = stream
            .send
            .as_mut()
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        send.finish();
        self.scheduler.mark_data_pending(id);
        Ok(())
    }

    pub fn stream_reset(&mut self, id: StreamId, error_code: VarInt) -> Result<(), LocalError> {
        let stream = self
            .streams
            .get_mut(id)
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let send = stream
            .send
            .as_mut()
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        send.reset(error_code);
        self.scheduler.mark_meta_pending(id);
        Ok(())
    }

    pub fn stream_stop_sending(&mut self, id: StreamId, error_code: VarInt) -> Result<(), LocalError> {
        let stream = self
            .streams
            .get_mut(id)
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let recv = stream
            .recv
            .as_mut()
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        recv.request_stop_sending(error_code);
        self.scheduler.mark_meta_pending(id);
        Ok(())
    }

    pub fn stream_read(&mut self, id: StreamId, out: &mut [u8]) -> Result<usize, LocalError> {
        let stream = self
            .streams
            .get_mut(id)
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let recv = stream
            .recv
            .as_mut()
            .ok_or_else(|| LocalError::new(transport_error::Error::STREAM_STATE_ERROR))?;
        let n = recv.read(out);
        stream.readable_gate.unlock(recv.readable_len() > 0);
        if recv.credit_update().is_some() {
            self.scheduler.mark_meta_pending(id);
        }
        self.delivered_connection_data += n as u64;
        if let Some(limit) = self.connection_credit_update() {
            self.max_data_to_send = Some(limit);
        }
        Ok(n)
    }

    /// RFC 9000 §4.1's eighth-window heuristic, applied to the connection
    /// level receive window instead of a single stream's.
    fn connection_credit_update(&mut self) -> Option<u64> {
        let new_limit = self.delivered_connection_data + self.local_max_data;
        if new_limit >= self.local_max_data_sent + self.local_max_data / 8 {
            self.local_max_data_sent = new_limit;
            Some(new_limit)
        } else {
            None
        }
    }

    // -- connection lifetime ----------------------------------------------

    pub fn close_locally(&mut self, error_code: VarInt, now: Timestamp) {
        let pto_base = self.rtt.pto_period();
        self.close.close_locally(LocalError::application(error_code), now, pto_base);
    }

    pub fn state(&self) -> LifetimeState {
        self.close.state()
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.close.error()
    }

    pub fn on_timeout(&mut self, now: Timestamp) {
        self.close.on_drain_timer_expired(now);
        self.close.on_idle_timer_expired(now);

        for space in [
            PacketNumberSpace::Initial,
            PacketNumberSpace::Handshake,
            PacketNumberSpace::ApplicationData,
        ] {
            if self.space_ctx(space).recovery.loss_timer().is_expired(now) {
                let lost = match space {
                    PacketNumberSpace::Initial => {
                        self.initial_space.recovery.detect_losses(now, &self.rtt, &mut self.congestion)
                    }
                    PacketNumberSpace::Handshake => {
                        self.handshake_space.recovery.detect_losses(now, &self.rtt, &mut self.congestion)
                    }
                    PacketNumberSpace::ApplicationData => {
                        self.application_space.recovery.detect_losses(now, &self.rtt, &mut self.congestion)
                    }
                };
                for (packet_number, _) in lost {
                    self.reconcile_lost(space, packet_number.as_u64(), now);
                }
            }
            if self.space_ctx(space).recovery.pto_timer().is_expired(now) {
                self.space_mut(space).recovery.on_pto_expired();
            }
        }
    }

    /// The earliest of every timer this connection is waiting on, for the
    /// caller to schedule its next wakeup around.
    pub fn next_timeout(&self) -> Option<Timestamp> {
        [
            self.close.drain_timer().expiration(),
            self.close.idle_timer().expiration(),
            self.close.close_retransmit_timer().expiration(),
            self.initial_space.recovery.loss_timer().expiration(),
            self.handshake_space.recovery.loss_timer().expiration(),
            self.application_space.recovery.loss_timer().expiration(),
            self.initial_space.recovery.pto_timer().expiration(),
            self.handshake_space.recovery.pto_timer().expiration(),
            self.application_space.recovery.pto_timer().expiration(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // -- receiving ----------------------------------------------------------

    /// Processes one datagram. A datagram may contain several coalesced
    /// packets; each is handled independently, and decryption failures on
    /// one do not prevent trying the next (RFC 9000 §12.2).
    pub fn receive_datagram(&mut self, datagram: &[u8], now: Timestamp) {
        self.bytes_received_before_validation = self.bytes_received_before_validation.saturating_add(datagram.len() as u64);
        let mut remaining = datagram;
        while !remaining.is_empty() {
            let consumed = self.receive_one_packet(remaining, now);
            match consumed {
                Some(n) if n > 0 => remaining = &remaining[n..],
                _ => break,
            }
        }
        let idle_timeout = self.config.negotiated_idle_timeout(Duration::ZERO);
        self.close.on_activity(now, idle_timeout);
    }

    fn receive_one_packet(&mut self, packet: &[u8], now: Timestamp) -> Option<usize> {
        if packet.is_empty() {
            return None;
        }
        if packet[0] & 0x80 != 0 {
            self.receive_long_header_packet(packet, now)
        } else {
            self.receive_short_header_packet(packet, now)
        }
    }

    fn receive_long_header_packet(&mut self, packet: &[u8], now: Timestamp) -> Option<usize> {
        let buffer = DecoderBuffer::new(packet);
        let ((header, length), after_header) = LongHeader::decode(buffer).ok()?;
        if header.version != QUIC_VERSION_1 {
            return None;
        }
        let header_len = packet.len() - after_header.len();
        let total_len = header_len + length.as_u64() as usize;
        if total_len > packet.len() {
            return None;
        }

        let space = match header.packet_type {
            LongPacketType::Initial => PacketNumberSpace::Initial,
            LongPacketType::Handshake => PacketNumberSpace::Handshake,
            LongPacketType::ZeroRtt | LongPacketType::Retry => return Some(total_len),
        };

        let rx_keys = match space {
            PacketNumberSpace::Initial => Some(self.initial_rx_keys()),
            PacketNumberSpace::Handshake => match &self.handshake_keys {
                HandshakeKeys::Available { rx, .. } => Some(rx),
                HandshakeKeys::NotAvailable => None,
            },
            PacketNumberSpace::ApplicationData => unreachable!(),
        };
        let Some(rx_keys) = rx_keys else {
            return Some(total_len);
        };

        let mut packet_copy = packet[..total_len].to_vec();
        let first_byte = remove_header_protection(&rx_keys.header, HeaderForm::Long, &mut packet_copy, header_len).ok()?;
        let pn_len = (first_byte & 0x03) as usize + 1;
        let truncated = TruncatedPacketNumber::from_bytes(space, &packet_copy[header_len..header_len + pn_len]);
        let largest_received = self.space_ctx(space).largest_received();
        let packet_number = truncated.expand(largest_received);

        let header_end = header_len + pn_len;
        let mut payload = packet_copy[header_end..total_len].to_vec();
        let aad = {
            let mut aad = packet_copy[..header_end].to_vec();
            aad[0] = first_byte;
            aad
        };
        if rx_keys.packet.decrypt(packet_number.as_u64(), &aad, &mut payload).is_err() {
            return Some(total_len);
        }

        if space == PacketNumberSpace::Handshake && self.local_side == Side::Server {
            // Successfully processing a Handshake-protected packet proves
            // the client received our Initial flight (RFC 9000 §8.1).
            self.is_address_validated = true;
        }

        self.handle_decoded_payload(space, packet_number, &payload, now);
        Some(total_len)
    }

    fn receive_short_header_packet(&mut self, packet: &[u8], now: Timestamp) -> Option<usize> {
        let dcid_len = self.config.local_connection_id_len;
        let header_len = 1 + dcid_len;

        // RFC 9000 §10.3.1: a packet too short to be a genuine 1-RTT packet
        // (header + shortest packet number + AEAD tag) might instead be a
        // stateless reset, recognized by its trailing 16 bytes.
        if packet.len() < header_len + 1 + AEAD_TAG_LEN {
            if self.matches_stateless_reset(packet) {
                self.close.on_stateless_reset();
            }
            return Some(packet.len());
        }

        let buffer = DecoderBuffer::new(packet);
        let (header, _after) = ShortHeader::decode(buffer, dcid_len).ok()?;
        let Some(app_keys) = self.application_keys.as_mut() else {
            return Some(packet.len());
        };

        let mut packet_copy = packet.to_vec();
        let first_byte = remove_header_protection(&app_keys.rx_header, HeaderForm::Short, &mut packet_copy, header_len).ok()?;
        let pn_len = (first_byte & 0x03) as usize + 1;
        let header_end = header_len + pn_len;
        let truncated = TruncatedPacketNumber::from_bytes(
            PacketNumberSpace::ApplicationData,
            &packet_copy[header_len..header_end],
        );
        let largest = self.application_space.largest_received();
        let packet_number = truncated.expand(largest);
        let is_new_largest = largest.map_or(true, |l| packet_number.as_u64() > l.as_u64());

        let observed_phase = KeyPhase::from_bit(first_byte & 0x04 != 0);
        let (key, is_update) = app_keys.rx.opener_for(packet_number.as_u64(), observed_phase);
        let mut payload = packet_copy[header_end..].to_vec();
        let aad = {
            let mut aad = packet_copy[..header_end].to_vec();
            aad[0] = first_byte;
            aad
        };
        if key.decrypt(packet_number.as_u64(), &aad, &mut payload).is_err() {
            let _ = app_keys.rx.on_integrity_failure();
            if self.matches_stateless_reset(packet) {
                self.close.on_stateless_reset();
            }
            return Some(packet.len());
        }
        if is_update {
            app_keys.rx.complete_update(packet_number.as_u64());
            self.subscriber.on_key_update(&KeyUpdated { timestamp: now });
        }

        if is_new_largest {
            let peer_spin = header.spin_bit();
            self.spin_bit = if self.local_side == Side::Server { peer_spin } else { !peer_spin };
        }

        self.handle_decoded_payload(PacketNumberSpace::ApplicationData, packet_number, &payload, now);
        Some(packet.len())
    }

    /// Checks `packet`'s trailing 16 bytes against every stateless reset
    /// token the peer has offered us, per RFC 9000 §10.3.1. Comparison is
    /// plain equality rather than constant-time, since this crate has no
    /// existing constant-time comparison dependency and the token space is
    /// large enough that a timing side channel buys an attacker little.
    fn matches_stateless_reset(&self, packet: &[u8]) -> bool {
        if packet.len() < 16 {
            return false;
        }
        let mut tail = [0u8; 16];
        tail.copy_from_slice(&packet[packet.len() - 16..]);
        self.remote_cids.matches_stateless_reset_token(&StatelessResetToken::from_bytes(tail))
    }

    fn handle_decoded_payload(&mut self, space: PacketNumberSpace, packet_number: PacketNumber, payload: &[u8], now: Timestamp) {
        let mut buffer = DecoderBuffer::new(payload);
        let mut is_ack_eliciting = false;
        while !buffer.is_empty() {
            let Ok((frame, rest)) = Frame::decode(buffer) else { break };
            is_ack_eliciting |= frame.is_ack_eliciting();
            self.handle_frame(space, frame, now);
            buffer = rest;
        }
        self.space_mut(space)
            .ack_tracker
            .on_packet_received(packet_number, is_ack_eliciting, now);
        self.subscriber.on_packet_received(&PacketReceived {
            space,
            packet_number: packet_number.as_u64(),
            timestamp: now,
        });
    }

    fn handle_frame(&mut self, space: PacketNumberSpace, frame: Frame<'_>, now: Timestamp) {
        match frame {
            Frame::Padding | Frame::Ping => {}
            Frame::Ack(ack) => self.handle_ack(space, ack, now),
            Frame::Crypto(crypto) => {
                let _ = self
                    .crypto_stream_mut(space)
                    .recv
                    .on_stream_frame(crypto.offset.as_u64(), crypto.data, false);
            }
            Frame::Stream(stream_frame) => self.handle_stream_frame(stream_frame),
            Frame::ResetStream(reset) => self.handle_reset_stream(reset),
            Frame::StopSending(stop) => self.handle_stop_sending(stop),
            Frame::MaxData(max_data) => {
                self.peer_max_data = self.peer_max_data.max(max_data.maximum_data.as_u64());
            }
            Frame::MaxStreamData(max_stream_data) => self.handle_max_stream_data(max_stream_data),
            Frame::MaxStreams(max_streams) => {
                let direction = if max_streams.is_unidirectional {
                    Direction::Unidirectional
                } else {
                    Direction::Bidirectional
                };
                self.streams.on_peer_max_streams(direction, max_streams.maximum_streams.as_u64());
            }
            Frame::DataBlocked(_) | Frame::StreamDataBlocked(_) | Frame::StreamsBlocked(_) => {
                // informational: the peer is flow-control blocked. Nothing
                // to act on until the application raises a limit itself.
            }
            Frame::NewConnectionId(new_id) => self.handle_new_connection_id(new_id),
            Frame::RetireConnectionId(retire) => {
                let _ = self.local_cids.on_peer_retire(retire.sequence_number.as_u64());
            }
            Frame::PathChallenge(_) | Frame::PathResponse(_) => {
                // path validation is out of scope; RFC 9000 permits ignoring
                // PATH_RESPONSE and would normally echo PATH_CHALLENGE, left
                // to a future migration feature.
            }
            Frame::ConnectionClose(close_frame) => {
                let error = if close_frame.is_application_error {
                    PeerError::Application(quic_core::application_error::Error::from_varint(close_frame.error_code))
                } else {
                    PeerError::Transport(transport_error::Error::new(close_frame.error_code, ""))
                };
                let pto_base = self.rtt.pto_period();
                self.close.on_peer_close(error, now, pto_base);
            }
            Frame::HandshakeDone => {
                if self.local_side == Side::Client {
                    self.on_handshake_confirmed();
                }
            }
            Frame::NewToken(_) => {}
        }
    }

    fn handle_ack(&mut self, space: PacketNumberSpace, ack: frame::AckFrame, now: Timestamp) {
        let ranges = expand_ack_ranges(&ack);
        let ack_delay = Duration::from_micros(ack.ack_delay.as_u64() << self.ack_delay_exponent);
        let handshake_confirmed = self.handshake_confirmed;

        let newly_acked = match space {
            PacketNumberSpace::Initial => self.initial_space.recovery.on_ack_received(
                &ranges,
                ack_delay,
                now,
                handshake_confirmed,
                &mut self.rtt,
                &mut self.congestion,
            ),
            PacketNumberSpace::Handshake => self.handshake_space.recovery.on_ack_received(
                &ranges,
                ack_delay,
                now,
                handshake_confirmed,
                &mut self.rtt,
                &mut self.congestion,
            ),
            PacketNumberSpace::ApplicationData => self.application_space.recovery.on_ack_received(
                &ranges,
                ack_delay,
                now,
                handshake_confirmed,
                &mut self.rtt,
                &mut self.congestion,
            ),
        };
        for (packet_number, _) in &newly_acked {
            self.reconcile_acked(space, packet_number.as_u64());
        }

        let lost = match space {
            PacketNumberSpace::Initial => self.initial_space.recovery.detect_losses(now, &self.rtt, &mut self.congestion),
            PacketNumberSpace::Handshake => self.handshake_space.recovery.detect_losses(now, &self.rtt, &mut self.congestion),
            PacketNumberSpace::ApplicationData => {
                self.application_space.recovery.detect_losses(now, &self.rtt, &mut self.congestion)
            }
        };
        for (packet_number, _) in lost {
            self.reconcile_lost(space, packet_number.as_u64(), now);
        }
    }

    fn take_sent_frames(&mut self, space: PacketNumberSpace, packet_number: u64) -> Option<Vec<SentFrame>> {
        self.space_mut(space).sent_frames.remove(&packet_number)
    }

    fn reconcile_acked(&mut self, space: PacketNumberSpace, packet_number: u64) {
        let Some(frames) = self.take_sent_frames(space, packet_number) else { return };
        for sent in frames {
            match sent {
                SentFrame::Crypto { offset, len } => {
                    let _ = self.crypto_stream_mut(space).send.on_acked(offset, len);
                }
                SentFrame::Stream { id, offset, len } => {
                    if let Some(stream) = self.streams.get_mut(id) {
                        if let Some(send) = stream.send.as_mut() {
                            let _ = send.on_acked(offset, len);
                        }
                    }
                }
                SentFrame::HandshakeDone => {}
            }
        }
    }

    fn reconcile_lost(&mut self, space: PacketNumberSpace, packet_number: u64, now: Timestamp) {
        let Some(frames) = self.take_sent_frames(space, packet_number) else { return };
        for sent in frames {
            match sent {
                SentFrame::Crypto { offset, len } => {
                    self.crypto_stream_mut(space).send.on_lost(offset, len);
                }
                SentFrame::Stream { id, offset, len } => {
                    if let Some(stream) = self.streams.get_mut(id) {
                        if let Some(send) = stream.send.as_mut() {
                            send.on_lost(offset, len);
                            self.scheduler.mark_data_pending(id);
                        }
                    }
                }
                SentFrame::HandshakeDone => {
                    self.handshake_done_pending = true;
                }
            }
        }
        self.subscriber.on_packet_lost(&PacketLost { space, packet_number, timestamp: now });
    }

    fn handle_stream_frame(&mut self, frame: frame::StreamFrame<'_>) {
        let stream_id = StreamId::from_varint(frame.stream_id);
        if self.streams.open_remote_implicit(stream_id).is_err() {
            return;
        }
        let Some(stream) = self.streams.get_mut(stream_id) else { return };
        let Some(recv) = stream.recv.as_mut() else { return };
        if recv
            .on_stream_frame(frame.offset.as_u64(), frame.data, frame.is_fin)
            .is_ok()
        {
            stream.readable_gate.unlock(recv.readable_len() > 0);
        }
    }

    fn handle_reset_stream(&mut self, frame: frame::ResetStreamFrame) {
        let stream_id = StreamId::from_varint(frame.stream_id);
        if self.streams.open_remote_implicit(stream_id).is_err() {
            return;
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            if let Some(recv) = stream.recv.as_mut() {
                let _ = recv.on_reset(frame.application_error_code, frame.final_size.as_u64());
                stream.readable_gate.unlock(true);
            }
        }
    }

    fn handle_stop_sending(&mut self, frame: frame::StopSendingFrame) {
        let stream_id = StreamId::from_varint(frame.stream_id);
        if let Some(stream) = self.streams.get_mut(stream_id) {
            if let Some(send) = stream.send.as_mut() {
                send.reset(frame.application_error_code);
                stream.writable_gate.unlock(true);
            }
        }
    }

    fn handle_max_stream_data(&mut self, frame: frame::MaxStreamDataFrame) {
        let stream_id = StreamId::from_varint(frame.stream_id);
        if let Some(stream) = self.streams.get_mut(stream_id) {
            if let Some(send) = stream.send.as_mut() {
                send.on_max_stream_data(frame.maximum_stream_data.as_u64());
                self.scheduler.mark_data_pending(stream_id);
                stream.writable_gate.unlock(!send.is_flow_blocked());
            }
        }
    }

    fn handle_new_connection_id(&mut self, frame: frame::NewConnectionIdFrame) {
        let id = frame.connection_id;
        if let Ok(to_retire) = self.remote_cids.on_new_connection_id(
            frame.sequence_number.as_u64(),
            frame.retire_prior_to.as_u64(),
            id,
            frame.stateless_reset_token,
        ) {
            self.queued_retire_connection_ids.extend(to_retire);
        }
    }

    // -- sending --------------------------------------------------------

    /// Produces the next datagram this connection wants sent, if any.
    /// Tries each packet-number space from oldest to newest so handshake
    /// traffic is never starved behind application data.
    pub fn poll_transmit(&mut self, now: Timestamp, out: &mut [u8]) -> Option<usize> {
        if self.close.state() == LifetimeState::Closing {
            if !self.close.should_retransmit_close(now) {
                return None;
            }
            let bytes = self.assemble_close_packet(now)?;
            self.close.on_close_retransmitted(now);
            return Some(copy_into(&bytes, out));
        }
        if self.close.state() == LifetimeState::PeerClosed {
            // RFC 9000 §10.2.2: exactly one more flight echoing our own
            // CONNECTION_CLOSE is allowed before moving to draining.
            let bytes = self.assemble_close_packet(now)?;
            self.close.on_peer_closed_flight_sent();
            return Some(copy_into(&bytes, out));
        }

        if let Some(bytes) = self.assemble_initial_packet(now) {
            return Some(copy_into(&bytes, out));
        }
        if let Some(bytes) = self.assemble_handshake_packet(now) {
            return Some(copy_into(&bytes, out));
        }
        if let Some(bytes) = self.assemble_application_packet(now) {
            return Some(copy_into(&bytes, out));
        }
        None
    }

    fn assemble_initial_packet(&mut self, now: Timestamp) -> Option<Vec<u8>> {
        self.assemble_long_header_packet(PacketNumberSpace::Initial, LongPacketType::Initial, now)
    }

    fn assemble_handshake_packet(&mut self, now: Timestamp) -> Option<Vec<u8>> {
        if !matches!(self.handshake_keys, HandshakeKeys::Available { .. }) {
            return None;
        }
        self.assemble_long_header_packet(PacketNumberSpace::Handshake, LongPacketType::Handshake, now)
    }

    fn assemble_long_header_packet(&mut self, space: PacketNumberSpace, packet_type: LongPacketType, now: Timestamp) -> Option<Vec<u8>> {
        let ack_frame_data = self
            .space_ctx(space)
            .ack_tracker
            .ack_frame_data(now, self.ack_delay_exponent)
            .filter(|_| self.space_ctx(space).ack_tracker.should_send_ack(now));
        let crypto_chunk = self.crypto_stream_mut(space).send.pending_range(900);

        if ack_frame_data.is_none() && crypto_chunk.is_none() {
            return None;
        }

        let header = LongHeader {
            packet_type,
            version: QUIC_VERSION_1,
            destination_cid: self.remote_cid(),
            source_cid: self.local_cid(),
            token: Vec::new(),
            first_byte: 0,
        };

        let largest_acked = self.space_ctx(space).recovery.largest_acked();
        let packet_number = self.space_mut(space).packet_numbers.allocate();
        let truncated = packet_number.truncate(largest_acked);
        let pn_len = truncated.len();
        let pn_len_bits = (pn_len - 1) as u8;

        let mut storage = [0u8; MAX_DATAGRAM_SIZE];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let length_offset = header.encode_with_length_placeholder(pn_len_bits, &mut encoder);
        let pn_offset = encoder.len();
        let mut pn_bytes = [0u8; 4];
        truncated.encode_to(&mut pn_bytes[..pn_len]);
        encoder.write_slice(&pn_bytes[..pn_len]);
        let header_end = encoder.len();

        let mut sent_frames = Vec::new();
        let mut is_ack_eliciting = false;

        if let Some(ref ack_data) = ack_frame_data {
            let ack = frame::AckFrame {
                largest_acknowledged: ack_data.largest_acknowledged,
                ack_delay: ack_data.ack_delay,
                ack_ranges: build_ack_ranges(&ack_data.ranges),
                ecn_counts: None,
            };
            if encode_if_fits(&Frame::Ack(ack), &mut encoder, AEAD_TAG_LEN) {
                self.space_mut(space).ack_tracker.on_ack_sent(now);
            }
        }

        if let Some((offset, data, _is_fin)) = crypto_chunk {
            let crypto_frame = frame::CryptoFrame {
                offset: VarInt::new(offset).unwrap_or(VarInt::MAX),
                data: &data,
            };
            if encode_if_fits(&Frame::Crypto(crypto_frame), &mut encoder, AEAD_TAG_LEN) {
                let len = data.len() as u64;
                self.crypto_stream_mut(space).send.on_sent(offset, len);
                sent_frames.push(SentFrame::Crypto { offset, len });
                is_ack_eliciting = true;
            }
        }

        if sent_frames.is_empty() && ack_frame_data.is_none() {
            return None;
        }

        if space == PacketNumberSpace::Initial && self.local_side == Side::Client {
            let target = MIN_INITIAL_PACKET_SIZE.saturating_sub(AEAD_TAG_LEN);
            while encoder.len() < target && encoder.remaining_capacity() > 0 {
                encoder.write_slice(&[0u8]);
            }
        }

        let payload_len = encoder.len() - header_end;
        let length_value = (pn_len + payload_len + AEAD_TAG_LEN) as u64;
        encoder.set_slice_at(length_offset, &two_byte_varint(length_value));

        if is_ack_eliciting {
            let sent_bytes = (encoder.len() + AEAD_TAG_LEN) as u64;
            match space {
                PacketNumberSpace::Initial => {
                    self.initial_space
                        .recovery
                        .on_packet_sent(packet_number, sent_bytes, true, true, now, &mut self.congestion);
                    self.initial_space.recovery.arm_pto(now, &self.rtt, self.max_ack_delay);
                }
                PacketNumberSpace::Handshake => {
                    self.handshake_space
                        .recovery
                        .on_packet_sent(packet_number, sent_bytes, true, true, now, &mut self.congestion);
                    self.handshake_space.recovery.arm_pto(now, &self.rtt, self.max_ack_delay);
                }
                PacketNumberSpace::ApplicationData => unreachable!("long-header assembly never targets 1-RTT"),
            }
            self.space_mut(space).sent_frames.insert(packet_number.as_u64(), sent_frames);
            self.subscriber.on_packet_sent(&PacketSent {
                space,
                packet_number: packet_number.as_u64(),
                len: sent_bytes as usize,
                timestamp: now,
            });
        }

        let cleartext = encoder.as_slice();
        let mut header_bytes = cleartext[..header_end].to_vec();
        let mut payload_bytes = cleartext[header_end..].to_vec();
        let aad = header_bytes.clone();
        let tx_keys = self.tx_keys(space)?;
        tx_keys.packet.encrypt(packet_number.as_u64(), &aad, &mut payload_bytes).ok()?;
        header_bytes.extend_from_slice(&payload_bytes);
        apply_header_protection(&tx_keys.header, HeaderForm::Long, &mut header_bytes, pn_offset, pn_len).ok()?;

        if !self.record_sent_bytes(header_bytes.len()) {
            return None;
        }
        Some(header_bytes)
    }

    fn assemble_application_packet(&mut self, now: Timestamp) -> Option<Vec<u8>> {
        if self.application_keys.is_none() {
            return None;
        }

        let ack_frame_data = self
            .application_space
            .ack_tracker
            .ack_frame_data(now, self.ack_delay_exponent)
            .filter(|_| self.application_space.ack_tracker.should_send_ack(now));

        let largest_acked = self.application_space.recovery.largest_acked();
        let packet_number = self.application_space.packet_numbers.allocate();
        let truncated = packet_number.truncate(largest_acked);
        let pn_len = truncated.len();
        let pn_len_bits = (pn_len - 1) as u8;
        let key_phase = self.application_keys.as_ref().unwrap().tx.phase().bit();

        let header = ShortHeader {
            destination_cid: self.remote_cid(),
            first_byte: 0,
        };

        let mut storage = [0u8; MAX_DATAGRAM_SIZE];
        let mut encoder = EncoderBuffer::new(&mut storage);
        header.encode(pn_len_bits, key_phase, self.spin_bit, &mut encoder);
        let pn_offset = encoder.len();
        let mut pn_bytes = [0u8; 4];
        truncated.encode_to(&mut pn_bytes[..pn_len]);
        encoder.write_slice(&pn_bytes[..pn_len]);
        let header_end = encoder.len();

        let mut sent_frames = Vec::new();
        let mut is_ack_eliciting = false;

        if let Some(ref ack_data) = ack_frame_data {
            let ack = frame::AckFrame {
                largest_acknowledged: ack_data.largest_acknowledged,
                ack_delay: ack_data.ack_delay,
                ack_ranges: build_ack_ranges(&ack_data.ranges),
                ecn_counts: None,
            };
            if encode_if_fits(&Frame::Ack(ack), &mut encoder, AEAD_TAG_LEN) {
                self.application_space.ack_tracker.on_ack_sent(now);
            }
        }

        if self.handshake_done_pending && encode_if_fits(&Frame::HandshakeDone, &mut encoder, AEAD_TAG_LEN) {
            self.handshake_done_pending = false;
            sent_frames.push(SentFrame::HandshakeDone);
            is_ack_eliciting = true;
        }

        if let Some(limit) = self.max_data_to_send {
            let max_data = Frame::MaxData(frame::MaxDataFrame {
                maximum_data: VarInt::new(limit).unwrap_or(VarInt::MAX),
            });
            if encode_if_fits(&max_data, &mut encoder, AEAD_TAG_LEN) {
                self.max_data_to_send = None;
                is_ack_eliciting = true;
            }
        }

        if let Some(stream_id) = self.scheduler.next_meta() {
            match self.build_meta_frame(stream_id) {
                Some(meta_frame) if encode_if_fits(&meta_frame, &mut encoder, AEAD_TAG_LEN) => {
                    is_ack_eliciting = true;
                }
                Some(_) => self.scheduler.mark_meta_pending(stream_id),
                None => {}
            }
        }

        if let Some(stream_id) = self.scheduler.next_data() {
            let conn_budget = self.peer_max_data.saturating_sub(self.sent_connection_data) as usize;
            if conn_budget == 0 {
                self.scheduler.mark_data_pending(stream_id);
            } else if let Some(stream) = self.streams.get_mut(stream_id) {
                if let Some(send) = stream.send.as_mut() {
                    // Leave headroom for the STREAM frame's own tag/length
                    // fields alongside the AEAD tag reserved below.
                    let max_len = encoder
                        .remaining_capacity()
                        .saturating_sub(AEAD_TAG_LEN)
                        .saturating_sub(16)
                        .min(conn_budget);
                    if let Some((offset, data, is_fin)) = send.pending_range(max_len) {
                        let stream_frame = frame::StreamFrame {
                            stream_id: stream_id.as_varint(),
                            offset: VarInt::new(offset).unwrap_or(VarInt::MAX),
                            data: &data,
                            is_fin,
                        };
                        if encode_if_fits(&Frame::Stream(stream_frame), &mut encoder, AEAD_TAG_LEN) {
                            let len = data.len() as u64;
                            send.on_sent(offset, len);
                            self.sent_connection_data += len;
                            sent_frames.push(SentFrame::Stream { id: stream_id, offset, len });
                            is_ack_eliciting = true;
                            if send.has_pending() {
                                self.scheduler.mark_data_pending(stream_id);
                            }
                        }
                    }
                }
            }
        }

        if sent_frames.is_empty() && ack_frame_data.is_none() {
            return None;
        }

        if is_ack_eliciting {
            let sent_bytes = (encoder.len() + AEAD_TAG_LEN) as u64;
            self.application_space
                .recovery
                .on_packet_sent(packet_number, sent_bytes, true, true, now, &mut self.congestion);
            self.application_space.recovery.arm_pto(now, &self.rtt, self.max_ack_delay);
            if !sent_frames.is_empty() {
                self.application_space.sent_frames.insert(packet_number.as_u64(), sent_frames);
            }
            self.subscriber.on_packet_sent(&PacketSent {
                space: PacketNumberSpace::ApplicationData,
                packet_number: packet_number.as_u64(),
                len: sent_bytes as usize,
                timestamp: now,
            });
        }

        let cleartext = encoder.as_slice();
        let mut header_bytes = cleartext[..header_end].to_vec();
        let mut payload_bytes = cleartext[header_end..].to_vec();
        let aad = header_bytes.clone();
        let app_keys = self.application_keys.as_ref()?;
        app_keys
            .tx
            .active_key()
            .encrypt(packet_number.as_u64(), &aad, &mut payload_bytes)
            .ok()?;
        header_bytes.extend_from_slice(&payload_bytes);
        apply_header_protection(&app_keys.tx_header, HeaderForm::Short, &mut header_bytes, pn_offset, pn_len).ok()?;

        if !self.record_sent_bytes(header_bytes.len()) {
            return None;
        }
        Some(header_bytes)
    }

    /// One RESET_STREAM/STOP_SENDING/MAX_STREAM_DATA frame per packet, in
    /// that priority order; the scheduler re-marks the stream if more than
    /// one is pending so it is serviced on a later turn.
    fn build_meta_frame(&mut self, stream_id: StreamId) -> Option<Frame<'static>> {
        let stream = self.streams.get_mut(stream_id)?;
        if let Some(send) = stream.send.as_ref() {
            if matches!(send.state(), SendState::Reset) {
                if let Some(code) = send.reset_error_code() {
                    return Some(Frame::ResetStream(frame::ResetStreamFrame {
                        stream_id: stream_id.as_varint(),
                        application_error_code: code,
                        final_size: VarInt::new(send.final_size().unwrap_or(0)).unwrap_or(VarInt::MAX),
                    }));
                }
            }
        }
        if let Some(recv) = stream.recv.as_mut() {
            if let Some(code) = recv.pending_stop_sending() {
                return Some(Frame::StopSending(frame::StopSendingFrame {
                    stream_id: stream_id.as_varint(),
                    application_error_code: code,
                }));
            }
            if let Some(new_limit) = recv.credit_update() {
                return Some(Frame::MaxStreamData(frame::MaxStreamDataFrame {
                    stream_id: stream_id.as_varint(),
                    maximum_stream_data: VarInt::new(new_limit).unwrap_or(VarInt::MAX),
                }));
            }
        }
        None
    }

    fn assemble_close_packet(&mut self, now: Timestamp) -> Option<Vec<u8>> {
        let local = match self.close.error()? {
            ConnectionError::Local(local) => local,
            // We are echoing a close while draining the peer's own
            // CONNECTION_CLOSE; RFC 9000 §10.2.2 permits a minimal reply.
            ConnectionError::Peer(_) | ConnectionError::Closed => LocalError::new(transport_error::Error::NO_ERROR),
        };

        if self.application_keys.is_some() {
            self.assemble_application_close_packet(now, local)
        } else if matches!(self.handshake_keys, HandshakeKeys::Available { .. }) {
            self.assemble_long_header_close_packet(PacketNumberSpace::Handshake, LongPacketType::Handshake, now, local)
        } else {
            self.assemble_long_header_close_packet(PacketNumberSpace::Initial, LongPacketType::Initial, now, local)
        }
    }

    fn close_frame(local: LocalError) -> Frame<'static> {
        Frame::ConnectionClose(frame::ConnectionCloseFrame {
            is_application_error: local.is_application,
            error_code: local.code.code,
            frame_type: local.code.frame_type,
            reason: b"",
        })
    }

    fn assemble_long_header_close_packet(
        &mut self,
        space: PacketNumberSpace,
        packet_type: LongPacketType,
        now: Timestamp,
        local: LocalError,
    ) -> Option<Vec<u8>> {
        let header = LongHeader {
            packet_type,
            version: QUIC_VERSION_1,
            destination_cid: self.remote_cid(),
            source_cid: self.local_cid(),
            token: Vec::new(),
            first_byte: 0,
        };

        let largest_acked = self.space_ctx(space).recovery.largest_acked();
        let packet_number = self.space_mut(space).packet_numbers.allocate();
        let truncated = packet_number.truncate(largest_acked);
        let pn_len = truncated.len();

        let mut storage = [0u8; MAX_DATAGRAM_SIZE];
        let mut encoder = EncoderBuffer::new(&mut storage);
        let length_offset = header.encode_with_length_placeholder((pn_len - 1) as u8, &mut encoder);
        let pn_offset = encoder.len();
        let mut pn_bytes = [0u8; 4];
        truncated.encode_to(&mut pn_bytes[..pn_len]);
        encoder.write_slice(&pn_bytes[..pn_len]);
        let header_end = encoder.len();

        if !encode_if_fits(&Self::close_frame(local), &mut encoder, AEAD_TAG_LEN) {
            return None;
        }

        let payload_len = encoder.len() - header_end;
        let length_value = (pn_len + payload_len + AEAD_TAG_LEN) as u64;
        encoder.set_slice_at(length_offset, &two_byte_varint(length_value));

        let cleartext = encoder.as_slice();
        let mut header_bytes = cleartext[..header_end].to_vec();
        let mut payload_bytes = cleartext[header_end..].to_vec();
        let aad = header_bytes.clone();
        let tx_keys = self.tx_keys(space)?;
        tx_keys.packet.encrypt(packet_number.as_u64(), &aad, &mut payload_bytes).ok()?;
        header_bytes.extend_from_slice(&payload_bytes);
        apply_header_protection(&tx_keys.header, HeaderForm::Long, &mut header_bytes, pn_offset, pn_len).ok()?;

        if !self.record_sent_bytes(header_bytes.len()) {
            return None;
        }
        Some(header_bytes)
    }

    fn assemble_application_close_packet(&mut self, now: Timestamp, local: LocalError) -> Option<Vec<u8>> {
        let largest_acked = self.application_space.recovery.largest_acked();
        let packet_number = self.application_space.packet_numbers.allocate();
        let truncated = packet_number.truncate(largest_acked);
        let pn_len = truncated.len();
        let key_phase = self.application_keys.as_ref()?.tx.phase().bit();

        let header = ShortHeader {
            destination_cid: self.remote_cid(),
            first_byte: 0,
        };

        let mut storage = [0u8; MAX_DATAGRAM_SIZE];
        let mut encoder = EncoderBuffer::new(&mut storage);
        header.encode((pn_len - 1) as u8, key_phase, self.spin_bit, &mut encoder);
        let pn_offset = encoder.len();
        let mut pn_bytes = [0u8; 4];
        truncated.encode_to(&mut pn_bytes[..pn_len]);
        encoder.write_slice(&pn_bytes[..pn_len]);
        let header_end = encoder.len();

        if !encode_if_fits(&Self::close_frame(local), &mut encoder, AEAD_TAG_LEN) {
            return None;
        }

        let cleartext = encoder.as_slice();
        let mut header_bytes = cleartext[..header_end].to_vec();
        let mut payload_bytes = cleartext[header_end..].to_vec();
        let aad = header_bytes.clone();
        let app_keys = self.application_keys.as_ref()?;
        app_keys
            .tx
            .active_key()
            .encrypt(packet_number.as_u64(), &aad, &mut payload_bytes)
            .ok()?;
        header_bytes.extend_from_slice(&payload_bytes);
        apply_header_protection(&app_keys.tx_header, HeaderForm::Short, &mut header_bytes, pn_offset, pn_len).ok()?;

        let _ = now;
        if !self.record_sent_bytes(header_bytes.len()) {
            return None;
        }
        Some(header_bytes)
    }

    /// RFC 9000 §14.1: before the server has validated the client's
    /// address, it may send at most 3x the bytes it has received. Returns
    /// `false` (without recording anything) if `len` would cross that
    /// budget; otherwise records `len` as sent and returns `true`.
    fn record_sent_bytes(&mut self, len: usize) -> bool {
        if self.local_side == Side::Server && !self.is_address_validated {
            let budget = self.bytes_received_before_validation.saturating_mul(3);
            if self.bytes_sent_before_validation.saturating_add(len as u64) > budget {
                return false;
            }
        }
        self.bytes_sent_before_validation = self.bytes_sent_before_validation.saturating_add(len as u64);
        true
    }

    // -- space accessors ----------------------------------------------------

    fn space_mut(&mut self, space: PacketNumberSpace) -> &mut SpaceContext {
        match space {
            PacketNumberSpace::Initial => &mut self.initial_space,
            PacketNumberSpace::Handshake => &mut self.handshake_space,
            PacketNumberSpace::ApplicationData => &mut self.application_space,
        }
    }

    fn space_ctx(&self, space: PacketNumberSpace) -> &SpaceContext {
        match space {
            PacketNumberSpace::Initial => &self.initial_space,
            PacketNumberSpace::Handshake => &self.handshake_space,
            PacketNumberSpace::ApplicationData => &self.application_space,
        }
    }

    fn initial_rx_keys(&self) -> &DirectionalKeys {
        match self.local_side {
            Side::Client => &self.initial_keys.server,
            Side::Server => &self.initial_keys.client,
        }
    }

    fn initial_tx_keys(&self) -> &DirectionalKeys {
        match self.local_side {
            Side::Client => &self.initial_keys.client,
            Side::Server => &self.initial_keys.server,
        }
    }

    /// The Initial/Handshake transmit keys for `space`; `None` if the
    /// Handshake keys have not been installed yet. Never called for
    /// `ApplicationData`, which uses the key-update ladder instead.
    fn tx_keys(&self, space: PacketNumberSpace) -> Option<&DirectionalKeys> {
        match space {
            PacketNumberSpace::Initial => Some(self.initial_tx_keys()),
            PacketNumberSpace::Handshake => match &self.handshake_keys {
                HandshakeKeys::Available { tx, .. } => Some(tx),
                HandshakeKeys::NotAvailable => None,
            },
            PacketNumberSpace::ApplicationData => None,
        }
    }

    fn local_cid(&self) -> ConnectionId {
        self.local_cids.active_ids().next().map(|(_, id)| id).unwrap_or(ConnectionId::EMPTY)
    }

    fn remote_cid(&self) -> ConnectionId {
        self.remote_cids.current().unwrap_or(ConnectionId::EMPTY)
    }
}

fn copy_into(bytes: &[u8], out: &mut [u8]) -> usize {
    let n = bytes.len().min(out.len());
    out[..n].copy_from_slice(&bytes[..n]);
    n
}

/// Reconstructs the actual, half-open `[start, end)` packet-number ranges
/// an ACK frame's wire-format gap/length pairs describe (RFC 9000 §19.3),
/// most recent range first.
fn expand_ack_ranges(ack: &frame::AckFrame) -> Vec<(u64, u64)> {
    let mut ranges = Vec::with_capacity(ack.ack_ranges.len());
    let largest = ack.largest_acknowledged.as_u64();
    let first_len = ack.ack_ranges[0].1.as_u64();
    let mut smallest = largest.saturating_sub(first_len);
    ranges.push((smallest, largest + 1));

    for (gap, len) in ack.ack_ranges.iter().skip(1) {
        let gap = gap.as_u64();
        let len = len.as_u64();
        let Some(new_largest) = smallest.checked_sub(gap + 2) else { break };
        let new_smallest = new_largest.saturating_sub(len);
        ranges.push((new_smallest, new_largest + 1));
        smallest = new_smallest;
    }

    ranges
}

/// The send-side counterpart of `expand_ack_ranges`: turns the
/// already-descending actual packet-number ranges `AckTracker` tracks back
/// into the wire's gap/length pairs.
fn build_ack_ranges(ranges: &[Range]) -> Vec<(VarInt, VarInt)> {
    let mut out = Vec::with_capacity(ranges.len());
    let first = ranges[0];
    let first_len = (first.end - first.start).saturating_sub(1);
    out.push((VarInt::ZERO, VarInt::new(first_len).unwrap_or(VarInt::MAX)));

    let mut prev_smallest = first.start;
    for range in &ranges[1..] {
        let gap = prev_smallest.saturating_sub(range.end).saturating_sub(1);
        let len = (range.end - range.start).saturating_sub(1);
        out.push((VarInt::new(gap).unwrap_or(VarInt::MAX), VarInt::new(len).unwrap_or(VarInt::MAX)));
        prev_smallest = range.start;
    }

    out
}

/// Encodes `value` as RFC 9000 §16's 2-byte varint form, for patching a
/// reserved length placeholder once the real length is known.
fn two_byte_varint(value: u64) -> [u8; 2] {
    [0x40 | (value >> 8) as u8, (value & 0xff) as u8]
}

/// Encodes `frame` into a scratch buffer and copies it into `encoder` only
/// if it (plus `reserve` bytes left over for the AEAD tag) still fits.
fn encode_if_fits(frame: &Frame<'_>, encoder: &mut EncoderBuffer<'_>, reserve: usize) -> bool {
    let mut scratch = [0u8; MAX_DATAGRAM_SIZE];
    let mut scratch_encoder = EncoderBuffer::new(&mut scratch);
    frame.encode(&mut scratch_encoder);
    let bytes = scratch_encoder.as_slice();
    if bytes.len() + reserve > encoder.remaining_capacity() {
        return false;
    }
    encoder.write_slice(bytes);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_core::varint::VarInt;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    fn cid(b: u8) -> ConnectionId {
        ConnectionId::try_from_bytes(&[b; 8]).unwrap()
    }

    fn client() -> Connection {
        Connection::new_client(Config::default(), cid(1), cid(2))
    }

    fn server() -> Connection {
        Connection::new_server(Config::default(), cid(1), cid(2))
    }

    #[test]
    fn fresh_client_has_no_application_traffic_yet() {
        let mut conn = client();
        let mut out = [0u8; 1500];
        // No crypto data queued yet, so nothing (not even an Initial) to send.
        assert!(conn.poll_transmit(ts(1), &mut out).is_none());
    }

    #[test]
    fn queued_crypto_data_produces_an_initial_packet() {
        let mut conn = client();
        conn.crypto_outbound(PacketNumberSpace::Initial, b"client hello");
        let mut out = [0u8; 1500];
        let n = conn.poll_transmit(ts(1), &mut out).expect("an Initial packet should be produced");
        assert!(n >= MIN_INITIAL_PACKET_SIZE);
        assert_eq!(out[0] & 0xc0, 0xc0);
    }

    #[test]
    fn client_and_server_initial_round_trip_crypto_data() {
        let mut client = client();
        let mut server = server();

        client.crypto_outbound(PacketNumberSpace::Initial, b"client hello");
        let mut datagram = [0u8; 1500];
        let n = client.poll_transmit(ts(1), &mut datagram).unwrap();

        server.receive_datagram(&datagram[..n], ts(2));
        assert_eq!(server.crypto_inbound(PacketNumberSpace::Initial), b"client hello");
    }

    #[test]
    fn expand_and_build_ack_ranges_round_trip() {
        let ack = frame::AckFrame {
            largest_acknowledged: VarInt::new(10).unwrap(),
            ack_delay: VarInt::ZERO,
            ack_ranges: alloc::vec![(VarInt::ZERO, VarInt::new(2).unwrap()), (VarInt::new(1).unwrap(), VarInt::ZERO)],
            ecn_counts: None,
        };
        let expanded = expand_ack_ranges(&ack);
        // largest=10, first_len=2 -> [7, 11); gap=1,len=0 -> next largest = 7 - (1+2) = 4 -> [4,5)
        assert_eq!(expanded, alloc::vec![(7, 11), (4, 5)]);

        let ranges: Vec<Range> = expanded.iter().map(|&(start, end)| Range { start, end }).collect();
        let rebuilt = build_ack_ranges(&ranges);
        assert_eq!(rebuilt, ack.ack_ranges);
    }

    #[test]
    fn two_byte_varint_matches_header_test_vector() {
        assert_eq!(two_byte_varint(0x49e), [0x44, 0x9e]);
    }

    #[test]
    fn server_enforces_anti_amplification_before_validation() {
        let mut server = server();
        assert!(!server.record_sent_bytes(1000));
        server.bytes_received_before_validation = 100;
        assert!(server.record_sent_bytes(250));
        assert!(!server.record_sent_bytes(100));
    }

    #[test]
    fn handshake_confirmation_queues_handshake_done_for_the_server() {
        let mut server = server();
        server.on_handshake_confirmed();
        assert!(server.handshake_done_pending);
    }

    #[test]
    fn opening_a_stream_before_peer_limits_arrive_is_rejected() {
        let mut conn = client();
        assert!(conn.open_stream(Direction::Bidirectional).is_err());
        conn.streams.on_peer_max_streams(Direction::Bidirectional, 1);
        assert!(conn.open_stream(Direction::Bidirectional).is_ok());
    }

    #[test]
    fn server_retires_the_transient_initial_dcid_on_handshake_confirmation() {
        let mut server = server();
        assert!(server.local_cids.active_ids().any(|(seq, _)| seq == 0));
        server.on_handshake_confirmed();
        assert!(!server.local_cids.active_ids().any(|(seq, _)| seq == 0));
    }

    #[test]
    fn client_does_not_retire_any_local_cid_on_handshake_confirmation() {
        let mut client = client();
        client.on_handshake_confirmed();
        assert!(client.local_cids.active_ids().any(|(seq, _)| seq == 0));
    }

    #[test]
    fn a_short_stub_packet_matching_the_peers_reset_token_closes_the_connection() {
        let mut client = client();
        let token = StatelessResetToken::from_bytes([5u8; 16]);
        client.remote_cids.set_initial_token(token);

        let mut stub = alloc::vec![0x40u8; 20];
        let len = stub.len();
        stub[len - 16..].copy_from_slice(token.as_bytes());

        client.receive_datagram(&stub, ts(1));
        assert_eq!(client.state(), LifetimeState::Done);
    }

    #[test]
    fn a_short_stub_packet_with_an_unrecognized_tail_is_ignored() {
        let mut client = client();
        client.remote_cids.set_initial_token(StatelessResetToken::from_bytes([5u8; 16]));

        let stub = alloc::vec![0u8; 20];
        client.receive_datagram(&stub, ts(1));
        assert_eq!(client.state(), LifetimeState::Alive);
    }

    #[test]
    fn subscriber_observes_packet_sent_events() {
        use alloc::rc::Rc;
        use core::cell::RefCell;

        struct Counting(Rc<RefCell<u32>>);
        impl Subscriber for Counting {
            fn on_packet_sent(&mut self, _event: &PacketSent) {
                *self.0.borrow_mut() += 1;
            }
        }

        let sent = Rc::new(RefCell::new(0));
        let mut conn = client();
        conn.set_subscriber(Box::new(Counting(sent.clone())));
        conn.crypto_outbound(PacketNumberSpace::Initial, b"client hello");
        let mut out = [0u8; 1500];
        conn.poll_transmit(ts(1), &mut out).expect("an Initial packet should be produced");

        assert_eq!(*sent.borrow(), 1);
    }
}
