// Copyright (c) 2026 Twincall
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Core types shared across the signaling and crypto layers: wire-stable
//! error and terminate-reason codes, the offer bitfield, identity handles,
//! canonical row encoding and the runtime configuration.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic, fixed-width integers).
fn bincode_opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules (used for persisted rows).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Database-local twincode row id. The network-visible identity is the
/// UUID held by the key store; this id keys the persisted tables.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TwincodeId(pub i64);

/// Service-level result code delivered to observers and ack IQs.
///
/// The integer values are part of the wire protocol and must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Operation completed.
    Success = 0,
    /// The signaling connection is down.
    Disconnected = 1,
    /// The broker rejected the request as temporarily unavailable.
    ServiceUnavailable = 2,
    /// The request deadline elapsed without a response.
    Timeout = 3,
    /// The broker refused the operation for this account.
    NoPermission = 4,
    /// The peer refused the operation.
    NotAuthorized = 5,
    /// No private key exists for the local twincode.
    NoPrivateKey = 6,
    /// The stored private key could not be parsed.
    InvalidPrivateKey = 7,
    /// The peer's public key is unknown.
    NoPublicKey = 8,
    /// The peer's public key could not be parsed.
    InvalidPublicKey = 9,
    /// No shared secret is established with the peer.
    NoSecretKey = 10,
    /// AEAD sealing failed.
    EncryptError = 11,
    /// AEAD opening failed (tag mismatch or malformed ciphertext).
    DecryptError = 12,
    /// A signature did not verify.
    BadSignature = 13,
    /// A signature payload was structurally invalid.
    BadSignatureFormat = 14,
    /// A required attribute was missing from a signed payload.
    BadSignatureMissAttribute = 15,
    /// An attribute was present but not covered by the signature.
    BadSignatureNotSignedAttribute = 16,
    /// An encrypted payload header was malformed.
    BadEncryptionFormat = 17,
    /// Unexpected failure inside a crypto library call.
    LibraryError = 18,
    /// The referenced room, session or row does not exist.
    ItemNotFound = 19,
    /// The referenced item's deadline has passed.
    Expired = 20,
    /// Persistent storage failed (after CAS retries were exhausted).
    DatabaseError = 21,
    /// A referenced local file does not exist.
    FileNotFound = 22,
    /// Persistent storage is out of space.
    NoStorageSpace = 23,
}

impl ErrorCode {
    /// Wire value.
    pub fn value(self) -> u32 {
        self as u32
    }

    /// Parse a wire value, mapping unknown codes to `LibraryError`.
    pub fn from_value(v: u32) -> Self {
        match v {
            0 => Self::Success,
            1 => Self::Disconnected,
            2 => Self::ServiceUnavailable,
            3 => Self::Timeout,
            4 => Self::NoPermission,
            5 => Self::NotAuthorized,
            6 => Self::NoPrivateKey,
            7 => Self::InvalidPrivateKey,
            8 => Self::NoPublicKey,
            9 => Self::InvalidPublicKey,
            10 => Self::NoSecretKey,
            11 => Self::EncryptError,
            12 => Self::DecryptError,
            13 => Self::BadSignature,
            14 => Self::BadSignatureFormat,
            15 => Self::BadSignatureMissAttribute,
            16 => Self::BadSignatureNotSignedAttribute,
            17 => Self::BadEncryptionFormat,
            18 => Self::LibraryError,
            19 => Self::ItemNotFound,
            20 => Self::Expired,
            21 => Self::DatabaseError,
            22 => Self::FileNotFound,
            23 => Self::NoStorageSpace,
            _ => Self::LibraryError,
        }
    }
}

/// Why a P2P session ended. Serialized as a stable integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TerminateReason {
    /// Normal hangup.
    Success = 0,
    /// Callee busy in another session.
    Busy = 1,
    /// Caller cancelled before accept.
    Cancel = 2,
    /// Media-level connectivity was lost.
    ConnectivityError = 3,
    /// Callee declined.
    Decline = 4,
    /// Signaling connection dropped.
    Disconnected = 5,
    /// Unclassified failure.
    GeneralError = 6,
    /// Peer endpoint no longer exists.
    Gone = 7,
    /// Peer refused the session.
    NotAuthorized = 8,
    /// The relation was revoked.
    Revoked = 9,
    /// No answer before the expiration deadline.
    Timeout = 10,
    /// Unknown remote reason code.
    Unknown = 11,
    /// Session transferred to another device.
    TransferDone = 12,
    /// Call rescheduled.
    Schedule = 13,
    /// Session replaced by a later join of the same member.
    Merge = 14,
    /// Local private key missing.
    NoPrivateKey = 15,
    /// No shared secret with the peer.
    NoSecretKey = 16,
    /// Inbound SDP failed to decrypt.
    DecryptError = 17,
    /// Outbound SDP failed to encrypt.
    EncryptError = 18,
    /// Peer public key missing.
    NoPublicKey = 19,
    /// Peer sent plaintext where encryption was required.
    NotEncrypted = 20,
}

impl TerminateReason {
    /// Wire value.
    pub fn value(self) -> u32 {
        self as u32
    }

    /// Parse a wire value, mapping unknown codes to `Unknown`.
    pub fn from_value(v: u32) -> Self {
        match v {
            0 => Self::Success,
            1 => Self::Busy,
            2 => Self::Cancel,
            3 => Self::ConnectivityError,
            4 => Self::Decline,
            5 => Self::Disconnected,
            6 => Self::GeneralError,
            7 => Self::Gone,
            8 => Self::NotAuthorized,
            9 => Self::Revoked,
            10 => Self::Timeout,
            11 => Self::Unknown,
            12 => Self::TransferDone,
            13 => Self::Schedule,
            14 => Self::Merge,
            15 => Self::NoPrivateKey,
            16 => Self::NoSecretKey,
            17 => Self::DecryptError,
            18 => Self::EncryptError,
            19 => Self::NoPublicKey,
            20 => Self::NotEncrypted,
            _ => Self::Unknown,
        }
    }
}

bitflags::bitflags! {
    /// Media offer bitfield carried in session IQs.
    ///
    /// Bits 8..=15 carry the encryption key index (see [`Offer::pack`]);
    /// they are masked out of the flag set.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Offer: u32 {
        /// Data channel requested.
        const DATA = 0x01;
        /// Audio track requested.
        const AUDIO = 0x02;
        /// Video track requested.
        const VIDEO = 0x04;
        /// Video-bell (one-way preview) requested.
        const VIDEO_BELL = 0x08;
        /// Session belongs to a group call room.
        const GROUP_CALL = 0x10;
        /// This SDP is an answer (session-update only).
        const ANSWER = 0x20;
        /// The SDP body is deflate-compressed.
        const COMPRESSED = 0x40;
        /// Session transfers a file rather than live media.
        const TRANSFER = 0x80;
    }
}

/// Mask of the 8-bit encryption key index inside the offer word.
pub const OFFER_ENCRYPT_MASK: u32 = 0x0000_FF00;
/// Shift of the encryption key index inside the offer word.
pub const OFFER_ENCRYPT_SHIFT: u32 = 8;

impl Offer {
    /// Pack flags and a key index into the 32-bit wire word.
    pub fn pack(self, key_index: u8) -> u32 {
        self.bits() | ((key_index as u32) << OFFER_ENCRYPT_SHIFT)
    }

    /// Split a wire word into flags and key index.
    pub fn unpack(word: u32) -> (Self, u8) {
        let key_index = ((word & OFFER_ENCRYPT_MASK) >> OFFER_ENCRYPT_SHIFT) as u8;
        (Self::from_bits_truncate(word), key_index)
    }
}

/// Runtime configuration for the signaling core.
///
/// All timings are milliseconds so tests can compress time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory (key store).
    pub data_dir: String,
    /// Silence interval before a session-ping is issued.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Outbound IQ response deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Background delay before the connection is dropped.
    #[serde(default = "default_background_disconnect_ms")]
    pub background_disconnect_ms: u64,
    /// Minimum foreground grace granted by a push wakeup.
    #[serde(default = "default_push_grace_ms")]
    pub push_grace_ms: u64,
    /// Maximum runtime of an alarm wakeup.
    #[serde(default = "default_alarm_service_ms")]
    pub alarm_service_ms: u64,
    /// Activity probe period during an alarm wakeup.
    #[serde(default = "default_alarm_probe_ms")]
    pub alarm_probe_ms: u64,
    /// Long reconnect delay when push delivery is available.
    #[serde(default = "default_reconnect_push_ms")]
    pub reconnect_push_ms: u64,
    /// Long reconnect delay when push delivery is unavailable.
    #[serde(default = "default_reconnect_no_push_ms")]
    pub reconnect_no_push_ms: u64,
    /// Floor for any reconnect delay.
    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u64,
    /// Age after which a shared secret should be rotated.
    #[serde(default = "default_secret_renew_ms")]
    pub secret_renew_ms: u64,
    /// SDP size above which deflate compression is applied.
    #[serde(default = "default_sdp_compress_threshold")]
    pub sdp_compress_threshold: usize,
}

fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    20_000
}
fn default_background_disconnect_ms() -> u64 {
    10_000
}
fn default_push_grace_ms() -> u64 {
    4_000
}
fn default_alarm_service_ms() -> u64 {
    25_000
}
fn default_alarm_probe_ms() -> u64 {
    1_500
}
fn default_reconnect_push_ms() -> u64 {
    2 * 3_600_000
}
fn default_reconnect_no_push_ms() -> u64 {
    30 * 60_000
}
fn default_reconnect_min_ms() -> u64 {
    10 * 60_000
}
fn default_secret_renew_ms() -> u64 {
    30 * 24 * 3_600_000
}
fn default_sdp_compress_threshold() -> usize {
    256
}

impl CoreConfig {
    /// Parse a TOML configuration document.
    pub fn from_toml(text: &str) -> Result<Self, CodecError> {
        toml::from_str(text).map_err(|_| CodecError::Deserialize)
    }

    /// Config with production defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &str) -> Self {
        Self {
            data_dir: data_dir.to_string(),
            ping_interval_ms: default_ping_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            background_disconnect_ms: default_background_disconnect_ms(),
            push_grace_ms: default_push_grace_ms(),
            alarm_service_ms: default_alarm_service_ms(),
            alarm_probe_ms: default_alarm_probe_ms(),
            reconnect_push_ms: default_reconnect_push_ms(),
            reconnect_no_push_ms: default_reconnect_no_push_ms(),
            reconnect_min_ms: default_reconnect_min_ms(),
            secret_renew_ms: default_secret_renew_ms(),
            sdp_compress_threshold: default_sdp_compress_threshold(),
        }
    }
}

/// Milliseconds since the UNIX epoch, 0 if the clock is unavailable.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
