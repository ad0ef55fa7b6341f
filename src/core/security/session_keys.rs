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

//! Per-session SDP encryption facade.
//!
//! Two variants share one contract: the **secret-backed** cipher seals
//! with our rotating shared secret (the peer opens with its saved copy),
//! the **ECDH-backed** cipher (click-to-call, no prior relation) seals
//! with a key agreed between the local twincode's private key and the
//! peer public key carried in the ciphertext header.
//!
//! Encrypted body layout (compact encoding):
//! `version(1) || session_id(16) || nonce_seq(varlong) ||`
//! `[ECDH: salt(16) || public_key(len,bytes)] || ciphertext+tag`

use crate::core::codec::wire::{Encoding, WireReader, WireWriter};
use crate::core::sdp::{Sdp, KEY_INDEX_ECDH, KEY_INDEX_PLAINTEXT, KEY_INDEX_SECRET1, KEY_INDEX_SECRET2};
use crate::core::security::keystore::SessionKeys;
use crate::core::security::primitives::{
    self, AeadBox, AeadRole, AgreementKey, AgreementPublicKey, KeyKind,
};
use crate::core::types::{ErrorCode, now_ms};
use uuid::Uuid;
use zeroize::Zeroizing;

const CIPHER_VERSION: u8 = 1;
const SALT_LEN: usize = 16;

fn aad_secret(session_id: &Uuid, nonce_seq: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(24);
    aad.extend_from_slice(session_id.as_bytes());
    aad.extend_from_slice(&nonce_seq.to_be_bytes());
    aad
}

fn aad_ecdh(salt: &[u8], header_pub: &[u8], session_id: &Uuid, nonce_seq: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(salt.len() + header_pub.len() + 24);
    aad.extend_from_slice(salt);
    aad.extend_from_slice(header_pub);
    aad.extend_from_slice(session_id.as_bytes());
    aad.extend_from_slice(&nonce_seq.to_be_bytes());
    aad
}

struct NonceBlock {
    next: u64,
    end: u64,
    count: u64,
}

impl NonceBlock {
    fn new(start: u64, count: u64) -> Self {
        Self {
            next: start,
            end: start + count,
            count,
        }
    }

    fn allocate(&mut self) -> Option<u64> {
        if self.next >= self.end {
            return None;
        }
        let n = self.next;
        self.next += 1;
        Some(n)
    }

    fn refresh(&mut self, start: u64) {
        self.next = start;
        self.end = start + self.count;
    }
}

/// Secret-backed session cipher.
pub struct SecretKeyPair {
    session_id: Uuid,
    secret: Zeroizing<Vec<u8>>,
    key_index: u8,
    secret_update_date: u64,
    peer_secret1: Option<Zeroizing<Vec<u8>>>,
    peer_secret2: Option<Zeroizing<Vec<u8>>>,
    block: NonceBlock,
    renew_delay_ms: u64,
}

/// ECDH-backed session cipher.
pub struct EcdhKeyPair {
    session_id: Uuid,
    kind: KeyKind,
    private: Zeroizing<Vec<u8>>,
    peer_public: Option<AgreementPublicKey>,
    block: NonceBlock,
}

/// The per-session encrypt/decrypt facade handed to the session state
/// machine when the session is created.
pub enum SessionKeyPair {
    /// Established relation: rotating shared secrets.
    Secret(SecretKeyPair),
    /// No prior relation: ECDH against the local twincode key.
    Ecdh(EcdhKeyPair),
}

impl SessionKeyPair {
    /// Build the cipher from keys leased out of the store.
    ///
    /// `peer_public` is required to *encrypt* in ECDH mode; decrypting
    /// uses the public key observed in the ciphertext header.
    pub fn from_keys(
        session_id: Uuid,
        keys: SessionKeys,
        peer_public: Option<AgreementPublicKey>,
        renew_delay_ms: u64,
    ) -> Self {
        match keys.secret {
            Some(secret) => SessionKeyPair::Secret(SecretKeyPair {
                session_id,
                secret: secret.bytes,
                key_index: secret.key_index,
                secret_update_date: secret.update_date,
                peer_secret1: keys.peer_secret1,
                peer_secret2: keys.peer_secret2,
                block: NonceBlock::new(keys.nonce_start, keys.nonce_count),
                renew_delay_ms,
            }),
            None => SessionKeyPair::Ecdh(EcdhKeyPair {
                session_id,
                kind: keys.kind,
                private: keys.agreement_private,
                peer_public,
                block: NonceBlock::new(keys.nonce_start, keys.nonce_count),
            }),
        }
    }

    /// True when the cipher seals with a rotating shared secret.
    pub fn is_secret_backed(&self) -> bool {
        matches!(self, SessionKeyPair::Secret(_))
    }

    /// Next nonce of the leased block, `None` when the block ran out.
    /// The caller must then lease a fresh block through the key store
    /// and call [`refresh`](Self::refresh) before retrying.
    pub fn allocate_nonce(&mut self) -> Option<u64> {
        match self {
            SessionKeyPair::Secret(s) => s.block.allocate(),
            SessionKeyPair::Ecdh(e) => e.block.allocate(),
        }
    }

    /// Size of the leased nonce block.
    pub fn sequence_count(&self) -> u64 {
        match self {
            SessionKeyPair::Secret(s) => s.block.count,
            SessionKeyPair::Ecdh(e) => e.block.count,
        }
    }

    /// Install a freshly leased nonce block.
    pub fn refresh(&mut self, nonce_start: u64) {
        match self {
            SessionKeyPair::Secret(s) => s.block.refresh(nonce_start),
            SessionKeyPair::Ecdh(e) => e.block.refresh(nonce_start),
        }
    }

    /// True when the backing secret is older than the renewal delay and
    /// the upper layer should trigger a rotation.
    pub fn needs_renew(&self) -> bool {
        match self {
            SessionKeyPair::Secret(s) => {
                s.secret_update_date > 0
                    && now_ms().saturating_sub(s.secret_update_date) > s.renew_delay_ms
            }
            SessionKeyPair::Ecdh(_) => false,
        }
    }

    /// Seal a plaintext SDP. Returns [`ErrorCode::Expired`] when the
    /// nonce block is exhausted (lease a new one and retry).
    pub fn encrypt(&mut self, sdp: &Sdp) -> Result<Sdp, ErrorCode> {
        if sdp.key_index != KEY_INDEX_PLAINTEXT {
            return Err(ErrorCode::EncryptError);
        }
        match self {
            SessionKeyPair::Secret(s) => s.encrypt(sdp),
            SessionKeyPair::Ecdh(e) => e.encrypt(sdp),
        }
    }

    /// Open a sealed SDP. The embedded session id must match the local
    /// one, otherwise the body is rejected with `BAD_SIGNATURE`.
    pub fn decrypt(&mut self, sdp: &Sdp) -> Result<Sdp, ErrorCode> {
        match self {
            SessionKeyPair::Secret(s) => s.decrypt(sdp),
            SessionKeyPair::Ecdh(e) => e.decrypt(sdp),
        }
    }

    /// Wipe private material. Dropping the cipher has the same effect;
    /// this makes the wipe point explicit at session teardown.
    pub fn dispose(self) {
        drop(self);
    }
}

fn write_header(session_id: &Uuid, nonce_seq: u64) -> WireWriter {
    let mut w = WireWriter::new(Encoding::Compact);
    w.write_u8(CIPHER_VERSION);
    w.write_uuid(session_id);
    w.write_long(nonce_seq as i64);
    w
}

struct Header<'a> {
    session_id: Uuid,
    nonce_seq: u64,
    reader: WireReader<'a>,
}

fn read_header(data: &[u8]) -> Result<Header<'_>, ErrorCode> {
    let mut r = WireReader::new(Encoding::Compact, data);
    let version = r.read_u8().map_err(|_| ErrorCode::BadEncryptionFormat)?;
    if version != CIPHER_VERSION {
        return Err(ErrorCode::BadEncryptionFormat);
    }
    let session_id = r.read_uuid().map_err(|_| ErrorCode::BadEncryptionFormat)?;
    let nonce_seq = r.read_long().map_err(|_| ErrorCode::BadEncryptionFormat)? as u64;
    Ok(Header {
        session_id,
        nonce_seq,
        reader: r,
    })
}

impl SecretKeyPair {
    fn encrypt(&mut self, sdp: &Sdp) -> Result<Sdp, ErrorCode> {
        let nonce_seq = self.block.allocate().ok_or(ErrorCode::Expired)?;
        let aead = AeadBox::bind_secret(&self.secret, AeadRole::Initiator)
            .map_err(|_| ErrorCode::NoSecretKey)?;
        let aad = aad_secret(&self.session_id, nonce_seq);
        let sealed = aead
            .encrypt(nonce_seq, &sdp.data, &aad)
            .map_err(|_| ErrorCode::EncryptError)?;

        let mut w = write_header(&self.session_id, nonce_seq);
        w.write_raw(&sealed);
        Ok(Sdp {
            data: w.into_bytes(),
            compressed: sdp.compressed,
            key_index: self.key_index,
        })
    }

    fn decrypt(&mut self, sdp: &Sdp) -> Result<Sdp, ErrorCode> {
        let peer_secret = match sdp.key_index {
            KEY_INDEX_SECRET1 => self.peer_secret1.as_ref(),
            KEY_INDEX_SECRET2 => self.peer_secret2.as_ref(),
            _ => None,
        }
        .ok_or(ErrorCode::NoSecretKey)?;

        let mut header = read_header(&sdp.data)?;
        if header.session_id != self.session_id {
            return Err(ErrorCode::BadSignature);
        }
        let ciphertext = header.reader.read_rest();
        let aead = AeadBox::bind_secret(peer_secret, AeadRole::Responder)
            .map_err(|_| ErrorCode::NoSecretKey)?;
        let aad = aad_secret(&self.session_id, header.nonce_seq);
        let plain = aead
            .decrypt(header.nonce_seq, ciphertext, &aad)
            .map_err(|_| ErrorCode::DecryptError)?;
        Ok(Sdp {
            data: plain,
            compressed: sdp.compressed,
            key_index: KEY_INDEX_PLAINTEXT,
        })
    }
}

impl EcdhKeyPair {
    fn encrypt(&mut self, sdp: &Sdp) -> Result<Sdp, ErrorCode> {
        let peer_public = self.peer_public.as_ref().ok_or(ErrorCode::NoPublicKey)?;
        let nonce_seq = self.block.allocate().ok_or(ErrorCode::Expired)?;

        let private = AgreementKey::from_bytes(self.kind, &self.private)
            .map_err(|_| ErrorCode::InvalidPrivateKey)?;
        let our_public = private.public_key().map_err(|_| ErrorCode::InvalidPrivateKey)?;

        let mut salt = [0u8; SALT_LEN];
        primitives::random_bytes(&mut salt).map_err(|_| ErrorCode::LibraryError)?;

        let aead = AeadBox::bind_agreement(AeadRole::Initiator, &private, peer_public, &salt)
            .map_err(|_| ErrorCode::EncryptError)?;
        let aad = aad_ecdh(&salt, our_public.as_bytes(), &self.session_id, nonce_seq);
        let sealed = aead
            .encrypt(nonce_seq, &sdp.data, &aad)
            .map_err(|_| ErrorCode::EncryptError)?;

        let mut w = write_header(&self.session_id, nonce_seq);
        w.write_raw(&salt);
        w.write_bytes(our_public.as_bytes());
        w.write_raw(&sealed);
        Ok(Sdp {
            data: w.into_bytes(),
            compressed: sdp.compressed,
            key_index: KEY_INDEX_ECDH,
        })
    }

    fn decrypt(&mut self, sdp: &Sdp) -> Result<Sdp, ErrorCode> {
        if sdp.key_index != KEY_INDEX_ECDH {
            return Err(ErrorCode::BadEncryptionFormat);
        }
        let mut header = read_header(&sdp.data)?;
        if header.session_id != self.session_id {
            return Err(ErrorCode::BadSignature);
        }
        let salt = header
            .reader
            .read_raw(SALT_LEN)
            .map_err(|_| ErrorCode::BadEncryptionFormat)?
            .to_vec();
        let header_pub_bytes = header
            .reader
            .read_bytes()
            .map_err(|_| ErrorCode::BadEncryptionFormat)?;
        let header_pub = AgreementPublicKey::from_bytes(self.kind, &header_pub_bytes)
            .map_err(|_| ErrorCode::InvalidPublicKey)?;
        let ciphertext = header.reader.read_rest();

        let private = AgreementKey::from_bytes(self.kind, &self.private)
            .map_err(|_| ErrorCode::InvalidPrivateKey)?;
        let aead = AeadBox::bind_agreement(AeadRole::Responder, &private, &header_pub, &salt)
            .map_err(|_| ErrorCode::DecryptError)?;
        let aad = aad_ecdh(&salt, &header_pub_bytes, &self.session_id, header.nonce_seq);
        let plain = aead
            .decrypt(header.nonce_seq, ciphertext, &aad)
            .map_err(|_| ErrorCode::DecryptError)?;
        Ok(Sdp {
            data: plain,
            compressed: sdp.compressed,
            key_index: KEY_INDEX_PLAINTEXT,
        })
    }
}
