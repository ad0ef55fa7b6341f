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

//! Durable repository of twincode keys and per-pair shared secrets.
//!
//! Two logical tables backed by sled trees:
//! - `twincodeKeys(id, creationDate, modificationDate, flags,
//!   nonceSequence, signingKey, encryptionKey)`
//! - `secretKeys(id, peerTwincodeId, creationDate, modificationDate,
//!   secretUpdateDate, flags, nonceSequence, secret1, secret2)`
//!
//! A third tree maps twincode UUIDs to local row ids. Every mutation of
//! a `nonceSequence` or of the secret flags is a `compare_and_swap` on
//! the whole row; a failed CAS reruns the read. Nonce values are leased
//! in contiguous blocks and never reused.

use crate::core::security::primitives::{
    self, AgreementKey, AgreementPublicKey, CryptoError, KeyKind, SigningKey, TwincodeKeyPair,
    VerifyingKey,
};
use crate::core::types::{decode_canonical_limited, encode_canonical, now_ms, TwincodeId};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

/// Key store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("cas retries exhausted")]
    Database,
    #[error("row codec")]
    Codec,
    #[error("item not found")]
    NotFound,
    #[error("no private key")]
    NoPrivateKey,
    #[error("no secret key")]
    NoSecretKey,
    #[error("crypto")]
    Crypto,
}

impl From<CryptoError> for KeyStoreError {
    fn from(_: CryptoError) -> Self {
        KeyStoreError::Crypto
    }
}

/// Row holds the private halves.
pub const KEY_FLAG_PRIVATE: u32 = 0x01;
/// Row keys are ECDSA P-256 (default is X25519+Ed25519).
pub const KEY_FLAG_ECDSA: u32 = 0x02;
/// The relation behind this twincode is end-to-end encrypted.
pub const KEY_FLAG_ENCRYPT: u32 = 0x04;

/// Secret slot 1 is in use.
pub const SECRET_USE_1: u32 = 0x01;
/// Secret slot 2 is in use.
pub const SECRET_USE_2: u32 = 0x02;
/// Secret slot 1 holds a proposed secret awaiting validation.
pub const SECRET_NEW_1: u32 = 0x04;
/// Secret slot 2 holds a proposed secret awaiting validation.
pub const SECRET_NEW_2: u32 = 0x08;

/// Nonce values handed out per lease acquisition.
pub const NONCE_LEASE: u64 = 64;

const CAS_RETRIES: usize = 5;
const MAX_ROW: usize = 16 * 1024;

/// Secret mutation applied inside `load_twincode_key_with_secret`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretOption {
    /// No secret mutation.
    None,
    /// Set `USE_SECRET1` with a fresh secret, skipping the handshake.
    CreateSecret,
    /// Propose a first secret (`NEW_SECRET1`); idempotent.
    CreateFirstSecret,
    /// Propose the next secret in the free slot; idempotent.
    CreateNextSecret,
}

#[derive(Clone, Serialize, Deserialize)]
struct KeyInfoRow {
    creation_date: u64,
    modification_date: u64,
    flags: u32,
    nonce_sequence: u64,
    signing_key: Vec<u8>,
    encryption_key: Vec<u8>,
}

impl Drop for KeyInfoRow {
    fn drop(&mut self) {
        self.signing_key.zeroize();
        self.encryption_key.zeroize();
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct SecretPairRow {
    creation_date: u64,
    modification_date: u64,
    secret_update_date: u64,
    flags: u32,
    nonce_sequence: u64,
    secret1: Vec<u8>,
    secret2: Vec<u8>,
}

impl SecretPairRow {
    fn new(now: u64) -> Self {
        Self {
            creation_date: now,
            modification_date: now,
            secret_update_date: 0,
            flags: 0,
            nonce_sequence: 0,
            secret1: Vec::new(),
            secret2: Vec::new(),
        }
    }
}

impl Drop for SecretPairRow {
    fn drop(&mut self) {
        self.secret1.zeroize();
        self.secret2.zeroize();
    }
}

/// Read-only view of a twincode key row. Secret material is wiped when
/// the view is dropped.
pub struct KeyInfo {
    /// Row id.
    pub id: TwincodeId,
    /// Creation timestamp (ms).
    pub creation_date: u64,
    /// Last modification timestamp (ms).
    pub modification_date: u64,
    /// `KEY_FLAG_*` bits.
    pub flags: u32,
    /// Current nonce sequence head.
    pub nonce_sequence: u64,
    signing_key: Zeroizing<Vec<u8>>,
    encryption_key: Zeroizing<Vec<u8>>,
}

impl KeyInfo {
    fn from_row(id: TwincodeId, row: &KeyInfoRow) -> Self {
        Self {
            id,
            creation_date: row.creation_date,
            modification_date: row.modification_date,
            flags: row.flags,
            nonce_sequence: row.nonce_sequence,
            signing_key: Zeroizing::new(row.signing_key.clone()),
            encryption_key: Zeroizing::new(row.encryption_key.clone()),
        }
    }

    /// Keypair family of the row.
    pub fn kind(&self) -> KeyKind {
        if self.flags & KEY_FLAG_ECDSA != 0 {
            KeyKind::EcdsaP256
        } else {
            KeyKind::Curve25519
        }
    }

    /// True when the row holds the private halves.
    pub fn is_private(&self) -> bool {
        self.flags & KEY_FLAG_PRIVATE != 0
    }

    /// Private signing key (private rows only).
    pub fn signing_key(&self) -> Result<SigningKey, KeyStoreError> {
        if !self.is_private() {
            return Err(KeyStoreError::NoPrivateKey);
        }
        Ok(SigningKey::from_pkcs8(self.kind(), &self.signing_key)?)
    }

    /// Public verification key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, KeyStoreError> {
        if self.is_private() {
            let key = SigningKey::from_pkcs8(self.kind(), &self.signing_key)?;
            return Ok(key.public_key());
        }
        Ok(VerifyingKey::from_bytes(self.kind(), &self.signing_key)?)
    }

    /// Private agreement key (private rows only).
    pub fn agreement_key(&self) -> Result<AgreementKey, KeyStoreError> {
        if !self.is_private() {
            return Err(KeyStoreError::NoPrivateKey);
        }
        Ok(AgreementKey::from_bytes(self.kind(), &self.encryption_key)?)
    }

    /// Public agreement key.
    pub fn agreement_public(&self) -> Result<AgreementPublicKey, KeyStoreError> {
        if self.is_private() {
            let key = AgreementKey::from_bytes(self.kind(), &self.encryption_key)?;
            return Ok(key.public_key()?);
        }
        Ok(AgreementPublicKey::from_bytes(self.kind(), &self.encryption_key)?)
    }

    fn agreement_private_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.encryption_key.to_vec())
    }
}

/// Our sending secret as leased for one P2P session.
#[derive(Debug)]
pub struct SessionSecret {
    /// Secret bytes.
    pub bytes: Zeroizing<Vec<u8>>,
    /// Wire key index (1 for slot 1, 2 for slot 2).
    pub key_index: u8,
    /// When the secret was last rotated (ms), 0 if never validated.
    pub update_date: u64,
}

/// Everything a session cipher needs, cloned out of the store.
#[derive(Debug)]
pub struct SessionKeys {
    /// Keypair family of the local twincode.
    pub kind: KeyKind,
    /// Local private agreement bytes (ECDH-backed sessions).
    pub agreement_private: Zeroizing<Vec<u8>>,
    /// Our sending secret, when one is in use.
    pub secret: Option<SessionSecret>,
    /// Peer secret slot 1, when known.
    pub peer_secret1: Option<Zeroizing<Vec<u8>>>,
    /// Peer secret slot 2, when known.
    pub peer_secret2: Option<Zeroizing<Vec<u8>>>,
    /// First leased nonce value (greater than 0).
    pub nonce_start: u64,
    /// Number of leased values.
    pub nonce_count: u64,
}

/// Persistent key store.
pub struct KeyStore {
    db: sled::Db,
    twincodes: sled::Tree,
    keys: sled::Tree,
    secrets: sled::Tree,
}

fn id_key(id: TwincodeId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn secret_key_pair(id: TwincodeId, peer: Option<TwincodeId>) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.extend_from_slice(&id.0.to_be_bytes());
    match peer {
        Some(p) => {
            key.push(1);
            key.extend_from_slice(&p.0.to_be_bytes());
        }
        None => key.push(0),
    }
    key
}

impl KeyStore {
    /// Open (or create) the store under `path`.
    pub fn open(path: &str) -> Result<Self, KeyStoreError> {
        let db = sled::open(path).map_err(|_| KeyStoreError::DbOpen)?;
        let twincodes = db
            .open_tree("twincodes")
            .map_err(|_| KeyStoreError::DbOpen)?;
        let keys = db
            .open_tree("twincodeKeys")
            .map_err(|_| KeyStoreError::DbOpen)?;
        let secrets = db
            .open_tree("secretKeys")
            .map_err(|_| KeyStoreError::DbOpen)?;
        Ok(Self {
            db,
            twincodes,
            keys,
            secrets,
        })
    }

    /// Row id for a twincode UUID, if registered.
    pub fn twincode_id(&self, uuid: &Uuid) -> Result<Option<TwincodeId>, KeyStoreError> {
        let v = self
            .twincodes
            .get(uuid.as_bytes())
            .map_err(|_| KeyStoreError::DbIo)?;
        Ok(v.map(|iv| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&iv);
            TwincodeId(i64::from_be_bytes(b))
        }))
    }

    /// Allocate (or look up) the row id of a twincode, without key
    /// material. Used when a previously unseen peer twincode appears.
    pub fn register_twincode(&self, uuid: &Uuid) -> Result<TwincodeId, KeyStoreError> {
        if let Some(id) = self.twincode_id(uuid)? {
            return Ok(id);
        }
        let id = TwincodeId(self.db.generate_id().map_err(|_| KeyStoreError::DbIo)? as i64);
        match self
            .twincodes
            .compare_and_swap(
                uuid.as_bytes(),
                None as Option<&[u8]>,
                Some(&id.0.to_be_bytes()[..]),
            )
            .map_err(|_| KeyStoreError::DbIo)?
        {
            Ok(()) => Ok(id),
            // Lost the race: another caller registered it first.
            Err(_) => self.twincode_id(uuid)?.ok_or(KeyStoreError::DbIo),
        }
    }

    fn load_key_row(&self, id: TwincodeId) -> Result<Option<KeyInfoRow>, KeyStoreError> {
        let v = self.keys.get(id_key(id)).map_err(|_| KeyStoreError::DbIo)?;
        match v {
            None => Ok(None),
            Some(iv) => Ok(Some(
                decode_canonical_limited(&iv, MAX_ROW).map_err(|_| KeyStoreError::Codec)?,
            )),
        }
    }

    /// Idempotently create the private keypair of a twincode. An existing
    /// row is kept; otherwise a fresh keypair is generated and stored.
    pub fn insert_key(&self, uuid: &Uuid, kind: KeyKind) -> Result<TwincodeId, KeyStoreError> {
        let id = self.register_twincode(uuid)?;
        if self.load_key_row(id)?.is_some() {
            return Ok(id);
        }

        let pair = TwincodeKeyPair::generate(kind)?;
        let now = now_ms();
        let mut flags = KEY_FLAG_PRIVATE;
        if kind == KeyKind::EcdsaP256 {
            flags |= KEY_FLAG_ECDSA;
        }
        let row = KeyInfoRow {
            creation_date: now,
            modification_date: now,
            flags,
            nonce_sequence: 0,
            signing_key: pair.signing.pkcs8().to_vec(),
            encryption_key: pair.agreement.as_bytes().to_vec(),
        };
        let bytes = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
        match self
            .keys
            .compare_and_swap(id_key(id), None as Option<&[u8]>, Some(bytes))
            .map_err(|_| KeyStoreError::DbIo)?
        {
            Ok(()) => Ok(id),
            // Another caller inserted concurrently; theirs wins.
            Err(_) => Ok(id),
        }
    }

    /// Store the public keys of a peer twincode.
    pub fn save_peer_key(
        &self,
        uuid: &Uuid,
        kind: KeyKind,
        signing_public: &VerifyingKey,
        agreement_public: &AgreementPublicKey,
    ) -> Result<TwincodeId, KeyStoreError> {
        let id = self.register_twincode(uuid)?;
        if self.load_key_row(id)?.is_some() {
            return Ok(id);
        }
        let now = now_ms();
        let mut flags = 0;
        if kind == KeyKind::EcdsaP256 {
            flags |= KEY_FLAG_ECDSA;
        }
        let row = KeyInfoRow {
            creation_date: now,
            modification_date: now,
            flags,
            nonce_sequence: 0,
            signing_key: signing_public.as_bytes().to_vec(),
            encryption_key: agreement_public.as_bytes().to_vec(),
        };
        let bytes = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
        let _ = self
            .keys
            .compare_and_swap(id_key(id), None as Option<&[u8]>, Some(bytes))
            .map_err(|_| KeyStoreError::DbIo)?;
        Ok(id)
    }

    /// Read-only view of a twincode key row.
    pub fn load_twincode_key(&self, id: TwincodeId) -> Result<Option<KeyInfo>, KeyStoreError> {
        Ok(self.load_key_row(id)?.map(|row| KeyInfo::from_row(id, &row)))
    }

    /// Locate a peer's key row by twincode UUID.
    pub fn load_peer_encryption_key(&self, uuid: &Uuid) -> Result<Option<KeyInfo>, KeyStoreError> {
        match self.twincode_id(uuid)? {
            None => Ok(None),
            Some(id) => self.load_twincode_key(id),
        }
    }

    /// CAS loop over one row of `tree`. `apply` receives the current row
    /// bytes and produces the replacement plus the caller's result.
    fn update_row<T>(
        &self,
        tree: &sled::Tree,
        key: &[u8],
        apply: impl Fn(Option<&[u8]>) -> Result<(Option<Vec<u8>>, T), KeyStoreError>,
    ) -> Result<T, KeyStoreError> {
        for _ in 0..CAS_RETRIES {
            let current = tree.get(key).map_err(|_| KeyStoreError::DbIo)?;
            let (next, out) = apply(current.as_deref())?;
            let swap = tree
                .compare_and_swap(key, current.as_ref().map(|v| v.as_ref()), next)
                .map_err(|_| KeyStoreError::DbIo)?;
            match swap {
                Ok(()) => return Ok(out),
                Err(_) => continue,
            }
        }
        Err(KeyStoreError::Database)
    }

    /// Lease `lease` nonce values from the twincode key row (ECDH-backed
    /// sessions). Returns the first value of the block.
    pub fn lease_key_nonce(&self, id: TwincodeId, lease: u64) -> Result<u64, KeyStoreError> {
        self.update_row(&self.keys, &id_key(id), |current| {
            let bytes = current.ok_or(KeyStoreError::NotFound)?;
            let mut row: KeyInfoRow =
                decode_canonical_limited(bytes, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
            let start = row.nonce_sequence + 1;
            row.nonce_sequence += lease;
            row.modification_date = now_ms();
            let encoded = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
            Ok((Some(encoded), start))
        })
    }

    /// Lease `lease` nonce values from the secret pair row.
    pub fn lease_secret_nonce(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
        lease: u64,
    ) -> Result<u64, KeyStoreError> {
        let key = secret_key_pair(local, Some(peer));
        self.update_row(&self.secrets, &key, |current| {
            let bytes = current.ok_or(KeyStoreError::NoSecretKey)?;
            let mut row: SecretPairRow =
                decode_canonical_limited(bytes, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
            let start = row.nonce_sequence + 1;
            row.nonce_sequence += lease;
            row.modification_date = now_ms();
            let encoded = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
            Ok((Some(encoded), start))
        })
    }

    fn apply_secret_option(
        row: &mut SecretPairRow,
        option: SecretOption,
    ) -> Result<bool, KeyStoreError> {
        match option {
            SecretOption::None => Ok(false),
            SecretOption::CreateSecret => {
                let mut secret = vec![0u8; 32];
                primitives::random_bytes(&mut secret)?;
                row.secret1.zeroize();
                row.secret1 = secret;
                row.secret2.zeroize();
                row.secret2 = Vec::new();
                row.flags = SECRET_USE_1;
                row.secret_update_date = now_ms();
                Ok(true)
            }
            SecretOption::CreateFirstSecret => {
                if row.flags & (SECRET_USE_1 | SECRET_USE_2) != 0 || row.flags & SECRET_NEW_1 != 0 {
                    return Ok(false);
                }
                let mut secret = vec![0u8; 32];
                primitives::random_bytes(&mut secret)?;
                row.secret1.zeroize();
                row.secret1 = secret;
                row.flags |= SECRET_NEW_1;
                Ok(true)
            }
            SecretOption::CreateNextSecret => {
                if row.flags & (SECRET_USE_1 | SECRET_USE_2) == 0 {
                    return Err(KeyStoreError::NoSecretKey);
                }
                let (new_flag, slot2) = if row.flags & SECRET_USE_1 != 0 {
                    (SECRET_NEW_2, true)
                } else {
                    (SECRET_NEW_1, false)
                };
                if row.flags & new_flag != 0 {
                    return Ok(false);
                }
                let mut secret = vec![0u8; 32];
                primitives::random_bytes(&mut secret)?;
                if slot2 {
                    row.secret2.zeroize();
                    row.secret2 = secret;
                } else {
                    row.secret1.zeroize();
                    row.secret1 = secret;
                }
                row.flags |= new_flag;
                Ok(true)
            }
        }
    }

    /// Atomically read the local key row, apply `option` to the secret
    /// pair, and lease a nonce block for a new P2P session.
    ///
    /// When a secret slot is in use the lease is drawn from the secret
    /// row; otherwise from the key row (the session will be ECDH-backed).
    pub fn load_twincode_key_with_secret(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
        lease: u64,
        option: SecretOption,
    ) -> Result<SessionKeys, KeyStoreError> {
        let key_info = self
            .load_twincode_key(local)?
            .ok_or(KeyStoreError::NotFound)?;
        if !key_info.is_private() {
            return Err(KeyStoreError::NoPrivateKey);
        }

        let pair_key = secret_key_pair(local, Some(peer));
        let (secret, nonce_start, leased_from_secret) =
            self.update_row(&self.secrets, &pair_key, |current| {
                let mut row: SecretPairRow = match current {
                    Some(bytes) => decode_canonical_limited(bytes, MAX_ROW)
                        .map_err(|_| KeyStoreError::Codec)?,
                    None => SecretPairRow::new(now_ms()),
                };
                let mutated = Self::apply_secret_option(&mut row, option)?;

                let (secret, start, from_secret) = if row.flags & SECRET_USE_1 != 0 {
                    let start = row.nonce_sequence + 1;
                    row.nonce_sequence += lease;
                    (
                        Some(SessionSecret {
                            bytes: Zeroizing::new(row.secret1.clone()),
                            key_index: 1,
                            update_date: row.secret_update_date,
                        }),
                        start,
                        true,
                    )
                } else if row.flags & SECRET_USE_2 != 0 {
                    let start = row.nonce_sequence + 1;
                    row.nonce_sequence += lease;
                    (
                        Some(SessionSecret {
                            bytes: Zeroizing::new(row.secret2.clone()),
                            key_index: 2,
                            update_date: row.secret_update_date,
                        }),
                        start,
                        true,
                    )
                } else {
                    (None, 0, false)
                };

                let next = if mutated || from_secret || current.is_none() {
                    row.modification_date = now_ms();
                    Some(encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?)
                } else {
                    current.map(|b| b.to_vec())
                };
                Ok((next, (secret, start, from_secret)))
            })?;

        let nonce_start = if leased_from_secret {
            nonce_start
        } else {
            self.lease_key_nonce(local, lease)?
        };

        let (peer_secret1, peer_secret2) = self.load_peer_secrets(peer)?;

        Ok(SessionKeys {
            kind: key_info.kind(),
            agreement_private: key_info.agreement_private_bytes(),
            secret,
            peer_secret1,
            peer_secret2,
            nonce_start,
            nonce_count: lease,
        })
    }

    /// Lease a fresh nonce block for an established session whose block
    /// ran out. Secret-backed sessions refresh against the secret row.
    pub fn refresh_session(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
        lease: u64,
        secret_backed: bool,
    ) -> Result<u64, KeyStoreError> {
        if secret_backed {
            self.lease_secret_nonce(local, peer, lease)
        } else {
            self.lease_key_nonce(local, lease)
        }
    }

    fn load_peer_secrets(
        &self,
        peer: TwincodeId,
    ) -> Result<(Option<Zeroizing<Vec<u8>>>, Option<Zeroizing<Vec<u8>>>), KeyStoreError> {
        let key = secret_key_pair(peer, None);
        let v = self.secrets.get(key).map_err(|_| KeyStoreError::DbIo)?;
        match v {
            None => Ok((None, None)),
            Some(iv) => {
                let row: SecretPairRow =
                    decode_canonical_limited(&iv, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
                let s1 = (!row.secret1.is_empty()).then(|| Zeroizing::new(row.secret1.clone()));
                let s2 = (!row.secret2.is_empty()).then(|| Zeroizing::new(row.secret2.clone()));
                Ok((s1, s2))
            }
        }
    }

    /// Store a secret received from `peer` (wire key index 1 or 2) into
    /// the peer's own row (`peerTwincodeId IS NULL`), then raise the
    /// local twincode's encrypt flag when both sides now exist.
    pub fn save_secret_key(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
        secret: &[u8],
        key_index: u8,
    ) -> Result<(), KeyStoreError> {
        if secret.len() != 32 || !(1..=2).contains(&key_index) {
            return Err(KeyStoreError::Crypto);
        }
        let key = secret_key_pair(peer, None);
        self.update_row(&self.secrets, &key, |current| {
            let mut row: SecretPairRow = match current {
                Some(bytes) => {
                    decode_canonical_limited(bytes, MAX_ROW).map_err(|_| KeyStoreError::Codec)?
                }
                None => SecretPairRow::new(now_ms()),
            };
            let (slot, use_flag, clear_flag) = if key_index == 1 {
                (&mut row.secret1, SECRET_USE_1, SECRET_USE_2)
            } else {
                (&mut row.secret2, SECRET_USE_2, SECRET_USE_1)
            };
            // Constant-time compare: a replayed save of the same secret
            // must not rewrite the row (or leak via timing).
            if slot.len() == secret.len()
                && bool::from(slot.ct_eq(secret))
                && row.flags & use_flag != 0
            {
                return Ok((current.map(|b| b.to_vec()), ()));
            }
            slot.zeroize();
            *slot = secret.to_vec();
            row.flags = (row.flags & !clear_flag) | use_flag;
            row.secret_update_date = now_ms();
            row.modification_date = now_ms();
            let encoded = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
            Ok((Some(encoded), ()))
        })?;

        // Both sides of the association present -> relation is encrypted.
        let ours = self
            .secrets
            .get(secret_key_pair(local, Some(peer)))
            .map_err(|_| KeyStoreError::DbIo)?;
        if ours.is_some() {
            self.set_encrypt_flag(local)?;
        }
        Ok(())
    }

    /// Apply a secret option without leasing nonces (rotation proposals
    /// triggered by an aging secret).
    pub fn update_secret(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
        option: SecretOption,
    ) -> Result<(), KeyStoreError> {
        let key = secret_key_pair(local, Some(peer));
        self.update_row(&self.secrets, &key, |current| {
            let mut row: SecretPairRow = match current {
                Some(bytes) => {
                    decode_canonical_limited(bytes, MAX_ROW).map_err(|_| KeyStoreError::Codec)?
                }
                None => SecretPairRow::new(now_ms()),
            };
            let mutated = Self::apply_secret_option(&mut row, option)?;
            if mutated {
                row.modification_date = now_ms();
                let encoded = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
                Ok((Some(encoded), ()))
            } else {
                Ok((current.map(|b| b.to_vec()), ()))
            }
        })
    }

    /// Promote proposed secrets: `NEW_x` becomes `USE_x`, the other
    /// `USE_*` is cleared, and the local twincode gains the encrypt flag.
    pub fn validate_secrets(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
    ) -> Result<(), KeyStoreError> {
        let key = secret_key_pair(local, Some(peer));
        let promoted = self.update_row(&self.secrets, &key, |current| {
            let bytes = current.ok_or(KeyStoreError::NoSecretKey)?;
            let mut row: SecretPairRow =
                decode_canonical_limited(bytes, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
            let promoted = if row.flags & SECRET_NEW_1 != 0 {
                row.flags = SECRET_USE_1;
                true
            } else if row.flags & SECRET_NEW_2 != 0 {
                row.flags = SECRET_USE_2;
                true
            } else {
                false
            };
            if promoted {
                row.secret_update_date = now_ms();
                row.modification_date = now_ms();
                let encoded = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
                Ok((Some(encoded), true))
            } else {
                Ok((current.map(|b| b.to_vec()), false))
            }
        })?;
        if promoted {
            self.set_encrypt_flag(local)?;
        }
        Ok(())
    }

    fn set_encrypt_flag(&self, id: TwincodeId) -> Result<(), KeyStoreError> {
        self.update_row(&self.keys, &id_key(id), |current| {
            let bytes = current.ok_or(KeyStoreError::NotFound)?;
            let mut row: KeyInfoRow =
                decode_canonical_limited(bytes, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
            if row.flags & KEY_FLAG_ENCRYPT != 0 {
                return Ok((current.map(|b| b.to_vec()), ()));
            }
            row.flags |= KEY_FLAG_ENCRYPT;
            row.modification_date = now_ms();
            let encoded = encode_canonical(&row).map_err(|_| KeyStoreError::Codec)?;
            Ok((Some(encoded), ()))
        })
    }

    /// Proposed or in-use secret of our side for transmission to the
    /// peer (wire key index + bytes), proposals first.
    pub fn pending_secret(
        &self,
        local: TwincodeId,
        peer: TwincodeId,
    ) -> Result<Option<(u8, Zeroizing<Vec<u8>>)>, KeyStoreError> {
        let key = secret_key_pair(local, Some(peer));
        let v = self.secrets.get(key).map_err(|_| KeyStoreError::DbIo)?;
        let Some(iv) = v else {
            return Ok(None);
        };
        let row: SecretPairRow =
            decode_canonical_limited(&iv, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
        if row.flags & SECRET_NEW_1 != 0 {
            return Ok(Some((1, Zeroizing::new(row.secret1.clone()))));
        }
        if row.flags & SECRET_NEW_2 != 0 {
            return Ok(Some((2, Zeroizing::new(row.secret2.clone()))));
        }
        if row.flags & SECRET_USE_1 != 0 {
            return Ok(Some((1, Zeroizing::new(row.secret1.clone()))));
        }
        if row.flags & SECRET_USE_2 != 0 {
            return Ok(Some((2, Zeroizing::new(row.secret2.clone()))));
        }
        Ok(None)
    }

    /// Secret pair flags for a pair row (tests and diagnostics).
    pub fn secret_flags(
        &self,
        local: TwincodeId,
        peer: Option<TwincodeId>,
    ) -> Result<Option<u32>, KeyStoreError> {
        let key = secret_key_pair(local, peer);
        let v = self.secrets.get(key).map_err(|_| KeyStoreError::DbIo)?;
        match v {
            None => Ok(None),
            Some(iv) => {
                let row: SecretPairRow =
                    decode_canonical_limited(&iv, MAX_ROW).map_err(|_| KeyStoreError::Codec)?;
                Ok(Some(row.flags))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, KeyStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::open(dir.path().to_str().unwrap()).expect("open");
        (dir, store)
    }

    #[test]
    fn insert_key_is_idempotent() {
        let (_dir, store) = open_store();
        let uuid = Uuid::new_v4();
        let id1 = store.insert_key(&uuid, KeyKind::Curve25519).unwrap();
        let id2 = store.insert_key(&uuid, KeyKind::Curve25519).unwrap();
        assert_eq!(id1, id2);

        let info = store.load_twincode_key(id1).unwrap().unwrap();
        assert!(info.is_private());
        assert_eq!(info.kind(), KeyKind::Curve25519);
        assert!(info.signing_key().is_ok());
        assert!(info.agreement_key().is_ok());
    }

    #[test]
    fn peer_key_lookup_by_uuid() {
        let (_dir, store) = open_store();
        let peer_uuid = Uuid::new_v4();
        let pair = TwincodeKeyPair::generate(KeyKind::Curve25519).unwrap();
        let id = store
            .save_peer_key(
                &peer_uuid,
                KeyKind::Curve25519,
                &pair.signing.public_key(),
                &pair.agreement.public_key().unwrap(),
            )
            .unwrap();
        let info = store.load_peer_encryption_key(&peer_uuid).unwrap().unwrap();
        assert_eq!(info.id, id);
        assert!(!info.is_private());
        assert_eq!(
            info.agreement_public().unwrap(),
            pair.agreement.public_key().unwrap()
        );
    }

    #[test]
    fn nonce_blocks_are_contiguous_and_disjoint() {
        let (_dir, store) = open_store();
        let uuid = Uuid::new_v4();
        let id = store.insert_key(&uuid, KeyKind::Curve25519).unwrap();
        let a = store.lease_key_nonce(id, NONCE_LEASE).unwrap();
        let b = store.lease_key_nonce(id, NONCE_LEASE).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, a + NONCE_LEASE);
    }

    #[test]
    fn create_secret_sets_use1() {
        let (_dir, store) = open_store();
        let local = store
            .insert_key(&Uuid::new_v4(), KeyKind::Curve25519)
            .unwrap();
        let peer = TwincodeId(9999);
        let keys = store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::CreateSecret)
            .unwrap();
        let secret = keys.secret.expect("secret in use");
        assert_eq!(secret.key_index, 1);
        assert_eq!(secret.bytes.len(), 32);
        assert_eq!(
            store.secret_flags(local, Some(peer)).unwrap(),
            Some(SECRET_USE_1)
        );
        assert_eq!(keys.nonce_start, 1);
    }

    #[test]
    fn rotation_handshake_promotes_other_slot() {
        let (_dir, store) = open_store();
        let local = store
            .insert_key(&Uuid::new_v4(), KeyKind::Curve25519)
            .unwrap();
        let peer = TwincodeId(77);

        store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::CreateSecret)
            .unwrap();
        store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::CreateNextSecret)
            .unwrap();
        assert_eq!(
            store.secret_flags(local, Some(peer)).unwrap(),
            Some(SECRET_USE_1 | SECRET_NEW_2)
        );

        // Repeat is a no-op.
        store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::CreateNextSecret)
            .unwrap();
        assert_eq!(
            store.secret_flags(local, Some(peer)).unwrap(),
            Some(SECRET_USE_1 | SECRET_NEW_2)
        );

        store.validate_secrets(local, peer).unwrap();
        assert_eq!(
            store.secret_flags(local, Some(peer)).unwrap(),
            Some(SECRET_USE_2)
        );

        let info = store.load_twincode_key(local).unwrap().unwrap();
        assert!(info.flags & KEY_FLAG_ENCRYPT != 0);
    }

    #[test]
    fn create_first_secret_is_idempotent() {
        let (_dir, store) = open_store();
        let local = store
            .insert_key(&Uuid::new_v4(), KeyKind::Curve25519)
            .unwrap();
        let peer = TwincodeId(5);
        store
            .load_twincode_key_with_secret(
                local,
                peer,
                NONCE_LEASE,
                SecretOption::CreateFirstSecret,
            )
            .unwrap();
        assert_eq!(
            store.secret_flags(local, Some(peer)).unwrap(),
            Some(SECRET_NEW_1)
        );
        let (index, first) = store.pending_secret(local, peer).unwrap().unwrap();
        assert_eq!(index, 1);

        store
            .load_twincode_key_with_secret(
                local,
                peer,
                NONCE_LEASE,
                SecretOption::CreateFirstSecret,
            )
            .unwrap();
        let (_, second) = store.pending_secret(local, peer).unwrap().unwrap();
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn save_secret_key_fills_peer_row_and_encrypt_flag() {
        let (_dir, store) = open_store();
        let local = store
            .insert_key(&Uuid::new_v4(), KeyKind::Curve25519)
            .unwrap();
        let peer = TwincodeId(321);

        store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::CreateSecret)
            .unwrap();

        let secret = [9u8; 32];
        store.save_secret_key(local, peer, &secret, 1).unwrap();

        let keys = store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::None)
            .unwrap();
        assert_eq!(keys.peer_secret1.unwrap().as_slice(), &secret);
        assert!(keys.peer_secret2.is_none());

        let info = store.load_twincode_key(local).unwrap().unwrap();
        assert!(info.flags & KEY_FLAG_ENCRYPT != 0);
    }

    #[test]
    fn next_secret_without_use_fails() {
        let (_dir, store) = open_store();
        let local = store
            .insert_key(&Uuid::new_v4(), KeyKind::Curve25519)
            .unwrap();
        let peer = TwincodeId(1);
        let err = store
            .load_twincode_key_with_secret(local, peer, NONCE_LEASE, SecretOption::CreateNextSecret)
            .unwrap_err();
        assert_eq!(err, KeyStoreError::NoSecretKey);
    }
}
