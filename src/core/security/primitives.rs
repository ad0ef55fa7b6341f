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

//! Crypto primitives behind the key store and the session ciphers:
//! twincode keypairs (Ed25519+X25519 or ECDSA P-256), detached and
//! authenticator signatures, ECDH, and the AEAD box used for SDP
//! encryption.
//!
//! Private material lives in `Zeroizing` buffers and is wiped on drop.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use ring::rand::SecureRandom;
use ring::signature::KeyPair as _;
use ring::{aead, hkdf, rand::SystemRandom, signature};
use thiserror::Error;
use zeroize::Zeroizing;

/// Crypto layer errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key")]
    InvalidKey,
    #[error("random source")]
    Random,
    #[error("encrypt")]
    Encrypt,
    #[error("decrypt")]
    Decrypt,
    #[error("bad signature")]
    BadSignature,
    #[error("crypto library")]
    Library,
}

/// Keypair family of a twincode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// Ed25519 signing + X25519 agreement.
    Curve25519,
    /// ECDSA P-256 signing + ECDH P-256 agreement.
    EcdsaP256,
}

const AUTH_DOMAIN: &[u8] = b"twincall-auth-v1";
const SDP_KEY_INFO: &[u8] = b"Twincall-Sdp-Key-v1";
// The nonce-base derivation info string is wire-contractual.
const NONCE_INFO: &[u8] = b"nonce";

const AUTH_KIND_CURVE25519: u8 = 1;
const AUTH_KIND_ECDSA_P256: u8 = 2;

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

fn hkdf_expand(salt: &[u8], ikm: &[u8], info: &[u8], n: usize) -> Result<Vec<u8>, CryptoError> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(ikm);
    let info_slices = [info];
    let okm = prk
        .expand(&info_slices, OkmLen(n))
        .map_err(|_| CryptoError::Library)?;
    let mut out = vec![0u8; n];
    okm.fill(&mut out).map_err(|_| CryptoError::Library)?;
    Ok(out)
}

/// Fill `out` from the system CSPRNG.
pub fn random_bytes(out: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new().fill(out).map_err(|_| CryptoError::Random)
}

/// A random 64-bit value from the system CSPRNG.
pub fn random_u64() -> Result<u64, CryptoError> {
    let mut b = [0u8; 8];
    random_bytes(&mut b)?;
    Ok(u64::from_be_bytes(b))
}

enum SigningInner {
    Ed25519(signature::Ed25519KeyPair),
    Ecdsa(signature::EcdsaKeyPair),
}

/// Private signing half of a twincode keypair.
pub struct SigningKey {
    kind: KeyKind,
    pkcs8: Zeroizing<Vec<u8>>,
    inner: SigningInner,
}

impl SigningKey {
    /// Generate a fresh signing key of `kind`.
    pub fn generate(kind: KeyKind) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let pkcs8 = match kind {
            KeyKind::Curve25519 => signature::Ed25519KeyPair::generate_pkcs8(&rng)
                .map_err(|_| CryptoError::Library)?,
            KeyKind::EcdsaP256 => signature::EcdsaKeyPair::generate_pkcs8(
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                &rng,
            )
            .map_err(|_| CryptoError::Library)?,
        };
        Self::from_pkcs8(kind, pkcs8.as_ref())
    }

    /// Parse a PKCS#8 private signing key.
    pub fn from_pkcs8(kind: KeyKind, pkcs8: &[u8]) -> Result<Self, CryptoError> {
        let inner = match kind {
            KeyKind::Curve25519 => SigningInner::Ed25519(
                signature::Ed25519KeyPair::from_pkcs8(pkcs8)
                    .map_err(|_| CryptoError::InvalidKey)?,
            ),
            KeyKind::EcdsaP256 => SigningInner::Ecdsa(
                signature::EcdsaKeyPair::from_pkcs8(
                    &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                    pkcs8,
                    &SystemRandom::new(),
                )
                .map_err(|_| CryptoError::InvalidKey)?,
            ),
        };
        Ok(Self {
            kind,
            pkcs8: Zeroizing::new(pkcs8.to_vec()),
            inner,
        })
    }

    /// Keypair family.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// PKCS#8 bytes for persistence. Callers must wipe their copy.
    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Public verification key.
    pub fn public_key(&self) -> VerifyingKey {
        let bytes = match &self.inner {
            SigningInner::Ed25519(kp) => kp.public_key().as_ref().to_vec(),
            SigningInner::Ecdsa(kp) => kp.public_key().as_ref().to_vec(),
        };
        VerifyingKey {
            kind: self.kind,
            bytes,
        }
    }

    /// Detached signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.inner {
            SigningInner::Ed25519(kp) => Ok(kp.sign(msg).as_ref().to_vec()),
            SigningInner::Ecdsa(kp) => Ok(kp
                .sign(&SystemRandom::new(), msg)
                .map_err(|_| CryptoError::Library)?
                .as_ref()
                .to_vec()),
        }
    }

    /// Detached signature, URL-safe base64.
    pub fn sign_base64(&self, msg: &[u8]) -> Result<String, CryptoError> {
        Ok(URL_SAFE_NO_PAD.encode(self.sign(msg)?))
    }
}

/// Public verification key of a twincode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKey {
    kind: KeyKind,
    bytes: Vec<u8>,
}

impl VerifyingKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(kind: KeyKind, bytes: &[u8]) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Curve25519 if bytes.len() != 32 => Err(CryptoError::InvalidKey),
            _ => Ok(Self {
                kind,
                bytes: bytes.to_vec(),
            }),
        }
    }

    /// Keypair family.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Raw public bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Verify a detached signature.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let alg: &dyn signature::VerificationAlgorithm = match self.kind {
            KeyKind::Curve25519 => &signature::ED25519,
            KeyKind::EcdsaP256 => &signature::ECDSA_P256_SHA256_ASN1,
        };
        signature::UnparsedPublicKey::new(alg, &self.bytes)
            .verify(msg, sig)
            .is_ok()
    }

    /// Verify a URL-safe base64 detached signature.
    pub fn verify_base64(&self, msg: &[u8], sig: &str) -> bool {
        match URL_SAFE_NO_PAD.decode(sig) {
            Ok(raw) => self.verify(msg, &raw),
            Err(_) => false,
        }
    }
}

/// Private agreement half of a twincode keypair.
pub struct AgreementKey {
    kind: KeyKind,
    bytes: Zeroizing<Vec<u8>>,
}

impl AgreementKey {
    /// Generate a fresh agreement key of `kind`.
    pub fn generate(kind: KeyKind) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Curve25519 => {
                let mut raw = Zeroizing::new(vec![0u8; 32]);
                random_bytes(raw.as_mut_slice())?;
                Ok(Self { kind, bytes: raw })
            }
            KeyKind::EcdsaP256 => {
                // Rejection-sample until the scalar is in range.
                loop {
                    let mut raw = Zeroizing::new(vec![0u8; 32]);
                    random_bytes(raw.as_mut_slice())?;
                    if p256::SecretKey::from_slice(&raw).is_ok() {
                        return Ok(Self { kind, bytes: raw });
                    }
                }
            }
        }
    }

    /// Parse raw private agreement bytes.
    pub fn from_bytes(kind: KeyKind, bytes: &[u8]) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Curve25519 => {
                if bytes.len() != 32 {
                    return Err(CryptoError::InvalidKey);
                }
            }
            KeyKind::EcdsaP256 => {
                p256::SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidKey)?;
            }
        }
        Ok(Self {
            kind,
            bytes: Zeroizing::new(bytes.to_vec()),
        })
    }

    /// Keypair family.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Raw private bytes for persistence. Callers must wipe their copy.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Public agreement key.
    pub fn public_key(&self) -> Result<AgreementPublicKey, CryptoError> {
        match self.kind {
            KeyKind::Curve25519 => {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&self.bytes);
                let secret = x25519_dalek::StaticSecret::from(raw);
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(AgreementPublicKey {
                    kind: self.kind,
                    bytes: public.as_bytes().to_vec(),
                })
            }
            KeyKind::EcdsaP256 => {
                let secret = p256::SecretKey::from_slice(&self.bytes)
                    .map_err(|_| CryptoError::InvalidKey)?;
                let point = secret.public_key().to_encoded_point(false);
                Ok(AgreementPublicKey {
                    kind: self.kind,
                    bytes: point.as_bytes().to_vec(),
                })
            }
        }
    }

    /// Raw shared secret with `peer` (fed into HKDF, never used directly).
    pub fn agree(&self, peer: &AgreementPublicKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if peer.kind != self.kind {
            return Err(CryptoError::InvalidKey);
        }
        match self.kind {
            KeyKind::Curve25519 => {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&self.bytes);
                let secret = x25519_dalek::StaticSecret::from(raw);
                let mut peer_raw = [0u8; 32];
                if peer.bytes.len() != 32 {
                    return Err(CryptoError::InvalidKey);
                }
                peer_raw.copy_from_slice(&peer.bytes);
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer_raw));
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            KeyKind::EcdsaP256 => {
                let secret = p256::SecretKey::from_slice(&self.bytes)
                    .map_err(|_| CryptoError::InvalidKey)?;
                let peer_key = p256::PublicKey::from_sec1_bytes(&peer.bytes)
                    .map_err(|_| CryptoError::InvalidKey)?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer_key.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }
}

/// Public agreement key of a peer twincode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgreementPublicKey {
    kind: KeyKind,
    bytes: Vec<u8>,
}

impl AgreementPublicKey {
    /// Wrap raw public agreement bytes.
    pub fn from_bytes(kind: KeyKind, bytes: &[u8]) -> Result<Self, CryptoError> {
        match kind {
            KeyKind::Curve25519 => {
                if bytes.len() != 32 {
                    return Err(CryptoError::InvalidKey);
                }
            }
            KeyKind::EcdsaP256 => {
                p256::PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidKey)?;
            }
        }
        Ok(Self {
            kind,
            bytes: bytes.to_vec(),
        })
    }

    /// Keypair family.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Raw public bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A full twincode keypair (signing + agreement halves).
pub struct TwincodeKeyPair {
    /// Signing half.
    pub signing: SigningKey,
    /// Agreement half.
    pub agreement: AgreementKey,
}

impl TwincodeKeyPair {
    /// Generate both halves of a fresh keypair.
    pub fn generate(kind: KeyKind) -> Result<Self, CryptoError> {
        Ok(Self {
            signing: SigningKey::generate(kind)?,
            agreement: AgreementKey::generate(kind)?,
        })
    }
}

fn auth_kind_byte(kind: KeyKind) -> u8 {
    match kind {
        KeyKind::Curve25519 => AUTH_KIND_CURVE25519,
        KeyKind::EcdsaP256 => AUTH_KIND_ECDSA_P256,
    }
}

fn auth_kind_from_byte(b: u8) -> Result<KeyKind, CryptoError> {
    match b {
        AUTH_KIND_CURVE25519 => Ok(KeyKind::Curve25519),
        AUTH_KIND_ECDSA_P256 => Ok(KeyKind::EcdsaP256),
        _ => Err(CryptoError::BadSignature),
    }
}

fn auth_message(id_a: &uuid::Uuid, id_b: &uuid::Uuid, peer_public: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(AUTH_DOMAIN.len() + 32 + peer_public.len());
    msg.extend_from_slice(AUTH_DOMAIN);
    msg.extend_from_slice(id_a.as_bytes());
    msg.extend_from_slice(id_b.as_bytes());
    msg.extend_from_slice(peer_public);
    msg
}

/// Domain-separated authenticator binding `id_a` to `id_b` and to the
/// peer agreement key. The signer's public key travels inside the
/// authenticator so the verifier can look the signer up.
pub fn sign_auth(
    key: &SigningKey,
    peer_public: &AgreementPublicKey,
    id_a: &uuid::Uuid,
    id_b: &uuid::Uuid,
) -> Result<String, CryptoError> {
    let msg = auth_message(id_a, id_b, peer_public.as_bytes());
    let sig = key.sign(&msg)?;
    let public = key.public_key();
    let pk = public.as_bytes();
    if pk.len() > u8::MAX as usize {
        return Err(CryptoError::Library);
    }
    let mut out = Vec::with_capacity(2 + pk.len() + sig.len());
    out.push(auth_kind_byte(key.kind()));
    out.push(pk.len() as u8);
    out.extend_from_slice(pk);
    out.extend_from_slice(&sig);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// The public key embedded in an authenticator, for signer lookup.
pub fn extract_auth_public_key(auth: &str) -> Result<VerifyingKey, CryptoError> {
    let raw = URL_SAFE_NO_PAD
        .decode(auth)
        .map_err(|_| CryptoError::BadSignature)?;
    if raw.len() < 2 {
        return Err(CryptoError::BadSignature);
    }
    let kind = auth_kind_from_byte(raw[0])?;
    let pk_len = raw[1] as usize;
    if raw.len() < 2 + pk_len {
        return Err(CryptoError::BadSignature);
    }
    VerifyingKey::from_bytes(kind, &raw[2..2 + pk_len])
}

/// Verify an authenticator produced by [`sign_auth`].
pub fn verify_auth(
    auth: &str,
    peer_public: &AgreementPublicKey,
    id_a: &uuid::Uuid,
    id_b: &uuid::Uuid,
) -> Result<VerifyingKey, CryptoError> {
    let raw = URL_SAFE_NO_PAD
        .decode(auth)
        .map_err(|_| CryptoError::BadSignature)?;
    if raw.len() < 2 {
        return Err(CryptoError::BadSignature);
    }
    let kind = auth_kind_from_byte(raw[0])?;
    let pk_len = raw[1] as usize;
    if raw.len() < 2 + pk_len {
        return Err(CryptoError::BadSignature);
    }
    let key = VerifyingKey::from_bytes(kind, &raw[2..2 + pk_len])?;
    let sig = &raw[2 + pk_len..];
    let msg = auth_message(id_a, id_b, peer_public.as_bytes());
    if !key.verify(&msg, sig) {
        return Err(CryptoError::BadSignature);
    }
    Ok(key)
}

/// Direction of an AEAD binding. Encrypt nonces of the two directions
/// live in disjoint spaces so both sides can use the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadRole {
    /// Side that initiated the session.
    Initiator,
    /// Side that accepted the session.
    Responder,
}

/// AES-256-GCM box with an HKDF-derived nonce base.
///
/// Nonces are `base XOR big_endian(nonce_seq)` over the trailing eight
/// bytes; reusing a `(key, nonce_seq)` pair is forbidden, which the
/// key store's leased sequences guarantee.
pub struct AeadBox {
    key: aead::LessSafeKey,
    nonce_base: [u8; 12],
    role: AeadRole,
}

impl AeadBox {
    fn from_key_bytes(key_bytes: &[u8], role: AeadRole) -> Result<Self, CryptoError> {
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key_bytes)
            .map_err(|_| CryptoError::InvalidKey)?;
        let base = hkdf_expand(&[], key_bytes, NONCE_INFO, 12)?;
        let mut nonce_base = [0u8; 12];
        nonce_base.copy_from_slice(&base);
        Ok(Self {
            key: aead::LessSafeKey::new(unbound),
            nonce_base,
            role,
        })
    }

    /// Bind to a raw 32-byte shared secret.
    pub fn bind_secret(secret: &[u8], role: AeadRole) -> Result<Self, CryptoError> {
        if secret.len() != 32 {
            return Err(CryptoError::InvalidKey);
        }
        Self::from_key_bytes(secret, role)
    }

    /// Bind via ECDH + HKDF with `salt`.
    pub fn bind_agreement(
        role: AeadRole,
        my_private: &AgreementKey,
        peer_public: &AgreementPublicKey,
        salt: &[u8],
    ) -> Result<Self, CryptoError> {
        let shared = my_private.agree(peer_public)?;
        let key_bytes = Zeroizing::new(hkdf_expand(salt, &shared, SDP_KEY_INFO, 32)?);
        Self::from_key_bytes(&key_bytes, role)
    }

    fn nonce(&self, nonce_seq: u64, encrypting: bool) -> aead::Nonce {
        let mut bytes = self.nonce_base;
        // The initiator's encrypt direction is the responder's decrypt
        // direction; flip the top bit for the opposite flow.
        let flip = match (self.role, encrypting) {
            (AeadRole::Initiator, true) | (AeadRole::Responder, false) => 0x00,
            _ => 0x80,
        };
        bytes[0] ^= flip;
        let seq = nonce_seq.to_be_bytes();
        for (b, s) in bytes[4..].iter_mut().zip(seq.iter()) {
            *b ^= s;
        }
        aead::Nonce::assume_unique_for_key(bytes)
    }

    /// Seal `plaintext` under `nonce_seq`, returning ciphertext + tag.
    pub fn encrypt(
        &self,
        nonce_seq: u64,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                self.nonce(nonce_seq, true),
                aead::Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Encrypt)?;
        Ok(in_out)
    }

    /// Open a ciphertext sealed under `nonce_seq`.
    pub fn decrypt(
        &self,
        nonce_seq: u64,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut in_out = ciphertext.to_vec();
        let plain = self
            .key
            .open_in_place(
                self.nonce(nonce_seq, false),
                aead::Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(plain.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sign_verify_both_kinds() {
        for kind in [KeyKind::Curve25519, KeyKind::EcdsaP256] {
            let key = SigningKey::generate(kind).unwrap();
            let sig = key.sign(b"twincall message").unwrap();
            let public = key.public_key();
            assert!(public.verify(b"twincall message", &sig));
            assert!(!public.verify(b"another message", &sig));

            let b64 = key.sign_base64(b"twincall message").unwrap();
            assert!(public.verify_base64(b"twincall message", &b64));
        }
    }

    #[test]
    fn signing_key_reload_from_pkcs8() {
        let key = SigningKey::generate(KeyKind::Curve25519).unwrap();
        let reloaded = SigningKey::from_pkcs8(KeyKind::Curve25519, key.pkcs8()).unwrap();
        assert_eq!(key.public_key(), reloaded.public_key());
    }

    #[test]
    fn agreement_is_symmetric() {
        for kind in [KeyKind::Curve25519, KeyKind::EcdsaP256] {
            let a = AgreementKey::generate(kind).unwrap();
            let b = AgreementKey::generate(kind).unwrap();
            let shared_ab = a.agree(&b.public_key().unwrap()).unwrap();
            let shared_ba = b.agree(&a.public_key().unwrap()).unwrap();
            assert_eq!(shared_ab.as_slice(), shared_ba.as_slice());
        }
    }

    #[test]
    fn auth_roundtrip_and_tamper() {
        let signer = SigningKey::generate(KeyKind::Curve25519).unwrap();
        let peer = AgreementKey::generate(KeyKind::Curve25519).unwrap();
        let peer_public = peer.public_key().unwrap();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();

        let auth = sign_auth(&signer, &peer_public, &id_a, &id_b).unwrap();
        let embedded = extract_auth_public_key(&auth).unwrap();
        assert_eq!(embedded, signer.public_key());

        let verified = verify_auth(&auth, &peer_public, &id_a, &id_b).unwrap();
        assert_eq!(verified, signer.public_key());

        // Swapped ids must not verify.
        assert_eq!(
            verify_auth(&auth, &peer_public, &id_b, &id_a),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn aead_roundtrip_across_roles() {
        let a = AgreementKey::generate(KeyKind::Curve25519).unwrap();
        let b = AgreementKey::generate(KeyKind::Curve25519).unwrap();
        let salt = [7u8; 16];

        let initiator = AeadBox::bind_agreement(
            AeadRole::Initiator,
            &a,
            &b.public_key().unwrap(),
            &salt,
        )
        .unwrap();
        let responder = AeadBox::bind_agreement(
            AeadRole::Responder,
            &b,
            &a.public_key().unwrap(),
            &salt,
        )
        .unwrap();

        let sealed = initiator.encrypt(42, b"v=0 offer", b"aad").unwrap();
        let opened = responder.decrypt(42, &sealed, b"aad").unwrap();
        assert_eq!(opened, b"v=0 offer");

        // Wrong sequence or AAD fails.
        assert!(responder.decrypt(43, &sealed, b"aad").is_err());
        assert!(responder.decrypt(42, &sealed, b"bad").is_err());
    }

    #[test]
    fn aead_secret_binding_roundtrip() {
        let mut secret = [0u8; 32];
        random_bytes(&mut secret).unwrap();
        let sender = AeadBox::bind_secret(&secret, AeadRole::Initiator).unwrap();
        let receiver = AeadBox::bind_secret(&secret, AeadRole::Responder).unwrap();
        let sealed = sender.encrypt(1, b"payload", b"").unwrap();
        assert_eq!(receiver.decrypt(1, &sealed, b"").unwrap(), b"payload");
    }
}
