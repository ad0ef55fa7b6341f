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

//! Twincode attribute signing and sealing.
//!
//! A signature blob names the attributes it covers and signs their
//! canonical (verbose) encoding. Image-id attributes are bound by
//! content: the image SHA-256, looked up through [`ImageStore`], is
//! folded into the signed payload so swapping the stored image breaks
//! the signature.
//!
//! Sealing encrypts an attribute set to a peer's agreement key with an
//! ephemeral sender key (the ephemeral public travels in the blob).

use crate::core::codec::attributes::{
    read_attributes, write_attributes, Attribute, AttributeValue, MAX_SIGNED_ATTRIBUTES,
};
use crate::core::codec::wire::{Encoding, WireReader, WireWriter};
use crate::core::security::primitives::{
    self, AeadBox, AeadRole, AgreementKey, AgreementPublicKey, SigningKey, VerifyingKey,
};
use crate::core::types::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

const SIGN_DOMAIN: &[u8] = b"Twincall-Attributes-v1";
const SEAL_VERSION: u8 = 1;
const SIGN_VERSION: i32 = 1;
const SALT_LEN: usize = 16;
// One-shot blobs always use the first nonce of a dedicated key.
const SEAL_NONCE: u64 = 1;

/// Attribute signing/sealing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealError {
    #[error("bad signature")]
    BadSignature,
    #[error("bad signature format")]
    BadFormat,
    #[error("missing signed attribute")]
    MissAttribute,
    #[error("attribute not covered by signature")]
    NotSignedAttribute,
    #[error("image not found")]
    ImageNotFound,
    #[error("crypto")]
    Crypto,
}

impl SealError {
    /// Service-level error code for observers.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SealError::BadSignature => ErrorCode::BadSignature,
            SealError::BadFormat => ErrorCode::BadSignatureFormat,
            SealError::MissAttribute => ErrorCode::BadSignatureMissAttribute,
            SealError::NotSignedAttribute => ErrorCode::BadSignatureNotSignedAttribute,
            SealError::ImageNotFound => ErrorCode::FileNotFound,
            SealError::Crypto => ErrorCode::LibraryError,
        }
    }
}

/// Identity and content hash of a stored image.
pub struct ImageInfo {
    /// Image id.
    pub uuid: Uuid,
    /// SHA-256 of the image content.
    pub sha256: Vec<u8>,
}

/// Host-side image repository (avatars referenced by attributes).
pub trait ImageStore: Send + Sync {
    /// Look up an image by id.
    fn load_image_info(&self, id: &Uuid) -> Option<ImageInfo>;
}

/// Image store for relations without image support.
pub struct NoImages;

impl ImageStore for NoImages {
    fn load_image_info(&self, _id: &Uuid) -> Option<ImageInfo> {
        None
    }
}

fn signed_payload(
    attributes: &[&Attribute],
    images: &dyn ImageStore,
) -> Result<Vec<u8>, SealError> {
    let mut w = WireWriter::new(Encoding::Verbose);
    w.write_raw(SIGN_DOMAIN);
    w.write_int(attributes.len() as i32);
    for attribute in attributes {
        w.write_string(&attribute.name);
        match &attribute.value {
            AttributeValue::Uuid(id) => {
                w.write_uuid(id);
                // Bind image content when the id resolves to an image.
                if let Some(info) = images.load_image_info(id) {
                    w.write_bytes(&info.sha256);
                } else {
                    w.write_bytes(&[]);
                }
            }
            other => {
                let mut inner = WireWriter::new(Encoding::Verbose);
                write_attributes(&mut inner, &[Attribute::new(&attribute.name, other.clone())]);
                w.write_bytes(&inner.into_bytes());
            }
        }
    }
    Ok(w.into_bytes())
}

/// Sign `attributes`, producing a blob that records the covered names.
pub fn sign_attributes(
    key: &SigningKey,
    attributes: &[Attribute],
    images: &dyn ImageStore,
) -> Result<Vec<u8>, SealError> {
    if attributes.len() > MAX_SIGNED_ATTRIBUTES {
        return Err(SealError::BadFormat);
    }
    let refs: Vec<&Attribute> = attributes.iter().collect();
    let payload = signed_payload(&refs, images)?;
    let sig = key.sign(&payload).map_err(|_| SealError::Crypto)?;

    let mut w = WireWriter::new(Encoding::Verbose);
    w.write_int(SIGN_VERSION);
    w.write_int(attributes.len() as i32);
    for attribute in attributes {
        w.write_string(&attribute.name);
    }
    w.write_bytes(&sig);
    Ok(w.into_bytes())
}

/// Verify a signature blob over `attributes`.
///
/// Every name recorded in the blob must be present in `attributes`;
/// every attribute whose name is in `protected` must be covered by the
/// blob. The signed payload is rebuilt with image SHAs resolved through
/// `images`, so a swapped image fails verification.
pub fn verify_attributes(
    key: &VerifyingKey,
    attributes: &[Attribute],
    blob: &[u8],
    images: &dyn ImageStore,
    protected: &[&str],
) -> Result<(), SealError> {
    let mut r = WireReader::new(Encoding::Verbose, blob);
    let version = r.read_int().map_err(|_| SealError::BadFormat)?;
    if version != SIGN_VERSION {
        return Err(SealError::BadFormat);
    }
    let count = r.read_int().map_err(|_| SealError::BadFormat)?;
    if count < 0 || count as usize > MAX_SIGNED_ATTRIBUTES {
        return Err(SealError::BadFormat);
    }
    let mut signed_names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        signed_names.push(r.read_string().map_err(|_| SealError::BadFormat)?);
    }
    let sig = r.read_bytes().map_err(|_| SealError::BadFormat)?;
    r.expect_end().map_err(|_| SealError::BadFormat)?;

    let mut signed: Vec<&Attribute> = Vec::with_capacity(signed_names.len());
    for name in &signed_names {
        let found = attributes
            .iter()
            .find(|a| &a.name == name)
            .ok_or(SealError::MissAttribute)?;
        signed.push(found);
    }
    for attribute in attributes {
        if protected.contains(&attribute.name.as_str())
            && !signed_names.iter().any(|n| n == &attribute.name)
        {
            return Err(SealError::NotSignedAttribute);
        }
    }

    let payload = signed_payload(&signed, images)?;
    if !key.verify(&payload, &sig) {
        return Err(SealError::BadSignature);
    }
    Ok(())
}

/// Encrypt an attribute set to `peer`. The sender key is ephemeral and
/// its public half travels in the blob.
pub fn seal_attributes(
    peer: &AgreementPublicKey,
    attributes: &[Attribute],
) -> Result<Vec<u8>, SealError> {
    let ephemeral = AgreementKey::generate(peer.kind()).map_err(|_| SealError::Crypto)?;
    let ephemeral_public = ephemeral.public_key().map_err(|_| SealError::Crypto)?;

    let mut salt = [0u8; SALT_LEN];
    primitives::random_bytes(&mut salt).map_err(|_| SealError::Crypto)?;
    let aead = AeadBox::bind_agreement(AeadRole::Initiator, &ephemeral, peer, &salt)
        .map_err(|_| SealError::Crypto)?;

    let mut inner = WireWriter::new(Encoding::Verbose);
    write_attributes(&mut inner, attributes);
    let sealed = aead
        .encrypt(SEAL_NONCE, &inner.into_bytes(), &salt)
        .map_err(|_| SealError::Crypto)?;

    let mut w = WireWriter::new(Encoding::Verbose);
    w.write_u8(SEAL_VERSION);
    w.write_raw(&salt);
    w.write_bytes(ephemeral_public.as_bytes());
    w.write_raw(&sealed);
    Ok(w.into_bytes())
}

/// Open a sealed attribute blob with our private agreement key.
pub fn open_attributes(
    private: &AgreementKey,
    blob: &[u8],
) -> Result<Vec<Attribute>, SealError> {
    let mut r = WireReader::new(Encoding::Verbose, blob);
    let version = r.read_u8().map_err(|_| SealError::BadFormat)?;
    if version != SEAL_VERSION {
        return Err(SealError::BadFormat);
    }
    let salt = r
        .read_raw(SALT_LEN)
        .map_err(|_| SealError::BadFormat)?
        .to_vec();
    let sender_pub_bytes = r.read_bytes().map_err(|_| SealError::BadFormat)?;
    let sender_pub = AgreementPublicKey::from_bytes(private.kind(), &sender_pub_bytes)
        .map_err(|_| SealError::BadFormat)?;
    let ciphertext = r.read_rest();

    let aead = AeadBox::bind_agreement(AeadRole::Responder, private, &sender_pub, &salt)
        .map_err(|_| SealError::Crypto)?;
    let plain = aead
        .decrypt(SEAL_NONCE, ciphertext, &salt)
        .map_err(|_| SealError::BadSignature)?;

    let mut inner = WireReader::new(Encoding::Verbose, &plain);
    let attributes =
        read_attributes(&mut inner, MAX_SIGNED_ATTRIBUTES).map_err(|_| SealError::BadFormat)?;
    inner.expect_end().map_err(|_| SealError::BadFormat)?;
    Ok(attributes)
}
