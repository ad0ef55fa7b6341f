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

//! Cryptographic state: primitives, the persistent key store, attribute
//! signing/sealing and the per-session SDP ciphers.

/// Durable twincode keys, shared secrets, nonce leasing.
pub mod keystore;
/// Signing, agreement and AEAD building blocks.
pub mod primitives;
/// Attribute signature and sealed-box codecs.
pub mod seal;
/// Per-P2P-session encrypt/decrypt facade.
pub mod session_keys;
