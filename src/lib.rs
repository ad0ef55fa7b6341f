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

//! Twincall - signaling and cryptographic session core of an
//! end-to-end-encrypted peer-to-peer calling client.
//!
//! This crate provides:
//! - Length-prefixed wire framing with compact and verbose encodings
//! - Dictionary-compressed SDP/ICE candidate codecs
//! - Per-twincode keys, rotating shared secrets and nonce leasing (sled)
//! - Authenticated P2P SDP encryption (AES-256-GCM over X25519/P-256)
//! - The call-room and P2P-session signaling state machines
//! - A scheduled-job + connection orchestrator for mobile lifecycles
//! - Monitoring via Prometheus metrics and structured logging

/// Protocol-independent core (codecs, SDP, crypto, types).
pub mod core;
/// Observability (metrics registry).
pub mod monitoring;
/// Serial executor, jobs, connection orchestrator.
pub mod runtime;
/// Wire schemas, correlation, room and session state machines.
pub mod signaling;
