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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container. Exposition is the host application's job; the
/// registry is handed over at startup.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Outbound signaling packets.
    pub signaling_out_total: IntCounter,
    /// Inbound signaling packets.
    pub signaling_in_total: IntCounter,
    /// Dropped undecodable packets.
    pub signaling_invalid_total: IntCounter,
    /// Requests completed by the watchdog.
    pub signaling_timeout_total: IntCounter,
    /// Duplicate notifications suppressed.
    pub signaling_duplicate_total: IntCounter,

    /// SDP encrypt failures.
    pub crypto_encrypt_fail_total: IntCounter,
    /// SDP decrypt failures.
    pub crypto_decrypt_fail_total: IntCounter,

    /// Live P2P sessions.
    pub sessions_active: IntGauge,
    /// Live call rooms.
    pub call_rooms_active: IntGauge,

    /// Connection establishments requested by the orchestrator.
    pub orchestrator_connect_total: IntCounter,
    /// Disconnections requested by the orchestrator.
    pub orchestrator_disconnect_total: IntCounter,
    /// Jobs executed.
    pub jobs_run_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let signaling_out_total =
            IntCounter::new("twincall_signaling_out_total", "Outbound signaling packets")
                .map_err(|_| MetricsError::Prom)?;
        let signaling_in_total =
            IntCounter::new("twincall_signaling_in_total", "Inbound signaling packets")
                .map_err(|_| MetricsError::Prom)?;
        let signaling_invalid_total = IntCounter::new(
            "twincall_signaling_invalid_total",
            "Dropped undecodable packets",
        )
        .map_err(|_| MetricsError::Prom)?;
        let signaling_timeout_total = IntCounter::new(
            "twincall_signaling_timeout_total",
            "Requests completed by the watchdog",
        )
        .map_err(|_| MetricsError::Prom)?;
        let signaling_duplicate_total = IntCounter::new(
            "twincall_signaling_duplicate_total",
            "Duplicate notifications suppressed",
        )
        .map_err(|_| MetricsError::Prom)?;

        let crypto_encrypt_fail_total =
            IntCounter::new("twincall_crypto_encrypt_fail_total", "SDP encrypt failures")
                .map_err(|_| MetricsError::Prom)?;
        let crypto_decrypt_fail_total =
            IntCounter::new("twincall_crypto_decrypt_fail_total", "SDP decrypt failures")
                .map_err(|_| MetricsError::Prom)?;

        let sessions_active = IntGauge::new("twincall_sessions_active", "Live P2P sessions")
            .map_err(|_| MetricsError::Prom)?;
        let call_rooms_active = IntGauge::new("twincall_call_rooms_active", "Live call rooms")
            .map_err(|_| MetricsError::Prom)?;

        let orchestrator_connect_total = IntCounter::new(
            "twincall_orchestrator_connect_total",
            "Connections requested",
        )
        .map_err(|_| MetricsError::Prom)?;
        let orchestrator_disconnect_total = IntCounter::new(
            "twincall_orchestrator_disconnect_total",
            "Disconnections requested",
        )
        .map_err(|_| MetricsError::Prom)?;
        let jobs_run_total = IntCounter::new("twincall_jobs_run_total", "Jobs executed")
            .map_err(|_| MetricsError::Prom)?;

        for c in [
            &signaling_out_total,
            &signaling_in_total,
            &signaling_invalid_total,
            &signaling_timeout_total,
            &signaling_duplicate_total,
            &crypto_encrypt_fail_total,
            &crypto_decrypt_fail_total,
            &orchestrator_connect_total,
            &orchestrator_disconnect_total,
            &jobs_run_total,
        ] {
            registry
                .register(Box::new(c.clone()))
                .map_err(|_| MetricsError::Prom)?;
        }
        registry
            .register(Box::new(sessions_active.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(call_rooms_active.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            signaling_out_total,
            signaling_in_total,
            signaling_invalid_total,
            signaling_timeout_total,
            signaling_duplicate_total,
            crypto_encrypt_fail_total,
            crypto_decrypt_fail_total,
            sessions_active,
            call_rooms_active,
            orchestrator_connect_total,
            orchestrator_disconnect_total,
            jobs_run_total,
        })
    }
}
