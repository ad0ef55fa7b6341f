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

//! Generate a twincode identity inside a key store directory and print
//! the twincode UUID plus the public signing-key fingerprint.

use anyhow::{anyhow, Result};
use twincall::core::security::keystore::KeyStore;
use twincall::core::security::primitives::KeyKind;
use uuid::Uuid;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .try_init();
    tracing::debug!(
        build = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        "twincall keygen"
    );

    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let store = KeyStore::open(&out_dir).map_err(|e| anyhow!("keystore open: {e}"))?;

    let twincode = Uuid::new_v4();
    let id = store
        .insert_key(&twincode, KeyKind::Curve25519)
        .map_err(|e| anyhow!("insert key: {e}"))?;
    let info = store
        .load_twincode_key(id)
        .map_err(|e| anyhow!("load key: {e}"))?
        .ok_or_else(|| anyhow!("key row missing after insert"))?;
    let public = info
        .verifying_key()
        .map_err(|e| anyhow!("public key: {e}"))?;

    println!("{twincode}");
    println!("{}", hex::encode(public.as_bytes()));
    Ok(())
}
