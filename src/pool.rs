// src/pool.rs

use crate::key::Key;
use futures_util::future::join_all;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lexical shape of a Google API key. Anything else is configuration noise
/// (a stray env var, a truncated paste) and is ignored at registration.
static GOOGLE_API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^AIza[0-9A-Za-z_-]{35}$").expect("static regex must compile"));

/// The managed collection of upstream keys.
///
/// Membership is fixed after startup; only the per-key failure timestamps
/// change at runtime. Expiry is time-based and reversible, never a removal.
#[derive(Debug, Default)]
pub struct KeyPool {
    keys: Vec<Arc<Key>>,
}

impl KeyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from configured credentials, dropping malformed and
    /// duplicate entries.
    pub fn from_credentials<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pool = Self::new();
        for credential in credentials {
            pool.register(credential.as_ref());
        }
        pool
    }

    /// Admits a credential if it matches the upstream key shape and is not
    /// already present. Registration runs over configuration data, so bad
    /// input is logged and skipped rather than surfaced as an error.
    pub fn register(&mut self, credential: &str) {
        if !GOOGLE_API_KEY_RE.is_match(credential) {
            warn!("Ignoring credential that does not look like a Google API key");
            return;
        }
        if self
            .keys
            .iter()
            .any(|key| key.expose_credential() == credential)
        {
            debug!("Ignoring duplicate credential");
            return;
        }
        let key = Arc::new(Key::new(credential));
        info!(key = %key.censored(), "Registered upstream API key");
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Arc<Key>] {
        &self.keys
    }

    /// Snapshot of the keys currently outside their cooldown window.
    pub fn valid_keys(&self) -> Vec<Arc<Key>> {
        self.keys
            .iter()
            .filter(|key| key.is_valid())
            .cloned()
            .collect()
    }

    /// Snapshot of the keys currently inside their cooldown window.
    pub fn invalid_keys(&self) -> Vec<Arc<Key>> {
        self.keys
            .iter()
            .filter(|key| !key.is_valid())
            .cloned()
            .collect()
    }

    /// True iff no key is currently usable.
    pub fn all_expired(&self) -> bool {
        self.keys.iter().all(|key| !key.is_valid())
    }

    /// Uniformly selects one valid key, or `None` when the pool is exhausted.
    pub fn pick_random_valid(&self) -> Option<Arc<Key>> {
        self.valid_keys().choose(&mut rand::thread_rng()).cloned()
    }

    /// Probes every key concurrently and waits for all probes to finish.
    /// Called once at startup, before the server accepts requests, so the
    /// first real requests do not route through keys already known dead.
    pub async fn probe_all(&self, client: &Client, upstream_base_url: &str) {
        if self.keys.is_empty() {
            return;
        }
        join_all(
            self.keys
                .iter()
                .map(|key| key.probe(client, upstream_base_url)),
        )
        .await;
        info!(
            valid = self.valid_keys().len(),
            total = self.keys.len(),
            "Startup key probe finished"
        );
    }
}
