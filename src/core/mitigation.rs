//! Ban state machine, escalation, and attack signatures.
//!
//! Owns the live ban table, the signature log, and the reputation
//! ledger, so every state transition per source goes through one
//! component. A source moves `clear -> banned(expiry) -> clear` on
//! detected offenses, with the ban duration escalating from the durable
//! offense history, or `clear -> banned(indefinite)` on a manual block
//! that only an explicit unblock exits.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::features::FeatureVector;
use crate::core::reputation::{ReputationEntry, ReputationStore};

/// Escalating ban durations by offense count, in seconds
const FIRST_OFFENSE_SECS: f64 = 120.0;
const SECOND_OFFENSE_SECS: f64 = 600.0;
const REPEAT_OFFENSE_SECS: f64 = 1800.0;

/// Sentinel reported for indefinite bans in the ban table dump
const MANUAL_BAN_SENTINEL: f64 = -1.0;

/// Ban state for a single source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BanState {
    /// Timed ban expiring at the given monotonic second
    Until(f64),
    /// Indefinite manual ban, exited only by an explicit unblock
    Manual,
}

/// Recorded snapshot of the feature values accompanying an offense.
///
/// Keyed by source and updated in place, so the signature tracks the
/// evolving behavior of a banned source rather than freezing at the
/// first offense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub id: String,
    pub source: String,
    pub rps: f64,
    pub burst: u32,
    pub unique_path_ratio: f64,
    pub avg_gap: f64,
    pub error_rate: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hits: u64,
}

impl Signature {
    fn new(source: &str, features: &FeatureVector, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            rps: round2(features.rps),
            burst: features.burst,
            unique_path_ratio: round3(features.unique_path_ratio),
            avg_gap: round3(features.avg_gap),
            error_rate: round3(features.error_rate),
            first_seen: now,
            last_seen: now,
            hits: 1,
        }
    }

    fn refresh(&mut self, features: &FeatureVector, now: DateTime<Utc>) {
        self.rps = round2(features.rps);
        self.burst = features.burst;
        self.unique_path_ratio = round3(features.unique_path_ratio);
        self.avg_gap = round3(features.avg_gap);
        self.error_rate = round3(features.error_rate);
        self.last_seen = now;
        self.hits += 1;
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Escalating, time-boxed mitigation for detector verdicts and manual
/// operator commands.
pub struct MitigationEngine {
    bans: DashMap<String, BanState>,
    signatures: DashMap<String, Signature>,
    reputation: ReputationStore,
    epoch: Instant,
    max_signatures: usize,
}

impl MitigationEngine {
    pub fn new(reputation: ReputationStore, max_signatures: usize) -> Self {
        Self {
            bans: DashMap::new(),
            signatures: DashMap::new(),
            reputation,
            epoch: Instant::now(),
            max_signatures,
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Ban duration for the n-th offense; never decreases as the count
    /// grows and caps at the repeat-offender tier
    fn ban_duration(count: u64) -> f64 {
        match count {
            0 | 1 => FIRST_OFFENSE_SECS,
            2 => SECOND_OFFENSE_SECS,
            _ => REPEAT_OFFENSE_SECS,
        }
    }

    /// Pure read: is the source currently denied service?
    pub fn is_banned(&self, source: &str) -> bool {
        self.is_banned_at(source, self.now())
    }

    fn is_banned_at(&self, source: &str, now: f64) -> bool {
        match self.bans.get(source) {
            None => return false,
            Some(state) => match *state {
                BanState::Manual => return true,
                BanState::Until(expiry) if expiry > now => return true,
                BanState::Until(_) => {}
            },
        }
        // stale timed ban: lazily drop it, re-checking under the write
        // lock so a concurrent re-ban is not lost
        self.bans
            .remove_if(source, |_, state| matches!(state, BanState::Until(expiry) if *expiry <= now));
        false
    }

    /// Apply a confirmed detector verdict: escalate reputation, set the
    /// timed ban, snapshot the signature, and persist the ledger.
    /// Returns the new offense count.
    pub async fn register_offense(&self, source: &str, features: &FeatureVector) -> u64 {
        let count = self.reputation.record_offense(source);
        let duration = Self::ban_duration(count);
        self.ban_until(source, self.now() + duration);
        self.upsert_signature(source, features);
        self.reputation.persist_or_log().await;

        info!(
            "banned {} for {}s (offense #{})",
            source, duration as u64, count
        );
        count
    }

    fn ban_until(&self, source: &str, expiry: f64) {
        self.bans.insert(source.to_string(), BanState::Until(expiry));
    }

    /// A request arrived from an already-banned source: keep the
    /// signature tracking its behavior, no new offense.
    pub fn record_banned_hit(&self, source: &str, features: &FeatureVector) {
        self.upsert_signature(source, features);
    }

    /// Rule-level suspicion short of a ban still refreshes the signature
    pub fn note_suspicion(&self, source: &str, features: &FeatureVector) {
        self.upsert_signature(source, features);
    }

    /// Operator command: indefinite ban regardless of prior state
    pub fn manual_block(&self, source: &str) {
        self.bans.insert(source.to_string(), BanState::Manual);
        info!("manually blocked {}", source);
    }

    /// Operator command: clear the ban and forget the offense history
    pub async fn manual_unblock(&self, source: &str) {
        self.bans.remove(source);
        if self.reputation.remove(source) {
            self.reputation.persist_or_log().await;
        }
        info!("manually unblocked {}", source);
    }

    /// Offense count currently on record for a source
    pub fn offense_count(&self, source: &str) -> u64 {
        self.reputation.count(source)
    }

    /// Number of currently active bans
    pub fn banned_count(&self) -> usize {
        let now = self.now();
        self.bans
            .iter()
            .filter(|entry| match *entry.value() {
                BanState::Manual => true,
                BanState::Until(expiry) => expiry > now,
            })
            .count()
    }

    /// Ban table dump: source to remaining seconds, or the manual-ban
    /// sentinel for indefinite entries
    pub fn banned_snapshot(&self) -> HashMap<String, f64> {
        let now = self.now();
        self.bans
            .iter()
            .filter_map(|entry| match *entry.value() {
                BanState::Manual => Some((entry.key().clone(), MANUAL_BAN_SENTINEL)),
                BanState::Until(expiry) if expiry > now => {
                    Some((entry.key().clone(), round2(expiry - now)))
                }
                BanState::Until(_) => None,
            })
            .collect()
    }

    /// Point-in-time copy of the signature log
    pub fn signatures_snapshot(&self) -> Vec<Signature> {
        self.signatures
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Raw reputation ledger dump
    pub fn reputation_snapshot(&self) -> HashMap<String, ReputationEntry> {
        self.reputation.snapshot()
    }

    fn upsert_signature(&self, source: &str, features: &FeatureVector) {
        let now = Utc::now();
        self.signatures
            .entry(source.to_string())
            .and_modify(|sig| sig.refresh(features, now))
            .or_insert_with(|| Signature::new(source, features, now));
        self.cap_signatures();
    }

    /// Drop the stalest signatures once the log outgrows its cap
    fn cap_signatures(&self) {
        if self.signatures.len() <= self.max_signatures {
            return;
        }
        let mut by_age: Vec<(String, DateTime<Utc>)> = self
            .signatures
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_seen))
            .collect();
        by_age.sort_by_key(|(_, last_seen)| *last_seen);

        let excess = by_age.len().saturating_sub(self.max_signatures);
        for (source, _) in by_age.into_iter().take(excess) {
            self.signatures.remove(&source);
        }
    }
}
