//! Signal encoding policies
//!
//! Turns a decoded addon record into the gauge value and label set that
//! the registry publishes. Two interchangeable policies exist:
//!
//! - [`HashedIdentity`]: a numeric fingerprint of the installed id (or
//!   version), labelled by addon name only. Detects change while keeping one
//!   series per addon.
//! - [`LastSeenTimestamp`]: the Unix time of the encode call, labelled by
//!   name, channel, version and id. One series per distinct combination ever
//!   observed.

use crate::models::{AddonRecord, AddonSignal};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const NAME_LABELS: &[&str] = &["name"];
const FULL_LABELS: &[&str] = &["name", "channel", "version", "id"];

/// Strategy for turning an addon record into a published signal
pub trait SignalEncoder: Send + Sync {
    /// Label names of the gauge family this policy writes
    fn label_names(&self) -> &'static [&'static str];

    /// Encode one addon record. Never fails.
    fn encode(&self, name: &str, record: &AddonRecord) -> AddonSignal;

    /// Label values for a signal, in the order of [`label_names`](Self::label_names)
    fn label_values<'a>(&self, signal: &'a AddonSignal) -> Vec<&'a str>;
}

/// Encoding policy selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingPolicy {
    /// Hash-compacted identity, `{name}` labels
    #[default]
    Hashed,
    /// Last-seen Unix timestamp, `{name, channel, version, id}` labels
    Timestamp,
}

impl EncodingPolicy {
    pub fn encoder(self) -> Arc<dyn SignalEncoder> {
        match self {
            EncodingPolicy::Hashed => Arc::new(HashedIdentity),
            EncodingPolicy::Timestamp => Arc::new(LastSeenTimestamp::new()),
        }
    }
}

impl fmt::Display for EncodingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingPolicy::Hashed => f.write_str("hashed"),
            EncodingPolicy::Timestamp => f.write_str("timestamp"),
        }
    }
}

/// Fingerprint of the installed generation, labelled by addon name only.
///
/// The generation is `id` when non-empty, otherwise `version`. The value is
/// the MD5 digest of the generation rendered as lowercase hex, truncated to
/// its first six characters, parsed as a base-16 `u32` and cast to `f64`.
/// Six hex characters are the first three digest bytes, so the value always
/// fits in 24 bits and is exact in an `f64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedIdentity;

impl HashedIdentity {
    /// Fingerprint of a generation string
    pub fn fingerprint(generation: &str) -> u32 {
        let digest = Md5::digest(generation.as_bytes());
        u32::from_be_bytes([0, digest[0], digest[1], digest[2]])
    }
}

impl SignalEncoder for HashedIdentity {
    fn label_names(&self) -> &'static [&'static str] {
        NAME_LABELS
    }

    fn encode(&self, name: &str, record: &AddonRecord) -> AddonSignal {
        let generation = if record.id.is_empty() {
            &record.version
        } else {
            &record.id
        };

        AddonSignal::from_record(name, record, Self::fingerprint(generation) as f64)
    }

    fn label_values<'a>(&self, signal: &'a AddonSignal) -> Vec<&'a str> {
        vec![signal.name.as_str()]
    }
}

/// Unix time of the last poll that saw the addon, with the full identity in labels
#[derive(Debug, Clone, Copy)]
pub struct LastSeenTimestamp {
    clock: fn() -> i64,
}

impl Default for LastSeenTimestamp {
    fn default() -> Self {
        Self::new()
    }
}

impl LastSeenTimestamp {
    pub fn new() -> Self {
        Self {
            clock: || chrono::Utc::now().timestamp(),
        }
    }

    /// Use a custom source of Unix seconds
    pub fn with_clock(clock: fn() -> i64) -> Self {
        Self { clock }
    }
}

impl SignalEncoder for LastSeenTimestamp {
    fn label_names(&self) -> &'static [&'static str] {
        FULL_LABELS
    }

    fn encode(&self, name: &str, record: &AddonRecord) -> AddonSignal {
        AddonSignal::from_record(name, record, (self.clock)() as f64)
    }

    fn label_values<'a>(&self, signal: &'a AddonSignal) -> Vec<&'a str> {
        vec![
            signal.name.as_str(),
            signal.channel.as_str(),
            signal.version.as_str(),
            signal.id.as_str(),
        ]
    }
}
