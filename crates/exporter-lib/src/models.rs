//! Core data models for the addon exporter

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addon installation metadata stored in one namespace annotation.
///
/// kops writes these annotations from Go, so decoding is as lenient as Go's
/// `encoding/json`:
/// - Keys match field names case-insensitively.
/// - A repeated key overwrites the earlier value.
/// - A `null` field leaves the field untouched.
/// - A top-level `null` yields an empty record.
///
/// Absent fields stay empty and unknown fields are ignored. Anything that is
/// not an object or `null`, or a field value that is not a string, is an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddonRecord {
    pub channel: String,
    pub version: String,
    pub id: String,
}

impl AddonRecord {
    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        // 'ſ' and the Kelvin sign fold to 's' and 'k' under simple case folding
        let folded: String = key
            .chars()
            .map(|c| match c {
                '\u{17f}' => 's',
                '\u{212a}' => 'k',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match folded.as_str() {
            "channel" => Some(&mut self.channel),
            "version" => Some(&mut self.version),
            "id" => Some(&mut self.id),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for AddonRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_option(AddonRecordVisitor)
    }
}

struct AddonRecordVisitor;

impl<'de> Visitor<'de> for AddonRecordVisitor {
    type Value = AddonRecord;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an addon object or null")
    }

    fn visit_none<E: de::Error>(self) -> Result<AddonRecord, E> {
        Ok(AddonRecord::default())
    }

    fn visit_unit<E: de::Error>(self) -> Result<AddonRecord, E> {
        Ok(AddonRecord::default())
    }

    fn visit_some<D>(self, deserializer: D) -> Result<AddonRecord, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }

    fn visit_map<A>(self, mut map: A) -> Result<AddonRecord, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut record = AddonRecord::default();

        while let Some(key) = map.next_key::<String>()? {
            match record.field_mut(&key) {
                Some(field) => {
                    if let Some(value) = map.next_value::<Option<String>>()? {
                        *field = value;
                    }
                }
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(record)
    }
}

/// One annotation on the watched namespace, as returned by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationEntry {
    pub key: String,
    pub raw_value: String,
}

impl AnnotationEntry {
    pub fn new(key: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw_value: raw_value.into(),
        }
    }
}

/// Value and identity written into the metric registry for one addon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonSignal {
    /// Addon name, the annotation key without the `addons.k8s.io/` prefix
    pub name: String,
    pub channel: String,
    pub version: String,
    pub id: String,
    pub value: f64,
}

impl AddonSignal {
    pub fn from_record(name: impl Into<String>, record: &AddonRecord, value: f64) -> Self {
        Self {
            name: name.into(),
            channel: record.channel.clone(),
            version: record.version.clone(),
            id: record.id.clone(),
            value,
        }
    }
}
