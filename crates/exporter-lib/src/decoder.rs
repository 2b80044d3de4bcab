//! Addon annotation decoding

use crate::error::DecodeError;
use crate::models::AddonRecord;

/// Prefix every addon annotation key carries
pub const ADDON_PREFIX: &str = "addons.k8s.io/";

/// Returns the addon name for an annotation key, or `None` when the key
/// does not carry the addon prefix.
pub fn addon_name(key: &str) -> Option<&str> {
    key.strip_prefix(ADDON_PREFIX)
}

/// Decode one annotation value into an [`AddonRecord`].
pub fn decode(raw_value: &str) -> Result<AddonRecord, DecodeError> {
    Ok(serde_json::from_str(raw_value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_record() {
        let record = decode(r#"{"channel":"stable","version":"1.2.3","id":"k8s-1.16"}"#).unwrap();
        assert_eq!(record.channel, "stable");
        assert_eq!(record.version, "1.2.3");
        assert_eq!(record.id, "k8s-1.16");
    }

    #[test]
    fn test_decode_missing_fields_default_to_empty() {
        let record = decode(r#"{"version":"1.4.0"}"#).unwrap();
        assert_eq!(record.channel, "");
        assert_eq!(record.version, "1.4.0");
        assert_eq!(record.id, "");

        assert_eq!(decode("{}").unwrap(), AddonRecord::default());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let record =
            decode(r#"{"channel":"s3://bucket/addons","version":"2.0","manifest":"x.yaml"}"#)
                .unwrap();
        assert_eq!(record.channel, "s3://bucket/addons");
        assert_eq!(record.version, "2.0");
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(decode("{\"channel\":").is_err());
        assert!(decode("not json").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(decode("\"1.2.3\"").is_err());
        assert!(decode("[]").is_err());
        assert!(decode("42").is_err());
        assert!(decode(r#"{"version":123}"#).is_err());
        assert!(decode(r#"{"id":["a"]}"#).is_err());
    }

    #[test]
    fn test_decode_null_values() {
        let record = decode(r#"{"channel":"stable","version":"1.2.3","id":null}"#).unwrap();
        assert_eq!(record.channel, "stable");
        assert_eq!(record.version, "1.2.3");
        assert_eq!(record.id, "");

        // null keeps whatever an earlier key set
        let record = decode(r#"{"version":"1.2.3","version":null}"#).unwrap();
        assert_eq!(record.version, "1.2.3");

        assert_eq!(decode("null").unwrap(), AddonRecord::default());
        assert_eq!(decode(" null ").unwrap(), AddonRecord::default());
    }

    #[test]
    fn test_decode_duplicate_key_last_wins() {
        let record = decode(r#"{"version":"1","version":"2"}"#).unwrap();
        assert_eq!(record.version, "2");

        let record = decode(r#"{"Version":"1","version":"2","VERSION":"3"}"#).unwrap();
        assert_eq!(record.version, "3");
    }

    #[test]
    fn test_decode_keys_match_case_insensitively() {
        let record = decode(r#"{"Channel":"stable","Version":"1.2.3","ID":"k8s-1.16"}"#).unwrap();
        assert_eq!(record.channel, "stable");
        assert_eq!(record.version, "1.2.3");
        assert_eq!(record.id, "k8s-1.16");

        let record = decode("{\"ver\u{17f}ion\":\"1.2.3\"}").unwrap();
        assert_eq!(record.version, "1.2.3");
    }

    #[test]
    fn test_capitalized_keys_keep_hashed_value() {
        use crate::encoder::{HashedIdentity, SignalEncoder};

        let record = decode(r#"{"Channel":"stable","Version":"1.2.3"}"#).unwrap();
        let signal = HashedIdentity.encode("dns", &record);
        assert_eq!(signal.value, 11593946.0);
    }

    #[test]
    fn test_addon_name() {
        assert_eq!(addon_name("addons.k8s.io/dns"), Some("dns"));
        assert_eq!(addon_name("addons.k8s.io/core.addons.k8s.io"), Some("core.addons.k8s.io"));
        assert_eq!(addon_name("kubectl.kubernetes.io/last-applied"), None);
        assert_eq!(addon_name("dns"), None);
    }
}
