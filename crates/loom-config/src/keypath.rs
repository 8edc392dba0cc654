// SPDX-License-Identifier: MIT OR Apache-2.0
//! Key-path validation and partition derivation.

use crate::ConfigError;
use loom_core::GLOBAL_PARTITION;

/// Validate a configuration key path.
///
/// Paths match `[A-Za-z0-9_/-]+` with no leading, trailing, or consecutive
/// slashes.
pub fn validate_key_path(path: &str) -> Result<(), ConfigError> {
    let reject = |reason: &str| {
        Err(ConfigError::InvalidKeyPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };
    if path.is_empty() {
        return reject("empty path");
    }
    if path.starts_with('/') {
        return reject("leading '/'");
    }
    if path.ends_with('/') {
        return reject("trailing '/'");
    }
    if path.contains("//") {
        return reject("consecutive '/'");
    }
    if let Some(bad) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/')))
    {
        return Err(ConfigError::InvalidKeyPath {
            path: path.to_string(),
            reason: format!("character '{bad}' outside [A-Za-z0-9_/-]"),
        });
    }
    Ok(())
}

/// Derive the persistence partition for a key path.
///
/// Paths are partitioned by their second segment (the tenant position in a
/// `client/tenant/…/key` fallback path); paths under `global/` and bare keys
/// fall into the reserved global partition.
#[must_use]
pub fn partition_of(path: &str) -> &str {
    let mut segments = path.split('/');
    let first = segments.next().unwrap_or_default();
    if first == GLOBAL_PARTITION {
        return GLOBAL_PARTITION;
    }
    match segments.next() {
        // `second` is only a tenant when a key still follows it.
        Some(second) if segments.next().is_some() => second,
        _ => GLOBAL_PARTITION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_paths() {
        for p in ["llm", "acme/finance/llm", "global/llm", "a-b_c/d0"] {
            validate_key_path(p).unwrap();
        }
    }

    #[test]
    fn rejects_malformed_paths() {
        for p in ["", "/llm", "llm/", "a//b", "a b", "a.b", "a/b!"] {
            let err = validate_key_path(p).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidKeyPath { .. }), "{p}");
        }
    }

    #[test]
    fn partition_is_second_segment_for_deep_paths() {
        assert_eq!(partition_of("acme/finance/llm"), "finance");
        assert_eq!(partition_of("acme/finance/prod/llm"), "finance");
    }

    #[test]
    fn shallow_and_global_paths_use_global_partition() {
        assert_eq!(partition_of("llm"), "global");
        assert_eq!(partition_of("acme/llm"), "global");
        assert_eq!(partition_of("global/llm"), "global");
        assert_eq!(partition_of("global/anything/llm"), "global");
    }
}
