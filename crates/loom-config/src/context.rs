// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resolution context and fallback-path generation.

use loom_core::GLOBAL_PARTITION;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The context a key is resolved in.
///
/// Recognized dimensions participate in fallback-path generation in the
/// fixed priority order `client_id, tenant_id, user_id, environment,
/// region`; any dimension may be absent.  `actor_id` and the open extension
/// map travel with the context but do not widen the fallback search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigContext {
    /// Client (top-level account) dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Tenant dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// User dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Deployment environment dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Region dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Originating actor, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Arbitrary string-valued extensions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

impl ConfigContext {
    /// An empty context: only the bare key and the global fallback resolve.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client dimension.
    #[must_use]
    pub fn client(mut self, v: impl Into<String>) -> Self {
        self.client_id = Some(v.into());
        self
    }

    /// Set the tenant dimension.
    #[must_use]
    pub fn tenant(mut self, v: impl Into<String>) -> Self {
        self.tenant_id = Some(v.into());
        self
    }

    /// Set the user dimension.
    #[must_use]
    pub fn user(mut self, v: impl Into<String>) -> Self {
        self.user_id = Some(v.into());
        self
    }

    /// Set the environment dimension.
    #[must_use]
    pub fn environment(mut self, v: impl Into<String>) -> Self {
        self.environment = Some(v.into());
        self
    }

    /// Set the region dimension.
    #[must_use]
    pub fn region(mut self, v: impl Into<String>) -> Self {
        self.region = Some(v.into());
        self
    }

    /// Set the originating actor id.
    #[must_use]
    pub fn actor(mut self, v: impl Into<String>) -> Self {
        self.actor_id = Some(v.into());
        self
    }

    /// Attach an extension dimension.
    #[must_use]
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Present recognized dimensions, in priority order.
    fn present_dimensions(&self) -> Vec<&str> {
        [
            self.client_id.as_deref(),
            self.tenant_id.as_deref(),
            self.user_id.as_deref(),
            self.environment.as_deref(),
            self.region.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Generate every fallback path for `key`, most specific first.
    ///
    /// All non-empty subsets of the present dimensions are enumerated, each
    /// joined in priority order with the key appended; subsets are ordered
    /// by decreasing cardinality and, within equal cardinality, by the
    /// priority order.  The bare key and `global/<key>` terminate the list.
    #[must_use]
    pub fn fallback_paths(&self, key: &str) -> Vec<String> {
        let dims = self.present_dimensions();
        let mut paths = Vec::new();
        for size in (1..=dims.len()).rev() {
            for combo in combinations(dims.len(), size) {
                let mut segments: Vec<&str> = combo.iter().map(|&i| dims[i]).collect();
                segments.push(key);
                paths.push(segments.join("/"));
            }
        }
        paths.push(key.to_string());
        paths.push(format!("{GLOBAL_PARTITION}/{key}"));
        paths
    }
}

/// Index combinations of size `k` out of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(k);
    fn walk(start: usize, n: usize, k: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            walk(i + 1, n, k, current, out);
            current.pop();
        }
    }
    walk(0, n, k, &mut current, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_yields_bare_and_global() {
        let paths = ConfigContext::new().fallback_paths("llm");
        assert_eq!(paths, vec!["llm".to_string(), "global/llm".to_string()]);
    }

    #[test]
    fn single_dimension_inserts_one_prefix() {
        let paths = ConfigContext::new().tenant("finance").fallback_paths("llm");
        assert_eq!(paths, vec!["finance/llm", "llm", "global/llm"]);
    }

    #[test]
    fn subsets_order_by_cardinality_then_priority() {
        let ctx = ConfigContext::new()
            .client("acme")
            .tenant("finance")
            .environment("prod");
        let paths = ctx.fallback_paths("llm");
        assert_eq!(
            paths,
            vec![
                "acme/finance/prod/llm",
                "acme/finance/llm",
                "acme/prod/llm",
                "finance/prod/llm",
                "acme/llm",
                "finance/llm",
                "prod/llm",
                "llm",
                "global/llm",
            ]
        );
    }

    #[test]
    fn all_five_dimensions_enumerate_every_subset() {
        let ctx = ConfigContext::new()
            .client("c")
            .tenant("t")
            .user("u")
            .environment("e")
            .region("r");
        let paths = ctx.fallback_paths("k");
        // 2^5 - 1 subsets plus the bare key and the global fallback.
        assert_eq!(paths.len(), 31 + 2);
        assert_eq!(paths[0], "c/t/u/e/r/k");
        assert_eq!(paths[paths.len() - 2], "k");
        assert_eq!(paths[paths.len() - 1], "global/k");
    }

    #[test]
    fn actor_id_and_extensions_do_not_widen_the_search() {
        let a = ConfigContext::new().tenant("t").fallback_paths("k");
        let b = ConfigContext::new()
            .tenant("t")
            .actor("actor-1")
            .extension("channel", "email")
            .fallback_paths("k");
        assert_eq!(a, b);
    }

    #[test]
    fn context_roundtrips_through_json() {
        let ctx = ConfigContext::new()
            .client("acme")
            .extension("channel", "email");
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ConfigContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, back);
    }
}
