//! Model catalog entries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A capability tag a model may support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Multi-step analytical reasoning.
    Reasoning,
    /// Image understanding.
    Vision,
    /// Live market/portfolio data grounding.
    LiveData,
}

/// Operational tier. Ordered: `Standard < Premium`; a caller's tier bounds
/// which descriptors it may use.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Default tier, available to every caller.
    #[default]
    Standard,
    /// Premium tier, gated by the caller's entitlement.
    Premium,
}

/// One catalog entry.
///
/// The id is globally unique and stable across health-check cycles; only
/// the `healthy` flag is mutated by probes, and never mid-turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// Stable model id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Provider key (guarded as `model:<provider>`).
    pub provider: String,
    /// Supported capability tags.
    pub capabilities: BTreeSet<Capability>,
    /// Context window in tokens.
    pub context_window: u32,
    /// Input price per million tokens, USD.
    pub input_price_per_mtok: f64,
    /// Output price per million tokens, USD.
    pub output_price_per_mtok: f64,
    /// Operational tier.
    pub tier: ModelTier,
    /// Live health flag, owned by the probe loop.
    pub healthy: bool,
}

impl ModelDescriptor {
    /// Whether this descriptor satisfies a capability requirement set
    /// (its tags must be a superset).
    #[must_use]
    pub fn supports(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Whether a caller of `caller_tier` may use this descriptor.
    #[must_use]
    pub fn permitted_for(&self, caller_tier: ModelTier) -> bool {
        self.tier <= caller_tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(caps: &[Capability], tier: ModelTier) -> ModelDescriptor {
        ModelDescriptor {
            id: "m1".into(),
            display_name: "Model One".into(),
            provider: "alpha".into(),
            capabilities: caps.iter().copied().collect(),
            context_window: 128_000,
            input_price_per_mtok: 3.0,
            output_price_per_mtok: 15.0,
            tier,
            healthy: true,
        }
    }

    #[test]
    fn supports_requires_superset() {
        let d = descriptor(&[Capability::Reasoning, Capability::Vision], ModelTier::Standard);
        assert!(d.supports(&BTreeSet::new()));
        assert!(d.supports(&[Capability::Reasoning].into_iter().collect()));
        assert!(!d.supports(&[Capability::LiveData].into_iter().collect()));
        assert!(!d.supports(
            &[Capability::Reasoning, Capability::LiveData]
                .into_iter()
                .collect()
        ));
    }

    #[test]
    fn tier_gating() {
        let standard = descriptor(&[], ModelTier::Standard);
        let premium = descriptor(&[], ModelTier::Premium);
        assert!(standard.permitted_for(ModelTier::Standard));
        assert!(standard.permitted_for(ModelTier::Premium));
        assert!(!premium.permitted_for(ModelTier::Standard));
        assert!(premium.permitted_for(ModelTier::Premium));
    }

    #[test]
    fn capability_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Capability::LiveData).unwrap(),
            serde_json::json!("live_data")
        );
        assert_eq!(
            serde_json::to_value(ModelTier::Premium).unwrap(),
            serde_json::json!("premium")
        );
    }
}
