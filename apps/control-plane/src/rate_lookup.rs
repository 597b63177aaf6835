// [apps/control-plane/src/rate_lookup.rs]
//! Per-model pricing for the gateway's metering step. The pipeline
//! takes an explicit `RateCard` rather than looking one up itself, so
//! something has to own the provider/model -> rate mapping; this is it.

use wopr_gateway::RateCard;

pub trait RateLookup: Send + Sync {
    fn rate_for(&self, provider: &str, capability: &str, model: Option<&str>) -> RateCard;
}

/// A provider/model override table with a fallback rate for anything
/// not explicitly priced. Capability is accepted for future per-endpoint
/// pricing but isn't consulted today — every route bills by token count.
pub struct StaticRateLookup {
    default_rate: RateCard,
    overrides: Vec<(String, String, RateCard)>,
}

impl StaticRateLookup {
    pub fn new(default_rate: RateCard) -> Self {
        Self { default_rate, overrides: Vec::new() }
    }

    pub fn with_override(mut self, provider: impl Into<String>, model: impl Into<String>, card: RateCard) -> Self {
        self.overrides.push((provider.into(), model.into(), card));
        self
    }
}

impl RateLookup for StaticRateLookup {
    fn rate_for(&self, provider: &str, _capability: &str, model: Option<&str>) -> RateCard {
        if let Some(model) = model {
            if let Some((_, _, card)) = self.overrides.iter().find(|(p, m, _)| p == provider && m == model) {
                return *card;
            }
        }
        tracing::warn!(provider, model, "no rate override for model, falling back to default rate");
        self.default_rate
    }
}
