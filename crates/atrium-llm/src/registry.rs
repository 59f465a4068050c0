//! Model registry: catalog, validation with deterministic fallback, and
//! health probing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use atrium_resilience::ResilienceRegistry;

use crate::backend::ModelBackend;
use crate::descriptor::{Capability, ModelDescriptor, ModelTier};

/// Registry operation failure.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No healthy descriptor satisfies the requirement set at all.
    #[error("no healthy model satisfies requirements {required:?}")]
    NoHealthyModel {
        /// Capability tags that could not be satisfied.
        required: Vec<Capability>,
    },
    /// The id does not exist in the catalog.
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    /// The model exists but is currently unhealthy.
    #[error("model `{0}` is unhealthy")]
    UnhealthyModel(String),
    /// No backend is registered for the descriptor's provider.
    #[error("no backend registered for provider `{0}`")]
    NoBackend(String),
}

/// Result of [`ModelRegistry::validate`].
///
/// Never an error for an unknown-but-recoverable model: when the requested
/// model cannot serve the turn, `valid` is false, `issues` explains why,
/// and `final_model` carries the fallback that will serve instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    /// Whether the requested model was usable as-is.
    pub valid: bool,
    /// The descriptor that will serve the turn (requested or fallback).
    pub final_model: ModelDescriptor,
    /// Why the requested model was rejected, empty when valid.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    /// The requested id, when a fallback was substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fell_back_from: Option<String>,
}

/// Catalog of model backends with tier/capability metadata and live health.
pub struct ModelRegistry {
    catalog: RwLock<HashMap<String, ModelDescriptor>>,
    backends: RwLock<HashMap<String, Arc<dyn ModelBackend>>>,
    resilience: Arc<ResilienceRegistry>,
}

impl ModelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(resilience: Arc<ResilienceRegistry>) -> Self {
        Self {
            catalog: RwLock::new(HashMap::new()),
            backends: RwLock::new(HashMap::new()),
            resilience,
        }
    }

    /// Add or replace a catalog entry.
    pub fn register_model(&self, descriptor: ModelDescriptor) {
        let _ = self
            .catalog
            .write()
            .insert(descriptor.id.clone(), descriptor);
    }

    /// Register the backend serving a provider's models.
    pub fn register_backend(&self, backend: Arc<dyn ModelBackend>) {
        let _ = self
            .backends
            .write()
            .insert(backend.provider().to_string(), backend);
    }

    /// All descriptors with current health, sorted by id.
    #[must_use]
    pub fn list_available(&self) -> Vec<ModelDescriptor> {
        let mut models: Vec<ModelDescriptor> = self.catalog.read().values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Look up one descriptor.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.catalog.read().get(id).cloned()
    }

    /// Set a model's health flag (probe results, tests, operator action).
    pub fn set_health(&self, id: &str, healthy: bool) {
        if let Some(descriptor) = self.catalog.write().get_mut(id) {
            descriptor.healthy = healthy;
        }
    }

    /// Backend serving a descriptor's provider.
    pub fn backend_for(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn ModelBackend>, RegistryError> {
        self.backends
            .read()
            .get(&descriptor.provider)
            .cloned()
            .ok_or_else(|| RegistryError::NoBackend(descriptor.provider.clone()))
    }

    /// Validate a requested model against the caller's capability
    /// requirements and tier.
    ///
    /// A requested model that is unknown, unhealthy, tier-gated, or missing
    /// capabilities does not fail the turn: the highest-tier healthy
    /// compatible descriptor is proposed as fallback. Only when no healthy
    /// compatible model exists at all does this return
    /// [`RegistryError::NoHealthyModel`].
    #[instrument(skip(self), fields(requested))]
    pub fn validate(
        &self,
        requested: Option<&str>,
        required: &BTreeSet<Capability>,
        caller_tier: ModelTier,
    ) -> Result<Validation, RegistryError> {
        let catalog = self.catalog.read();
        let mut issues = Vec::new();

        if let Some(id) = requested {
            match catalog.get(id) {
                Some(d) if !d.healthy => issues.push(format!("model `{id}` is unhealthy")),
                Some(d) if !d.permitted_for(caller_tier) => {
                    issues.push(format!("model `{id}` requires a higher tier"));
                }
                Some(d) if !d.supports(required) => {
                    issues.push(format!("model `{id}` lacks required capabilities"));
                }
                Some(d) => {
                    debug!(model = id, "requested model validated");
                    return Ok(Validation {
                        valid: true,
                        final_model: d.clone(),
                        issues,
                        fell_back_from: None,
                    });
                }
                None => issues.push(format!("model `{id}` is not in the catalog")),
            }
        }

        let fallback = Self::best_candidate(catalog.values(), required, caller_tier)
            .ok_or_else(|| RegistryError::NoHealthyModel {
                required: required.iter().copied().collect(),
            })?;

        if requested.is_some() {
            warn!(
                requested = requested.unwrap_or_default(),
                fallback = %fallback.id,
                "requested model rejected, proposing fallback"
            );
        }
        Ok(Validation {
            valid: false,
            fell_back_from: requested.map(String::from),
            final_model: fallback,
            issues,
        })
    }

    /// Deterministic fallback order: highest tier first, then cheapest
    /// input price, then id.
    fn best_candidate<'a>(
        candidates: impl Iterator<Item = &'a ModelDescriptor>,
        required: &BTreeSet<Capability>,
        caller_tier: ModelTier,
    ) -> Option<ModelDescriptor> {
        candidates
            .filter(|d| d.healthy && d.permitted_for(caller_tier) && d.supports(required))
            .min_by(|a, b| {
                b.tier
                    .cmp(&a.tier)
                    .then(
                        a.input_price_per_mtok
                            .total_cmp(&b.input_price_per_mtok),
                    )
                    .then(a.id.cmp(&b.id))
            })
            .cloned()
    }

    /// Validate a model switch for a session and return the new active
    /// descriptor. Persisting the switch on the session row and announcing
    /// it to surfaces is the caller's job.
    #[instrument(skip(self))]
    pub fn switch_active_model(
        &self,
        session_id: &str,
        from: &str,
        to: &str,
    ) -> Result<ModelDescriptor, RegistryError> {
        let descriptor = self
            .get(to)
            .ok_or_else(|| RegistryError::UnknownModel(to.to_string()))?;
        if !descriptor.healthy {
            return Err(RegistryError::UnhealthyModel(to.to_string()));
        }
        info!(session_id, from, to, "active model switched");
        Ok(descriptor)
    }

    /// Probe every registered provider through its circuit and update the
    /// health flag of that provider's models. One dead provider cannot
    /// block probing of the others.
    pub async fn run_health_probes(&self) {
        let backends: Vec<Arc<dyn ModelBackend>> =
            self.backends.read().values().cloned().collect();

        for backend in backends {
            let provider = backend.provider().to_string();
            let key = format!("model:{provider}");
            let healthy = self
                .resilience
                .guard(&key, backend.probe())
                .await
                .is_ok();

            gauge!("provider_healthy", "provider" => provider.clone())
                .set(if healthy { 1.0 } else { 0.0 });
            let mut catalog = self.catalog.write();
            for descriptor in catalog.values_mut() {
                if descriptor.provider == provider {
                    descriptor.healthy = healthy;
                }
            }
            debug!(provider, healthy, "provider probe finished");
        }
    }
}
