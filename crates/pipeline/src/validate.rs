//! Batch validation of the loaded delivery set.

use std::collections::HashMap;

use delivery_core::entity::Entity;
use delivery_core::events::DeliveryObserver;
use delivery_core::types::EntityId;
use delivery_core::validation::validate_entity;
use delivery_core::version::Deliverables;

/// Outcome of validating a delivery set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub passed: usize,
    pub failed: usize,
}

impl ValidationSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Validate every version of every entity. Failed versions keep their
/// diagnostics in `validation_error`; nothing stops at the first failure.
pub fn validate_all(entities: &mut [Entity], observer: &dyn DeliveryObserver) -> ValidationSummary {
    tracing::info!(entities = entities.len(), "Starting validation of versions");

    for entity in entities.iter_mut() {
        validate_entity(entity, observer);
    }

    let mut summary = ValidationSummary::default();
    for version in entities.iter().flat_map(Entity::versions) {
        if version.validation_error.is_empty() {
            summary.passed += 1;
        } else {
            summary.failed += 1;
        }
    }

    tracing::info!(passed = summary.passed, failed = summary.failed, "Validation finished");
    summary
}

/// Load-time deliverables of every version that passed validation.
pub fn passed_deliverables(entities: &[Entity]) -> HashMap<EntityId, Deliverables> {
    entities
        .iter()
        .flat_map(Entity::versions)
        .filter(|version| version.validation_error.is_empty())
        .map(|version| (version.id, version.default_deliverables()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
