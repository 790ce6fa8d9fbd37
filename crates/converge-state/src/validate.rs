//! Spec validation, run before a spec is ever stored.

use converge_core::IntOrPercent;

use crate::error::SpecError;
use crate::types::WorkloadSpec;

/// Check a submitted spec. Revision ordering is checked by the store,
/// which knows the stored revision.
pub fn validate_spec(spec: &WorkloadSpec) -> Result<(), SpecError> {
    if spec.name.is_empty() {
        return Err(SpecError::EmptyName);
    }
    let name_ok = spec.name.len() <= 63
        && spec
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !name_ok {
        return Err(SpecError::InvalidName(spec.name.clone()));
    }

    if spec.min_replicas > spec.max_replicas {
        return Err(SpecError::BoundsInverted {
            min: spec.min_replicas,
            max: spec.max_replicas,
        });
    }

    if spec.target_utilization_percent == 0 || spec.target_utilization_percent > 100 {
        return Err(SpecError::TargetUtilization(spec.target_utilization_percent));
    }

    if let Some(replicas) = spec.replicas
        && (replicas < spec.min_replicas || replicas > spec.max_replicas)
    {
        return Err(SpecError::ReplicasOutOfBounds {
            replicas,
            min: spec.min_replicas,
            max: spec.max_replicas,
        });
    }

    if let IntOrPercent::Percent(p) = spec.max_unavailable
        && p > 100
    {
        return Err(SpecError::UnavailablePercent(p));
    }

    let surge_ok = match spec.max_surge {
        IntOrPercent::Int(n) => n <= spec.max_replicas,
        IntOrPercent::Percent(p) => p <= 100,
    };
    if !surge_ok {
        return Err(SpecError::SurgeOutOfRange {
            surge: spec.max_surge,
            max: spec.max_replicas,
        });
    }

    if spec.behavior.scale_up_percent == 0 && spec.behavior.scale_up_min_step == 0 {
        return Err(SpecError::ScaleUpDisabled);
    }

    if spec.template.image.trim().is_empty() {
        return Err(SpecError::EmptyImage);
    }

    Ok(())
}
