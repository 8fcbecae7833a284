use crate::core::impact::{combine, is_non_zero, non_zero, sanitize};
use crate::core::{ImpactBundle, ImpactResolved, ImpactSources, ImpactVector, SourceEntry, SourceMode};

/// The four inputs of one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BundleInputs {
    pub scope3_calculated: Option<ImpactVector>,
    pub scope3_manual: Option<ImpactVector>,
    pub total_manual: Option<ImpactVector>,
    /// The profile's own (Scope 1/2) contribution.
    pub step: Option<ImpactVector>,
}

/// Manual-over-calculated policy for the Scope 3 and Total slots.
///
/// Holds no state: re-run whenever any input changes.
pub fn resolve_bundle(inputs: &BundleInputs) -> ImpactBundle {
    let step = inputs.step.as_ref().map(sanitize).unwrap_or(ImpactVector::ZERO);
    let scope3_manual = non_zero(inputs.scope3_manual.as_ref());
    let scope3_calculated = non_zero(inputs.scope3_calculated.as_ref());
    let total_manual = non_zero(inputs.total_manual.as_ref());

    let (scope3, scope3_mode) = match (scope3_manual, scope3_calculated) {
        (Some(manual), _) => (Some(manual), SourceMode::Manual),
        (None, Some(calculated)) => (Some(calculated), SourceMode::Calculated),
        (None, None) => (None, SourceMode::None),
    };

    let total_calculated = if scope3.is_some() || is_non_zero(Some(&step)) {
        Some(combine(scope3.as_ref(), Some(&step)))
    } else {
        None
    };

    let (total, total_mode) = match total_manual {
        Some(manual) => (Some(manual), SourceMode::Manual),
        None => (total_calculated, SourceMode::Calculated),
    };

    ImpactBundle {
        sources: ImpactSources {
            scope3: SourceEntry {
                mode: scope3_mode,
                calculated: scope3_calculated,
                manual: scope3_manual,
            },
            total: SourceEntry {
                mode: total_mode,
                calculated: total_calculated,
                manual: total_manual,
            },
        },
        resolved: ImpactResolved {
            scope3_per_kg: scope3,
            total_per_kg: total,
        },
    }
}
