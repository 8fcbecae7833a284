pub mod aggregate;
pub mod graph;
pub mod impact;
pub mod resolve;

use serde::{Deserialize, Serialize};

/// Per-kg environmental impact of one profile or contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactVector {
    pub co2_per_kg: f64,
    pub water_per_kg: f64,
    pub energy_per_kg: f64,
    pub pm25_per_kg: f64,
}

impl ImpactVector {
    pub const ZERO: ImpactVector = ImpactVector {
        co2_per_kg: 0.0,
        water_per_kg: 0.0,
        energy_per_kg: 0.0,
        pm25_per_kg: 0.0,
    };

    pub fn new(co2_per_kg: f64, water_per_kg: f64, energy_per_kg: f64, pm25_per_kg: f64) -> Self {
        Self {
            co2_per_kg,
            water_per_kg,
            energy_per_kg,
            pm25_per_kg,
        }
    }

    /// Multiply every field by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        let v = impact::sanitize(self);
        Self {
            co2_per_kg: v.co2_per_kg * factor,
            water_per_kg: v.water_per_kg * factor,
            energy_per_kg: v.energy_per_kg * factor,
            pm25_per_kg: v.pm25_per_kg * factor,
        }
    }
}

impl std::ops::Add for ImpactVector {
    type Output = ImpactVector;

    fn add(self, rhs: ImpactVector) -> ImpactVector {
        impact::combine(Some(&self), Some(&rhs))
    }
}

/// Supply-chain stage a profile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    RawMaterials,
    Yarn,
    Fabric,
    Manufacturer,
    Transport,
    Brand,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::RawMaterials,
        Phase::Yarn,
        Phase::Fabric,
        Phase::Manufacturer,
        Phase::Transport,
        Phase::Brand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RawMaterials => "RawMaterials",
            Phase::Yarn => "Yarn",
            Phase::Fabric => "Fabric",
            Phase::Manufacturer => "Manufacturer",
            Phase::Transport => "Transport",
            Phase::Brand => "Brand",
        }
    }

    /// Process phases own weighted component links and upstream transport.
    pub fn needs_components(&self) -> bool {
        matches!(self, Phase::Yarn | Phase::Fabric | Phase::Manufacturer)
    }

    pub fn has_chemicals(&self) -> bool {
        matches!(
            self,
            Phase::RawMaterials | Phase::Yarn | Phase::Fabric | Phase::Manufacturer
        )
    }

    pub fn profile_type(&self) -> &'static str {
        if *self == Phase::RawMaterials {
            "material"
        } else {
            "process"
        }
    }

    /// Allowed process types; the first one is the default.
    pub fn process_options(&self) -> &'static [&'static str] {
        match self {
            Phase::RawMaterials => &["Material"],
            Phase::Yarn => &["Spinning", "YarnDyeing"],
            Phase::Fabric => &["KnittingWeaving", "Dyeing", "Finishing"],
            Phase::Manufacturer => &["CutMakeTrim", "GarmentDyeing"],
            Phase::Transport => &["Transport"],
            Phase::Brand => &["Brand"],
        }
    }

    pub fn default_process_type(&self) -> &'static str {
        self.process_options()[0]
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown phase '{s}', expected one of RawMaterials/Yarn/Fabric/Manufacturer/Transport/Brand"
                )
            })
    }
}

/// Weighted reference from a process profile to an upstream profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentLink {
    pub component_profile_id: String,
    pub percent: f64,
}

impl ComponentLink {
    pub fn new(component_profile_id: impl Into<String>, percent: f64) -> Self {
        Self {
            component_profile_id: component_profile_id.into(),
            percent,
        }
    }
}

/// Why a profile is referenced; used to name the missing side in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    Component,
    Transport,
    Manufacturer,
}

impl ReferenceRole {
    pub fn label(&self) -> &'static str {
        match self {
            ReferenceRole::Component => "Upstream",
            ReferenceRole::Transport => "Transport",
            ReferenceRole::Manufacturer => "Manufacturer",
        }
    }
}

/// Which branch produced a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Manual,
    Calculated,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub mode: SourceMode,
    pub calculated: Option<ImpactVector>,
    pub manual: Option<ImpactVector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSources {
    pub scope3: SourceEntry,
    pub total: SourceEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResolved {
    pub scope3_per_kg: Option<ImpactVector>,
    pub total_per_kg: Option<ImpactVector>,
}

/// Resolver output: both candidates per slot plus the chosen values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactBundle {
    pub sources: ImpactSources,
    pub resolved: ImpactResolved,
}

/// What an aggregation can read from a referenced profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpactView {
    pub resolved_total: Option<ImpactVector>,
    pub calculated_total: Option<ImpactVector>,
    pub per_unit: Option<ImpactVector>,
}

impl ImpactView {
    pub fn from_per_unit(per_unit: ImpactVector) -> Self {
        Self {
            per_unit: Some(per_unit),
            ..Self::default()
        }
    }

    /// Resolved total, else calculated total, else raw per-unit, else zero.
    pub fn best_known(&self) -> ImpactVector {
        self.resolved_total
            .or(self.calculated_total)
            .or(self.per_unit)
            .map(|v| impact::sanitize(&v))
            .unwrap_or(ImpactVector::ZERO)
    }
}

/// Validation knobs for aggregation, taken from `[ledger]` config.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRules {
    pub min_profile_id_len: usize,
    pub percent_total: f64,
}

impl Default for AggregationRules {
    fn default() -> Self {
        Self {
            min_profile_id_len: 10,
            percent_total: 100.0,
        }
    }
}

impl AggregationRules {
    pub fn is_well_formed(&self, id: &str) -> bool {
        id.trim().chars().count() >= self.min_profile_id_len
    }

    /// Compare after rounding to 2 decimals.
    pub fn percent_total_matches(&self, total: f64) -> bool {
        (total * 100.0).round() / 100.0 == self.percent_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_roundtrips_through_str() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("yarn".parse::<Phase>().unwrap(), Phase::Yarn);
        assert!("Weaving".parse::<Phase>().is_err());
    }

    #[test]
    fn only_process_phases_need_components() {
        let with: Vec<Phase> = Phase::ALL.into_iter().filter(|p| p.needs_components()).collect();
        assert_eq!(with, vec![Phase::Yarn, Phase::Fabric, Phase::Manufacturer]);
        assert_eq!(Phase::RawMaterials.profile_type(), "material");
        assert_eq!(Phase::Transport.profile_type(), "process");
        assert_eq!(Phase::Fabric.default_process_type(), "KnittingWeaving");
    }

    #[test]
    fn best_known_prefers_resolved_total() {
        let view = ImpactView {
            resolved_total: Some(ImpactVector::new(3.0, 0.0, 0.0, 0.0)),
            calculated_total: Some(ImpactVector::new(2.0, 0.0, 0.0, 0.0)),
            per_unit: Some(ImpactVector::new(1.0, 0.0, 0.0, 0.0)),
        };
        assert_eq!(view.best_known().co2_per_kg, 3.0);
    }

    #[test]
    fn best_known_falls_back_in_order() {
        let calculated = ImpactView {
            calculated_total: Some(ImpactVector::new(2.0, 0.0, 0.0, 0.0)),
            per_unit: Some(ImpactVector::new(1.0, 0.0, 0.0, 0.0)),
            ..ImpactView::default()
        };
        assert_eq!(calculated.best_known().co2_per_kg, 2.0);
        let raw = ImpactView::from_per_unit(ImpactVector::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(raw.best_known().co2_per_kg, 1.0);
        assert_eq!(ImpactView::default().best_known(), ImpactVector::ZERO);
    }

    #[test]
    fn percent_total_rounds_to_two_decimals() {
        let rules = AggregationRules::default();
        assert!(rules.percent_total_matches(100.0));
        assert!(rules.percent_total_matches(99.999));
        assert!(rules.percent_total_matches(33.33 + 33.33 + 33.34));
        assert!(!rules.percent_total_matches(99.99));
        assert!(!rules.percent_total_matches(99.0));
    }

    #[test]
    fn well_formed_ids_respect_min_length() {
        let rules = AggregationRules::default();
        assert!(rules.is_well_formed("PROF_AAAAA"));
        assert!(rules.is_well_formed("  PROF_AAAAA  "));
        assert!(!rules.is_well_formed("PROF_1"));
    }

    #[test]
    fn scaled_multiplies_every_field() {
        let v = ImpactVector::new(10.0, 4.0, 2.0, 1.0).scaled(0.5);
        assert_eq!(v, ImpactVector::new(5.0, 2.0, 1.0, 0.5));
    }
}
