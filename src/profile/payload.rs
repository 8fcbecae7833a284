//! The stored `impact_payload` document, schema version 2.
//!
//! Older unversioned payloads are upgraded by `db::adapter` before they reach
//! this type.

use serde::{Deserialize, Serialize};

use crate::core::{ImpactBundle, ImpactVector, Phase};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub schema_version: u32,
    pub phase: Phase,
    pub process_type: String,
    pub material_or_process: String,
    pub unit: String,
    pub product: ProductLabel,
    /// Step (Scope 1/2) impact per kg.
    pub impacts_per_kg: ImpactVector,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_transport_profile_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_transport_manual: Option<ImpactVector>,
    pub calculated_upstream: Option<ImpactVector>,
    #[serde(default)]
    pub manual_overrides: ManualOverrides,
    pub impact_bundle: ImpactBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chemicals: Option<Chemicals>,
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social: Option<Social>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<BrandDetails>,
}

impl ProfilePayload {
    /// Outgoing references other than component links (those live in their
    /// own table).
    pub fn upstream_references(&self) -> Vec<String> {
        let mut refs = self.upstream_transport_profile_ids.clone();
        if let Some(brand) = &self.brand {
            if let Some(id) = brand.manufacturer_profile_id.as_deref() {
                refs.push(id.to_string());
            }
            refs.extend(brand.transport_profile_ids.iter().cloned());
        }
        refs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductLabel {
    pub label: Option<String>,
}

/// User-entered overrides kept so a stored profile can be re-resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualOverrides {
    pub scope3: Option<ImpactVector>,
    pub total: Option<ImpactVector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chemicals {
    pub chemicals_used: Option<String>,
    pub substances_of_concern: Option<String>,
    pub zdhc_conform: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Certificate,
    Audit,
    #[default]
    SelfDeclared,
}

impl EvidenceType {
    pub fn stoplight(&self) -> Stoplight {
        match self {
            EvidenceType::Certificate => Stoplight::Green,
            EvidenceType::Audit => Stoplight::Orange,
            EvidenceType::SelfDeclared => Stoplight::Red,
        }
    }
}

impl std::str::FromStr for EvidenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "certificate" => Ok(EvidenceType::Certificate),
            "audit" => Ok(EvidenceType::Audit),
            "self_declared" | "" => Ok(EvidenceType::SelfDeclared),
            other => Err(format!("unknown evidence type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stoplight {
    Green,
    Orange,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub stoplight: Stoplight,
    pub url: Option<String>,
    pub note: Option<String>,
    pub file_path: Option<String>,
}

impl Default for Evidence {
    fn default() -> Self {
        Self::new(EvidenceType::default(), None, None)
    }
}

impl Evidence {
    pub fn new(kind: EvidenceType, url: Option<String>, note: Option<String>) -> Self {
        Self {
            kind,
            stoplight: kind.stoplight(),
            url,
            note,
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Social {
    pub code_of_conduct: bool,
    pub audit_standard: Option<String>,
    pub living_wage: bool,
    pub child_labor_policy: bool,
    pub equality_measures_mgmt_positions: bool,
    pub grievance_mechanism: bool,
    pub union_rights: bool,
    pub note: Option<String>,
    pub evidence: SocialEvidence,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialEvidence {
    pub url: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportDetails {
    pub mode: String,
    pub distance_km: f64,
}

impl Default for TransportDetails {
    fn default() -> Self {
        Self {
            mode: "truck".into(),
            distance_km: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandDetails {
    pub use_phase_measures: Option<String>,
    pub post_use_measures: Option<String>,
    pub scope12_co2_per_kg: f64,
    pub scope12_energy_per_kg: f64,
    pub manufacturer_profile_id: Option<String>,
    pub transport_profile_ids: Vec<String>,
}

impl BrandDetails {
    /// The brand's own Scope 1/2 contribution.
    pub fn step_impact(&self) -> ImpactVector {
        ImpactVector::new(self.scope12_co2_per_kg, 0.0, self.scope12_energy_per_kg, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stoplight_follows_evidence_type() {
        assert_eq!(Evidence::new(EvidenceType::Certificate, None, None).stoplight, Stoplight::Green);
        assert_eq!(Evidence::new(EvidenceType::Audit, None, None).stoplight, Stoplight::Orange);
        assert_eq!(Evidence::default().stoplight, Stoplight::Red);
    }

    #[test]
    fn evidence_type_parses_loosely() {
        assert_eq!("Audit".parse::<EvidenceType>().unwrap(), EvidenceType::Audit);
        assert_eq!("".parse::<EvidenceType>().unwrap(), EvidenceType::SelfDeclared);
        assert!("rumour".parse::<EvidenceType>().is_err());
    }

    #[test]
    fn evidence_serializes_type_key() {
        let json = serde_json::to_value(Evidence::new(EvidenceType::Audit, None, None)).unwrap();
        assert_eq!(json["type"], "audit");
        assert_eq!(json["stoplight"], "orange");
    }

    #[test]
    fn brand_step_impact_has_no_water() {
        let brand = BrandDetails {
            scope12_co2_per_kg: 1.2,
            scope12_energy_per_kg: 3.0,
            ..BrandDetails::default()
        };
        assert_eq!(brand.step_impact(), ImpactVector::new(1.2, 0.0, 3.0, 0.0));
    }
}
