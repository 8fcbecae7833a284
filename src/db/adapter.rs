//! Reads stored `impact_payload` JSON of any schema version.
//!
//! Version 2 payloads carry `schema_version`; anything without it is treated
//! as the legacy version 1 shape and upgraded on read.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::impact::normalize;
use crate::core::resolve::{BundleInputs, resolve_bundle};
use crate::core::{ImpactVector, ImpactView, Phase};
use crate::error::LedgerError;
use crate::profile::payload::{
    BrandDetails, CURRENT_SCHEMA_VERSION, Evidence, EvidenceType, ManualOverrides, ProductLabel,
    ProfilePayload,
};

pub const LEGACY_SCHEMA_VERSION: u32 = 1;

pub fn schema_version(payload: &Value) -> u32 {
    payload
        .get("schema_version")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(LEGACY_SCHEMA_VERSION)
}

/// The three slots of "best known impact" for a stored payload.
pub fn impact_view(payload: &Value) -> ImpactView {
    if schema_version(payload) >= CURRENT_SCHEMA_VERSION {
        ImpactView {
            resolved_total: slot(payload, &["/impact_bundle/resolved/total_per_kg"]),
            calculated_total: slot(payload, &["/impact_bundle/sources/total/calculated"]),
            per_unit: slot(payload, &["/impacts_per_kg"]),
        }
    } else {
        ImpactView {
            resolved_total: slot(
                payload,
                &["/resolved/total_per_kg", "/impact_bundle/resolved/total_per_kg"],
            ),
            calculated_total: slot(
                payload,
                &["/total_per_kg", "/impact_bundle/totalCalculated"],
            ),
            per_unit: slot(payload, &["/impacts_per_kg"]),
        }
    }
}

/// Non-component references (upstream transport, brand manufacturer and
/// brand transport). Same keys in every schema version.
pub fn payload_references(payload: &Value) -> Vec<String> {
    let mut refs = string_list(payload.pointer("/upstream_transport_profile_ids"));
    if let Some(id) = text(payload, "/brand/manufacturer_profile_id") {
        refs.push(id);
    }
    refs.extend(string_list(payload.pointer("/brand/transport_profile_ids")));
    refs
}

/// Decode a stored payload into the current schema.
pub fn upgrade_payload(payload: Value) -> Result<ProfilePayload, LedgerError> {
    if schema_version(&payload) >= CURRENT_SCHEMA_VERSION {
        return Ok(serde_json::from_value(payload)?);
    }

    let phase: Phase = text(&payload, "/phase")
        .unwrap_or_default()
        .parse()
        .map_err(LedgerError::Validation)?;
    let process_type =
        text(&payload, "/process_type").unwrap_or_else(|| phase.default_process_type().to_string());
    let material_or_process =
        text(&payload, "/material_or_process").unwrap_or_else(|| process_type.clone());

    let impacts_per_kg = normalize(payload.get("impacts_per_kg").unwrap_or(&Value::Null));
    let calculated_upstream = slot(&payload, &["/calculated_upstream"]);
    let manual_overrides = ManualOverrides {
        scope3: slot(&payload, &["/sources/scope3/manual", "/impact_bundle/sources/scope3/manual"]),
        total: slot(&payload, &["/sources/total/manual", "/impact_bundle/sources/total/manual"]),
    };

    let kind = text(&payload, "/evidence/type")
        .and_then(|t| t.parse::<EvidenceType>().ok())
        .unwrap_or_default();
    let mut evidence = Evidence::new(
        kind,
        text(&payload, "/evidence/url"),
        text(&payload, "/evidence/note"),
    );
    evidence.file_path = text(&payload, "/evidence/file_path");

    let step = match phase {
        Phase::Brand => object::<BrandDetails>(&payload, "brand")
            .map(|b| b.step_impact())
            .unwrap_or(impacts_per_kg),
        _ => impacts_per_kg,
    };
    let impact_bundle = resolve_bundle(&BundleInputs {
        scope3_calculated: calculated_upstream,
        scope3_manual: manual_overrides.scope3,
        total_manual: manual_overrides.total,
        step: Some(step),
    });

    Ok(ProfilePayload {
        schema_version: CURRENT_SCHEMA_VERSION,
        phase,
        process_type,
        material_or_process,
        unit: text(&payload, "/unit").unwrap_or_else(|| "per_kg".into()),
        product: ProductLabel {
            label: text(&payload, "/product/label"),
        },
        impacts_per_kg,
        upstream_transport_profile_ids: string_list(payload.pointer("/upstream_transport_profile_ids")),
        upstream_transport_manual: slot(&payload, &["/upstream_transport_manual"]),
        calculated_upstream,
        manual_overrides,
        impact_bundle,
        chemicals: object(&payload, "chemicals"),
        evidence,
        social: object(&payload, "social"),
        transport: object(&payload, "transport"),
        brand: object(&payload, "brand"),
    })
}

/// First path that holds an object, normalized.
fn slot(payload: &Value, paths: &[&str]) -> Option<ImpactVector> {
    paths
        .iter()
        .find_map(|p| payload.pointer(p).filter(|v| v.is_object()))
        .map(normalize)
}

fn text(payload: &Value, path: &str) -> Option<String> {
    payload
        .pointer(path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn object<T: DeserializeOwned>(payload: &Value, key: &str) -> Option<T> {
    payload
        .get(key)
        .filter(|v| v.is_object())
        .and_then(|v| match serde_json::from_value(v.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!("Dropping unreadable legacy '{key}' section: {e}");
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceMode;
    use serde_json::json;

    fn legacy_yarn() -> Value {
        json!({
            "phase": "Yarn",
            "process_type": "Spinning",
            "material_or_process": "Spinning",
            "unit": "per_kg",
            "product": { "label": "Tee 100" },
            "upstream_transport_profile_ids": ["PROF_TRUCK00001", ""],
            "upstream_transport_manual": { "co2_kg": 0.2, "water_l": 0, "energy_kwh": 0.1 },
            "impacts_per_kg": { "co2_kg": 1.0, "water_l": 2.0, "energy_kwh": 3.0 },
            "calculated_upstream": { "co2_kg": 4.0, "water_l": 0, "energy_kwh": 1.0 },
            "resolved": { "total_per_kg": { "co2_kg": 5.0, "water_l": 2.0, "energy_kwh": 4.0 } },
            "total_per_kg": { "co2_kg": 5.0, "water_l": 2.0, "energy_kwh": 4.0 },
            "evidence": { "type": "audit", "stoplight": "orange", "url": null, "note": "2024 audit" }
        })
    }

    #[test]
    fn legacy_view_prefers_resolved_total() {
        let view = impact_view(&legacy_yarn());
        assert_eq!(view.resolved_total, Some(ImpactVector::new(5.0, 2.0, 4.0, 0.0)));
        assert_eq!(view.per_unit, Some(ImpactVector::new(1.0, 2.0, 3.0, 0.0)));
        assert_eq!(view.best_known().co2_per_kg, 5.0);
    }

    #[test]
    fn raw_only_legacy_payload_uses_per_unit() {
        let view = impact_view(&json!({ "impacts_per_kg": { "co2_kg": 7 }, "resolved": null }));
        assert_eq!(view.resolved_total, None);
        assert_eq!(view.best_known(), ImpactVector::new(7.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn empty_payload_is_zero() {
        assert_eq!(impact_view(&json!({})).best_known(), ImpactVector::ZERO);
    }

    #[test]
    fn upgrade_recomputes_bundle() {
        let payload = upgrade_payload(legacy_yarn()).unwrap();
        assert_eq!(payload.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(payload.phase, Phase::Yarn);
        assert_eq!(payload.product.label.as_deref(), Some("Tee 100"));
        assert_eq!(payload.upstream_transport_profile_ids, vec!["PROF_TRUCK00001".to_string()]);
        assert_eq!(payload.evidence.kind, EvidenceType::Audit);
        assert_eq!(payload.impact_bundle.sources.scope3.mode, SourceMode::Calculated);
        assert_eq!(
            payload.impact_bundle.resolved.total_per_kg,
            Some(ImpactVector::new(5.0, 2.0, 4.0, 0.0))
        );
    }

    #[test]
    fn upgraded_payload_reads_back_identically() {
        let upgraded = upgrade_payload(legacy_yarn()).unwrap();
        let stored = serde_json::to_value(&upgraded).unwrap();
        assert_eq!(schema_version(&stored), CURRENT_SCHEMA_VERSION);
        assert_eq!(upgrade_payload(stored.clone()).unwrap(), upgraded);
        assert_eq!(impact_view(&stored).best_known(), ImpactVector::new(5.0, 2.0, 4.0, 0.0));
    }

    #[test]
    fn oversized_schema_version_is_not_legacy() {
        let payload = json!({
            "schema_version": 4_294_967_297u64,
            "impacts_per_kg": { "co2_per_kg": 1.0 },
            "resolved": { "total_per_kg": { "co2_kg": 9.0 } }
        });
        assert_eq!(schema_version(&payload), u32::MAX);
        assert_eq!(impact_view(&payload).resolved_total, None);
        assert_eq!(impact_view(&payload).best_known().co2_per_kg, 1.0);
        assert_eq!(schema_version(&json!({ "schema_version": 2 })), 2);
    }

    #[test]
    fn legacy_payload_without_phase_is_rejected() {
        assert!(upgrade_payload(json!({ "impacts_per_kg": {} })).unwrap_err().is_validation());
    }

    #[test]
    fn references_cover_transport_and_brand_links() {
        let payload = json!({
            "upstream_transport_profile_ids": ["PROF_T1XXXXXXX"],
            "brand": {
                "manufacturer_profile_id": "PROF_MANUXXXXX",
                "transport_profile_ids": ["PROF_T2XXXXXXX", " "]
            }
        });
        assert_eq!(
            payload_references(&payload),
            vec!["PROF_T1XXXXXXX", "PROF_MANUXXXXX", "PROF_T2XXXXXXX"]
        );
    }
}
