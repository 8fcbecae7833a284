//! Decoding of import rows into profile drafts.
//!
//! A row is one spreadsheet line already decoded to a JSON object keyed by
//! the header cells. Headers match case-insensitively and both the camelCase
//! and snake_case spellings are accepted.

use serde_json::{Map, Value};

use crate::core::impact::{finite_number, finite_or_zero};
use crate::core::{AggregationRules, ComponentLink, ImpactVector, Phase};
use crate::profile::ProfileDraft;
use crate::profile::payload::{BrandDetails, Chemicals, TransportDetails};

pub type Row = Map<String, Value>;

pub const PRODUCT_LINE: &[&str] = &["product_line", "productLine"];
const DEFAULT_RAW_MATERIAL: &str = "Cotton";

const CO2: &[&str] = &["co2KgPerKg", "co2_kg_per_kg", "co2_per_kg"];
const WATER: &[&str] = &["waterLPerKg", "water_l_per_kg", "water_per_kg"];
const ENERGY: &[&str] = &["energyKwhPerKg", "energy_kwh_per_kg", "energy_per_kg"];
const PM25: &[&str] = &["pm25GPerKg", "pm25_g_per_kg", "pm25_per_kg"];

/// Cell by header, exact match first.
pub fn pick<'a>(row: &'a Row, key: &str) -> Option<&'a Value> {
    row.get(key).or_else(|| {
        row.iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// First alias whose cell is not blank.
pub fn cell<'a>(row: &'a Row, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| pick(row, alias))
        .find(|v| !text(v).is_empty())
}

/// Cell as trimmed text; numbers and booleans print as-is, null is empty.
pub fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn text_at(row: &Row, aliases: &[&str]) -> String {
    cell(row, aliases).map(text).unwrap_or_default()
}

fn opt_text_at(row: &Row, aliases: &[&str]) -> Option<String> {
    Some(text_at(row, aliases)).filter(|s| !s.is_empty())
}

fn number_at(row: &Row, aliases: &[&str]) -> f64 {
    cell(row, aliases).map(finite_number).unwrap_or(0.0)
}

fn flag_at(row: &Row, aliases: &[&str]) -> bool {
    match cell(row, aliases) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "x"
        ) || finite_number(&Value::String(s.clone())) != 0.0,
        Some(other) => finite_number(other) != 0.0,
        None => false,
    }
}

/// A JSON array, a JSON array inside a string, or `;`-separated ids.
pub fn parse_ids(value: &Value) -> Vec<String> {
    if let Value::Array(items) = value {
        return items.iter().map(text).filter(|s| !s.is_empty()).collect();
    }
    let s = text(value);
    if s.is_empty() {
        return Vec::new();
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&s) {
        return parse_ids(&Value::Array(items));
    }
    s.split(';')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// A JSON array of `{component_profile_id, percent}` or `PROF_x:80;PROF_y:20`.
pub fn parse_components(value: &Value) -> Vec<ComponentLink> {
    if let Value::Array(items) = value {
        return links_from_json(items);
    }
    let s = text(value);
    if s.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&s) {
            return links_from_json(&items);
        }
    }
    s.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (id, percent) = part.split_once(':').unwrap_or((part, ""));
            ComponentLink::new(id.trim(), finite_number(&Value::String(percent.to_string())))
        })
        .collect()
}

fn links_from_json(items: &[Value]) -> Vec<ComponentLink> {
    items
        .iter()
        .map(|item| {
            ComponentLink::new(
                item.get("component_profile_id").map(text).unwrap_or_default(),
                item.get("percent").map(finite_number).unwrap_or(0.0),
            )
        })
        .collect()
}

/// Build the draft for one row of a phase sheet.
///
/// Process rows must carry components that add up to the configured total.
pub fn draft_for_row(phase: Phase, row: &Row, rules: &AggregationRules) -> Result<ProfileDraft, String> {
    let product_line = text_at(row, PRODUCT_LINE);
    let mut draft = ProfileDraft {
        product_line: product_line.clone(),
        evidence_type: text_at(row, &["evidenceType", "evidence_type"]).parse()?,
        evidence_url: opt_text_at(row, &["evidenceUrl", "evidence_url"]),
        evidence_note: opt_text_at(row, &["evidenceNote", "evidence_note"]),
        ..ProfileDraft::default()
    };

    match phase {
        Phase::RawMaterials => {
            draft.raw_material = Some(
                opt_text_at(row, &["rawMaterial", "raw_material"])
                    .unwrap_or_else(|| DEFAULT_RAW_MATERIAL.to_string()),
            );
            draft.recycled_base_material = opt_text_at(row, &["recycledBaseMaterial", "recycled_base_material"]);
            draft.recycled_subtype = opt_text_at(row, &["recycledSubtype", "recycled_subtype"]);
            draft.impacts = step_impacts(row);
            draft.chemicals = Some(chemicals(row));
        }
        Phase::Transport => {
            draft.impacts = ImpactVector::new(number_at(row, CO2), 0.0, number_at(row, ENERGY), number_at(row, PM25));
            draft.transport = Some(TransportDetails {
                mode: opt_text_at(row, &["mode", "transport_mode", "transportMode"])
                    .unwrap_or_else(|| TransportDetails::default().mode),
                distance_km: number_at(row, &["distance_km", "distanceKm"]),
            });
        }
        Phase::Brand => {
            draft.brand = Some(BrandDetails {
                use_phase_measures: opt_text_at(row, &["use_phase_measures", "usePhaseMeasures"]),
                post_use_measures: opt_text_at(row, &["post_use_measures", "postUseMeasures"]),
                scope12_co2_per_kg: number_at(row, &["scope12_co2_per_kg", "scope12Co2PerKg"]),
                scope12_energy_per_kg: number_at(row, &["scope12_energy_per_kg", "scope12EnergyPerKg"]),
                manufacturer_profile_id: opt_text_at(row, &["manufacturer_profile_id", "manufacturerProfileId"]),
                transport_profile_ids: cell(row, &["transport_profile_ids", "transportProfileIds"])
                    .map(parse_ids)
                    .unwrap_or_default(),
            });
        }
        Phase::Yarn | Phase::Fabric | Phase::Manufacturer => {
            draft.process_type = opt_text_at(row, &["processType", "process_type"]);
            draft.upstream_transport_profile_ids =
                cell(row, &["upstream_transport_profile_ids", "upstreamTransportProfileIds"])
                    .map(parse_ids)
                    .unwrap_or_default();
            draft.upstream_transport_manual = ImpactVector::new(
                number_at(row, &["upstream_transport_manual_co2", "upstreamTransportManualCo2"]),
                0.0,
                number_at(row, &["upstream_transport_manual_energy", "upstreamTransportManualEnergy"]),
                number_at(row, &["upstream_transport_manual_pm25", "upstreamTransportManualPm25"]),
            );
            draft.impacts = step_impacts(row);
            draft.chemicals = Some(chemicals(row));
            draft.components = cell(row, &["components_json", "components"])
                .map(parse_components)
                .unwrap_or_default();
            check_components(phase, &product_line, &draft.components, rules)?;
        }
    }
    Ok(draft)
}

fn step_impacts(row: &Row) -> ImpactVector {
    ImpactVector::new(
        number_at(row, CO2),
        number_at(row, WATER),
        number_at(row, ENERGY),
        number_at(row, PM25),
    )
}

fn chemicals(row: &Row) -> Chemicals {
    Chemicals {
        chemicals_used: opt_text_at(row, &["chemicalsUsed", "chemicals_used"]),
        substances_of_concern: opt_text_at(row, &["substancesOfConcern", "substances_of_concern"]),
        zdhc_conform: flag_at(row, &["zdhcConform", "zdhc_conform"]),
    }
}

fn check_components(
    phase: Phase,
    product_line: &str,
    components: &[ComponentLink],
    rules: &AggregationRules,
) -> Result<(), String> {
    let typed: Vec<&ComponentLink> = components
        .iter()
        .filter(|c| !c.component_profile_id.trim().is_empty())
        .collect();
    if typed.is_empty() {
        return Err(format!(
            "Import error: missing components for product \"{product_line}\" in {phase}"
        ));
    }
    let total: f64 = typed.iter().map(|c| finite_or_zero(c.percent)).sum();
    if !rules.percent_total_matches(total) {
        return Err(format!(
            "Import error: components percent must sum to {}. Got {total} for product \"{product_line}\" in {phase}",
            rules.percent_total
        ));
    }
    Ok(())
}
