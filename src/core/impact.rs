//! Normalizer and combinator for impact vectors.
//!
//! `normalize` is the only reader that tolerates loose input: missing fields,
//! `null`, numeric strings and the legacy field names written by older
//! payloads (`co2_kg`, `water_l`, `energy_kwh`, `pm25_g_per_kg`).

use serde_json::Value;

use super::ImpactVector;

const CO2_KEYS: &[&str] = &["co2_per_kg", "co2_kg"];
const WATER_KEYS: &[&str] = &["water_per_kg", "water_l"];
const ENERGY_KEYS: &[&str] = &["energy_per_kg", "energy_kwh"];
const PM25_KEYS: &[&str] = &["pm25_per_kg", "pm25_g_per_kg"];

/// Coerce any JSON value into a complete, finite impact vector. Never fails.
pub fn normalize(value: &Value) -> ImpactVector {
    let Some(obj) = value.as_object() else {
        return ImpactVector::ZERO;
    };
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
            .map(finite_number)
            .unwrap_or(0.0)
    };
    ImpactVector {
        co2_per_kg: field(CO2_KEYS),
        water_per_kg: field(WATER_KEYS),
        energy_per_kg: field(ENERGY_KEYS),
        pm25_per_kg: field(PM25_KEYS),
    }
}

/// Numbers and numeric strings; everything else (and NaN/inf) is 0.
pub fn finite_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    finite_or_zero(n)
}

pub fn finite_or_zero(n: f64) -> f64 {
    if n.is_finite() { n } else { 0.0 }
}

/// Typed counterpart of `normalize`: replaces non-finite fields with 0.
pub fn sanitize(v: &ImpactVector) -> ImpactVector {
    ImpactVector {
        co2_per_kg: finite_or_zero(v.co2_per_kg),
        water_per_kg: finite_or_zero(v.water_per_kg),
        energy_per_kg: finite_or_zero(v.energy_per_kg),
        pm25_per_kg: finite_or_zero(v.pm25_per_kg),
    }
}

/// Field-wise sum; an absent side counts as the zero vector.
pub fn combine(a: Option<&ImpactVector>, b: Option<&ImpactVector>) -> ImpactVector {
    let a = a.map(sanitize).unwrap_or(ImpactVector::ZERO);
    let b = b.map(sanitize).unwrap_or(ImpactVector::ZERO);
    ImpactVector {
        co2_per_kg: a.co2_per_kg + b.co2_per_kg,
        water_per_kg: a.water_per_kg + b.water_per_kg,
        energy_per_kg: a.energy_per_kg + b.energy_per_kg,
        pm25_per_kg: a.pm25_per_kg + b.pm25_per_kg,
    }
}

/// True iff at least one field is non-zero after sanitizing.
///
/// An explicit all-zero vector is indistinguishable from "nothing entered".
pub fn is_non_zero(v: Option<&ImpactVector>) -> bool {
    match v.map(sanitize) {
        Some(x) => {
            x.co2_per_kg != 0.0
                || x.water_per_kg != 0.0
                || x.energy_per_kg != 0.0
                || x.pm25_per_kg != 0.0
        }
        None => false,
    }
}

/// `Some(sanitized)` when non-zero, else `None`.
pub fn non_zero(v: Option<&ImpactVector>) -> Option<ImpactVector> {
    if is_non_zero(v) { v.map(sanitize) } else { None }
}
