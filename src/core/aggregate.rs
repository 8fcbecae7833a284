use std::collections::{HashMap, HashSet};

use crate::core::impact::{combine, finite_or_zero, is_non_zero, sanitize};
use crate::core::{AggregationRules, ComponentLink, ImpactVector, ImpactView, ReferenceRole};
use crate::error::LedgerError;

/// Batch read of referenced profiles' impact views.
///
/// Ids that do not resolve are simply absent from the returned map.
pub trait ProfileLookup {
    fn impacts_by_id(&self, ids: &[String]) -> Result<HashMap<String, ImpactView>, LedgerError>;
}

impl ProfileLookup for HashMap<String, ImpactView> {
    fn impacts_by_id(&self, ids: &[String]) -> Result<HashMap<String, ImpactView>, LedgerError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }
}

/// Upstream inputs of a process profile.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamInputs<'a> {
    pub components: &'a [ComponentLink],
    pub transport_ids: &'a [String],
    pub manual_addon: &'a ImpactVector,
}

/// Weighted components + additive transport + manual add-on.
///
/// `Ok(None)` means nothing was entered; callers must not show a calculated
/// value in that state.
pub fn aggregate_upstream<L>(
    inputs: &UpstreamInputs<'_>,
    lookup: &L,
    rules: &AggregationRules,
) -> Result<Option<ImpactVector>, LedgerError>
where
    L: ProfileLookup + ?Sized,
{
    check_ids(
        inputs.components.iter().map(|c| c.component_profile_id.as_str()),
        rules,
        "component_profile_id",
    )?;
    let transport_ids = check_ids(
        inputs.transport_ids.iter().map(String::as_str),
        rules,
        "transport profile_id",
    )?;

    let links: Vec<(&str, f64)> = inputs
        .components
        .iter()
        .map(|c| (c.component_profile_id.trim(), finite_or_zero(c.percent)))
        .filter(|(id, _)| !id.is_empty())
        .collect();

    if !links.is_empty() {
        let total: f64 = links.iter().map(|(_, pct)| pct).sum();
        if !rules.percent_total_matches(total) {
            return Err(LedgerError::validation(format!(
                "Percentages must add up to {}. Currently: {total}",
                rules.percent_total
            )));
        }
    }

    if links.is_empty() && transport_ids.is_empty() && !is_non_zero(Some(inputs.manual_addon)) {
        return Ok(None);
    }

    let fetch_ids = unique_ids(links.iter().map(|(id, _)| *id).chain(transport_ids.iter().copied()));
    let found = if fetch_ids.is_empty() {
        HashMap::new()
    } else {
        lookup.impacts_by_id(&fetch_ids)?
    };

    let mut sum = ImpactVector::ZERO;
    for (id, pct) in &links {
        let view = resolve(&found, id, ReferenceRole::Component)?;
        sum = combine(Some(&sum), Some(&view.best_known().scaled(pct / 100.0)));
    }
    for id in &transport_ids {
        let view = resolve(&found, id, ReferenceRole::Transport)?;
        sum = combine(Some(&sum), Some(&view.best_known()));
    }
    sum = combine(Some(&sum), Some(inputs.manual_addon));

    Ok(Some(sum))
}

/// Brand Scope 3: manufacturer plus additive transport.
///
/// A blank manufacturer with no transport ids is "nothing to compute".
pub fn aggregate_brand_scope3<L>(
    manufacturer_id: &str,
    transport_ids: &[String],
    lookup: &L,
    rules: &AggregationRules,
) -> Result<Option<ImpactVector>, LedgerError>
where
    L: ProfileLookup + ?Sized,
{
    let manufacturer_id = manufacturer_id.trim();
    let transport_ids = check_ids(
        transport_ids.iter().map(String::as_str),
        rules,
        "transport profile_id",
    )?;

    if manufacturer_id.is_empty() {
        if transport_ids.is_empty() {
            return Ok(None);
        }
        return Err(LedgerError::validation("Add manufacturer profile_id."));
    }
    if !rules.is_well_formed(manufacturer_id) {
        return Err(LedgerError::validation(format!(
            "Please enter a valid manufacturer profile_id (PROF_..., at least {} characters).",
            rules.min_profile_id_len
        )));
    }

    let fetch_ids = unique_ids(std::iter::once(manufacturer_id).chain(transport_ids.iter().copied()));
    let found = lookup.impacts_by_id(&fetch_ids)?;

    let mut sum = resolve(&found, manufacturer_id, ReferenceRole::Manufacturer)?.best_known();
    for id in &transport_ids {
        let view = resolve(&found, id, ReferenceRole::Transport)?;
        sum = combine(Some(&sum), Some(&view.best_known()));
    }
    Ok(Some(sanitize(&sum)))
}

/// Trimmed, non-empty ids; any typed id below the minimum length is rejected.
fn check_ids<'a>(
    ids: impl Iterator<Item = &'a str>,
    rules: &AggregationRules,
    label: &str,
) -> Result<Vec<&'a str>, LedgerError> {
    let typed: Vec<&str> = ids.map(str::trim).filter(|id| !id.is_empty()).collect();
    if typed.iter().any(|id| !rules.is_well_formed(id)) {
        return Err(LedgerError::validation(format!(
            "Please enter valid {label}(s) (PROF_..., at least {} characters) or leave them all empty.",
            rules.min_profile_id_len
        )));
    }
    Ok(typed)
}

fn unique_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).map(str::to_string).collect()
}

fn resolve<'m>(
    found: &'m HashMap<String, ImpactView>,
    id: &str,
    role: ReferenceRole,
) -> Result<&'m ImpactView, LedgerError> {
    found.get(id).ok_or_else(|| LedgerError::MissingProfile {
        role,
        id: id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const PROF_A: &str = "PROF_AAAAAAAAAA";
    const PROF_B: &str = "PROF_BBBBBBBBBB";
    const TRUCK: &str = "PROF_TRUCK00001";

    fn store() -> HashMap<String, ImpactView> {
        let mut m = HashMap::new();
        m.insert(PROF_A.into(), ImpactView::from_per_unit(ImpactVector::new(10.0, 0.0, 0.0, 0.0)));
        m.insert(PROF_B.into(), ImpactView::from_per_unit(ImpactVector::new(0.0, 5.0, 0.0, 0.0)));
        m.insert(TRUCK.into(), ImpactView::from_per_unit(ImpactVector::new(0.5, 0.0, 0.2, 0.01)));
        m
    }

    /// Counts batch calls so tests can assert one fetch per pass.
    struct CountingLookup {
        inner: HashMap<String, ImpactView>,
        calls: Cell<usize>,
    }

    impl ProfileLookup for CountingLookup {
        fn impacts_by_id(&self, ids: &[String]) -> Result<HashMap<String, ImpactView>, LedgerError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.impacts_by_id(ids)
        }
    }

    fn run(
        components: &[ComponentLink],
        transport: &[String],
        manual: ImpactVector,
    ) -> Result<Option<ImpactVector>, LedgerError> {
        let inputs = UpstreamInputs {
            components,
            transport_ids: transport,
            manual_addon: &manual,
        };
        aggregate_upstream(&inputs, &store(), &AggregationRules::default())
    }

    fn assert_close(a: &ImpactVector, b: &ImpactVector) {
        for (x, y) in [
            (a.co2_per_kg, b.co2_per_kg),
            (a.water_per_kg, b.water_per_kg),
            (a.energy_per_kg, b.energy_per_kg),
            (a.pm25_per_kg, b.pm25_per_kg),
        ] {
            assert!((x - y).abs() < 1e-9, "expected {b:?}, got {a:?}");
        }
    }

    #[test]
    fn weighted_sum_of_two_components() {
        let comps = [ComponentLink::new(PROF_A, 60.0), ComponentLink::new(PROF_B, 40.0)];
        let out = run(&comps, &[], ImpactVector::ZERO).unwrap().unwrap();
        assert_close(&out, &ImpactVector::new(6.0, 2.0, 0.0, 0.0));
    }

    #[test]
    fn percent_total_of_99_is_rejected() {
        let comps = [ComponentLink::new(PROF_A, 60.0), ComponentLink::new(PROF_B, 39.0)];
        let err = run(&comps, &[], ImpactVector::ZERO).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("99"), "{err}");
    }

    #[test]
    fn negative_percents_accepted_when_total_nets_to_100() {
        let comps = [ComponentLink::new(PROF_A, 120.0), ComponentLink::new(PROF_B, -20.0)];
        let out = run(&comps, &[], ImpactVector::ZERO).unwrap().unwrap();
        assert_close(&out, &ImpactVector::new(12.0, -1.0, 0.0, 0.0));
    }

    #[test]
    fn short_id_next_to_empty_id_is_rejected() {
        let comps = [ComponentLink::new("PROF_1", 100.0), ComponentLink::new("", 0.0)];
        let err = run(&comps, &[], ImpactVector::ZERO).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("leave them all empty"));
    }

    #[test]
    fn short_id_next_to_valid_id_is_rejected() {
        let comps = [ComponentLink::new(PROF_A, 60.0), ComponentLink::new("PROF_1", 40.0)];
        assert!(run(&comps, &[], ImpactVector::ZERO).unwrap_err().is_validation());
    }

    #[test]
    fn all_empty_is_nothing_to_compute() {
        let comps = [ComponentLink::new("", 0.0), ComponentLink::new("   ", 50.0)];
        assert_eq!(run(&comps, &[String::new()], ImpactVector::ZERO).unwrap(), None);
    }

    #[test]
    fn missing_profile_fails_whole_aggregation() {
        let comps = [
            ComponentLink::new(PROF_A, 50.0),
            ComponentLink::new("PROF_MISSING00", 50.0),
        ];
        match run(&comps, &[], ImpactVector::ZERO) {
            Err(LedgerError::MissingProfile { role, id }) => {
                assert_eq!(role, ReferenceRole::Component);
                assert_eq!(id, "PROF_MISSING00");
            }
            other => panic!("expected missing profile, got {other:?}"),
        }
    }

    #[test]
    fn missing_transport_is_named() {
        let err = run(&[], &["PROF_NOTRUCK000".to_string()], ImpactVector::ZERO).unwrap_err();
        assert_eq!(err.to_string(), "Transport profile not found: PROF_NOTRUCK000");
    }

    #[test]
    fn manual_addon_only() {
        let manual = ImpactVector::new(2.0, 0.0, 1.0, 0.0);
        let out = run(&[], &[], manual).unwrap().unwrap();
        assert_eq!(out, ImpactVector::new(2.0, 0.0, 1.0, 0.0));
    }

    #[test]
    fn transport_is_added_unweighted() {
        let comps = [ComponentLink::new(PROF_A, 100.0)];
        let manual = ImpactVector::new(1.0, 0.0, 0.0, 0.0);
        let out = run(&comps, &[TRUCK.to_string()], manual).unwrap().unwrap();
        assert_close(&out, &ImpactVector::new(11.5, 0.0, 0.2, 0.01));
    }

    #[test]
    fn uses_best_known_impact_of_component() {
        let mut m = store();
        m.insert(
            PROF_A.into(),
            ImpactView {
                resolved_total: Some(ImpactVector::new(20.0, 0.0, 0.0, 0.0)),
                calculated_total: None,
                per_unit: Some(ImpactVector::new(10.0, 0.0, 0.0, 0.0)),
            },
        );
        let comps = [ComponentLink::new(PROF_A, 50.0), ComponentLink::new(PROF_B, 50.0)];
        let manual = ImpactVector::ZERO;
        let inputs = UpstreamInputs { components: &comps, transport_ids: &[], manual_addon: &manual };
        let out = aggregate_upstream(&inputs, &m, &AggregationRules::default()).unwrap().unwrap();
        assert_close(&out, &ImpactVector::new(10.0, 2.5, 0.0, 0.0));
    }

    #[test]
    fn single_batch_lookup_per_pass() {
        let lookup = CountingLookup { inner: store(), calls: Cell::new(0) };
        let comps = [ComponentLink::new(PROF_A, 50.0), ComponentLink::new(PROF_A, 50.0)];
        let transport = [TRUCK.to_string(), TRUCK.to_string()];
        let manual = ImpactVector::ZERO;
        let inputs = UpstreamInputs { components: &comps, transport_ids: &transport, manual_addon: &manual };
        aggregate_upstream(&inputs, &lookup, &AggregationRules::default()).unwrap();
        assert_eq!(lookup.calls.get(), 1);
    }

    #[test]
    fn idempotent_for_unchanged_inputs() {
        let comps = [ComponentLink::new(PROF_A, 33.3), ComponentLink::new(PROF_B, 66.7)];
        let transport = [TRUCK.to_string()];
        let first = run(&comps, &transport, ImpactVector::new(0.1, 0.0, 0.0, 0.0)).unwrap().unwrap();
        let second = run(&comps, &transport, ImpactVector::new(0.1, 0.0, 0.0, 0.0)).unwrap().unwrap();
        assert_eq!(first.co2_per_kg.to_bits(), second.co2_per_kg.to_bits());
        assert_eq!(first.water_per_kg.to_bits(), second.water_per_kg.to_bits());
        assert_eq!(first, second);
    }

    #[test]
    fn brand_scope3_adds_manufacturer_and_transport() {
        let out = aggregate_brand_scope3(PROF_A, &[TRUCK.to_string()], &store(), &AggregationRules::default())
            .unwrap()
            .unwrap();
        assert_close(&out, &ImpactVector::new(10.5, 0.0, 0.2, 0.01));
    }

    #[test]
    fn brand_scope3_requires_manufacturer_when_transport_given() {
        let err = aggregate_brand_scope3("", &[TRUCK.to_string()], &store(), &AggregationRules::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Add manufacturer profile_id.");
        let none = aggregate_brand_scope3("  ", &[], &store(), &AggregationRules::default()).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn brand_scope3_names_missing_manufacturer() {
        let err = aggregate_brand_scope3("PROF_NOBODY0000", &[], &store(), &AggregationRules::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Manufacturer profile not found: PROF_NOBODY0000");
    }
}
