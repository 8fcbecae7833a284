//! Save workflow for profiles.
//!
//! A save validates identity, aggregates one hop of upstream data, resolves
//! the impact bundle, builds the versioned payload, guards the reference
//! graph and finally upserts through the gateway.

pub mod payload;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::aggregate::{UpstreamInputs, aggregate_brand_scope3, aggregate_upstream};
use crate::core::graph::check_references;
use crate::core::impact::sanitize;
use crate::core::resolve::{BundleInputs, resolve_bundle};
use crate::core::{AggregationRules, ComponentLink, ImpactBundle, ImpactVector, Phase};
use crate::db::{ProfileWrite, SaveOutcome, SharedDatabase, StoredProfile, Verification, adapter};
use crate::error::LedgerError;
use payload::{
    BrandDetails, CURRENT_SCHEMA_VERSION, Chemicals, Evidence, EvidenceType, ManualOverrides,
    ProductLabel, ProfilePayload, Social, TransportDetails,
};

pub const RECYCLED_MATERIAL: &str = "Recycled material";
const DEFAULT_RECYCLED_BASE: &str = "Other";
const DEFAULT_RECYCLED_SUBTYPE: &str = "post_consumer";

/// Who is entering data, and for which phase.
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub actor_id: String,
    pub actor_label: Option<String>,
    pub phase: Phase,
}

/// User input for one profile, before any derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDraft {
    /// Target an existing profile instead of upserting by key.
    pub profile_id: Option<String>,
    pub product_line: String,
    pub process_type: Option<String>,
    pub raw_material: Option<String>,
    pub recycled_base_material: Option<String>,
    pub recycled_subtype: Option<String>,
    /// Own (step) impact. Ignored for Brand, which uses its Scope 1/2 fields.
    pub impacts: ImpactVector,
    pub components: Vec<ComponentLink>,
    pub upstream_transport_profile_ids: Vec<String>,
    pub upstream_transport_manual: ImpactVector,
    pub scope3_manual: Option<ImpactVector>,
    pub total_manual: Option<ImpactVector>,
    pub chemicals: Option<Chemicals>,
    pub evidence_type: EvidenceType,
    pub evidence_url: Option<String>,
    pub evidence_note: Option<String>,
    pub evidence_file_path: Option<String>,
    pub social: Option<Social>,
    pub transport: Option<TransportDetails>,
    pub brand: Option<BrandDetails>,
}

impl ProfileDraft {
    /// Rebuild the draft a stored profile was saved from.
    pub fn from_stored(row: &StoredProfile, payload: &ProfilePayload, components: Vec<ComponentLink>) -> Self {
        let (raw_material, recycled_base_material, recycled_subtype) = match row.raw_material.as_deref() {
            Some(value) => match value.strip_prefix(RECYCLED_MATERIAL).and_then(|r| r.strip_prefix(':')) {
                Some(rest) => {
                    let (base, sub) = rest.split_once(':').unwrap_or((rest, DEFAULT_RECYCLED_SUBTYPE));
                    (Some(RECYCLED_MATERIAL.to_string()), Some(base.to_string()), Some(sub.to_string()))
                }
                None => (Some(value.to_string()), None, None),
            },
            None => (None, None, None),
        };

        Self {
            profile_id: Some(row.profile_id.clone()),
            product_line: row.product_line.clone(),
            process_type: Some(payload.process_type.clone()),
            raw_material,
            recycled_base_material,
            recycled_subtype,
            impacts: payload.impacts_per_kg,
            components,
            upstream_transport_profile_ids: payload.upstream_transport_profile_ids.clone(),
            upstream_transport_manual: payload.upstream_transport_manual.unwrap_or_default(),
            scope3_manual: payload.manual_overrides.scope3,
            total_manual: payload.manual_overrides.total,
            chemicals: payload.chemicals.clone(),
            evidence_type: payload.evidence.kind,
            evidence_url: payload.evidence.url.clone(),
            evidence_note: payload.evidence.note.clone(),
            evidence_file_path: payload.evidence.file_path.clone(),
            social: payload.social.clone(),
            transport: payload.transport.clone(),
            brand: payload.brand.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedProfile {
    pub profile_id: String,
    pub created: bool,
    pub bundle: ImpactBundle,
}

/// A stored profile ready for editing.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileEdit {
    pub profile: StoredProfile,
    pub payload: ProfilePayload,
    pub components: Vec<ComponentLink>,
    pub verification: Option<Verification>,
}

#[derive(Clone)]
pub struct ProfileService {
    db: SharedDatabase,
    rules: AggregationRules,
    max_reference_depth: usize,
}

impl ProfileService {
    pub fn new(db: SharedDatabase, rules: AggregationRules, max_reference_depth: usize) -> Self {
        Self {
            db,
            rules,
            max_reference_depth,
        }
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn rules(&self) -> &AggregationRules {
        &self.rules
    }

    pub fn save(&self, ctx: &EntryContext, draft: &ProfileDraft) -> Result<SavedProfile, LedgerError> {
        let actor_id = ctx.actor_id.trim();
        if actor_id.is_empty() {
            return Err(LedgerError::validation("Company name is empty."));
        }
        let product_line = draft.product_line.trim();
        if product_line.is_empty() {
            return Err(LedgerError::validation(
                "Please enter Productline (product + productcode) before saving.",
            ));
        }

        let phase = ctx.phase;
        let process_type = resolve_process_type(phase, draft.process_type.as_deref())?;
        let material_or_process = material_or_process_label(phase, draft, &process_type)?;
        let actor_label = ctx
            .actor_label
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let needs_components = phase.needs_components();
        let components: Vec<ComponentLink> = if needs_components {
            draft
                .components
                .iter()
                .map(|c| ComponentLink::new(c.component_profile_id.trim(), c.percent))
                .filter(|c| !c.component_profile_id.is_empty())
                .collect()
        } else {
            Vec::new()
        };
        let transport_ids = if needs_components {
            trimmed_ids(&draft.upstream_transport_profile_ids)
        } else {
            Vec::new()
        };
        let transport_manual = needs_components.then(|| {
            let mut manual = sanitize(&draft.upstream_transport_manual);
            manual.water_per_kg = 0.0;
            manual
        });
        let brand = (phase == Phase::Brand).then(|| {
            let mut brand = draft.brand.clone().unwrap_or_default();
            brand.manufacturer_profile_id = brand
                .manufacturer_profile_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            brand.transport_profile_ids = trimmed_ids(&brand.transport_profile_ids);
            brand
        });

        let calculated_upstream = match (&transport_manual, &brand) {
            (Some(manual), _) => aggregate_upstream(
                &UpstreamInputs {
                    components: &components,
                    transport_ids: &transport_ids,
                    manual_addon: manual,
                },
                &self.db,
                &self.rules,
            )?,
            (None, Some(brand)) => aggregate_brand_scope3(
                brand.manufacturer_profile_id.as_deref().unwrap_or(""),
                &brand.transport_profile_ids,
                &self.db,
                &self.rules,
            )?,
            (None, None) => None,
        };

        let step = step_impact(phase, &draft.impacts, brand.as_ref());
        let manual_overrides = ManualOverrides {
            scope3: draft.scope3_manual.as_ref().map(sanitize),
            total: draft.total_manual.as_ref().map(sanitize),
        };
        let impact_bundle = resolve_bundle(&BundleInputs {
            scope3_calculated: calculated_upstream,
            scope3_manual: manual_overrides.scope3,
            total_manual: manual_overrides.total,
            step: Some(step),
        });

        let mut evidence = Evidence::new(
            draft.evidence_type,
            non_blank(draft.evidence_url.as_deref()),
            non_blank(draft.evidence_note.as_deref()),
        );
        evidence.file_path = non_blank(draft.evidence_file_path.as_deref());

        let payload = ProfilePayload {
            schema_version: CURRENT_SCHEMA_VERSION,
            phase,
            process_type: process_type.clone(),
            material_or_process: material_or_process.clone(),
            unit: "per_kg".into(),
            product: ProductLabel {
                label: Some(product_line.to_string()),
            },
            impacts_per_kg: step,
            upstream_transport_profile_ids: transport_ids,
            upstream_transport_manual: transport_manual,
            calculated_upstream,
            manual_overrides,
            impact_bundle: impact_bundle.clone(),
            chemicals: if phase.has_chemicals() {
                Some(draft.chemicals.clone().unwrap_or_default())
            } else {
                None
            },
            evidence,
            social: draft.social.clone(),
            transport: (phase == Phase::Transport).then(|| draft.transport.clone().unwrap_or_default()),
            brand,
        };

        let write = ProfileWrite {
            profile_id: non_blank(draft.profile_id.as_deref()),
            owner_actor_id: actor_id.to_string(),
            owner_actor_label: actor_label.map(str::to_string),
            product_line: product_line.to_string(),
            phase,
            process_type,
            material_or_process,
            raw_material: raw_material_column(phase, draft),
            payload,
            components,
        };

        let outcome = self.store(&write)?;
        info!(
            profile_id = %outcome.profile_id,
            phase = %phase,
            created = outcome.created,
            "Profile saved"
        );
        Ok(SavedProfile {
            profile_id: outcome.profile_id,
            created: outcome.created,
            bundle: impact_bundle,
        })
    }

    fn store(&self, write: &ProfileWrite) -> Result<SaveOutcome, LedgerError> {
        let existing = match &write.profile_id {
            Some(id) => Some(id.clone()),
            None => self.db.find_profile_by_key(
                &write.owner_actor_id,
                write.phase,
                &write.material_or_process,
                &write.product_line,
            )?,
        };

        let mut references: Vec<String> = write
            .components
            .iter()
            .map(|c| c.component_profile_id.clone())
            .collect();
        references.extend(write.payload.upstream_references());
        check_references(existing.as_deref(), &references, &self.db, self.max_reference_depth)?;

        self.db.save_profile(write)
    }

    pub fn load_for_edit(&self, profile_id: &str) -> Result<ProfileEdit, LedgerError> {
        let profile_id = profile_id.trim();
        let profile = self
            .db
            .get_profile(profile_id)?
            .ok_or_else(|| LedgerError::validation(format!("Unknown profile_id: {profile_id}")))?;
        let payload = adapter::upgrade_payload(profile.impact_payload.clone())?;
        let components = self.db.get_component_links(profile_id)?;
        let verification = self.db.latest_verification(profile_id)?;
        Ok(ProfileEdit {
            profile,
            payload,
            components,
            verification,
        })
    }

    /// Re-run aggregation and resolution for a stored profile against the
    /// current values of its upstream profiles. Only this profile changes.
    pub fn recalculate(&self, profile_id: &str) -> Result<SavedProfile, LedgerError> {
        let edit = self.load_for_edit(profile_id)?;
        debug!(profile_id = %edit.profile.profile_id, "Recalculating profile");
        let ctx = EntryContext {
            actor_id: edit.profile.owner_actor_id.clone(),
            actor_label: edit.profile.owner_actor_label.clone(),
            phase: edit.profile.phase,
        };
        let draft = ProfileDraft::from_stored(&edit.profile, &edit.payload, edit.components);
        self.save(&ctx, &draft)
    }

    /// Append a verification mark and return the profile's latest state.
    pub fn mark_verification(
        &self,
        profile_id: &str,
        status: bool,
        org: Option<&str>,
    ) -> Result<Verification, LedgerError> {
        let profile_id = profile_id.trim();
        if self.db.get_profile(profile_id)?.is_none() {
            return Err(LedgerError::validation(format!("Unknown profile_id: {profile_id}")));
        }
        let note = if status { "Certificate of audit" } else { "Unverified" };
        self.db
            .insert_verification(profile_id, status, non_blank(org).as_deref(), Some(note))?;
        info!(profile_id = %profile_id, status, "Verification recorded");
        self.db
            .latest_verification(profile_id)?
            .ok_or_else(|| LedgerError::validation(format!("Unknown profile_id: {profile_id}")))
    }
}

fn resolve_process_type(phase: Phase, requested: Option<&str>) -> Result<String, LedgerError> {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());
    match requested {
        None => Ok(phase.default_process_type().to_string()),
        Some(value) => phase
            .process_options()
            .iter()
            .find(|option| option.eq_ignore_ascii_case(value))
            .map(|option| option.to_string())
            .ok_or_else(|| {
                LedgerError::validation(format!(
                    "Unknown process type '{value}' for {phase}. Expected one of: {}",
                    phase.process_options().join(", ")
                ))
            }),
    }
}

/// Part of the upsert key: the material for raw materials, else the process.
pub fn material_or_process_label(
    phase: Phase,
    draft: &ProfileDraft,
    process_type: &str,
) -> Result<String, LedgerError> {
    if phase != Phase::RawMaterials {
        return Ok(process_type.to_string());
    }
    let raw = draft.raw_material.as_deref().map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(LedgerError::validation("Please choose a raw material before saving."));
    }
    if raw == RECYCLED_MATERIAL {
        let (base, sub) = recycled_parts(draft);
        return Ok(format!("RecycledMaterial:{base}:{sub}"));
    }
    Ok(raw.to_string())
}

fn raw_material_column(phase: Phase, draft: &ProfileDraft) -> Option<String> {
    if phase != Phase::RawMaterials {
        return None;
    }
    let raw = draft.raw_material.as_deref().map(str::trim).unwrap_or("");
    if raw == RECYCLED_MATERIAL {
        let (base, sub) = recycled_parts(draft);
        return Some(format!("{RECYCLED_MATERIAL}:{base}:{sub}"));
    }
    non_blank(Some(raw))
}

fn recycled_parts(draft: &ProfileDraft) -> (&str, &str) {
    let base = draft
        .recycled_base_material
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_RECYCLED_BASE);
    let sub = draft
        .recycled_subtype
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_RECYCLED_SUBTYPE);
    (base, sub)
}

/// The profile's own contribution. Only Transport carries PM2.5.
fn step_impact(phase: Phase, impacts: &ImpactVector, brand: Option<&BrandDetails>) -> ImpactVector {
    match phase {
        Phase::Brand => sanitize(&brand.map(BrandDetails::step_impact).unwrap_or_default()),
        Phase::Transport => sanitize(impacts),
        _ => ImpactVector {
            pm25_per_kg: 0.0,
            ..sanitize(impacts)
        },
    }
}

fn trimmed_ids(ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
