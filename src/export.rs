use std::io::Write;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::core::{ComponentLink, ImpactVector, Phase};
use crate::db::{SharedDatabase, StoredProfile, adapter};
use crate::error::LedgerError;

#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub actor_id: String,
    pub phase: Phase,
    pub exported_at: String,
    pub profiles: Vec<ExportedProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedProfile {
    #[serde(flatten)]
    pub profile: StoredProfile,
    pub components: Vec<ComponentLink>,
    /// Best known per-kg impact at export time.
    pub impact_per_kg: ImpactVector,
}

/// Every profile the actor owns in `phase`, newest first.
pub fn export_profiles(db: &SharedDatabase, actor_id: &str, phase: Phase) -> Result<ExportDocument, LedgerError> {
    let actor_id = actor_id.trim();
    if actor_id.is_empty() {
        return Err(LedgerError::validation("Company name is empty."));
    }

    let rows = db.profiles_for_export(actor_id, phase)?;
    let mut profiles = Vec::with_capacity(rows.len());
    for profile in rows {
        let components = db.get_component_links(&profile.profile_id)?;
        let impact_per_kg = adapter::impact_view(&profile.impact_payload).best_known();
        profiles.push(ExportedProfile {
            profile,
            components,
            impact_per_kg,
        });
    }

    Ok(ExportDocument {
        actor_id: actor_id.to_string(),
        phase,
        exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        profiles,
    })
}

pub fn write_export<W: Write>(document: &ExportDocument, out: &mut W, pretty: bool) -> Result<(), LedgerError> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, document)?;
    } else {
        serde_json::to_writer(&mut *out, document)?;
    }
    writeln!(out)?;
    Ok(())
}
