pub mod adapter;
pub mod schema;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::aggregate::ProfileLookup;
use crate::core::graph::ReferenceSource;
use crate::core::{ComponentLink, ImpactView, Phase};
use crate::error::LedgerError;
use crate::profile::payload::ProfilePayload;

/// A profile row as stored. The payload is kept raw; use `adapter` to read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredProfile {
    pub profile_id: String,
    pub owner_actor_id: String,
    pub owner_actor_label: Option<String>,
    pub product_line: String,
    pub phase: Phase,
    pub process_type: String,
    pub profile_type: String,
    pub material_or_process: String,
    pub raw_material: Option<String>,
    pub impact_payload: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Everything `save_profile` writes in one transaction.
#[derive(Debug, Clone)]
pub struct ProfileWrite {
    /// Explicit target; `None` means "upsert by key".
    pub profile_id: Option<String>,
    pub owner_actor_id: String,
    pub owner_actor_label: Option<String>,
    pub product_line: String,
    pub phase: Phase,
    pub process_type: String,
    pub material_or_process: String,
    pub raw_material: Option<String>,
    pub payload: ProfilePayload,
    pub components: Vec<ComponentLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub profile_id: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub profile_id: String,
    pub status: bool,
    pub org: Option<String>,
    pub note: Option<String>,
    pub verified_at: String,
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        Ok(Self::wrap(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Ok(Self::wrap(Database::from_connection(Connection::open_in_memory()?)?))
    }

    fn wrap(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        // A panic while holding the lock cannot leave a half-applied
        // transaction behind, so a poisoned guard is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upsert key lookup: (owner, phase, material_or_process, product_line).
    pub fn find_profile_by_key(
        &self,
        owner: &str,
        phase: Phase,
        material_or_process: &str,
        product_line: &str,
    ) -> Result<Option<String>, rusqlite::Error> {
        self.db().find_profile_by_key(owner, phase, material_or_process, product_line)
    }

    /// Batch lookup of impact views; unknown ids are absent from the map.
    pub fn get_profiles_by_id(&self, ids: &[String]) -> Result<HashMap<String, ImpactView>, LedgerError> {
        self.db().get_profiles_by_id(ids)
    }

    pub fn get_profile(&self, profile_id: &str) -> Result<Option<StoredProfile>, rusqlite::Error> {
        self.db().get_profile(profile_id)
    }

    /// Create or update a profile and rewrite its component links atomically.
    /// The owning actor is created (or relabelled) in the same transaction.
    pub fn save_profile(&self, write: &ProfileWrite) -> Result<SaveOutcome, LedgerError> {
        self.db().save_profile(write)
    }

    pub fn get_component_links(&self, parent_id: &str) -> Result<Vec<ComponentLink>, rusqlite::Error> {
        self.db().get_component_links(parent_id)
    }

    /// Outgoing references (components, transport, manufacturer) per profile.
    pub fn upstream_references(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, LedgerError> {
        self.db().upstream_references(ids)
    }

    pub fn insert_verification(
        &self,
        profile_id: &str,
        status: bool,
        org: Option<&str>,
        note: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.db().insert_verification(profile_id, status, org, note)
    }

    pub fn latest_verification(&self, profile_id: &str) -> Result<Option<Verification>, rusqlite::Error> {
        self.db().latest_verification(profile_id)
    }

    /// An owner's profiles for one phase, newest first.
    pub fn profiles_for_export(&self, owner: &str, phase: Phase) -> Result<Vec<StoredProfile>, rusqlite::Error> {
        self.db().profiles_for_export(owner, phase)
    }
}

impl ProfileLookup for SharedDatabase {
    fn impacts_by_id(&self, ids: &[String]) -> Result<HashMap<String, ImpactView>, LedgerError> {
        self.get_profiles_by_id(ids)
    }
}

impl ReferenceSource for SharedDatabase {
    fn upstream_references(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, LedgerError> {
        SharedDatabase::upstream_references(self, ids)
    }
}

/// Ids bound per `IN (...)` statement; SQLite caps host parameters per query.
const ID_CHUNK: usize = 500;

const PROFILE_COLUMNS: &str = "profile_id, owner_actor_id, owner_actor_label, product_line, phase, \
     process_type, profile_type, material_or_process, raw_material, impact_payload, created_at, updated_at";

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Create the actor if needed; a given display name replaces the old one.
    pub fn ensure_actor(&self, actor_id: &str, display_name: Option<&str>) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO actors (actor_id, display_name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(actor_id) DO UPDATE SET display_name = COALESCE(excluded.display_name, actors.display_name)",
            params![actor_id, display_name, timestamp()],
        )?;
        Ok(())
    }

    pub fn find_profile_by_key(
        &self,
        owner: &str,
        phase: Phase,
        material_or_process: &str,
        product_line: &str,
    ) -> Result<Option<String>, rusqlite::Error> {
        find_by_key(&self.conn, owner, phase, material_or_process, product_line)
    }

    pub fn get_profiles_by_id(&self, ids: &[String]) -> Result<HashMap<String, ImpactView>, LedgerError> {
        let mut views = HashMap::with_capacity(ids.len());
        for (id, payload) in self.payloads_by_id(ids)? {
            views.insert(id, adapter::impact_view(&payload));
        }
        Ok(views)
    }

    fn payloads_by_id(&self, ids: &[String]) -> Result<Vec<(String, Value)>, LedgerError> {
        let mut out = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT profile_id, impact_payload FROM profiles WHERE profile_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, text) = row?;
                out.push((id, serde_json::from_str(&text)?));
            }
        }
        Ok(out)
    }

    pub fn get_profile(&self, profile_id: &str) -> Result<Option<StoredProfile>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE profile_id = ?1"),
                params![profile_id],
                Self::row_to_profile,
            )
            .optional()
    }

    pub fn save_profile(&self, write: &ProfileWrite) -> Result<SaveOutcome, LedgerError> {
        let payload = serde_json::to_string(&write.payload)?;
        let now = timestamp();
        let tx = self.conn.unchecked_transaction()?;
        self.ensure_actor(&write.owner_actor_id, write.owner_actor_label.as_deref())?;

        let existing = match write.profile_id.as_deref() {
            Some(id) => {
                let found: Option<String> = tx
                    .query_row(
                        "SELECT profile_id FROM profiles WHERE profile_id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if found.is_none() {
                    return Err(LedgerError::validation(format!("Unknown profile_id: {id}")));
                }
                found
            }
            None => find_by_key(
                &tx,
                &write.owner_actor_id,
                write.phase,
                &write.material_or_process,
                &write.product_line,
            )?,
        };

        let (profile_id, created) = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE profiles SET owner_actor_id = ?2, owner_actor_label = ?3, product_line = ?4,
                        phase = ?5, process_type = ?6, profile_type = ?7, material_or_process = ?8,
                        raw_material = ?9, impact_payload = ?10, updated_at = ?11
                     WHERE profile_id = ?1",
                    params![
                        id,
                        write.owner_actor_id,
                        write.owner_actor_label,
                        write.product_line,
                        write.phase.as_str(),
                        write.process_type,
                        write.phase.profile_type(),
                        write.material_or_process,
                        write.raw_material,
                        payload,
                        now,
                    ],
                )?;
                (id, false)
            }
            None => {
                let id = new_profile_id();
                tx.execute(
                    &format!(
                        "INSERT INTO profiles ({PROFILE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)"
                    ),
                    params![
                        id,
                        write.owner_actor_id,
                        write.owner_actor_label,
                        write.product_line,
                        write.phase.as_str(),
                        write.process_type,
                        write.phase.profile_type(),
                        write.material_or_process,
                        write.raw_material,
                        payload,
                        now,
                    ],
                )?;
                (id, true)
            }
        };

        tx.execute(
            "DELETE FROM profile_components WHERE parent_profile_id = ?1",
            params![profile_id],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO profile_components (parent_profile_id, position, component_profile_id, percent)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, link) in write.components.iter().enumerate() {
                stmt.execute(params![
                    profile_id,
                    position as i64,
                    link.component_profile_id.trim(),
                    link.percent
                ])?;
            }
        }
        tx.commit()?;

        Ok(SaveOutcome { profile_id, created })
    }

    pub fn get_component_links(&self, parent_id: &str) -> Result<Vec<ComponentLink>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT component_profile_id, percent FROM profile_components
             WHERE parent_profile_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![parent_id], |row| {
            Ok(ComponentLink {
                component_profile_id: row.get(0)?,
                percent: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    pub fn upstream_references(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, LedgerError> {
        let mut refs: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT parent_profile_id, component_profile_id FROM profile_components
                 WHERE parent_profile_id IN ({}) ORDER BY parent_profile_id, position",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (parent, child) = row?;
                refs.entry(parent).or_default().push(child);
            }
        }

        for (id, payload) in self.payloads_by_id(ids)? {
            refs.entry(id).or_default().extend(adapter::payload_references(&payload));
        }
        Ok(refs)
    }

    pub fn insert_verification(
        &self,
        profile_id: &str,
        status: bool,
        org: Option<&str>,
        note: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO verifications (profile_id, status, org, note, verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![profile_id, status as i32, org, note, timestamp()],
        )?;
        Ok(())
    }

    pub fn latest_verification(&self, profile_id: &str) -> Result<Option<Verification>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT profile_id, status, org, note, verified_at FROM verifications
                 WHERE profile_id = ?1 ORDER BY id DESC LIMIT 1",
                params![profile_id],
                |row| {
                    let status: i32 = row.get(1)?;
                    Ok(Verification {
                        profile_id: row.get(0)?,
                        status: status != 0,
                        org: row.get(2)?,
                        note: row.get(3)?,
                        verified_at: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    pub fn profiles_for_export(&self, owner: &str, phase: Phase) -> Result<Vec<StoredProfile>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles
             WHERE owner_actor_id = ?1 AND phase = ?2 ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![owner, phase.as_str()], Self::row_to_profile)?;
        rows.collect()
    }

    fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<StoredProfile> {
        let phase: String = row.get(4)?;
        let payload: String = row.get(9)?;
        Ok(StoredProfile {
            profile_id: row.get(0)?,
            owner_actor_id: row.get(1)?,
            owner_actor_label: row.get(2)?,
            product_line: row.get(3)?,
            phase: phase
                .parse()
                .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
            process_type: row.get(5)?,
            profile_type: row.get(6)?,
            material_or_process: row.get(7)?,
            raw_material: row.get(8)?,
            impact_payload: serde_json::from_str(&payload)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

fn find_by_key(
    conn: &Connection,
    owner: &str,
    phase: Phase,
    material_or_process: &str,
    product_line: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT profile_id FROM profiles
         WHERE owner_actor_id = ?1 AND phase = ?2 AND material_or_process = ?3 AND product_line = ?4",
        params![owner, phase.as_str(), material_or_process, product_line],
        |row| row.get(0),
    )
    .optional()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn new_profile_id() -> String {
    format!("PROF_{}", Uuid::new_v4().simple())
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ImpactVector;
    use crate::core::resolve::{BundleInputs, resolve_bundle};
    use crate::profile::payload::{CURRENT_SCHEMA_VERSION, Evidence, ManualOverrides, ProductLabel};
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn open_temp_db() -> SharedDatabase {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "textile_ledger_test_{}_{}.db",
            std::process::id(),
            id
        ));
        // Remove if leftover from previous run
        let _ = std::fs::remove_file(&path);
        SharedDatabase::open(&path).unwrap()
    }

    /// `None` when the actor row is absent.
    fn actor_label(db: &SharedDatabase, actor_id: &str) -> Option<Option<String>> {
        db.db()
            .conn
            .query_row(
                "SELECT display_name FROM actors WHERE actor_id = ?1",
                params![actor_id],
                |r| r.get(0),
            )
            .optional()
            .unwrap()
    }

    fn payload(phase: Phase, step: ImpactVector) -> ProfilePayload {
        ProfilePayload {
            schema_version: CURRENT_SCHEMA_VERSION,
            phase,
            process_type: phase.default_process_type().into(),
            material_or_process: phase.default_process_type().into(),
            unit: "per_kg".into(),
            product: ProductLabel { label: Some("Tee".into()) },
            impacts_per_kg: step,
            upstream_transport_profile_ids: Vec::new(),
            upstream_transport_manual: None,
            calculated_upstream: None,
            manual_overrides: ManualOverrides::default(),
            impact_bundle: resolve_bundle(&BundleInputs {
                step: Some(step),
                ..BundleInputs::default()
            }),
            chemicals: None,
            evidence: Evidence::default(),
            social: None,
            transport: None,
            brand: None,
        }
    }

    fn write(owner: &str, phase: Phase, line: &str, step: ImpactVector) -> ProfileWrite {
        ProfileWrite {
            profile_id: None,
            owner_actor_id: owner.into(),
            owner_actor_label: None,
            product_line: line.into(),
            phase,
            process_type: phase.default_process_type().into(),
            material_or_process: phase.default_process_type().into(),
            raw_material: None,
            payload: payload(phase, step),
            components: Vec::new(),
        }
    }

    #[test]
    fn insert_then_update_same_key() {
        let db = open_temp_db();
        let first = db
            .save_profile(&write("acme", Phase::RawMaterials, "Tee", ImpactVector::new(1.0, 0.0, 0.0, 0.0)))
            .unwrap();
        assert!(first.created);
        assert!(first.profile_id.starts_with("PROF_"));

        let second = db
            .save_profile(&write("acme", Phase::RawMaterials, "Tee", ImpactVector::new(2.0, 0.0, 0.0, 0.0)))
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.profile_id, first.profile_id);

        let views = db.get_profiles_by_id(&[first.profile_id.clone()]).unwrap();
        assert_eq!(views[&first.profile_id].best_known().co2_per_kg, 2.0);
    }

    #[test]
    fn find_by_key_distinguishes_product_lines() {
        let db = open_temp_db();
        let saved = db
            .save_profile(&write("acme", Phase::Transport, "Tee", ImpactVector::ZERO))
            .unwrap();
        assert_eq!(
            db.find_profile_by_key("acme", Phase::Transport, "Transport", "Tee").unwrap(),
            Some(saved.profile_id)
        );
        assert_eq!(db.find_profile_by_key("acme", Phase::Transport, "Transport", "Polo").unwrap(), None);
        assert_eq!(db.find_profile_by_key("other", Phase::Transport, "Transport", "Tee").unwrap(), None);
    }

    #[test]
    fn component_links_are_rewritten_not_patched() {
        let db = open_temp_db();
        let mut w = write("spinner", Phase::Yarn, "Yarn 30/1", ImpactVector::ZERO);
        w.components = vec![
            ComponentLink::new("PROF_AAAAAAAAAA", 60.0),
            ComponentLink::new("PROF_BBBBBBBBBB", 40.0),
        ];
        let saved = db.save_profile(&w).unwrap();
        assert_eq!(db.get_component_links(&saved.profile_id).unwrap().len(), 2);

        w.components = vec![ComponentLink::new(" PROF_CCCCCCCCCC ", 100.0)];
        db.save_profile(&w).unwrap();
        let links = db.get_component_links(&saved.profile_id).unwrap();
        assert_eq!(links, vec![ComponentLink::new("PROF_CCCCCCCCCC", 100.0)]);
    }

    #[test]
    fn batch_lookup_omits_unknown_ids() {
        let db = open_temp_db();
        let saved = db
            .save_profile(&write("acme", Phase::RawMaterials, "Tee", ImpactVector::new(1.0, 2.0, 3.0, 0.0)))
            .unwrap();
        let views = db
            .get_profiles_by_id(&[saved.profile_id.clone(), "PROF_MISSING00".into()])
            .unwrap();
        assert_eq!(views.len(), 1);
        assert!(views.contains_key(&saved.profile_id));
        assert!(db.get_profiles_by_id(&[]).unwrap().is_empty());
    }

    #[test]
    fn legacy_payload_rows_are_readable() {
        let db = open_temp_db();
        {
            let guard = db.db();
            guard.ensure_actor("legacy", None).unwrap();
            guard
                .conn
                .execute(
                    "INSERT INTO profiles (profile_id, owner_actor_id, product_line, phase, process_type,
                        profile_type, material_or_process, impact_payload, created_at, updated_at)
                     VALUES ('PROF_LEGACY0001', 'legacy', 'Tee', 'RawMaterials', 'Material', 'material',
                        'Cotton', ?1, '2024-01-01', '2024-01-01')",
                    params![r#"{"phase":"RawMaterials","impacts_per_kg":{"co2_kg":3.5,"water_l":10}}"#],
                )
                .unwrap();
        }
        let views = db.get_profiles_by_id(&["PROF_LEGACY0001".into()]).unwrap();
        assert_eq!(views["PROF_LEGACY0001"].best_known(), ImpactVector::new(3.5, 10.0, 0.0, 0.0));
    }

    #[test]
    fn explicit_unknown_profile_id_is_rejected() {
        let db = open_temp_db();
        let mut w = write("acme", Phase::RawMaterials, "Tee", ImpactVector::ZERO);
        w.profile_id = Some("PROF_DOESNOTEXIST".into());
        assert!(db.save_profile(&w).unwrap_err().is_validation());
    }

    #[test]
    fn save_creates_the_owner() {
        let db = open_temp_db();
        let mut w = write("newcomer", Phase::RawMaterials, "Tee", ImpactVector::ZERO);
        w.owner_actor_label = Some("Newcomer Ltd".into());
        db.save_profile(&w).unwrap();
        assert_eq!(actor_label(&db, "newcomer"), Some(Some("Newcomer Ltd".into())));
    }

    #[test]
    fn rejected_save_leaves_actors_untouched() {
        let db = open_temp_db();
        let mut w = write("acme", Phase::RawMaterials, "Tee", ImpactVector::ZERO);
        w.owner_actor_label = Some("Acme Mills".into());
        db.save_profile(&w).unwrap();

        let mut renamed = write("acme", Phase::RawMaterials, "Tee", ImpactVector::ZERO);
        renamed.owner_actor_label = Some("Renamed".into());
        renamed.profile_id = Some("PROF_DOESNOTEXIST".into());
        assert!(db.save_profile(&renamed).unwrap_err().is_validation());
        assert_eq!(actor_label(&db, "acme"), Some(Some("Acme Mills".into())));

        let mut ghost = write("ghost", Phase::RawMaterials, "Tee", ImpactVector::ZERO);
        ghost.profile_id = Some("PROF_DOESNOTEXIST".into());
        assert!(db.save_profile(&ghost).is_err());
        assert_eq!(actor_label(&db, "ghost"), None);
    }

    #[test]
    fn upstream_references_merge_components_and_payload_links() {
        let db = open_temp_db();
        let mut w = write("spinner", Phase::Yarn, "Yarn", ImpactVector::ZERO);
        w.components = vec![ComponentLink::new("PROF_COTTON0001", 100.0)];
        w.payload.upstream_transport_profile_ids = vec!["PROF_TRUCK00001".into()];
        let saved = db.save_profile(&w).unwrap();

        let refs = db.upstream_references(&[saved.profile_id.clone()]).unwrap();
        assert_eq!(refs[&saved.profile_id], vec!["PROF_COTTON0001", "PROF_TRUCK00001"]);
    }

    #[test]
    fn latest_verification_wins() {
        let db = open_temp_db();
        let saved = db
            .save_profile(&write("acme", Phase::Fabric, "Denim", ImpactVector::ZERO))
            .unwrap();
        assert!(db.latest_verification(&saved.profile_id).unwrap().is_none());
        db.insert_verification(&saved.profile_id, true, Some("BSCI"), Some("Certificate of audit"))
            .unwrap();
        db.insert_verification(&saved.profile_id, false, Some("GOTS"), Some("Unverified"))
            .unwrap();
        let latest = db.latest_verification(&saved.profile_id).unwrap().unwrap();
        assert!(!latest.status);
        assert_eq!(latest.org.as_deref(), Some("GOTS"));
    }

    #[test]
    fn export_filters_by_owner_and_phase_newest_first() {
        let db = open_temp_db();
        let a = db.save_profile(&write("acme", Phase::Fabric, "A", ImpactVector::ZERO)).unwrap();
        let b = db.save_profile(&write("acme", Phase::Fabric, "B", ImpactVector::ZERO)).unwrap();
        db.save_profile(&write("acme", Phase::Yarn, "C", ImpactVector::ZERO)).unwrap();
        db.save_profile(&write("other", Phase::Fabric, "D", ImpactVector::ZERO)).unwrap();

        let rows = db.profiles_for_export("acme", Phase::Fabric).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.profile_id.as_str()).collect();
        assert_eq!(ids, vec![b.profile_id.as_str(), a.profile_id.as_str()]);
        assert_eq!(rows[0].profile_type, "process");
        assert_eq!(rows[0].impact_payload["schema_version"], 2);
    }

    #[test]
    fn ensure_actor_keeps_existing_label() {
        let db = open_temp_db();
        db.db().ensure_actor("acme", Some("Acme Mills")).unwrap();
        db.db().ensure_actor("acme", None).unwrap();
        assert_eq!(actor_label(&db, "acme"), Some(Some("Acme Mills".into())));
    }

    #[test]
    fn batch_reads_span_more_ids_than_one_statement_binds() {
        let db = open_temp_db();
        let mut w = write("spinner", Phase::Yarn, "Yarn", ImpactVector::new(1.0, 0.0, 0.0, 0.0));
        w.components = vec![ComponentLink::new("PROF_COTTON0001", 100.0)];
        let saved = db.save_profile(&w).unwrap();

        let mut ids: Vec<String> = (0..40_000).map(|i| format!("PROF_MISSING{i:05}")).collect();
        ids.push(saved.profile_id.clone());

        let views = db.get_profiles_by_id(&ids).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[&saved.profile_id].best_known().co2_per_kg, 1.0);

        let refs = db.upstream_references(&ids).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[&saved.profile_id], vec!["PROF_COTTON0001"]);
    }
}
