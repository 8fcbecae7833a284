use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS actors (
            actor_id     TEXT PRIMARY KEY,
            display_name TEXT,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profiles (
            profile_id          TEXT PRIMARY KEY,
            owner_actor_id      TEXT NOT NULL REFERENCES actors(actor_id),
            owner_actor_label   TEXT,
            product_line        TEXT NOT NULL,
            phase               TEXT NOT NULL,
            process_type        TEXT NOT NULL,
            profile_type        TEXT NOT NULL,
            material_or_process TEXT NOT NULL,
            raw_material        TEXT,
            impact_payload      TEXT NOT NULL, -- JSON
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profile_components (
            parent_profile_id    TEXT NOT NULL REFERENCES profiles(profile_id) ON DELETE CASCADE,
            position             INTEGER NOT NULL,
            component_profile_id TEXT NOT NULL,
            percent              REAL NOT NULL,
            PRIMARY KEY (parent_profile_id, position)
        );

        CREATE TABLE IF NOT EXISTS verifications (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id  TEXT NOT NULL REFERENCES profiles(profile_id) ON DELETE CASCADE,
            status      INTEGER NOT NULL,
            org         TEXT,
            note        TEXT,
            verified_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_key
            ON profiles(owner_actor_id, phase, material_or_process, product_line);
        CREATE INDEX IF NOT EXISTS idx_profiles_owner_phase ON profiles(owner_actor_id, phase, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_components_child ON profile_components(component_profile_id);
        CREATE INDEX IF NOT EXISTS idx_verifications_profile ON verifications(profile_id, id DESC);
        ",
    )?;
    Ok(())
}
