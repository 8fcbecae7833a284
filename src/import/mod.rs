//! Bulk import of profile rows.
//!
//! Sheets are handled one after another in document order so later sheets
//! can reference profiles created by earlier ones. Rows within a sheet are
//! saved concurrently with a bounded number of in-flight saves; a failing
//! row is recorded and the rest continue.

pub mod rows;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::Phase;
use crate::error::LedgerError;
use crate::profile::{EntryContext, ProfileService, SavedProfile};
use rows::{PRODUCT_LINE, Row, cell, draft_for_row, text};

/// Already-decoded workbook: sheets in workbook order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportDocument {
    pub sheets: Vec<ImportSheet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSheet {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl ImportDocument {
    /// Accepts `{"sheets": [{"name", "rows"}]}` or a map of sheet name to
    /// rows. Map keys carry no order, so the map form is put in phase order.
    pub fn from_value(value: Value) -> Result<Self, LedgerError> {
        let Value::Object(map) = value else {
            return Err(LedgerError::validation("Import document must be a JSON object."));
        };
        if map.get("sheets").is_some_and(Value::is_array) {
            return Ok(serde_json::from_value(Value::Object(map))?);
        }

        let mut sheets = Vec::with_capacity(map.len());
        for (name, rows) in map {
            let rows: Vec<Row> = serde_json::from_value(rows)?;
            sheets.push(ImportSheet { name, rows });
        }
        sheets.sort_by_key(|sheet| {
            sheet
                .name
                .parse::<Phase>()
                .ok()
                .and_then(|phase| Phase::ALL.iter().position(|p| *p == phase))
                .unwrap_or(usize::MAX)
        });
        Ok(Self { sheets })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRowError {
    pub sheet: String,
    /// Spreadsheet row number (header is row 1).
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    pub created: usize,
    pub skipped: usize,
    /// Saved profile ids, first occurrence order.
    pub profile_ids: Vec<String>,
    pub errors: Vec<ImportRowError>,
}

type RowResult = Result<SavedProfile, String>;

/// Run one row save on the blocking pool once a permit is free.
fn spawn_row<F>(semaphore: &Arc<Semaphore>, save: F) -> JoinHandle<RowResult>
where
    F: FnOnce() -> RowResult + Send + 'static,
{
    let semaphore = Arc::clone(semaphore);
    tokio::spawn(async move {
        let _permit = semaphore.acquire_owned().await.map_err(|e| e.to_string())?;
        tokio::task::spawn_blocking(save)
            .await
            .map_err(|e| format!("Import worker failed: {e}"))?
    })
}

/// Await every pending row, keeping its row number whatever the outcome.
async fn join_rows(pending: Vec<(usize, JoinHandle<RowResult>)>) -> Vec<(usize, RowResult)> {
    let mut results = Vec::with_capacity(pending.len());
    for (row_number, handle) in pending {
        let result = handle
            .await
            .map_err(|e| format!("Import worker failed: {e}"))
            .and_then(|saved| saved);
        results.push((row_number, result));
    }
    results
}

/// Import every known sheet for one actor.
pub async fn run_import(
    service: ProfileService,
    actor_id: &str,
    actor_label: Option<&str>,
    document: ImportDocument,
    concurrency: usize,
) -> Result<ImportOutcome, LedgerError> {
    let sheets: Vec<(Phase, ImportSheet)> = document
        .sheets
        .into_iter()
        .filter_map(|sheet| match sheet.name.parse::<Phase>() {
            Ok(phase) => Some((phase, sheet)),
            Err(_) => {
                warn!(sheet = %sheet.name, "Ignoring unknown sheet");
                None
            }
        })
        .collect();
    if sheets.is_empty() {
        return Err(LedgerError::validation(
            "No valid sheets found. Expected: RawMaterials/Yarn/Fabric/Manufacturer/Transport/Brand",
        ));
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut outcome = ImportOutcome::default();

    for (phase, sheet) in sheets {
        let ctx = EntryContext {
            actor_id: actor_id.to_string(),
            actor_label: actor_label.map(str::to_string),
            phase,
        };
        let mut pending = Vec::new();
        let mut results: Vec<(usize, RowResult)> = Vec::new();

        for (index, row) in sheet.rows.iter().enumerate() {
            let row_number = index + 2;
            if cell(row, PRODUCT_LINE).map(text).unwrap_or_default().is_empty() {
                outcome.skipped += 1;
                continue;
            }
            let draft = match draft_for_row(phase, row, service.rules()) {
                Ok(draft) => draft,
                Err(message) => {
                    results.push((row_number, Err(message)));
                    continue;
                }
            };

            let service = service.clone();
            let ctx = ctx.clone();
            let handle = spawn_row(&semaphore, move || service.save(&ctx, &draft).map_err(|e| e.to_string()));
            pending.push((row_number, handle));
        }

        results.extend(join_rows(pending).await);

        results.sort_by_key(|(row_number, _)| *row_number);
        for (row_number, result) in results {
            match result {
                Ok(saved) => {
                    outcome.imported += 1;
                    if saved.created {
                        outcome.created += 1;
                    }
                    if !outcome.profile_ids.contains(&saved.profile_id) {
                        outcome.profile_ids.push(saved.profile_id);
                    }
                }
                Err(message) => {
                    warn!(sheet = %sheet.name, row = row_number, "Import row failed: {message}");
                    outcome.errors.push(ImportRowError {
                        sheet: sheet.name.clone(),
                        row: row_number,
                        message,
                    });
                }
            }
        }
    }

    info!(
        imported = outcome.imported,
        created = outcome.created,
        errors = outcome.errors.len(),
        "Import finished"
    );
    Ok(outcome)
}
