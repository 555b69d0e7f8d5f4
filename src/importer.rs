use std::time::Duration;

use serde::Serialize;

use crate::backend::{Backend, BackendError, UserContext};
use crate::loader::{ImportError, ParsedImport};

pub const IMPORT_BATCH_SIZE: usize = 300;
pub const IMPORT_BATCH_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: IMPORT_BATCH_SIZE,
            batch_delay: IMPORT_BATCH_DELAY,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub rows_parsed: usize,
    pub rows_written: usize,
    pub batches: usize,
    pub columns_added: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImporterError {
    #[error(transparent)]
    Parse(#[from] ImportError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Earlier batches stay written; the view keeps the partial import.
    #[error("Import stopped after {written} rows: {source}")]
    BatchFailed {
        written: usize,
        #[source]
        source: BackendError,
    },
}

/// Appends parsed rows to a view.
///
/// New columns are added to the dataset and shown in the view first. Rows are then written
/// `batch_size` at a time, pausing `batch_delay` between batches. The first failed batch
/// aborts the import.
///
/// # Arguments
/// * `backend` - Where the dataset and view live
/// * `user` - The user importing
/// * `table_id` - Dataset receiving any new columns
/// * `view_id` - View receiving the rows
/// * `parsed` - Output of the loader
/// * `options` - Batch size and delay
///
/// # Returns
/// * `Result<ImportReport, ImporterError>` - Counts of what was written
pub async fn import_into_view<B: Backend>(
    backend: &B,
    user: &UserContext,
    table_id: &str,
    view_id: &str,
    parsed: ParsedImport,
    options: ImportOptions,
) -> Result<ImportReport, ImporterError> {
    let mut report = ImportReport {
        rows_parsed: parsed.rows.len(),
        ..Default::default()
    };

    let mut dataset = backend.get_table(user, table_id).await?;
    let added = dataset.upsert_columns(&parsed.columns);
    if !added.is_empty() {
        backend
            .update_columns(user, table_id, dataset.columns.clone())
            .await?;
        report.columns_added = added.into_iter().map(|c| c.id).collect();
    }

    let mut view = backend.get_view(user, view_id).await?;
    let shown = view.visible_columns.len();
    for column in &parsed.columns {
        view.show_column(column);
    }
    if view.visible_columns.len() != shown {
        backend.update_view(user, view.clone()).await?;
    }

    let mut rows = view.effective_rows(&dataset).to_vec();
    let batch_size = options.batch_size.max(1);
    for (i, batch) in parsed.rows.chunks(batch_size).enumerate() {
        if i > 0 {
            tokio::time::sleep(options.batch_delay).await;
        }
        rows.extend_from_slice(batch);
        if let Err(source) = backend.update_view_rows(user, view_id, rows.clone()).await {
            log::warn!(
                "import into view {} failed at batch {}: {}",
                view_id,
                i + 1,
                source
            );
            return Err(ImporterError::BatchFailed {
                written: report.rows_written,
                source,
            });
        }
        report.rows_written += batch.len();
        report.batches += 1;
        log::debug!(
            "import into view {}: {}/{} rows",
            view_id,
            report.rows_written,
            report.rows_parsed
        );
    }

    log::info!(
        "imported {} rows into view {} ({} new columns)",
        report.rows_written,
        view_id,
        report.columns_added.len()
    );
    Ok(report)
}
