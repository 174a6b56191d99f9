//! Symbol source: the ordered list of stocks to look up.
//!
//! Symbols come from a CSV file with a header row containing the columns
//! `Stock name` and `Symbol`. Extra columns are ignored.

use crate::models::SymbolRequest;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum SymbolSourceError {
    #[error("failed to open symbol file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("malformed symbol row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// Load symbols from a CSV file on disk.
///
/// # Arguments
///
/// * `path` - CSV file with a header row naming `Stock name` and `Symbol`
///
/// # Returns
///
/// The symbols in file order, or an error naming the file or the bad row.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub fn load_symbols(path: impl AsRef<Path>) -> Result<Vec<SymbolRequest>, SymbolSourceError> {
    let path = path.as_ref();
    let reader = csv::Reader::from_path(path).map_err(|source| SymbolSourceError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let symbols = read_symbols(reader)?;
    info!(count = symbols.len(), "Loaded symbols");
    Ok(symbols)
}

/// Read symbols from an already opened CSV reader, keeping file order.
///
/// Rows whose symbol is blank are skipped with a warning; names and symbols
/// are trimmed.
pub fn read_symbols<R: Read>(
    mut reader: csv::Reader<R>,
) -> Result<Vec<SymbolRequest>, SymbolSourceError> {
    let mut symbols = Vec::new();
    for (i, row) in reader.deserialize::<SymbolRequest>().enumerate() {
        // header is line 1
        let row_number = i + 2;
        let request = row.map_err(|source| SymbolSourceError::Row {
            row: row_number,
            source,
        })?;
        let symbol = request.symbol.trim();
        if symbol.is_empty() {
            warn!(row = row_number, name = %request.name, "Skipping row without a symbol");
            continue;
        }
        symbols.push(SymbolRequest::new(request.name.trim(), symbol));
    }
    Ok(symbols)
}
