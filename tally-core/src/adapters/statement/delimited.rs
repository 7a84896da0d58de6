//! Delimited-text statement decoders (CSV exports)

use std::collections::HashMap;

use csv::{ReaderBuilder, StringRecord, Trim};

use super::{decode_text, skip_lines};
use crate::domain::{RawRecord, StatementFormat};
use crate::ports::{DecodeError, RowStream, StatementDecoder};

/// Fixed column names of a CIBC credit card export
pub const CIBC_COLUMNS: [&str; 5] = ["date", "description", "debit", "credit", "card"];

/// Header prefix that identifies an RBC chequing export
pub const RBC_HEADER_PREFIX: &str = "\"Account Type\",\"Account Number\"";

/// Columns an RBC export must carry
pub const RBC_REQUIRED_COLUMNS: [&str; 3] = ["Transaction Date", "Description 1", "CAD$"];

/// Any CSV whose first (non-skipped) line names the columns
#[derive(Debug, Clone)]
pub struct GenericCsvDecoder {
    skip_rows: usize,
    delimiter: u8,
}

impl Default for GenericCsvDecoder {
    fn default() -> Self {
        Self {
            skip_rows: 0,
            delimiter: b',',
        }
    }
}

impl GenericCsvDecoder {
    pub fn new(skip_rows: usize, delimiter: Option<char>) -> Self {
        let delimiter = delimiter
            .filter(|c| c.is_ascii())
            .map(|c| c as u8)
            .unwrap_or(b',');
        Self {
            skip_rows,
            delimiter,
        }
    }
}

impl StatementDecoder for GenericCsvDecoder {
    fn format(&self) -> StatementFormat {
        StatementFormat::GenericCsv
    }

    fn decode(&self, bytes: &[u8]) -> Result<RowStream, DecodeError> {
        let text = skip_lines(decode_text(bytes)?, self.skip_rows);

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| DecodeError::Malformed(format!("unreadable header row: {}", e)))?
            .clone();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(DecodeError::Malformed("missing header row".to_string()));
        }
        let columns = header_names(&headers);

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| DecodeError::Malformed(e.to_string()))?;
            if is_blank(&record) {
                continue;
            }
            records.push(to_raw(&columns, &record));
        }

        Ok(RowStream::new(records))
    }
}

/// Headerless CIBC credit card export
#[derive(Debug, Clone, Default)]
pub struct CibcCreditDecoder;

impl StatementDecoder for CibcCreditDecoder {
    fn format(&self) -> StatementFormat {
        StatementFormat::CibcCredit
    }

    fn decode(&self, bytes: &[u8]) -> Result<RowStream, DecodeError> {
        let text = decode_text(bytes)?;

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(false)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = CIBC_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut records = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| DecodeError::Malformed(e.to_string()))?;
            if is_blank(&record) {
                continue;
            }
            if record.len() != CIBC_COLUMNS.len() {
                return Err(DecodeError::Malformed(format!(
                    "expected {} columns per CIBC row, found {}",
                    CIBC_COLUMNS.len(),
                    record.len()
                )));
            }
            records.push(to_raw(&columns, &record));
        }

        Ok(RowStream::new(records))
    }
}

/// RBC chequing export with its fixed header row
///
/// RBC writes a trailing delimiter on data rows, so extra trailing cells are
/// accepted as long as they are empty.
#[derive(Debug, Clone, Default)]
pub struct RbcCheckingDecoder;

impl StatementDecoder for RbcCheckingDecoder {
    fn format(&self) -> StatementFormat {
        StatementFormat::RbcChecking
    }

    fn decode(&self, bytes: &[u8]) -> Result<RowStream, DecodeError> {
        let text = decode_text(bytes)?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| DecodeError::Malformed(format!("unreadable header row: {}", e)))?
            .clone();
        let columns = header_names(&headers);
        for required in RBC_REQUIRED_COLUMNS {
            if !columns.iter().any(|c| c == required) {
                return Err(DecodeError::Malformed(format!(
                    "RBC export is missing the '{}' column",
                    required
                )));
            }
        }

        let mut records = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(|e| DecodeError::Malformed(e.to_string()))?;
            if is_blank(&record) {
                continue;
            }
            if record.len() < columns.len()
                || record.iter().skip(columns.len()).any(|cell| !cell.is_empty())
            {
                return Err(DecodeError::Malformed(format!(
                    "data row {} has {} cells but the header has {}",
                    index + 1,
                    record.len(),
                    columns.len()
                )));
            }
            records.push(to_raw(&columns, &record));
        }

        Ok(RowStream::new(records))
    }
}

/// Column names for a header row. Blank names become `column_N` and repeated
/// names get a ` (2)`, ` (3)` suffix so no cell is lost.
pub(crate) fn header_names(headers: &StringRecord) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h.to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{} ({})", base, count)
            }
        })
        .collect()
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.is_empty())
}

/// Pair cells with column names. Missing trailing cells become empty strings.
fn to_raw(columns: &[String], record: &StringRecord) -> RawRecord {
    columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), record.get(i).unwrap_or("").to_string()))
        .collect()
}
