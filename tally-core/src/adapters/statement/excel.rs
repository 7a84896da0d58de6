//! Excel workbook decoder (xlsx, xls)

use std::io::Cursor;

use calamine::{Data, Reader};
use chrono::{NaiveDate, NaiveTime};

use super::delimited::header_names;
use crate::domain::{RawRecord, StatementFormat};
use crate::ports::{DecodeError, RowStream, StatementDecoder};

/// Reads the first worksheet. The first non-empty row after `skip_rows` is
/// the header; cells are rendered to text the way a CSV export would show
/// them, with date cells written as `YYYY-MM-DD`.
#[derive(Debug, Clone, Default)]
pub struct ExcelDecoder {
    skip_rows: usize,
}

impl ExcelDecoder {
    pub fn new(skip_rows: usize) -> Self {
        Self { skip_rows }
    }
}

impl StatementDecoder for ExcelDecoder {
    fn format(&self) -> StatementFormat {
        StatementFormat::Excel
    }

    fn decode(&self, bytes: &[u8]) -> Result<RowStream, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Malformed("file is empty".to_string()));
        }

        let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| DecodeError::Malformed(format!("unreadable workbook: {}", e)))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| DecodeError::Malformed("workbook has no worksheets".to_string()))?
            .map_err(|e| DecodeError::Malformed(format!("unreadable worksheet: {}", e)))?;

        let mut rows = range
            .rows()
            .skip(self.skip_rows)
            .map(|row| row.iter().map(cell_text).collect::<Vec<String>>())
            .filter(|cells| cells.iter().any(|c| !c.is_empty()));

        let header = rows
            .next()
            .ok_or_else(|| DecodeError::Malformed("worksheet has no header row".to_string()))?;
        let columns = column_names(&header);

        let records = rows
            .map(|cells| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.clone(), cells.get(i).cloned().unwrap_or_default()))
                    .collect::<RawRecord>()
            })
            .collect();

        Ok(RowStream::new(records))
    }
}

fn column_names(header: &[String]) -> Vec<String> {
    header_names(&csv::StringRecord::from(header.to_vec()))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => float_text(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64()).unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{:?}", e),
        Data::Empty => String::new(),
    }
}

fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Render an Excel serial date (days since 1899-12-30) as text
fn excel_serial_to_text(serial: f64) -> Option<String> {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let seconds = (serial * 86_400.0).round() as i64;
    let datetime = base.checked_add_signed(chrono::Duration::try_seconds(seconds)?)?;
    if datetime.time() == NaiveTime::MIN {
        Some(datetime.format("%Y-%m-%d").to_string())
    } else {
        Some(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}
