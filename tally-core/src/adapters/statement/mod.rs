//! Statement decoders and format inference
//!
//! Each decoder validates the whole file before handing out rows, so a
//! structural problem anywhere in the file rejects the upload as a unit.

mod delimited;
#[cfg(feature = "excel")]
mod excel;

use std::collections::HashMap;

use chrono::NaiveDate;

pub use delimited::{
    CibcCreditDecoder, GenericCsvDecoder, RbcCheckingDecoder, CIBC_COLUMNS, RBC_HEADER_PREFIX,
};
#[cfg(feature = "excel")]
pub use excel::ExcelDecoder;

use crate::config::ImportProfile;
use crate::domain::StatementFormat;
use crate::ports::{DecodeError, RowStream, StatementDecoder};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

/// Decoders keyed by the format they handle
pub struct DecoderRegistry {
    decoders: HashMap<StatementFormat, Box<dyn StatementDecoder>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::for_profile(None)
    }
}

impl DecoderRegistry {
    /// A registry with no decoders
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Built-in decoders, with the generic ones honouring the profile's
    /// preamble and delimiter settings
    pub fn for_profile(profile: Option<&ImportProfile>) -> Self {
        let skip_rows = profile.map(|p| p.skip_rows).unwrap_or(0);
        let delimiter = profile.and_then(|p| p.delimiter);

        let mut registry = Self::empty();
        registry.register(Box::new(GenericCsvDecoder::new(skip_rows, delimiter)));
        registry.register(Box::new(CibcCreditDecoder));
        registry.register(Box::new(RbcCheckingDecoder));
        #[cfg(feature = "excel")]
        registry.register(Box::new(ExcelDecoder::new(skip_rows)));
        registry
    }

    /// Register a decoder, replacing any previous one for the same format
    pub fn register(&mut self, decoder: Box<dyn StatementDecoder>) {
        self.decoders.insert(decoder.format(), decoder);
    }

    pub fn decode(&self, format: StatementFormat, bytes: &[u8]) -> Result<RowStream, DecodeError> {
        let decoder = self
            .decoders
            .get(&format)
            .ok_or_else(|| DecodeError::Unsupported(format.as_str().to_string()))?;
        decoder.decode(bytes)
    }

    /// Guess the statement format from content, then from the file extension
    pub fn infer(file_name: &str, bytes: &[u8]) -> Option<StatementFormat> {
        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            return Some(StatementFormat::Excel);
        }

        let text = decode_text(bytes).ok();
        if let Some(text) = text {
            let first_line = text.lines().next().unwrap_or("").trim();
            if first_line.starts_with(RBC_HEADER_PREFIX) {
                return Some(StatementFormat::RbcChecking);
            }
            if looks_like_cibc(first_line) {
                return Some(StatementFormat::CibcCredit);
            }
        }

        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match extension.as_deref() {
            Some("csv" | "txt") => Some(StatementFormat::GenericCsv),
            Some("xlsx" | "xls" | "xlsm") => Some(StatementFormat::Excel),
            _ if text.is_some() => Some(StatementFormat::GenericCsv),
            _ => None,
        }
    }
}

/// A CIBC export starts straight with a data row: an ISO date followed by
/// four more fields.
fn looks_like_cibc(first_line: &str) -> bool {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(first_line.as_bytes());
    let Some(Ok(record)) = reader.records().next() else {
        return false;
    };
    record.len() == CIBC_COLUMNS.len()
        && record
            .get(0)
            .map(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").is_ok())
            .unwrap_or(false)
}

/// Validate that the upload is text and strip a leading byte order mark
pub(crate) fn decode_text(bytes: &[u8]) -> Result<&str, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Malformed("file is empty".to_string()));
    }
    let text = std::str::from_utf8(bytes).map_err(|e| {
        DecodeError::Malformed(format!(
            "file is not UTF-8 text (invalid byte at offset {})",
            e.valid_up_to()
        ))
    })?;
    if text.contains('\0') {
        return Err(DecodeError::Malformed("file contains binary data".to_string()));
    }
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(DecodeError::Malformed("file has no content".to_string()));
    }
    Ok(text)
}

/// Drop the first `n` lines of `text`
pub(crate) fn skip_lines(text: &str, n: usize) -> &str {
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(i) => rest = &rest[i + 1..],
            None => return "",
        }
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    const RBC: &str = "\"Account Type\",\"Account Number\",\"Transaction Date\",\"Cheque Number\",\"Description 1\",\"Description 2\",\"CAD$\",\"USD$\"\n";

    #[test]
    fn test_infer_by_content() {
        assert_eq!(
            DecoderRegistry::infer("statement.csv", RBC.as_bytes()),
            Some(StatementFormat::RbcChecking)
        );
        assert_eq!(
            DecoderRegistry::infer("cibc.csv", b"2024-03-01,COFFEE,5.25,,4505********1234\n"),
            Some(StatementFormat::CibcCredit)
        );
        assert_eq!(
            DecoderRegistry::infer("export", b"Date,Amount\n2024-01-01,5\n"),
            Some(StatementFormat::GenericCsv)
        );
        assert_eq!(
            DecoderRegistry::infer("book.bin", b"PK\x03\x04rest"),
            Some(StatementFormat::Excel)
        );
    }

    #[test]
    fn test_infer_falls_back_to_extension_for_binary() {
        let garbage = [0xFF, 0x00, 0xFE, 0x12, 0x89];
        assert_eq!(
            DecoderRegistry::infer("upload.csv", &garbage),
            Some(StatementFormat::GenericCsv)
        );
        assert_eq!(DecoderRegistry::infer("upload.pdf", &garbage), None);
    }

    #[test]
    fn test_decode_text_rejects_binary_and_strips_bom() {
        assert!(matches!(decode_text(&[0xFF, 0xFE, 0x00]), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_text(b"a,b\0"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_text(b""), Err(DecodeError::Malformed(_))));
        assert_eq!(decode_text("\u{feff}Date,Amount".as_bytes()).unwrap(), "Date,Amount");
    }

    #[test]
    fn test_unregistered_format_is_unsupported() {
        let registry = DecoderRegistry::empty();
        let err = registry.decode(StatementFormat::CibcCredit, b"x").unwrap_err();
        assert_eq!(err, DecodeError::Unsupported("cibc_credit".to_string()));
    }

    #[test]
    fn test_skip_lines() {
        assert_eq!(skip_lines("a\nb\nc", 2), "c");
        assert_eq!(skip_lines("a\nb", 5), "");
        assert_eq!(skip_lines("a", 0), "a");
    }
}
