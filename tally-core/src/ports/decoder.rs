//! Statement decoder port

use thiserror::Error;

use crate::domain::result::Error;
use crate::domain::{RawRecord, StatementFormat};

/// Structural failure while turning bytes into rows
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("no decoder registered for format {0}")]
    Unsupported(String),

    #[error("{0}")]
    Malformed(String),
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Unsupported(format) => Error::UnsupportedFormat {
                batch_id: None,
                format,
            },
            DecodeError::Malformed(reason) => Error::MalformedFile {
                batch_id: None,
                reason,
            },
        }
    }
}

/// Ordered, single-pass sequence of decoded rows numbered from 1
///
/// Decoders validate the whole file before building the stream, so iterating
/// never fails.
#[derive(Debug)]
pub struct RowStream {
    records: std::vec::IntoIter<RawRecord>,
    next_number: u32,
}

impl RowStream {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: records.into_iter(),
            next_number: 1,
        }
    }
}

impl Iterator for RowStream {
    type Item = (u32, RawRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let number = self.next_number;
        self.next_number += 1;
        Some((number, record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for RowStream {}

/// Turns raw statement bytes into rows for one statement format
pub trait StatementDecoder: Send + Sync {
    fn format(&self) -> StatementFormat;

    fn decode(&self, bytes: &[u8]) -> Result<RowStream, DecodeError>;
}
