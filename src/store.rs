//! On-disk containers for encoded cases, prefix/suffix pairs and leftovers.
//!
//! ## Record container layout
//!
//! ```text
//! Record (repeated until end of file):
//!   [0] tag   (u32)  caller-defined, e.g. case index
//!   [1] rows  (u32)
//!   [2] cols  (u32)
//!   data      [rows * cols] f64, row-major
//! ```
//!
//! All values are native-endian. Records are variable-shape and appended one
//! at a time; end of file marks exhaustion and a record cut short is an error.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;

use crate::common::{Matrix, Value};

const RECORD_HEADER_BYTES: usize = 3 * std::mem::size_of::<u32>();
const F64_BYTES: usize = std::mem::size_of::<f64>();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{path}: truncated record at byte {offset} (need {needed} bytes, {available} left)")]
    Truncated {
        path: PathBuf,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("matrix of {rows}x{cols} does not fit a record header")]
    TooLarge { rows: usize, cols: usize },

    #[error("record tag {0} does not fit in u32")]
    TagOverflow(usize),
}

/// Tag for the `index`-th record of a container.
pub fn record_tag(index: usize) -> Result<u32, StoreError> {
    u32::try_from(index).map_err(|_| StoreError::TagOverflow(index))
}

// ============================================================================
// Writer
// ============================================================================

/// Appends records to a container through a buffered file handle.
pub struct MatrixWriter {
    w: BufWriter<File>,
    records: usize,
}

impl MatrixWriter {
    /// Create (or truncate) a container.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            w: BufWriter::new(File::create(path)?),
            records: 0,
        })
    }

    /// Open a container for appending, creating it if missing.
    pub fn append(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(file),
            records: 0,
        })
    }

    pub fn write(&mut self, tag: u32, matrix: &Matrix) -> Result<(), StoreError> {
        self.write_raw(tag, matrix.rows(), matrix.cols(), matrix.as_slice())
    }

    pub fn write_raw(
        &mut self,
        tag: u32,
        rows: usize,
        cols: usize,
        data: &[f64],
    ) -> Result<(), StoreError> {
        debug_assert_eq!(data.len(), rows * cols);
        let too_large = || StoreError::TooLarge { rows, cols };
        let r = u32::try_from(rows).map_err(|_| too_large())?;
        let c = u32::try_from(cols).map_err(|_| too_large())?;

        self.w.write_all(&tag.to_ne_bytes())?;
        self.w.write_all(&r.to_ne_bytes())?;
        self.w.write_all(&c.to_ne_bytes())?;
        for v in data {
            self.w.write_all(&v.to_ne_bytes())?;
        }
        self.records += 1;
        Ok(())
    }

    /// Records written through this handle.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Flush and close. Dropping without `finish` also closes but loses flush errors.
    pub fn finish(mut self) -> Result<usize, StoreError> {
        self.w.flush()?;
        Ok(self.records)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub tag: u32,
    pub matrix: Matrix,
}

/// Sequential reader over a memory-mapped container.
///
/// Rewinding resets the cursor; the file must not change while a reader is open.
pub struct MatrixReader {
    path: PathBuf,
    /// `None` for an empty file, which cannot be mapped.
    mmap: Option<Arc<Mmap>>,
    cursor: usize,
}

impl MatrixReader {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: the container is read-only for the lifetime of the reader.
            Some(Arc::new(unsafe { Mmap::map(&file)? }))
        };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            cursor: 0,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().map(|m| &m[..]).unwrap_or(&[])
    }

    fn u32_at(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes()[offset..offset + 4]);
        u32::from_ne_bytes(buf)
    }

    fn truncated(&self, needed: usize) -> StoreError {
        StoreError::Truncated {
            path: self.path.clone(),
            offset: self.cursor,
            needed,
            available: self.bytes().len() - self.cursor,
        }
    }

    /// `(tag, rows, cols, payload bytes)` of the record at the cursor, checked
    /// against the bytes left. A header whose shape overflows is truncated.
    fn header(&self) -> Result<(u32, usize, usize, usize), StoreError> {
        let tag = self.u32_at(self.cursor);
        let rows = self.u32_at(self.cursor + 4) as usize;
        let cols = self.u32_at(self.cursor + 8) as usize;
        let payload = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(F64_BYTES))
            .ok_or_else(|| self.truncated(usize::MAX))?;
        if self.bytes().len() - self.cursor - RECORD_HEADER_BYTES < payload {
            return Err(self.truncated(RECORD_HEADER_BYTES.saturating_add(payload)));
        }
        Ok((tag, rows, cols, payload))
    }

    /// Next record, or `Ok(None)` once the container is exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>, StoreError> {
        let len = self.bytes().len();
        if self.cursor == len {
            return Ok(None);
        }
        if len - self.cursor < RECORD_HEADER_BYTES {
            return Err(self.truncated(RECORD_HEADER_BYTES));
        }
        let (tag, rows, cols, payload) = self.header()?;
        let start = self.cursor + RECORD_HEADER_BYTES;
        let data: Vec<f64> = self.bytes()[start..start + payload]
            .chunks_exact(F64_BYTES)
            .map(|chunk| {
                let mut buf = [0u8; F64_BYTES];
                buf.copy_from_slice(chunk);
                f64::from_ne_bytes(buf)
            })
            .collect();
        self.cursor = start + payload;
        Ok(Some(Record {
            tag,
            matrix: Matrix::from_flat(rows, cols, data),
        }))
    }

    /// Skip a record without materializing it. Returns its tag and row count.
    pub fn skip_record(&mut self) -> Result<Option<(u32, usize)>, StoreError> {
        let len = self.bytes().len();
        if self.cursor == len {
            return Ok(None);
        }
        if len - self.cursor < RECORD_HEADER_BYTES {
            return Err(self.truncated(RECORD_HEADER_BYTES));
        }
        let (tag, rows, _, payload) = self.header()?;
        self.cursor += RECORD_HEADER_BYTES + payload;
        Ok(Some((tag, rows)))
    }

    /// Rewind to the first record.
    pub fn seek_start(&mut self) {
        self.cursor = 0;
    }
}

// ============================================================================
// Leftover table
// ============================================================================

/// CSV table of per-case leftovers; header = leftover names.
pub struct LeftoverWriter {
    w: csv::Writer<File>,
}

impl LeftoverWriter {
    pub fn create(path: &Path, names: &[String]) -> Result<Self, StoreError> {
        let mut w = csv::Writer::from_path(path)?;
        w.write_record(names)?;
        Ok(Self { w })
    }

    pub fn write(&mut self, leftovers: &[Value]) -> Result<(), StoreError> {
        self.w.write_record(leftovers.iter().map(Value::key))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), StoreError> {
        self.w.flush()?;
        Ok(())
    }
}

/// Streaming reader over a leftover table.
pub struct LeftoverReader {
    names: Vec<String>,
    records: csv::StringRecordsIntoIter<File>,
}

impl LeftoverReader {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut reader = csv::Reader::from_path(path)?;
        let names = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            names,
            records: reader.into_records(),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Iterator for LeftoverReader {
    type Item = Result<Vec<Value>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(|record| {
            record
                .map(|r| r.iter().map(Value::text).collect())
                .map_err(StoreError::from)
        })
    }
}
