//! Chunked CSV ingestion.
//!
//! Raw event logs can be larger than memory, so every pass over the input
//! reads it as a sequence of bounded row chunks. Date columns are parsed while
//! reading; every other cell stays text.

use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::common::{parse_date, ColumnType, Row, Value, CASE_ID_COLUMN};
use crate::orchestrator::PipelineError;

// ============================================================================
// Chunk Reader
// ============================================================================

/// Iterator over `chunk_size`-row chunks of a CSV file with a header row.
pub struct ChunkReader {
    records: csv::StringRecordsIntoIter<File>,
    header: Vec<String>,
    dates: Vec<usize>,
    chunk_size: usize,
    /// Data lines consumed so far, for error positions.
    line: usize,
    done: bool,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: usize, dates: &[usize]) -> Result<Self, PipelineError> {
        if chunk_size == 0 {
            return Err(PipelineError::Configuration(
                "chunk size must be at least 1".into(),
            ));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if let Some(&bad) = dates.iter().find(|&&d| d >= header.len()) {
            return Err(PipelineError::Configuration(format!(
                "date column {bad} out of range for {} columns",
                header.len()
            )));
        }
        debug!(path = %path.display(), columns = header.len(), chunk_size, "opened input");
        Ok(Self {
            records: reader.into_records(),
            header,
            dates: dates.to_vec(),
            chunk_size,
            line: 0,
            done: false,
        })
    }

    /// Column names from the header row.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn parse_record(&self, record: &csv::StringRecord) -> Result<Row, PipelineError> {
        record
            .iter()
            .enumerate()
            .map(|(column, raw)| {
                if raw.is_empty() || !self.dates.contains(&column) {
                    return Ok(Value::text(raw));
                }
                parse_date(raw)
                    .map(Value::Date)
                    .ok_or_else(|| PipelineError::InvalidDate {
                        line: self.line,
                        column,
                        value: raw.to_string(),
                    })
            })
            .collect()
    }

    fn read_chunk(&mut self) -> Result<Vec<Row>, PipelineError> {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        while chunk.len() < self.chunk_size {
            match self.records.next() {
                Some(record) => {
                    let record = record?;
                    self.line += 1;
                    chunk.push(self.parse_record(&record)?);
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        Ok(chunk)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Vec<Row>, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// Column Type Inference
// ============================================================================

fn is_boolean_text(key: &str) -> bool {
    matches!(key, "True" | "False" | "true" | "false" | "TRUE" | "FALSE")
}

/// Type of one column within a single chunk.
fn chunk_column_type(chunk: &[Row], column: usize, dates: &[usize]) -> ColumnType {
    if column == CASE_ID_COLUMN {
        return ColumnType::CaseId;
    }
    if dates.contains(&column) {
        return ColumnType::Date;
    }
    let mut values = chunk.iter().map(|row| &row[column]).filter(|v| !v.is_empty()).peekable();
    if values.peek().is_none() {
        // An all-missing column reads as numeric zeros.
        return ColumnType::Quantitative;
    }
    let keys: Vec<String> = values.map(Value::key).collect();
    if keys.iter().all(|k| is_boolean_text(k)) {
        ColumnType::Boolean
    } else if keys.iter().all(|k| k.trim().parse::<f64>().is_ok()) {
        ColumnType::Quantitative
    } else {
        ColumnType::Qualitative
    }
}

/// Infer a [`ColumnType`] per column by folding chunk-level types with the lattice join.
pub fn infer_column_types(
    path: &Path,
    chunk_size: usize,
    dates: &[usize],
) -> Result<Vec<ColumnType>, PipelineError> {
    let reader = ChunkReader::open(path, chunk_size, dates)?;
    let width = reader.header().len();
    let mut types: Option<Vec<ColumnType>> = None;
    for chunk in reader {
        let chunk = chunk?;
        let observed = (0..width).map(|c| chunk_column_type(&chunk, c, dates));
        types = Some(match types {
            None => observed.collect(),
            Some(previous) => previous.into_iter().zip(observed).map(|(a, b)| a | b).collect(),
        });
    }
    Ok(types.unwrap_or_else(|| {
        (0..width)
            .map(|c| chunk_column_type(&[], c, dates))
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_chunks_and_dates() {
        let file = csv_file(
            "case,activity,time\n\
             A,start,2024-01-01 00:00:00\n\
             A,end,2024-01-01 01:00:00\n\
             B,start,\n",
        );
        let reader = ChunkReader::open(file.path(), 2, &[2]).unwrap();
        assert_eq!(reader.header(), &["case", "activity", "time"]);

        let chunks: Vec<Vec<Row>> = reader.map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 1);
        assert!(matches!(chunks[0][0][2], Value::Date(_)));
        assert_eq!(chunks[1][0][2], Value::Empty);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let file = csv_file("case,activity\nA,x\nA,y\n");
        let chunks: Vec<_> = ChunkReader::open(file.path(), 2, &[]).unwrap().collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_bad_date_reports_position() {
        let file = csv_file("case,activity,time\nA,start,soon\n");
        let mut reader = ChunkReader::open(file.path(), 8, &[2]).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDate { line: 1, column: 2, .. }));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_infer_column_types_joins_chunks() {
        let file = csv_file(
            "case,activity,time,cost,urgent,note\n\
             A,start,2024-01-01 00:00:00,3,True,7\n\
             A,end,2024-01-01 01:00:00,,False,x\n",
        );
        let types = infer_column_types(file.path(), 1, &[2]).unwrap();
        assert_eq!(
            types,
            vec![
                ColumnType::CaseId,
                ColumnType::Qualitative,
                ColumnType::Date,
                ColumnType::Quantitative,
                ColumnType::Boolean,
                ColumnType::Qualitative,
            ]
        );
    }
}
