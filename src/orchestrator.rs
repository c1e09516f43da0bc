//! Two-pass streaming orchestration over one event-log file.
//!
//! [`Orchestrator::build`] runs the statistics pass: it reads the input in
//! chunks, binds and feeds every codec, counts cases across chunk boundaries
//! and finalizes the codecs. Only a finalized orchestrator can be obtained, so
//! later passes ([`Orchestrator::cases`], [`Orchestrator::encode_to_disk`], ...)
//! re-read the file, stitch cases across chunk boundaries, edit and encode
//! them one at a time.
//!
//! ## Output directory
//!
//! ```text
//! <output>/
//!   descriptor.json   pipeline metadata + codec descriptions
//!   cases.bin         one record per encoded case (tag = case index)
//!   leftovers.csv     one row per case (only if some codec declares a leftover)
//!   encoded.csv       optional debug dump of encoded cases
//!   edited.csv        edited raw cases (export_edited)
//!   decoded.csv       decoded cases (decode_to_disk)
//!   decoded.jsonl     decoded cases, one JSON array of rows per line
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::codec::{CodecDescription, CodecError, CodecManager};
use crate::common::{
    Case, Matrix, Row, Value, CASE_ID_COLUMN, END_TIMESTAMP_COLUMN, TIMESTAMP_COLUMN,
};
use crate::editor::EditorChain;
use crate::reader::ChunkReader;
use crate::store::{
    record_tag, LeftoverReader, LeftoverWriter, MatrixReader, MatrixWriter, StoreError,
};

pub const DESCRIPTOR_FILE: &str = "descriptor.json";
pub const CASES_FILE: &str = "cases.bin";
pub const LEFTOVERS_FILE: &str = "leftovers.csv";
pub const ENCODED_FILE: &str = "encoded.csv";
pub const EDITED_FILE: &str = "edited.csv";
pub const DECODED_CSV_FILE: &str = "decoded.csv";
pub const DECODED_JSONL_FILE: &str = "decoded.jsonl";

/// Separator row between cases in the CSV debug dumps.
const CASE_SEPARATOR: &str = "------";

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "case '{case}' reappears at line {line} after its rows were closed; \
         input must be grouped by case"
    )]
    CaseBoundary { case: String, line: usize },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}, column {column}: '{value}' is not a date")]
    InvalidDate {
        line: usize,
        column: usize,
        value: String,
    },
}

// ============================================================================
// Configuration & Metadata
// ============================================================================

/// Inputs of the statistics pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub input_path: PathBuf,
    /// Directory receiving the descriptor and containers.
    pub output_dir: PathBuf,
    /// Rows per chunk.
    pub chunk_size: usize,
    /// Column positions parsed as dates.
    pub date_columns: Vec<usize>,
    /// Whether column 3 holds an end timestamp.
    pub double_timestamps: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("input.csv"),
            output_dir: PathBuf::from("output"),
            chunk_size: 10_000,
            date_columns: vec![TIMESTAMP_COLUMN],
            double_timestamps: false,
        }
    }
}

/// Everything derived by the statistics pass. Persisted as `descriptor.json`;
/// field order is the descriptor's record order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub input_path: PathBuf,
    pub output_name: String,
    pub column_names: Vec<String>,
    pub date_columns: Vec<usize>,
    pub case_count: usize,
    pub chunk_count: usize,
    pub double_timestamps: bool,
    /// Width of the activity one-hot block, i.e. of every suffix.
    pub activity_count: usize,
    /// Longest case after editing.
    pub max_case_length: usize,
    pub feature_count: usize,
    pub has_leftovers: bool,
    pub editors: Vec<String>,
    pub encoder_count: usize,
    pub encoders: Vec<CodecDescription>,
}

impl fmt::Display for PipelineMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------- Pipeline --------")?;
        writeln!(f, "Input file:              {}", self.input_path.display())?;
        writeln!(f, "Output:                  {}", self.output_name)?;
        writeln!(f, "Columns:                 {}", self.column_names.join(", "))?;
        writeln!(f, "Date columns:            {:?}", self.date_columns)?;
        writeln!(f, "Cases:                   {}", self.case_count)?;
        writeln!(f, "Chunks:                  {}", self.chunk_count)?;
        writeln!(f, "Double timestamps:       {}", self.double_timestamps)?;
        writeln!(f, "Activities:              {}", self.activity_count)?;
        writeln!(f, "Max case length:         {}", self.max_case_length)?;
        writeln!(f, "Features:                {}", self.feature_count)?;
        writeln!(f, "Leftovers:               {}", self.has_leftovers)?;
        writeln!(f, "Editors:                 {}", self.editors.join(", "))?;
        writeln!(f, "Encoders:                {}", self.encoder_count)?;
        for desc in &self.encoders {
            writeln!(
                f,
                "  {:<10} {:?} -> {} column(s)",
                desc.kind.name(),
                desc.input_names,
                desc.output_names.len()
            )?;
        }
        write!(f, "--------------------------")
    }
}

// ============================================================================
// Case Boundaries
// ============================================================================

/// Statistics-pass bookkeeping: counts cases and tracks the longest one while
/// carrying the case that straddles each chunk boundary. Closed ids are kept
/// for the same reappearance check as [`CaseAssembler`], in O(cases) memory.
#[derive(Debug, Default)]
pub struct CaseCounter {
    current: Option<(String, usize)>,
    closed: HashSet<String>,
    cases: usize,
    max_len: usize,
    line: usize,
}

impl CaseCounter {
    pub fn observe(&mut self, chunk: &[Row]) -> Result<(), PipelineError> {
        for row in chunk {
            self.line += 1;
            let id = row[CASE_ID_COLUMN].key();
            if let Some((current, len)) = self.current.as_mut() {
                if *current == id {
                    *len += 1;
                    continue;
                }
            }
            if self.closed.contains(&id) {
                return Err(PipelineError::CaseBoundary {
                    case: id,
                    line: self.line,
                });
            }
            self.close();
            self.current = Some((id, 1));
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some((id, len)) = self.current.take() {
            self.cases += 1;
            self.max_len = self.max_len.max(len);
            self.closed.insert(id);
        }
    }

    /// `(case count, max case length)` once every chunk has been observed.
    pub fn finish(mut self) -> (usize, usize) {
        self.close();
        (self.cases, self.max_len)
    }
}

/// Groups rows into cases by adjacency. The trailing case of each chunk is
/// held back and joined with the next chunk's leading rows iff the ids match.
///
/// Every closed case id is remembered so a reappearing id can be rejected,
/// which costs O(number of cases) memory on top of the bounded chunk.
#[derive(Debug, Default)]
pub struct CaseAssembler {
    pending: Option<Case>,
    closed: HashSet<String>,
    line: usize,
}

impl CaseAssembler {
    /// Cases completed by `chunk`, in file order.
    pub fn push_chunk(&mut self, chunk: Vec<Row>) -> Result<Vec<Case>, PipelineError> {
        let mut complete = Vec::new();
        for row in chunk {
            self.line += 1;
            let id = row[CASE_ID_COLUMN].key();
            if let Some(case) = self.pending.as_mut().filter(|c| c.id == id) {
                case.rows.push(row);
                continue;
            }
            if self.closed.contains(&id) {
                return Err(PipelineError::CaseBoundary {
                    case: id,
                    line: self.line,
                });
            }
            if let Some(done) = self.pending.replace(Case::new(id, row)) {
                self.closed.insert(done.id.clone());
                complete.push(done);
            }
        }
        Ok(complete)
    }

    /// The carried case, complete once the file is exhausted.
    pub fn finish(&mut self) -> Option<Case> {
        let done = self.pending.take()?;
        self.closed.insert(done.id.clone());
        Some(done)
    }
}

/// Pull-based stream of complete, edited cases.
pub struct CaseStream<'a> {
    editors: &'a EditorChain,
    double_timestamps: bool,
    chunks: ChunkReader,
    assembler: CaseAssembler,
    ready: VecDeque<Case>,
    exhausted: bool,
}

impl Iterator for CaseStream<'_> {
    type Item = Result<Case, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(case) = self.ready.pop_front() {
                return Some(Ok(self.editors.edit_case(case, self.double_timestamps)));
            }
            if self.exhausted {
                return None;
            }
            match self.chunks.next() {
                Some(Ok(chunk)) => match self.assembler.push_chunk(chunk) {
                    Ok(cases) => self.ready.extend(cases),
                    Err(e) => {
                        self.exhausted = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
                None => {
                    self.exhausted = true;
                    self.ready.extend(self.assembler.finish());
                }
            }
        }
    }
}

/// One encoded case and its leftover row.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCase {
    pub id: String,
    pub matrix: Matrix,
    pub leftover: Vec<Value>,
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    metadata: PipelineMetadata,
    codecs: CodecManager,
    editors: EditorChain,
}

impl Orchestrator {
    /// Run the statistics pass and return a finalized orchestrator.
    pub fn build(
        config: OrchestratorConfig,
        mut codecs: CodecManager,
        editors: EditorChain,
    ) -> Result<Self, PipelineError> {
        // Editor tokens must reach the activity vocabulary before it is finalized.
        codecs.activity_codec()?;
        codecs.widen_activity(&editors.tokens());

        let reader =
            ChunkReader::open(&config.input_path, config.chunk_size, &config.date_columns)?;
        let column_names = reader.header().to_vec();
        let required = if config.double_timestamps {
            END_TIMESTAMP_COLUMN + 1
        } else {
            TIMESTAMP_COLUMN + 1
        };
        if column_names.len() < required {
            return Err(PipelineError::Configuration(format!(
                "expected at least {required} columns (case, activity, timestamp{}), found {}",
                if config.double_timestamps { ", end timestamp" } else { "" },
                column_names.len()
            )));
        }
        codecs.bind(&column_names)?;

        info!(
            "Statistics pass over {} (chunk size {})",
            config.input_path.display(),
            config.chunk_size
        );
        let mut counter = CaseCounter::default();
        let mut chunk_count = 0;
        for chunk in reader {
            let chunk = chunk?;
            counter.observe(&chunk)?;
            codecs.accumulate(&chunk)?;
            chunk_count += 1;
            debug!(chunk = chunk_count, rows = chunk.len(), "accumulated");
        }
        let (case_count, max_case_length) = counter.finish();
        codecs.finalize()?;

        let activity_count = codecs.activity_codec()?.width();
        let mut metadata = PipelineMetadata {
            input_path: config.input_path.clone(),
            output_name: config.output_dir.display().to_string(),
            column_names,
            date_columns: config.date_columns.clone(),
            case_count,
            chunk_count,
            double_timestamps: config.double_timestamps,
            activity_count,
            max_case_length,
            feature_count: codecs.feature_count(),
            has_leftovers: codecs.has_leftovers(),
            editors: editors.names(),
            encoder_count: codecs.len(),
            encoders: codecs.descriptions(),
        };
        editors.alter_metadata(&mut metadata);
        info!(
            cases = metadata.case_count,
            chunks = metadata.chunk_count,
            activities = metadata.activity_count,
            max_case_length = metadata.max_case_length,
            features = metadata.feature_count,
            "Statistics pass complete"
        );

        Ok(Self {
            config,
            metadata,
            codecs,
            editors,
        })
    }

    /// Rehydrate from `<dir>/descriptor.json` without rescanning the raw data.
    pub fn load(dir: &Path) -> Result<Self, PipelineError> {
        let file = File::open(dir.join(DESCRIPTOR_FILE))?;
        let metadata: PipelineMetadata = serde_json::from_reader(BufReader::new(file))?;
        let codecs = CodecManager::from_descriptions(&metadata.encoders)?;
        let editors = EditorChain::from_names(metadata.editors.as_slice())
            .map_err(|name| PipelineError::Configuration(format!("unknown editor '{name}'")))?;
        let config = OrchestratorConfig {
            input_path: metadata.input_path.clone(),
            output_dir: dir.to_path_buf(),
            date_columns: metadata.date_columns.clone(),
            double_timestamps: metadata.double_timestamps,
            ..OrchestratorConfig::default()
        };
        info!(dir = %dir.display(), cases = metadata.case_count, "Loaded descriptor");
        Ok(Self {
            config,
            metadata,
            codecs,
            editors,
        })
    }

    /// Rows per chunk for later passes over the raw input.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn codecs(&self) -> &CodecManager {
        &self.codecs
    }

    pub fn editors(&self) -> &EditorChain {
        &self.editors
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    /// Re-read the input and yield complete, edited raw cases.
    pub fn edited_cases(&self) -> Result<CaseStream<'_>, PipelineError> {
        let chunks = ChunkReader::open(
            &self.metadata.input_path,
            self.config.chunk_size,
            &self.metadata.date_columns,
        )?;
        Ok(CaseStream {
            editors: &self.editors,
            double_timestamps: self.metadata.double_timestamps,
            chunks,
            assembler: CaseAssembler::default(),
            ready: VecDeque::new(),
            exhausted: false,
        })
    }

    pub fn encode(&self, case: &Case) -> Result<EncodedCase, PipelineError> {
        Ok(EncodedCase {
            id: case.id.clone(),
            matrix: self.codecs.encode_case(&case.rows)?,
            leftover: self.codecs.leftover(&case.rows),
        })
    }

    /// One encoded case per pull.
    pub fn cases(
        &self,
    ) -> Result<impl Iterator<Item = Result<EncodedCase, PipelineError>> + '_, PipelineError> {
        Ok(self
            .edited_cases()?
            .map(move |case| case.and_then(|case| self.encode(&case))))
    }

    /// Encode the whole file in memory.
    pub fn materialize(&self) -> Result<Vec<EncodedCase>, PipelineError> {
        self.cases()?.collect()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn save_descriptor(&self) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join(DESCRIPTOR_FILE);
        let mut w = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut w, &self.metadata)?;
        w.flush()?;
        Ok(path)
    }

    /// Write the descriptor, `cases.bin` and `leftovers.csv`; with `debug`,
    /// also `encoded.csv`. Returns the number of cases written.
    pub fn encode_to_disk(&self, debug: bool) -> Result<usize, PipelineError> {
        let dir = &self.config.output_dir;
        self.save_descriptor()?;

        let mut cases = MatrixWriter::create(&dir.join(CASES_FILE))?;
        let mut leftovers = if self.metadata.has_leftovers {
            Some(LeftoverWriter::create(
                &dir.join(LEFTOVERS_FILE),
                &self.codecs.leftover_names(),
            )?)
        } else {
            None
        };
        let mut encoded = if debug {
            let mut w = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(dir.join(ENCODED_FILE))?;
            w.write_record(self.codecs.output_columns())?;
            Some(w)
        } else {
            None
        };

        let mut written = 0usize;
        for case in self.cases()? {
            let case = case?;
            cases.write(record_tag(written)?, &case.matrix)?;
            if let Some(w) = leftovers.as_mut() {
                w.write(&case.leftover)?;
            }
            if let Some(w) = encoded.as_mut() {
                for r in 0..case.matrix.rows() {
                    w.write_record(case.matrix.row(r).iter().map(|v| v.to_string()))?;
                }
                w.write_record([CASE_SEPARATOR])?;
            }
            written += 1;
        }

        cases.finish()?;
        if let Some(w) = leftovers {
            w.finish()?;
        }
        if let Some(mut w) = encoded {
            w.flush()?;
        }
        info!(cases = written, dir = %dir.display(), "Encoded cases written");
        Ok(written)
    }

    /// Write the edited raw cases under the original header to `edited.csv`.
    pub fn export_edited(&self) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join(EDITED_FILE);
        let mut w = csv::Writer::from_path(&path)?;
        w.write_record(&self.metadata.column_names)?;
        let mut count = 0usize;
        for case in self.edited_cases()? {
            for row in &case?.rows {
                w.write_record(row.iter().map(Value::key))?;
            }
            count += 1;
        }
        w.flush()?;
        info!(cases = count, path = %path.display(), "Edited cases exported");
        Ok(path)
    }

    /// Decode `cases.bin` (+ `leftovers.csv`) from the output directory into
    /// `decoded.csv` and `decoded.jsonl`. Returns the number of cases decoded.
    pub fn decode_to_disk(&self) -> Result<usize, PipelineError> {
        let dir = &self.config.output_dir;
        let mut cases = MatrixReader::open(&dir.join(CASES_FILE))?;
        let mut leftovers = if self.metadata.has_leftovers {
            let reader = LeftoverReader::open(&dir.join(LEFTOVERS_FILE))?;
            if reader.names() != self.codecs.leftover_names().as_slice() {
                return Err(PipelineError::Configuration(format!(
                    "leftover header {:?} does not match codecs {:?}",
                    reader.names(),
                    self.codecs.leftover_names()
                )));
            }
            Some(reader)
        } else {
            None
        };

        let mut csv_out = csv::Writer::from_path(dir.join(DECODED_CSV_FILE))?;
        csv_out.write_record(self.codecs.decoded_columns())?;
        let mut jsonl = BufWriter::new(File::create(dir.join(DECODED_JSONL_FILE))?);

        let mut count = 0usize;
        while let Some(record) = cases.next_record()? {
            let leftover = match leftovers.as_mut() {
                Some(reader) => reader.next().transpose()?.ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "{LEFTOVERS_FILE} has fewer rows than {CASES_FILE} ({count})"
                    ))
                })?,
                None => Vec::new(),
            };
            let rows = self.codecs.decode_case(&record.matrix, &leftover)?;
            for row in &rows {
                csv_out.write_record(row.iter().map(Value::key))?;
            }
            serde_json::to_writer(&mut jsonl, &rows)?;
            jsonl.write_all(b"\n")?;
            count += 1;
        }
        csv_out.flush()?;
        jsonl.flush()?;
        info!(cases = count, dir = %dir.display(), "Decoded cases written");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, DeleteCodec, OneHotCodec, TimeDeltaCodec};
    use crate::editor::{EosForAll, SosForAll};
    use std::io::Write as _;
    use tempfile::{tempdir, NamedTempFile};

    fn row(id: &str, activity: &str) -> Row {
        vec![Value::text(id), Value::text(activity)]
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            row("A", "a1"),
            row("A", "a2"),
            row("A", "a3"),
            row("B", "b1"),
            row("C", "c1"),
            row("C", "c2"),
            row("D", "d1"),
        ]
    }

    fn assemble(chunks: Vec<Vec<Row>>) -> Vec<Case> {
        let mut assembler = CaseAssembler::default();
        let mut cases = Vec::new();
        for chunk in chunks {
            cases.extend(assembler.push_chunk(chunk).unwrap());
        }
        cases.extend(assembler.finish());
        cases
    }

    #[test]
    fn test_grouping_is_independent_of_split_point() {
        let rows = sample_rows();
        let whole = assemble(vec![rows.clone()]);
        assert_eq!(whole.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![3, 1, 2, 1]);

        for split in 0..=rows.len() {
            let (left, right) = rows.split_at(split);
            let cases = assemble(vec![left.to_vec(), right.to_vec()]);
            assert_eq!(cases, whole, "split at {split}");
        }
        for size in 1..=rows.len() {
            let chunks: Vec<Vec<Row>> = rows.chunks(size).map(|c| c.to_vec()).collect();
            assert_eq!(assemble(chunks), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_counter_agrees_with_assembler_at_every_split() {
        let rows = sample_rows();
        for size in 1..=rows.len() {
            let mut counter = CaseCounter::default();
            for chunk in rows.chunks(size) {
                counter.observe(chunk).unwrap();
            }
            assert_eq!(counter.finish(), (4, 3), "chunk size {size}");
        }
    }

    #[test]
    fn test_non_adjacent_case_is_rejected() {
        let mut assembler = CaseAssembler::default();
        assembler
            .push_chunk(vec![row("A", "x"), row("B", "y")])
            .unwrap();
        let err = assembler.push_chunk(vec![row("A", "z")]).unwrap_err();
        assert!(matches!(err, PipelineError::CaseBoundary { ref case, line: 3 } if case == "A"));

        let mut counter = CaseCounter::default();
        let err = counter
            .observe(&[row("A", "x"), row("B", "y"), row("A", "z")])
            .unwrap_err();
        assert!(matches!(err, PipelineError::CaseBoundary { .. }));
    }

    fn log_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "case,activity,time\n\
             A,start,2024-01-01 00:00:00\n\
             A,mid,2024-01-01 01:00:00\n\
             A,end,2024-01-01 02:00:00\n\
             B,start,2024-01-02 00:00:00\n\
             B,end,2024-01-02 01:00:00\n"
        )
        .unwrap();
        file.flush().unwrap();
        file
    }

    fn codecs() -> CodecManager {
        let list: Vec<Box<dyn Codec>> = vec![
            Box::new(DeleteCodec::new(0)),
            Box::new(OneHotCodec::new(1, true)),
            Box::new(TimeDeltaCodec::new(2)),
        ];
        CodecManager::new(list).unwrap()
    }

    fn build(input: &Path, output: &Path, chunk_size: usize) -> Orchestrator {
        let config = OrchestratorConfig {
            input_path: input.to_path_buf(),
            output_dir: output.to_path_buf(),
            chunk_size,
            ..OrchestratorConfig::default()
        };
        let editors = EditorChain::new(vec![Box::new(SosForAll), Box::new(EosForAll)]);
        Orchestrator::build(config, codecs(), editors).unwrap()
    }

    #[test]
    fn test_statistics_pass_metadata() {
        let file = log_file();
        let dir = tempdir().unwrap();
        let orchestrator = build(file.path(), dir.path(), 2);
        let meta = orchestrator.metadata();
        assert_eq!(meta.case_count, 2);
        assert_eq!(meta.chunk_count, 3);
        assert_eq!(meta.max_case_length, 5);
        assert_eq!(meta.activity_count, 5);
        assert_eq!(meta.feature_count, 6);
        assert!(meta.has_leftovers);
        assert_eq!(meta.editors, vec!["SosForAll", "EosForAll"]);
        assert_eq!(meta.encoder_count, 3);
    }

    #[test]
    fn test_cases_are_edited_and_encoded() {
        let file = log_file();
        let dir = tempdir().unwrap();
        let orchestrator = build(file.path(), dir.path(), 2);
        let cases = orchestrator.materialize().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!((cases[0].matrix.rows(), cases[0].matrix.cols()), (5, 6));
        assert_eq!(cases[1].matrix.rows(), 4);
        assert_eq!(cases[0].leftover[0], Value::text("A"));
    }

    #[test]
    fn test_missing_activity_codec_fails_build() {
        let file = log_file();
        let dir = tempdir().unwrap();
        let config = OrchestratorConfig {
            input_path: file.path().to_path_buf(),
            output_dir: dir.path().to_path_buf(),
            ..OrchestratorConfig::default()
        };
        let list: Vec<Box<dyn Codec>> = vec![Box::new(DeleteCodec::new(0))];
        let err = Orchestrator::build(
            config,
            CodecManager::new(list).unwrap(),
            EditorChain::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Codec(CodecError::Configuration(_))));
    }

    #[test]
    fn test_descriptor_round_trip() {
        let file = log_file();
        let dir = tempdir().unwrap();
        let orchestrator = build(file.path(), dir.path(), 4);
        orchestrator.save_descriptor().unwrap();

        let loaded = Orchestrator::load(dir.path()).unwrap();
        assert_eq!(loaded.metadata(), orchestrator.metadata());
        assert_eq!(loaded.editors().names(), orchestrator.editors().names());
        assert!(loaded
            .metadata()
            .to_string()
            .contains("Max case length:         5"));
    }
}
