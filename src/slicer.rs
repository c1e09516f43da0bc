//! Prefix/suffix slicing of encoded cases into fixed-shape training batches.
//!
//! A case of length `L` yields `L - 1` pairs: for `i` in `1..L` the prefix is
//! rows `[0, i)` of the encoded case and the suffix is the activity block of
//! row `i`. Prefixes are zero-padded to `max_case_length - 1` rows; the
//! padding side is part of the contract with the consumer, which rebuilds an
//! ignore-mask from it.
//!
//! Two modes:
//! - **online**: [`OnlineCursor`] re-derives pairs from the orchestrator's case
//!   stream on every lap;
//! - **offline**: [`Slicer::persist_pairs`] writes every pair once to
//!   `prefixes.bin` / `suffixes.bin`, and [`OfflineCursor`] re-reads them.
//!
//! Both cursors return `Ok(None)` at the end of a lap. Looping over epochs is
//! the caller's job (`rewind` / `seek_start` between laps).

use std::ops::Range;
use std::path::PathBuf;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::codec::CodecError;
use crate::common::{Matrix, Row, Value};
use crate::editor::SOS_TOKEN;
use crate::orchestrator::{EncodedCase, Orchestrator, PipelineError, CASES_FILE};
use crate::store::{MatrixReader, MatrixWriter, StoreError};

pub const PREFIXES_FILE: &str = "prefixes.bin";
pub const SUFFIXES_FILE: &str = "suffixes.bin";

#[derive(Debug, Error)]
pub enum SlicerError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid slicer configuration: {0}")]
    Config(String),

    #[error("prefix of {len} rows exceeds the padded length {max}")]
    PrefixTooLong { len: usize, max: usize },

    #[error("{PREFIXES_FILE} and {SUFFIXES_FILE} are out of step at pair {pair}")]
    Desynchronized { pair: usize },
}

// ============================================================================
// Configuration
// ============================================================================

/// Side on which prefixes are zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Padding {
    /// Real rows first, zeros after.
    #[default]
    Trailing,
    /// Zeros first, real rows last (LSTM-style).
    Leading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicerConfig {
    /// Pairs per batch.
    pub batch_size: usize,
    pub padding: Padding,
    /// Train/validation/test weights.
    pub split_ratios: (f64, f64, f64),
    /// Seed for the per-case split draw.
    pub split_seed: u64,
    /// Attach each pair's leftover row to online batches.
    pub with_leftovers: bool,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            padding: Padding::Trailing,
            split_ratios: (0.7, 0.2, 0.1),
            split_seed: 123,
            with_leftovers: false,
        }
    }
}

// ============================================================================
// Split Assignment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Train,
    Validation,
    Test,
}

/// Per-case split, drawn once with a seeded RNG.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitAssignment {
    splits: Vec<Split>,
}

impl SplitAssignment {
    pub fn draw(case_count: usize, ratios: (f64, f64, f64), seed: u64) -> Self {
        let (train, validation, test) = ratios;
        let total = train + validation + test;
        let mut rng = SmallRng::seed_from_u64(seed);
        let splits = (0..case_count)
            .map(|_| {
                let x = rng.gen::<f64>() * total;
                if x < train {
                    Split::Train
                } else if x < train + validation {
                    Split::Validation
                } else {
                    Split::Test
                }
            })
            .collect();
        Self { splits }
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    pub fn get(&self, case: usize) -> Option<Split> {
        self.splits.get(case).copied()
    }

    /// Whether case `case` belongs to `filter` (`None` accepts every case).
    pub fn accepts(&self, case: usize, filter: Option<Split>) -> bool {
        match filter {
            None => true,
            Some(split) => self.get(case) == Some(split),
        }
    }

    pub fn count(&self, split: Split) -> usize {
        self.splits.iter().filter(|&&s| s == split).count()
    }
}

// ============================================================================
// Batches
// ============================================================================

/// A batch of B (prefix, suffix) pairs.
///
/// Flat buffers with shapes documented per field.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub size: usize,
    /// Padded prefix length (`max_case_length - 1`).
    pub max_len: usize,
    pub features: usize,
    pub activities: usize,

    // [B, max_len, F]
    pub prefixes: Vec<f64>,
    // [B, A]
    pub suffixes: Vec<f64>,
    // [B] unpadded prefix lengths
    pub prefix_lengths: Vec<usize>,
    // [B] leftover rows, when requested
    pub leftovers: Option<Vec<Vec<Value>>>,
}

impl Batch {
    /// Padded prefix `i` as a `(max_len, F)` matrix.
    pub fn prefix(&self, i: usize) -> Matrix {
        let stride = self.max_len * self.features;
        Matrix::from_flat(
            self.max_len,
            self.features,
            self.prefixes[i * stride..(i + 1) * stride].to_vec(),
        )
    }

    pub fn suffix(&self, i: usize) -> &[f64] {
        &self.suffixes[i * self.activities..(i + 1) * self.activities]
    }
}

/// Accumulates pairs until a batch is full.
struct BatchBuilder {
    batch_size: usize,
    max_len: usize,
    features: usize,
    activities: usize,
    padding: Padding,
    with_leftovers: bool,
    batch: Batch,
}

impl BatchBuilder {
    fn new(slicer: &Slicer<'_>, with_leftovers: bool) -> Self {
        let max_len = slicer.max_len();
        let features = slicer.features();
        let activities = slicer.activities();
        let mut builder = Self {
            batch_size: slicer.config.batch_size,
            max_len,
            features,
            activities,
            padding: slicer.config.padding,
            with_leftovers,
            batch: Batch {
                size: 0,
                max_len,
                features,
                activities,
                prefixes: Vec::new(),
                suffixes: Vec::new(),
                prefix_lengths: Vec::new(),
                leftovers: None,
            },
        };
        builder.reset();
        builder
    }

    fn reset(&mut self) {
        self.batch = Batch {
            size: 0,
            max_len: self.max_len,
            features: self.features,
            activities: self.activities,
            prefixes: Vec::with_capacity(self.batch_size * self.max_len * self.features),
            suffixes: Vec::with_capacity(self.batch_size * self.activities),
            prefix_lengths: Vec::with_capacity(self.batch_size),
            leftovers: self.with_leftovers.then(Vec::new),
        };
    }

    /// `prefix` holds the unpadded rows as a flat `[len, F]` slice.
    fn push(
        &mut self,
        prefix: &[f64],
        len: usize,
        suffix: &[f64],
        leftover: Option<&[Value]>,
    ) -> Result<(), SlicerError> {
        if len > self.max_len {
            return Err(SlicerError::PrefixTooLong {
                len,
                max: self.max_len,
            });
        }
        let padding = vec![0.0; (self.max_len - len) * self.features];
        match self.padding {
            Padding::Trailing => {
                self.batch.prefixes.extend_from_slice(prefix);
                self.batch.prefixes.extend_from_slice(&padding);
            }
            Padding::Leading => {
                self.batch.prefixes.extend_from_slice(&padding);
                self.batch.prefixes.extend_from_slice(prefix);
            }
        }
        self.batch.suffixes.extend_from_slice(suffix);
        self.batch.prefix_lengths.push(len);
        if let (Some(rows), Some(leftover)) = (self.batch.leftovers.as_mut(), leftover) {
            rows.push(leftover.to_vec());
        }
        self.batch.size += 1;
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.batch.size >= self.batch_size
    }

    /// The current batch, or `None` if it holds no pair.
    fn take(&mut self) -> Option<Batch> {
        if self.batch.size == 0 {
            return None;
        }
        let batch = std::mem::replace(
            &mut self.batch,
            Batch {
                size: 0,
                max_len: 0,
                features: 0,
                activities: 0,
                prefixes: Vec::new(),
                suffixes: Vec::new(),
                prefix_lengths: Vec::new(),
                leftovers: None,
            },
        );
        self.reset();
        Some(batch)
    }
}

// ============================================================================
// Slicer
// ============================================================================

/// Data preparator over a finalized orchestrator.
pub struct Slicer<'a> {
    orchestrator: &'a Orchestrator,
    config: SlicerConfig,
    splits: SplitAssignment,
    activity_span: Range<usize>,
}

impl<'a> Slicer<'a> {
    pub fn new(orchestrator: &'a Orchestrator, config: SlicerConfig) -> Result<Self, SlicerError> {
        if config.batch_size == 0 {
            return Err(SlicerError::Config("batch size must be at least 1".into()));
        }
        let (a, b, c) = config.split_ratios;
        if a < 0.0 || b < 0.0 || c < 0.0 || a + b + c <= 0.0 {
            return Err(SlicerError::Config(format!(
                "split ratios {:?} must be non-negative with a positive sum",
                config.split_ratios
            )));
        }
        let activity_span = orchestrator.codecs().activity_span()?;
        let splits = SplitAssignment::draw(
            orchestrator.metadata().case_count,
            config.split_ratios,
            config.split_seed,
        );
        debug!(
            train = splits.count(Split::Train),
            validation = splits.count(Split::Validation),
            test = splits.count(Split::Test),
            "split assignment drawn"
        );
        Ok(Self {
            orchestrator,
            config,
            splits,
            activity_span,
        })
    }

    pub fn config(&self) -> &SlicerConfig {
        &self.config
    }

    pub fn splits(&self) -> &SplitAssignment {
        &self.splits
    }

    /// Padded prefix length.
    pub fn max_len(&self) -> usize {
        self.orchestrator.metadata().max_case_length.saturating_sub(1)
    }

    pub fn features(&self) -> usize {
        self.orchestrator.metadata().feature_count
    }

    pub fn activities(&self) -> usize {
        self.activity_span.len()
    }

    fn output_path(&self, name: &str) -> PathBuf {
        self.orchestrator.output_dir().join(name)
    }

    /// Suffix of pair `i` of an encoded case: the activity block of row `i`.
    fn suffix<'m>(&self, matrix: &'m Matrix, i: usize) -> &'m [f64] {
        &matrix.row(i)[self.activity_span.clone()]
    }

    // ------------------------------------------------------------------------
    // Online
    // ------------------------------------------------------------------------

    /// Cursor over one lap of the orchestrator's case stream.
    pub fn online(&self, split: Option<Split>) -> Result<OnlineCursor<'_, 'a>, SlicerError> {
        Ok(OnlineCursor {
            slicer: self,
            split,
            cases: Box::new(self.orchestrator.cases()?),
            case_index: 0,
            current: None,
            builder: BatchBuilder::new(self, self.config.with_leftovers),
            exhausted: false,
        })
    }

    /// Pairs in one online lap. Re-reads the raw input: O(total rows).
    pub fn epoch_size_online(&self, split: Option<Split>) -> Result<usize, SlicerError> {
        let mut total = 0;
        for (index, case) in self.orchestrator.edited_cases()?.enumerate() {
            let case = case?;
            if self.splits.accepts(index, split) {
                total += case.len().saturating_sub(1);
            }
        }
        Ok(total)
    }

    // ------------------------------------------------------------------------
    // Offline
    // ------------------------------------------------------------------------

    /// Slice every case of `cases.bin` into unpadded pairs, written once to
    /// `prefixes.bin` / `suffixes.bin` and tagged with their case index.
    /// Returns the number of pairs written.
    pub fn persist_pairs(&self) -> Result<usize, SlicerError> {
        let mut cases = MatrixReader::open(&self.output_path(CASES_FILE))?;
        let mut prefixes = MatrixWriter::create(&self.output_path(PREFIXES_FILE))?;
        let mut suffixes = MatrixWriter::create(&self.output_path(SUFFIXES_FILE))?;
        let features = self.features();

        let mut pairs = 0;
        while let Some(record) = cases.next_record()? {
            let matrix = &record.matrix;
            for i in 1..matrix.rows() {
                let rows = &matrix.as_slice()[..i * features];
                prefixes.write_raw(record.tag, i, features, rows)?;
                let suffix = self.suffix(matrix, i);
                suffixes.write_raw(record.tag, 1, suffix.len(), suffix)?;
                pairs += 1;
            }
        }
        prefixes.finish()?;
        suffixes.finish()?;
        info!(pairs, "Prefix/suffix pairs persisted");
        Ok(pairs)
    }

    /// Cursor over the persisted pairs.
    pub fn offline(&self, split: Option<Split>) -> Result<OfflineCursor<'_, 'a>, SlicerError> {
        Ok(OfflineCursor {
            slicer: self,
            split,
            prefixes: MatrixReader::open(&self.output_path(PREFIXES_FILE))?,
            suffixes: MatrixReader::open(&self.output_path(SUFFIXES_FILE))?,
            builder: BatchBuilder::new(self, false),
            pair: 0,
        })
    }

    /// Pairs in one offline lap, by scanning `suffixes.bin` to exhaustion.
    pub fn epoch_size_offline(&self, split: Option<Split>) -> Result<usize, SlicerError> {
        let mut suffixes = MatrixReader::open(&self.output_path(SUFFIXES_FILE))?;
        let mut total = 0;
        while let Some((tag, _)) = suffixes.skip_record()? {
            if self.splits.accepts(tag as usize, split) {
                total += 1;
            }
        }
        Ok(total)
    }

    // ------------------------------------------------------------------------
    // Prediction decoding
    // ------------------------------------------------------------------------

    /// Decode a (possibly padded) prefix back to raw rows. All-zero rows are
    /// treated as padding and dropped.
    pub fn decode_prefix(
        &self,
        prefix: &Matrix,
        leftover: &[Value],
    ) -> Result<Vec<Row>, SlicerError> {
        let rows = prefix.without_zero_rows();
        Ok(self.orchestrator.codecs().decode_case(&rows, leftover)?)
    }

    /// Activity predicted by an `(A,)` score vector: argmax over the vocabulary.
    pub fn decode_prediction(&self, prediction: &[f64]) -> Result<Value, SlicerError> {
        let codec = self.orchestrator.codecs().activity_codec()?;
        let empty = Matrix::zeros(0, self.activities());
        Ok(codec.decode_prediction(&empty, prediction, None)?)
    }
}

/// Suffix of a decoded activity sequence starting at its last start marker.
pub fn trim_to_last_start(activities: &[Value]) -> &[Value] {
    let start = Value::text(SOS_TOKEN);
    match activities.iter().rposition(|v| *v == start) {
        Some(i) => &activities[i..],
        None => activities,
    }
}

// ============================================================================
// Cursors
// ============================================================================

/// One online lap: batches built directly from the orchestrator's case stream.
pub struct OnlineCursor<'s, 'a> {
    slicer: &'s Slicer<'a>,
    split: Option<Split>,
    cases: Box<dyn Iterator<Item = Result<EncodedCase, PipelineError>> + 's>,
    case_index: usize,
    /// Case being sliced and the next pair index within it.
    current: Option<(EncodedCase, usize)>,
    builder: BatchBuilder,
    exhausted: bool,
}

impl OnlineCursor<'_, '_> {
    /// Next full batch, the partial final batch once, then `Ok(None)`.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, SlicerError> {
        loop {
            if self.builder.is_full() {
                return Ok(self.builder.take());
            }
            if let Some((case, i)) = self.current.as_mut() {
                if *i < case.matrix.rows() {
                    let features = case.matrix.cols();
                    let prefix = &case.matrix.as_slice()[..*i * features];
                    let suffix = self.slicer.suffix(&case.matrix, *i);
                    let leftover = Some(case.leftover.as_slice());
                    self.builder.push(prefix, *i, suffix, leftover)?;
                    *i += 1;
                    continue;
                }
                self.current = None;
            }
            if self.exhausted {
                return Ok(self.builder.take());
            }
            match self.cases.next() {
                Some(case) => {
                    let case = case?;
                    let index = self.case_index;
                    self.case_index += 1;
                    if self.slicer.splits.accepts(index, self.split) {
                        self.current = Some((case, 1));
                    }
                }
                None => self.exhausted = true,
            }
        }
    }

    /// Restart from the first case for another lap.
    pub fn rewind(&mut self) -> Result<(), SlicerError> {
        self.cases = Box::new(self.slicer.orchestrator.cases()?);
        self.case_index = 0;
        self.current = None;
        self.builder.take();
        self.exhausted = false;
        Ok(())
    }
}

/// One offline lap over `prefixes.bin` / `suffixes.bin`.
pub struct OfflineCursor<'s, 'a> {
    slicer: &'s Slicer<'a>,
    split: Option<Split>,
    prefixes: MatrixReader,
    suffixes: MatrixReader,
    builder: BatchBuilder,
    pair: usize,
}

impl OfflineCursor<'_, '_> {
    /// Next full batch, the partial final batch once, then `Ok(None)`.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, SlicerError> {
        while !self.builder.is_full() {
            let next = (self.prefixes.next_record()?, self.suffixes.next_record()?);
            let (prefix, suffix) = match next {
                (Some(p), Some(s)) if p.tag == s.tag => (p, s),
                (None, None) => break,
                _ => return Err(SlicerError::Desynchronized { pair: self.pair }),
            };
            self.pair += 1;
            if !self.slicer.splits.accepts(prefix.tag as usize, self.split) {
                continue;
            }
            let len = prefix.matrix.rows();
            self.builder
                .push(prefix.matrix.as_slice(), len, suffix.matrix.as_slice(), None)?;
        }
        Ok(self.builder.take())
    }

    /// Rewind both containers for another lap.
    pub fn seek_start(&mut self) {
        self.prefixes.seek_start();
        self.suffixes.seek_start();
        self.builder.take();
        self.pair = 0;
    }
}
