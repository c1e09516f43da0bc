//! Reversible column codecs.
//!
//! A codec turns one raw column of a case into a block of numeric columns and
//! back. Every codec goes through the same lifecycle:
//!
//! 1. **bind** to the file's column names (first chunk),
//! 2. **accumulate** statistics over every chunk of the statistics pass,
//! 3. **finalize** exactly once,
//! 4. **encode** / **decode** cases statelessly.
//!
//! Fitted parameters round-trip through a flat [`Property`] list, so a codec
//! can be rebuilt from its [`CodecDescription`] without touching raw data.
//! The set of codec kinds is closed: [`CodecKind`] maps a persisted kind name
//! to its constructor.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{ColumnType, Matrix, Row, Value, CASE_ID_COLUMN};

pub mod boolean;
pub mod delete;
pub mod manager;
pub mod normalize;
pub mod one_hot;
pub mod time_delta;

pub use boolean::BooleanCodec;
pub use delete::DeleteCodec;
pub use manager::CodecManager;
pub use normalize::NormalizeCodec;
pub use one_hot::OneHotCodec;
pub use time_delta::TimeDeltaCodec;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{codec}: value '{value}' is not in the finalized vocabulary")]
    UnknownCategory { codec: String, value: String },

    #[error("{0}: codec used before finalize")]
    NotReady(String),

    #[error("{0}: codec finalized twice")]
    AlreadyFinalized(String),

    #[error("{codec}: column {column} does not exist ({available} columns in file)")]
    MissingColumn {
        codec: String,
        column: usize,
        available: usize,
    },

    #[error("{codec}: cannot interpret '{value}' as {expected}")]
    InvalidValue {
        codec: String,
        value: String,
        expected: &'static str,
    },

    #[error("{codec}: invalid properties: {reason}")]
    InvalidProperties { codec: String, reason: String },

    #[error("{0}: missing leftover value")]
    MissingLeftover(String),

    #[error("unknown codec kind '{0}'")]
    UnknownKind(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

// ============================================================================
// Codec Kinds
// ============================================================================

/// Closed registry of codec kinds. The serialized name is what descriptors store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    Delete,
    OneHot,
    Normalize,
    Boolean,
    TimeDelta,
}

impl CodecKind {
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Delete => "Delete",
            CodecKind::OneHot => "OneHot",
            CodecKind::Normalize => "Normalize",
            CodecKind::Boolean => "Boolean",
            CodecKind::TimeDelta => "TimeDelta",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        match name {
            "Delete" => Ok(CodecKind::Delete),
            "OneHot" => Ok(CodecKind::OneHot),
            "Normalize" => Ok(CodecKind::Normalize),
            "Boolean" => Ok(CodecKind::Boolean),
            "TimeDelta" => Ok(CodecKind::TimeDelta),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }

    /// Semantic column type the kind operates on.
    pub fn column_type(self) -> ColumnType {
        match self {
            CodecKind::Delete => ColumnType::Any,
            CodecKind::OneHot => ColumnType::Qualitative,
            CodecKind::Normalize => ColumnType::Quantitative,
            CodecKind::Boolean => ColumnType::Boolean,
            CodecKind::TimeDelta => ColumnType::Date,
        }
    }

    /// Construct an empty, unfinalized codec of this kind on `column`.
    /// `activity` only matters for [`CodecKind::OneHot`].
    pub fn build(self, column: usize, activity: bool) -> Box<dyn Codec> {
        match self {
            CodecKind::Delete => Box::new(DeleteCodec::new(column)),
            CodecKind::OneHot => Box::new(OneHotCodec::new(column, activity)),
            CodecKind::Normalize => Box::new(NormalizeCodec::new(column)),
            CodecKind::Boolean => Box::new(BooleanCodec::new(column)),
            CodecKind::TimeDelta => Box::new(TimeDeltaCodec::new(column)),
        }
    }
}

// ============================================================================
// Properties & Descriptions
// ============================================================================

/// One fitted parameter. Codecs persist their state as an ordered list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Property {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Property::Int(v) => Some(*v as f64),
            Property::Float(v) => Some(*v),
            Property::Text(s) => s.parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Property::Int(v) => Some(*v),
            Property::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Property::Float(_) => None,
            Property::Text(s) => s.parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Property::Int(v) => v.to_string(),
            Property::Float(v) => v.to_string(),
            Property::Text(s) => s.clone(),
        }
    }
}

/// Everything needed to rebuild a finalized codec without the raw data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecDescription {
    pub kind: CodecKind,
    /// Whether this one-hot codec encodes activities (and received editor tokens).
    pub activity: bool,
    pub properties: Vec<Property>,
    pub input_names: Vec<String>,
    pub input_ids: Vec<usize>,
    /// Names of the emitted numeric columns.
    pub output_names: Vec<String>,
    /// Positions of the emitted columns in the encoded case matrix.
    pub output_ids: Vec<usize>,
}

/// Rebuild a finalized codec from its persisted description.
pub fn from_description(desc: &CodecDescription) -> Result<Box<dyn Codec>, CodecError> {
    let column = *desc
        .input_ids
        .first()
        .ok_or_else(|| CodecError::InvalidProperties {
            codec: desc.kind.name().to_string(),
            reason: "description has no input column".to_string(),
        })?;
    let mut codec = desc.kind.build(column, desc.activity);
    codec.restore_binding(&desc.input_ids, &desc.input_names);
    codec.set_properties(&desc.properties)?;
    Ok(codec)
}

/// Pick covariate codecs from inferred column types, skipping the first `skip`
/// conventional columns. Dates, `Any` and `Junk` columns get no codec.
pub fn auto_covariate_codecs(types: &[ColumnType], skip: usize) -> Vec<Box<dyn Codec>> {
    types
        .iter()
        .enumerate()
        .skip(skip)
        .filter_map(|(column, stype)| {
            let kind = match stype {
                ColumnType::CaseId => CodecKind::Delete,
                ColumnType::Quantitative => CodecKind::Normalize,
                ColumnType::Qualitative => CodecKind::OneHot,
                ColumnType::Boolean => CodecKind::Boolean,
                ColumnType::Date | ColumnType::Any | ColumnType::Junk => return None,
            };
            Some(kind.build(column, false))
        })
        .collect()
}

// ============================================================================
// Column Binding
// ============================================================================

/// Input columns of a codec: positions fixed at construction, names filled in
/// from the file header at bind time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnBinding {
    pub ids: Vec<usize>,
    pub names: Vec<String>,
}

impl ColumnBinding {
    pub fn single(column: usize) -> Self {
        Self {
            ids: vec![column],
            names: Vec::new(),
        }
    }

    pub fn multi(columns: Vec<usize>) -> Self {
        Self {
            ids: columns,
            names: Vec::new(),
        }
    }

    /// The first (for single-column codecs, the only) input column.
    pub fn id(&self) -> usize {
        self.ids[0]
    }

    /// Name of the first input column, or its position if not yet bound.
    pub fn name(&self) -> String {
        self.names
            .first()
            .cloned()
            .unwrap_or_else(|| self.id().to_string())
    }

    pub fn bind(&mut self, codec: &str, column_names: &[String]) -> Result<(), CodecError> {
        let mut names = Vec::with_capacity(self.ids.len());
        for &id in &self.ids {
            let name = column_names
                .get(id)
                .ok_or_else(|| CodecError::MissingColumn {
                    codec: codec.to_string(),
                    column: id,
                    available: column_names.len(),
                })?;
            names.push(name.clone());
        }
        self.names = names;
        Ok(())
    }
}

// ============================================================================
// Codec Trait
// ============================================================================

/// A reversible transform between raw case columns and numeric blocks.
///
/// `encode` receives whole rows and picks its own input columns; `decode`
/// receives only the codec's own output span of the encoded matrix.
pub trait Codec: std::fmt::Debug + Send {
    fn kind(&self) -> CodecKind;

    fn binding(&self) -> &ColumnBinding;

    fn binding_mut(&mut self) -> &mut ColumnBinding;

    /// Unique name within a manager: `<Kind>_<column>`.
    fn name(&self) -> String {
        format!("{}_{}", self.kind().name(), self.binding().id())
    }

    fn column_type(&self) -> ColumnType {
        self.kind().column_type()
    }

    /// Resolve input column names from the file header.
    fn bind(&mut self, column_names: &[String]) -> Result<(), CodecError> {
        let name = self.name();
        self.binding_mut().bind(&name, column_names)
    }

    /// Restore a binding from a persisted description.
    fn restore_binding(&mut self, ids: &[usize], names: &[String]) {
        let binding = self.binding_mut();
        binding.ids = ids.to_vec();
        binding.names = names.to_vec();
    }

    /// Fold one chunk of rows into the running statistics.
    fn accumulate(&mut self, _chunk: &[Row]) -> Result<(), CodecError> {
        Ok(())
    }

    /// Freeze the fitted parameters. Must be called exactly once.
    fn finalize(&mut self) -> Result<(), CodecError>;

    fn is_finalized(&self) -> bool;

    /// Add editor-injected tokens to an activity vocabulary. No-op for other codecs.
    fn widen_vocabulary(&mut self, _tokens: &BTreeSet<String>) {}

    fn is_activity(&self) -> bool {
        false
    }

    /// Names of the emitted numeric columns; the width of every encoded block.
    fn output_columns(&self) -> Vec<String>;

    fn width(&self) -> usize {
        self.output_columns().len()
    }

    /// Key under which this codec's per-case side-channel value is stored.
    fn leftover_name(&self) -> Option<String> {
        None
    }

    /// Encode one case into a `(rows, width)` block.
    fn encode(&self, rows: &[Row]) -> Result<Matrix, CodecError>;

    /// Per-case side-channel value needed to decode.
    fn leftover(&self, _rows: &[Row]) -> Option<Value> {
        None
    }

    /// Reconstruct the raw column of one case from this codec's block.
    fn decode(&self, block: &Matrix, leftover: Option<&Value>) -> Result<Vec<Value>, CodecError>;

    /// Decode the value predicted for the row following `prefix`.
    ///
    /// `prefix` and `prediction` are restricted to this codec's output span.
    fn decode_prediction(
        &self,
        prefix: &Matrix,
        prediction: &[f64],
        leftover: Option<&Value>,
    ) -> Result<Value, CodecError>;

    fn properties(&self) -> Vec<Property>;

    /// Restore fitted parameters; leaves the codec finalized.
    fn set_properties(&mut self, properties: &[Property]) -> Result<(), CodecError>;

    /// Persisted description. `first_output` is the offset of this codec's
    /// block in the encoded matrix.
    fn describe(&self, first_output: usize) -> CodecDescription {
        let output_names = self.output_columns();
        let output_ids = (first_output..first_output + output_names.len()).collect();
        CodecDescription {
            kind: self.kind(),
            activity: self.is_activity(),
            properties: self.properties(),
            input_names: self.binding().names.clone(),
            input_ids: self.binding().ids.clone(),
            output_names,
            output_ids,
        }
    }
}

/// Case identifier of a row, used by codecs that must not look across cases.
pub(crate) fn row_case_id(row: &Row) -> String {
    row[CASE_ID_COLUMN].key()
}
