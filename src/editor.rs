//! Case editors: case-level transforms applied after grouping, before encoding.
//!
//! Editors that insert synthetic events declare the activity tokens they
//! introduce. [`EditorChain::tokens`] unions them so the orchestrator can
//! widen the activity vocabulary before the statistics pass finalizes it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::{Case, Row, Value, ACTIVITY_COLUMN, END_TIMESTAMP_COLUMN, TIMESTAMP_COLUMN};
use crate::orchestrator::PipelineMetadata;

/// Start-of-sequence activity token.
pub const SOS_TOKEN: &str = "SoS";
/// End-of-sequence activity token.
pub const EOS_TOKEN: &str = "EoS";

pub trait CaseEditor: std::fmt::Debug + Send {
    /// Persisted name; see [`EditorKind`].
    fn name(&self) -> &'static str;

    /// Activity tokens this editor writes into cases.
    fn tokens(&self) -> BTreeSet<String>;

    /// Rows added to every case.
    fn extra_rows(&self) -> usize;

    fn edit_case(&self, case: Case, double_timestamps: bool) -> Case;
}

/// Synthetic event built from a boundary row: same case id and covariates,
/// activity replaced by `token`, timestamps pinned to `stamp`.
fn marker_row(boundary: &Row, token: &str, stamp: Value, double_timestamps: bool) -> Row {
    let mut row = boundary.clone();
    row[ACTIVITY_COLUMN] = Value::text(token);
    row[TIMESTAMP_COLUMN] = stamp.clone();
    if double_timestamps {
        row[END_TIMESTAMP_COLUMN] = stamp;
    }
    row
}

/// Prepends a `SoS` event at the case's first timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct SosForAll;

impl CaseEditor for SosForAll {
    fn name(&self) -> &'static str {
        EditorKind::SosForAll.name()
    }

    fn tokens(&self) -> BTreeSet<String> {
        BTreeSet::from([SOS_TOKEN.to_string()])
    }

    fn extra_rows(&self) -> usize {
        1
    }

    fn edit_case(&self, mut case: Case, double_timestamps: bool) -> Case {
        let Some(first) = case.rows.first() else {
            return case;
        };
        let stamp = first[TIMESTAMP_COLUMN].clone();
        let row = marker_row(first, SOS_TOKEN, stamp, double_timestamps);
        case.rows.insert(0, row);
        case
    }
}

/// Appends an `EoS` event at the case's last (end) timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct EosForAll;

impl CaseEditor for EosForAll {
    fn name(&self) -> &'static str {
        EditorKind::EosForAll.name()
    }

    fn tokens(&self) -> BTreeSet<String> {
        BTreeSet::from([EOS_TOKEN.to_string()])
    }

    fn extra_rows(&self) -> usize {
        1
    }

    fn edit_case(&self, mut case: Case, double_timestamps: bool) -> Case {
        let Some(last) = case.rows.last() else {
            return case;
        };
        let source = if double_timestamps {
            END_TIMESTAMP_COLUMN
        } else {
            TIMESTAMP_COLUMN
        };
        let stamp = last[source].clone();
        let row = marker_row(last, EOS_TOKEN, stamp, double_timestamps);
        case.rows.push(row);
        case
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Closed set of editors that can be named in a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditorKind {
    SosForAll,
    EosForAll,
}

impl EditorKind {
    pub fn name(self) -> &'static str {
        match self {
            EditorKind::SosForAll => "SosForAll",
            EditorKind::EosForAll => "EosForAll",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SosForAll" => Some(EditorKind::SosForAll),
            "EosForAll" => Some(EditorKind::EosForAll),
            _ => None,
        }
    }

    pub fn build(self) -> Box<dyn CaseEditor> {
        match self {
            EditorKind::SosForAll => Box::new(SosForAll),
            EditorKind::EosForAll => Box::new(EosForAll),
        }
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Editors applied in registration order.
#[derive(Debug, Default)]
pub struct EditorChain {
    editors: Vec<Box<dyn CaseEditor>>,
}

impl EditorChain {
    pub fn new(editors: Vec<Box<dyn CaseEditor>>) -> Self {
        Self { editors }
    }

    /// Rebuild a chain from persisted names. Returns the first unknown name on failure.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        names
            .iter()
            .map(|name| {
                EditorKind::from_name(name.as_ref())
                    .map(EditorKind::build)
                    .ok_or_else(|| name.as_ref().to_string())
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn names(&self) -> Vec<String> {
        self.editors.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.editors.is_empty()
    }

    /// Union of every editor's synthetic tokens.
    pub fn tokens(&self) -> BTreeSet<String> {
        self.editors.iter().flat_map(|e| e.tokens()).collect()
    }

    pub fn edit_case(&self, case: Case, double_timestamps: bool) -> Case {
        self.editors
            .iter()
            .fold(case, |case, editor| editor.edit_case(case, double_timestamps))
    }

    /// Adjust derived metadata for the rows editors add.
    pub fn alter_metadata(&self, metadata: &mut PipelineMetadata) {
        metadata.max_case_length += self.editors.iter().map(|e| e.extra_rows()).sum::<usize>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::parse_date;

    fn date(s: &str) -> Value {
        Value::Date(parse_date(s).unwrap())
    }

    fn single_case() -> Case {
        let mut case = Case::new(
            "A".into(),
            vec![
                Value::text("A"),
                Value::text("start"),
                date("2024-01-01 00:00:00"),
                Value::text("x"),
            ],
        );
        case.rows.push(vec![
            Value::text("A"),
            Value::text("end"),
            date("2024-01-01 01:00:00"),
            Value::text("y"),
        ]);
        case
    }

    #[test]
    fn test_sos_and_eos_wrap_case() {
        let chain = EditorChain::from_names(&["SosForAll", "EosForAll"]).unwrap();
        let edited = chain.edit_case(single_case(), false);
        assert_eq!(edited.len(), 4);

        assert_eq!(edited.rows[0][ACTIVITY_COLUMN], Value::text("SoS"));
        assert_eq!(edited.rows[0][TIMESTAMP_COLUMN], date("2024-01-01 00:00:00"));
        assert_eq!(edited.rows[0][3], Value::text("x"));

        assert_eq!(edited.rows[3][ACTIVITY_COLUMN], Value::text("EoS"));
        assert_eq!(edited.rows[3][TIMESTAMP_COLUMN], date("2024-01-01 01:00:00"));
        assert_eq!(edited.rows[3][3], Value::text("y"));
        assert!(edited.rows.iter().all(|r| r[0] == Value::text("A")));
    }

    #[test]
    fn test_double_timestamps_pin_both_columns() {
        let mut case = Case::new(
            "A".into(),
            vec![
                Value::text("A"),
                Value::text("work"),
                date("2024-01-01 00:00:00"),
                date("2024-01-01 00:10:00"),
            ],
        );
        case.rows.push(vec![
            Value::text("A"),
            Value::text("work"),
            date("2024-01-01 01:00:00"),
            date("2024-01-01 01:20:00"),
        ]);

        let sos = SosForAll.edit_case(case.clone(), true);
        assert_eq!(sos.rows[0][2], date("2024-01-01 00:00:00"));
        assert_eq!(sos.rows[0][3], date("2024-01-01 00:00:00"));

        let eos = EosForAll.edit_case(case, true);
        assert_eq!(eos.rows[2][2], date("2024-01-01 01:20:00"));
        assert_eq!(eos.rows[2][3], date("2024-01-01 01:20:00"));
    }

    #[test]
    fn test_chain_tokens_and_metadata() {
        let chain = EditorChain::new(vec![Box::new(SosForAll), Box::new(EosForAll)]);
        let tokens: Vec<String> = chain.tokens().into_iter().collect();
        assert_eq!(tokens, vec!["EoS", "SoS"]);
        assert_eq!(chain.names(), vec!["SosForAll", "EosForAll"]);

        let mut metadata = PipelineMetadata {
            max_case_length: 3,
            ..PipelineMetadata::default()
        };
        chain.alter_metadata(&mut metadata);
        assert_eq!(metadata.max_case_length, 5);
    }

    #[test]
    fn test_unknown_editor_name() {
        assert_eq!(EditorChain::from_names(&["Shuffle"]).unwrap_err(), "Shuffle");
    }
}
