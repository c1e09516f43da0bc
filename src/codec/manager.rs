//! Ordered collection of codecs.
//!
//! The manager's codec order is load-bearing: the encoded matrix is the
//! column-wise concatenation of each codec's block in that order, and
//! persisted descriptions replay the same order on reload.

use std::collections::{BTreeSet, HashSet};
use std::ops::Range;

use indexmap::IndexMap;
use tracing::debug;

use super::{from_description, Codec, CodecDescription, CodecError, CodecKind};
use crate::common::{Matrix, Row, Value, ACTIVITY_COLUMN};

#[derive(Debug)]
pub struct CodecManager {
    codecs: IndexMap<String, Box<dyn Codec>>,
}

impl CodecManager {
    /// Codec names and leftover names must both be unique.
    pub fn new(codecs: Vec<Box<dyn Codec>>) -> Result<Self, CodecError> {
        let mut map: IndexMap<String, Box<dyn Codec>> = IndexMap::with_capacity(codecs.len());
        let mut leftovers = HashSet::new();
        for codec in codecs {
            let name = codec.name();
            if let Some(leftover) = codec.leftover_name() {
                if !leftovers.insert(leftover.clone()) {
                    return Err(CodecError::Configuration(format!(
                        "leftover name '{leftover}' declared twice"
                    )));
                }
            }
            if map.contains_key(&name) {
                return Err(CodecError::Configuration(format!(
                    "codec '{name}' registered twice"
                )));
            }
            map.insert(name, codec);
        }
        Ok(Self { codecs: map })
    }

    /// Rebuild finalized codecs from persisted descriptions, in order.
    pub fn from_descriptions(descriptions: &[CodecDescription]) -> Result<Self, CodecError> {
        let codecs = descriptions
            .iter()
            .map(from_description)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(codecs)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Codec> + '_ {
        self.codecs.values().map(|c| c.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Codec> {
        self.codecs.get(name).map(|c| c.as_ref())
    }

    // ========================================================================
    // Statistics pass
    // ========================================================================

    pub fn bind(&mut self, column_names: &[String]) -> Result<(), CodecError> {
        for codec in self.codecs.values_mut() {
            codec.bind(column_names)?;
        }
        Ok(())
    }

    /// Push editor tokens into every activity codec. Must precede [`finalize`](Self::finalize).
    pub fn widen_activity(&mut self, tokens: &BTreeSet<String>) {
        for codec in self.codecs.values_mut().filter(|c| c.is_activity()) {
            debug!(codec = %codec.name(), tokens = tokens.len(), "widening vocabulary");
            codec.widen_vocabulary(tokens);
        }
    }

    pub fn accumulate(&mut self, chunk: &[Row]) -> Result<(), CodecError> {
        for codec in self.codecs.values_mut() {
            codec.accumulate(chunk)?;
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), CodecError> {
        for codec in self.codecs.values_mut() {
            codec.finalize()?;
        }
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.codecs.values().all(|c| c.is_finalized())
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Names of every encoded column, in codec order.
    pub fn output_columns(&self) -> Vec<String> {
        self.codecs
            .values()
            .flat_map(|c| c.output_columns())
            .collect()
    }

    pub fn feature_count(&self) -> usize {
        self.codecs.values().map(|c| c.width()).sum()
    }

    /// Column span of each codec's block in the encoded matrix.
    pub fn spans(&self) -> Vec<Range<usize>> {
        let mut offset = 0;
        self.codecs
            .values()
            .map(|c| {
                let width = c.width();
                let span = offset..offset + width;
                offset += width;
                span
            })
            .collect()
    }

    pub fn leftover_names(&self) -> Vec<String> {
        self.codecs
            .values()
            .filter_map(|c| c.leftover_name())
            .collect()
    }

    pub fn has_leftovers(&self) -> bool {
        self.codecs.values().any(|c| c.leftover_name().is_some())
    }

    /// Names of the raw columns `decode_case` reconstructs, in codec order.
    pub fn decoded_columns(&self) -> Vec<String> {
        self.codecs
            .values()
            .flat_map(|c| c.binding().names.clone())
            .collect()
    }

    /// The one-hot codec bound to the activity column.
    pub fn activity_codec(&self) -> Result<&dyn Codec, CodecError> {
        self.activity_position()
            .map(|i| self.codecs[i].as_ref())
    }

    /// Span of the activity codec in the encoded matrix.
    pub fn activity_span(&self) -> Result<Range<usize>, CodecError> {
        let position = self.activity_position()?;
        Ok(self.spans()[position].clone())
    }

    fn activity_position(&self) -> Result<usize, CodecError> {
        self.codecs
            .values()
            .position(|c| {
                c.kind() == CodecKind::OneHot
                    && c.is_activity()
                    && c.binding().id() == ACTIVITY_COLUMN
            })
            .ok_or_else(|| {
                CodecError::Configuration(format!(
                    "no activity one-hot codec bound to column {ACTIVITY_COLUMN}"
                ))
            })
    }

    // ========================================================================
    // Apply
    // ========================================================================

    /// Encode one case into a `(rows, feature_count)` matrix.
    pub fn encode_case(&self, rows: &[Row]) -> Result<Matrix, CodecError> {
        let blocks = self
            .codecs
            .values()
            .map(|c| c.encode(rows))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Matrix::hstack(rows.len(), &blocks))
    }

    /// One leftover value per codec declaring a leftover, in codec order.
    pub fn leftover(&self, rows: &[Row]) -> Vec<Value> {
        self.codecs
            .values()
            .filter(|c| c.leftover_name().is_some())
            .map(|c| c.leftover(rows).unwrap_or(Value::Empty))
            .collect()
    }

    /// Leftover destined to each codec (`None` for codecs without one).
    fn distribute<'a>(&self, leftovers: &'a [Value]) -> Vec<Option<&'a Value>> {
        let mut remaining = leftovers.iter();
        self.codecs
            .values()
            .map(|c| c.leftover_name().and_then(|_| remaining.next()))
            .collect()
    }

    /// Invert [`encode_case`](Self::encode_case): one row per encoded row,
    /// one value per codec input column.
    pub fn decode_case(
        &self,
        matrix: &Matrix,
        leftovers: &[Value],
    ) -> Result<Vec<Row>, CodecError> {
        let mut rows: Vec<Row> = vec![Vec::with_capacity(self.codecs.len()); matrix.rows()];
        let assigned = self.distribute(leftovers);
        for ((codec, span), leftover) in self.codecs.values().zip(self.spans()).zip(assigned) {
            let column = codec.decode(&matrix.columns(span), leftover)?;
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        Ok(rows)
    }

    pub fn descriptions(&self) -> Vec<CodecDescription> {
        self.codecs
            .values()
            .zip(self.spans())
            .map(|(c, span)| c.describe(span.start))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DeleteCodec, NormalizeCodec, OneHotCodec, TimeDeltaCodec};
    use crate::common::parse_date;

    fn rows() -> Vec<Row> {
        let ts = |s: &str| Value::Date(parse_date(s).unwrap());
        vec![
            vec![
                Value::text("A"),
                Value::text("start"),
                ts("2024-01-01 00:00:00"),
                Value::text("3"),
            ],
            vec![
                Value::text("A"),
                Value::text("end"),
                ts("2024-01-01 01:00:00"),
                Value::text("5"),
            ],
        ]
    }

    fn fitted() -> CodecManager {
        let mut manager = CodecManager::new(vec![
            Box::new(DeleteCodec::new(0)),
            Box::new(OneHotCodec::new(1, true)),
            Box::new(TimeDeltaCodec::new(2)),
            Box::new(NormalizeCodec::new(3)),
        ])
        .unwrap();
        let names: Vec<String> = ["case", "activity", "time", "cost"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        manager.bind(&names).unwrap();
        manager.accumulate(&rows()).unwrap();
        manager.finalize().unwrap();
        manager
    }

    #[test]
    fn test_rejects_duplicate_codecs() {
        let err = CodecManager::new(vec![
            Box::new(NormalizeCodec::new(3)),
            Box::new(NormalizeCodec::new(3)),
        ])
        .unwrap_err();
        assert!(matches!(err, CodecError::Configuration(_)));
    }

    #[test]
    fn test_layout_is_concatenation_in_order() {
        let manager = fitted();
        assert_eq!(
            manager.output_columns(),
            vec!["end", "start", "time_delta", "cost"]
        );
        assert_eq!(manager.feature_count(), 4);
        assert_eq!(manager.spans(), vec![0..0, 0..2, 2..3, 3..4]);
        assert_eq!(manager.activity_span().unwrap(), 0..2);
        assert_eq!(manager.leftover_names(), vec!["Delete_0", "TimeDelta_2"]);
    }

    #[test]
    fn test_encode_then_decode_case() {
        let manager = fitted();
        let input = rows();
        let matrix = manager.encode_case(&input).unwrap();
        assert_eq!(matrix.as_slice(), &[0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0]);

        let leftovers = manager.leftover(&input);
        assert_eq!(leftovers.len(), 2);
        let decoded = manager.decode_case(&matrix, &leftovers).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_descriptions_rebuild_equivalent_manager() {
        let manager = fitted();
        let rebuilt = CodecManager::from_descriptions(&manager.descriptions()).unwrap();
        assert!(rebuilt.is_finalized());
        assert_eq!(rebuilt.output_columns(), manager.output_columns());
        assert_eq!(rebuilt.decoded_columns(), vec!["case", "activity", "time", "cost"]);

        let input = rows();
        assert_eq!(
            rebuilt.encode_case(&input).unwrap(),
            manager.encode_case(&input).unwrap()
        );
    }

    #[test]
    fn test_missing_activity_codec_is_configuration_error() {
        let manager = CodecManager::new(vec![Box::new(OneHotCodec::new(4, false))]).unwrap();
        assert!(matches!(
            manager.activity_codec(),
            Err(CodecError::Configuration(_))
        ));
    }
}
