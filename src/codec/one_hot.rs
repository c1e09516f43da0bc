//! Categorical one-hot codec.
//!
//! The vocabulary is the sorted set of every non-empty string key seen during
//! the statistics pass. Activity codecs may additionally receive synthetic
//! tokens from case editors; those are sorted separately and occupy the
//! first indices. An empty cell encodes to an all-zero row.

use std::collections::{BTreeSet, HashMap};

use super::{Codec, CodecError, CodecKind, ColumnBinding, Property};
use crate::common::{argmax, Matrix, Row, Value};

#[derive(Debug, Clone)]
pub struct OneHotCodec {
    binding: ColumnBinding,
    activity: bool,
    seen: BTreeSet<String>,
    tokens: BTreeSet<String>,
    vocabulary: Vec<String>,
    index: HashMap<String, usize>,
    finalized: bool,
}

impl OneHotCodec {
    pub fn new(column: usize, activity: bool) -> Self {
        Self {
            binding: ColumnBinding::single(column),
            activity,
            seen: BTreeSet::new(),
            tokens: BTreeSet::new(),
            vocabulary: Vec::new(),
            index: HashMap::new(),
            finalized: false,
        }
    }

    /// Finalized vocabulary; position `i` is output column `i`.
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    fn install(&mut self, vocabulary: Vec<String>) {
        self.index = vocabulary
            .iter()
            .enumerate()
            .map(|(i, token)| (token.clone(), i))
            .collect();
        self.vocabulary = vocabulary;
        self.finalized = true;
    }

    fn lookup(&self, key: &str) -> Result<usize, CodecError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| CodecError::UnknownCategory {
                codec: self.name(),
                value: key.to_string(),
            })
    }

    /// Score vectors must carry one entry per token of a non-empty vocabulary.
    fn check_width(&self, width: usize) -> Result<(), CodecError> {
        if self.vocabulary.is_empty() || width != self.vocabulary.len() {
            return Err(CodecError::InvalidValue {
                codec: self.name(),
                value: format!("{width} scores for {} tokens", self.vocabulary.len()),
                expected: "one score per vocabulary token",
            });
        }
        Ok(())
    }

    fn decode_row(&self, row: &[f64]) -> Value {
        if row.iter().all(|&v| v == 0.0) {
            return Value::Empty;
        }
        Value::text(&self.vocabulary[argmax(row)])
    }
}

impl Codec for OneHotCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::OneHot
    }

    fn binding(&self) -> &ColumnBinding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut ColumnBinding {
        &mut self.binding
    }

    fn accumulate(&mut self, chunk: &[Row]) -> Result<(), CodecError> {
        let column = self.binding.id();
        for row in chunk {
            let key = row[column].key();
            if !key.is_empty() {
                self.seen.insert(key);
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CodecError> {
        if self.finalized {
            return Err(CodecError::AlreadyFinalized(self.name()));
        }
        let mut vocabulary: Vec<String> = self.tokens.iter().cloned().collect();
        vocabulary.extend(
            std::mem::take(&mut self.seen)
                .into_iter()
                .filter(|key| !self.tokens.contains(key)),
        );
        self.install(vocabulary);
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn widen_vocabulary(&mut self, tokens: &BTreeSet<String>) {
        if self.activity && !self.finalized {
            self.tokens.extend(tokens.iter().cloned());
        }
    }

    fn is_activity(&self) -> bool {
        self.activity
    }

    fn output_columns(&self) -> Vec<String> {
        self.vocabulary.clone()
    }

    fn encode(&self, rows: &[Row]) -> Result<Matrix, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        let column = self.binding.id();
        let mut out = Matrix::zeros(rows.len(), self.vocabulary.len());
        for (r, row) in rows.iter().enumerate() {
            let key = row[column].key();
            if key.is_empty() {
                continue;
            }
            out.set(r, self.lookup(&key)?, 1.0);
        }
        Ok(out)
    }

    fn decode(&self, block: &Matrix, _leftover: Option<&Value>) -> Result<Vec<Value>, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        if block.cols() != self.vocabulary.len() {
            return Err(CodecError::InvalidValue {
                codec: self.name(),
                value: format!(
                    "{} columns for {} tokens",
                    block.cols(),
                    self.vocabulary.len()
                ),
                expected: "one column per vocabulary token",
            });
        }
        Ok((0..block.rows())
            .map(|r| self.decode_row(block.row(r)))
            .collect())
    }

    fn decode_prediction(
        &self,
        _prefix: &Matrix,
        prediction: &[f64],
        _leftover: Option<&Value>,
    ) -> Result<Value, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        self.check_width(prediction.len())?;
        // Model outputs are scores, so the zero-row rule does not apply here.
        Ok(Value::text(&self.vocabulary[argmax(prediction)]))
    }

    fn properties(&self) -> Vec<Property> {
        self.vocabulary
            .iter()
            .map(|token| Property::Text(token.clone()))
            .collect()
    }

    fn set_properties(&mut self, properties: &[Property]) -> Result<(), CodecError> {
        let vocabulary = properties.iter().map(Property::as_text).collect();
        self.install(vocabulary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&str]) -> Vec<Row> {
        values
            .iter()
            .map(|v| vec![Value::text("c"), Value::text(v)])
            .collect()
    }

    fn fitted(chunks: &[&[&str]]) -> OneHotCodec {
        let mut codec = OneHotCodec::new(1, true);
        for chunk in chunks {
            codec.accumulate(&rows(chunk)).unwrap();
        }
        codec.finalize().unwrap();
        codec
    }

    #[test]
    fn test_vocabulary_sorted_and_chunk_independent() {
        let whole = fitted(&[&["start", "mid", "end", "start"]]);
        let split = fitted(&[&["start"], &["mid", "end"], &["start"]]);
        assert_eq!(whole.vocabulary(), &["end", "mid", "start"]);
        assert_eq!(whole.vocabulary(), split.vocabulary());
    }

    #[test]
    fn test_tokens_placed_first() {
        let mut codec = OneHotCodec::new(1, true);
        codec.accumulate(&rows(&["b", "a"])).unwrap();
        let tokens: BTreeSet<String> = ["SoS", "EoS"].iter().map(|s| s.to_string()).collect();
        codec.widen_vocabulary(&tokens);
        codec.finalize().unwrap();
        assert_eq!(codec.vocabulary(), &["EoS", "SoS", "a", "b"]);
    }

    #[test]
    fn test_covariate_ignores_tokens() {
        let mut codec = OneHotCodec::new(4, false);
        codec.widen_vocabulary(&BTreeSet::from(["SoS".to_string()]));
        codec.finalize().unwrap();
        assert!(codec.vocabulary().is_empty());
    }

    #[test]
    fn test_round_trip_with_empty_cell() {
        let codec = fitted(&[&["x", "y", ""]]);
        assert_eq!(codec.vocabulary(), &["x", "y"]);

        let input = rows(&["y", "", "x"]);
        let block = codec.encode(&input).unwrap();
        assert_eq!(block.as_slice(), &[0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);

        let decoded = codec.decode(&block, None).unwrap();
        assert_eq!(decoded, vec![Value::text("y"), Value::Empty, Value::text("x")]);
    }

    #[test]
    fn test_unknown_category_is_reported() {
        let codec = fitted(&[&["x"]]);
        let err = codec.encode(&rows(&["z"])).unwrap_err();
        assert!(matches!(err, CodecError::UnknownCategory { ref value, .. } if value == "z"));
    }

    #[test]
    fn test_argmax_ties_resolve_to_first_entry() {
        let codec = fitted(&[&["a", "b", "c"]]);
        let block = Matrix::from_flat(1, 3, vec![0.0, 0.5, 0.5]);
        assert_eq!(codec.decode(&block, None).unwrap(), vec![Value::text("b")]);
        let predicted = codec
            .decode_prediction(&Matrix::zeros(0, 3), &[0.1, 0.1, 0.1], None)
            .unwrap();
        assert_eq!(predicted, Value::text("a"));
    }

    #[test]
    fn test_prediction_width_must_match_vocabulary() {
        let codec = fitted(&[&["a", "b"]]);
        let prefix = Matrix::zeros(0, 2);
        assert!(matches!(
            codec.decode_prediction(&prefix, &[0.1, 0.2, 0.9], None),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            codec.decode(&Matrix::from_flat(1, 3, vec![0.0, 0.0, 1.0]), None),
            Err(CodecError::InvalidValue { .. })
        ));

        let empty = fitted(&[]);
        assert!(matches!(
            empty.decode_prediction(&Matrix::zeros(0, 0), &[], None),
            Err(CodecError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_decode_before_finalize() {
        let codec = OneHotCodec::new(1, true);
        assert!(matches!(
            codec.decode(&Matrix::zeros(1, 0), None),
            Err(CodecError::NotReady(_))
        ));
        assert!(matches!(
            codec.decode_prediction(&Matrix::zeros(0, 0), &[1.0], None),
            Err(CodecError::NotReady(_))
        ));
    }

    #[test]
    fn test_properties_restore_vocabulary() {
        let codec = fitted(&[&["10", "9"]]);
        let mut restored = OneHotCodec::new(1, true);
        restored.set_properties(&codec.properties()).unwrap();
        assert!(restored.is_finalized());
        assert_eq!(restored.vocabulary(), codec.vocabulary());
    }
}
