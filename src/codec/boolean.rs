use super::{Codec, CodecError, CodecKind, ColumnBinding, Property};
use crate::common::{Matrix, Row, Value};

/// `1.0` / `0.0` for truthy / falsy cells; decodes with a `0.5` threshold.
#[derive(Debug, Clone)]
pub struct BooleanCodec {
    binding: ColumnBinding,
    finalized: bool,
}

impl BooleanCodec {
    pub fn new(column: usize) -> Self {
        Self {
            binding: ColumnBinding::single(column),
            finalized: false,
        }
    }

    fn render(x: f64) -> Value {
        Value::text(if x >= 0.5 { "True" } else { "False" })
    }
}

impl Codec for BooleanCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Boolean
    }

    fn binding(&self) -> &ColumnBinding {
        &self.binding
    }

    fn binding_mut(&mut self) -> &mut ColumnBinding {
        &mut self.binding
    }

    fn finalize(&mut self) -> Result<(), CodecError> {
        if self.finalized {
            return Err(CodecError::AlreadyFinalized(self.name()));
        }
        self.finalized = true;
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn output_columns(&self) -> Vec<String> {
        vec![self.binding.name()]
    }

    fn encode(&self, rows: &[Row]) -> Result<Matrix, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        let column = self.binding.id();
        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            let flag = row[column]
                .as_bool()
                .ok_or_else(|| CodecError::InvalidValue {
                    codec: self.name(),
                    value: row[column].key(),
                    expected: "a boolean",
                })?;
            data.push(if flag { 1.0 } else { 0.0 });
        }
        Ok(Matrix::from_flat(rows.len(), 1, data))
    }

    fn decode(&self, block: &Matrix, _leftover: Option<&Value>) -> Result<Vec<Value>, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        Ok((0..block.rows())
            .map(|r| Self::render(block.get(r, 0)))
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
        Ok(Self::render(prediction.first().copied().unwrap_or(0.0)))
    }

    fn properties(&self) -> Vec<Property> {
        Vec::new()
    }

    fn set_properties(&mut self, _properties: &[Property]) -> Result<(), CodecError> {
        self.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut codec = BooleanCodec::new(2);
        codec.finalize().unwrap();
        let rows: Vec<Row> = ["True", "False", "1", ""]
            .iter()
            .map(|v| vec![Value::text("c"), Value::text("a"), Value::text(v)])
            .collect();

        let block = codec.encode(&rows).unwrap();
        assert_eq!(block.as_slice(), &[1.0, 0.0, 1.0, 0.0]);

        let decoded = codec.decode(&block, None).unwrap();
        assert_eq!(
            decoded,
            vec![
                Value::text("True"),
                Value::text("False"),
                Value::text("True"),
                Value::text("False"),
            ]
        );
    }

    #[test]
    fn test_threshold() {
        let mut codec = BooleanCodec::new(0);
        codec.finalize().unwrap();
        let prefix = Matrix::zeros(0, 1);
        assert_eq!(
            codec.decode_prediction(&prefix, &[0.5], None).unwrap(),
            Value::text("True")
        );
        assert_eq!(
            codec.decode_prediction(&prefix, &[0.49], None).unwrap(),
            Value::text("False")
        );
    }

    #[test]
    fn test_decode_before_finalize() {
        let codec = BooleanCodec::new(0);
        let block = Matrix::from_flat(1, 1, vec![1.0]);
        assert!(matches!(codec.decode(&block, None), Err(CodecError::NotReady(_))));
        assert!(matches!(
            codec.decode_prediction(&Matrix::zeros(0, 1), &[1.0], None),
            Err(CodecError::NotReady(_))
        ));
    }

    #[test]
    fn test_rejects_non_boolean() {
        let mut codec = BooleanCodec::new(0);
        codec.finalize().unwrap();
        let err = codec.encode(&[vec![Value::text("maybe")]]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { .. }));
    }
}
