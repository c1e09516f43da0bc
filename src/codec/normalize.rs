//! Min-max normalization of a quantitative column.

use super::{Codec, CodecError, CodecKind, ColumnBinding, Property};
use crate::common::{Matrix, Row, Value};

/// Scales values into `[0, 1]` with the global min/max of the statistics pass.
///
/// Missing cells read as `0.0`. A column with zero range encodes to `0.0`
/// everywhere (the NaN of `0/0` is replaced after scaling, not before).
#[derive(Debug, Clone)]
pub struct NormalizeCodec {
    binding: ColumnBinding,
    range: Option<(f64, f64)>,
    finalized: bool,
}

impl NormalizeCodec {
    pub fn new(column: usize) -> Self {
        Self {
            binding: ColumnBinding::single(column),
            range: None,
            finalized: false,
        }
    }

    /// Accumulated `(min, max)`; `None` until a value has been seen.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    fn bounds(&self) -> (f64, f64) {
        self.range.unwrap_or((0.0, 0.0))
    }

    fn read(&self, value: &Value) -> Result<f64, CodecError> {
        value.as_f64().ok_or_else(|| CodecError::InvalidValue {
            codec: self.name(),
            value: value.key(),
            expected: "a number",
        })
    }

    fn scale(&self, x: f64) -> f64 {
        let (min, max) = self.bounds();
        let scaled = (x - min) / (max - min);
        if scaled.is_finite() {
            scaled
        } else {
            0.0
        }
    }

    fn unscale(&self, x: f64) -> f64 {
        let (min, max) = self.bounds();
        x * (max - min) + min
    }
}

/// Render a decoded number, dropping the fractional part when it is zero.
pub(crate) fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        x.to_string()
    }
}

impl Codec for NormalizeCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Normalize
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
            let x = self.read(&row[column])?;
            self.range = Some(match self.range {
                None => (x, x),
                Some((min, max)) => (min.min(x), max.max(x)),
            });
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CodecError> {
        if self.finalized {
            return Err(CodecError::AlreadyFinalized(self.name()));
        }
        self.range = Some(self.bounds());
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
        let data = rows
            .iter()
            .map(|row| self.read(&row[column]).map(|x| self.scale(x)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Matrix::from_flat(rows.len(), 1, data))
    }

    fn decode(&self, block: &Matrix, _leftover: Option<&Value>) -> Result<Vec<Value>, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        Ok((0..block.rows())
            .map(|r| Value::Text(format_number(self.unscale(block.get(r, 0)))))
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
        let x = prediction.first().copied().unwrap_or(0.0);
        Ok(Value::Text(format_number(self.unscale(x))))
    }

    fn properties(&self) -> Vec<Property> {
        let (min, max) = self.bounds();
        vec![Property::Float(min), Property::Float(max)]
    }

    fn set_properties(&mut self, properties: &[Property]) -> Result<(), CodecError> {
        let bounds: Option<Vec<f64>> = properties.iter().map(Property::as_f64).collect();
        match bounds.as_deref() {
            Some([min, max]) => {
                self.range = Some((*min, *max));
                self.finalized = true;
                Ok(())
            }
            _ => Err(CodecError::InvalidProperties {
                codec: self.name(),
                reason: format!("expected [min, max], got {properties:?}"),
            }),
        }
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

    #[test]
    fn test_round_trip() {
        let mut codec = NormalizeCodec::new(1);
        codec.accumulate(&rows(&["10", "20", "15.5"])).unwrap();
        codec.finalize().unwrap();

        let block = codec.encode(&rows(&["10", "20", "15.5"])).unwrap();
        assert_eq!(block.as_slice(), &[0.0, 1.0, 0.55]);

        let decoded = codec.decode(&block, None).unwrap();
        let numbers: Vec<f64> = decoded.iter().map(|v| v.as_f64().unwrap()).collect();
        for (got, want) in numbers.iter().zip([10.0, 20.0, 15.5]) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
        assert_eq!(decoded[0], Value::text("10"));
    }

    #[test]
    fn test_range_widens_and_ignores_chunk_order() {
        let mut forward = NormalizeCodec::new(1);
        forward.accumulate(&rows(&["5", "7"])).unwrap();
        assert_eq!(forward.range(), Some((5.0, 7.0)));
        forward.accumulate(&rows(&["-1"])).unwrap();
        assert_eq!(forward.range(), Some((-1.0, 7.0)));
        forward.accumulate(&rows(&["6"])).unwrap();
        assert_eq!(forward.range(), Some((-1.0, 7.0)));

        let mut backward = NormalizeCodec::new(1);
        backward.accumulate(&rows(&["6"])).unwrap();
        backward.accumulate(&rows(&["-1"])).unwrap();
        backward.accumulate(&rows(&["5", "7"])).unwrap();
        assert_eq!(forward.range(), backward.range());
    }

    #[test]
    fn test_zero_range_encodes_to_zero() {
        let mut codec = NormalizeCodec::new(1);
        codec.accumulate(&rows(&["3", "3"])).unwrap();
        codec.finalize().unwrap();
        let block = codec.encode(&rows(&["3"])).unwrap();
        assert_eq!(block.as_slice(), &[0.0]);
    }

    #[test]
    fn test_missing_reads_as_zero_and_text_is_rejected() {
        let mut codec = NormalizeCodec::new(1);
        codec.accumulate(&rows(&["", "4"])).unwrap();
        assert_eq!(codec.range(), Some((0.0, 4.0)));
        assert!(matches!(
            codec.accumulate(&rows(&["four"])),
            Err(CodecError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_decode_before_finalize() {
        let codec = NormalizeCodec::new(1);
        let block = Matrix::from_flat(1, 1, vec![0.5]);
        assert!(matches!(codec.decode(&block, None), Err(CodecError::NotReady(_))));
        assert!(matches!(
            codec.decode_prediction(&Matrix::zeros(0, 1), &[0.5], None),
            Err(CodecError::NotReady(_))
        ));
    }

    #[test]
    fn test_properties_restore_bounds() {
        let mut restored = NormalizeCodec::new(1);
        restored
            .set_properties(&[Property::Int(2), Property::Float(4.0)])
            .unwrap();
        assert_eq!(restored.properties(), vec![Property::Float(2.0), Property::Float(4.0)]);
        assert!(restored.set_properties(&[Property::Int(1)]).is_err());
    }
}
