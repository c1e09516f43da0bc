//! Drop a column from the numeric output, keeping its value as a leftover.

use super::{Codec, CodecError, CodecKind, ColumnBinding, Property};
use crate::common::{Matrix, Row, Value};

/// Emits no numeric column. The first row's raw value travels as the case's
/// leftover and decoding rebuilds a constant column from it.
#[derive(Debug, Clone)]
pub struct DeleteCodec {
    binding: ColumnBinding,
    finalized: bool,
}

impl DeleteCodec {
    pub fn new(column: usize) -> Self {
        Self {
            binding: ColumnBinding::single(column),
            finalized: false,
        }
    }
}

impl Codec for DeleteCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Delete
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
        Vec::new()
    }

    fn leftover_name(&self) -> Option<String> {
        Some(self.name())
    }

    fn encode(&self, rows: &[Row]) -> Result<Matrix, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        Ok(Matrix::zeros(rows.len(), 0))
    }

    fn leftover(&self, rows: &[Row]) -> Option<Value> {
        Some(
            rows.first()
                .map(|row| row[self.binding.id()].clone())
                .unwrap_or(Value::Empty),
        )
    }

    fn decode(&self, block: &Matrix, leftover: Option<&Value>) -> Result<Vec<Value>, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        let value = leftover.ok_or_else(|| CodecError::MissingLeftover(self.name()))?;
        Ok(vec![value.clone(); block.rows()])
    }

    fn decode_prediction(
        &self,
        _prefix: &Matrix,
        _prediction: &[f64],
        leftover: Option<&Value>,
    ) -> Result<Value, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        leftover
            .cloned()
            .ok_or_else(|| CodecError::MissingLeftover(self.name()))
    }

    fn properties(&self) -> Vec<Property> {
        Vec::new()
    }

    fn set_properties(&mut self, _properties: &[Property]) -> Result<(), CodecError> {
        self.finalized = true;
        Ok(())
    }
}
