//! Inter-event time deltas.
//!
//! Each row encodes the number of seconds since the previous event of the
//! same case, divided by the largest such delta observed in the file. The
//! first event of a case encodes to `0` and its absolute date is kept as the
//! case's leftover, so decoding is a cumulative sum from that date.

use chrono::{Duration, NaiveDateTime};

use super::{row_case_id, Codec, CodecError, CodecKind, ColumnBinding, Property};
use crate::common::{Matrix, Row, Value};

#[derive(Debug, Clone)]
pub struct TimeDeltaCodec {
    binding: ColumnBinding,
    /// Largest same-case delta in whole seconds.
    max_delta: i64,
    /// Last row of the previous chunk, so a case straddling the boundary
    /// contributes its delta.
    previous: Option<(String, NaiveDateTime)>,
    finalized: bool,
}

impl TimeDeltaCodec {
    pub fn new(column: usize) -> Self {
        Self {
            binding: ColumnBinding::single(column),
            max_delta: 0,
            previous: None,
            finalized: false,
        }
    }

    pub fn max_delta(&self) -> i64 {
        self.max_delta
    }

    fn read(&self, value: &Value) -> Result<NaiveDateTime, CodecError> {
        value.as_date().ok_or_else(|| CodecError::InvalidValue {
            codec: self.name(),
            value: value.key(),
            expected: "a date",
        })
    }

    fn scale(&self, seconds: i64) -> f64 {
        if self.max_delta == 0 {
            0.0
        } else {
            seconds as f64 / self.max_delta as f64
        }
    }

    /// `date` moved forward by the scaled delta `x`. Out-of-range deltas
    /// (arbitrary model scores, corrupted containers) are reported.
    fn advance(&self, date: NaiveDateTime, x: f64) -> Result<NaiveDateTime, CodecError> {
        let seconds = (x * self.max_delta as f64).round();
        Duration::try_seconds(seconds as i64)
            .filter(|_| seconds.is_finite())
            .and_then(|delta| date.checked_add_signed(delta))
            .ok_or_else(|| CodecError::InvalidValue {
                codec: self.name(),
                value: x.to_string(),
                expected: "a delta within the date range",
            })
    }

    fn start(&self, leftover: Option<&Value>) -> Result<NaiveDateTime, CodecError> {
        let value = leftover.ok_or_else(|| CodecError::MissingLeftover(self.name()))?;
        self.read(value)
    }
}

impl Codec for TimeDeltaCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::TimeDelta
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
            let id = row_case_id(row);
            let date = self.read(&row[column])?;
            if let Some((prev_id, prev_date)) = &self.previous {
                if *prev_id == id {
                    let delta = (date - *prev_date).num_seconds();
                    self.max_delta = self.max_delta.max(delta);
                }
            }
            self.previous = Some((id, date));
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CodecError> {
        if self.finalized {
            return Err(CodecError::AlreadyFinalized(self.name()));
        }
        self.previous = None;
        self.finalized = true;
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn output_columns(&self) -> Vec<String> {
        vec![format!("{}_delta", self.binding.name())]
    }

    fn leftover_name(&self) -> Option<String> {
        Some(self.name())
    }

    fn encode(&self, rows: &[Row]) -> Result<Matrix, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        let column = self.binding.id();
        let mut data = Vec::with_capacity(rows.len());
        let mut previous: Option<NaiveDateTime> = None;
        for row in rows {
            let date = self.read(&row[column])?;
            let seconds = previous.map_or(0, |prev| (date - prev).num_seconds());
            data.push(self.scale(seconds));
            previous = Some(date);
        }
        Ok(Matrix::from_flat(rows.len(), 1, data))
    }

    fn leftover(&self, rows: &[Row]) -> Option<Value> {
        let column = self.binding.id();
        rows.first()
            .and_then(|row| row[column].as_date())
            .map(Value::Date)
    }

    fn decode(&self, block: &Matrix, leftover: Option<&Value>) -> Result<Vec<Value>, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        let mut current = self.start(leftover)?;
        let mut out = Vec::with_capacity(block.rows());
        for r in 0..block.rows() {
            if r > 0 {
                current = self.advance(current, block.get(r, 0))?;
            }
            out.push(Value::Date(current));
        }
        Ok(out)
    }

    fn decode_prediction(
        &self,
        prefix: &Matrix,
        prediction: &[f64],
        leftover: Option<&Value>,
    ) -> Result<Value, CodecError> {
        if !self.finalized {
            return Err(CodecError::NotReady(self.name()));
        }
        let mut current = self.start(leftover)?;
        // Padding rows hold a zero delta and leave the running date unchanged.
        for r in 1..prefix.rows() {
            current = self.advance(current, prefix.get(r, 0))?;
        }
        let next = self.advance(current, prediction.first().copied().unwrap_or(0.0))?;
        Ok(Value::Date(next))
    }

    fn properties(&self) -> Vec<Property> {
        vec![Property::Int(self.max_delta)]
    }

    fn set_properties(&mut self, properties: &[Property]) -> Result<(), CodecError> {
        match properties {
            [max] => {
                self.max_delta = max.as_i64().ok_or_else(|| CodecError::InvalidProperties {
                    codec: self.name(),
                    reason: format!("max delta {max:?} is not an integer"),
                })?;
                self.finalized = true;
                Ok(())
            }
            _ => Err(CodecError::InvalidProperties {
                codec: self.name(),
                reason: format!("expected [max_delta], got {properties:?}"),
            }),
        }
    }
}
