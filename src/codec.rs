use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{DiagnosticsError, Result};

/// Temperature (or its tendency), one column per level.
pub const TEMPERATURE: &str = "T";
/// Specific humidity (or its tendency), one column per level.
pub const HUMIDITY: &str = "q";

/// One named physical variable and the number of levels it occupies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub levels: usize,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, levels: usize) -> Self {
        Self {
            name: name.into(),
            levels,
        }
    }
}

/// Ordered packing layout of a flat feature vector.
///
/// Variable `i` occupies the contiguous column block that starts right after
/// the blocks of variables `0..i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema")]
pub struct VariableSchema {
    variables: Vec<VariableSpec>,
}

#[derive(Deserialize)]
struct RawSchema {
    variables: Vec<VariableSpec>,
}

impl TryFrom<RawSchema> for VariableSchema {
    type Error = DiagnosticsError;

    fn try_from(raw: RawSchema) -> Result<Self> {
        Self::new(raw.variables)
    }
}

impl VariableSchema {
    pub fn new(variables: Vec<VariableSpec>) -> Result<Self> {
        if variables.is_empty() {
            return Err(DiagnosticsError::InvalidConfig(
                "a variable schema needs at least one variable".to_string(),
            ));
        }
        for (idx, var) in variables.iter().enumerate() {
            if variables[..idx].iter().any(|other| other.name == var.name) {
                return Err(DiagnosticsError::InvalidConfig(format!(
                    "variable `{}` appears twice in the schema",
                    var.name
                )));
            }
        }
        Ok(Self { variables })
    }

    /// The `[T, q]` layout used for both inputs and outputs of the emulator.
    pub fn temperature_humidity(levels: usize) -> Self {
        Self {
            variables: vec![
                VariableSpec::new(TEMPERATURE, levels),
                VariableSpec::new(HUMIDITY, levels),
            ],
        }
    }

    pub fn variables(&self) -> &[VariableSpec] {
        &self.variables
    }

    /// Total number of packed columns.
    pub fn width(&self) -> usize {
        self.variables.iter().map(|v| v.levels).sum()
    }

    pub fn levels_of(&self, name: &str) -> Result<usize> {
        Ok(self.columns(name)?.len())
    }

    /// Column range occupied by `name`.
    pub fn columns(&self, name: &str) -> Result<Range<usize>> {
        let mut start = 0;
        for var in &self.variables {
            if var.name == name {
                return Ok(start..start + var.levels);
            }
            start += var.levels;
        }
        Err(DiagnosticsError::InvalidVariable {
            name: name.to_string(),
            known: self.known_names(),
        })
    }

    fn known_names(&self) -> String {
        self.variables
            .iter()
            .map(|v| v.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.width() {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "packed array has {} columns, schema [{}] needs {}",
                width,
                self.known_names(),
                self.width()
            )));
        }
        Ok(())
    }
}

/// Concatenate per-variable blocks (examples × levels) in schema order.
pub fn pack(schema: &VariableSchema, blocks: &[ArrayView2<'_, f64>]) -> Result<Array2<f64>> {
    if blocks.len() != schema.variables.len() {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "pack got {} blocks for {} variables",
            blocks.len(),
            schema.variables.len()
        )));
    }
    let Some(first) = blocks.first() else {
        return Err(DiagnosticsError::EmptyInput("pack needs at least one variable".to_string()));
    };
    let rows = first.nrows();
    for (block, var) in blocks.iter().zip(&schema.variables) {
        if block.ncols() != var.levels {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "variable `{}` has {} columns, schema expects {}",
                var.name,
                block.ncols(),
                var.levels
            )));
        }
        if block.nrows() != rows {
            return Err(DiagnosticsError::ShapeMismatch(format!(
                "variable `{}` has {} examples, expected {}",
                var.name,
                block.nrows(),
                rows
            )));
        }
    }
    Ok(concatenate(Axis(1), blocks)?)
}

/// Slice the columns of `name` out of a packed (examples × width) array.
pub fn unpack(schema: &VariableSchema, flat: ArrayView2<'_, f64>, name: &str) -> Result<Array2<f64>> {
    let cols = schema.columns(name)?;
    schema.check_width(flat.ncols())?;
    Ok(flat.slice(s![.., cols]).to_owned())
}

/// Axis-0 form of [`unpack`]: one example, or one per-column statistic vector.
pub fn unpack_row(schema: &VariableSchema, row: ArrayView1<'_, f64>, name: &str) -> Result<Array1<f64>> {
    let cols = schema.columns(name)?;
    schema.check_width(row.len())?;
    Ok(row.slice(s![cols]).to_owned())
}

/// Keep only the level indices in `keep` inside every variable block.
///
/// All variables must share one level count, since `keep` indexes that common
/// level axis. Returns the narrowed schema together with the repacked array.
pub fn select_levels(
    schema: &VariableSchema,
    flat: ArrayView2<'_, f64>,
    keep: &[usize],
) -> Result<(VariableSchema, Array2<f64>)> {
    schema.check_width(flat.ncols())?;
    let Some(levels) = schema.variables.first().map(|v| v.levels) else {
        return Err(DiagnosticsError::EmptyInput("level selection on an empty schema".to_string()));
    };
    if schema.variables.iter().any(|v| v.levels != levels) {
        return Err(DiagnosticsError::ShapeMismatch(
            "level selection needs every variable on the same level axis".to_string(),
        ));
    }
    if let Some(bad) = keep.iter().find(|&&idx| idx >= levels) {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "level index {bad} out of range for {levels} levels"
        )));
    }

    let mut columns = Vec::with_capacity(keep.len() * schema.variables.len());
    let mut start = 0;
    for var in &schema.variables {
        columns.extend(keep.iter().map(|idx| start + idx));
        start += var.levels;
    }

    let narrowed = VariableSchema {
        variables: schema
            .variables
            .iter()
            .map(|v| VariableSpec::new(v.name.clone(), keep.len()))
            .collect(),
    };
    Ok((narrowed, flat.select(Axis(1), &columns)))
}

/// Indices of the levels at or below the model top (`lev >= min_level`).
pub fn levels_at_or_above(levels: &[f64], min_level: f64) -> Vec<usize> {
    levels
        .iter()
        .enumerate()
        .filter(|(_, &lev)| lev >= min_level)
        .map(|(idx, _)| idx)
        .collect()
}
