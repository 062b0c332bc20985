use plotters::drawing::DrawingAreaErrorKind;
use thiserror::Error;

/// Everything that can abort a diagnostics run.
///
/// Degenerate statistics (constant columns, zero means) are not errors: they
/// surface as NaN or infinite values and show up as gaps in the figures.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("invalid variable name `{name}` (schema has: {known})")]
    InvalidVariable { name: String, known: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("plotting failed: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, DiagnosticsError>;

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for DiagnosticsError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        DiagnosticsError::Plot(err.to_string())
    }
}

impl From<ndarray::ShapeError> for DiagnosticsError {
    fn from(err: ndarray::ShapeError) -> Self {
        DiagnosticsError::ShapeMismatch(err.to_string())
    }
}

/// Fail with `ShapeMismatch` unless both arrays have the same dimensions.
pub(crate) fn ensure_same_shape(what: &str, a: &[usize], b: &[usize]) -> Result<()> {
    if a != b {
        return Err(DiagnosticsError::ShapeMismatch(format!(
            "{what}: {a:?} vs {b:?}"
        )));
    }
    Ok(())
}
