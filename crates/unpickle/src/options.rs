//! Conversion settings.

/// What to do with NaN and infinite floats, which JSON cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonFinite {
    /// Fail with [`ConversionError::NonFiniteFloat`](crate::ConversionError::NonFiniteFloat).
    #[default]
    Reject,
    /// Write `null`.
    Null,
}

/// Options for [`convert_with`](crate::convert_with).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Spaces per nesting level.
    pub indent: usize,
    pub non_finite: NonFinite,
    /// Write through a temporary file in the destination directory and
    /// rename it into place, so a failed run never leaves a partial file.
    pub atomic: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            indent: 4,
            non_finite: NonFinite::Reject,
            atomic: true,
        }
    }
}

impl ConvertOptions {
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_non_finite(mut self, non_finite: NonFinite) -> Self {
        self.non_finite = non_finite;
        self
    }

    pub fn with_atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }
}
