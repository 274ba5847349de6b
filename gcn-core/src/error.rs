use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    /// An ISA feature, operand field or system value the recompiler does not
    /// cover. Reflects coverage gaps, not malformed input; callers are
    /// expected to skip or stub the shader.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// A violated structural invariant in the token list or resource table
    /// (unbalanced nesting, missing fetch shader, ...).
    #[error("structural error: {0}")]
    Structural(String),

    #[error("SPIR-V builder error: {0}")]
    SpirvBuilder(#[from] rspirv::dr::Error),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

#[macro_export]
macro_rules! bail_unsupported {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Unsupported(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_structural {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Structural(format!($($arg)*)))
    };
}
