pub mod binding;
pub mod compiler;
pub mod error;
pub mod ins;
pub mod meta;
pub mod token;

pub use compiler::{recompile, CompiledShader, Compiler};
pub use error::{CompilerError, Result};
