pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod render;
pub mod repl;
pub mod runtime;
pub mod snippet;

mod ast;
mod token;

pub use config::KernelConfig;
pub use error::KernelError;
pub use repl::{EvalReply, Repl};

/// Creates a session with default settings.
pub fn new_repl() -> Result<Repl, KernelError> {
    Repl::new(&KernelConfig::default())
}
