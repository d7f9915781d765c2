pub mod code;
mod compiler;
mod symbol_table;
pub mod unit;

pub use compiler::{Checkpoint, Compiler};
pub use unit::{CompiledUnit, CompiledUnitSerializer, Declaration, SerializedUnit};

use tracing::debug;

use crate::{
    config::KernelConfig,
    error::Diagnostic,
    lexer::Lexer,
    parser::Parser,
    snippet::{Snippet, SnippetId},
};

/// Settings the compiler hands to the evaluator together with a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub snippet: SnippetId,
    pub max_call_depth: usize,
}

pub type CompileResult = (Result<CompiledUnit, Vec<Diagnostic>>, EvalConfig);

/// Incremental compiler seen by the evaluation engine. Implementations keep
/// their symbol tables across calls; `next_counter` hands out the ids the
/// snippets are compiled under.
///
/// A successful `compile` stays pending until `commit` or `rollback`. Compiling
/// again commits the pending snippet.
pub trait ReplCompiler {
    fn next_counter(&mut self) -> SnippetId;

    fn compile(&mut self, snippet: &Snippet) -> CompileResult;

    /// Keeps the declarations of the last compiled snippet.
    fn commit(&mut self);

    /// Forgets the last compiled snippet as if it had never been compiled.
    fn rollback(&mut self);
}

/// [`ReplCompiler`] for the bundled snippet language.
pub struct SnippetCompiler {
    compiler: Compiler,
    pending: Option<Checkpoint>,
    next_id: SnippetId,
    max_call_depth: usize,
}

impl SnippetCompiler {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            compiler: Compiler::new(),
            pending: None,
            next_id: SnippetId(0),
            max_call_depth: config.max_call_depth,
        }
    }
}

impl ReplCompiler for SnippetCompiler {
    fn next_counter(&mut self) -> SnippetId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn compile(&mut self, snippet: &Snippet) -> CompileResult {
        let config = EvalConfig {
            snippet: snippet.id,
            max_call_depth: self.max_call_depth,
        };

        let checkpoint = self.compiler.checkpoint();
        let result = Parser::new(Lexer::new(&snippet.source))
            .parse_program()
            .and_then(|program| self.compiler.compile(snippet.id, program))
            .map_err(|err| vec![Diagnostic::error(snippet.id, format!("{err:#}"))]);

        self.pending = result.is_ok().then_some(checkpoint);
        if let Ok(unit) = &result {
            debug!(
                snippet = %snippet.id,
                constants = unit.constants.len(),
                bytes = unit.instructions.len(),
                "compiled snippet"
            );
        }

        (result, config)
    }

    fn commit(&mut self) {
        self.pending = None;
    }

    fn rollback(&mut self) {
        if let Some(checkpoint) = self.pending.take() {
            debug!("rolled back last compiled snippet");
            self.compiler.restore(checkpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_strictly_increasing() {
        let mut compiler = SnippetCompiler::new(&KernelConfig::default());
        let ids: Vec<SnippetId> = (0..4).map(|_| compiler.next_counter()).collect();
        assert_eq!(
            ids,
            vec![SnippetId(0), SnippetId(1), SnippetId(2), SnippetId(3)]
        );
    }

    #[test]
    fn test_parse_errors_become_diagnostics() {
        let mut compiler = SnippetCompiler::new(&KernelConfig::default());
        let id = compiler.next_counter();
        let (result, config) = compiler.compile(&Snippet::new(id, "let = 1"));

        assert_eq!(config.snippet, id);
        assert_eq!(
            result.unwrap_err(),
            vec![Diagnostic::error(id, "expected identifier, found =")]
        );
    }

    fn compile(compiler: &mut SnippetCompiler, source: &str) -> Result<CompiledUnit, Vec<Diagnostic>> {
        let id = compiler.next_counter();
        compiler.compile(&Snippet::new(id, source)).0
    }

    #[test]
    fn test_rollback_forgets_last_snippet() {
        let mut compiler = SnippetCompiler::new(&KernelConfig::default());

        compile(&mut compiler, "let a = 1;").unwrap();
        compiler.commit();
        compile(&mut compiler, "let b = 2;").unwrap();
        compiler.rollback();
        // Nothing is pending any more.
        compiler.rollback();

        assert_eq!(
            compile(&mut compiler, "b").unwrap_err(),
            vec![Diagnostic::error(SnippetId(2), "unresolved reference: b")]
        );
        let unit = compile(&mut compiler, "a").unwrap();
        assert_eq!(unit.constants_offset, 1);
        compiler.commit();
        compiler.rollback();
        assert!(compile(&mut compiler, "a").is_ok());
    }
}
