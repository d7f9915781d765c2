use std::{
    cell::{Ref, RefCell},
    collections::HashMap,
};

use anyhow::{anyhow, Result};
use tracing::trace;

use crate::{object::Object, snippet::SnippetId};

use super::SharedRuntime;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub function: Object,
    pub line: SnippetId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub value: Object,
    pub line: SnippetId,
}

/// Snapshot of every global the session has bound so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub functions: HashMap<String, FunctionInfo>,
    pub variables: HashMap<String, VariableInfo>,
}

/// Keeps an [`ExecutionContext`] in sync with the runtime. Renderers look up
/// their precompiled methods through it.
pub struct ContextUpdater {
    runtime: SharedRuntime,
    context: RefCell<ExecutionContext>,
}

impl ContextUpdater {
    pub fn new(runtime: SharedRuntime) -> Self {
        Self {
            runtime,
            context: RefCell::new(ExecutionContext::default()),
        }
    }

    /// Re-reads the runtime's bindings. Callable values land in `functions`,
    /// everything else in `variables`.
    pub fn update(&self) {
        let runtime = self.runtime.borrow();
        let mut context = self.context.borrow_mut();
        context.functions.clear();
        context.variables.clear();

        for (name, binding, value) in runtime.bindings() {
            let value = value.cloned().unwrap_or(Object::Null);
            if value.is_callable() {
                context.functions.insert(
                    name.clone(),
                    FunctionInfo {
                        function: value,
                        line: binding.line,
                    },
                );
            } else {
                context.variables.insert(
                    name.clone(),
                    VariableInfo {
                        value,
                        line: binding.line,
                    },
                );
            }
        }

        trace!(
            functions = context.functions.len(),
            variables = context.variables.len(),
            "execution context updated"
        );
    }

    pub fn context(&self) -> Ref<'_, ExecutionContext> {
        self.context.borrow()
    }

    pub fn function(&self, name: &str) -> Option<FunctionInfo> {
        self.context.borrow().functions.get(name).cloned()
    }

    pub fn call(&self, info: &FunctionInfo, args: Vec<Object>) -> Result<Object> {
        let mut runtime = self
            .runtime
            .try_borrow_mut()
            .map_err(|_| anyhow!("runtime is busy"))?;
        runtime.call(&info.function, args)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{Compiler, EvalConfig},
        lexer::Lexer,
        parser::Parser,
        runtime::{ReplEvaluator, Runtime, SnippetEvaluator},
    };

    use super::*;

    fn eval_all(runtime: &SharedRuntime, inputs: &[&str]) {
        let mut compiler = Compiler::new();
        let mut evaluator = SnippetEvaluator::new(runtime.clone());
        for (id, input) in inputs.iter().enumerate() {
            let program = Parser::new(Lexer::new(input)).parse_program().unwrap();
            let snippet = SnippetId(id as u32);
            let unit = compiler.compile(snippet, program).unwrap();
            evaluator.eval(
                &unit,
                &EvalConfig {
                    snippet,
                    max_call_depth: 64,
                },
            );
        }
    }

    #[test]
    fn test_update_splits_functions_and_variables() {
        let runtime = Runtime::shared(64);
        let updater = ContextUpdater::new(runtime.clone());
        updater.update();
        assert_eq!(*updater.context(), ExecutionContext::default());

        eval_all(&runtime, &["let a = 1;", "let inc = fn(x) { x + 1 };", "let a = len;"]);
        updater.update();

        let context = updater.context();
        assert_eq!(context.variables.len(), 0);
        assert_eq!(context.functions.len(), 2);
        assert_eq!(context.functions["inc"].line, SnippetId(1));
        assert_eq!(context.functions["a"].line, SnippetId(2));
    }

    #[test]
    fn test_call_through_context() {
        let runtime = Runtime::shared(64);
        let updater = ContextUpdater::new(runtime.clone());
        eval_all(&runtime, &["let inc = fn(x) { x + 1 };"]);

        assert_eq!(updater.function("inc"), None);
        updater.update();

        let info = updater.function("inc").unwrap();
        assert_eq!(
            updater.call(&info, vec![Object::Integer(1)]).unwrap(),
            Object::Integer(2)
        );
    }
}
