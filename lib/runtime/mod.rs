pub mod builtins;
mod context;
mod vm;

pub use context::{ContextUpdater, ExecutionContext, FunctionInfo, VariableInfo};
pub use vm::{Thrown, VirtualMachine};

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::{
    compiler::{CompiledUnit, EvalConfig},
    error::Diagnostic,
    object::{CompiledFunction, Object},
    snippet::SnippetId,
};

/// Where a global lives and which snippet last bound it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding {
    pub index: usize,
    pub line: SnippetId,
}

/// State every snippet of a session runs against: the shared constant pool,
/// the global slots and the names bound to them.
#[derive(Debug)]
pub struct Runtime {
    constants: Vec<Object>,
    globals: Vec<Object>,
    bindings: HashMap<String, Binding>,
    max_call_depth: usize,
}

pub type SharedRuntime = Rc<RefCell<Runtime>>;

impl Runtime {
    pub fn new(max_call_depth: usize) -> Self {
        Self {
            constants: vec![],
            globals: vec![],
            bindings: HashMap::new(),
            max_call_depth,
        }
    }

    pub fn shared(max_call_depth: usize) -> SharedRuntime {
        Rc::new(RefCell::new(Self::new(max_call_depth)))
    }

    pub fn global(&self, name: &str) -> Option<Object> {
        let binding = self.bindings.get(name)?;
        self.globals.get(binding.index).cloned()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&String, &Binding, Option<&Object>)> {
        self.bindings
            .iter()
            .map(|(name, binding)| (name, binding, self.globals.get(binding.index)))
    }

    /// Loads `unit` and runs its top-level code. A unit compiled against a
    /// constant pool this runtime never saw is refused without running. A
    /// failed run leaves the constant pool, globals and bindings as they were.
    pub fn run(&mut self, unit: &CompiledUnit, config: &EvalConfig) -> RunOutcome {
        if unit.constants_offset < self.constants.len() {
            return RunOutcome::Skipped(Diagnostic::error(
                unit.snippet,
                format!(
                    "constant pool mismatch: unit starts at {}, runtime holds {}",
                    unit.constants_offset,
                    self.constants.len()
                ),
            ));
        }
        let loaded = self.constants.len();
        // Some earlier unit was compiled but never handed to this runtime.
        if unit.constants_offset > self.constants.len() {
            debug!(
                snippet = %unit.snippet,
                missing = unit.constants_offset - self.constants.len(),
                "padding constant pool"
            );
            self.constants.resize(unit.constants_offset, Object::Null);
        }
        self.constants.extend(unit.constants.iter().cloned());

        let snapshot = self.globals.clone();
        if self.globals.len() < unit.globals_count {
            self.globals.resize(unit.globals_count, Object::Null);
        }

        let main = Rc::new(CompiledFunction {
            instructions: unit.instructions.clone(),
            constants_offset: unit.constants_offset,
            num_locals: 0,
            num_parameters: 0,
        });
        let max_frames = self.max_call_depth.min(config.max_call_depth);
        let result = VirtualMachine::new(&self.constants, &mut self.globals, max_frames).run(main);

        match result {
            Ok(value) => {
                for declaration in unit.declarations.iter() {
                    self.bindings.insert(
                        declaration.name.clone(),
                        Binding {
                            index: declaration.index,
                            line: unit.snippet,
                        },
                    );
                }
                RunOutcome::Finished(value)
            }
            Err(err) => {
                self.globals = snapshot;
                self.constants.truncate(loaded);
                RunOutcome::Failed(err)
            }
        }
    }

    /// Calls a function value outside of any snippet.
    pub fn call(&mut self, function: &Object, args: Vec<Object>) -> Result<Object> {
        if !function.is_callable() {
            return Err(anyhow!("{} is not callable", function.object_type()));
        }
        VirtualMachine::new(&self.constants, &mut self.globals, self.max_call_depth)
            .call(function.clone(), args)
    }
}

pub enum RunOutcome {
    Finished(Option<Object>),
    Failed(anyhow::Error),
    Skipped(Diagnostic),
}

/// Handle on the state a snippet ran in. Lets callers read back what the
/// snippet bound.
#[derive(Debug, Clone)]
pub struct ScriptInstance {
    pub snippet: SnippetId,
    runtime: SharedRuntime,
}

impl ScriptInstance {
    pub fn new(snippet: SnippetId, runtime: SharedRuntime) -> Self {
        Self { snippet, runtime }
    }

    pub fn get(&self, name: &str) -> Option<Object> {
        self.runtime.borrow().global(name)
    }
}

#[derive(Debug)]
pub enum ResultValue {
    /// The snippet ran and produced no value.
    Unit { instance: ScriptInstance },
    Value {
        value: Object,
        declared_type: Option<String>,
        instance: ScriptInstance,
    },
    Error(anyhow::Error),
    /// The snippet was refused before running.
    NotEvaluated,
}

#[derive(Debug)]
pub struct EvalResult {
    pub result: ResultValue,
    pub reports: Vec<Diagnostic>,
}

/// Runs compiled units for the evaluation engine.
pub trait ReplEvaluator {
    fn eval(&mut self, unit: &CompiledUnit, config: &EvalConfig) -> EvalResult;
}

/// [`ReplEvaluator`] backed by the bundled virtual machine.
pub struct SnippetEvaluator {
    runtime: SharedRuntime,
}

impl SnippetEvaluator {
    pub fn new(runtime: SharedRuntime) -> Self {
        Self { runtime }
    }
}

impl ReplEvaluator for SnippetEvaluator {
    fn eval(&mut self, unit: &CompiledUnit, config: &EvalConfig) -> EvalResult {
        let outcome = self.runtime.borrow_mut().run(unit, config);
        let instance = ScriptInstance::new(unit.snippet, self.runtime.clone());

        let (result, reports) = match outcome {
            RunOutcome::Finished(Some(value)) => (
                ResultValue::Value {
                    value,
                    declared_type: unit.declared_type.clone(),
                    instance,
                },
                vec![],
            ),
            RunOutcome::Finished(None) => (ResultValue::Unit { instance }, vec![]),
            RunOutcome::Failed(err) => (ResultValue::Error(err), vec![]),
            RunOutcome::Skipped(diagnostic) => {
                warn!(snippet = %unit.snippet, "{}", diagnostic.message);
                (ResultValue::NotEvaluated, vec![diagnostic])
            }
        };

        EvalResult { result, reports }
    }
}
