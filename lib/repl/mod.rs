mod archive;
mod class_writer;
mod evaluator;

pub use archive::ScriptArchive;
pub use class_writer::ClassWriter;
pub use evaluator::{InternalEvalResult, InternalEvaluator};

use std::{path::PathBuf, rc::Rc};

use crate::{
    compiler::{SerializedUnit, SnippetCompiler},
    config::KernelConfig,
    error::KernelError,
    object::Object,
    render::{ExecutionHost, RendererTypeHandler, TypeRenderersProcessor},
    runtime::{ContextUpdater, ExecutionContext, Runtime, SharedRuntime, SnippetEvaluator},
    snippet::SnippetId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReply {
    pub snippet: SnippetId,
    /// The rendered result, `None` for snippets without a value.
    pub rendered: Option<Object>,
}

/// A snippet session: evaluates code, renders results and keeps the
/// renderer registry in step with the session's functions.
pub struct Repl {
    evaluator: InternalEvaluator,
    renderers: TypeRenderersProcessor,
    context_updater: Rc<ContextUpdater>,
    runtime: SharedRuntime,
}

impl Repl {
    pub fn new(config: &KernelConfig) -> Result<Self, KernelError> {
        let runtime = Runtime::shared(config.max_call_depth);
        let context_updater = Rc::new(ContextUpdater::new(runtime.clone()));
        let evaluator = InternalEvaluator::new(
            Box::new(SnippetCompiler::new(config)),
            Box::new(SnippetEvaluator::new(runtime.clone())),
            context_updater.clone(),
            config,
        )?;
        let renderers = TypeRenderersProcessor::new(context_updater.clone(), config);

        Ok(Self {
            evaluator,
            renderers,
            context_updater,
            runtime,
        })
    }

    pub fn eval(&self, code: &str) -> Result<EvalReply, KernelError> {
        let mut snippet = None;
        let result = self
            .evaluator
            .eval(code, Some(&mut |id: SnippetId| snippet = Some(id)))?;
        let snippet = snippet.ok_or_else(|| {
            KernelError::InternalConsistency("snippet id was never assigned".to_string())
        })?;

        let rendered = self.renderers.render_result(self, result.result_value)?;
        Ok(EvalReply { snippet, rendered })
    }

    /// Registers `handler` and, when it was precompiled, evaluates its
    /// generated function right away. A handler whose function fails to
    /// evaluate is not registered.
    pub fn register_renderer(&self, handler: Rc<dyn RendererTypeHandler>) -> Result<(), KernelError> {
        let pending = self.renderers.prepare(handler);
        if let Some(code) = pending.code() {
            self.evaluator.eval(code, None)?;
        }
        self.renderers.commit(pending);
        Ok(())
    }

    pub fn register_renderer_without_precompiling(&self, handler: Rc<dyn RendererTypeHandler>) {
        self.renderers.register_without_precompiling(handler);
    }

    pub fn drain_archived_units(&self) -> Vec<SerializedUnit> {
        self.evaluator.drain_archived_units()
    }

    pub fn set_write_compiled_units(&self, enabled: bool) -> Result<(), KernelError> {
        self.evaluator.set_write_compiled_units(enabled)
    }

    pub fn class_output_dir(&self) -> Option<PathBuf> {
        self.evaluator.class_output_dir()
    }

    pub fn context(&self) -> ExecutionContext {
        self.context_updater.context().clone()
    }
}

impl ExecutionHost for Repl {
    fn execute(&self, code: &str) -> Result<Option<Object>, KernelError> {
        Ok(self.evaluator.eval(code, None)?.result_value.value)
    }

    fn call(&self, function: &Object, args: Vec<Object>) -> Result<Object, KernelError> {
        let mut runtime = self
            .runtime
            .try_borrow_mut()
            .map_err(|_| KernelError::ConcurrencyViolation)?;
        runtime
            .call(function, args)
            .map_err(|err| KernelError::EvaluationRuntime {
                message: err.to_string(),
                cause: Some(err),
            })
    }
}
