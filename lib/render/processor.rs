use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use tracing::debug;

use crate::{
    config::KernelConfig,
    error::{rethrow_as_library_error, KernelError, ProblemPart},
    object::{FieldValue, Object},
    runtime::ContextUpdater,
};

use super::{ExecutionHost, RendererTypeHandler};

const METHOD_PREFIX: &str = "___renderResult";
const PARAM_NAME: &str = "___value";

#[derive(Clone)]
struct HandlerWithInfo {
    handler: Rc<dyn RendererTypeHandler>,
    /// Set when the handler lives in the session as a generated function.
    id: Option<usize>,
}

/// A renderer that was prepared but not registered yet.
pub struct PendingRenderer {
    info: HandlerWithInfo,
    code: Option<String>,
}

impl PendingRenderer {
    /// Snippet defining the generated function, for precompiled handlers.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// Ordered registry of renderers. A value is rendered by repeatedly applying
/// the first renderer that accepts its type until none does.
pub struct TypeRenderersProcessor {
    context_updater: Rc<ContextUpdater>,
    counter: Cell<usize>,
    renderers: RefCell<Vec<HandlerWithInfo>>,
    max_steps: usize,
}

impl TypeRenderersProcessor {
    pub fn new(context_updater: Rc<ContextUpdater>, config: &KernelConfig) -> Self {
        Self {
            context_updater,
            counter: Cell::new(0),
            renderers: RefCell::new(vec![]),
            max_steps: config.max_render_steps,
        }
    }

    pub fn method_name(id: usize) -> String {
        format!("{METHOD_PREFIX}{id}")
    }

    /// Adds `handler` after every renderer registered so far. When the handler
    /// can be precompiled the returned snippet must be evaluated before the
    /// handler first matches.
    pub fn register(&self, handler: Rc<dyn RendererTypeHandler>) -> Option<String> {
        let pending = self.prepare(handler);
        let code = pending.code.clone();
        self.commit(pending);
        code
    }

    /// Precompiles `handler` without registering it. Nothing changes until the
    /// result is passed to [`commit`](Self::commit).
    pub fn prepare(&self, handler: Rc<dyn RendererTypeHandler>) -> PendingRenderer {
        let id = self.counter.get();
        let code = handler
            .as_precompiled()
            .filter(|precompiled| precompiled.may_be_precompiled())
            .and_then(|precompiled| precompiled.precompile(&Self::method_name(id), PARAM_NAME));
        let id = code.as_ref().map(|_| id);

        PendingRenderer {
            info: HandlerWithInfo { handler, id },
            code,
        }
    }

    pub fn commit(&self, pending: PendingRenderer) {
        let PendingRenderer { info, .. } = pending;
        if let Some(id) = info.id {
            self.counter.set(id + 1);
        }
        debug!(position = self.len(), precompiled = info.id.is_some(), "registered renderer");
        self.renderers.borrow_mut().push(info);
    }

    pub fn register_without_precompiling(&self, handler: Rc<dyn RendererTypeHandler>) {
        debug!(position = self.len(), precompiled = false, "registered renderer");
        self.renderers
            .borrow_mut()
            .push(HandlerWithInfo { handler, id: None });
    }

    pub fn len(&self) -> usize {
        self.renderers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render_value(
        &self,
        host: &dyn ExecutionHost,
        value: Option<Object>,
    ) -> Result<Option<Object>, KernelError> {
        match value {
            None => Ok(None),
            Some(value) => self.render_result(host, FieldValue::of(value)),
        }
    }

    pub fn render_result(
        &self,
        host: &dyn ExecutionHost,
        field: FieldValue,
    ) -> Result<Option<Object>, KernelError> {
        let mut current = field;
        let mut steps = 0;

        loop {
            let value = match &current.value {
                None | Some(Object::Null) => return Ok(None),
                Some(value) => value.clone(),
            };

            let object_type = value.object_type();
            let matched = self
                .renderers
                .borrow()
                .iter()
                .find(|info| info.handler.accepts_type(object_type))
                .cloned();
            let Some(HandlerWithInfo { handler, id }) = matched else {
                return Ok(Some(value));
            };

            if steps == self.max_steps {
                return Err(KernelError::InternalConsistency(format!(
                    "rendering a {object_type} value did not finish after {} renderer applications",
                    self.max_steps
                )));
            }
            steps += 1;

            self.context_updater.update();
            current = match id {
                None => {
                    debug!(%object_type, "applying inline renderer");
                    rethrow_as_library_error(ProblemPart::Renderers, || {
                        handler.execute(host, current)
                    })?
                }
                Some(id) => {
                    let method_name = Self::method_name(id);
                    let info = self.context_updater.function(&method_name).ok_or_else(|| {
                        KernelError::InternalConsistency(format!(
                            "renderer method {method_name} is not defined in the session"
                        ))
                    })?;
                    debug!(%object_type, method = %method_name, line = %info.line, "calling precompiled renderer");
                    let rendered = rethrow_as_library_error(ProblemPart::Renderers, || {
                        self.context_updater.call(&info, vec![value])
                    })?;
                    FieldValue::of(rendered)
                }
            };
        }
    }
}
