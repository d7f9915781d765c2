use anyhow::{anyhow, Result};

use crate::object::{FieldValue, Object, ObjectType};

use super::{ExecutionHost, PrecompiledRendererTypeHandler, RendererTypeHandler, TypeMatcher};

/// Placeholder that stands for the rendered value in a [`CodeRenderer`] body.
const VALUE_PLACEHOLDER: &str = "$it";
const INLINE_PARAM: &str = "___it";

type RenderFn = dyn Fn(&dyn ExecutionHost, FieldValue) -> Result<FieldValue>;

/// Renderer implemented in Rust. Never precompiled.
pub struct InlineRenderer {
    matcher: Box<dyn TypeMatcher>,
    render: Box<RenderFn>,
}

impl InlineRenderer {
    pub fn new(
        matcher: impl TypeMatcher + 'static,
        render: impl Fn(&dyn ExecutionHost, FieldValue) -> Result<FieldValue> + 'static,
    ) -> Self {
        Self {
            matcher: Box::new(matcher),
            render: Box::new(render),
        }
    }
}

impl RendererTypeHandler for InlineRenderer {
    fn accepts_type(&self, object_type: ObjectType) -> bool {
        self.matcher.accepts(object_type)
    }

    fn execute(&self, host: &dyn ExecutionHost, value: FieldValue) -> Result<FieldValue> {
        (self.render)(host, value)
    }
}

/// Renderer written in the snippet language. The body is an expression in
/// which `$it` refers to the value being rendered, e.g. `"<" + str($it) + ">"`.
pub struct CodeRenderer {
    matcher: Box<dyn TypeMatcher>,
    body: String,
}

impl CodeRenderer {
    pub fn new(matcher: impl TypeMatcher + 'static, body: impl Into<String>) -> Self {
        Self {
            matcher: Box::new(matcher),
            body: body.into(),
        }
    }

    fn function_source(&self, param_name: &str) -> String {
        format!(
            "fn({param_name}) {{ {} }}",
            self.body.replace(VALUE_PLACEHOLDER, param_name)
        )
    }
}

impl RendererTypeHandler for CodeRenderer {
    fn accepts_type(&self, object_type: ObjectType) -> bool {
        self.matcher.accepts(object_type)
    }

    fn execute(&self, host: &dyn ExecutionHost, value: FieldValue) -> Result<FieldValue> {
        let function = host
            .execute(&self.function_source(INLINE_PARAM))?
            .ok_or(anyhow!("renderer body did not produce a function"))?;
        let argument = value.value.unwrap_or(Object::Null);
        let rendered = host.call(&function, vec![argument])?;
        Ok(FieldValue::of(rendered))
    }

    fn as_precompiled(&self) -> Option<&dyn PrecompiledRendererTypeHandler> {
        Some(self)
    }
}

impl PrecompiledRendererTypeHandler for CodeRenderer {
    fn precompile(&self, method_name: &str, param_name: &str) -> Option<String> {
        Some(format!(
            "let {method_name} = {};",
            self.function_source(param_name)
        ))
    }
}
