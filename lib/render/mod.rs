mod handlers;
mod processor;

pub use handlers::{CodeRenderer, InlineRenderer};
pub use processor::{PendingRenderer, TypeRenderersProcessor};

use crate::{
    error::KernelError,
    object::{FieldValue, Object, ObjectType},
};

/// What renderer executors may do with the session they render for.
pub trait ExecutionHost {
    /// Evaluates `code` as a snippet of its own and returns its raw value.
    fn execute(&self, code: &str) -> Result<Option<Object>, KernelError>;

    fn call(&self, function: &Object, args: Vec<Object>) -> Result<Object, KernelError>;
}

/// Decides whether a renderer applies to values of a runtime type.
pub trait TypeMatcher {
    fn accepts(&self, object_type: ObjectType) -> bool;
}

impl TypeMatcher for ObjectType {
    fn accepts(&self, object_type: ObjectType) -> bool {
        *self == object_type
    }
}

impl TypeMatcher for [ObjectType] {
    fn accepts(&self, object_type: ObjectType) -> bool {
        self.contains(&object_type)
    }
}

impl TypeMatcher for Vec<ObjectType> {
    fn accepts(&self, object_type: ObjectType) -> bool {
        self.as_slice().accepts(object_type)
    }
}

impl<F> TypeMatcher for F
where
    F: Fn(ObjectType) -> bool,
{
    fn accepts(&self, object_type: ObjectType) -> bool {
        self(object_type)
    }
}

pub trait RendererTypeHandler {
    fn accepts_type(&self, object_type: ObjectType) -> bool;

    /// Turns `value` into its next, more displayable form.
    fn execute(&self, host: &dyn ExecutionHost, value: FieldValue) -> anyhow::Result<FieldValue>;

    fn as_precompiled(&self) -> Option<&dyn PrecompiledRendererTypeHandler> {
        None
    }
}

/// A renderer that can be turned into a snippet-level function, so that
/// rendering becomes a plain call instead of a round trip through Rust.
pub trait PrecompiledRendererTypeHandler: RendererTypeHandler {
    fn may_be_precompiled(&self) -> bool {
        true
    }

    /// Source of a snippet defining a one-parameter function `method_name`
    /// whose parameter is named `param_name`.
    fn precompile(&self, method_name: &str, param_name: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_matchers() {
        let exact = ObjectType::Integer;
        let any_of = vec![ObjectType::String, ObjectType::Array];
        let closure = |object_type: ObjectType| object_type != ObjectType::Null;

        let tests: Vec<(&dyn TypeMatcher, ObjectType, bool)> = vec![
            (&exact, ObjectType::Integer, true),
            (&exact, ObjectType::String, false),
            (&any_of, ObjectType::Array, true),
            (&any_of, ObjectType::Boolean, false),
            (&closure, ObjectType::Function, true),
            (&closure, ObjectType::Null, false),
        ];

        for (matcher, object_type, expected) in tests {
            assert_eq!(matcher.accepts(object_type), expected, "{object_type}");
        }
    }
}
