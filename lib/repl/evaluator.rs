use std::{
    cell::{Cell, RefCell},
    path::PathBuf,
    rc::Rc,
};

use tracing::{debug, info, warn};

use crate::{
    compiler::{CompiledUnit, CompiledUnitSerializer, ReplCompiler, SerializedUnit},
    config::KernelConfig,
    error::KernelError,
    object::FieldValue,
    runtime::{ContextUpdater, ReplEvaluator, ResultValue, ScriptInstance},
    snippet::{Snippet, SnippetId},
};

use super::{archive::ScriptArchive, class_writer::ClassWriter};

const NOT_EVALUATED: &str = "This snippet was not evaluated";

#[derive(Debug)]
pub struct InternalEvalResult {
    pub result_value: FieldValue,
    pub script_instance: Option<ScriptInstance>,
}

/// Clears the in-progress flag however `eval` returns.
struct ExecutionGuard<'a> {
    executing: &'a Cell<bool>,
}

impl<'a> ExecutionGuard<'a> {
    fn acquire(executing: &'a Cell<bool>) -> Result<Self, KernelError> {
        if executing.replace(true) {
            return Err(KernelError::ConcurrencyViolation);
        }
        Ok(Self { executing })
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.executing.set(false);
    }
}

/// Compiles and runs snippets one at a time against the session state and
/// archives the units that ran successfully.
pub struct InternalEvaluator {
    compiler: RefCell<Box<dyn ReplCompiler>>,
    evaluator: RefCell<Box<dyn ReplEvaluator>>,
    context_updater: Rc<ContextUpdater>,
    serializer: CompiledUnitSerializer,
    archive: RefCell<ScriptArchive>,
    class_writer: RefCell<Option<ClassWriter>>,
    executing: Cell<bool>,
    log_execution: bool,
}

impl InternalEvaluator {
    pub fn new(
        compiler: Box<dyn ReplCompiler>,
        evaluator: Box<dyn ReplEvaluator>,
        context_updater: Rc<ContextUpdater>,
        config: &KernelConfig,
    ) -> Result<Self, KernelError> {
        let evaluator = Self {
            compiler: RefCell::new(compiler),
            evaluator: RefCell::new(evaluator),
            context_updater,
            serializer: CompiledUnitSerializer::new(),
            archive: RefCell::new(ScriptArchive::new()),
            class_writer: RefCell::new(None),
            executing: Cell::new(false),
            log_execution: config.log_execution,
        };
        evaluator.set_write_compiled_units(config.write_compiled_units)?;
        Ok(evaluator)
    }

    /// Compiles and runs `code` as the next snippet. `on_id_assigned` sees the
    /// snippet id before compilation starts, even if compilation then fails.
    pub fn eval(
        &self,
        code: &str,
        on_id_assigned: Option<&mut dyn FnMut(SnippetId)>,
    ) -> Result<InternalEvalResult, KernelError> {
        let _guard = ExecutionGuard::acquire(&self.executing)?;

        if self.log_execution {
            info!("Executing:\n{code}");
        }

        let id = self.compiler.borrow_mut().next_counter();
        debug!(snippet = %id, "assigned snippet id");
        if let Some(callback) = on_id_assigned {
            callback(id);
        }

        let snippet = Snippet::new(id, code);
        let (result, config) = self.compiler.borrow_mut().compile(&snippet);
        let unit = match result {
            Ok(unit) => unit,
            Err(diagnostics) => {
                warn!(snippet = %id, diagnostics = diagnostics.len(), "compilation failed");
                return Err(KernelError::Compilation {
                    snippet: id,
                    code: snippet.source,
                    diagnostics,
                });
            }
        };

        let serialized = match self.persist(&unit) {
            Ok(serialized) => serialized,
            Err(err) => {
                self.compiler.borrow_mut().rollback();
                return Err(err);
            }
        };

        let eval_result = self.evaluator.borrow_mut().eval(&unit, &config);
        self.context_updater.update();

        let (result_value, script_instance) = match eval_result.result {
            ResultValue::Unit { instance } => (FieldValue::unit(), instance),
            ResultValue::Value {
                value,
                declared_type,
                instance,
            } => (FieldValue::new(Some(value), declared_type), instance),
            ResultValue::Error(err) => {
                self.compiler.borrow_mut().rollback();
                return Err(KernelError::EvaluationRuntime {
                    message: err.to_string(),
                    cause: Some(err),
                });
            }
            ResultValue::NotEvaluated => {
                self.compiler.borrow_mut().rollback();
                let cause = eval_result
                    .reports
                    .into_iter()
                    .next()
                    .map(|report| anyhow::anyhow!(report.message));
                return Err(KernelError::EvaluationRuntime {
                    message: NOT_EVALUATED.to_string(),
                    cause,
                });
            }
        };

        self.compiler.borrow_mut().commit();
        self.archive.borrow_mut().push_all(serialized);

        Ok(InternalEvalResult {
            result_value,
            script_instance: Some(script_instance),
        })
    }

    /// Serializes `unit` and hands it to the class writer, if one is enabled.
    fn persist(&self, unit: &CompiledUnit) -> Result<Vec<SerializedUnit>, KernelError> {
        let serialized = self
            .serializer
            .serialize(unit)
            .map_err(KernelError::Serialization)?;
        if let Some(writer) = self.class_writer.borrow().as_ref() {
            writer.write_classes(unit, &serialized)?;
        }
        Ok(serialized)
    }

    pub fn drain_archived_units(&self) -> Vec<SerializedUnit> {
        self.archive.borrow_mut().drain()
    }

    /// Enabling always starts a new output directory. Disabling keeps the
    /// files written so far.
    pub fn set_write_compiled_units(&self, enabled: bool) -> Result<(), KernelError> {
        let writer = if enabled {
            Some(ClassWriter::new()?)
        } else {
            None
        };
        *self.class_writer.borrow_mut() = writer;
        Ok(())
    }

    pub fn class_output_dir(&self) -> Option<PathBuf> {
        self.class_writer
            .borrow()
            .as_ref()
            .map(|writer| writer.output_dir().to_path_buf())
    }

    pub fn is_executing(&self) -> bool {
        self.executing.get()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        compiler::{EvalConfig, SnippetCompiler},
        error::Diagnostic,
        object::Object,
        runtime::{EvalResult, Runtime, SnippetEvaluator},
    };

    use super::*;

    fn evaluator() -> InternalEvaluator {
        evaluator_with(&KernelConfig::default())
    }

    fn evaluator_with(config: &KernelConfig) -> InternalEvaluator {
        let runtime = Runtime::shared(config.max_call_depth);
        InternalEvaluator::new(
            Box::new(SnippetCompiler::new(config)),
            Box::new(SnippetEvaluator::new(runtime.clone())),
            Rc::new(ContextUpdater::new(runtime)),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_value_and_unit_results() {
        let evaluator = evaluator();
        let tests = vec![
            ("1", FieldValue::new(Some(Object::Integer(1)), Some("Int".to_string()))),
            ("let a = 2;", FieldValue::unit()),
            ("a * 3", FieldValue::new(Some(Object::Integer(6)), None)),
        ];

        for (input, expected) in tests {
            let result = evaluator.eval(input, None).unwrap();
            assert_eq!(result.result_value, expected, "{input}");
            assert!(result.script_instance.is_some());
        }
        assert!(!evaluator.is_executing());
    }

    #[test]
    fn test_ids_increase_even_on_failure() {
        let evaluator = evaluator();
        let mut ids = vec![];
        for input in ["1", "let = 1", "throw \"x\"", "2"] {
            let _ = evaluator.eval(input, Some(&mut |id: SnippetId| ids.push(id)));
        }
        assert_eq!(
            ids,
            vec![SnippetId(0), SnippetId(1), SnippetId(2), SnippetId(3)]
        );
    }

    #[test]
    fn test_compilation_error_keeps_diagnostics() {
        let evaluator = evaluator();
        let err = evaluator.eval("let x = y;", None).unwrap_err();
        match err {
            KernelError::Compilation {
                snippet,
                code,
                diagnostics,
            } => {
                assert_eq!(snippet, SnippetId(0));
                assert_eq!(code, "let x = y;");
                assert_eq!(
                    diagnostics,
                    vec![Diagnostic::error(SnippetId(0), "unresolved reference: y")]
                );
            }
            other => panic!("expected a compilation error, got {other:?}"),
        }
        assert!(evaluator.drain_archived_units().is_empty());
        assert!(!evaluator.is_executing());
    }

    #[test]
    fn test_runtime_error_is_not_archived() {
        let evaluator = evaluator();
        evaluator.eval("1", None).unwrap();
        let err = evaluator.eval("throw \"x\"", None).unwrap_err();

        match &err {
            KernelError::EvaluationRuntime { message, cause } => {
                assert_eq!(message, "x");
                assert!(cause.is_some());
            }
            other => panic!("expected a runtime error, got {other:?}"),
        }

        let drained = evaluator.drain_archived_units();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].snippet, SnippetId(0));
        assert!(!evaluator.is_executing());
    }

    #[test]
    fn test_drain_returns_units_in_order() {
        let evaluator = evaluator();
        for input in ["1", "let a = 2;", "a"] {
            evaluator.eval(input, None).unwrap();
        }

        let snippets: Vec<SnippetId> = evaluator
            .drain_archived_units()
            .into_iter()
            .map(|unit| unit.snippet)
            .collect();
        assert_eq!(snippets, vec![SnippetId(0), SnippetId(1), SnippetId(2)]);
        assert!(evaluator.drain_archived_units().is_empty());
    }

    #[test]
    fn test_reentrant_eval_is_rejected() {
        let evaluator = evaluator();
        let mut nested = None;
        let result = evaluator.eval(
            "1",
            Some(&mut |_| {
                nested = Some(evaluator.eval("2", None));
            }),
        );

        assert!(result.is_ok());
        assert!(matches!(
            nested,
            Some(Err(KernelError::ConcurrencyViolation))
        ));
        assert!(!evaluator.is_executing());
        assert!(evaluator.eval("3", None).is_ok());
    }

    #[test]
    fn test_write_compiled_units() {
        let evaluator = evaluator();
        assert_eq!(evaluator.class_output_dir(), None);

        evaluator.set_write_compiled_units(true).unwrap();
        let first_dir = evaluator.class_output_dir().unwrap();
        evaluator.eval("let a = 1;", None).unwrap();
        assert!(first_dir.join("Line_0.bin").is_file());
        assert!(first_dir.join("Line_0.txt").is_file());

        // Failed compiles never reach the writer.
        let _ = evaluator.eval("let = 1", None);
        assert!(!first_dir.join("Line_1.bin").exists());

        evaluator.set_write_compiled_units(true).unwrap();
        let second_dir = evaluator.class_output_dir().unwrap();
        assert_ne!(first_dir, second_dir);

        evaluator.set_write_compiled_units(false).unwrap();
        evaluator.eval("a", None).unwrap();
        assert!(first_dir.join("Line_0.bin").is_file());
        assert!(!second_dir.join("Line_2.bin").exists());

        fs::remove_dir_all(first_dir).unwrap();
        fs::remove_dir_all(second_dir).unwrap();
    }

    struct RefusingEvaluator;

    impl ReplEvaluator for RefusingEvaluator {
        fn eval(&mut self, unit: &CompiledUnit, _config: &EvalConfig) -> EvalResult {
            EvalResult {
                result: ResultValue::NotEvaluated,
                reports: vec![Diagnostic::error(unit.snippet, "refused")],
            }
        }
    }

    #[test]
    fn test_not_evaluated_reports_fixed_message() {
        let config = KernelConfig::default();
        let runtime = Runtime::shared(config.max_call_depth);
        let evaluator = InternalEvaluator::new(
            Box::new(SnippetCompiler::new(&config)),
            Box::new(RefusingEvaluator),
            Rc::new(ContextUpdater::new(runtime)),
            &config,
        )
        .unwrap();

        let err = evaluator.eval("1", None).unwrap_err();
        match &err {
            KernelError::EvaluationRuntime { message, cause } => {
                assert_eq!(message, "This snippet was not evaluated");
                assert_eq!(cause.as_ref().unwrap().to_string(), "refused");
            }
            other => panic!("expected a runtime error, got {other:?}"),
        }
        assert!(evaluator.drain_archived_units().is_empty());
        assert!(matches!(
            evaluator.eval("let a = 1;", None),
            Err(KernelError::EvaluationRuntime { .. })
        ));
        // The refused declaration is forgotten by the compiler too.
        assert!(matches!(
            evaluator.eval("a", None),
            Err(KernelError::Compilation { .. })
        ));
    }

    #[test]
    fn test_failed_class_write_forgets_snippet() {
        let evaluator = evaluator();
        evaluator.set_write_compiled_units(true).unwrap();
        let dir = evaluator.class_output_dir().unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert!(evaluator.eval("let a = 1;", None).is_err());
        assert!(evaluator.drain_archived_units().is_empty());

        evaluator.set_write_compiled_units(false).unwrap();
        assert!(matches!(
            evaluator.eval("a", None),
            Err(KernelError::Compilation { .. })
        ));
        let result = evaluator.eval("let a = 2; a", None).unwrap();
        assert_eq!(result.result_value.value, Some(Object::Integer(2)));
    }

    #[test]
    fn test_runtime_failure_keeps_earlier_bindings() {
        let evaluator = evaluator();
        evaluator.eval("let a = 1;", None).unwrap();
        assert!(evaluator.eval("let a = 2; throw \"x\"", None).is_err());

        let result = evaluator.eval("a", None).unwrap();
        assert_eq!(result.result_value.value, Some(Object::Integer(1)));
    }
}
