/// Knobs shared by the evaluation engine, the runtime and the renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    /// Log the source of every snippet before it runs.
    pub log_execution: bool,
    /// Persist every compiled unit under a fresh temporary directory.
    pub write_compiled_units: bool,
    /// Upper bound on handler applications while rendering one value.
    pub max_render_steps: usize,
    /// Upper bound on nested function calls inside one snippet.
    pub max_call_depth: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_execution: false,
            write_compiled_units: false,
            max_render_steps: 1000,
            max_call_depth: 1024,
        }
    }
}
