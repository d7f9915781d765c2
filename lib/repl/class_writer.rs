use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    compiler::{CompiledUnit, SerializedUnit},
    error::KernelError,
    object::Object,
};

/// Writes the artifacts of every compiled snippet into a directory of its
/// own: `Line_<id>.bin` holds the serialized unit, `Line_<id>.txt` a
/// disassembly.
#[derive(Debug)]
pub struct ClassWriter {
    output_dir: PathBuf,
}

impl ClassWriter {
    /// Creates a fresh directory under the system temp dir. The directory is
    /// left in place when the writer is dropped.
    pub fn new() -> Result<Self, KernelError> {
        let output_dir = tempfile::Builder::new()
            .prefix("kernel-units")
            .tempdir()?
            .keep();
        debug!(dir = %output_dir.display(), "writing compiled units");
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write_classes(
        &self,
        unit: &CompiledUnit,
        serialized: &[SerializedUnit],
    ) -> Result<(), KernelError> {
        for serialized in serialized.iter() {
            let path = self.output_dir.join(serialized.file_name());
            fs::write(&path, &serialized.data)?;
            debug!(path = %path.display(), "wrote compiled unit");
        }

        let path = self.output_dir.join(format!("Line_{}.txt", unit.snippet));
        fs::write(&path, listing(unit))?;
        debug!(path = %path.display(), "wrote unit listing");

        Ok(())
    }
}

fn listing(unit: &CompiledUnit) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; snippet {}", unit.snippet);
    if let Some(declared_type) = &unit.declared_type {
        let _ = writeln!(out, "; declared type {declared_type}");
    }
    for declaration in unit.declarations.iter() {
        let _ = writeln!(out, "; global {} = {}", declaration.index, declaration.name);
    }

    for (i, constant) in unit.constants.iter().enumerate() {
        let index = unit.constants_offset + i;
        match constant {
            Object::Function(function) => {
                let _ = writeln!(
                    out,
                    "constant {index}: fn/{} locals={}",
                    function.num_parameters, function.num_locals
                );
                out.push_str(&function.instructions.to_string());
            }
            Object::String(value) => {
                let _ = writeln!(out, "constant {index}: {value:?}");
            }
            other => {
                let _ = writeln!(out, "constant {index}: {other}");
            }
        }
    }

    out.push_str("main:\n");
    out.push_str(&unit.instructions.to_string());
    out
}
