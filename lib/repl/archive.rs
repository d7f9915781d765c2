use tracing::debug;

use crate::compiler::SerializedUnit;

/// Serialized units of every successfully evaluated snippet since the last
/// drain, in evaluation order.
#[derive(Debug, Default)]
pub struct ScriptArchive {
    units: Vec<SerializedUnit>,
}

impl ScriptArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_all(&mut self, units: Vec<SerializedUnit>) {
        for unit in units.iter() {
            debug!(snippet = %unit.snippet, bytes = unit.data.len(), "archived unit");
        }
        self.units.extend(units);
    }

    /// Hands out everything archived so far and leaves the archive empty.
    pub fn drain(&mut self) -> Vec<SerializedUnit> {
        let units = std::mem::take(&mut self.units);
        debug!(units = units.len(), "drained archive");
        units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
