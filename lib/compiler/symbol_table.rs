use std::collections::HashMap;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    /// A local of an enclosing function, seen from a nested one.
    Captured,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SymbolTable {
    pub outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    pub num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            outer: None,
            store: HashMap::new(),
            num_definitions: 0,
        }
    }

    pub fn new_enclosed(outer: SymbolTable) -> SymbolTable {
        SymbolTable {
            outer: Some(Box::new(outer)),
            store: HashMap::new(),
            num_definitions: 0,
        }
    }

    /// Defines `name` in a fresh slot. Redefining a name shadows the old slot
    /// instead of reusing it, so earlier functions keep seeing their value.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = match &self.outer {
            Some(_) => SymbolScope::Local,
            None => SymbolScope::Global,
        };
        let symbol = Symbol {
            name: name.to_string(),
            index: self.num_definitions,
            scope,
        };

        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            index,
            scope: SymbolScope::Builtin,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let symbol = self.outer.as_ref()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Local | SymbolScope::Captured => Some(Symbol {
                scope: SymbolScope::Captured,
                ..symbol
            }),
            _ => Some(symbol),
        }
    }
}
