use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use codegenius_core::{estimate_tokens, Symbol, SymbolKind};

/// Session-scoped table of exported names contributed by accepted files.
/// Insertion order is registration order; excerpts prefer the most recently
/// registered symbols, which track the evolving shape of the codebase.
#[derive(Default)]
pub struct SymbolRegistry {
    symbols: Vec<Symbol>,
    names: HashSet<String>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, symbol: Symbol) {
        debug!(name = %symbol.name, kind = %symbol.kind, owner = %symbol.owner, "registering symbol");
        self.names.insert(symbol.name.clone());
        self.symbols.push(symbol);
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Prompt excerpt of symbols owned by the given dependency files, newest
    /// first, truncated to the token budget.
    pub fn excerpt(&self, depends_on: &BTreeSet<String>, token_budget: usize) -> String {
        let mut lines = Vec::new();
        let mut used = 0;
        for symbol in self.symbols.iter().rev() {
            if !depends_on.contains(&symbol.owner) {
                continue;
            }
            let line = format!(
                "- {} `{}` from {}: {}",
                symbol.kind, symbol.name, symbol.owner, symbol.signature
            );
            let cost = estimate_tokens(&line);
            if used + cost > token_budget {
                break;
            }
            used += cost;
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Infer a symbol kind from the owning file's responsibility text. Keywords
/// are checked in a fixed order so inference is deterministic.
pub fn infer_kind(responsibility: &str) -> SymbolKind {
    let text = responsibility.to_lowercase();
    if text.contains("route") || text.contains("endpoint") || text.contains("gateway") {
        SymbolKind::Route
    } else if text.contains("table") || text.contains("schema") {
        SymbolKind::Table
    } else if text.contains("config") || text.contains("settings") {
        SymbolKind::ConfigKey
    } else if text.contains("model") || text.contains("class") || text.contains("service") {
        SymbolKind::Class
    } else {
        SymbolKind::Function
    }
}
