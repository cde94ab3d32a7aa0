//! Code hierarchy lookups used for ontology expansion.

use std::collections::{BTreeMap, BTreeSet};

pub trait Ontology: Send + Sync {
    /// Every ancestor of `code`, including `code` itself.
    fn ancestors_of(&self, code: &str) -> BTreeSet<String>;
}

/// Ontology backed by an explicit child -> parents map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryOntology {
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl InMemoryOntology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parent(&mut self, code: impl Into<String>, parent: impl Into<String>) {
        self.parents
            .entry(code.into())
            .or_default()
            .insert(parent.into());
    }

    pub fn with_parent(mut self, code: impl Into<String>, parent: impl Into<String>) -> Self {
        self.add_parent(code, parent);
        self
    }

    pub fn parents_of(&self, code: &str) -> impl Iterator<Item = &str> {
        self.parents
            .get(code)
            .into_iter()
            .flat_map(|parents| parents.iter().map(String::as_str))
    }
}

impl Ontology for InMemoryOntology {
    fn ancestors_of(&self, code: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![code.to_string()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for parent in self.parents_of(&current) {
                if !seen.contains(parent) {
                    pending.push(parent.to_string());
                }
            }
        }
        seen
    }
}
