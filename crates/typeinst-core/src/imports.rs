//! Bidirectional import registry (name <-> path) with conflict-aware merging.
//!
//! Limitations of template packages:
//! - every file of a package must import a given path under the same local name;
//! - glob imports (`use a::*`) and anonymous imports (`use a::B as _`) are rejected.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};

const GLOB_NAME: &str = "*";
const ANON_NAME: &str = "_";
const FRESH_PREFIX: &str = "_Pkg";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Imports {
    p2n: BTreeMap<String, String>,
    n2p: BTreeMap<String, String>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.p2n.is_empty()
    }

    pub fn len(&self) -> usize {
        self.n2p.len()
    }

    /// Path imported under `name`.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.n2p.get(name).map(String::as_str)
    }

    /// Local name of `path`.
    pub fn name_of(&self, path: &str) -> Option<&str> {
        self.p2n.get(path).map(String::as_str)
    }

    /// (name, path) pairs sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.n2p.iter().map(|(n, p)| (n.as_str(), p.as_str()))
    }

    pub fn add(&mut self, name: &str, path: &str) -> Result<(), Diagnostic> {
        if name == GLOB_NAME {
            return Err(conflict(format!("glob import is not allowed: {path}")));
        }
        if name == ANON_NAME {
            return Err(conflict(format!("anonymous import is not allowed: {path}")));
        }
        if name.is_empty() {
            return Err(conflict(format!("empty import name is not allowed: {path}")));
        }
        if let Some(old_name) = self.p2n.get(path) {
            if old_name != name {
                return Err(conflict(format!(
                    "path {path} imported under different names: {name}, {old_name}"
                ))
                .with_names([name, old_name.as_str()]));
            }
            return Ok(());
        }
        if let Some(old_path) = self.n2p.get(name) {
            if old_path != path {
                return Err(conflict(format!(
                    "import of {path} under name {name:?} that is already used for {old_path}"
                ))
                .with_names([name]));
            }
        }
        self.n2p.insert(name.to_string(), path.to_string());
        self.p2n.insert(path.to_string(), name.to_string());
        Ok(())
    }

    /// Adds every (name, path) pair introduced by a `use` item.
    pub fn add_use(&mut self, item: &syn::ItemUse) -> Result<(), Diagnostic> {
        let mut prefix: Vec<String> = Vec::new();
        if item.leading_colon.is_some() {
            prefix.push(String::new());
        }
        let mut pairs: Vec<(String, String)> = Vec::new();
        flatten_use_tree(&mut prefix, &item.tree, &mut pairs);
        for (name, path) in pairs {
            self.add(&name, &path)?;
        }
        Ok(())
    }

    /// Merges `other` into `self`, keeping every existing name of `self` fixed.
    ///
    /// Returns the renames `other` needs: a path already present under another name is
    /// renamed to that name; a name taken by an unrelated path gets a fresh symbol.
    pub fn merge(
        &mut self,
        other: &Imports,
        symbols: &mut SymbolGen,
    ) -> Result<BTreeMap<String, String>, Diagnostic> {
        let mut add: Vec<(String, String)> = Vec::new();
        let mut rename: BTreeMap<String, String> = BTreeMap::new();
        for (name, path) in &other.n2p {
            if let Some(old_name) = self.p2n.get(path) {
                if old_name != name {
                    rename.insert(name.clone(), old_name.clone());
                }
            } else if !self.n2p.contains_key(name) {
                add.push((name.clone(), path.clone()));
            } else {
                let fresh = loop {
                    let s = symbols.next(FRESH_PREFIX);
                    if !self.n2p.contains_key(&s) && !other.n2p.contains_key(&s) {
                        break s;
                    }
                };
                rename.insert(name.clone(), fresh.clone());
                add.push((fresh, path.clone()));
            }
        }
        for (name, path) in add {
            self.add(&name, &path)?;
        }
        Ok(rename)
    }
}

/// Generator of fresh identifiers, owned by the session.
#[derive(Debug, Clone)]
pub struct SymbolGen {
    counter: u64,
}

impl Default for SymbolGen {
    fn default() -> Self {
        SymbolGen { counter: 9 }
    }
}

impl SymbolGen {
    pub fn next(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}_{}", self.counter)
    }
}

fn conflict(message: String) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::TI0300ImportConflict, Phase::Merge, message)
}

fn flatten_use_tree(prefix: &mut Vec<String>, tree: &syn::UseTree, out: &mut Vec<(String, String)>) {
    match tree {
        syn::UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            flatten_use_tree(prefix, &p.tree, out);
            prefix.pop();
        }
        syn::UseTree::Name(n) => {
            let ident = n.ident.to_string();
            if ident == "self" {
                let name = prefix.last().cloned().unwrap_or_default();
                out.push((name, prefix.join("::")));
            } else {
                out.push((ident.clone(), join_path(prefix, &ident)));
            }
        }
        syn::UseTree::Rename(r) => {
            let ident = r.ident.to_string();
            let path = if ident == "self" {
                prefix.join("::")
            } else {
                join_path(prefix, &ident)
            };
            out.push((r.rename.to_string(), path));
        }
        syn::UseTree::Glob(_) => {
            out.push((GLOB_NAME.to_string(), join_path(prefix, GLOB_NAME)));
        }
        syn::UseTree::Group(g) => {
            for t in &g.items {
                flatten_use_tree(prefix, t, out);
            }
        }
    }
}

fn join_path(prefix: &[String], last: &str) -> String {
    if prefix.is_empty() {
        last.to_string()
    } else {
        format!("{}::{last}", prefix.join("::"))
    }
}
