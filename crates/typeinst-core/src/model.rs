//! In-memory model of one template package.
//!
//! Type records live in an arena addressed by [`TypeId`]. The syntax of a type (its item,
//! impl blocks and constructors) is fixed once the frontend is done; everything later passes
//! compute lives in a separate [`TypeState`] slot per type.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::bindings::Bindings;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TypeId(pub(crate) usize);

impl TypeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One declaration tree an identifier occurrence belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeclRoot {
    /// The type item itself.
    Type(TypeId),
    /// The n-th impl block of the type.
    Impl(TypeId, usize),
    /// The n-th constructor of the type.
    Ctor(TypeId, usize),
}

/// Position of an identifier in the traversal order of its declaration root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Ordinal {
    Ident(u32),
    MacroToken(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OccId {
    pub root: DeclRoot,
    pub ordinal: Ordinal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccKind {
    Type,
    Ctor,
    Pkg,
}

/// Identifier occurrences a printer must rewrite.
#[derive(Debug, Clone, Default)]
pub struct Occurrences {
    pub(crate) types: BTreeSet<OccId>,
    pub(crate) ctors: BTreeSet<OccId>,
    pub(crate) pkgs: BTreeSet<OccId>,
}

impl Occurrences {
    pub fn kind_of(&self, id: &OccId) -> Option<OccKind> {
        if self.types.contains(id) {
            Some(OccKind::Type)
        } else if self.ctors.contains(id) {
            Some(OccKind::Ctor)
        } else if self.pkgs.contains(id) {
            Some(OccKind::Pkg)
        } else {
            None
        }
    }

    pub(crate) fn insert(&mut self, id: OccId, kind: OccKind) {
        match kind {
            OccKind::Type => self.types.insert(id),
            OccKind::Ctor => self.ctors.insert(id),
            OccKind::Pkg => self.pkgs.insert(id),
        };
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn ctor_count(&self) -> usize {
        self.ctors.len()
    }

    pub fn pkg_count(&self) -> usize {
        self.pkgs.len()
    }
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub(crate) name: String,
    pub(crate) item: syn::Item,
    pub(crate) impls: Vec<syn::ItemImpl>,
    pub(crate) ctors: Vec<syn::ItemFn>,
    pub(crate) typevar: bool,
    pub(crate) singleton: bool,
}

impl TypeDecl {
    pub(crate) fn new(name: String, item: syn::Item) -> Self {
        let singleton = is_singleton(&item);
        TypeDecl {
            name,
            item,
            impls: Vec::new(),
            ctors: Vec::new(),
            typevar: false,
            singleton,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_typevar(&self) -> bool {
        self.typevar
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn impl_count(&self) -> usize {
        self.impls.len()
    }

    pub fn ctor_names(&self) -> Vec<String> {
        self.ctors.iter().map(|f| f.sig.ident.to_string()).collect()
    }

    pub(crate) fn can_be_typevar(&self) -> bool {
        self.impls.is_empty() && self.ctors.is_empty()
    }

    pub(crate) fn mark_typevar(&mut self) -> Result<(), Diagnostic> {
        if !self.can_be_typevar() {
            return Err(Diagnostic::error(
                DiagnosticCode::TI0101InvalidTypevar,
                Phase::Register,
                format!(
                    "type {} has impl blocks or constructors and cannot be a typevar",
                    self.name
                ),
            )
            .with_type(&self.name));
        }
        self.typevar = true;
        Ok(())
    }

    pub(crate) fn add_impl(&mut self, imp: syn::ItemImpl) -> Result<(), Diagnostic> {
        if self.typevar {
            return Err(Diagnostic::error(
                DiagnosticCode::TI0101InvalidTypevar,
                Phase::Parse,
                format!("typevar {} cannot have impl blocks", self.name),
            )
            .with_type(&self.name));
        }
        self.impls.push(imp);
        Ok(())
    }

    pub(crate) fn add_ctor(&mut self, f: syn::ItemFn) -> Result<(), Diagnostic> {
        if self.typevar {
            return Err(Diagnostic::error(
                DiagnosticCode::TI0101InvalidTypevar,
                Phase::Parse,
                format!("typevar {} cannot have constructors: {}", self.name, f.sig.ident),
            )
            .with_type(&self.name)
            .with_names([f.sig.ident.to_string()]));
        }
        self.ctors.push(f);
        Ok(())
    }
}

/// Unit structs and structs without fields print as a value in addition to a type.
fn is_singleton(item: &syn::Item) -> bool {
    match item {
        syn::Item::Struct(s) => s.fields.is_empty(),
        _ => false,
    }
}

/// Per-type results of registration and resolution.
#[derive(Debug, Clone, Default)]
pub struct TypeState {
    pub(crate) visited: bool,
    /// Typevars the type depends on; `None` for a concrete type.
    pub(crate) deps: Option<BTreeSet<String>>,
    pub(crate) inst: BTreeMap<Arc<Bindings>, String>,
}

impl TypeState {
    pub fn is_generic(&self) -> bool {
        self.deps.as_ref().is_some_and(|d| !d.is_empty())
    }

    pub fn is_visited(&self) -> bool {
        self.visited
    }

    pub fn deps(&self) -> Option<&BTreeSet<String>> {
        self.deps.as_ref()
    }

    pub fn instances(&self) -> &BTreeMap<Arc<Bindings>, String> {
        &self.inst
    }

    pub fn instance_for(&self, b: &Arc<Bindings>) -> Option<&str> {
        self.inst.get(b).map(String::as_str)
    }

    /// Any registered bindings; all of them share one shape.
    pub(crate) fn shape(&self) -> Option<&Arc<Bindings>> {
        self.inst.keys().next()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDigest {
    pub file: String,
    pub sha256: String,
}

/// Declarations of one parsed template package.
#[derive(Debug, Clone)]
pub struct PkgDesc {
    pub(crate) path: String,
    pub(crate) types: Vec<TypeDecl>,
    pub(crate) states: Vec<TypeState>,
    pub(crate) by_name: BTreeMap<String, TypeId>,
    /// Constructor name -> owning type.
    pub(crate) ctors: BTreeMap<String, TypeId>,
    pub(crate) typevars: BTreeSet<String>,
    pub(crate) generic: BTreeSet<String>,
    /// Free functions that are not constructors.
    pub(crate) funcs: BTreeMap<String, syn::ItemFn>,
    pub(crate) imp_rename: BTreeMap<String, String>,
    pub(crate) strict: bool,
    pub(crate) occ: Occurrences,
    pub(crate) sources: Vec<SourceDigest>,
}

impl PkgDesc {
    pub(crate) fn new(path: &str) -> Self {
        PkgDesc {
            path: path.to_string(),
            types: Vec::new(),
            states: Vec::new(),
            by_name: BTreeMap::new(),
            ctors: BTreeMap::new(),
            typevars: BTreeSet::new(),
            generic: BTreeSet::new(),
            funcs: BTreeMap::new(),
            imp_rename: BTreeMap::new(),
            strict: false,
            occ: Occurrences::default(),
            sources: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn decl(&self, id: TypeId) -> &TypeDecl {
        &self.types[id.0]
    }

    pub fn state(&self, id: TypeId) -> &TypeState {
        &self.states[id.0]
    }

    /// Type ids sorted by type name.
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.by_name.values().copied()
    }

    pub fn typevars(&self) -> &BTreeSet<String> {
        &self.typevars
    }

    pub fn generic(&self) -> &BTreeSet<String> {
        &self.generic
    }

    pub fn free_functions(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    pub fn ctor_owner(&self, ctor: &str) -> Option<TypeId> {
        self.ctors.get(ctor).copied()
    }

    pub fn import_renames(&self) -> &BTreeMap<String, String> {
        &self.imp_rename
    }

    pub fn occurrences(&self) -> &Occurrences {
        &self.occ
    }

    pub fn sources(&self) -> &[SourceDigest] {
        &self.sources
    }

    pub(crate) fn is_type_name(&self, name: &str) -> bool {
        self.generic.contains(name) || self.typevars.contains(name)
    }

    pub(crate) fn add_type(&mut self, decl: TypeDecl) -> Result<TypeId, Diagnostic> {
        if self.by_name.contains_key(&decl.name) {
            return Err(Diagnostic::error(
                DiagnosticCode::TI0400MalformedDeclaration,
                Phase::Parse,
                format!("duplicate type name: {}", decl.name),
            )
            .with_package(&self.path)
            .with_type(&decl.name));
        }
        let id = TypeId(self.types.len());
        if decl.typevar {
            self.typevars.insert(decl.name.clone());
        }
        self.by_name.insert(decl.name.clone(), id);
        self.types.push(decl);
        self.states.push(TypeState::default());
        Ok(id)
    }

    pub(crate) fn name_of(&self, id: TypeId) -> &str {
        &self.types[id.0].name
    }
}
