//! Emits the specialized copies of every generic type as one Rust module.
//!
//! The renamer replays the walker's identifier order with `syn::visit_mut`, looks up each
//! ordinal in the package's occurrence sets and rewrites it for the active bindings. Typevars
//! bound to anything other than a plain identifier are substituted structurally by the parent
//! node: the whole type, a spliced path, or a `<T>::` qualified path.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use proc_macro2::{Group, Ident, Span, TokenStream, TokenTree};
use quote::{quote, ToTokens};
use syn::visit_mut::{self, VisitMut};
use tracing::{debug, info};

use crate::bindings::Bindings;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};
use crate::imports::Imports;
use crate::mangle::mangle_ctor_name;
use crate::model::{DeclRoot, OccId, OccKind, Ordinal, PkgDesc, TypeDecl, TypeId};
use crate::walk::followed_by_path_sep;

pub const GENERATED_HEADER: &str = "// This file was generated by typeinst. Do not edit.";

const PRELUDE: &str = "#![allow(\n\
    dead_code,\n\
    non_snake_case,\n\
    non_camel_case_types,\n\
    non_upper_case_globals,\n\
    unused_imports\n\
)]\n";

/// Renders the module for `packages` using the merged `imports`.
pub fn print_module(
    module: &str,
    imports: &Imports,
    packages: &BTreeMap<String, PkgDesc>,
) -> Result<String, Diagnostic> {
    info!(module, "printing...");

    let mut file = syn::parse_file(PRELUDE)
        .map_err(|e| Diagnostic::internal(format!("prelude does not parse: {e}")))?;
    for (name, path) in imports.iter() {
        file.items.push(syn::Item::Use(use_item(name, path)?));
    }

    let mut typedefs: BTreeSet<String> = BTreeSet::new();
    for pkg in packages.values() {
        for id in pkg.type_ids() {
            let decl = pkg.decl(id);
            let state = pkg.state(id);
            if !state.is_visited() || !pkg.generic.contains(&decl.name) {
                continue;
            }
            for (bindings, inst) in state.instances() {
                let ctx = Specializer::new(pkg, id, bindings)?;
                debug!(package = %pkg.path, "print: type {} as {inst}", decl.name);
                // Types merged under one instance name are declared once.
                if typedefs.insert(inst.clone()) {
                    let mut item = decl.item.clone();
                    ctx.rename(DeclRoot::Type(id), &mut item, |r, node| r.visit_item_mut(node))?;
                    file.items.push(item);
                    if decl.singleton {
                        file.items.push(singleton_const(decl, inst)?);
                    }
                }
                for (n, f) in decl.ctors.iter().enumerate() {
                    let mut f = f.clone();
                    ctx.rename(DeclRoot::Ctor(id, n), &mut f, |r, node| r.visit_item_fn_mut(node))?;
                    file.items.push(syn::Item::Fn(f));
                }
                for (n, imp) in decl.impls.iter().enumerate() {
                    let mut imp = imp.clone();
                    ctx.rename(DeclRoot::Impl(id, n), &mut imp, |r, node| {
                        r.visit_item_impl_mut(node)
                    })?;
                    file.items.push(syn::Item::Impl(imp));
                }
            }
        }
    }

    let mut out = String::new();
    out.push_str(GENERATED_HEADER);
    out.push('\n');
    out.push_str(&format!("// module: {module}\n"));
    for pkg in packages.values() {
        let digests: Vec<String> = pkg
            .sources()
            .iter()
            .map(|s| format!("{}@{}", s.file, crate::util::short_digest(&s.sha256)))
            .collect();
        out.push_str(&format!("// package {}: {}\n", pkg.path, digests.join(", ")));
    }
    out.push('\n');
    out.push_str(&prettyplease::unparse(&file));
    Ok(out)
}

fn use_item(name: &str, path: &str) -> Result<syn::ItemUse, Diagnostic> {
    let last = path.rsplit("::").next().unwrap_or(path);
    let src = if last == name {
        format!("use {path};")
    } else {
        format!("use {path} as {name};")
    };
    syn::parse_str(&src).map_err(|e| {
        Diagnostic::error(
            DiagnosticCode::TI0300ImportConflict,
            Phase::Print,
            format!("import {name} = {path} is not a valid use declaration: {e}"),
        )
        .with_names([name])
    })
}

fn printed_name(decl: &TypeDecl, inst: &str) -> String {
    if decl.singleton {
        format!("{inst}Type")
    } else {
        inst.to_string()
    }
}

fn singleton_const(decl: &TypeDecl, inst: &str) -> Result<syn::Item, Diagnostic> {
    let ty = printed_name(decl, inst);
    let value = match &decl.item {
        syn::Item::Struct(s) => match s.fields {
            syn::Fields::Named(_) => format!("{ty} {{}}"),
            syn::Fields::Unnamed(_) => format!("{ty}()"),
            syn::Fields::Unit => ty.clone(),
        },
        _ => ty.clone(),
    };
    syn::parse_str(&format!("pub const {inst}: {ty} = {value};")).map_err(|e| {
        Diagnostic::internal(format!("singleton value for {inst} does not parse: {e}"))
            .with_type(&decl.name)
    })
}

/// Builds an identifier, keeping raw identifiers raw.
fn make_ident(name: &str, span: Span) -> Ident {
    match name.strip_prefix("r#") {
        Some(raw) => Ident::new_raw(raw, span),
        None => Ident::new(name, span),
    }
}

fn single_ident(ty: &syn::Type) -> Option<Ident> {
    let syn::Type::Path(tp) = ty else {
        return None;
    };
    if tp.qself.is_some() || tp.path.leading_colon.is_some() || tp.path.segments.len() != 1 {
        return None;
    }
    let seg = tp.path.segments.first()?;
    seg.arguments.is_none().then(|| seg.ident.clone())
}

/// Adds `::` before the generic arguments of every segment, for expression positions.
fn turbofish(path: &mut syn::Path) {
    for seg in path.segments.iter_mut() {
        if let syn::PathArguments::AngleBracketed(args) = &mut seg.arguments {
            args.colon2_token = Some(Default::default());
        }
    }
}

/// Parsed type arguments of one bindings set.
struct BoundTypes {
    idents: BTreeMap<String, Ident>,
    types: BTreeMap<String, syn::Type>,
}

impl BoundTypes {
    fn parse(bindings: &Bindings) -> Result<Self, Diagnostic> {
        let mut idents = BTreeMap::new();
        let mut types = BTreeMap::new();
        for (tv, expr) in bindings.binds() {
            let ty: syn::Type = syn::parse_str(expr).map_err(|e| {
                Diagnostic::error(
                    DiagnosticCode::TI0400MalformedDeclaration,
                    Phase::Print,
                    format!("type argument {tv} = {expr:?} is not a Rust type: {e}"),
                )
                .with_names([tv.as_str()])
            })?;
            if let Some(ident) = single_ident(&ty) {
                idents.insert(tv.clone(), ident);
                continue;
            }
            let ty = match ty {
                syn::Type::TraitObject(_) | syn::Type::ImplTrait(_) => {
                    syn::Type::Paren(syn::TypeParen {
                        paren_token: Default::default(),
                        elem: Box::new(ty),
                    })
                }
                other => other,
            };
            types.insert(tv.clone(), ty);
        }
        Ok(BoundTypes { idents, types })
    }
}

/// Everything needed to print one (type, bindings) pair.
struct Specializer<'a> {
    pkg: &'a PkgDesc,
    bindings: &'a Bindings,
    bounds: BoundTypes,
}

impl<'a> Specializer<'a> {
    fn new(pkg: &'a PkgDesc, id: TypeId, bindings: &'a Bindings) -> Result<Self, Diagnostic> {
        let bounds = BoundTypes::parse(bindings)
            .map_err(|d| d.or_package(&pkg.path).with_type(pkg.name_of(id)))?;
        Ok(Specializer {
            pkg,
            bindings,
            bounds,
        })
    }

    fn rename<T>(
        &self,
        root: DeclRoot,
        node: &mut T,
        visit: impl FnOnce(&mut Renamer<'_>, &mut T),
    ) -> Result<(), Diagnostic> {
        let mut r = Renamer {
            ctx: self,
            root,
            next_ident: 0,
            next_macro_token: 0,
            deferred: HashMap::new(),
            error: None,
        };
        visit(&mut r, node);
        r.finish()
    }
}

struct Renamer<'a> {
    ctx: &'a Specializer<'a>,
    root: DeclRoot,
    next_ident: u32,
    next_macro_token: u32,
    /// Typevar occurrences waiting for their parent node to substitute them.
    deferred: HashMap<*const Ident, String>,
    error: Option<Diagnostic>,
}

impl Renamer<'_> {
    fn occ(&self, ordinal: Ordinal) -> Option<OccKind> {
        self.ctx.pkg.occ.kind_of(&OccId {
            root: self.root,
            ordinal,
        })
    }

    /// Replacement for an occurrence that stays a single identifier.
    fn rename(&self, name: &str, kind: OccKind) -> Option<String> {
        let pkg = self.ctx.pkg;
        match kind {
            OccKind::Type => {
                if let Some(ident) = self.ctx.bounds.idents.get(name) {
                    return Some(ident.to_string());
                }
                let id = pkg.type_id(name)?;
                let decl = pkg.decl(id);
                if decl.typevar {
                    return None;
                }
                let inst = pkg.state(id).inst.get(self.ctx.bindings)?;
                Some(printed_name(decl, inst))
            }
            OccKind::Ctor => {
                let owner = pkg.ctor_owner(name)?;
                let inst = pkg.state(owner).inst.get(self.ctx.bindings)?;
                Some(mangle_ctor_name(name, pkg.name_of(owner), inst))
            }
            OccKind::Pkg => pkg.imp_rename.get(name).cloned(),
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(
                Diagnostic::error(
                    DiagnosticCode::TI0400MalformedDeclaration,
                    Phase::Print,
                    message,
                )
                .with_package(&self.ctx.pkg.path),
            );
        }
    }

    /// Bound type of a deferred typevar heading `path`.
    fn take_deferred(&mut self, path: &syn::Path) -> Option<(String, syn::Type)> {
        if path.leading_colon.is_some() {
            return None;
        }
        let first = path.segments.first()?;
        let name = self.deferred.remove(&(&first.ident as *const Ident))?;
        let ty = self.ctx.bounds.types.get(&name)?.clone();
        Some((name, ty))
    }

    /// Replaces a deferred typevar heading a struct or pattern path.
    fn splice_path(&mut self, path: &mut syn::Path) {
        let Some((name, bound)) = self.take_deferred(path) else {
            return;
        };
        let syn::Type::Path(bp) = &bound else {
            self.fail(format!(
                "typevar {name} is bound to `{}` and cannot head a path",
                bound.to_token_stream()
            ));
            return;
        };
        if bp.qself.is_some() {
            self.fail(format!("typevar {name} is bound to a qualified path"));
            return;
        }
        let mut spliced = bp.path.clone();
        turbofish(&mut spliced);
        spliced
            .segments
            .extend(path.segments.iter().skip(1).cloned());
        *path = spliced;
    }

    fn rewrite_tokens(&mut self, tokens: TokenStream) -> TokenStream {
        let trees: Vec<TokenTree> = tokens.into_iter().collect();
        let mut out = TokenStream::new();
        for (idx, tt) in trees.iter().enumerate() {
            match tt {
                TokenTree::Ident(ident) => {
                    let ordinal = Ordinal::MacroToken(self.next_macro_token);
                    self.next_macro_token += 1;
                    let qualifier = followed_by_path_sep(&trees[idx + 1..]);
                    out.extend(self.rewrite_macro_ident(ident, ordinal, qualifier));
                }
                TokenTree::Group(g) => {
                    let mut group = Group::new(g.delimiter(), self.rewrite_tokens(g.stream()));
                    group.set_span(g.span());
                    out.extend([TokenTree::Group(group)]);
                }
                other => out.extend([other.clone()]),
            }
        }
        out
    }

    fn rewrite_macro_ident(&self, ident: &Ident, ordinal: Ordinal, qualifier: bool) -> TokenStream {
        let keep = || TokenStream::from(TokenTree::Ident(ident.clone()));
        let Some(kind) = self.occ(ordinal) else {
            return keep();
        };
        let name = ident.to_string();
        if kind == OccKind::Type {
            if let Some(ty) = self.ctx.bounds.types.get(&name) {
                return if qualifier {
                    quote!(<#ty>)
                } else {
                    ty.to_token_stream()
                };
            }
        }
        match self.rename(&name, kind) {
            Some(new) => TokenStream::from(TokenTree::Ident(make_ident(&new, ident.span()))),
            None => keep(),
        }
    }

    fn finish(self) -> Result<(), Diagnostic> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let stuck: BTreeSet<&String> = self.deferred.values().collect();
        if let Some(name) = stuck.into_iter().next() {
            let bound = self.ctx.bindings.get(name).unwrap_or_default();
            return Err(Diagnostic::error(
                DiagnosticCode::TI0400MalformedDeclaration,
                Phase::Print,
                format!("typevar {name} is bound to `{bound}` but used where only an identifier fits"),
            )
            .with_package(&self.ctx.pkg.path)
            .with_names([name.as_str()]));
        }
        Ok(())
    }
}

impl VisitMut for Renamer<'_> {
    fn visit_ident_mut(&mut self, i: &mut Ident) {
        let ordinal = Ordinal::Ident(self.next_ident);
        self.next_ident += 1;
        let Some(kind) = self.occ(ordinal) else {
            return;
        };
        let name = i.to_string();
        if kind == OccKind::Type && self.ctx.bounds.types.contains_key(&name) {
            self.deferred.insert(&*i as *const Ident, name);
            return;
        }
        if let Some(new) = self.rename(&name, kind) {
            *i = make_ident(&new, i.span());
        }
    }

    fn visit_type_mut(&mut self, ty: &mut syn::Type) {
        visit_mut::visit_type_mut(self, ty);
        let syn::Type::Path(tp) = ty else {
            return;
        };
        if tp.qself.is_some() {
            return;
        }
        let Some((name, bound)) = self.take_deferred(&tp.path) else {
            return;
        };
        let single = tp.path.segments.len() == 1
            && tp.path.segments.first().is_some_and(|s| s.arguments.is_none());
        if single {
            *ty = bound;
            return;
        }
        let rest = tp.path.segments.iter().skip(1);
        let tokens = quote!(<#bound> #(:: #rest)*);
        match syn::parse2::<syn::Type>(tokens) {
            Ok(new) => *ty = new,
            Err(e) => self.fail(format!("cannot qualify typevar {name}: {e}")),
        }
    }

    fn visit_expr_path_mut(&mut self, e: &mut syn::ExprPath) {
        visit_mut::visit_expr_path_mut(self, e);
        if e.qself.is_some() {
            return;
        }
        let Some((name, bound)) = self.take_deferred(&e.path) else {
            return;
        };
        let rest: Vec<syn::PathSegment> = e.path.segments.iter().skip(1).cloned().collect();
        let tokens = match &bound {
            syn::Type::Path(bp) if bp.qself.is_none() => {
                let mut path = bp.path.clone();
                turbofish(&mut path);
                quote!(#path #(:: #rest)*)
            }
            other => quote!(<#other> #(:: #rest)*),
        };
        match syn::parse2::<syn::ExprPath>(tokens) {
            Ok(mut new) => {
                new.attrs = std::mem::take(&mut e.attrs);
                *e = new;
            }
            Err(err) => self.fail(format!(
                "typevar {name} bound to `{}` cannot be used as a value: {err}",
                bound.to_token_stream()
            )),
        }
    }

    fn visit_expr_struct_mut(&mut self, e: &mut syn::ExprStruct) {
        visit_mut::visit_expr_struct_mut(self, e);
        if e.qself.is_none() {
            self.splice_path(&mut e.path);
        }
    }

    fn visit_pat_struct_mut(&mut self, p: &mut syn::PatStruct) {
        visit_mut::visit_pat_struct_mut(self, p);
        if p.qself.is_none() {
            self.splice_path(&mut p.path);
        }
    }

    fn visit_pat_tuple_struct_mut(&mut self, p: &mut syn::PatTupleStruct) {
        visit_mut::visit_pat_tuple_struct_mut(self, p);
        if p.qself.is_none() {
            self.splice_path(&mut p.path);
        }
    }

    fn visit_macro_mut(&mut self, mac: &mut syn::Macro) {
        visit_mut::visit_macro_mut(self, mac);
        let tokens = std::mem::take(&mut mac.tokens);
        mac.tokens = self.rewrite_tokens(tokens);
    }
}
