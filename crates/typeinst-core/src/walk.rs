//! Identifier walker shared by the resolver and the occurrence classifier.
//!
//! `syn` identifiers carry no declaration-site binding, so each one is tagged with the
//! syntactic position it appears in and addressed by its ordinal in `syn::visit` order.
//! `syn::visit_mut` visits the identifiers of a cloned tree in the same order, which is what
//! lets the printer apply decisions by ordinal.

use std::collections::HashMap;

use proc_macro2::{Ident, TokenStream, TokenTree};
use syn::visit::{self, Visit};

use crate::model::{DeclRoot, Ordinal, TypeDecl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdentPos {
    /// Single-segment path in a type position, or the declared type's own name.
    Type,
    /// Single-segment callee of a call expression.
    Call,
    /// Leading segment of a multi-segment path.
    Qualifier,
    /// Single-segment value path or an identifier token inside a macro body.
    Unresolved,
}

#[derive(Debug, Clone)]
pub(crate) struct IdentSite {
    pub name: String,
    pub pos: IdentPos,
    pub ordinal: Ordinal,
}

/// Syntax nodes a traversal may decide to skip.
#[derive(Clone, Copy)]
pub(crate) enum Node {
    Block,
    Expr,
}

pub(crate) type NodeFilter = fn(Node) -> bool;

fn signature_nodes(node: Node) -> bool {
    !matches!(node, Node::Block | Node::Expr)
}

fn all_nodes(_: Node) -> bool {
    true
}

/// Borrowed view of one declaration root.
#[derive(Clone, Copy)]
pub(crate) enum DeclRef<'a> {
    Type(&'a syn::Item),
    Impl(&'a syn::ItemImpl),
    Ctor(&'a syn::ItemFn),
}

impl<'a> DeclRef<'a> {
    /// Every root of a type: the item, its impl blocks, its constructors.
    pub(crate) fn roots_of(
        id: crate::model::TypeId,
        decl: &'a TypeDecl,
    ) -> Vec<(DeclRoot, DeclRef<'a>)> {
        let mut out = vec![(DeclRoot::Type(id), DeclRef::Type(&decl.item))];
        for (n, imp) in decl.impls.iter().enumerate() {
            out.push((DeclRoot::Impl(id, n), DeclRef::Impl(imp)));
        }
        for (n, f) in decl.ctors.iter().enumerate() {
            out.push((DeclRoot::Ctor(id, n), DeclRef::Ctor(f)));
        }
        out
    }
}

/// Walks signature positions only: bodies and other expressions are skipped.
pub(crate) fn walk_signatures(root: DeclRef<'_>, sink: impl FnMut(IdentSite)) {
    walk(root, signature_nodes, sink);
}

/// Walks the whole declaration, bodies included.
pub(crate) fn walk_full(root: DeclRef<'_>, sink: impl FnMut(IdentSite)) {
    walk(root, all_nodes, sink);
}

fn walk<F: FnMut(IdentSite)>(root: DeclRef<'_>, filter: NodeFilter, sink: F) {
    let mut w = IdentWalker {
        filter,
        sink,
        next_ident: 0,
        next_macro_token: 0,
        pending: HashMap::new(),
    };
    match root {
        DeclRef::Type(item) => {
            if let Some(ident) = item_ident(item) {
                w.mark(ident, IdentPos::Type);
            }
            w.visit_item(item);
        }
        DeclRef::Impl(imp) => w.visit_item_impl(imp),
        DeclRef::Ctor(f) => {
            w.mark(&f.sig.ident, IdentPos::Call);
            w.visit_item_fn(f);
        }
    }
}

pub(crate) fn item_ident(item: &syn::Item) -> Option<&Ident> {
    match item {
        syn::Item::Struct(s) => Some(&s.ident),
        syn::Item::Enum(e) => Some(&e.ident),
        syn::Item::Union(u) => Some(&u.ident),
        syn::Item::Type(t) => Some(&t.ident),
        _ => None,
    }
}

/// Whether the tokens right after an identifier form a `::` separator.
pub(crate) fn followed_by_path_sep(rest: &[TokenTree]) -> bool {
    match rest {
        [TokenTree::Punct(a), TokenTree::Punct(b), ..] => {
            a.as_char() == ':'
                && a.spacing() == proc_macro2::Spacing::Joint
                && b.as_char() == ':'
        }
        _ => false,
    }
}

struct IdentWalker<F> {
    filter: NodeFilter,
    sink: F,
    next_ident: u32,
    next_macro_token: u32,
    /// Positions decided by a parent node, keyed by identifier address.
    pending: HashMap<*const Ident, IdentPos>,
}

impl<F: FnMut(IdentSite)> IdentWalker<F> {
    fn mark(&mut self, ident: &Ident, pos: IdentPos) {
        self.pending.entry(ident as *const Ident).or_insert(pos);
    }

    /// Marks the segments of `path`; `last` is the position of a single-segment path.
    fn mark_path(&mut self, path: &syn::Path, last: Option<IdentPos>) {
        if path.leading_colon.is_some() {
            return;
        }
        let Some(first) = path.segments.first() else {
            return;
        };
        if path.segments.len() > 1 {
            self.mark(&first.ident, IdentPos::Qualifier);
        } else if let Some(pos) = last {
            self.mark(&first.ident, pos);
        }
    }

    fn scan_tokens(&mut self, tokens: TokenStream) {
        let trees: Vec<TokenTree> = tokens.into_iter().collect();
        for (idx, tt) in trees.iter().enumerate() {
            match tt {
                TokenTree::Ident(ident) => {
                    let ordinal = Ordinal::MacroToken(self.next_macro_token);
                    self.next_macro_token += 1;
                    let pos = if followed_by_path_sep(&trees[idx + 1..]) {
                        IdentPos::Qualifier
                    } else {
                        IdentPos::Unresolved
                    };
                    (self.sink)(IdentSite {
                        name: ident.to_string(),
                        pos,
                        ordinal,
                    });
                }
                TokenTree::Group(g) => self.scan_tokens(g.stream()),
                TokenTree::Punct(_) | TokenTree::Literal(_) => {}
            }
        }
    }
}

impl<'ast, F: FnMut(IdentSite)> Visit<'ast> for IdentWalker<F> {
    fn visit_ident(&mut self, i: &'ast Ident) {
        let ordinal = Ordinal::Ident(self.next_ident);
        self.next_ident += 1;
        if let Some(pos) = self.pending.remove(&(i as *const Ident)) {
            (self.sink)(IdentSite {
                name: i.to_string(),
                pos,
                ordinal,
            });
        }
    }

    fn visit_block(&mut self, b: &'ast syn::Block) {
        if (self.filter)(Node::Block) {
            visit::visit_block(self, b);
        }
    }

    fn visit_expr(&mut self, e: &'ast syn::Expr) {
        if (self.filter)(Node::Expr) {
            visit::visit_expr(self, e);
        }
    }

    fn visit_type_path(&mut self, tp: &'ast syn::TypePath) {
        if tp.qself.is_none() {
            self.mark_path(&tp.path, Some(IdentPos::Type));
        }
        visit::visit_type_path(self, tp);
    }

    fn visit_expr_call(&mut self, call: &'ast syn::ExprCall) {
        if let syn::Expr::Path(p) = &*call.func {
            if p.qself.is_none() {
                self.mark_path(&p.path, Some(IdentPos::Call));
            }
        }
        visit::visit_expr_call(self, call);
    }

    fn visit_expr_path(&mut self, ep: &'ast syn::ExprPath) {
        if ep.qself.is_none() {
            self.mark_path(&ep.path, Some(IdentPos::Unresolved));
        }
        visit::visit_expr_path(self, ep);
    }

    fn visit_expr_struct(&mut self, es: &'ast syn::ExprStruct) {
        if es.qself.is_none() {
            self.mark_path(&es.path, Some(IdentPos::Type));
        }
        visit::visit_expr_struct(self, es);
    }

    fn visit_pat_struct(&mut self, ps: &'ast syn::PatStruct) {
        if ps.qself.is_none() {
            self.mark_path(&ps.path, Some(IdentPos::Type));
        }
        visit::visit_pat_struct(self, ps);
    }

    fn visit_pat_tuple_struct(&mut self, pt: &'ast syn::PatTupleStruct) {
        if pt.qself.is_none() {
            self.mark_path(&pt.path, Some(IdentPos::Type));
        }
        visit::visit_pat_tuple_struct(self, pt);
    }

    fn visit_trait_bound(&mut self, tb: &'ast syn::TraitBound) {
        self.mark_path(&tb.path, Some(IdentPos::Type));
        visit::visit_trait_bound(self, tb);
    }

    fn visit_item_impl(&mut self, imp: &'ast syn::ItemImpl) {
        if let Some((_, path, _)) = &imp.trait_ {
            self.mark_path(path, Some(IdentPos::Type));
        }
        visit::visit_item_impl(self, imp);
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        self.mark_path(&mac.path, None);
        visit::visit_macro(self, mac);
        self.scan_tokens(mac.tokens.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sites_full(src: &str) -> Vec<(String, IdentPos)> {
        let f: syn::ItemFn = syn::parse_str(src).expect("parse fn");
        let mut out = Vec::new();
        walk_full(DeclRef::Ctor(&f), |s| out.push((s.name, s.pos)));
        out
    }

    fn has(sites: &[(String, IdentPos)], name: &str, pos: IdentPos) -> bool {
        sites.iter().any(|(n, p)| n == name && *p == pos)
    }

    #[test]
    fn positions_follow_syntax() {
        let sites = sites_full(
            "fn new_map(n: usize) -> Map { \
                let m = Map { entries: Vec::<K>::with_capacity(n) }; \
                let e = new_entry(fmt::format(x)); \
                println!(\"{}\", V::default()); \
                m \
            }",
        );
        assert!(has(&sites, "new_map", IdentPos::Call));
        assert!(has(&sites, "Map", IdentPos::Type));
        assert!(has(&sites, "K", IdentPos::Type));
        assert!(has(&sites, "Vec", IdentPos::Qualifier));
        assert!(has(&sites, "new_entry", IdentPos::Call));
        assert!(has(&sites, "fmt", IdentPos::Qualifier));
        assert!(has(&sites, "x", IdentPos::Unresolved));
        assert!(has(&sites, "V", IdentPos::Qualifier));
        assert!(has(&sites, "m", IdentPos::Unresolved));
        assert!(has(&sites, "n", IdentPos::Unresolved));
        assert!(!sites.iter().any(|(n, _)| n == "entries" || n == "e" || n == "println"));
    }

    #[test]
    fn signature_walk_skips_bodies() {
        let f: syn::ItemFn =
            syn::parse_str("fn make(k: K) -> Box<Map> { let t: Hidden = Hidden; todo!() }")
                .expect("parse fn");
        let mut names = Vec::new();
        walk_signatures(DeclRef::Ctor(&f), |s| names.push(s.name));
        assert!(names.contains(&"K".to_string()));
        assert!(names.contains(&"Map".to_string()));
        assert!(!names.contains(&"Hidden".to_string()));
    }

    #[test]
    fn ordinals_are_dense_in_visit_order() {
        let item: syn::Item = syn::parse_str("struct Pair { a: K, b: K }").expect("parse item");
        let mut ords = Vec::new();
        walk_full(DeclRef::Type(&item), |s| ords.push((s.name, s.ordinal)));
        // Pair, a, K, b, K
        assert_eq!(
            ords,
            vec![
                ("Pair".to_string(), Ordinal::Ident(0)),
                ("K".to_string(), Ordinal::Ident(2)),
                ("K".to_string(), Ordinal::Ident(4)),
            ]
        );
    }
}
