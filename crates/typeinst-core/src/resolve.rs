//! Typevar dependency propagation from registered generic roots.
//!
//! Only signature positions are walked here. Bodies are classified afterwards, once the set of
//! generic types of the package is final.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bindings::Bindings;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};
use crate::mangle::mangle_dep_type_name;
use crate::model::{PkgDesc, TypeId};
use crate::walk::{walk_signatures, DeclRef, IdentPos};

impl PkgDesc {
    /// Resolves every generic root, validates the result and classifies occurrences.
    pub fn resolve_generic(&mut self) -> Result<(), Diagnostic> {
        let roots: Vec<TypeId> = self
            .generic
            .iter()
            .filter_map(|name| self.type_id(name))
            .collect();
        let mut reached: Vec<(TypeId, BTreeSet<TypeId>)> = Vec::with_capacity(roots.len());
        for root in roots {
            let mut visited = BTreeSet::new();
            self.resolve_recur(root, root, &mut visited);
            info!(
                package = %self.path,
                "resolved: type {} ({} types reached)",
                self.name_of(root),
                visited.len()
            );
            reached.push((root, visited));
        }
        self.propagate_to_fixed_point(&reached);

        self.validate_resolution()?;

        let generic: Vec<TypeId> = self
            .generic
            .iter()
            .filter_map(|name| self.type_id(name))
            .collect();
        for id in generic {
            self.mark_occurrences(id);
        }
        Ok(())
    }

    /// Names in type and qualifier positions of every signature of `id`.
    fn signature_names(&self, id: TypeId) -> Vec<String> {
        let mut names = Vec::new();
        for (_, decl) in DeclRef::roots_of(id, &self.types[id.0]) {
            walk_signatures(decl, |site| {
                if matches!(site.pos, IdentPos::Type | IdentPos::Qualifier) {
                    names.push(site.name);
                }
            });
        }
        names
    }

    fn resolve_recur(&mut self, root: TypeId, id: TypeId, visited: &mut BTreeSet<TypeId>) {
        if !visited.insert(id) {
            return;
        }
        self.states[id.0].visited = true;

        let names = self.signature_names(id);
        let mut deps: BTreeSet<String> = self.states[id.0].deps.clone().unwrap_or_default();
        deps.extend(names.iter().filter(|n| self.typevars.contains(*n)).cloned());
        // Direct typevars must be visible to dependencies that cycle back here.
        self.states[id.0].deps = Some(deps.clone());

        let own = self.types[id.0].name.clone();
        let mut seen = BTreeSet::new();
        for name in names {
            if name == own || self.typevars.contains(&name) || !seen.insert(name.clone()) {
                continue;
            }
            let Some(dep) = self.type_id(&name) else {
                continue;
            };
            self.resolve_recur(root, dep, visited);
            let dep_deps = self.states[dep.0]
                .deps
                .as_ref()
                .filter(|d| !d.is_empty())
                .cloned();
            if let Some(dep_deps) = dep_deps {
                deps.extend(dep_deps);
                self.generic.insert(name);
                self.states[id.0].deps = Some(deps.clone());
            }
        }

        if deps.is_empty() {
            self.states[id.0].deps = None;
            return;
        }
        self.states[id.0].deps = Some(deps);
        if id != root {
            self.inherit_from(root, id);
        }
    }

    /// Closes dependency sets over signature edges between reached types.
    ///
    /// The depth-first pass sees a root's dependency set only as far as it was built when a
    /// back-edge reached it, so types behind such an edge may still be missing typevars.
    fn propagate_to_fixed_point(&mut self, reached: &[(TypeId, BTreeSet<TypeId>)]) {
        let ids: BTreeSet<TypeId> = reached.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        let mut edges: Vec<(TypeId, Vec<TypeId>)> = Vec::with_capacity(ids.len());
        for &id in &ids {
            let mut to: Vec<TypeId> = self
                .signature_names(id)
                .iter()
                .filter(|n| !self.typevars.contains(*n))
                .filter_map(|n| self.type_id(n))
                .filter(|dep| *dep != id)
                .collect();
            to.sort();
            to.dedup();
            edges.push((id, to));
        }

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            for (id, to) in &edges {
                let mut deps: BTreeSet<String> =
                    self.states[id.0].deps.clone().unwrap_or_default();
                let before = deps.len();
                for dep in to {
                    if let Some(d) = self.states[dep.0].deps.as_ref() {
                        deps.extend(d.iter().cloned());
                    }
                }
                if deps.len() != before {
                    changed = true;
                    self.generic.insert(self.types[id.0].name.clone());
                    self.states[id.0].deps = Some(deps);
                }
            }
            if !changed {
                break;
            }
        }
        debug!(package = %self.path, rounds, "walk: dependency sets closed");

        for (root, visited) in reached {
            for &id in visited {
                if id != *root && self.states[id.0].is_generic() {
                    self.inherit_from(*root, id);
                }
            }
        }
    }

    /// Gives `id` a derived instance name for every bindings set of `root` it lacks.
    fn inherit_from(&mut self, root: TypeId, id: TypeId) {
        let root_name = self.types[root.0].name.clone();
        let own = self.types[id.0].name.clone();
        let root_inst: Vec<(Arc<Bindings>, String)> = self.states[root.0]
            .inst
            .iter()
            .map(|(b, n)| (Arc::clone(b), n.clone()))
            .collect();
        let state = &mut self.states[id.0];
        for (b, inst) in root_inst {
            state.inst.entry(b).or_insert_with(|| {
                let name = mangle_dep_type_name(&own, &root_name, &inst);
                debug!("walk: type {own} inherits {name} from {root_name}");
                name
            });
        }
    }

    fn validate_resolution(&self) -> Result<(), Diagnostic> {
        for name in &self.generic {
            let Some(id) = self.type_id(name) else {
                continue;
            };
            let state = &self.states[id.0];
            let fail = |code: DiagnosticCode, message: String| {
                Diagnostic::error(code, Phase::Resolve, message)
                    .with_package(&self.path)
                    .with_type(name)
            };

            let mut shapes = state.inst.keys().map(|b| b.shape());
            if let Some(first) = shapes.next() {
                if let Some(other) = shapes.find(|s| *s != first) {
                    return Err(fail(
                        DiagnosticCode::TI0104InconsistentShape,
                        format!("{name} is reached with bindings {{{first}}} and {{{other}}}"),
                    ));
                }
            }

            let Some(deps) = state.deps.as_ref() else {
                continue;
            };
            let Some(bindings) = state.shape() else {
                return Err(fail(
                    DiagnosticCode::TI0200UnboundTypevar,
                    format!("{name} depends on typevars but has no instance"),
                )
                .with_names(deps.iter().map(String::as_str)));
            };
            let unbound: Vec<&str> = deps
                .iter()
                .filter(|tv| !bindings.binds_typevar(tv))
                .map(String::as_str)
                .collect();
            if !unbound.is_empty() {
                return Err(fail(
                    DiagnosticCode::TI0200UnboundTypevar,
                    format!("{name} depends on unbound typevars: {}", unbound.join(", ")),
                )
                .with_names(unbound));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::bindings::{BindingCache, TypeArgs};
    use crate::diagnostics::DiagnosticCode;
    use crate::frontend::{parse_package, PackageSource};
    use crate::model::PkgDesc;

    fn pkg(src: &str) -> PkgDesc {
        parse_package(&PackageSource::from_files("tables", [("lib.rs", src)]))
            .expect("parse package")
            .0
    }

    fn args(pairs: &[(&str, &str)]) -> TypeArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn instances(p: &PkgDesc, name: &str) -> Vec<String> {
        let id = p.type_id(name).expect("declared");
        p.state(id).instances().values().cloned().collect()
    }

    #[test]
    fn typevars_propagate_through_dependencies() {
        let cache = BindingCache::new();
        let mut p = pkg("pub struct K;\n\
             pub struct Entry { key: K, hits: usize }\n\
             pub struct Table { entries: Vec<Entry> }\n\
             pub struct Counter { n: usize }\n\
             impl Table { pub fn counter(&self) -> Counter { Counter { n: 0 } } }\n");
        p.instantiate(&cache, "Table", "IntTable", &args(&[("K", "i32")]))
            .expect("instantiate");
        p.resolve_generic().expect("resolve");

        let entry = p.type_id("Entry").expect("declared");
        let deps = p.state(entry).deps().expect("Entry is generic");
        assert!(deps.contains("K"));
        assert!(p.generic().contains("Entry"));
        assert_eq!(instances(&p, "Entry"), vec!["IntTableEntry".to_string()]);

        let counter = p.type_id("Counter").expect("declared");
        assert!(p.state(counter).is_visited());
        assert!(p.state(counter).deps().is_none());
        assert!(p.state(counter).instances().is_empty());
        assert!(!p.generic().contains("Counter"));
    }

    #[test]
    fn dependency_cycles_terminate() {
        let cache = BindingCache::new();
        let mut p = pkg("pub struct K;\n\
             pub struct Node { key: K, tree: Option<Box<Tree>> }\n\
             pub struct Tree { root: Option<Box<Node>> }\n");
        p.instantiate(&cache, "Tree", "IntTree", &args(&[("K", "i32")]))
            .expect("instantiate");
        p.resolve_generic().expect("resolve");

        for name in ["Tree", "Node"] {
            let id = p.type_id(name).expect("declared");
            assert!(p.state(id).is_generic(), "{name}");
        }
        assert_eq!(instances(&p, "Node"), vec!["IntTreeNode".to_string()]);
    }

    #[test]
    fn back_edges_to_the_root_are_generic_in_any_field_order() {
        for fields in ["d: D, a: A", "a: A, d: D"] {
            let cache = BindingCache::new();
            let mut p = pkg(&format!(
                "pub struct K;\n\
                 pub struct A {{ k: K }}\n\
                 pub struct D {{ r: Option<Box<R>> }}\n\
                 pub struct R {{ {fields} }}\n"
            ));
            p.instantiate(&cache, "R", "IntR", &args(&[("K", "i32")]))
                .expect("instantiate");
            p.resolve_generic().expect("resolve");

            let d = p.type_id("D").expect("declared");
            assert!(p.state(d).deps().is_some_and(|s| s.contains("K")), "{fields}");
            assert!(p.generic().contains("D"), "{fields}");
            assert_eq!(instances(&p, "D"), vec!["IntRD".to_string()], "{fields}");
            assert_eq!(instances(&p, "A"), vec!["IntRA".to_string()], "{fields}");
        }
    }

    #[test]
    fn unbound_typevar_is_reported() {
        let cache = BindingCache::new();
        let mut p = pkg("/// typeinst: typevar\npub type K = ();\n\
             /// typeinst: typevar\npub type V = ();\n\
             pub struct Map { k: K, v: V }\n");
        p.instantiate(&cache, "Map", "IntMap", &args(&[("K", "i32")]))
            .expect("instantiate");
        let err = p.resolve_generic().expect_err("V unbound");
        assert_eq!(err.code, DiagnosticCode::TI0200UnboundTypevar);
        assert_eq!(err.context.names, vec!["V".to_string()]);
    }

    #[test]
    fn roots_reached_with_another_shape_are_rejected() {
        let cache = BindingCache::new();
        let mut p = pkg("pub struct K;\npub struct V;\n\
             pub struct Inner { k: K }\n\
             pub struct Outer { inner: Inner, v: V }\n");
        p.instantiate(&cache, "Inner", "ByteInner", &args(&[("K", "u8")]))
            .expect("inner");
        p.instantiate(&cache, "Outer", "ByteOuter", &args(&[("K", "u8"), ("V", "u8")]))
            .expect("outer");
        let err = p.resolve_generic().expect_err("shapes differ");
        assert_eq!(err.code, DiagnosticCode::TI0104InconsistentShape);
        assert_eq!(err.context.type_name.as_deref(), Some("Inner"));
    }

    #[test]
    fn method_bodies_do_not_create_dependencies() {
        let cache = BindingCache::new();
        let mut p = pkg("pub struct K;\n\
             pub struct Helper { n: usize }\n\
             pub struct Set { k: K }\n\
             impl Set { pub fn len(&self) -> usize { let h: Helper = Helper { n: 0 }; h.n } }\n");
        p.instantiate(&cache, "Set", "IntSet", &args(&[("K", "i32")]))
            .expect("instantiate");
        p.resolve_generic().expect("resolve");
        let helper = p.type_id("Helper").expect("declared");
        assert!(!p.state(helper).is_visited());
    }
}
