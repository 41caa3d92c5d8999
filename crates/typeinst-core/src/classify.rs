use tracing::debug;

use crate::model::{OccId, OccKind, PkgDesc, TypeId};
use crate::walk::{walk_full, DeclRef, IdentPos, IdentSite};

impl PkgDesc {
    /// Records every identifier of `id`'s declaration, impls and constructors that the printer
    /// must rewrite.
    pub(crate) fn mark_occurrences(&mut self, id: TypeId) {
        let mut found: Vec<(OccId, OccKind)> = Vec::new();
        for (root, decl) in DeclRef::roots_of(id, &self.types[id.0]) {
            walk_full(decl, |site| {
                if let Some(kind) = self.classify(&site) {
                    found.push((
                        OccId {
                            root,
                            ordinal: site.ordinal,
                        },
                        kind,
                    ));
                }
            });
        }
        debug!(
            package = %self.path,
            "walk: type {} ({} occurrences)",
            self.name_of(id),
            found.len()
        );
        for (occ, kind) in found {
            self.occ.insert(occ, kind);
        }
    }

    fn classify(&self, site: &IdentSite) -> Option<OccKind> {
        let name = site.name.as_str();
        let is_type = self.is_type_name(name);
        let is_ctor = self.is_generic_ctor(name);
        let is_pkg = self.imp_rename.contains_key(name);
        let order: &[(bool, OccKind)] = match site.pos {
            IdentPos::Type | IdentPos::Qualifier => {
                &[(is_type, OccKind::Type), (is_pkg, OccKind::Pkg)]
            }
            IdentPos::Call => &[
                (is_ctor, OccKind::Ctor),
                (is_type, OccKind::Type),
                (is_pkg, OccKind::Pkg),
            ],
            // Raw text match: may capture an unrelated value named like a generic type.
            IdentPos::Unresolved => &[
                (is_type, OccKind::Type),
                (is_ctor, OccKind::Ctor),
                (is_pkg, OccKind::Pkg),
            ],
        };
        order.iter().find(|(hit, _)| *hit).map(|(_, kind)| *kind)
    }

    fn is_generic_ctor(&self, name: &str) -> bool {
        self.ctors
            .get(name)
            .is_some_and(|owner| self.generic.contains(self.name_of(*owner)))
    }
}
