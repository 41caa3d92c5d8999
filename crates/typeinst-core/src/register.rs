use tracing::debug;

use crate::bindings::{BindingCache, TypeArgs};
use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};
use crate::model::PkgDesc;

impl PkgDesc {
    /// Registers `inst_name` as the instance of generic root `type_name` under `args`.
    pub fn instantiate(
        &mut self,
        cache: &BindingCache,
        type_name: &str,
        inst_name: &str,
        args: &TypeArgs,
    ) -> Result<(), Diagnostic> {
        let path = self.path.clone();
        let fail = |code: DiagnosticCode, message: String| {
            Diagnostic::error(code, Phase::Register, message)
                .with_package(&path)
                .with_type(type_name)
        };

        let Some(id) = self.type_id(type_name) else {
            return Err(fail(
                DiagnosticCode::TI0100UnknownType,
                format!("unknown type: {type_name}"),
            ));
        };
        if self.types[id.0].typevar {
            return Err(fail(
                DiagnosticCode::TI0101InvalidTypevar,
                format!("typevar {type_name} cannot be instantiated"),
            ));
        }

        for tv in args.keys() {
            if self.typevars.contains(tv) {
                continue;
            }
            if self.strict {
                return Err(fail(
                    DiagnosticCode::TI0102StrictModeViolation,
                    format!("{tv} is not declared as a typevar"),
                )
                .with_names([tv.as_str()]));
            }
            let Some(tv_id) = self.type_id(tv) else {
                return Err(fail(
                    DiagnosticCode::TI0101InvalidTypevar,
                    format!("typevar {tv} is not a type declared in the package"),
                )
                .with_names([tv.as_str()]));
            };
            if tv_id == id {
                return Err(fail(
                    DiagnosticCode::TI0101InvalidTypevar,
                    format!("{type_name} cannot be its own typevar"),
                ));
            }
            self.types[tv_id.0]
                .mark_typevar()
                .map_err(|d| d.or_package(&path).with_names([tv.as_str()]))?;
            self.typevars.insert(tv.clone());
            debug!(package = %path, typevar = %tv, "promoted type to typevar");
        }

        let Some(bindings) = cache.intern(args) else {
            return Err(fail(
                DiagnosticCode::TI0400MalformedDeclaration,
                format!("instance {inst_name} binds no typevars"),
            ));
        };

        let state = &mut self.states[id.0];
        if let Some(old) = state.inst.get(&bindings) {
            return Err(fail(
                DiagnosticCode::TI0103DuplicateInstantiation,
                format!(
                    "{type_name} already instantiated as {old} for bindings {}",
                    bindings.key()
                ),
            )
            .with_names([old.as_str(), inst_name]));
        }
        if let Some(existing) = state.shape() {
            if existing.shape() != bindings.shape() {
                return Err(fail(
                    DiagnosticCode::TI0104InconsistentShape,
                    format!(
                        "instance {inst_name} binds {{{}}}, earlier instances bind {{{}}}",
                        bindings.shape(),
                        existing.shape()
                    ),
                ));
            }
        }
        state.inst.insert(bindings, inst_name.to_string());
        self.generic.insert(type_name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parse_package, PackageSource};

    const MAPS: &str = "\
        pub struct K;\n\
        pub struct V;\n\
        pub struct Map { entries: Vec<(K, V)> }\n\
        pub fn new_map() -> Map { Map { entries: Vec::new() } }\n\
        impl Map { pub fn len(&self) -> usize { self.entries.len() } }\n";

    fn pkg(src: &str) -> PkgDesc {
        parse_package(&PackageSource::from_files("maps", [("lib.rs", src)]))
            .expect("parse package")
            .0
    }

    fn args(pairs: &[(&str, &str)]) -> TypeArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn registers_and_promotes_typevars() {
        let cache = BindingCache::new();
        let mut p = pkg(MAPS);
        p.instantiate(&cache, "Map", "StrMap", &args(&[("K", "String"), ("V", "u8")]))
            .expect("instantiate");
        assert!(p.typevars().contains("K"));
        assert!(p.typevars().contains("V"));
        assert!(p.generic().contains("Map"));
        let map = p.type_id("Map").expect("declared");
        let b = cache
            .intern(&args(&[("K", "String"), ("V", "u8")]))
            .expect("non-empty");
        assert_eq!(p.state(map).instance_for(&b), Some("StrMap"));
    }

    #[test]
    fn inconsistent_shape_is_rejected() {
        let cache = BindingCache::new();
        let mut p = pkg(MAPS);
        p.instantiate(&cache, "Map", "A", &args(&[("K", "i32")]))
            .expect("first");
        let err = p
            .instantiate(&cache, "Map", "B", &args(&[("K", "String"), ("V", "i32")]))
            .expect_err("shape mismatch");
        assert_eq!(err.code, DiagnosticCode::TI0104InconsistentShape);
        assert_eq!(err.context.type_name.as_deref(), Some("Map"));
    }

    #[test]
    fn duplicate_bindings_are_rejected_under_any_name() {
        let cache = BindingCache::new();
        let mut p = pkg(MAPS);
        p.instantiate(&cache, "Map", "A", &args(&[("K", "i32")]))
            .expect("first");
        let err = p
            .instantiate(&cache, "Map", "B", &args(&[("K", "i32")]))
            .expect_err("duplicate");
        assert_eq!(err.code, DiagnosticCode::TI0103DuplicateInstantiation);
    }

    #[test]
    fn type_with_methods_cannot_be_a_typevar() {
        let cache = BindingCache::new();
        let mut p = pkg(&format!("{MAPS}pub struct Holder {{ m: Map }}\n"));
        let err = p
            .instantiate(&cache, "Holder", "H", &args(&[("Map", "i32")]))
            .expect_err("Map has methods");
        assert_eq!(err.code, DiagnosticCode::TI0101InvalidTypevar);
        assert!(!p.typevars().contains("Map"));
    }

    #[test]
    fn unknown_names() {
        let cache = BindingCache::new();
        let mut p = pkg(MAPS);
        let err = p
            .instantiate(&cache, "Set", "S", &args(&[("K", "i32")]))
            .expect_err("unknown root");
        assert_eq!(err.code, DiagnosticCode::TI0100UnknownType);
        let err = p
            .instantiate(&cache, "Map", "M", &args(&[("Q", "i32")]))
            .expect_err("unknown typevar");
        assert_eq!(err.code, DiagnosticCode::TI0101InvalidTypevar);
    }

    #[test]
    fn strict_packages_reject_promotion() {
        let cache = BindingCache::new();
        let mut p = pkg("/// typeinst: typevar\npub type K = ();\npub struct V;\npub struct Set { k: K, v: V }\n");
        assert!(p.is_strict());
        p.instantiate(&cache, "Set", "A", &args(&[("K", "i32")]))
            .expect("declared typevar");
        let err = p
            .instantiate(&cache, "Set", "B", &args(&[("K", "u8"), ("V", "u8")]))
            .expect_err("V is not declared");
        assert_eq!(err.code, DiagnosticCode::TI0102StrictModeViolation);
        assert_eq!(err.context.names, vec!["V".to_string()]);
    }

    #[test]
    fn empty_args_are_malformed() {
        let cache = BindingCache::new();
        let mut p = pkg(MAPS);
        let err = p
            .instantiate(&cache, "Map", "M", &TypeArgs::new())
            .expect_err("no bindings");
        assert_eq!(err.code, DiagnosticCode::TI0400MalformedDeclaration);
    }
}
