//! One typeinst run: package loading, registration, resolution and printing.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::bindings::{BindingCache, TypeArgs};
use crate::diagnostics::{run_guarded, Diagnostic, DiagnosticCode, Phase};
use crate::frontend::{parse_package, read_package_dir, PackageSource};
use crate::imports::{Imports, SymbolGen};
use crate::manifest::Manifest;
use crate::model::PkgDesc;
use crate::print::print_module;
use crate::report::Report;

pub struct Session {
    module: String,
    cache: BindingCache,
    imports: Imports,
    symbols: SymbolGen,
    packages: BTreeMap<String, PkgDesc>,
    resolved: bool,
}

impl Session {
    pub fn new(module: &str) -> Self {
        Session {
            module: module.to_string(),
            cache: BindingCache::new(),
            imports: Imports::new(),
            symbols: SymbolGen::default(),
            packages: BTreeMap::new(),
            resolved: false,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn cache(&self) -> &BindingCache {
        &self.cache
    }

    pub fn imports(&self) -> &Imports {
        &self.imports
    }

    pub fn packages(&self) -> &BTreeMap<String, PkgDesc> {
        &self.packages
    }

    /// Adds an import of the generated module itself; package imports merge around it.
    pub fn add_import(&mut self, name: &str, path: &str) -> Result<(), Diagnostic> {
        self.imports.add(name, path)
    }

    /// Loads the package at `dir` under the key `path`, once.
    pub fn package(&mut self, path: &str, dir: &Path) -> Result<(), Diagnostic> {
        if self.packages.contains_key(path) {
            return Ok(());
        }
        let src = read_package_dir(path, dir)?;
        self.add_package(&src)
    }

    /// Parses in-memory sources as package `src.path`, once.
    pub fn add_package(&mut self, src: &PackageSource) -> Result<(), Diagnostic> {
        if self.packages.contains_key(&src.path) {
            return Ok(());
        }
        let (mut pkg, imports) = parse_package(src)?;
        pkg.imp_rename = self
            .imports
            .merge(&imports, &mut self.symbols)
            .map_err(|d| d.or_package(&src.path))?;
        debug!(
            package = %src.path,
            imports = imports.len(),
            renamed = pkg.imp_rename.len(),
            "package loaded"
        );
        self.packages.insert(src.path.clone(), pkg);
        Ok(())
    }

    pub fn instantiate(
        &mut self,
        package: &str,
        type_name: &str,
        instance: &str,
        args: &TypeArgs,
    ) -> Result<(), Diagnostic> {
        if self.resolved {
            return Err(Diagnostic::internal(format!(
                "instantiate {package}::{type_name} after resolution"
            )));
        }
        let Some(pkg) = self.packages.get_mut(package) else {
            return Err(Diagnostic::error(
                DiagnosticCode::TI0100UnknownType,
                Phase::Register,
                format!("package {package} is not loaded"),
            )
            .with_package(package)
            .with_type(type_name));
        };
        info!("dsl: type {package}::{type_name} as {instance}");
        pkg.instantiate(&self.cache, type_name, instance, args)
    }

    /// Resolves every package in path order; later calls are no-ops.
    pub fn resolve_all(&mut self) -> Result<(), Diagnostic> {
        if self.resolved {
            return Ok(());
        }
        for pkg in self.packages.values_mut() {
            pkg.resolve_generic()?;
        }
        self.resolved = true;
        Ok(())
    }

    pub fn print(&self) -> Result<String, Diagnostic> {
        if !self.resolved {
            return Err(Diagnostic::internal("print before resolution"));
        }
        print_module(&self.module, &self.imports, &self.packages)
    }

    pub fn report(&self) -> Report {
        Report::from_session(self)
    }
}

/// Loads, registers and resolves everything `manifest` asks for.
pub fn prepare(manifest: &Manifest, base_dir: &Path) -> Result<Session, Diagnostic> {
    run_guarded(|| {
        let mut session = Session::new(&manifest.module);
        for (name, path) in &manifest.imports {
            session.add_import(name, path)?;
        }
        for alias in manifest.packages.keys() {
            let Some(dir) = manifest.package_dir(alias, base_dir) else {
                continue;
            };
            session.package(alias, &dir)?;
        }
        for req in manifest.requests()? {
            session
                .instantiate(&req.package, &req.type_name, &req.instance, &req.type_args)
                .map_err(|d| d.with_names([format!("instance {}", req.instance)]))?;
        }
        session.resolve_all()?;
        Ok(session)
    })
}

/// Runs the whole pipeline and returns the generated source.
pub fn generate(manifest: &Manifest, base_dir: &Path) -> Result<String, Diagnostic> {
    let session = prepare(manifest, base_dir)?;
    run_guarded(|| session.print())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> TypeArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn colliding_package_imports_are_renamed() {
        let mut s = Session::new("out");
        s.add_import("fmt", "core::fmt").expect("base import");
        s.add_package(&PackageSource::from_files(
            "shows",
            [(
                "lib.rs",
                "use std::fmt;\n\
                 pub struct K;\n\
                 pub struct Show { k: K }\n\
                 impl fmt::Display for Show {\n\
                     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { Ok(()) }\n\
                 }\n",
            )],
        ))
        .expect("load package");
        let pkg = &s.packages()["shows"];
        assert_eq!(
            pkg.import_renames().get("fmt").map(String::as_str),
            Some("_Pkg_10")
        );
        assert_eq!(s.imports().named("_Pkg_10"), Some("std::fmt"));

        s.instantiate("shows", "Show", "IntShow", &args(&[("K", "i32")]))
            .expect("instantiate");
        s.resolve_all().expect("resolve");
        let out = s.print().expect("print");
        assert!(out.contains("use std::fmt as _Pkg_10;"), "{out}");
        assert!(out.contains("impl _Pkg_10::Display for IntShow"), "{out}");
        assert!(!out.contains("fmt::Formatter"), "{out}");
    }

    #[test]
    fn equal_bindings_share_one_cached_object() {
        let mut s = Session::new("out");
        s.add_package(&PackageSource::from_files(
            "p",
            [("lib.rs", "pub struct K;\npub struct A { k: K }\npub struct B { k: K }\n")],
        ))
        .expect("load package");
        s.instantiate("p", "A", "IntA", &args(&[("K", "i32")]))
            .expect("A");
        s.instantiate("p", "B", "IntB", &args(&[("K", "i32")]))
            .expect("B");
        assert_eq!(s.cache().len(), 1);
    }

    #[test]
    fn unknown_package_is_reported() {
        let mut s = Session::new("out");
        let err = s
            .instantiate("nope", "Map", "M", &args(&[("K", "i32")]))
            .expect_err("package not loaded");
        assert_eq!(err.code, DiagnosticCode::TI0100UnknownType);
        assert!(s.print().is_err());
    }
}
