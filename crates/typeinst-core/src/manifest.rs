use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bindings::TypeArgs;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};

pub const MANIFEST_SCHEMA_VERSION: &str = "typeinst.manifest@0.1.0";

/// Instantiation requests for one generated module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub schema_version: String,
    pub module: String,
    /// Extra imports of the generated module, name -> path.
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    /// Template packages, alias -> directory.
    pub packages: BTreeMap<String, String>,
    pub items: Vec<ManifestItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestItem {
    pub instance: String,
    /// Generic roots as `package::Type`; several roots merge into one instance.
    pub types: Vec<String>,
    pub type_args: BTreeMap<String, String>,
}

/// One validated (package, type, instance, bindings) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub package: String,
    pub type_name: String,
    pub instance: String,
    pub type_args: TypeArgs,
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read manifest: {}", path.display()))?;
    parse_manifest(&bytes).with_context(|| format!("manifest: {}", path.display()))
}

pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    let m: Manifest = serde_json::from_slice(bytes).context("parse manifest JSON")?;
    if m.schema_version.trim() != MANIFEST_SCHEMA_VERSION {
        anyhow::bail!(
            "manifest schema_version mismatch: expected {MANIFEST_SCHEMA_VERSION} got {:?}",
            m.schema_version
        );
    }
    Ok(m)
}

fn malformed(message: String) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::TI0400MalformedDeclaration,
        Phase::Register,
        message,
    )
}

fn check_ident(what: &str, name: &str) -> Result<(), Diagnostic> {
    match syn::parse_str::<syn::Ident>(name) {
        Ok(_) if !name.starts_with("r#") => Ok(()),
        _ => Err(malformed(format!("{what} {name:?} is not a Rust identifier")).with_names([name])),
    }
}

impl Manifest {
    /// Directory of package `alias`, relative paths resolved against `base_dir`.
    pub fn package_dir(&self, alias: &str, base_dir: &Path) -> Option<PathBuf> {
        let dir = Path::new(self.packages.get(alias)?);
        Some(if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base_dir.join(dir)
        })
    }

    /// Flattens the items into requests, checking names and type expressions.
    pub fn requests(&self) -> Result<Vec<Request>, Diagnostic> {
        let mut out = Vec::new();
        for (idx, item) in self.items.iter().enumerate() {
            let at = |d: Diagnostic| d.with_names([format!("items[{idx}]")]);
            check_ident("instance name", &item.instance).map_err(at)?;
            if item.types.is_empty() {
                return Err(at(malformed(format!(
                    "instance {} names no generic types",
                    item.instance
                ))));
            }
            if item.type_args.is_empty() {
                return Err(at(malformed(format!(
                    "instance {} has no type arguments",
                    item.instance
                ))));
            }
            for (tv, expr) in &item.type_args {
                check_ident("typevar", tv).map_err(at)?;
                if let Err(e) = syn::parse_str::<syn::Type>(expr) {
                    return Err(at(malformed(format!(
                        "type argument {tv} = {expr:?} is not a Rust type: {e}"
                    ))
                    .with_names([tv.as_str()])));
                }
            }

            let mut seen = BTreeSet::new();
            for qualified in &item.types {
                let Some((package, type_name)) = qualified.split_once("::") else {
                    return Err(at(malformed(format!(
                        "generic type {qualified:?} must be qualified by a package alias"
                    ))));
                };
                if !self.packages.contains_key(package) {
                    return Err(at(malformed(format!(
                        "generic type {qualified:?} uses undeclared package {package:?}"
                    ))
                    .with_package(package)));
                }
                check_ident("generic type", type_name).map_err(at)?;
                if !seen.insert(qualified.as_str()) {
                    return Err(at(malformed(format!(
                        "generic type {qualified} repeated in instance {}",
                        item.instance
                    ))));
                }
                out.push(Request {
                    package: package.to_string(),
                    type_name: type_name.to_string(),
                    instance: item.instance.clone(),
                    type_args: item.type_args.clone(),
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(items: serde_json::Value) -> Manifest {
        let v = serde_json::json!({
            "schema_version": MANIFEST_SCHEMA_VERSION,
            "module": "collections",
            "packages": { "maps": "templates/maps" },
            "items": items,
        });
        parse_manifest(&serde_json::to_vec(&v).expect("encode")).expect("parse manifest")
    }

    #[test]
    fn requests_flatten_merged_types() {
        let m = manifest(serde_json::json!([
            { "instance": "IntMap", "types": ["maps::Map", "maps::Set"], "type_args": { "K": "i64" } }
        ]));
        let reqs = m.requests().expect("valid");
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[1].package, "maps");
        assert_eq!(reqs[1].type_name, "Set");
        assert_eq!(reqs[1].instance, "IntMap");
        assert_eq!(
            m.package_dir("maps", Path::new("/work")),
            Some(PathBuf::from("/work/templates/maps"))
        );
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let v = serde_json::json!({
            "schema_version": "typeinst.manifest@9",
            "module": "m",
            "packages": {},
            "items": [],
        });
        let err = parse_manifest(&serde_json::to_vec(&v).expect("encode")).expect_err("schema");
        assert!(format!("{err:#}").contains("schema_version mismatch"), "{err:#}");
    }

    #[test]
    fn invalid_items_are_malformed() {
        let cases = [
            serde_json::json!([{ "instance": "A", "types": ["Map"], "type_args": { "K": "i64" } }]),
            serde_json::json!([{ "instance": "A", "types": ["sets::Set"], "type_args": { "K": "i64" } }]),
            serde_json::json!([{ "instance": "A", "types": ["maps::Map", "maps::Map"], "type_args": { "K": "i64" } }]),
            serde_json::json!([{ "instance": "A", "types": [], "type_args": { "K": "i64" } }]),
            serde_json::json!([{ "instance": "A", "types": ["maps::Map"], "type_args": {} }]),
            serde_json::json!([{ "instance": "A", "types": ["maps::Map"], "type_args": { "K": "Vec<" } }]),
            serde_json::json!([{ "instance": "not an ident", "types": ["maps::Map"], "type_args": { "K": "i64" } }]),
        ];
        for items in cases {
            let err = manifest(items.clone()).requests().expect_err("invalid item");
            assert_eq!(err.code, DiagnosticCode::TI0400MalformedDeclaration, "{items}");
            assert!(err.context.names.contains(&"items[0]".to_string()), "{err}");
        }
    }
}
