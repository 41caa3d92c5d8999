//! Template package loader: Rust sources -> [`PkgDesc`] + the package's import registry.

use std::path::Path;

use tracing::{debug, warn};

use crate::diagnostics::{Diagnostic, DiagnosticCode, Phase};
use crate::imports::Imports;
use crate::model::{PkgDesc, SourceDigest, TypeDecl};
use crate::walk::item_ident;

const MARKER_PREFIX: &str = "typeinst:";
const CTOR_UNPACK_DEPTH: u32 = 16;
const CTOR_WRAPPERS: &[&str] = &["Box", "Rc", "Arc", "Vec", "Option", "Result"];

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// Raw sources of one package, keyed by the path the package is requested under.
#[derive(Debug, Clone)]
pub struct PackageSource {
    pub path: String,
    pub files: Vec<SourceFile>,
}

impl PackageSource {
    pub fn from_files<N, T>(path: &str, files: impl IntoIterator<Item = (N, T)>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        PackageSource {
            path: path.to_string(),
            files: files
                .into_iter()
                .map(|(name, text)| SourceFile {
                    name: name.into(),
                    text: text.into(),
                })
                .collect(),
        }
    }
}

fn is_package_file(name: &str) -> bool {
    name.ends_with(".rs") && !name.ends_with("_test.rs") && name != "tests.rs"
}

pub fn read_package_dir(path: &str, dir: &Path) -> Result<PackageSource, Diagnostic> {
    let read_failure = |what: String| {
        Diagnostic::error(DiagnosticCode::TI0001ParseFailure, Phase::Parse, what).with_package(path)
    };
    let entries = std::fs::read_dir(dir)
        .map_err(|e| read_failure(format!("read package dir {}: {e}", dir.display())))?;
    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| read_failure(format!("read package dir {}: {e}", dir.display())))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().to_string();
        if is_file && is_package_file(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        return Err(read_failure(format!("no Rust sources in {}", dir.display())));
    }
    names.sort();

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let file_path = dir.join(&name);
        let text = std::fs::read_to_string(&file_path)
            .map_err(|e| read_failure(format!("read {}: {e}", file_path.display())))?;
        files.push(SourceFile { name, text });
    }
    Ok(PackageSource {
        path: path.to_string(),
        files,
    })
}

/// Builds the declaration model of a package and collects its imports.
pub fn parse_package(src: &PackageSource) -> Result<(PkgDesc, Imports), Diagnostic> {
    let mut pkg = PkgDesc::new(&src.path);
    let mut imports = Imports::new();
    let mut impls: Vec<syn::ItemImpl> = Vec::new();

    for file in &src.files {
        let ast = syn::parse_file(&file.text).map_err(|e| {
            Diagnostic::error(
                DiagnosticCode::TI0001ParseFailure,
                Phase::Parse,
                format!("{}: {e}", file.name),
            )
            .with_package(&src.path)
        })?;
        pkg.sources.push(SourceDigest {
            file: file.name.clone(),
            sha256: crate::util::sha256_hex(file.text.as_bytes()),
        });

        for item in ast.items {
            match item {
                syn::Item::Use(u) => imports.add_use(&u).map_err(|d| {
                    d.or_package(&src.path)
                        .with_names([format!("file {}", file.name)])
                })?,
                syn::Item::Fn(f) => {
                    let name = f.sig.ident.to_string();
                    if pkg.funcs.insert(name.clone(), f).is_some() {
                        return Err(malformed(&src.path, format!("duplicate function: {name}")));
                    }
                }
                syn::Item::Impl(imp) => impls.push(imp),
                item @ (syn::Item::Struct(_)
                | syn::Item::Enum(_)
                | syn::Item::Union(_)
                | syn::Item::Type(_)) => {
                    let Some(name) = item_ident(&item).map(ToString::to_string) else {
                        continue;
                    };
                    let mut decl = TypeDecl::new(name, item);
                    decl.typevar = has_typevar_marker(&decl);
                    pkg.add_type(decl)?;
                }
                other => {
                    debug!(package = %src.path, file = %file.name, "skipping item: {}", item_kind(&other));
                }
            }
        }
    }

    for imp in impls {
        let Some(name) = receiver_type(&imp) else {
            return Err(malformed(
                &src.path,
                "impl self type must be a single-segment path naming a package type".to_string(),
            ));
        };
        let Some(id) = pkg.type_id(&name) else {
            return Err(malformed(&src.path, format!("impl for undeclared type: {name}"))
                .with_type(&name));
        };
        pkg.types[id.0]
            .add_impl(imp)
            .map_err(|d| d.or_package(&src.path))?;
    }

    detect_ctors(&mut pkg)?;
    pkg.strict = !pkg.typevars.is_empty();
    debug!(
        package = %src.path,
        types = pkg.types.len(),
        ctors = pkg.ctors.len(),
        funcs = pkg.funcs.len(),
        strict = pkg.strict,
        "package parsed"
    );
    Ok((pkg, imports))
}

fn malformed(pkg: &str, message: String) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::TI0400MalformedDeclaration,
        Phase::Parse,
        message,
    )
    .with_package(pkg)
}

fn item_kind(item: &syn::Item) -> &'static str {
    match item {
        syn::Item::Const(_) => "const",
        syn::Item::Static(_) => "static",
        syn::Item::Mod(_) => "mod",
        syn::Item::Trait(_) => "trait",
        syn::Item::Macro(_) => "macro",
        syn::Item::ExternCrate(_) => "extern crate",
        syn::Item::ForeignMod(_) => "extern block",
        _ => "other",
    }
}

fn item_attrs(item: &syn::Item) -> &[syn::Attribute] {
    match item {
        syn::Item::Struct(s) => &s.attrs,
        syn::Item::Enum(e) => &e.attrs,
        syn::Item::Union(u) => &u.attrs,
        syn::Item::Type(t) => &t.attrs,
        _ => &[],
    }
}

/// Looks for a `/// typeinst: typevar` doc comment.
fn has_typevar_marker(decl: &TypeDecl) -> bool {
    let mut typevar = false;
    for attr in item_attrs(&decl.item) {
        if !attr.path().is_ident("doc") {
            continue;
        }
        let syn::Meta::NameValue(nv) = &attr.meta else {
            continue;
        };
        let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(s),
            ..
        }) = &nv.value
        else {
            continue;
        };
        let text = s.value();
        let Some(rest) = text.trim().strip_prefix(MARKER_PREFIX) else {
            continue;
        };
        match rest.split_whitespace().next() {
            Some("typevar") => typevar = true,
            Some(verb) => warn!(
                type_name = %decl.name,
                "ignoring '{MARKER_PREFIX}' marker with unknown verb: {verb}"
            ),
            None => warn!(type_name = %decl.name, "ignoring empty '{MARKER_PREFIX}' marker"),
        }
    }
    typevar
}

/// Name of the type an impl block attaches methods to.
fn receiver_type(imp: &syn::ItemImpl) -> Option<String> {
    let syn::Type::Path(tp) = &*imp.self_ty else {
        return None;
    };
    if tp.qself.is_some() || tp.path.leading_colon.is_some() || tp.path.segments.len() != 1 {
        return None;
    }
    tp.path.segments.first().map(|s| s.ident.to_string())
}

fn unpack_ctor_ret(output: &syn::ReturnType) -> Option<String> {
    match output {
        syn::ReturnType::Default => None,
        syn::ReturnType::Type(_, ty) => unpack_type(CTOR_UNPACK_DEPTH, ty),
    }
}

fn unpack_type(depth: u32, ty: &syn::Type) -> Option<String> {
    if depth == 0 {
        return None;
    }
    match ty {
        syn::Type::Path(tp) if tp.qself.is_none() => {
            let seg = tp.path.segments.last()?;
            if tp.path.segments.len() == 1 && seg.arguments.is_none() {
                return Some(seg.ident.to_string());
            }
            if !CTOR_WRAPPERS.iter().any(|w| seg.ident == w) {
                return None;
            }
            let syn::PathArguments::AngleBracketed(args) = &seg.arguments else {
                return None;
            };
            match args.args.first()? {
                syn::GenericArgument::Type(inner) => unpack_type(depth - 1, inner),
                _ => None,
            }
        }
        syn::Type::Reference(r) => unpack_type(depth - 1, &r.elem),
        syn::Type::Ptr(p) => unpack_type(depth - 1, &p.elem),
        syn::Type::Slice(s) => unpack_type(depth - 1, &s.elem),
        syn::Type::Array(a) => unpack_type(depth - 1, &a.elem),
        syn::Type::Paren(p) => unpack_type(depth - 1, &p.elem),
        syn::Type::Group(g) => unpack_type(depth - 1, &g.elem),
        _ => None,
    }
}

/// Moves free functions that construct a package type over to that type.
fn detect_ctors(pkg: &mut PkgDesc) -> Result<(), Diagnostic> {
    let mut found = Vec::new();
    for (fname, f) in &pkg.funcs {
        if let Some(ret) = unpack_ctor_ret(&f.sig.output) {
            if let Some(id) = pkg.type_id(&ret) {
                found.push((fname.clone(), id));
            }
        }
    }
    for (fname, id) in found {
        let Some(f) = pkg.funcs.remove(&fname) else {
            continue;
        };
        pkg.types[id.0]
            .add_ctor(f)
            .map_err(|d| d.or_package(&pkg.path))?;
        pkg.ctors.insert(fname, id);
    }
    Ok(())
}
