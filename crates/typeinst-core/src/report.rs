use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{PkgDesc, SourceDigest};
use crate::session::Session;

pub const REPORT_SCHEMA_VERSION: &str = "typeinst.report@0.1.0";

#[derive(Debug, Clone, Serialize)]
pub struct ReportStatsV1 {
    pub packages: usize,
    pub generic_types: usize,
    pub instances: usize,
    pub interned_bindings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportInstanceV1 {
    pub bindings: BTreeMap<String, String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportTypeV1 {
    pub name: String,
    pub typevar: bool,
    pub singleton: bool,
    pub visited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ctors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub instances: Vec<ReportInstanceV1>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportOccurrencesV1 {
    pub types: usize,
    pub ctors: usize,
    pub pkgs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPackageV1 {
    pub path: String,
    pub strict: bool,
    pub sources: Vec<SourceDigest>,
    pub types: Vec<ReportTypeV1>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub free_functions: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub import_renames: BTreeMap<String, String>,
    pub occurrences: ReportOccurrencesV1,
}

/// Machine-readable view of a resolved session, printed by `typeinst inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub tool: String,
    pub tool_version: String,
    pub module: String,
    pub stats: ReportStatsV1,
    pub imports: BTreeMap<String, String>,
    pub packages: Vec<ReportPackageV1>,
}

impl Report {
    pub fn from_session(session: &Session) -> Report {
        let packages: Vec<ReportPackageV1> =
            session.packages().values().map(package_report).collect();
        let generic_types = packages
            .iter()
            .flat_map(|p| &p.types)
            .filter(|t| !t.instances.is_empty())
            .count();
        let instances = packages
            .iter()
            .flat_map(|p| &p.types)
            .map(|t| t.instances.len())
            .sum();
        Report {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            tool: "typeinst".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            module: session.module().to_string(),
            stats: ReportStatsV1 {
                packages: packages.len(),
                generic_types,
                instances,
                interned_bindings: session.cache().len(),
            },
            imports: session
                .imports()
                .iter()
                .map(|(n, p)| (n.to_string(), p.to_string()))
                .collect(),
            packages,
        }
    }
}

fn package_report(pkg: &PkgDesc) -> ReportPackageV1 {
    let types = pkg
        .type_ids()
        .map(|id| {
            let decl = pkg.decl(id);
            let state = pkg.state(id);
            ReportTypeV1 {
                name: decl.name().to_string(),
                typevar: decl.is_typevar(),
                singleton: decl.is_singleton(),
                visited: state.is_visited(),
                deps: state.deps().map(|d| d.iter().cloned().collect()),
                ctors: decl.ctor_names(),
                instances: state
                    .instances()
                    .iter()
                    .map(|(b, name)| ReportInstanceV1 {
                        bindings: b.binds().clone(),
                        name: name.clone(),
                    })
                    .collect(),
            }
        })
        .collect();
    let occ = pkg.occurrences();
    ReportPackageV1 {
        path: pkg.path().to_string(),
        strict: pkg.is_strict(),
        sources: pkg.sources().to_vec(),
        types,
        free_functions: pkg.free_functions().map(str::to_string).collect(),
        import_renames: pkg.import_renames().clone(),
        occurrences: ReportOccurrencesV1 {
            types: occ.type_count(),
            ctors: occ.ctor_count(),
            pkgs: occ.pkg_count(),
        },
    }
}
