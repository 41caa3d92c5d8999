use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Parse,
    Register,
    Resolve,
    Merge,
    Print,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticCode {
    TI0001ParseFailure,
    TI0100UnknownType,
    TI0101InvalidTypevar,
    TI0102StrictModeViolation,
    TI0103DuplicateInstantiation,
    TI0104InconsistentShape,
    TI0200UnboundTypevar,
    TI0300ImportConflict,
    TI0400MalformedDeclaration,
    TI0901InternalBug,
}

impl DiagnosticCode {
    pub fn code_str(self) -> &'static str {
        match self {
            DiagnosticCode::TI0001ParseFailure => "TI0001",
            DiagnosticCode::TI0100UnknownType => "TI0100",
            DiagnosticCode::TI0101InvalidTypevar => "TI0101",
            DiagnosticCode::TI0102StrictModeViolation => "TI0102",
            DiagnosticCode::TI0103DuplicateInstantiation => "TI0103",
            DiagnosticCode::TI0104InconsistentShape => "TI0104",
            DiagnosticCode::TI0200UnboundTypevar => "TI0200",
            DiagnosticCode::TI0300ImportConflict => "TI0300",
            DiagnosticCode::TI0400MalformedDeclaration => "TI0400",
            DiagnosticCode::TI0901InternalBug => "TI0901",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            DiagnosticCode::TI0001ParseFailure => "failed to read or parse package sources",
            DiagnosticCode::TI0100UnknownType => "instantiated type is not declared in the package",
            DiagnosticCode::TI0101InvalidTypevar => "type cannot serve as a typevar",
            DiagnosticCode::TI0102StrictModeViolation => {
                "typevar is not marked as such in a strict package"
            }
            DiagnosticCode::TI0103DuplicateInstantiation => {
                "type instantiated repeatedly with the same type arguments"
            }
            DiagnosticCode::TI0104InconsistentShape => {
                "type instantiated with inconsistent sets of typevars"
            }
            DiagnosticCode::TI0200UnboundTypevar => "generic type depends on an unbound typevar",
            DiagnosticCode::TI0300ImportConflict => "conflicting imports",
            DiagnosticCode::TI0400MalformedDeclaration => "malformed declaration",
            DiagnosticCode::TI0901InternalBug => "internal typeinst bug",
        }
    }

    pub fn default_help(self) -> Option<&'static str> {
        match self {
            DiagnosticCode::TI0101InvalidTypevar => Some(
                "A typevar must be a declared type without impl blocks or constructor functions.",
            ),
            DiagnosticCode::TI0102StrictModeViolation => Some(
                "Mark every typevar of the package with a `/// typeinst: typevar` doc comment.",
            ),
            DiagnosticCode::TI0104InconsistentShape => Some(
                "Every instantiation of a generic type must bind exactly the same typevar names.",
            ),
            DiagnosticCode::TI0200UnboundTypevar => Some(
                "Add the typevar to the type_args of the requests instantiating this type.",
            ),
            DiagnosticCode::TI0300ImportConflict => Some(
                "Import each path under one name; glob and `as _` imports are not supported.",
            ),
            DiagnosticCode::TI0901InternalBug => Some(
                "This is a bug in typeinst. Please report it with the manifest and package sources.",
            ),
            _ => None,
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            DiagnosticCode::TI0001ParseFailure | DiagnosticCode::TI0400MalformedDeclaration => {
                Phase::Parse
            }
            DiagnosticCode::TI0100UnknownType
            | DiagnosticCode::TI0101InvalidTypevar
            | DiagnosticCode::TI0102StrictModeViolation
            | DiagnosticCode::TI0103DuplicateInstantiation
            | DiagnosticCode::TI0104InconsistentShape => Phase::Register,
            DiagnosticCode::TI0200UnboundTypevar => Phase::Resolve,
            DiagnosticCode::TI0300ImportConflict => Phase::Merge,
            DiagnosticCode::TI0901InternalBug => Phase::Internal,
        }
    }
}

/// Locating context attached to every diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub names: Vec<String>,
}

impl DiagnosticContext {
    fn is_empty(&self) -> bool {
        self.package.is_none() && self.type_name.is_none() && self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub phase: Phase,
    pub severity: Severity,
    pub message: String,
    pub help: Option<String>,
    #[serde(default)]
    pub context: DiagnosticContext,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, phase: Phase, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            phase,
            severity: Severity::Error,
            message: message.into(),
            help: code.default_help().map(|s| s.to_string()),
            context: DiagnosticContext::default(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Diagnostic::error(DiagnosticCode::TI0901InternalBug, Phase::Internal, message)
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.context.package = Some(package.into());
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.context.type_name = Some(type_name.into());
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Fills in the package when the raising layer did not know it.
    pub fn or_package(mut self, package: &str) -> Self {
        if self.context.package.is_none() {
            self.context.package = Some(package.to_string());
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {:?}: {}",
            self.code.code_str(),
            self.phase,
            self.severity,
            self.message
        )?;
        if !self.context.is_empty() {
            let mut parts: Vec<String> = Vec::new();
            if let Some(pkg) = &self.context.package {
                parts.push(format!("package {pkg}"));
            }
            if let Some(ty) = &self.context.type_name {
                parts.push(format!("type {ty}"));
            }
            if !self.context.names.is_empty() {
                parts.push(format!("names [{}]", self.context.names.join(", ")));
            }
            write!(f, "\n  at: {}", parts.join(", "))?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Runs `f`, converting an unexpected panic into a `TI0901` diagnostic.
pub fn run_guarded<T>(f: impl FnOnce() -> Result<T, Diagnostic>) -> Result<T, Diagnostic> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            };
            Err(Diagnostic::internal(format!("unexpected internal fault: {msg}")))
        }
    }
}

pub fn render_diagnostics_md() -> String {
    let mut rows: Vec<(String, Phase, Severity, String, String)> = Vec::new();
    for code in all_codes() {
        rows.push((
            code.code_str().to_string(),
            code.phase(),
            Severity::Error,
            code.default_message().to_string(),
            code.default_help().unwrap_or("").to_string(),
        ));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::new();
    out.push_str("# typeinst diagnostics catalog\n\n");
    out.push_str("This document is generated from `crates/typeinst-core/src/diagnostics.rs`.\n\n");
    out.push_str("| Code | Phase | Severity | Message | Help |\n");
    out.push_str("| ---- | ----- | -------- | ------- | ---- |\n");
    for (code, phase, sev, msg, help) in rows {
        out.push_str(&format!(
            "| {code} | {phase:?} | {sev:?} | {msg} | {help} |\n"
        ));
    }
    out
}

fn all_codes() -> &'static [DiagnosticCode] {
    &[
        DiagnosticCode::TI0001ParseFailure,
        DiagnosticCode::TI0100UnknownType,
        DiagnosticCode::TI0101InvalidTypevar,
        DiagnosticCode::TI0102StrictModeViolation,
        DiagnosticCode::TI0103DuplicateInstantiation,
        DiagnosticCode::TI0104InconsistentShape,
        DiagnosticCode::TI0200UnboundTypevar,
        DiagnosticCode::TI0300ImportConflict,
        DiagnosticCode::TI0400MalformedDeclaration,
        DiagnosticCode::TI0901InternalBug,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_context_and_help() {
        let d = Diagnostic::error(
            DiagnosticCode::TI0104InconsistentShape,
            Phase::Register,
            "shape mismatch",
        )
        .with_package("maps")
        .with_type("Map")
        .with_names(["K", "V"]);
        let text = d.to_string();
        assert!(text.starts_with("TI0104 Register Error: shape mismatch"), "{text}");
        assert!(text.contains("at: package maps, type Map, names [K, V]"), "{text}");
        assert!(text.contains("help: Every instantiation"), "{text}");
    }

    #[test]
    fn diagnostics_serialize_as_errors() {
        let d = Diagnostic::error(
            DiagnosticCode::TI0300ImportConflict,
            Phase::Merge,
            "conflict",
        );
        let v = serde_json::to_value(&d).expect("serialize diagnostic");
        assert_eq!(v["severity"], "Error");
        assert_eq!(v["code"], "TI0300ImportConflict");
        assert!(v["context"]["names"].is_null());
    }

    #[test]
    fn run_guarded_maps_panics_to_internal_bug() {
        let res: Result<(), Diagnostic> = run_guarded(|| panic!("boom"));
        let err = res.expect_err("panic must surface as a diagnostic");
        assert_eq!(err.code, DiagnosticCode::TI0901InternalBug);
        assert!(err.message.contains("boom"), "{err}");
    }

    #[test]
    fn catalog_lists_every_code_once() {
        let md = render_diagnostics_md();
        for code in all_codes() {
            assert_eq!(md.matches(code.code_str()).count(), 1, "{}", code.code_str());
        }
    }
}
