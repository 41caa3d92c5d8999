use std::path::Path;
use std::process::{Command, Output};

const SETS: &str = r#"
/// typeinst: typevar
pub type E = ();

pub struct Set {
    items: Vec<E>,
}

pub fn new_set() -> Set {
    Set { items: Vec::new() }
}

impl Set {
    pub fn insert(&mut self, e: E) {
        self.items.push(e);
    }
}
"#;

fn typeinst(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_typeinst"))
        .args(args)
        .env_remove("TYPEINST_LOG")
        .output()
        .expect("spawn typeinst")
}

fn write_fixture(root: &Path) -> String {
    let pkg = root.join("sets");
    std::fs::create_dir_all(&pkg).expect("create package dir");
    std::fs::write(pkg.join("lib.rs"), SETS).expect("write package");
    let manifest = serde_json::json!({
        "schema_version": "typeinst.manifest@0.1.0",
        "module": "sets_gen",
        "packages": { "sets": "sets" },
        "items": [
            { "instance": "WordSet", "types": ["sets::Set"], "type_args": { "E": "String" } }
        ],
    });
    let path = root.join("typeinst.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest).expect("encode"))
        .expect("write manifest");
    path.to_string_lossy().to_string()
}

#[test]
fn gen_then_check() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manifest = write_fixture(tmp.path());
    let out = tmp.path().join("out/word_set.rs");
    let out_s = out.to_string_lossy().to_string();

    let res = typeinst(&["gen", "--manifest", &manifest, "--out", &out_s]);
    assert!(res.status.success(), "stderr: {}", String::from_utf8_lossy(&res.stderr));
    let src = std::fs::read_to_string(&out).expect("read output");
    assert!(src.contains("pub struct WordSet {"), "{src}");
    assert!(src.contains("pub fn new_WordSet() -> WordSet"), "{src}");

    let res = typeinst(&["gen", "--manifest", &manifest, "--out", &out_s, "--check"]);
    assert!(res.status.success(), "stderr: {}", String::from_utf8_lossy(&res.stderr));

    std::fs::write(&out, format!("{src}\n// edited\n")).expect("edit output");
    let res = typeinst(&["gen", "--manifest", &manifest, "--out", &out_s, "--check"]);
    assert!(!res.status.success());
    assert!(
        String::from_utf8_lossy(&res.stderr).contains("generated output differs"),
        "stderr: {}",
        String::from_utf8_lossy(&res.stderr)
    );
}

#[test]
fn inspect_prints_json_report() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manifest = write_fixture(tmp.path());
    let res = typeinst(&["inspect", "--manifest", &manifest]);
    assert!(res.status.success(), "stderr: {}", String::from_utf8_lossy(&res.stderr));
    let v: serde_json::Value = serde_json::from_slice(&res.stdout).expect("report JSON");
    assert_eq!(v["module"], "sets_gen");
    assert_eq!(v["packages"][0]["strict"], true);
}

#[test]
fn errors_carry_diagnostic_codes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manifest = write_fixture(tmp.path());
    let text = std::fs::read_to_string(&manifest).expect("read manifest");
    std::fs::write(&manifest, text.replace("sets::Set", "sets::Bag")).expect("rewrite");
    let res = typeinst(&["inspect", "--manifest", &manifest]);
    assert!(!res.status.success());
    assert!(
        String::from_utf8_lossy(&res.stderr).contains("TI0100"),
        "stderr: {}",
        String::from_utf8_lossy(&res.stderr)
    );
}

#[test]
fn diagnostics_catalog() {
    let res = typeinst(&["diagnostics"]);
    assert!(res.status.success());
    let md = String::from_utf8_lossy(&res.stdout);
    assert!(md.starts_with("# typeinst diagnostics catalog"), "{md}");
    assert!(md.contains("| TI0200 |"), "{md}");
}
