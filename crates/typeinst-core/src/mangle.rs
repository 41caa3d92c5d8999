//! Deterministic names for specialized constructors and dependent types.
//!
//! Matching of the generic name is ASCII case-insensitive; the leading letter of the result
//! always has the case of the original name.

/// Name of a constructor `orig` of generic type `gen` specialized as `inst`.
///
/// `new_map_of` / `Map` / `IntMap` gives `new_IntMap_of`; on a miss the instance name is
/// appended (`make` / `Val` / `Int` gives `makeInt`).
pub fn mangle_ctor_name(orig: &str, gen: &str, inst: &str) -> String {
    splice(orig, gen, inst, Miss::Append)
}

/// Name of dependent type `orig` reached from generic root `gen` instantiated as `inst`.
///
/// `valEntry` / `Val` / `Int` gives `intEntry`; on a miss the instance name is prepended
/// (`entry` / `val` / `int` gives `intEntry`).
pub fn mangle_dep_type_name(orig: &str, gen: &str, inst: &str) -> String {
    splice(orig, gen, inst, Miss::Prepend)
}

#[derive(Clone, Copy)]
enum Miss {
    Append,
    Prepend,
}

fn splice(orig: &str, gen: &str, inst: &str, miss: Miss) -> String {
    let (n, is_upper) = upcase_first(orig);
    let (gen, _) = upcase_first(gen);
    let (inst, _) = upcase_first(inst);
    let n = match find_ignore_ascii_case(&n, &gen) {
        Some(g) => format!("{}{}{}", &n[..g], inst, &n[g + gen.len()..]),
        None => match miss {
            Miss::Append => format!("{orig}{inst}"),
            Miss::Prepend => format!("{inst}{n}"),
        },
    };
    ensure_case(&n, is_upper)
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

/// Upper-cases the first char; the flag tells whether it already was upper case.
fn upcase_first(s: &str) -> (String, bool) {
    let mut chars = s.chars();
    let Some(c) = chars.next() else {
        return (String::new(), true);
    };
    if c.is_uppercase() {
        return (s.to_string(), true);
    }
    (c.to_uppercase().chain(chars).collect(), false)
}

fn locase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if !c.is_lowercase() => c.to_lowercase().chain(chars).collect(),
        _ => s.to_string(),
    }
}

fn ensure_case(s: &str, is_upper: bool) -> String {
    if is_upper {
        upcase_first(s).0
    } else {
        locase_first(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctor_names() {
        let cases = [
            ("newValOf", "Val", "Int", "newIntOf"),
            ("make", "Val", "Int", "makeInt"),
            ("Make", "Val", "int", "MakeInt"),
            ("ValOfTea", "val", "Int", "IntOfTea"),
            ("new_map_of", "Map", "StringIntMap", "new_StringIntMap_of"),
            ("new", "Set", "Ints", "newInts"),
        ];
        for (orig, gen, inst, want) in cases {
            assert_eq!(mangle_ctor_name(orig, gen, inst), want, "{orig} {gen} {inst}");
        }
    }

    #[test]
    fn dep_type_names() {
        let cases = [
            ("valEntry", "Val", "Int", "intEntry"),
            ("entry", "val", "int", "intEntry"),
            ("ValEntry", "Val", "zzz", "ZzzEntry"),
            ("EntryValName", "Val", "zzz", "EntryZzzName"),
            ("entryValName", "Val", "X", "entryXName"),
            ("Node", "TreeMap", "BigTree", "BigTreeNode"),
        ];
        for (orig, gen, inst, want) in cases {
            assert_eq!(mangle_dep_type_name(orig, gen, inst), want, "{orig} {gen} {inst}");
        }
    }

    #[test]
    fn output_case_tracks_original_not_instance() {
        assert_eq!(mangle_dep_type_name("entry", "Val", "INT"), "iNTEntry");
        assert_eq!(mangle_ctor_name("Make", "Val", "int"), "MakeInt");
        assert_eq!(mangle_ctor_name("", "Val", "int"), "Int");
    }
}
