// Submitted Item Name Handling
//
// Form field names arriving from the submission UI may be decorated view
// names like `__q1_check` or `__q1_b64`. Grading always works on the base
// item name: strip the `__` prefix and the final `_suffix`, then drop
// duplicates while preserving first-seen order.

/// The base item name for a possibly decorated submitted name.
pub fn base_name(name: &str) -> &str {
    match name.strip_prefix("__") {
        Some(rest) => match rest.rfind('_') {
            Some(ix) => &rest[..ix],
            None => rest,
        },
        None => name,
    }
}

/// Normalize a submitted name list: base names, first-seen order, no dupes.
pub fn normalize_names(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let base = base_name(name);
        if seen.insert(base.to_string()) {
            out.push(base.to_string());
        }
    }
    out
}
