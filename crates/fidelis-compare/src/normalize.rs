/// Fold a name to its comparison form: lowercased with underscore, hyphen
/// and casing-convention differences collapsed, so "userName",
/// "user_name" and "username" all compare equal.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Canonical type name: lowercase, with vendor aliases folded onto one
/// spelling per family.
pub fn normalize_type(type_name: &str) -> String {
    let lowered = type_name.trim().to_lowercase();
    match lowered.as_str() {
        "int" | "int32" | "integer" | "i32" | "number" => "int".to_string(),
        "long" | "int64" | "i64" | "bigint" => "long".to_string(),
        "float" | "f32" | "single" | "real" => "float".to_string(),
        "double" | "f64" | "decimal" | "numeric" => "double".to_string(),
        "str" | "string" | "varchar" | "text" | "char" | "nvarchar" => "string".to_string(),
        "bool" | "boolean" | "bit" => "bool".to_string(),
        "datetime" | "timestamp" | "date" => "datetime".to_string(),
        other => other.to_string(),
    }
}

/// Whether a normalized source → target type change is a recognized
/// numeric widening (lossless), which downgrades a mismatch to a warning.
pub fn is_numeric_widening(source: &str, target: &str) -> bool {
    matches!(
        (source, target),
        ("int", "long") | ("int", "float") | ("int", "double") | ("float", "double") | ("long", "double")
    )
}

/// Canonical path pattern: path variables in any of the common syntaxes
/// (`{id}`, `:id`, `<id>`) become an anonymous placeholder.
pub fn normalize_path(path: &str) -> String {
    path.trim_end_matches('/')
        .split('/')
        .map(|segment| {
            let is_variable = (segment.starts_with('{') && segment.ends_with('}'))
                || segment.starts_with(':')
                || (segment.starts_with('<') && segment.ends_with('>'));
            if is_variable {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
        .to_lowercase()
}

/// Crude text similarity over character sets; enough to spot relabelings.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let set_a: std::collections::HashSet<char> = a.chars().collect();
    let set_b: std::collections::HashSet<char> = b.chars().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_conventions_fold_together() {
        assert_eq!(normalize_name("userName"), "username");
        assert_eq!(normalize_name("user_name"), "username");
        assert_eq!(normalize_name("User-Name"), "username");
        assert_ne!(normalize_name("userName"), normalize_name("userId"));
    }

    #[test]
    fn type_aliases_fold_together() {
        assert_eq!(normalize_type("int"), normalize_type("Int32"));
        assert_eq!(normalize_type("String"), normalize_type("varchar"));
        assert_ne!(normalize_type("float"), normalize_type("int"));
    }

    #[test]
    fn widening_is_directional() {
        assert!(is_numeric_widening("int", "long"));
        assert!(is_numeric_widening("float", "double"));
        assert!(!is_numeric_widening("long", "int"));
        assert!(!is_numeric_widening("float", "int"));
    }

    #[test]
    fn path_variables_are_anonymous() {
        assert_eq!(normalize_path("/users/{id}/posts"), "/users/{}/posts");
        assert_eq!(normalize_path("/users/:id/posts"), "/users/{}/posts");
        assert_eq!(normalize_path("/users/<id>/posts/"), "/users/{}/posts");
        assert_ne!(normalize_path("/users/{id}"), normalize_path("/posts/{id}"));
    }
}
