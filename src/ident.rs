//! Identifier quoting utilities
//! ----------------------------
//! Single source of truth for T-SQL bracket quoting and for comparing
//! identifiers that may arrive bracketed, double-quoted or bare.

/// Quote a name as a T-SQL bracket identifier, escaping `]` as `]]`.
pub fn quote_bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Strip one level of quoting from an identifier:
/// - `[name]` unescapes `]]`
/// - `"name"` unescapes `""`
/// - anything else is returned trimmed
pub fn unquote(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        return trimmed[1..trimmed.len() - 1].replace("]]", "]");
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].replace("\"\"", "\"");
    }
    trimmed.to_string()
}

/// Comparison key for identifiers. SQL Server's default collation is
/// case-insensitive, so `[Sales]`, `"SALES"` and `sales` all compare equal.
pub fn ident_key(ident: &str) -> String {
    unquote(ident).to_lowercase()
}

/// Accept either a bare name or an already bracketed identifier and return the bracketed form.
pub fn ensure_bracketed(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() >= 2 {
        trimmed.to_string()
    } else {
        quote_bracket(&unquote(trimmed))
    }
}
