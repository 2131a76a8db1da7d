//! RFC 6901 JSON Pointers for locating values in the output document.

/// Escapes `~` and `/` in a single path component.
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Formats unescaped components as a pointer. The empty path is the
/// document root, `""`.
pub fn format_pointer(path: &[String]) -> String {
    let mut out = String::new();
    for component in path {
        out.push('/');
        out.push_str(&escape_component(component));
    }
    out
}

/// Human-readable form of a pointer for error messages.
pub(crate) fn describe(pointer: &str) -> String {
    if pointer.is_empty() {
        "the document root".to_string()
    } else {
        format!("`{pointer}`")
    }
}
