//! Pretty JSON rendering and output file handling.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

/// Renders `value` with `indent` spaces per nesting level and no trailing
/// newline, the layout `json.dump(obj, f, indent=N)` produces.
pub fn render(value: &Value, indent: usize) -> Result<Vec<u8>, serde_json::Error> {
    let indent = vec![b' '; indent];
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(&indent);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Writes `bytes` to `path`.
///
/// With `atomic`, the bytes go to a temporary file in the same directory
/// which is then renamed over `path`; on any failure the temporary file is
/// removed and an existing `path` is left untouched.
pub fn write_output(path: &Path, bytes: &[u8], atomic: bool) -> io::Result<()> {
    if !atomic {
        return fs::write(path, bytes);
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match fs::metadata(path) {
        Ok(existing) => fs::set_permissions(tmp.path(), existing.permissions())?,
        // Temporary files are private; give new outputs the usual mode.
        Err(_) => set_default_permissions(tmp.path())?,
    }
    debug!(tmp = %tmp.path().display(), dest = %path.display(), "renaming output into place");
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
