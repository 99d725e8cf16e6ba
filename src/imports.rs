//! Import resolution — locate, read, and parse the `.box` files named by
//! `import` statements.
//!
//! Paths resolve relative to the importing file's directory. The `.box`
//! extension may be omitted in the source; both spellings are tried. The
//! namespace is always the file name without its extension.

use std::path::{Path, PathBuf};

use crate::ast::Program;
use crate::error::{BoxError, BoxResult, Location};
use crate::parser;

/// Upper bound on import nesting. Imports form a tree; a chain this deep is
/// almost certainly a cycle.
const MAX_IMPORT_DEPTH: usize = 16;

/// Find the file an import path refers to, or `None` if nothing exists.
pub fn resolve(base: &Path, spec: &str) -> Option<PathBuf> {
    let direct = base.join(spec);
    if spec.ends_with(".box") {
        return direct.is_file().then_some(direct);
    }
    if direct.is_file() {
        return Some(direct);
    }
    let with_ext = base.join(format!("{spec}.box"));
    with_ext.is_file().then_some(with_ext)
}

/// Namespace derived from an import path: the file name without `.box`.
pub fn namespace_of(spec: &str) -> String {
    Path::new(spec)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read and fully parse an imported module. Returns the canonical path (for
/// re-import detection) and the parsed sub-program.
pub fn load(
    base: &Path,
    spec: &str,
    loc: Location,
    depth: usize,
) -> BoxResult<(PathBuf, Program)> {
    if depth >= MAX_IMPORT_DEPTH {
        return Err(BoxError::new(format!(
            "failed to import '{spec}': imports nested more than {MAX_IMPORT_DEPTH} levels deep"
        ))
        .at(loc)
        .with_help("check for a circular import chain"));
    }

    let Some(path) = resolve(base, spec) else {
        return Err(BoxError::new(format!("failed to import '{spec}': file not found"))
            .at(loc)
            .with_help(
                "import paths resolve relative to the importing file and must name a .box file",
            ));
    };

    let source = std::fs::read_to_string(&path).map_err(|e| {
        BoxError::new(format!("failed to import '{}': {e}", path.display())).at(loc.clone())
    })?;

    let canonical = path.canonicalize().unwrap_or(path);
    let display = canonical.to_string_lossy().into_owned();
    let program = parser::parse_source_at_depth(&source, &display, depth + 1)?;
    Ok((canonical, program))
}
