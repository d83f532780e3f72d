//! Tool discovery
//!
//! Before a pipeline is queued each executable is looked up, first as a
//! direct path, then among the stored path bindings, then on `$PATH`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

use metrun_core::domain::history::PathBinding;

/// Locates `command` using the process `$PATH`
pub fn find_tool(command: &str, bindings: &[PathBinding]) -> Option<PathBuf> {
    find_tool_in(command, bindings, std::env::var_os("PATH").as_deref())
}

/// Locates `command` using an explicit search path
pub fn find_tool_in(
    command: &str,
    bindings: &[PathBinding],
    path_var: Option<&OsStr>,
) -> Option<PathBuf> {
    let direct = Path::new(command);
    if direct.exists() {
        return Some(direct.to_path_buf());
    }

    if let Some(binding) = bindings.iter().find(|binding| binding.name == command) {
        debug!("{} bound to {}", command, binding.path);
        return Some(PathBuf::from(&binding.path));
    }

    std::env::split_paths(path_var?)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, path: &str) -> PathBinding {
        PathBinding {
            name: name.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_direct_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("trimmer");
        std::fs::write(&tool, "").unwrap();

        let found = find_tool_in(tool.to_str().unwrap(), &[], None);
        assert_eq!(found, Some(tool));
    }

    #[test]
    fn test_binding_before_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kraken"), "").unwrap();

        let bindings = [binding("kraken", "/opt/kraken/kraken2")];
        let found = find_tool_in("kraken", &bindings, Some(dir.path().as_os_str()));
        assert_eq!(found, Some(PathBuf::from("/opt/kraken/kraken2")));
    }

    #[test]
    fn test_search_path_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kraken"), "").unwrap();

        let found = find_tool_in("kraken", &[], Some(dir.path().as_os_str()));
        assert_eq!(found, Some(dir.path().join("kraken")));
        assert_eq!(find_tool_in("bowtie9", &[], Some(dir.path().as_os_str())), None);
        assert_eq!(find_tool_in("bowtie9", &[], None), None);
    }
}
