/// File names (compared case-insensitively) recognized as skill documents
pub const SKILL_FILE_NAMES: &[&str] = &["skill.md"];

/// Last component of a `/`-separated repository path.
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Name of the directory containing `path`, if it has one.
pub fn parent_dir_name(path: &str) -> Option<&str> {
    let (parent, _) = path.trim_end_matches('/').rsplit_once('/')?;
    Some(file_name(parent)).filter(|name| !name.is_empty())
}

/// Whether the file name of `path` is one of the skill file names.
pub fn is_skill_file(path: &str) -> bool {
    let name = file_name(path);
    SKILL_FILE_NAMES
        .iter()
        .any(|candidate| name.eq_ignore_ascii_case(candidate))
}

/// Whether `path` lies under `scope` (a directory prefix, compared per component).
///
/// An empty or missing scope contains every path.
pub fn within_scope(path: &str, scope: Option<&str>) -> bool {
    let scope = match scope.map(|s| s.trim_matches('/')) {
        None | Some("") => return true,
        Some(scope) => scope,
    };
    path.strip_prefix(scope)
        .is_some_and(|rest| rest.starts_with('/'))
}
