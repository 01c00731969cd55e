//! Area-relative resource naming.
//!
//! Catalogs, templates and the index refer to files through a registered
//! "area" (a named base directory such as the package or user-data dir)
//! plus a path relative to it, so stored references survive relocation of
//! the install tree.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A path expressed relative to a registered area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaResource {
    /// Registered area name, or `None` when no area contains the path
    pub area: Option<String>,
    /// Path relative to the area base (the full input path when unresolved)
    pub sub_path: String,
}

impl AreaResource {
    fn unresolved(path: impl Into<String>) -> Self {
        Self {
            area: None,
            sub_path: path.into(),
        }
    }

    /// Whether the path fell inside a registered area.
    pub fn is_resolved(&self) -> bool {
        self.area.is_some()
    }
}

impl fmt::Display for AreaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.area {
            Some(area) => write!(f, "{}:{}", area, self.sub_path),
            None => f.write_str(&self.sub_path),
        }
    }
}

/// Resolves paths against a set of named base directories.
#[derive(Debug, Clone, Default)]
pub struct ResourceResolver {
    /// (name, base) sorted by descending base length
    areas: Vec<(String, String)>,
    case_insensitive: bool,
    base_dir: Option<PathBuf>,
}

impl ResourceResolver {
    /// Create an empty resolver.
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            areas: Vec::new(),
            case_insensitive,
            base_dir: None,
        }
    }

    /// Resolve relative inputs against `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Register a named area. Re-registering a name is an error.
    pub fn register(&mut self, name: &str, base: impl AsRef<Path>) -> Result<(), CoreError> {
        if self.areas.iter().any(|(n, _)| n == name) {
            return Err(CoreError::InvalidArea {
                name: name.to_string(),
                reason: "already registered".to_string(),
            });
        }

        let raw = base.as_ref().to_string_lossy();
        let trimmed = raw.trim_end_matches(is_separator);
        // A base made only of separators is the filesystem root.
        let normalized = if trimmed.is_empty() && !raw.is_empty() {
            raw[..1].to_string()
        } else {
            trimmed.to_string()
        };

        if normalized.is_empty() {
            return Err(CoreError::InvalidArea {
                name: name.to_string(),
                reason: "empty base directory".to_string(),
            });
        }

        self.areas.push((name.to_string(), normalized));
        self.areas
            .sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

        tracing::debug!(area = %name, base = ?base.as_ref(), "Registered area");

        Ok(())
    }

    /// Base directory of a registered area.
    pub fn area_base(&self, name: &str) -> Option<&str> {
        self.areas
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, base)| base.as_str())
    }

    /// Express `path` relative to the most specific registered area.
    pub fn resolve(&self, path: impl AsRef<Path>) -> AreaResource {
        let path = self.absolutize(path.as_ref());
        let path = path.to_string_lossy();

        if path.is_empty() {
            return AreaResource::unresolved(String::new());
        }

        for (name, base) in &self.areas {
            if let Some(sub_path) = self.strip_area(&path, base) {
                return AreaResource {
                    area: Some(name.clone()),
                    sub_path: sub_path.to_string(),
                };
            }
        }

        AreaResource::unresolved(path.into_owned())
    }

    /// Rebuild the path a resource refers to.
    ///
    /// Returns `None` when the resource names an area that is not registered.
    pub fn path_for(&self, resource: &AreaResource) -> Option<PathBuf> {
        match &resource.area {
            None => Some(PathBuf::from(&resource.sub_path)),
            Some(area) => {
                let base = PathBuf::from(self.area_base(area)?);
                if resource.sub_path.is_empty() {
                    Some(base)
                } else {
                    Some(base.join(&resource.sub_path))
                }
            }
        }
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() && !path.as_os_str().is_empty() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn strip_area<'a>(&self, path: &'a str, base: &str) -> Option<&'a str> {
        if path.len() < base.len() || !path.is_char_boundary(base.len()) {
            return None;
        }

        let (head, rest) = path.split_at(base.len());
        let matches = if self.case_insensitive {
            head.eq_ignore_ascii_case(base)
        } else {
            head == base
        };
        if !matches {
            return None;
        }

        if rest.is_empty() {
            return Some("");
        }
        if base.ends_with(is_separator) {
            return Some(rest);
        }

        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if is_separator(c) => Some(chars.as_str()),
            _ => None,
        }
    }
}

#[cfg(windows)]
fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

#[cfg(not(windows))]
fn is_separator(c: char) -> bool {
    c == '/'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_resolver() -> ResourceResolver {
        let mut resolver = ResourceResolver::new(false);
        resolver.register("pkg", "/opt/app").unwrap();
        resolver.register("pkgdata", "/opt/app/data").unwrap();
        resolver
    }

    #[test]
    fn test_longest_prefix_wins() {
        let res = app_resolver().resolve("/opt/app/data/foo.cix");
        assert_eq!(res.area.as_deref(), Some("pkgdata"));
        assert_eq!(res.sub_path, "foo.cix");
    }

    #[test]
    fn test_shorter_area_still_matches() {
        let res = app_resolver().resolve("/opt/app/lib/bar.py");
        assert_eq!(res.area.as_deref(), Some("pkg"));
        assert_eq!(res.sub_path, "lib/bar.py");
    }

    #[test]
    fn test_separator_boundary_required() {
        let res = app_resolver().resolve("/opt/application/x.py");
        assert_eq!(res.area, None);
        assert_eq!(res.sub_path, "/opt/application/x.py");
    }

    #[test]
    fn test_exact_area_path() {
        let res = app_resolver().resolve("/opt/app/data");
        assert_eq!(res.area.as_deref(), Some("pkgdata"));
        assert_eq!(res.sub_path, "");
    }

    #[test]
    fn test_empty_path_unresolved() {
        let res = app_resolver().resolve("");
        assert!(!res.is_resolved());
        assert_eq!(res.sub_path, "");
    }

    #[test]
    fn test_trailing_separator_on_registration() {
        let mut resolver = ResourceResolver::new(false);
        resolver.register("user", "/home/me/.codeintel/").unwrap();
        let res = resolver.resolve("/home/me/.codeintel/db/x");
        assert_eq!(res.area.as_deref(), Some("user"));
        assert_eq!(res.sub_path, "db/x");
    }

    #[test]
    fn test_root_area() {
        let mut resolver = ResourceResolver::new(false);
        resolver.register("root", "/").unwrap();
        let res = resolver.resolve("/etc/hosts");
        assert_eq!(res.area.as_deref(), Some("root"));
        assert_eq!(res.sub_path, "etc/hosts");
    }

    #[test]
    fn test_case_insensitive_matching() {
        let mut resolver = ResourceResolver::new(true);
        resolver.register("pkg", "/Opt/App").unwrap();
        let res = resolver.resolve("/opt/app/Lib/X.py");
        assert_eq!(res.area.as_deref(), Some("pkg"));
        assert_eq!(res.sub_path, "Lib/X.py");

        let strict = app_resolver().resolve("/OPT/APP/x.py");
        assert_eq!(strict.area, None);
    }

    #[test]
    fn test_relative_input_uses_base_dir() {
        let resolver = app_resolver().with_base_dir("/opt/app");
        let res = resolver.resolve("data/foo.cix");
        assert_eq!(res.area.as_deref(), Some("pkgdata"));
        assert_eq!(res.sub_path, "foo.cix");
    }

    #[test]
    fn test_duplicate_and_empty_registration() {
        let mut resolver = app_resolver();
        assert!(matches!(
            resolver.register("pkg", "/elsewhere"),
            Err(CoreError::InvalidArea { .. })
        ));
        assert!(matches!(
            resolver.register("blank", ""),
            Err(CoreError::InvalidArea { .. })
        ));
    }

    #[test]
    fn test_path_for_round_trip() {
        let resolver = app_resolver();
        let res = resolver.resolve("/opt/app/data/foo.cix");
        assert_eq!(
            resolver.path_for(&res),
            Some(PathBuf::from("/opt/app/data/foo.cix"))
        );

        let unknown = AreaResource {
            area: Some("missing".to_string()),
            sub_path: "x".to_string(),
        };
        assert_eq!(resolver.path_for(&unknown), None);
    }

    #[test]
    fn test_display() {
        let res = app_resolver().resolve("/opt/app/lib/bar.py");
        assert_eq!(res.to_string(), "pkg:lib/bar.py");
        let raw = app_resolver().resolve("/tmp/x");
        assert_eq!(raw.to_string(), "/tmp/x");
    }
}
