//! Module resolution.
//!
//! Node-style resolution without the bundler around it: relative and
//! absolute identifiers get extension and index candidates, package
//! identifiers walk `node_modules` directories upward from the importing
//! file, and package manifests are honored including the `browser` field.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use rustc_hash::FxHashMap as HashMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{JobError, JobResult};
use crate::options::StoreOptions;

/// Extensions tried when an identifier omits one.
const CANDIDATE_EXTENSIONS: [&str; 3] = ["js", "json", "css"];

/// The subset of a package manifest that resolution consults.
#[derive(Debug, Clone, Default, Deserialize)]
struct PackageManifest {
    main: Option<String>,
    browser: Option<BrowserField>,
}

/// `browser` is either a replacement entry point or a replacement map whose
/// values are paths or `false`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BrowserField {
    Entry(String),
    Map(HashMap<String, serde_json::Value>),
}

/// Resolves identifiers to absolute file paths.
#[derive(Clone)]
pub struct Resolver {
    core_shims: HashMap<String, PathBuf>,
    empty_shim: Option<PathBuf>,
}

impl Resolver {
    pub fn new(options: &StoreOptions) -> Self {
        Self {
            core_shims: options.core_shims.clone(),
            empty_shim: options.empty_shim.clone(),
        }
    }

    /// Resolve `identifier` as imported from a file in `base_dir`.
    ///
    /// Honors, in order: configured core-module shims, relative and absolute
    /// identifiers (with extension and index candidates), then package
    /// resolution through every `node_modules` directory above `base_dir`.
    pub fn resolve(&self, identifier: &str, base_dir: &Path) -> JobResult<PathBuf> {
        if let Some(shim) = self.core_shims.get(identifier) {
            return Ok(shim.clone());
        }

        if identifier.starts_with('.') {
            let joined = base_dir.join(identifier).clean();
            return self.require_candidate(&joined, identifier, base_dir);
        }

        if Path::new(identifier).is_absolute() {
            let cleaned = Path::new(identifier).to_path_buf().clean();
            return self.require_candidate(&cleaned, identifier, base_dir);
        }

        self.resolve_package(identifier, base_dir)
    }

    fn require_candidate(
        &self,
        path: &Path,
        identifier: &str,
        base_dir: &Path,
    ) -> JobResult<PathBuf> {
        file_candidate(path).ok_or_else(|| {
            JobError::resolve(identifier, base_dir, "no matching file or index module")
        })
    }

    fn resolve_package(&self, identifier: &str, base_dir: &Path) -> JobResult<PathBuf> {
        let (package, subpath) = split_package_identifier(identifier);

        for dir in base_dir.ancestors() {
            let package_dir = dir.join("node_modules").join(package);
            if !package_dir.is_dir() {
                continue;
            }

            let resolved = if subpath.is_empty() {
                self.resolve_package_entry(&package_dir, identifier, base_dir)?
            } else {
                file_candidate(&package_dir.join(subpath))
            };

            if let Some(path) = resolved {
                debug!(identifier, path = %path.display(), "resolved package identifier");
                return Ok(path);
            }
        }

        Err(JobError::resolve(
            identifier,
            base_dir,
            "not found in any node_modules directory",
        ))
    }

    /// Entry-point resolution inside a package directory, honoring the
    /// manifest `browser` field (string form replaces the entry point;
    /// object form remaps the entry, with `false` selecting the configured
    /// empty shim), then `main`, then `index` candidates.
    fn resolve_package_entry(
        &self,
        package_dir: &Path,
        identifier: &str,
        base_dir: &Path,
    ) -> JobResult<Option<PathBuf>> {
        let manifest = read_manifest(package_dir);

        let mut entry = manifest
            .main
            .clone()
            .unwrap_or_else(|| "index.js".to_string());

        match &manifest.browser {
            Some(BrowserField::Entry(replacement)) => {
                entry = replacement.clone();
            }
            Some(BrowserField::Map(map)) => {
                if let Some(replacement) = lookup_browser_map(map, &entry) {
                    match replacement {
                        BrowserReplacement::Path(path) => entry = path,
                        BrowserReplacement::Disabled => {
                            return match &self.empty_shim {
                                Some(shim) => Ok(Some(shim.clone())),
                                None => Err(JobError::resolve(
                                    identifier,
                                    base_dir,
                                    "manifest disables this module for browsers and no empty shim is configured",
                                )),
                            };
                        }
                    }
                }
            }
            None => {}
        }

        Ok(file_candidate(&package_dir.join(entry)))
    }
}

/// A resolver bound to one base directory, so callers resolve bare
/// identifiers without re-threading the importing file's location.
#[derive(Clone)]
pub struct BoundResolver {
    resolver: Resolver,
    base_dir: PathBuf,
}

impl BoundResolver {
    pub(crate) fn new(resolver: Resolver, base_dir: PathBuf) -> Self {
        Self { resolver, base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve(&self, identifier: &str) -> JobResult<PathBuf> {
        self.resolver.resolve(identifier, &self.base_dir)
    }
}

enum BrowserReplacement {
    Path(String),
    Disabled,
}

fn lookup_browser_map(
    map: &HashMap<String, serde_json::Value>,
    entry: &str,
) -> Option<BrowserReplacement> {
    let prefixed = format!("./{}", entry.trim_start_matches("./"));
    let value = map.get(entry).or_else(|| map.get(prefixed.as_str()))?;
    match value {
        serde_json::Value::String(path) => Some(BrowserReplacement::Path(path.clone())),
        serde_json::Value::Bool(false) => Some(BrowserReplacement::Disabled),
        _ => None,
    }
}

fn read_manifest(package_dir: &Path) -> PackageManifest {
    let path = package_dir.join("package.json");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return PackageManifest::default();
    };
    match serde_json::from_str(&text) {
        Ok(manifest) => manifest,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring unreadable manifest");
            PackageManifest::default()
        }
    }
}

/// Try a path verbatim, with each candidate extension appended, and as a
/// directory holding an index module.
fn file_candidate(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }

    for ext in CANDIDATE_EXTENSIONS {
        let with_ext = append_extension(path, ext);
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }

    if path.is_dir() {
        for ext in CANDIDATE_EXTENSIONS {
            let index = path.join(format!("index.{ext}"));
            if index.is_file() {
                return Some(index);
            }
        }
    }

    None
}

/// Append an extension rather than replacing one, so `./pkg.config`
/// becomes `pkg.config.js` and not `pkg.js`.
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Split `pkg/sub/path` (or `@scope/pkg/sub`) into package name and subpath.
fn split_package_identifier(identifier: &str) -> (&str, &str) {
    let segments = if identifier.starts_with('@') { 2 } else { 1 };
    let mut seen = 0;
    for (offset, ch) in identifier.char_indices() {
        if ch == '/' {
            seen += 1;
            if seen == segments {
                return (&identifier[..offset], &identifier[offset + 1..]);
            }
        }
    }
    (identifier, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn resolver() -> Resolver {
        Resolver::new(&StoreOptions::new("/srv/app"))
    }

    #[test]
    fn resolves_relative_with_extension_candidates() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/util.js", "export const x = 1;");

        let resolved = resolver()
            .resolve("./util", &dir.path().join("src"))
            .unwrap();
        assert_eq!(resolved, dir.path().join("src/util.js"));
    }

    #[test]
    fn appends_rather_than_replaces_extensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/app.config.js", "module.exports = {};");

        let resolved = resolver()
            .resolve("./app.config", &dir.path().join("src"))
            .unwrap();
        assert_eq!(resolved, dir.path().join("src/app.config.js"));
    }

    #[test]
    fn resolves_directory_index() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/widgets/index.js", "export {};");

        let resolved = resolver()
            .resolve("./widgets", &dir.path().join("src"))
            .unwrap();
        assert_eq!(resolved, dir.path().join("src/widgets/index.js"));
    }

    #[test]
    fn resolves_package_main() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/left-pad/package.json",
            r#"{"main": "lib/left-pad.js"}"#,
        );
        write(dir.path(), "node_modules/left-pad/lib/left-pad.js", "x");

        let resolved = resolver()
            .resolve("left-pad", &dir.path().join("src"))
            .unwrap();
        assert_eq!(
            resolved,
            dir.path().join("node_modules/left-pad/lib/left-pad.js")
        );
    }

    #[test]
    fn browser_field_string_overrides_main() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/iso/package.json",
            r#"{"main": "node.js", "browser": "browser.js"}"#,
        );
        write(dir.path(), "node_modules/iso/node.js", "");
        write(dir.path(), "node_modules/iso/browser.js", "");

        let resolved = resolver().resolve("iso", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("node_modules/iso/browser.js"));
    }

    #[test]
    fn browser_map_remaps_the_entry() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/iso/package.json",
            r#"{"main": "node.js", "browser": {"./node.js": "./browser.js"}}"#,
        );
        write(dir.path(), "node_modules/iso/node.js", "");
        write(dir.path(), "node_modules/iso/browser.js", "");

        let resolved = resolver().resolve("iso", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("node_modules/iso/browser.js"));
    }

    #[test]
    fn browser_false_uses_the_empty_shim() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "node_modules/fs-backed/package.json",
            r#"{"main": "index.js", "browser": {"./index.js": false}}"#,
        );
        write(dir.path(), "node_modules/fs-backed/index.js", "");
        write(dir.path(), "shims/empty.js", "");

        let options = StoreOptions::new(dir.path()).with_empty_shim(dir.path().join("shims/empty.js"));
        let resolved = Resolver::new(&options)
            .resolve("fs-backed", dir.path())
            .unwrap();
        assert_eq!(resolved, dir.path().join("shims/empty.js"));
    }

    #[test]
    fn scoped_packages_and_subpaths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "node_modules/@scope/pkg/lib/part.js", "");

        let resolved = resolver()
            .resolve("@scope/pkg/lib/part", dir.path())
            .unwrap();
        assert_eq!(
            resolved,
            dir.path().join("node_modules/@scope/pkg/lib/part.js")
        );
    }

    #[test]
    fn core_shims_win_over_packages() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "shims/path.js", "");

        let options =
            StoreOptions::new(dir.path()).with_core_shim("path", dir.path().join("shims/path.js"));
        let resolved = Resolver::new(&options).resolve("path", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("shims/path.js"));
    }

    #[test]
    fn failure_names_identifier_and_base_dir() {
        let dir = TempDir::new().unwrap();
        let err = resolver().resolve("./nope", dir.path()).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("./nope"));
        assert!(text.contains(&dir.path().display().to_string()));
    }
}
