//! Shared store configuration.
//!
//! Everything the record jobs consult about the surrounding project is
//! carried here explicitly; no job reads ambient process state. The two
//! plugin escape hatches (CSS post passes, extra file dependencies) are
//! function slots on the configuration rather than reflective overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap as HashMap;

use crate::css::CssArtifacts;
use crate::error::JobResult;
use crate::file_ref::FileRef;

/// A post-processing pass applied to CSS artifacts after the built-in
/// import-strip pass.
pub type CssPass = Arc<dyn Fn(&mut CssArtifacts) -> JobResult<()> + Send + Sync>;

/// Hook producing extra files a record depends on, so multi-file compilers
/// can be invalidated transitively by a watcher.
pub type FileDependenciesHook = Arc<dyn Fn(&FileRef) -> Vec<PathBuf> + Send + Sync>;

/// Configuration shared by every record in a store.
#[derive(Clone)]
pub struct StoreOptions {
    /// Directory URLs are made relative to.
    pub source_root: PathBuf,
    /// URL prefix for served artifacts. Always ends with `/`.
    pub root_url: String,
    /// The project's root `node_modules` directory. Files under it skip
    /// source transforms and get their path resolutions cached.
    pub root_node_modules: PathBuf,
    /// Pre-built assets that bypass transformation and are emitted minified.
    pub vendor_root: Option<PathBuf>,
    /// File served verbatim, without module-definition wrapping.
    pub bootstrap_runtime: Option<PathBuf>,
    /// Standard-library module shims (e.g. a browser-safe `path`).
    pub core_shims: HashMap<String, PathBuf>,
    /// Module substituted when a package manifest maps a name to `false`.
    pub empty_shim: Option<PathBuf>,
    /// CSS post passes, applied in order.
    pub css_passes: Vec<CssPass>,
    /// Extra file dependencies hook.
    pub file_dependencies: Option<FileDependenciesHook>,
}

impl StoreOptions {
    /// Options rooted at a source directory: URLs served from `/`,
    /// `node_modules` beside the sources, no vendor root, no bootstrap
    /// runtime.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        let source_root = source_root.into();
        let root_node_modules = source_root.join("node_modules");
        Self {
            source_root,
            root_url: "/".to_string(),
            root_node_modules,
            vendor_root: None,
            bootstrap_runtime: None,
            core_shims: HashMap::default(),
            empty_shim: None,
            css_passes: Vec::new(),
            file_dependencies: None,
        }
    }

    /// Set the URL prefix, normalizing it to end with `/`.
    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        let mut root_url = root_url.into();
        if !root_url.ends_with('/') {
            root_url.push('/');
        }
        self.root_url = root_url;
        self
    }

    pub fn with_root_node_modules(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_node_modules = dir.into();
        self
    }

    pub fn with_vendor_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.vendor_root = Some(dir.into());
        self
    }

    pub fn with_bootstrap_runtime(mut self, path: impl Into<PathBuf>) -> Self {
        self.bootstrap_runtime = Some(path.into());
        self
    }

    pub fn with_core_shim(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.core_shims.insert(name.into(), path.into());
        self
    }

    pub fn with_empty_shim(mut self, path: impl Into<PathBuf>) -> Self {
        self.empty_shim = Some(path.into());
        self
    }

    pub fn with_css_pass(mut self, pass: CssPass) -> Self {
        self.css_passes.push(pass);
        self
    }

    pub fn with_file_dependencies(mut self, hook: FileDependenciesHook) -> Self {
        self.file_dependencies = Some(hook);
        self
    }

    fn is_under(path: &Path, dir: &Path) -> bool {
        path.starts_with(dir)
    }

    /// Whether the file is eligible for source transforms: everything except
    /// the root `node_modules` and the vendor root.
    pub fn should_transform(&self, path: &Path) -> bool {
        if Self::is_under(path, &self.root_node_modules) {
            return false;
        }
        if let Some(vendor) = &self.vendor_root {
            if Self::is_under(path, vendor) {
                return false;
            }
        }
        true
    }

    /// Whether the file sits under the vendor root.
    pub fn is_vendored(&self, path: &Path) -> bool {
        self.vendor_root
            .as_deref()
            .is_some_and(|vendor| Self::is_under(path, vendor))
    }

    /// Whether the file is the configured bootstrap runtime.
    pub fn is_bootstrap(&self, path: &Path) -> bool {
        self.bootstrap_runtime
            .as_deref()
            .is_some_and(|bootstrap| bootstrap == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_url_always_ends_with_a_slash() {
        let options = StoreOptions::new("/srv/app").with_root_url("http://127.0.0.1:3000");
        assert_eq!(options.root_url, "http://127.0.0.1:3000/");

        let options = StoreOptions::new("/srv/app").with_root_url("http://127.0.0.1:3000/");
        assert_eq!(options.root_url, "http://127.0.0.1:3000/");
    }

    #[test]
    fn transform_eligibility_excludes_node_modules_and_vendor() {
        let options = StoreOptions::new("/srv/app").with_vendor_root("/srv/app/vendor");

        assert!(options.should_transform(Path::new("/srv/app/src/main.js")));
        assert!(!options.should_transform(Path::new("/srv/app/node_modules/pkg/index.js")));
        assert!(!options.should_transform(Path::new("/srv/app/vendor/jquery.js")));
    }

    #[test]
    fn bootstrap_matches_by_exact_path() {
        let options = StoreOptions::new("/srv/app").with_bootstrap_runtime("/srv/app/runtime.js");
        assert!(options.is_bootstrap(Path::new("/srv/app/runtime.js")));
        assert!(!options.is_bootstrap(Path::new("/srv/app/src/runtime.js")));
    }
}
