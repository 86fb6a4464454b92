//! CSS post-processing.
//!
//! Parses with lightningcss, collects `@import` and `url()` dependencies,
//! strips the `@import` rules (imported sheets are traced and served as their
//! own modules), and prints the result with a source map.

use std::convert::Infallible;
use std::path::Path;

use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::values::url::Url;
use lightningcss::visit_types;
use lightningcss::visitor::{Visit, VisitTypes, Visitor};
use parcel_sourcemap::SourceMap;

use crate::error::{JobError, JobResult, SourceLocation};
use crate::options::CssPass;

/// Output of post-processing one stylesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CssArtifacts {
    /// Transformed stylesheet text, with `@import` rules removed.
    pub css: String,
    /// Source map serialized as JSON.
    pub map: Option<String>,
    /// `@import` targets followed by `url()` references, in document order.
    pub dependencies: Vec<String>,
}

struct UrlCollector {
    urls: Vec<String>,
}

impl<'i> Visitor<'i> for UrlCollector {
    type Error = Infallible;

    fn visit_types(&self) -> VisitTypes {
        visit_types!(URLS)
    }

    fn visit_url(&mut self, url: &mut Url<'i>) -> Result<(), Self::Error> {
        self.urls.push(url.url.to_string());
        Ok(())
    }
}

/// Post-process a stylesheet, then run the configured extra passes over the
/// artifacts in order.
pub fn compile_css(path: &Path, source: &str, passes: &[CssPass]) -> JobResult<CssArtifacts> {
    let filename = path.to_string_lossy().into_owned();

    let mut stylesheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: filename.clone(),
            ..ParserOptions::default()
        },
    )
    .map_err(|err| {
        let location = err.loc.as_ref().map(|loc| SourceLocation {
            line: loc.line + 1,
            column: loc.column,
        });
        JobError::parse(path, location, err.kind.to_string())
    })?;

    let mut dependencies = Vec::new();
    stylesheet.rules.0.retain(|rule| match rule {
        CssRule::Import(import) => {
            dependencies.push(import.url.to_string());
            false
        }
        _ => true,
    });

    let mut collector = UrlCollector { urls: Vec::new() };
    let _ = stylesheet.visit(&mut collector);
    dependencies.extend(collector.urls);

    let mut source_map = SourceMap::new("/");
    let printed = stylesheet
        .to_css(PrinterOptions {
            source_map: Some(&mut source_map),
            ..PrinterOptions::default()
        })
        .map_err(|err| JobError::parse(path, None, err.to_string()))?;

    let mut artifacts = CssArtifacts {
        css: printed.code,
        map: source_map.to_json(None).ok(),
        dependencies,
    };

    for pass in passes {
        pass(&mut artifacts)?;
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn compile(source: &str) -> CssArtifacts {
        compile_css(Path::new("/srv/app/styles/site.css"), source, &[]).unwrap()
    }

    #[test]
    fn collects_and_strips_import_rules() {
        let artifacts = compile("@import \"./base.css\";\nbody { color: red; }\n");
        assert_eq!(artifacts.dependencies, vec!["./base.css"]);
        assert!(!artifacts.css.contains("@import"));
        assert!(artifacts.css.contains("color: red"));
    }

    #[test]
    fn collects_url_references_without_rewriting_them() {
        let artifacts = compile(".logo { background: url(\"./img.png\"); }\n");
        assert_eq!(artifacts.dependencies, vec!["./img.png"]);
        assert!(artifacts.css.contains("img.png"));
    }

    #[test]
    fn imports_come_before_url_references() {
        let artifacts = compile(
            "@import \"./base.css\";\n.logo { background: url(\"./img.png\"); }\n",
        );
        assert_eq!(artifacts.dependencies, vec!["./base.css", "./img.png"]);
    }

    #[test]
    fn produces_a_source_map() {
        let artifacts = compile("body { margin: 0; }\n");
        let map = artifacts.map.expect("map is always produced");
        assert!(map.contains("\"mappings\""));
    }

    #[test]
    fn surfaces_parse_errors() {
        let err = compile_css(Path::new("/srv/app/styles/broken.css"), "body { color: }", &[])
            .unwrap_err();
        assert!(matches!(err, JobError::Parse { .. }));
    }

    #[test]
    fn extra_passes_run_in_order() {
        let upper: CssPass = Arc::new(|artifacts| {
            artifacts.css = artifacts.css.to_uppercase();
            Ok(())
        });
        let tag: CssPass = Arc::new(|artifacts| {
            artifacts.css.push_str("/*tagged*/");
            Ok(())
        });

        let artifacts = compile_css(
            Path::new("/srv/app/styles/site.css"),
            "body { margin: 0; }",
            &[upper, tag],
        )
        .unwrap();
        assert!(artifacts.css.starts_with("BODY"));
        assert!(artifacts.css.ends_with("/*tagged*/"));
    }
}
