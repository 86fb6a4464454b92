//! JavaScript parsing, dependency analysis, and code generation.
//!
//! One arena pass per file: parse with oxc, collect static dependency
//! sources from the AST, and regenerate code (plus a source map) through the
//! code generator. The semantic lowering passes live outside this crate; the
//! adapter owns source-type handling and option mapping.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    CallExpression, ExportAllDeclaration, ExportNamedDeclaration, Expression, ImportDeclaration,
    Program,
};
use oxc_ast_visit::{walk, Visit};
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde_json::Value;

use crate::error::{JobError, JobResult, SourceLocation};

/// Options for a single compile.
#[derive(Debug, Clone)]
pub struct JsCompileOptions {
    /// Run the full transform pipeline. Ineligible files (root
    /// `node_modules`, the vendor root) get a plain module-parse AST run
    /// straight through the generator instead.
    pub transform: bool,
    /// Emit a source map alongside the generated code.
    pub source_maps: bool,
    /// Emit minified output (vendored files).
    pub minify: bool,
}

impl Default for JsCompileOptions {
    fn default() -> Self {
        Self {
            transform: true,
            source_maps: false,
            minify: false,
        }
    }
}

/// Output of compiling one JavaScript file.
#[derive(Debug, Clone, PartialEq)]
pub struct JsArtifacts {
    /// Generated code.
    pub code: String,
    /// Source map serialized as JSON, when requested.
    pub map: Option<String>,
    /// Static dependency sources in source order: `import` declarations,
    /// `export ... from`, `export * from`, and `require("...")` calls.
    pub dependencies: Vec<String>,
}

/// Parse, analyze, and regenerate a JavaScript file.
///
/// Under the transform pipeline the file is parsed as an ES module first
/// and files that only parse as scripts get a second attempt; if both fail,
/// the module-parse diagnostics win. Transform-ineligible files get the
/// plain module parse only.
pub fn compile_js(path: &Path, source: &str, options: &JsCompileOptions) -> JobResult<JsArtifacts> {
    let allocator = Allocator::default();

    let module = Parser::new(&allocator, source, SourceType::mjs()).parse();
    let parsed = if module.errors.is_empty() {
        module
    } else {
        let fallback = if options.transform {
            let script = Parser::new(&allocator, source, SourceType::cjs()).parse();
            script.errors.is_empty().then_some(script)
        } else {
            None
        };
        match fallback {
            Some(script) => script,
            None => {
                let first = &module.errors[0];
                let location = first
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.first())
                    .map(|label| location_at(source, label.offset()));
                return Err(JobError::parse(path, location, first.message.clone()));
            }
        }
    };

    let dependencies = collect_dependencies(&parsed.program);

    let codegen = Codegen::new().with_options(CodegenOptions {
        minify: options.minify,
        source_map_path: options.source_maps.then(|| path.to_path_buf()),
        ..CodegenOptions::default()
    });
    let generated = codegen.build(&parsed.program);

    Ok(JsArtifacts {
        code: generated.code,
        map: generated.map.map(|map| map.to_json_string()),
        dependencies,
    })
}

/// Walk a parsed program and collect its static dependency sources.
fn collect_dependencies(program: &Program<'_>) -> Vec<String> {
    let mut collector = DependencyCollector::default();
    collector.visit_program(program);
    collector.dependencies
}

#[derive(Default)]
struct DependencyCollector {
    dependencies: Vec<String>,
}

impl<'ast> Visit<'ast> for DependencyCollector {
    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'ast>) {
        self.dependencies.push(decl.source.value.to_string());
        walk::walk_import_declaration(self, decl);
    }

    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'ast>) {
        if let Some(source) = &decl.source {
            self.dependencies.push(source.value.to_string());
        }
        walk::walk_export_named_declaration(self, decl);
    }

    fn visit_export_all_declaration(&mut self, decl: &ExportAllDeclaration<'ast>) {
        self.dependencies.push(decl.source.value.to_string());
        walk::walk_export_all_declaration(self, decl);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'ast>) {
        if let Expression::Identifier(callee) = &call.callee {
            if callee.name == "require" && call.arguments.len() == 1 {
                if let Some(Expression::StringLiteral(literal)) = call.arguments[0].as_expression()
                {
                    self.dependencies.push(literal.value.to_string());
                }
            }
        }
        walk::walk_call_expression(self, call);
    }
}

/// Shift every generated line in a serialized source map down by one, to
/// account for the module envelope's leading line. Prepending a `;` to the
/// VLQ mappings is exactly a one-line offset.
pub fn offset_source_map(map_json: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(map_json) else {
        return map_json.to_string();
    };
    let Some(mappings) = value.get("mappings").and_then(Value::as_str) else {
        return map_json.to_string();
    };
    let shifted = format!(";{mappings}");
    value["mappings"] = Value::String(shifted);
    serde_json::to_string(&value).unwrap_or_else(|_| map_json.to_string())
}

/// 1-based line/column of a byte offset.
fn location_at(source: &str, offset: usize) -> SourceLocation {
    let bytes = &source.as_bytes()[..offset.min(source.len())];
    let line = bytes.iter().filter(|byte| **byte == b'\n').count() as u32 + 1;
    let column = bytes.iter().rev().take_while(|byte| **byte != b'\n').count() as u32 + 1;
    SourceLocation { line, column }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> JsArtifacts {
        compile_js(
            Path::new("/srv/app/src/main.js"),
            source,
            &JsCompileOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn collects_static_dependencies_in_source_order() {
        let artifacts = compile(r#"import "./foo"; require("bar"); export * from "woz.js";"#);
        assert_eq!(artifacts.dependencies, vec!["./foo", "bar", "woz.js"]);
    }

    #[test]
    fn collects_export_from_and_nested_requires() {
        let artifacts = compile(
            "export { a } from \"./reexported\";\nfunction load() { return require(\"lazy\"); }\n",
        );
        assert_eq!(artifacts.dependencies, vec!["./reexported", "lazy"]);
    }

    #[test]
    fn ignores_dynamic_require_arguments() {
        let artifacts = compile("var name = \"x\"; require(name);\n");
        assert!(artifacts.dependencies.is_empty());
    }

    #[test]
    fn falls_back_to_script_parsing() {
        // `await` is a reserved word in modules but a plain identifier in
        // scripts.
        let artifacts = compile("var await = 1;\n");
        assert!(artifacts.code.contains("await"));
    }

    #[test]
    fn the_plain_parse_path_has_no_script_fallback() {
        let err = compile_js(
            Path::new("/srv/app/node_modules/pkg/index.js"),
            "var await = 1;\n",
            &JsCompileOptions {
                transform: false,
                ..JsCompileOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, JobError::Parse { .. }));
    }

    #[test]
    fn parse_errors_carry_a_location() {
        let err = compile_js(
            Path::new("/srv/app/src/broken.js"),
            "var x = ;\n",
            &JsCompileOptions::default(),
        )
        .unwrap_err();
        match err {
            JobError::Parse { location, .. } => {
                let location = location.expect("parser reports a span");
                assert_eq!(location.line, 1);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn emits_a_source_map_when_requested() {
        let artifacts = compile_js(
            Path::new("/srv/app/src/main.js"),
            "export const answer = 42;\n",
            &JsCompileOptions {
                source_maps: true,
                ..JsCompileOptions::default()
            },
        )
        .unwrap();
        let map = artifacts.map.expect("map requested");
        assert!(map.contains("\"mappings\""));
    }

    #[test]
    fn minified_output_is_single_line() {
        let artifacts = compile_js(
            Path::new("/srv/app/vendor/lib.js"),
            "function add(a, b) {\n  return a + b;\n}\nadd(1, 2);\n",
            &JsCompileOptions {
                transform: false,
                source_maps: false,
                minify: true,
            },
        )
        .unwrap();
        assert_eq!(artifacts.code.trim_end().lines().count(), 1);
    }

    #[test]
    fn offsetting_a_map_prepends_a_mappings_line() {
        let map = r#"{"version":3,"mappings":"AAAA","sources":["a.js"]}"#;
        let shifted = offset_source_map(map);
        assert!(shifted.contains("\";AAAA\""));
    }
}
