//! Mechanical code quality enforcement for the `linaps` sources.
//!
//! An AST-based lint that runs as an ordinary integration test. It assumes
//! `rustfmt --check` and `cargo clippy` run separately in CI and only checks
//! what those tools cannot.
//!
//! **Critical** (fails the test)
//! - No `.unwrap()` / `.expect()` outside `#[cfg(test)]` code.
//! - Public items carry documentation.
//! - Public API names are unabbreviated (`context`, not `ctx`).
//! - No `FIXME` comments.
//! - No anti-pattern module names such as `utils.rs`.
//!
//! **Ratchet** (fails the test, raise the constant consciously)
//! - Module size high-water mark.
//! - Struct field count.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};

use proc_macro2::Span;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{
    Attribute, ExprMethodCall, FnArg, ItemEnum, ItemFn, ItemMod, ItemStruct, ItemTrait, Pat,
    PatType, Visibility,
};

/// Max fields in any struct. The instance state is the largest today.
const STRUCT_FIELD_COUNT_MAX: usize = 30;

/// Max lines in any single module.
const MODULE_SIZE_HIGH_WATER_MARK: usize = 900;

/// Module file names that hide responsibilities.
const ANTI_PATTERNS: &[&str] = &["utils.rs", "helpers.rs", "misc.rs", "common.rs"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Severity {
    Ratchet,
    Critical,
}

#[derive(Debug)]
struct TidyViolation {
    severity: Severity,
    path: String,
    line: usize,
    message: String,
}

impl TidyViolation {
    fn new(severity: Severity, path: &Path, line: usize, message: impl Into<String>) -> Self {
        TidyViolation {
            severity,
            path: path.to_string_lossy().to_string(),
            line,
            message: message.into(),
        }
    }
}

fn has_doc(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident("doc"))
}

/// `#[cfg(test)]` or `#[test]`.
fn is_test_only(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("test")
            || (attr.path().is_ident("cfg")
                && attr
                    .parse_args::<syn::Ident>()
                    .is_ok_and(|ident| ident == "test"))
    })
}

struct TidyVisitor<'a> {
    path: &'a Path,
    /// Depth of enclosing test-only items.
    test_depth: usize,
    violations: Vec<TidyViolation>,
}

impl<'a> TidyVisitor<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            test_depth: 0,
            violations: Vec::new(),
        }
    }

    fn in_production(&self) -> bool {
        self.test_depth == 0
    }

    fn add(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        self.violations.push(TidyViolation::new(
            severity,
            self.path,
            span.start().line,
            message,
        ));
    }

    fn require_doc(&mut self, vis: &Visibility, attrs: &[Attribute], span: Span, what: &str) {
        if matches!(vis, Visibility::Public(_)) && self.in_production() && !has_doc(attrs) {
            self.add(
                Severity::Critical,
                span,
                format!("Public {what} must have documentation."),
            );
        }
    }
}

impl<'ast> Visit<'ast> for TidyVisitor<'_> {
    fn visit_item_mod(&mut self, item: &'ast ItemMod) {
        let test_only = is_test_only(&item.attrs);
        self.test_depth += usize::from(test_only);
        visit::visit_item_mod(self, item);
        self.test_depth -= usize::from(test_only);
    }

    fn visit_item_fn(&mut self, item: &'ast ItemFn) {
        let test_only = is_test_only(&item.attrs);
        self.test_depth += usize::from(test_only);

        let name = item.sig.ident.to_string();
        self.require_doc(
            &item.vis,
            &item.attrs,
            item.sig.fn_token.span(),
            &format!("function '{name}'"),
        );

        if matches!(item.vis, Visibility::Public(_)) && self.in_production() {
            if name.contains("ctx") {
                self.add(
                    Severity::Critical,
                    item.sig.ident.span(),
                    "Public API function name uses 'ctx'; prefer 'context'.",
                );
            }
            for arg in &item.sig.inputs {
                if let FnArg::Typed(PatType { pat, .. }) = arg {
                    if let Pat::Ident(pat_ident) = &**pat {
                        if pat_ident.ident == "ctx" {
                            self.add(
                                Severity::Critical,
                                pat_ident.span(),
                                "Public API parameter 'ctx' must be named 'context'.",
                            );
                        }
                    }
                }
            }
        }

        visit::visit_item_fn(self, item);
        self.test_depth -= usize::from(test_only);
    }

    fn visit_item_struct(&mut self, item: &'ast ItemStruct) {
        if item.fields.len() > STRUCT_FIELD_COUNT_MAX {
            self.add(
                Severity::Ratchet,
                item.ident.span(),
                format!(
                    "Struct '{}' has {} fields, exceeding the max of {}.",
                    item.ident,
                    item.fields.len(),
                    STRUCT_FIELD_COUNT_MAX
                ),
            );
        }
        self.require_doc(
            &item.vis,
            &item.attrs,
            item.struct_token.span(),
            &format!("struct '{}'", item.ident),
        );
        visit::visit_item_struct(self, item);
    }

    fn visit_item_enum(&mut self, item: &'ast ItemEnum) {
        self.require_doc(
            &item.vis,
            &item.attrs,
            item.enum_token.span(),
            &format!("enum '{}'", item.ident),
        );
        visit::visit_item_enum(self, item);
    }

    fn visit_item_trait(&mut self, item: &'ast ItemTrait) {
        self.require_doc(
            &item.vis,
            &item.attrs,
            item.trait_token.span(),
            &format!("trait '{}'", item.ident),
        );
        visit::visit_item_trait(self, item);
    }

    fn visit_expr_method_call(&mut self, call: &'ast ExprMethodCall) {
        if self.in_production() {
            if call.method == "unwrap" {
                self.add(
                    Severity::Critical,
                    call.method.span(),
                    "Do not use .unwrap() in production code; propagate the error.",
                );
            }
            if call.method == "expect" {
                self.add(
                    Severity::Critical,
                    call.method.span(),
                    "Do not use .expect() in production code; use structured errors.",
                );
            }
        }
        visit::visit_expr_method_call(self, call);
    }
}

fn check_for_fixme(path: &Path, text: &str, violations: &mut Vec<TidyViolation>) {
    for (i, line) in text.lines().enumerate() {
        if line.contains("FIXME") {
            violations.push(TidyViolation::new(
                Severity::Critical,
                path,
                i + 1,
                "FIXME comments are not allowed in the main branch.",
            ));
        }
    }
}

fn list_rust_files() -> Vec<PathBuf> {
    walkdir::WalkDir::new("src")
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

#[test]
fn tidy_main() {
    let mut violations = Vec::new();
    let files = list_rust_files();
    assert!(!files.is_empty(), "tidy must run from the crate root");

    for path in &files {
        let text = fs::read_to_string(path).unwrap();

        let lines = text.lines().count();
        if lines > MODULE_SIZE_HIGH_WATER_MARK {
            violations.push(TidyViolation::new(
                Severity::Ratchet,
                path,
                0,
                format!(
                    "Module has {lines} lines, exceeding the high-water mark of {MODULE_SIZE_HIGH_WATER_MARK}."
                ),
            ));
        }

        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string());
        if file_name.is_some_and(|name| ANTI_PATTERNS.contains(&name.as_str())) {
            violations.push(TidyViolation::new(
                Severity::Critical,
                path,
                0,
                "Anti-pattern module name found. Use focused, descriptive module names.",
            ));
        }

        check_for_fixme(path, &text, &mut violations);

        match syn::parse_file(&text) {
            Ok(ast) => {
                let mut visitor = TidyVisitor::new(path);
                visitor.visit_file(&ast);
                violations.extend(visitor.violations);
            }
            Err(e) => violations.push(TidyViolation::new(
                Severity::Critical,
                path,
                e.span().start().line,
                format!("Failed to parse file: {e}"),
            )),
        }
    }

    violations.sort_by_key(|v| (Reverse(v.severity), v.path.clone(), v.line));
    assert!(
        violations.is_empty(),
        "\n--- Tidy Failures ---\n{}\n",
        violations
            .iter()
            .map(|v| format!("[{:?}] {}:{}: {}", v.severity, v.path, v.line, v.message))
            .collect::<Vec<_>>()
            .join("\n")
    );
}

#[test]
fn test_only_detection() {
    let module: ItemMod = syn::parse_quote! {
        #[cfg(test)]
        mod tests {}
    };
    assert!(is_test_only(&module.attrs));

    let gated: ItemMod = syn::parse_quote! {
        #[cfg(feature = "test_utils")]
        mod testing {}
    };
    assert!(!is_test_only(&gated.attrs));
}

#[test]
fn flags_unwrap_outside_tests_only() {
    let file: syn::File = syn::parse_quote! {
        /// Documented.
        pub fn production() -> u8 {
            Some(1).unwrap()
        }

        #[cfg(test)]
        mod tests {
            #[test]
            fn allowed() {
                Some(1).unwrap();
            }
        }
    };
    let path = PathBuf::from("src/sample.rs");
    let mut visitor = TidyVisitor::new(&path);
    visitor.visit_file(&file);
    assert_eq!(visitor.violations.len(), 1);
    assert!(visitor.violations[0].message.contains("unwrap"));
}
