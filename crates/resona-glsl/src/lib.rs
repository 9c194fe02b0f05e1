#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

//! Textual GLSL assembly.
//!
//! A [`Source`] is a glorified string container for one vertex + fragment
//! pair. The backend compiles the *finalized* text, which is the stored text
//! with accumulated `#define` lines injected after the `#version` directive.
//! `#include` lines are resolved up front through a caller-supplied resolver,
//! and user code can be spliced over a marker line (the wave tracer feeds its
//! distance-field functions in this way).

mod include;
mod log_parse;

pub use include::{default_include, IncludeStyle};
pub use log_parse::parse_info_log;

use resona_core::SourceStage;

/// Vertex + fragment source pair with pending `#define`s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Source {
    pub vert: String,
    pub frag: String,
    /// Optional human-friendly origin (path/label) for logs.
    pub origin: Option<String>,
    defines: Vec<String>,
}

impl Source {
    pub fn new(vert: impl Into<String>, frag: impl Into<String>) -> Self {
        Self {
            vert: vert.into(),
            frag: frag.into(),
            origin: None,
            defines: Vec::new(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Queue a `#define` line, injected into both stages at finalize time.
    ///
    /// `text` may be a bare name (`"MO_FEATURE"`), `"NAME value"`, or a full
    /// `#define` line.
    pub fn add_define(&mut self, text: &str) {
        let line = if text.trim_start().starts_with("#define") {
            text.trim().to_string()
        } else {
            format!("#define {}", text.trim())
        };
        self.defines.push(line);
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    /// Number of lines the define block shifts user code by, per stage.
    ///
    /// Info-log line numbers refer to the finalized text; subtract this to
    /// map a message back onto the stored source (only lines after the
    /// `#version` directive shift).
    pub fn injected_line_count(&self) -> u32 {
        self.defines.len() as u32
    }

    /// The text actually handed to the compiler for `stage`.
    pub fn finalized(&self, stage: SourceStage) -> String {
        let src = match stage {
            SourceStage::Vertex => &self.vert,
            _ => &self.frag,
        };
        inject_defines(src, &self.defines)
    }

    /// Replace the first line containing `marker` with `code`.
    ///
    /// Returns false (and leaves the source untouched) when the marker does
    /// not occur; the wave tracer treats that as a broken skeleton.
    pub fn replace_section(&mut self, marker: &str, code: &str) -> bool {
        let mut found = false;
        for src in [&mut self.vert, &mut self.frag] {
            if let Some(replaced) = replace_marker_line(src, marker, code) {
                *src = replaced;
                found = true;
            }
        }
        found
    }

    /// Resolve `#include "name"` / `#include <name>` lines in both stages.
    ///
    /// The resolver returns the replacement text or `None`; unresolved names
    /// are collected and left in the source as a comment marker so the
    /// compile error points at the right spot. Includes are expanded
    /// recursively with a visited set (first occurrence wins, cycles are cut).
    pub fn replace_includes<F>(&mut self, resolver: &mut F) -> Vec<String>
    where
        F: FnMut(&str, IncludeStyle) -> Option<String>,
    {
        let mut unresolved = Vec::new();
        self.vert = include::expand(&self.vert, resolver, &mut unresolved);
        self.frag = include::expand(&self.frag, resolver, &mut unresolved);
        unresolved
    }
}

fn inject_defines(src: &str, defines: &[String]) -> String {
    if defines.is_empty() {
        return src.to_string();
    }
    let block = defines.join("\n");
    // Insert after the #version directive; prepend when there is none.
    if let Some(pos) = src
        .lines()
        .position(|l| l.trim_start().starts_with("#version"))
    {
        let mut out = String::with_capacity(src.len() + block.len() + 1);
        for (i, line) in src.lines().enumerate() {
            out.push_str(line);
            out.push('\n');
            if i == pos {
                out.push_str(&block);
                out.push('\n');
            }
        }
        out
    } else {
        format!("{block}\n{src}")
    }
}

fn replace_marker_line(src: &str, marker: &str, code: &str) -> Option<String> {
    if !src.contains(marker) {
        return None;
    }
    let mut out = String::with_capacity(src.len() + code.len());
    for line in src.lines() {
        if line.contains(marker) {
            out.push_str(code);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAG: &str = "#version 330 core\nout vec4 o;\nvoid main(){ o = vec4(1.0); }\n";

    #[test]
    fn defines_land_after_version_directive() {
        let mut src = Source::new("", FRAG);
        src.add_define("MO_FEATURE");
        src.add_define("#define MO_AA (4)");
        let text = src.finalized(SourceStage::Fragment);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#version 330 core");
        assert_eq!(lines[1], "#define MO_FEATURE");
        assert_eq!(lines[2], "#define MO_AA (4)");
        assert_eq!(src.injected_line_count(), 2);
    }

    #[test]
    fn defines_are_prepended_without_version() {
        let mut src = Source::new("void main(){}", "");
        src.add_define("X 1");
        let text = src.finalized(SourceStage::Vertex);
        assert!(text.starts_with("#define X 1\n"));
    }

    #[test]
    fn replace_section_splices_user_code() {
        let mut src = Source::new("", "#version 330 core\n//!user_functions!\nvoid main(){}\n");
        assert!(src.replace_section("//!user_functions!", "float DE(vec3 p){ return 1.0; }"));
        assert!(src.frag.contains("float DE"));
        assert!(!src.frag.contains("//!user_functions!"));
    }

    #[test]
    fn replace_section_reports_missing_marker() {
        let mut src = Source::new("", FRAG);
        assert!(!src.replace_section("//!nope!", "x"));
        assert_eq!(src.frag, FRAG);
    }

    #[test]
    fn includes_resolve_recursively() {
        let mut src = Source::new(
            "",
            "#version 330 core\n#include \"outer\"\nvoid main(){}\n",
        );
        let unresolved = src.replace_includes(&mut |name, _| match name {
            "outer" => Some("#include <inner>\nfloat outer_fn(){ return 1.0; }".into()),
            "inner" => Some("float inner_fn(){ return 2.0; }".into()),
            _ => None,
        });
        assert!(unresolved.is_empty());
        assert!(src.frag.contains("inner_fn"));
        assert!(src.frag.contains("outer_fn"));
        // inner comes before the outer code that depends on it
        let inner = src.frag.find("inner_fn").unwrap();
        let outer = src.frag.find("outer_fn").unwrap();
        assert!(inner < outer);
    }

    #[test]
    fn include_cycles_are_cut() {
        let mut src = Source::new("", "#include \"a\"\n");
        let unresolved = src.replace_includes(&mut |name, _| match name {
            "a" => Some("#include \"b\"\nfloat a_fn(){ return 0.0; }".into()),
            "b" => Some("#include \"a\"\nfloat b_fn(){ return 0.0; }".into()),
            _ => None,
        });
        assert!(unresolved.is_empty());
        assert_eq!(src.frag.matches("a_fn").count(), 1);
        assert_eq!(src.frag.matches("b_fn").count(), 1);
    }

    #[test]
    fn unresolved_includes_are_reported_and_marked() {
        let mut src = Source::new("", "#include <missing/thing>\nvoid main(){}\n");
        let unresolved = src.replace_includes(&mut |_, _| None);
        assert_eq!(unresolved, vec!["missing/thing".to_string()]);
        assert!(src.frag.contains("missing include"));
    }
}
