//! `#include` expansion.
//!
//! The resolver callback is host-supplied (the scene tree decides where
//! shader snippets come from); this module only does the textual mechanics:
//! first match wins, expansion is recursive, and a visited set cuts cycles.

use std::collections::HashSet;

/// Which quoting style an include used. Hosts may search different scopes
/// for `"local"` versus `<library>` includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeStyle {
    Quoted,
    Angle,
}

pub(crate) fn expand<F>(src: &str, resolver: &mut F, unresolved: &mut Vec<String>) -> String
where
    F: FnMut(&str, IncludeStyle) -> Option<String>,
{
    let mut visited = HashSet::new();
    expand_inner(src, resolver, unresolved, &mut visited)
}

fn expand_inner<F>(
    src: &str,
    resolver: &mut F,
    unresolved: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> String
where
    F: FnMut(&str, IncludeStyle) -> Option<String>,
{
    let mut out = String::with_capacity(src.len());
    for line in src.lines() {
        match parse_include_line(line) {
            Some((name, style)) => {
                if !visited.insert(name.to_string()) {
                    // already pasted above (or we are inside a cycle)
                    out.push_str(&format!("// ----- include '{name}' (skipped, already included) -----\n"));
                    continue;
                }
                match resolver(name, style).or_else(|| default_include(name).map(str::to_string)) {
                    Some(text) => {
                        out.push_str(&format!("// ----- include '{name}' -----\n"));
                        let inner = expand_inner(&text, resolver, unresolved, visited);
                        out.push_str(&inner);
                        if !inner.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    None => {
                        log::warn!("unresolved shader include '{name}'");
                        unresolved.push(name.to_string());
                        out.push_str(&format!("// missing include '{name}'\n"));
                    }
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

fn parse_include_line(line: &str) -> Option<(&str, IncludeStyle)> {
    let rest = line.trim_start().strip_prefix("#include")?.trim_start();
    if let Some(inner) = rest.strip_prefix('"') {
        let end = inner.find('"')?;
        return Some((&inner[..end], IncludeStyle::Quoted));
    }
    if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>')?;
        return Some((&inner[..end], IncludeStyle::Angle));
    }
    None
}

/// Built-in snippet library, consulted when the host resolver declines.
///
/// These are the distance-field helpers the wave tracer's default scene
/// depends on.
pub fn default_include(name: &str) -> Option<&'static str> {
    match name {
        "df/primitives" => Some(DF_PRIMITIVES),
        "df/operators" => Some(DF_OPERATORS),
        _ => None,
    }
}

const DF_PRIMITIVES: &str = r#"float sdSphere(in vec3 p, in float r)
{
    return length(p) - r;
}

float sdBox(in vec3 p, in vec3 b)
{
    vec3 d = abs(p) - b;
    return min(max(d.x, max(d.y, d.z)), 0.0) + length(max(d, 0.0));
}

float sdPlane(in vec3 p, in vec4 n)
{
    return dot(p, n.xyz) + n.w;
}

float sdTorus(in vec3 p, in vec2 t)
{
    vec2 q = vec2(length(p.xz) - t.x, p.y);
    return length(q) - t.y;
}
"#;

const DF_OPERATORS: &str = r#"float opUnion(in float a, in float b)
{
    return min(a, b);
}

float opSubtract(in float a, in float b)
{
    return max(a, -b);
}

float opIntersect(in float a, in float b)
{
    return max(a, b);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_quoting_styles() {
        assert_eq!(
            parse_include_line("#include \"a/b\""),
            Some(("a/b", IncludeStyle::Quoted))
        );
        assert_eq!(
            parse_include_line("  #include <df/primitives>"),
            Some(("df/primitives", IncludeStyle::Angle))
        );
        assert_eq!(parse_include_line("#include nope"), None);
        assert_eq!(parse_include_line("float x;"), None);
    }

    #[test]
    fn default_library_backs_the_resolver() {
        let mut unresolved = Vec::new();
        let out = expand(
            "#include <df/primitives>\n",
            &mut |_, _| None,
            &mut unresolved,
        );
        assert!(unresolved.is_empty());
        assert!(out.contains("sdBox"));
    }

    #[test]
    fn host_resolver_takes_precedence() {
        let mut unresolved = Vec::new();
        let out = expand(
            "#include <df/primitives>\n",
            &mut |_, _| Some("float custom(){ return 0.0; }".into()),
            &mut unresolved,
        );
        assert!(out.contains("custom"));
        assert!(!out.contains("sdBox"));
    }
}
