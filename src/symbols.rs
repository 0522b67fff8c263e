//! Declaration extraction for JVM-style source files.
//!
//! A regex pass, not a parser: it finds the package, imports, type
//! declarations with their `extends`/`implements` clauses, and method
//! declarations. Methods are attributed to the nearest preceding type
//! declaration, which is wrong for some nested types but good enough to
//! build ranking documents.

use regex::Regex;

use crate::error::{FaultlineError, Result};
use crate::utils::simple_name;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

/// One declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSymbol {
    pub name: String,
    pub kind: TypeKind,
    /// Simple names, generics stripped.
    pub extends: Vec<String>,
    pub implements: Vec<String>,
    pub methods: Vec<String>,
}

/// Declarations found in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSymbols {
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub types: Vec<TypeSymbol>,
}

impl FileSymbols {
    /// `package.Name`, or `Name` in the default package.
    pub fn qualify(&self, name: &str) -> String {
        match &self.package {
            Some(pkg) => format!("{pkg}.{name}"),
            None => name.to_string(),
        }
    }
}

/// Extracts declarations from source text.
pub trait SymbolExtractor: Send + Sync {
    fn extract(&self, content: &str) -> FileSymbols;
}

// ---------------------------------------------------------------------------
// Regex-based implementation
// ---------------------------------------------------------------------------

const CONTROL_WORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "synchronized", "return", "new", "else", "try",
    "throw", "do",
];

#[derive(Debug, Clone)]
pub struct RegexSymbolExtractor {
    package: Regex,
    import: Regex,
    type_decl: Regex,
    method_decl: Regex,
}

impl RegexSymbolExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            package: compile(r"(?m)^\s*package\s+([\w.]+)\s*;")?,
            import: compile(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+)\s*;")?,
            type_decl: compile(r"\b(class|interface|enum)\s+([A-Z][\w$]*)([^{;]*)\{")?,
            method_decl: compile(
                r"(?m)^[ \t]*(?:(?:public|protected|private|static|final|abstract|synchronized|native|default|strictfp)\s+)*(?:<[^>]*>\s+)?[\w$.\[\]<>?,]+\s+([a-zA-Z_$][\w$]*)\s*\([^;{]*\)\s*(?:throws\s+[\w.$,\s]+)?\{",
            )?,
        })
    }
}

impl SymbolExtractor for RegexSymbolExtractor {
    fn extract(&self, content: &str) -> FileSymbols {
        let package = self
            .package
            .captures(content)
            .map(|c| c[1].to_string());
        let imports = self
            .import
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .collect();

        let mut starts = Vec::new();
        let mut types = Vec::new();
        for caps in self.type_decl.captures_iter(content) {
            let kind = match &caps[1] {
                "interface" => TypeKind::Interface,
                "enum" => TypeKind::Enum,
                _ => TypeKind::Class,
            };
            let (extends, implements) = parse_header(&caps[3]);
            starts.push(caps.get(0).map_or(0, |m| m.start()));
            types.push(TypeSymbol {
                name: caps[2].to_string(),
                kind,
                extends,
                implements,
                methods: Vec::new(),
            });
        }

        for caps in self.method_decl.captures_iter(content) {
            let name = &caps[1];
            if CONTROL_WORDS.contains(&name) {
                continue;
            }
            let at = caps.get(0).map_or(0, |m| m.start());
            // Owner is the last type declared before the method.
            let Some(owner) = starts.iter().rposition(|&s| s < at) else {
                continue;
            };
            let methods = &mut types[owner].methods;
            if !methods.iter().any(|m| m == name) {
                methods.push(name.to_string());
            }
        }

        FileSymbols {
            package,
            imports,
            types,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| FaultlineError::pattern(pattern, e.to_string()))
}

/// Split a declaration header into `extends` and `implements` lists.
fn parse_header(header: &str) -> (Vec<String>, Vec<String>) {
    let flat = strip_generics(header);
    let mut extends = Vec::new();
    let mut implements = Vec::new();
    let mut in_implements = None;
    for word in flat.split(|c: char| c.is_whitespace() || c == ',') {
        match (word, in_implements) {
            ("", _) => {}
            ("extends", _) => in_implements = Some(false),
            ("implements", _) => in_implements = Some(true),
            (name, Some(false)) => extends.push(simple_name(name).to_string()),
            (name, Some(true)) => implements.push(simple_name(name).to_string()),
            (_, None) => {}
        }
    }
    (extends, implements)
}

/// Remove `<...>` sections, nested ones included.
fn strip_generics(text: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: &str = r#"
package org.aspectj.weaver;

import java.util.Map;
import static java.util.Objects.requireNonNull;

/** The world class holds types. */
public abstract class World<T extends Member> extends Base implements Dump.INode, Comparable<World<T>> {
    private Map<String, ResolvedType> types;

    public ResolvedType resolve(String name) throws java.io.IOException {
        if (name == null) {
            return null;
        }
        for (String s : types.keySet()) {
            log(s);
        }
        return types.get(name);
    }

    protected static <K> List<K> lookupAll(K key) {
        return null;
    }

    abstract void flush();

    static class TypeMap {
        void put(String key, ResolvedType type) {
        }
    }
}

interface Listener extends EventListener, Serializable {
    void onEvent(Event e);
}
"#;

    fn extract() -> FileSymbols {
        RegexSymbolExtractor::new().unwrap().extract(WORLD)
    }

    #[test]
    fn finds_package_and_imports() {
        let symbols = extract();
        assert_eq!(symbols.package.as_deref(), Some("org.aspectj.weaver"));
        assert_eq!(
            symbols.imports,
            vec!["java.util.Map", "java.util.Objects.requireNonNull"]
        );
        assert_eq!(symbols.qualify("World"), "org.aspectj.weaver.World");
    }

    #[test]
    fn finds_types_with_supertypes() {
        let symbols = extract();
        let names: Vec<&str> = symbols.types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["World", "TypeMap", "Listener"]);

        let world = &symbols.types[0];
        assert_eq!(world.kind, TypeKind::Class);
        assert_eq!(world.extends, vec!["Base"]);
        assert_eq!(world.implements, vec!["INode", "Comparable"]);

        let listener = &symbols.types[2];
        assert_eq!(listener.kind, TypeKind::Interface);
        assert_eq!(listener.extends, vec!["EventListener", "Serializable"]);
    }

    #[test]
    fn attributes_methods_to_preceding_type() {
        let symbols = extract();
        assert_eq!(symbols.types[0].methods, vec!["resolve", "lookupAll"]);
        assert_eq!(symbols.types[1].methods, vec!["put"]);
    }

    #[test]
    fn skips_control_flow() {
        let symbols = RegexSymbolExtractor::new().unwrap().extract(
            "class A {\n  void run() {\n    } else if (x) {\n    while (y) {\n  }\n}\n",
        );
        assert_eq!(symbols.types[0].methods, vec!["run"]);
    }

    #[test]
    fn default_package_is_unqualified() {
        let symbols = RegexSymbolExtractor::new().unwrap().extract("enum Color { RED }");
        assert_eq!(symbols.package, None);
        assert_eq!(symbols.types[0].kind, TypeKind::Enum);
        assert_eq!(symbols.qualify("Color"), "Color");
    }

    #[test]
    fn generics_are_stripped() {
        assert_eq!(strip_generics("Map<K, List<V>> x"), "Map x");
        let (ext, imp) = parse_header(" extends a.b.Base<T> implements X<Y>, Z ");
        assert_eq!(ext, vec!["Base"]);
        assert_eq!(imp, vec!["X", "Z"]);
    }
}
