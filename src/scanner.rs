//! Source-tree corpus provider.
//!
//! Walks a project directory using the `ignore` crate (which respects
//! `.gitignore`, `.ignore`, and similar files), keeps files with a source
//! extension, then runs the symbol pass over each one. Production classes
//! become ranking documents; test files become coverage evidence.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::agents::TestFile;
use crate::collab::{Corpus, CorpusProvider, Relationships};
use crate::config::ScanConfig;
use crate::error::{FaultlineError, Result};
use crate::indexer::Document;
use crate::symbols::{FileSymbols, RegexSymbolExtractor, SymbolExtractor};
use crate::utils::{self, simple_name};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the scan root, `/`-separated.
    pub rel_path: String,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Whether the path looks like test code.
    pub is_test: bool,
    /// File size in bytes.
    pub size: u64,
}

/// Options controlling file discovery.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Root directory to scan.
    pub root: PathBuf,
    /// Glob patterns for files to ignore (from config).
    pub ignore_patterns: Vec<String>,
    /// File extensions treated as source, without the dot.
    pub source_extensions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Core scanning
// ---------------------------------------------------------------------------

/// Walk the project directory and return all source files.
///
/// Respects `.gitignore` (via the `ignore` crate), then applies config
/// ignore patterns and the extension filter.
pub fn scan(options: &ScanOptions) -> Result<Vec<ScannedFile>> {
    let root = canonical_root(&options.root)?;

    let mut builder = ignore::WalkBuilder::new(&root);
    builder.hidden(false).git_ignore(true).git_global(true);

    let mut files = Vec::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let abs_path = entry.path().to_path_buf();
        let rel_path = abs_path
            .strip_prefix(&root)
            .unwrap_or(&abs_path)
            .to_string_lossy()
            .replace('\\', "/");

        if !has_source_extension(&rel_path, &options.source_extensions) {
            continue;
        }
        if matches_any_pattern(&rel_path, &options.ignore_patterns) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(ScannedFile {
            is_test: utils::is_test_path(&rel_path),
            rel_path,
            abs_path,
            size,
        });
    }

    // Sort by relative path for deterministic output.
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    Ok(files)
}

/// Build `ScanOptions` from the scan config and a root path.
pub fn scan_options_from_config(config: &ScanConfig, root: &Path) -> ScanOptions {
    ScanOptions {
        root: root.to_path_buf(),
        ignore_patterns: config.ignore.clone(),
        source_extensions: config.source_extensions.clone(),
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(FaultlineError::invalid_path(
            root.display().to_string(),
            "not a directory",
        ));
    }
    root.canonicalize()
        .map_err(|e| FaultlineError::io(format!("canonicalizing root '{}'", root.display()), e))
}

fn has_source_extension(path: &str, extensions: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Check whether file content contains a generated-code marker.
///
/// Looks for common markers like `@generated`, `DO NOT EDIT`, etc.
/// in the first few lines of the file.
pub fn has_generated_marker(content: &str) -> bool {
    let header = content.lines().take(10).collect::<Vec<_>>().join("\n");
    let lower = header.to_lowercase();
    lower.contains("@generated")
        || lower.contains("do not edit")
        || lower.contains("auto-generated")
        || lower.contains("automatically generated")
}

// ---------------------------------------------------------------------------
// Corpus building
// ---------------------------------------------------------------------------

/// Corpus derived from a scanned source tree.
pub struct SourceTreeCorpus {
    options: ScanOptions,
    extractor: Box<dyn SymbolExtractor>,
}

impl SourceTreeCorpus {
    pub fn new(options: ScanOptions) -> Result<Self> {
        Ok(Self {
            options,
            extractor: Box::new(RegexSymbolExtractor::new()?),
        })
    }
}

impl CorpusProvider for SourceTreeCorpus {
    fn load(&self) -> Result<Corpus> {
        let root = canonical_root(&self.options.root)?;
        let files = scan(&self.options)?;

        let mut parsed = Vec::with_capacity(files.len());
        for file in files {
            let content = match std::fs::read_to_string(&file.abs_path) {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %file.rel_path, error = %e, "skipping unreadable file");
                    continue;
                }
            };
            if has_generated_marker(&content) {
                debug!(path = %file.rel_path, "skipping generated file");
                continue;
            }
            let symbols = self.extractor.extract(&content);
            parsed.push((file, symbols));
        }

        let mut corpus = build_corpus(&parsed);
        corpus.root = Some(root);
        info!(
            documents = corpus.documents.len(),
            test_files = corpus.test_files.len(),
            "scanned source tree"
        );
        Ok(corpus)
    }
}

/// Turn per-file symbols into documents, test evidence and relationships.
pub fn build_corpus(files: &[(ScannedFile, FileSymbols)]) -> Corpus {
    let mut corpus = Corpus::default();
    let mut seen = HashSet::new();
    // (qualified name, symbols of its file, index of the type)
    let mut declared: Vec<(String, &FileSymbols, usize)> = Vec::new();

    for (file, symbols) in files {
        if file.is_test {
            corpus.test_files.push(TestFile {
                path: file.rel_path.clone(),
                classes: symbols.types.iter().map(|t| t.name.clone()).collect(),
            });
            continue;
        }
        for (i, ty) in symbols.types.iter().enumerate() {
            let id = symbols.qualify(&ty.name);
            if !seen.insert(id.clone()) {
                debug!(class = %id, path = %file.rel_path, "duplicate class; keeping first");
                continue;
            }
            let text = format!("{} {} {}", ty.name, id, ty.methods.join(" "));
            corpus.documents.push(Document {
                id: id.clone(),
                text: text.trim_end().to_string(),
                origin_class_name: ty.name.clone(),
                file_path: file.rel_path.clone(),
                method_names: ty.methods.clone(),
            });
            declared.push((id, symbols, i));
        }
    }

    corpus.relationships = relationships(&declared, &seen);
    corpus
}

fn relationships(
    declared: &[(String, &FileSymbols, usize)],
    known: &HashSet<String>,
) -> HashMap<String, Relationships> {
    // Simple name -> qualified, only when unambiguous.
    let mut by_simple: HashMap<&str, Option<&str>> = HashMap::new();
    for (id, _, _) in declared {
        by_simple
            .entry(simple_name(id))
            .and_modify(|q| *q = None)
            .or_insert(Some(id.as_str()));
    }
    let resolve = |name: &str| -> String {
        by_simple
            .get(name)
            .copied()
            .flatten()
            .unwrap_or(name)
            .to_string()
    };

    let mut out: HashMap<String, Relationships> = HashMap::new();
    for (id, symbols, i) in declared {
        let ty = &symbols.types[*i];
        let rel = out.entry(id.clone()).or_default();
        rel.extends = ty.extends.iter().map(|n| resolve(n)).collect();
        rel.implements = ty.implements.iter().map(|n| resolve(n)).collect();
        rel.uses = symbols
            .imports
            .iter()
            .filter(|imp| known.contains(*imp) && *imp != id)
            .cloned()
            .collect();
    }

    let mut used_by: Vec<(String, String)> = Vec::new();
    for (id, rel) in &out {
        for target in rel.extends.iter().chain(&rel.implements).chain(&rel.uses) {
            if known.contains(target) {
                used_by.push((target.clone(), id.clone()));
            }
        }
    }
    used_by.sort();
    used_by.dedup();
    for (target, user) in used_by {
        out.entry(target).or_default().used_by.push(user);
    }

    out.retain(|_, rel| !rel.is_empty());
    out
}

// ---------------------------------------------------------------------------
// Pattern matching helpers
// ---------------------------------------------------------------------------

/// Check if a path matches any of the given patterns.
///
/// Patterns are glob-ish (`*` within a file name) or path components.
fn matches_any_pattern(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| simple_glob_match(p, path))
}

/// Minimal glob matching for ignore patterns.
///
/// Handles `*.ext` prefix wildcards, `dir/` directory patterns,
/// and patterns with `*` in the middle (e.g. `*.generated.*`).
/// Anything else must equal a whole path component sequence.
fn simple_glob_match(pattern: &str, path: &str) -> bool {
    if pattern.contains('*') {
        // Split on '*' and check that all parts appear in order.
        let parts: Vec<&str> = pattern.split('*').collect();
        let filename = path.rsplit('/').next().unwrap_or(path);
        let mut remaining = filename;

        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                if let Some(rest) = remaining.strip_prefix(part) {
                    remaining = rest;
                } else {
                    return false;
                }
            } else if i == parts.len() - 1 {
                if !remaining.ends_with(part) {
                    return false;
                }
                remaining = "";
            } else if let Some(pos) = remaining.find(part) {
                remaining = &remaining[pos + part.len()..];
            } else {
                return false;
            }
        }
        true
    } else if pattern.ends_with('/') {
        let dir = pattern.trim_end_matches('/');
        path.starts_with(&format!("{dir}/")) || path.contains(&format!("/{dir}/"))
    } else {
        path == pattern
            || path.ends_with(&format!("/{pattern}"))
            || path.starts_with(&format!("{pattern}/"))
            || path.contains(&format!("/{pattern}/"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn options(root: &Path) -> ScanOptions {
        scan_options_from_config(&ScanConfig::default(), root)
    }

    #[test]
    fn simple_glob_match_extension() {
        assert!(simple_glob_match("*.java", "src/World.java"));
        assert!(!simple_glob_match("*.java", "src/World.kt"));
    }

    #[test]
    fn simple_glob_match_directory() {
        assert!(simple_glob_match("target", "target/classes/A.java"));
        assert!(simple_glob_match("build/", "mod/build/Gen.java"));
        assert!(!simple_glob_match("target", "src/targeting/A.java"));
    }

    #[test]
    fn has_generated_marker_detects_markers() {
        assert!(has_generated_marker("// @generated\nclass A {}"));
        assert!(has_generated_marker("/* DO NOT EDIT */\nclass A {}"));
        assert!(!has_generated_marker("class A {\n}"));
    }

    #[test]
    fn scan_filters_by_extension_and_ignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a/World.java", "class World {}");
        write(dir.path(), "src/a/notes.txt", "not source");
        write(dir.path(), "target/gen/Gen.java", "class Gen {}");
        write(dir.path(), "test/a/WorldTest.java", "class WorldTest {}");

        let files = scan(&options(dir.path())).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/a/World.java", "test/a/WorldTest.java"]);
        assert!(!files[0].is_test);
        assert!(files[1].is_test);
    }

    #[test]
    fn scan_rejects_missing_root() {
        let err = scan(&options(Path::new("/definitely/not/here"))).unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn source_tree_corpus_builds_documents_tests_and_relationships() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/a/World.java",
            "package a;\nimport a.Shadow;\npublic class World extends Base {\n  public Type resolve(String n) {\n    return null;\n  }\n}\n",
        );
        write(
            dir.path(),
            "src/a/Shadow.java",
            "package a;\npublic class Shadow {\n  void munge() {\n  }\n}\n",
        );
        write(dir.path(), "src/a/Base.java", "package a;\npublic abstract class Base {}\n");
        write(
            dir.path(),
            "src/a/Gen.java",
            "// @generated\npackage a;\nclass Gen {}\n",
        );
        write(
            dir.path(),
            "test/a/WorldTest.java",
            "package a;\npublic class WorldTest {\n  void testResolve() {\n  }\n}\n",
        );

        let corpus = SourceTreeCorpus::new(options(dir.path()))
            .unwrap()
            .load()
            .unwrap();

        let ids: Vec<&str> = corpus.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a.Base", "a.Shadow", "a.World"]);

        let world = &corpus.documents[2];
        assert_eq!(world.origin_class_name, "World");
        assert_eq!(world.file_path, "src/a/World.java");
        assert_eq!(world.method_names, vec!["resolve"]);
        assert_eq!(world.text, "World a.World resolve");

        assert_eq!(corpus.test_files.len(), 1);
        assert_eq!(corpus.test_files[0].classes, vec!["WorldTest"]);

        let rel = &corpus.relationships["a.World"];
        assert_eq!(rel.extends, vec!["a.Base"]);
        assert_eq!(rel.uses, vec!["a.Shadow"]);
        assert_eq!(corpus.relationships["a.Base"].used_by, vec!["a.World"]);
        assert_eq!(corpus.relationships["a.Shadow"].used_by, vec!["a.World"]);
        assert!(corpus.root.is_some());
    }
}
