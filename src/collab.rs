//! External collaborators consumed by the localization pipeline.
//!
//! The pipeline only sees these traits. Failures from any implementation
//! are degraded at the call site, so implementations are free to return
//! errors for unreachable backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::coverage::TestFile;
use crate::error::{FaultlineError, Result};
use crate::indexer::Document;
use crate::utils::simple_name;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub qualified_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecord {
    /// `pkg.Class.method`
    pub signature: String,
    pub file_path: String,
}

/// Structural neighbours of a class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relationships {
    pub extends: Vec<String>,
    pub implements: Vec<String>,
    pub used_by: Vec<String>,
    pub uses: Vec<String>,
}

impl Relationships {
    pub fn is_empty(&self) -> bool {
        self.extends.is_empty()
            && self.implements.is_empty()
            && self.used_by.is_empty()
            && self.uses.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Name and relationship lookups over the code base.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn find_classes_by_name_substring(&self, text: &str) -> Result<Vec<ClassRecord>>;

    async fn find_methods_by_name_substring(&self, text: &str) -> Result<Vec<MethodRecord>>;

    async fn find_relationships(&self, qualified_name: &str) -> Result<Relationships>;
}

/// Source text for the pattern agent.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// `Ok(None)` when no source is known for `qualified_name`.
    async fn get_source_text(&self, qualified_name: &str) -> Result<Option<String>>;
}

/// Everything needed to build the relevance and coverage indexes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub test_files: Vec<TestFile>,
    /// Structural relationships keyed by qualified class name.
    pub relationships: HashMap<String, Relationships>,
    /// Project root that document file paths are relative to.
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

/// Supplies a [`Corpus`].
pub trait CorpusProvider {
    fn load(&self) -> Result<Corpus>;
}

// ---------------------------------------------------------------------------
// In-memory knowledge store
// ---------------------------------------------------------------------------

/// Knowledge store answering lookups from corpus documents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeStore {
    classes: Vec<ClassRecord>,
    methods: Vec<MethodRecord>,
    relationships: HashMap<String, Relationships>,
}

impl InMemoryKnowledgeStore {
    pub fn from_documents(documents: &[Document]) -> Self {
        let mut store = Self::default();
        for doc in documents {
            store.classes.push(ClassRecord {
                qualified_name: doc.id.clone(),
                file_path: doc.file_path.clone(),
            });
            for method in &doc.method_names {
                store.methods.push(MethodRecord {
                    signature: format!("{}.{}", doc.id, method),
                    file_path: doc.file_path.clone(),
                });
            }
        }
        store
    }

    /// Store over corpus documents plus the corpus relationship table.
    pub fn from_corpus(corpus: &Corpus) -> Self {
        let mut store = Self::from_documents(&corpus.documents);
        store.relationships = corpus.relationships.clone();
        store
    }

    pub fn with_relationships(mut self, qualified_name: impl Into<String>, rel: Relationships) -> Self {
        self.relationships.insert(qualified_name.into(), rel);
        self
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn find_classes_by_name_substring(&self, text: &str) -> Result<Vec<ClassRecord>> {
        Ok(self
            .classes
            .iter()
            .filter(|c| simple_name(&c.qualified_name).contains(text))
            .cloned()
            .collect())
    }

    async fn find_methods_by_name_substring(&self, text: &str) -> Result<Vec<MethodRecord>> {
        Ok(self
            .methods
            .iter()
            .filter(|m| simple_name(&m.signature).contains(text))
            .cloned()
            .collect())
    }

    async fn find_relationships(&self, qualified_name: &str) -> Result<Relationships> {
        Ok(self
            .relationships
            .get(qualified_name)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Source providers
// ---------------------------------------------------------------------------

/// Source text held in memory, keyed by qualified name.
#[derive(Debug, Clone, Default)]
pub struct MapSourceProvider {
    sources: HashMap<String, String>,
}

impl MapSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, qualified_name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(qualified_name.into(), source.into());
    }
}

impl FromIterator<(String, String)> for MapSourceProvider {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            sources: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SourceProvider for MapSourceProvider {
    async fn get_source_text(&self, qualified_name: &str) -> Result<Option<String>> {
        Ok(self.sources.get(qualified_name).cloned())
    }
}

/// Reads source files lazily, resolving names through corpus file paths.
#[derive(Debug, Clone)]
pub struct FsSourceProvider {
    root: PathBuf,
    paths: HashMap<String, String>,
}

impl FsSourceProvider {
    pub fn new(root: impl Into<PathBuf>, documents: &[Document]) -> Self {
        let paths = documents
            .iter()
            .filter(|d| !d.file_path.is_empty())
            .map(|d| (d.id.clone(), d.file_path.clone()))
            .collect();
        Self {
            root: root.into(),
            paths,
        }
    }
}

#[async_trait]
impl SourceProvider for FsSourceProvider {
    async fn get_source_text(&self, qualified_name: &str) -> Result<Option<String>> {
        let Some(rel) = self.paths.get(qualified_name) else {
            return Ok(None);
        };
        let path = self.root.join(rel);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "source file missing");
                Ok(None)
            }
            Err(e) => Err(FaultlineError::io(
                format!("reading source '{}'", path.display()),
                e,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON corpus
// ---------------------------------------------------------------------------

/// Corpus read from a JSON file.
///
/// Accepts either a bare array of documents or an object with
/// `documents` and `test_files`.
#[derive(Debug, Clone)]
pub struct JsonCorpus {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Documents(Vec<Document>),
    Full(Corpus),
}

impl JsonCorpus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CorpusProvider for JsonCorpus {
    fn load(&self) -> Result<Corpus> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            FaultlineError::io(format!("reading corpus '{}'", self.path.display()), e)
        })?;
        let parsed: CorpusFile = serde_json::from_str(&content).map_err(|e| {
            FaultlineError::corpus(format!("'{}': {e}", self.path.display()))
        })?;
        let mut corpus = match parsed {
            CorpusFile::Documents(documents) => Corpus {
                documents,
                ..Corpus::default()
            },
            CorpusFile::Full(corpus) => corpus,
        };
        corpus.root = self.path.parent().map(Path::to_path_buf);
        debug!(
            documents = corpus.documents.len(),
            test_files = corpus.test_files.len(),
            "loaded JSON corpus"
        );
        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, path: &str, methods: &[&str]) -> Document {
        Document {
            id: id.into(),
            text: id.into(),
            origin_class_name: simple_name(id).into(),
            file_path: path.into(),
            method_names: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn store_finds_by_simple_name_substring() {
        let store = InMemoryKnowledgeStore::from_documents(&[
            doc("a.World", "a/World.java", &["resolve"]),
            doc("a.BcelWorld", "a/BcelWorld.java", &[]),
            doc("world.Shadow", "world/Shadow.java", &[]),
        ]);
        let found = store.find_classes_by_name_substring("World").await.unwrap();
        let names: Vec<_> = found.iter().map(|c| c.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["a.World", "a.BcelWorld"]);

        let methods = store.find_methods_by_name_substring("resol").await.unwrap();
        assert_eq!(methods[0].signature, "a.World.resolve");
        assert!(store.find_relationships("a.World").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fs_provider_reads_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/World.java"), "class World {}").unwrap();
        let provider = FsSourceProvider::new(
            dir.path(),
            &[
                doc("a.World", "a/World.java", &[]),
                doc("a.Gone", "a/Gone.java", &[]),
            ],
        );
        assert_eq!(
            provider.get_source_text("a.World").await.unwrap().as_deref(),
            Some("class World {}")
        );
        assert_eq!(provider.get_source_text("a.Gone").await.unwrap(), None);
        assert_eq!(provider.get_source_text("a.Unknown").await.unwrap(), None);
    }

    #[test]
    fn json_corpus_accepts_both_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, r#"[{"id": "a.Foo", "text": "Foo bar"}]"#).unwrap();
        let corpus = JsonCorpus::new(&bare).load().unwrap();
        assert_eq!(corpus.documents.len(), 1);
        assert!(corpus.test_files.is_empty());

        let full = dir.path().join("full.json");
        std::fs::write(
            &full,
            r#"{"documents": [{"id": "a.Foo", "text": "Foo"}],
                "test_files": [{"path": "t/FooTest.java", "classes": ["FooTest"]}]}"#,
        )
        .unwrap();
        let corpus = JsonCorpus::new(&full).load().unwrap();
        assert_eq!(corpus.test_files[0].classes, vec!["FooTest"]);
        assert_eq!(corpus.root.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn corpus_relationships_reach_the_store() {
        let mut corpus = Corpus {
            documents: vec![doc("a.World", "a/World.java", &[])],
            ..Corpus::default()
        };
        corpus.relationships.insert(
            "a.World".into(),
            Relationships {
                used_by: vec!["a.Shadow".into()],
                ..Relationships::default()
            },
        );
        let store = InMemoryKnowledgeStore::from_corpus(&corpus);
        let rel = store.find_relationships("a.World").await.unwrap();
        assert_eq!(rel.used_by, vec!["a.Shadow"]);
    }

    #[test]
    fn malformed_corpus_is_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonCorpus::new(&path).load().unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn misspelled_corpus_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [
            ("top.json", r#"{"documnets": [{"id": "a.Foo", "text": "Foo"}]}"#),
            ("doc.json", r#"[{"id": "a.Foo", "text": "Foo", "file": "a/Foo.java"}]"#),
            (
                "test.json",
                r#"{"documents": [], "test_files": [{"path": "t/FooTest.java", "clases": []}]}"#,
            ),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            let err = JsonCorpus::new(&path).load().unwrap_err();
            assert!(matches!(err, FaultlineError::Corpus { .. }), "{name}: {err}");
        }
    }
}
