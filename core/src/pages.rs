//! Page store collaborators: where indexable documents come from.

use crate::builder::SourceDocument;
use anyhow::Result;
use parking_lot::RwLock;
use pulldown_cmark::{Event, Parser, TagEnd};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub trait PageStore: Send + Sync {
    /// Every page, for a full rebuild.
    fn list_documents(&self) -> Result<Vec<SourceDocument>>;

    /// One page, for incremental updates. `Ok(None)` when it does not exist.
    fn get_document(&self, slug: &str) -> Result<Option<SourceDocument>>;
}

/// "notes/my-first-page" -> "Notes / My First Page"
pub fn title_from_slug(slug: &str) -> String {
    slug.replace('-', " ")
        .replace('/', " / ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a leading `---` block of `key: value` lines off `content`.
pub fn split_frontmatter(content: &str) -> (BTreeMap<String, String>, &str) {
    let mut meta = BTreeMap::new();
    let Some(rest) = content.strip_prefix("---") else {
        return (meta, content);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (meta, content);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return (meta, &rest[offset..]);
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            meta.insert(key.trim().to_string(), value.to_string());
        }
    }
    // no closing fence: not front matter after all
    (BTreeMap::new(), content)
}

/// Plain text of a Markdown document: link targets, image paths, code fence
/// info strings and raw HTML are dropped, text and inline code are kept.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link | TagEnd::Image) => {}
            Event::End(_) => out.push('\n'),
            _ => {}
        }
    }
    out.trim().to_string()
}

pub fn parse_page(slug: &str, content: &str) -> SourceDocument {
    let (frontmatter, body) = split_frontmatter(content);
    let title = frontmatter
        .get("title")
        .filter(|t| !t.is_empty())
        .cloned()
        .unwrap_or_else(|| title_from_slug(slug));
    SourceDocument { slug: slug.to_string(), raw_text: markdown_to_text(body), title, frontmatter }
}

/// Markdown pages in a directory tree; slug = relative path minus `.md`.
pub struct FsPageStore {
    root: PathBuf,
}

impl FsPageStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn slug_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    fn path_for(&self, slug: &str) -> Option<PathBuf> {
        let rel = Path::new(slug);
        if slug.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(format!("{slug}.md")))
    }

    /// Unreadable pages come back with empty text so one bad file cannot
    /// sink a rebuild.
    fn read_page(&self, slug: &str, path: &Path) -> std::io::Result<SourceDocument> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(parse_page(slug, &content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
            Err(e) => {
                tracing::warn!(%slug, path = %path.display(), error = %e, "unreadable page, indexing as empty");
                Ok(SourceDocument::new(slug, "", &title_from_slug(slug)))
            }
        }
    }
}

impl PageStore for FsPageStore {
    fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        let mut docs = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name().into_iter() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let p = entry.path();
            if !p.is_file() || p.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let Some(slug) = self.slug_for(p) else {
                tracing::warn!(path = %p.display(), "page path is not valid UTF-8");
                continue;
            };
            match self.read_page(&slug, p) {
                Ok(doc) => docs.push(doc),
                Err(e) => tracing::warn!(%slug, error = %e, "page vanished while listing"),
            }
        }
        tracing::debug!(root = %self.root.display(), count = docs.len(), "listed pages");
        Ok(docs)
    }

    fn get_document(&self, slug: &str) -> Result<Option<SourceDocument>> {
        let Some(path) = self.path_for(slug) else {
            tracing::warn!(%slug, "rejecting malformed slug");
            return Ok(None);
        };
        match self.read_page(slug, &path) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory page store, mostly for tests and embedding.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: RwLock<BTreeMap<String, SourceDocument>>,
}

impl MemoryPageStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_pages<I: IntoIterator<Item = SourceDocument>>(pages: I) -> Self {
        let store = Self::new();
        for page in pages {
            store.insert(page);
        }
        store
    }

    pub fn insert(&self, doc: SourceDocument) {
        self.pages.write().insert(doc.slug.clone(), doc);
    }

    pub fn remove(&self, slug: &str) -> Option<SourceDocument> {
        self.pages.write().remove(slug)
    }
}

impl PageStore for MemoryPageStore {
    fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        Ok(self.pages.read().values().cloned().collect())
    }

    fn get_document(&self, slug: &str) -> Result<Option<SourceDocument>> {
        Ok(self.pages.read().get(slug).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn slug_titles() {
        assert_eq!(title_from_slug("my-first-page"), "My First Page");
        assert_eq!(title_from_slug("notes/rust-tips"), "Notes / Rust Tips");
    }

    #[test]
    fn frontmatter_is_split_off() {
        let (meta, body) = split_frontmatter("---\ntitle: \"Hello World\"\ntags: a, b\n---\nBody text\n");
        assert_eq!(meta.get("title").map(String::as_str), Some("Hello World"));
        assert_eq!(meta.get("tags").map(String::as_str), Some("a, b"));
        assert_eq!(body, "Body text\n");
    }

    #[test]
    fn unterminated_frontmatter_is_body() {
        let text = "---\ntitle: x\nno fence";
        let (meta, body) = split_frontmatter(text);
        assert!(meta.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn markdown_syntax_is_not_page_text() {
        let text = markdown_to_text(
            "# Intro\n\nSee [the docs](https://example.com/zebra.png) here.\n\n\
             ![a diagram](img/flow.svg)\n\n```rust\nlet x = 1;\n```\n\n*em*phasis and `code`",
        );
        assert_eq!(text, "Intro\nSee the docs here.\na diagram\nlet x = 1;\n\nemphasis and code");
        assert!(!text.contains("https"));
        assert!(!text.contains("rust"));
    }

    #[test]
    fn parsed_pages_index_plain_text() {
        let doc = parse_page("x", "---\ntitle: X\n---\nSee [the docs](https://example.com/zebra.png) here");
        assert_eq!(doc.raw_text, "See the docs here");
        assert_eq!(doc.title, "X");
    }

    #[test]
    fn fs_store_lists_and_fetches() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("home.md"), "---\ntitle: Welcome\n---\nhello there").unwrap();
        fs::write(dir.path().join("notes/rust-tips.md"), "borrow checker").unwrap();
        fs::write(dir.path().join("ignored.txt"), "not a page").unwrap();

        let store = FsPageStore::new(dir.path());
        let docs = store.list_documents().unwrap();
        let slugs: Vec<&str> = docs.iter().map(|d| d.slug.as_str()).collect();
        assert_eq!(slugs, vec!["home", "notes/rust-tips"]);
        assert_eq!(docs[0].title, "Welcome");
        assert_eq!(docs[0].raw_text, "hello there");
        assert_eq!(docs[1].title, "Notes / Rust Tips");

        let page = store.get_document("notes/rust-tips").unwrap().unwrap();
        assert_eq!(page.raw_text, "borrow checker");
        assert!(store.get_document("missing").unwrap().is_none());
        assert!(store.get_document("../etc/passwd").unwrap().is_none());
    }

    #[test]
    fn memory_store() {
        let store = MemoryPageStore::with_pages([SourceDocument::new("a", "text", "A")]);
        assert_eq!(store.list_documents().unwrap().len(), 1);
        store.remove("a");
        assert!(store.get_document("a").unwrap().is_none());
    }
}
