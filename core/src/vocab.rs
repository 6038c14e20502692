use crate::{DocId, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Bidirectional term <-> term-id mapping for one epoch.
///
/// Ids are handed out densely from zero and never reused while the epoch
/// lives. Only `word_to_id` is persisted; the reverse map is rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "VocabularyFile", into = "VocabularyFile")]
pub struct Vocabulary {
    word_to_id: HashMap<String, TermId>,
    id_to_word: BTreeMap<TermId, String>,
    next_term_id: TermId,
}

#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    word_to_id: BTreeMap<String, TermId>,
}

impl From<VocabularyFile> for Vocabulary {
    fn from(file: VocabularyFile) -> Self {
        let mut vocab = Vocabulary::new();
        for (word, id) in file.word_to_id {
            vocab.id_to_word.insert(id, word.clone());
            vocab.word_to_id.insert(word, id);
            vocab.next_term_id = vocab.next_term_id.max(id.saturating_add(1));
        }
        vocab
    }
}

impl From<Vocabulary> for VocabularyFile {
    fn from(vocab: Vocabulary) -> Self {
        VocabularyFile { word_to_id: vocab.word_to_id.into_iter().collect() }
    }
}

impl Vocabulary {
    pub fn new() -> Self { Self::default() }

    /// Id for `term`, allocating the next one if the term is new.
    pub fn assign_term_id(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.word_to_id.get(term) {
            return id;
        }
        let id = self.next_term_id;
        self.next_term_id += 1;
        self.word_to_id.insert(term.to_string(), id);
        self.id_to_word.insert(id, term.to_string());
        id
    }

    pub fn resolve_term(&self, term: &str) -> Option<TermId> {
        self.word_to_id.get(term).copied()
    }

    pub fn term(&self, term_id: TermId) -> Option<&str> {
        self.id_to_word.get(&term_id).map(String::as_str)
    }

    pub fn len(&self) -> usize { self.word_to_id.len() }

    pub fn is_empty(&self) -> bool { self.word_to_id.is_empty() }
}

/// Bidirectional slug <-> document-id mapping, plus the title captured at
/// index time so ranking never has to go back to the page store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRegistry {
    pub slug_to_id: BTreeMap<String, DocId>,
    pub id_to_slug: BTreeMap<DocId, String>,
    #[serde(default)]
    pub titles: BTreeMap<DocId, String>,
    #[serde(default)]
    pub next_doc_id: DocId,
}

impl DocumentRegistry {
    pub fn new() -> Self { Self::default() }

    /// Id for `slug`, allocating the next one if the slug is new.
    pub fn assign_document_id(&mut self, slug: &str) -> DocId {
        if let Some(&id) = self.slug_to_id.get(slug) {
            return id;
        }
        let id = self.next_doc_id;
        self.next_doc_id += 1;
        self.slug_to_id.insert(slug.to_string(), id);
        self.id_to_slug.insert(id, slug.to_string());
        id
    }

    pub fn resolve_document(&self, doc_id: DocId) -> Option<&str> {
        self.id_to_slug.get(&doc_id).map(String::as_str)
    }

    pub fn lookup(&self, slug: &str) -> Option<DocId> {
        self.slug_to_id.get(slug).copied()
    }

    pub fn set_title(&mut self, doc_id: DocId, title: &str) {
        self.titles.insert(doc_id, title.to_string());
    }

    /// Stored title, or the slug itself when none was recorded.
    pub fn title(&self, doc_id: DocId) -> Option<&str> {
        self.titles
            .get(&doc_id)
            .map(String::as_str)
            .or_else(|| self.resolve_document(doc_id))
    }

    /// Forget `slug`. The freed id is not handed out again within the epoch.
    pub fn remove(&mut self, slug: &str) -> Option<DocId> {
        let id = self.slug_to_id.remove(slug)?;
        self.id_to_slug.remove(&id);
        self.titles.remove(&id);
        Some(id)
    }

    /// Pull `next_doc_id` past every stored id; older files may lack it.
    pub(crate) fn repair_next_id(&mut self) {
        if let Some((&max, _)) = self.id_to_slug.last_key_value() {
            self.next_doc_id = self.next_doc_id.max(max.saturating_add(1));
        }
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.id_to_slug.keys().copied()
    }

    pub fn len(&self) -> usize { self.slug_to_id.len() }

    pub fn is_empty(&self) -> bool { self.slug_to_id.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_ids_are_idempotent_and_dense() {
        let mut v = Vocabulary::new();
        assert_eq!(v.assign_term_id("cat"), 0);
        assert_eq!(v.assign_term_id("dog"), 1);
        assert_eq!(v.assign_term_id("cat"), 0);
        assert_eq!(v.resolve_term("dog"), Some(1));
        assert_eq!(v.resolve_term("bird"), None);
        assert_eq!(v.term(1), Some("dog"));
    }

    #[test]
    fn vocabulary_persists_forward_map_only() {
        let mut v = Vocabulary::new();
        v.assign_term_id("alpha");
        v.assign_term_id("beta");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"word_to_id": {"alpha": 0, "beta": 1}}));

        let mut back: Vocabulary = serde_json::from_value(json).unwrap();
        assert_eq!(back.term(1), Some("beta"));
        assert_eq!(back.assign_term_id("gamma"), 2);
    }

    #[test]
    fn registry_is_a_bijection() {
        let mut r = DocumentRegistry::new();
        for slug in ["home", "notes/rust", "about"] {
            let id = r.assign_document_id(slug);
            assert_eq!(r.resolve_document(id), Some(slug));
            assert_eq!(r.assign_document_id(slug), id);
        }
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let mut r = DocumentRegistry::new();
        let a = r.assign_document_id("a");
        r.set_title(a, "A page");
        assert_eq!(r.remove("a"), Some(a));
        assert_eq!(r.resolve_document(a), None);
        assert_eq!(r.title(a), None);
        let b = r.assign_document_id("b");
        assert_ne!(a, b);
    }

    #[test]
    fn title_falls_back_to_slug() {
        let mut r = DocumentRegistry::new();
        let id = r.assign_document_id("plain");
        assert_eq!(r.title(id), Some("plain"));
        r.set_title(id, "Plain Page");
        assert_eq!(r.title(id), Some("Plain Page"));
    }
}
