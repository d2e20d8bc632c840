//! Per-query vocabulary for strings synthesized during execution.
//!
//! `BIND`, aggregates and text operations can produce string values that do
//! not exist in the on-disk vocabulary. They go into a [`LocalVocab`]:
//! append-only segments shared by reference count between intermediate
//! results, so an id minted anywhere stays resolvable as long as any result
//! holding the vocab is alive. Cloning a vocab shares the existing segments
//! and opens a fresh one for new words (copy-on-grow across plan forks).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::id::{Datatype, Id};

const OFFSET_BITS: u32 = 30;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Segment {
    id: u64,
    words: RwLock<SegmentWords>,
}

#[derive(Debug, Default)]
struct SegmentWords {
    by_offset: Vec<Arc<str>>,
    by_word: HashMap<Arc<str>, u64>,
}

impl Segment {
    fn fresh() -> Arc<Self> {
        Arc::new(Segment {
            id: NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed),
            words: RwLock::new(SegmentWords::default()),
        })
    }
}

/// Append-only set of query-local words, resolvable through [`Id`]s with the
/// `LocalVocabIndex` datatype.
#[derive(Debug)]
pub struct LocalVocab {
    /// New words go into the first segment; the rest are shared read-only.
    segments: Vec<Arc<Segment>>,
}

impl LocalVocab {
    fn encode(segment_id: u64, offset: u64) -> Id {
        Id::from_local_vocab_index((segment_id << OFFSET_BITS) | offset)
    }

    pub fn new() -> Self {
        Self {
            segments: vec![Segment::fresh()],
        }
    }

    /// Intern `word` and return its id. Words already present in the
    /// writable segment are not duplicated.
    pub fn add_word(&self, word: &str) -> Id {
        let primary = &self.segments[0];
        let mut words = primary.words.write().expect("local vocab lock poisoned");
        if let Some(&offset) = words.by_word.get(word) {
            return Self::encode(primary.id, offset);
        }
        let offset = words.by_offset.len() as u64;
        assert!(offset <= OFFSET_MASK, "local vocab segment overflow");
        let interned: Arc<str> = Arc::from(word);
        words.by_offset.push(interned.clone());
        words.by_word.insert(interned, offset);
        Self::encode(primary.id, offset)
    }

    /// Resolve an id minted by any segment this vocab holds.
    pub fn get(&self, id: Id) -> Option<Arc<str>> {
        if id.datatype() != Datatype::LocalVocabIndex {
            return None;
        }
        let payload = id.index()?;
        let segment_id = payload >> OFFSET_BITS;
        let offset = (payload & OFFSET_MASK) as usize;
        let segment = self.segments.iter().find(|s| s.id == segment_id)?;
        let words = segment.words.read().expect("local vocab lock poisoned");
        words.by_offset.get(offset).cloned()
    }

    /// Combine the vocabularies of two child results. Shares segments from
    /// both sides, clones no strings.
    pub fn merged(left: &LocalVocab, right: &LocalVocab) -> LocalVocab {
        let mut segments = vec![Segment::fresh()];
        for segment in left.segments.iter().chain(&right.segments) {
            if !segments.iter().any(|s| s.id == segment.id) {
                segments.push(segment.clone());
            }
        }
        LocalVocab { segments }
    }

    /// Total number of words across all held segments.
    pub fn len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.words.read().expect("local vocab lock poisoned").by_offset.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalVocab {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for LocalVocab {
    /// Copy-on-grow: the clone sees every existing word but appends into a
    /// segment of its own.
    fn clone(&self) -> Self {
        let mut segments = vec![Segment::fresh()];
        segments.extend(self.segments.iter().cloned());
        LocalVocab { segments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_resolve() {
        let vocab = LocalVocab::new();
        let id = vocab.add_word("synthesized");
        assert_eq!(id.datatype(), Datatype::LocalVocabIndex);
        assert_eq!(vocab.get(id).as_deref(), Some("synthesized"));
    }

    #[test]
    fn duplicate_words_share_an_id() {
        let vocab = LocalVocab::new();
        assert_eq!(vocab.add_word("a"), vocab.add_word("a"));
        assert_ne!(vocab.add_word("a"), vocab.add_word("b"));
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn merged_vocab_resolves_both_sides() {
        let left = LocalVocab::new();
        let right = LocalVocab::new();
        let id_left = left.add_word("left");
        let id_right = right.add_word("right");
        let merged = LocalVocab::merged(&left, &right);
        assert_eq!(merged.get(id_left).as_deref(), Some("left"));
        assert_eq!(merged.get(id_right).as_deref(), Some("right"));
    }

    #[test]
    fn clone_sees_old_words_but_writes_privately() {
        let vocab = LocalVocab::new();
        let shared = vocab.add_word("shared");
        let clone = vocab.clone();
        assert_eq!(clone.get(shared).as_deref(), Some("shared"));
        let private = clone.add_word("private");
        assert_eq!(vocab.get(private), None);
    }
}
