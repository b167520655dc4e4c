//! Document records and the merge rule used when two copies meet.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const UNTITLED: &str = "Untitled Document";

/// A persisted document. `id` never changes after creation; `owner_id` is
/// `None` for anonymous documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    pub owner_id: Option<String>,
}

/// Word and character counts shown next to each document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub words: usize,
    pub chars: usize,
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl Document {
    /// Empty "Untitled Document" with a fresh UUID.
    pub fn new(owner_id: Option<String>) -> Self {
        Self::new_at(owner_id, now_millis())
    }

    pub fn new_at(owner_id: Option<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: UNTITLED.to_string(),
            content: String::new(),
            created_at: now,
            updated_at: now,
            owner_id,
        }
    }

    pub fn stats(&self) -> DocumentStats {
        DocumentStats {
            words: self.content.split_whitespace().count(),
            chars: self.content.chars().count(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner_id.is_none()
    }

    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owner_id.as_deref() == Some(identity)
    }

    /// Replace the content. Returns `false` (and leaves `updated_at`) if unchanged.
    pub fn set_content(&mut self, content: &str) -> bool {
        if self.content == content {
            return false;
        }
        self.content = content.to_string();
        self.touch();
        true
    }

    /// Replace the title; a blank title becomes [`UNTITLED`].
    pub fn set_title(&mut self, title: &str) -> bool {
        let title = if title.trim().is_empty() {
            UNTITLED
        } else {
            title
        };
        if self.title == title {
            return false;
        }
        self.title = title.to_string();
        self.touch();
        true
    }

    /// Bump `updated_at`, keeping it strictly increasing even when the clock
    /// has not advanced since the last edit.
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at + 1);
    }
}

/// Newest first.
pub fn sort_recent(docs: &mut [Document]) {
    docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

/// Merge two document sets by `id`.
///
/// On collision the copy with the newer `updated_at` wins; ties keep the
/// `preferred` copy. Returns the merged set (newest first) and the ids where
/// the `incoming` copy was taken.
pub fn merge_newest(
    preferred: Vec<Document>,
    incoming: Vec<Document>,
) -> (Vec<Document>, Vec<String>) {
    let mut by_id: HashMap<String, Document> = HashMap::with_capacity(preferred.len());
    for doc in preferred {
        match by_id.get(&doc.id) {
            Some(existing) if existing.updated_at >= doc.updated_at => {}
            _ => {
                by_id.insert(doc.id.clone(), doc);
            }
        }
    }

    let mut taken = Vec::new();
    for doc in incoming {
        let wins = match by_id.get(&doc.id) {
            Some(existing) => doc.updated_at > existing.updated_at,
            None => true,
        };
        if wins {
            taken.push(doc.id.clone());
            by_id.insert(doc.id.clone(), doc);
        }
    }

    let mut merged: Vec<Document> = by_id.into_values().collect();
    sort_recent(&mut merged);
    (merged, taken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, updated_at: i64, content: &str) -> Document {
        Document {
            id: id.to_string(),
            title: UNTITLED.to_string(),
            content: content.to_string(),
            created_at: 0,
            updated_at,
            owner_id: None,
        }
    }

    #[test]
    fn test_new_document_defaults() {
        let d = Document::new(None);
        assert_eq!(d.title, UNTITLED);
        assert!(d.content.is_empty());
        assert!(d.is_anonymous());
        assert_eq!(d.created_at, d.updated_at);
        assert!(Uuid::parse_str(&d.id).is_ok());
    }

    #[test]
    fn test_set_content_bumps_updated_at() {
        let mut d = Document::new_at(None, 10);
        assert!(d.set_content("hello"));
        assert!(d.updated_at > 10);
        let stamp = d.updated_at;
        assert!(!d.set_content("hello"));
        assert_eq!(d.updated_at, stamp);
    }

    #[test]
    fn test_stats_count_words_and_chars() {
        let mut d = Document::new_at(None, 0);
        assert_eq!(d.stats(), DocumentStats::default());
        d.content = "  café au\n lait  ".into();
        assert_eq!(d.stats(), DocumentStats { words: 3, chars: 17 });
    }

    #[test]
    fn test_blank_title_is_untitled() {
        let mut d = Document::new(Some("u1".into()));
        assert!(d.set_title("Notes"));
        assert!(d.set_title("   "));
        assert_eq!(d.title, UNTITLED);
        assert!(d.is_owned_by("u1"));
    }

    #[test]
    fn test_merge_newer_incoming_wins() {
        let (merged, taken) =
            merge_newest(vec![doc("a", 5, "old")], vec![doc("a", 9, "new"), doc("b", 1, "b")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "new");
        assert_eq!(taken, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_merge_older_incoming_loses() {
        let (merged, taken) = merge_newest(vec![doc("a", 9, "remote")], vec![doc("a", 5, "local")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "remote");
        assert!(taken.is_empty());
    }

    #[test]
    fn test_merge_tie_keeps_preferred() {
        let (merged, taken) = merge_newest(vec![doc("a", 5, "remote")], vec![doc("a", 5, "local")]);
        assert_eq!(merged[0].content, "remote");
        assert!(taken.is_empty());
    }

    #[test]
    fn test_sort_recent() {
        let mut docs = vec![doc("a", 1, ""), doc("b", 3, ""), doc("c", 2, "")];
        sort_recent(&mut docs);
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
