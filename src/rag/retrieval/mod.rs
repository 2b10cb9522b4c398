//! Vector and keyword retrievers
//!
//! Both produce [`RetrievalHit`]s for one collection, optionally restricted to
//! one scope id (the source document a passage belongs to).

pub mod keyword;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use keyword::{keyword_score, KeywordRetriever};
pub use vector::VectorRetriever;

/// Which retriever produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Vector,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub point_id: String,
    pub text: String,
    pub score: f32,
    pub source: HitSource,
}

/// Built-in synonym table
const SYNONYMS: &[(&str, &[&str])] = &[
    ("error", &["bug", "failure", "fault"]),
    ("fast", &["quick", "rapid"]),
    ("price", &["cost", "fee"]),
    ("car", &["vehicle", "automobile"]),
    ("buy", &["purchase"]),
    ("help", &["assist", "support"]),
    ("issue", &["problem"]),
    ("summary", &["overview", "abstract"]),
];

/// Deterministic synonym expansion applied before embedding.
///
/// The expanded query is the original text followed by every synonym of its
/// terms that is not already present, in sorted order, so the result does not
/// depend on the order terms appear in.
#[derive(Debug, Clone, Default)]
pub struct QueryExpander {
    table: BTreeMap<String, Vec<String>>,
}

impl QueryExpander {
    pub fn new() -> Self {
        let table = SYNONYMS
            .iter()
            .map(|(term, syns)| (term.to_string(), syns.iter().map(|s| s.to_string()).collect()))
            .collect();
        Self { table }
    }

    /// Built-in table extended (or overridden per term) by `extra`
    pub fn with_extra(extra: &BTreeMap<String, Vec<String>>) -> Self {
        let mut expander = Self::new();
        for (term, syns) in extra {
            expander.table.insert(
                term.to_lowercase(),
                syns.iter().map(|s| s.to_lowercase()).collect(),
            );
        }
        expander
    }

    pub fn expand(&self, query: &str) -> String {
        let present: BTreeSet<String> = crate::memory::vector_db::terms(query).into_iter().collect();

        let added: BTreeSet<&str> = present
            .iter()
            .filter_map(|t| self.table.get(t))
            .flatten()
            .map(String::as_str)
            .filter(|s| !present.contains(*s))
            .collect();

        if added.is_empty() {
            return query.to_string();
        }

        let mut expanded = query.to_string();
        for syn in added {
            expanded.push(' ');
            expanded.push_str(syn);
        }
        expanded
    }
}
