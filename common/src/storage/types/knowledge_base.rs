use chrono::Utc;

use crate::stored_object;

stored_object!(KnowledgeBase, "knowledge_base", {
    name: String,
    chunk_count: usize
});

impl KnowledgeBase {
    /// The record id doubles as the collection key, so two display names that
    /// sanitize to the same key address the same collection.
    pub fn new(name: &str, chunk_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: sanitize_collection_key(name),
            created_at: now,
            updated_at: now,
            name: name.trim().to_string(),
            chunk_count,
        }
    }

    pub fn collection_key(&self) -> &str {
        &self.id
    }
}

/// Derives the collection key used to address a knowledge base on disk.
///
/// Keeps alphanumerics, `-` and `_`, replaces everything else with `_`,
/// prefixes keys that do not start with an alphanumeric, falls back to a
/// fixed key for empty input and lower-cases the result. Total and
/// idempotent, so keys survive round trips through the function.
pub fn sanitize_collection_key(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let prefixed = match sanitized.chars().next() {
        Some(first) if !first.is_alphanumeric() => format!("kb_{sanitized}"),
        Some(_) => sanitized,
        None => "default_kb".to_string(),
    };

    prefixed.to_lowercase()
}

/// Reconstructs a readable display name from a collection key, used for
/// records that predate a stored display name.
pub fn display_name_from_key(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
