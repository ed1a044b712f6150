//! Normalisation of user supplied tag queries.
//!
//! Two queries that differ only in tag order, case or repetition name the same
//! watch, so everything is reduced to a sorted, lowercased, deduplicated tag
//! string before it reaches the store.

use std::collections::BTreeSet;

/// Upstream refuses searches with more tags than this.
pub const MAX_QUERY_TAGS: usize = 40;

/// Tag prefixes the scheduler manages itself (ordering and the day window).
const MANAGED_PREFIXES: [&str; 2] = ["order:", "date:"];

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
    #[error("tag {0:?} contains characters the upstream does not allow")]
    DisallowedCharacters(String),
    #[error("query has {0} tags, at most {MAX_QUERY_TAGS} are allowed")]
    TooManyTags(usize),
}

/// Normalises a raw query string into the canonical form used as watch identity.
pub fn normalize_query(raw: &str) -> Result<String, QueryError> {
    let tags = normalize_tags(raw.split_whitespace())?;
    let tags: Vec<String> = tags
        .into_iter()
        .filter(|t| !MANAGED_PREFIXES.iter().any(|p| t.starts_with(p)))
        .collect();

    if tags.is_empty() {
        return Err(QueryError::Empty);
    }
    if tags.len() > MAX_QUERY_TAGS {
        return Err(QueryError::TooManyTags(tags.len()));
    }
    Ok(tags.join(" "))
}

/// Lowercases, validates and deduplicates a list of tags, in sorted order.
pub fn normalize_tags<'a>(
    tags: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeSet<String>, QueryError> {
    let mut out = BTreeSet::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if !tag.chars().all(|c| c.is_ascii_graphic()) {
            return Err(QueryError::DisallowedCharacters(tag.to_string()));
        }
        out.insert(tag.to_ascii_lowercase());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_lowercases_and_dedupes() {
        assert_eq!(normalize_query("Wolf  fox wolf").unwrap(), "fox wolf");
    }

    #[test]
    fn strips_managed_tags() {
        assert_eq!(
            normalize_query("order:score fox date:week").unwrap(),
            "fox"
        );
        assert_eq!(normalize_query("order:score"), Err(QueryError::Empty));
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(matches!(
            normalize_query("fox 狐"),
            Err(QueryError::DisallowedCharacters(_))
        ));
    }

    #[test]
    fn rejects_too_many_tags() {
        let raw: Vec<String> = (0..=MAX_QUERY_TAGS).map(|i| format!("t{i}")).collect();
        assert_eq!(
            normalize_query(&raw.join(" ")),
            Err(QueryError::TooManyTags(MAX_QUERY_TAGS + 1))
        );
    }
}
