//! The query service: normalize, spell-correct, expand, score against the
//! inverted index, diversify and paginate, with a short-lived result cache.

mod correct;
mod expand;
mod service;

pub use correct::{correct_query, levenshtein};
pub use expand::{classify_intent, expand_tokens, extract_entities, Entity, QueryIntent};
pub use service::{
    QueryService, SearchHit, SearchParams, SearchResponse, SortOrder, Suggestion,
};
