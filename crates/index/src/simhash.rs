use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::tokenizer;

/// Content shorter than this carries too little signal to fingerprint;
/// such documents get fingerprint 0 and skip dedup entirely.
const MIN_CONTENT_CHARS: usize = 100;
const MIN_TERM_LEN: usize = 3;
const MAX_TERM_LEN: usize = 20;

fn hash_term(term: &str) -> u64 {
    let mut hasher = DefaultHasher::default();
    term.hash(&mut hasher);
    hasher.finish()
}

/// 64-bit SimHash over the stemmed term-frequency map. For each term, bit
/// positions set in its hash add the term frequency to an accumulator and
/// clear positions subtract it; fingerprint bit i is 1 iff accumulator i
/// ends positive.
pub fn fingerprint(text: &str) -> u64 {
    if text.chars().count() < MIN_CONTENT_CHARS {
        return 0;
    }

    let mut frequencies: HashMap<String, i64> = HashMap::new();
    for token in tokenizer::tokenize(text, usize::MAX, usize::MAX) {
        let len = token.chars().count();
        if (MIN_TERM_LEN..=MAX_TERM_LEN).contains(&len) {
            *frequencies.entry(token).or_insert(0) += 1;
        }
    }

    let mut acc = [0i64; 64];
    for (term, freq) in &frequencies {
        let h = hash_term(term);
        for (i, cell) in acc.iter_mut().enumerate() {
            if (h >> i) & 1 == 1 {
                *cell = cell.saturating_add(*freq);
            } else {
                *cell = cell.saturating_sub(*freq);
            }
        }
    }

    let mut fp: u64 = 0;
    for (i, cell) in acc.iter().enumerate() {
        if *cell > 0 {
            fp |= 1 << i;
        }
    }
    fp
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

const K: u32 = 3;
const NUM_BLOCKS: usize = (K + 1) as usize;
const BLOCK_SIZE: usize = 64 / NUM_BLOCKS;

/// Near-duplicate lookup table. Any two hashes within Hamming distance K
/// agree exactly on at least one of K+1 bit blocks, so each block keeps a
/// prefix map and a query only compares against its own bucket.
pub struct SimHashTable {
    blocks: [Block; NUM_BLOCKS],
}

struct Block {
    mask: u64,
    buckets: HashMap<u64, Vec<(u64, usize)>>,
}

impl Block {
    fn new(idx: usize) -> Self {
        Self {
            mask: (u64::MAX << (64 - BLOCK_SIZE)) >> (BLOCK_SIZE * idx),
            buckets: HashMap::new(),
        }
    }
}

impl Default for SimHashTable {
    fn default() -> Self {
        Self {
            blocks: std::array::from_fn(Block::new),
        }
    }
}

impl SimHashTable {
    /// Insert a hash tagged with an opaque id (e.g. an index into a doc
    /// list).
    pub fn insert(&mut self, hash: u64, id: usize) {
        for block in &mut self.blocks {
            block
                .buckets
                .entry(hash & block.mask)
                .or_default()
                .push((hash, id));
        }
    }

    /// Ids of all inserted hashes within distance `max_distance`, the
    /// candidates coming only from matching block buckets.
    pub fn neighbors(&self, hash: u64, max_distance: u32) -> Vec<usize> {
        let mut out = Vec::new();
        for block in &self.blocks {
            if let Some(bucket) = block.buckets.get(&(hash & block.mask)) {
                for (candidate, id) in bucket {
                    if hamming(hash, *candidate) <= max_distance && !out.contains(id) {
                        out.push(*id);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "Paragraph {i} discusses distributed crawling politeness budgets \
                     frontier scheduling and inverted index construction in detail. "
                )
            })
            .collect()
    }

    #[test]
    fn short_content_fingerprints_to_zero() {
        assert_eq!(fingerprint("tiny"), 0);
        assert_eq!(fingerprint(""), 0);
    }

    #[test]
    fn identical_content_identical_fingerprint() {
        let text = base_paragraphs(5);
        assert_eq!(fingerprint(&text), fingerprint(&text));
        assert_ne!(fingerprint(&text), 0);
    }

    #[test]
    fn one_extra_paragraph_in_twenty_stays_close() {
        let original = base_paragraphs(20);
        let mut edited = original.clone();
        edited.push_str(
            "One extra closing paragraph that mentions entirely new matters like \
             gardening weather forecasts and violin practice schedules. ",
        );
        let d = hamming(fingerprint(&original), fingerprint(&edited));
        assert!(d <= 3, "expected near-duplicate distance, got {d}");
    }

    #[test]
    fn different_topics_are_far_apart() {
        let crawling = base_paragraphs(20);
        let cooking = (0..20)
            .map(|i| {
                format!(
                    "Recipe {i} simmers onions garlic tomatoes basil oregano and \
                     parmesan into a slow ragu served over fresh tagliatelle. "
                )
            })
            .collect::<String>();
        let d = hamming(fingerprint(&crawling), fingerprint(&cooking));
        assert!(d >= 10, "expected distant fingerprints, got {d}");
    }

    #[test]
    fn table_finds_near_neighbors_only() {
        let mut table = SimHashTable::default();
        table.insert(0b0000, 0);
        table.insert(u64::MAX, 1);
        let near = table.neighbors(0b0011, 3);
        assert_eq!(near, vec![0]);
        assert!(table.neighbors(u64::MAX ^ 0b1, 3).contains(&1));
    }
}
