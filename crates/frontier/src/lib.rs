//! The URL frontier: what to fetch next. A sorted set in the shared store
//! holds (url, score) with pop-max semantics; admission runs the two-layer
//! seen filter and the configured scoring strategy.

mod frontier;
mod seen;
mod strategy;

pub use frontier::{Frontier, FrontierCandidate, FRONTIER_KEY};
pub use seen::UrlSeenFilter;
pub use strategy::{ScoreInputs, ScoringStrategy};
