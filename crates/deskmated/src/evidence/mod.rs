//! Ticket-evidence engine: keywords, similarity search, resolution mining
//! and the grounding document built from them.

pub mod keywords;
pub mod resolution;
pub mod similarity;
pub mod synthesizer;

pub use keywords::extract_keywords;
pub use resolution::{EvidenceNote, NoteRole, RankedEvidence, ResolutionMiner};
pub use similarity::{find_similar, rank_candidates, SearchScope, SearchTier, SimilarOutcome, SimilarityQuery};
pub use synthesizer::{ContextSynthesizer, MinedCandidate, SimilarBlock, NOT_STATED};
