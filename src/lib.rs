//! Forward lexicon-tree Viterbi search for large-vocabulary continuous
//! speech recognition.
//!
//! This crate implements the per-utterance search core only: a
//! prefix-shared lexicon tree of phone HMMs, double-buffered active
//! lists, beam-pruned time-synchronous Viterbi decoding, cross-word
//! transition with right-context fan-out, and a backpointer lattice
//! with incremental trigram path caching. The acoustic model,
//! dictionary, and n-gram language model are external collaborators,
//! consumed through the traits in [`am`], [`dict`], and [`lm`].

pub mod am;
pub mod bptable;
pub mod config;
pub mod dict;
pub mod error;
pub mod histogram;
pub mod lm;
pub mod search;
pub mod trace_init;
pub mod tree;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Tunables;
pub use error::DecoderError;
pub use search::{Decoder, StepResult};
