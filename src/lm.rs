//! N-gram language model interface consumed by the search core (spec §6).
//!
//! The search core only ever asks the LM two things: whether a word is
//! in its vocabulary, and the trigram log-probability of a transition.
//! Everything about LM internals — backoff, quantization, class
//! expansion — is the LM's business, not the decoder's.

use crate::dict::WordId;

/// The n-gram language model.
pub trait NgramModel {
    /// True iff `wid` has its own entry in the LM (as opposed to being
    /// folded into a backoff/unknown class). Words the LM doesn't know
    /// are skipped during trigram-scored cross-word transition (spec
    /// §4.5) and instead carried at a flat within-LM-vocabulary
    /// penalty.
    fn known_wid(&self, wid: WordId) -> bool;

    /// Trigram log-probability of `w` following `(prev_w, prev_prev_w)`,
    /// already including any backoff weight. `prev_prev_w` may be
    /// [`crate::dict::WordId`] `-1` at utterance start, in which case
    /// this degrades to a bigram/unigram score per the LM's own backoff
    /// rules.
    fn tg_score(&self, w: WordId, prev_w: WordId, prev_prev_w: WordId) -> i32;
}
