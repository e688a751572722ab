//! Acoustic model interface consumed by the search core (spec §6).
//!
//! The acoustic model supplies per-frame senone score vectors and the
//! phone-HMM evaluation primitives. Everything here is a thin seam: the
//! search core drives these calls, it never computes a senone score or
//! a Viterbi transition itself.

/// Opaque sentinel the acoustic model uses for state scores that have
/// never been entered. Scores are log-probabilities in a fixed-point or
/// floating log domain chosen by the acoustic model; only their
/// relative ordering and additivity matter to the search core.
pub const WORST_SCORE: i32 = i32::MIN / 2;

/// A senone-sequence id: names a context-dependent phone's state
/// composition. Dense, assigned by the acoustic model / dictionary.
pub type SsId = i32;

/// A context-independent phone id.
pub type CiPhone = i32;

/// History / backpointer index threaded through HMM state; opaque to
/// the HMM itself, meaningful only to the search core (it is a
/// `BpIndex` in practice, see [`crate::bptable`]).
pub type History = i32;

pub const NO_BP: History = -1;

/// A single phone-level HMM instance. One exists per tree node, per
/// root channel, and per right-context leaf.
///
/// Implementations are fixed-topology (commonly 3-state left-to-right)
/// models; the search core treats them opaquely except for the mpx
/// left-context seam (`set_mpx_ssid`).
pub trait Hmm {
    /// Enter the HMM with an initial score/history at the given frame,
    /// if better than any pending entry for that frame.
    fn enter(&mut self, score: i32, history: History, frame: u64);

    /// Run one Viterbi step against `senone_scores` (the frame's full
    /// score vector, as installed by the acoustic model for the frame
    /// currently being evaluated), returning the HMM's best state score
    /// after the step.
    fn vit_eval(&mut self, senone_scores: &[i32]) -> i32;

    /// Best active state score (post `vit_eval`, pre-clear).
    fn best_score(&self) -> i32;

    /// Exit-state (final state) score — the score carried forward into
    /// successor phones/words.
    fn out_score(&self) -> i32;

    /// Exit-state history (backpointer) to carry forward.
    fn out_history(&self) -> History;

    /// The score an entry with `enter()` would need to beat to replace
    /// the HMM's current pending entry — i.e. its current entry-state
    /// score, before any `vit_eval` this frame.
    fn in_score(&self) -> i32;

    /// Frame this HMM was last stamped active for.
    fn frame(&self) -> u64;

    /// Promote the frame stamp to `frame` without touching state scores
    /// or the pending entry score/history. Used when an HMM survives
    /// pruning on its own best score (root phone-internal survival,
    /// single-phone word survival) rather than via a fresh `enter()`
    /// from a predecessor — the surviving states must carry forward
    /// into the next frame's `vit_eval` instead of being wiped by
    /// `deactivate`'s "clear if frame == f" rule.
    fn set_frame(&mut self, frame: u64);

    /// Clear all state scores (deactivate) without resetting topology.
    fn clear_scores(&mut self);

    /// Full reset: clear scores and frame stamp, ready for reuse. The
    /// frame stamp must be reset to a sentinel that can never equal a
    /// real frame index (frame 0 is a legitimate first frame, since
    /// `<s>` is entered at frame 0) — implementations commonly use
    /// `u64::MAX`. The search core treats `frame() == current_frame`
    /// as "active this frame" everywhere.
    fn clear(&mut self);

    /// Subtract `norm` from every active state score (renormalization).
    fn normalize(&mut self, norm: i32);

    /// Whether this HMM's left context is resolved dynamically
    /// (multiplex) rather than fixed at construction.
    fn is_mpx(&self) -> bool;

    /// Set the dynamic left-context senone-sequence id. Only valid when
    /// `is_mpx()` is true; a no-op (or implementation-defined panic in
    /// debug) otherwise.
    fn set_mpx_ssid(&mut self, ssid: SsId);

    /// Ids of the senones this HMM's states reference, for
    /// [`AcousticModel::activate_hmm`].
    fn senone_ids(&self) -> &[i32];
}

/// The acoustic model: supplier of per-frame senone scores and the
/// demand-pull frame source.
pub trait AcousticModel {
    type Hmm: Hmm;

    /// Construct a phone HMM for the given senone-sequence id / ci
    /// phone, mpx or fixed.
    fn make_hmm(&self, ssid: SsId, ciphone: CiPhone, mpx: bool) -> Self::Hmm;

    /// Number of context-independent phones in the model.
    fn n_ciphone(&self) -> usize;

    /// The CI phone id used for silence.
    fn silence_ciphone(&self) -> CiPhone;

    /// If true, senone activation tracking is skipped entirely (the
    /// acoustic model computes all senones regardless).
    fn compute_all_senones(&self) -> bool;

    /// Reset the accumulated set of senones to activate for the next
    /// frame's scoring call.
    fn clear_active(&mut self);

    /// Mark every senone referenced by `hmm` as needed for the next
    /// frame's scoring call.
    fn activate_hmm(&mut self, hmm: &Self::Hmm);

    /// Advance one frame and return its senone score vector plus frame
    /// metadata. Returns `None` if no frame is available (end of
    /// utterance). The returned scores are passed to every `Hmm::vit_eval`
    /// call made while evaluating this frame.
    fn score_next_frame(&mut self) -> Option<(FrameScores, Vec<i32>)>;

    /// Current frame index, independent of whether a frame was just
    /// scored (used by `finish()` to mark the final bp-table boundary).
    fn frame_idx(&self) -> u64;
}

/// Metadata about a just-scored frame, returned by
/// [`AcousticModel::score_next_frame`].
#[derive(Debug, Clone, Copy)]
pub struct FrameScores {
    pub frame_idx: u64,
    pub best_senone_score: i32,
    pub best_senone_id: i32,
}
