//! Dictionary interface consumed by the search core (spec §6, §3).
//!
//! The dictionary supplies word entries, phone-id sequences, and the
//! left/right-context cross-word tables the tree build and the
//! inter-word transition need. It is an external collaborator: this
//! crate defines only the seam it reads through.

use crate::am::{CiPhone, SsId};

/// Dense word id, indexing into the dictionary's word list.
pub type WordId = i32;

/// A single dictionary entry: a word's phone-id sequence and mpx flag.
#[derive(Debug, Clone)]
pub struct DictEntry {
    pub wid: WordId,
    /// Context-dependent phone ids, length == `phone_ids.len()`.
    pub phone_ids: Vec<SsId>,
    /// Context-independent phone ids, same length as `phone_ids`.
    pub ci_phone_ids: Vec<CiPhone>,
    /// Whether this word's HMMs resolve left context dynamically.
    pub mpx: bool,
}

impl DictEntry {
    pub fn len(&self) -> usize {
        self.phone_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phone_ids.is_empty()
    }

    pub fn first_ssid(&self) -> SsId {
        self.phone_ids[0]
    }

    pub fn first_ciphone(&self) -> CiPhone {
        self.ci_phone_ids[0]
    }

    pub fn last_ssid(&self) -> SsId {
        self.phone_ids[self.len() - 1]
    }

    pub fn last_ciphone(&self) -> CiPhone {
        self.ci_phone_ids[self.len() - 1]
    }
}

/// The dictionary: word entries, vocabulary boundaries, and the
/// cross-word diphone tables used by tree construction and inter-word
/// transition.
pub trait Dictionary {
    /// Total number of dictionary entries, including `<s>`, `</s>`,
    /// `<sil>`, and filler/noise words.
    fn dict_entry_count(&self) -> usize;

    /// Number of "main" vocabulary words (everything before `</s>`).
    fn main_words_count(&self) -> usize;

    fn entry(&self, w: WordId) -> &DictEntry;

    fn start_wid(&self) -> WordId;
    fn finish_wid(&self) -> WordId;
    fn silence_wid(&self) -> WordId;

    /// True iff `w` is a filler (silence or noise word). The
    /// dictionary contract (spec §4.5, §9) is that every filler word id
    /// is strictly greater than or equal to `silence_wid()`, and that
    /// fillers are contiguous immediately following silence.
    fn is_filler(&self, w: WordId) -> bool {
        w >= self.silence_wid()
    }

    /// Left-context forward table: `lc_fwd_table[diphone][lc_ciphone]`
    /// → the ssid to use for a word HMM's dynamic left context.
    fn lc_fwd(&self, diphone: SsId, lc_ciphone: CiPhone) -> SsId;

    /// Right-context forward table: the list of ssids, one per possible
    /// right context, for a word whose last phone is `last_phone`. The
    /// order defines the canonical rc index used by `rc_fwd_perm` and
    /// leaf allocation (spec §4.8).
    fn rc_fwd(&self, last_phone: SsId) -> &[SsId];

    /// Right-context permutation table: maps a following CI phone to
    /// its index into the per-word right-context score stack slice
    /// produced for diphone `r_diph` (spec §4.5, §4.6, §4.7).
    fn rc_fwd_perm(&self, r_diph: SsId, ci_phone: CiPhone) -> usize;

    /// Number of right contexts tracked for diphone `r_diph` (the width
    /// of a backpointer's score-stack slice, spec §3 `rcsize`).
    fn rc_fwd_size(&self, r_diph: SsId) -> usize;

    /// All-zero permutation table, used when a backpointer carries no
    /// right-context key (`r_diph == -1`).
    fn zero_perm_tab(&self, ci_phone: CiPhone) -> usize {
        let _ = ci_phone;
        0
    }
}
