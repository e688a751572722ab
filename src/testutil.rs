//! Shared fixtures for inline unit tests: a minimal in-memory
//! dictionary, acoustic model, and language model, just enough to
//! drive the search core without a real corpus.

use crate::am::{AcousticModel, CiPhone, FrameScores, History, Hmm, SsId, WORST_SCORE};
use crate::dict::{DictEntry, Dictionary, WordId};
use crate::lm::NgramModel;

/// A trivial 3-state left-to-right HMM good enough to exercise the
/// search core's bookkeeping; it does not model real acoustics.
#[derive(Debug, Clone)]
pub struct FakeHmm {
    ssid: SsId,
    senones: Vec<i32>,
    state_scores: [i32; 3],
    in_score_val: i32,
    in_history: History,
    frame_stamp: u64,
    mpx: bool,
}

impl FakeHmm {
    /// Frame stamp meaning "never entered". Frame 0 is a legitimate
    /// first frame (`<s>` is entered at frame 0 in `Decoder::start`),
    /// so an inactive HMM cannot be distinguished from one active at
    /// frame 0 by a stamp of `0` — every `Hmm` impl must pick a
    /// sentinel frame that no real utterance will ever reach.
    pub const NEVER: u64 = u64::MAX;

    pub fn new(ssid: SsId, mpx: bool) -> Self {
        Self {
            ssid,
            senones: vec![ssid * 3, ssid * 3 + 1, ssid * 3 + 2],
            state_scores: [WORST_SCORE; 3],
            in_score_val: WORST_SCORE,
            in_history: -1,
            frame_stamp: Self::NEVER,
            mpx,
        }
    }
}

impl Hmm for FakeHmm {
    fn enter(&mut self, score: i32, history: History, frame: u64) {
        if score > self.in_score_val {
            self.in_score_val = score;
            self.in_history = history;
            self.frame_stamp = frame;
        }
    }

    fn vit_eval(&mut self, senone_scores: &[i32]) -> i32 {
        let mut next = [WORST_SCORE; 3];
        next[0] = self.in_score_val + senone_scores[self.senones[0] as usize];
        for s in 1..3 {
            let stay = self.state_scores[s] + senone_scores[self.senones[s] as usize];
            let advance = self.state_scores[s - 1] + senone_scores[self.senones[s] as usize];
            next[s] = stay.max(advance);
        }
        self.state_scores = next;
        self.in_score_val = WORST_SCORE;
        self.best_score()
    }

    fn best_score(&self) -> i32 {
        *self.state_scores.iter().max().unwrap_or(&WORST_SCORE)
    }

    fn out_score(&self) -> i32 {
        self.state_scores[2]
    }

    fn out_history(&self) -> History {
        self.in_history
    }

    fn in_score(&self) -> i32 {
        self.in_score_val
    }

    fn frame(&self) -> u64 {
        self.frame_stamp
    }

    fn set_frame(&mut self, frame: u64) {
        self.frame_stamp = frame;
    }

    fn clear_scores(&mut self) {
        self.state_scores = [WORST_SCORE; 3];
        self.in_score_val = WORST_SCORE;
    }

    fn clear(&mut self) {
        self.clear_scores();
        self.frame_stamp = Self::NEVER;
        self.in_history = -1;
    }

    fn normalize(&mut self, norm: i32) {
        for s in self.state_scores.iter_mut() {
            if *s > WORST_SCORE {
                *s -= norm;
            }
        }
    }

    fn is_mpx(&self) -> bool {
        self.mpx
    }

    fn set_mpx_ssid(&mut self, ssid: SsId) {
        self.ssid = ssid;
    }

    fn senone_ids(&self) -> &[i32] {
        &self.senones
    }
}

pub struct StubAcousticModel {
    n_ciphone: usize,
    frame_idx: u64,
    /// `None` means unbounded; `Some(n)` means `score_next_frame`
    /// returns `None` once `frame_idx` reaches `n`.
    max_frames: Option<u64>,
    n_senones: usize,
}

impl StubAcousticModel {
    pub fn new(n_ciphone: usize) -> Self {
        Self {
            n_ciphone,
            frame_idx: 0,
            max_frames: None,
            n_senones: 64,
        }
    }

    pub fn with_max_frames(n_ciphone: usize, max_frames: u64) -> Self {
        Self {
            n_ciphone,
            frame_idx: 0,
            max_frames: Some(max_frames),
            n_senones: 64,
        }
    }

    /// Start a fresh utterance's worth of frames from this same stub,
    /// mirroring a real acoustic model's front end being re-pointed at
    /// new audio between utterances.
    pub fn reset_frames(&mut self) {
        self.frame_idx = 0;
    }
}

impl AcousticModel for StubAcousticModel {
    type Hmm = FakeHmm;

    fn make_hmm(&self, ssid: SsId, _ciphone: CiPhone, mpx: bool) -> Self::Hmm {
        FakeHmm::new(ssid, mpx)
    }

    fn n_ciphone(&self) -> usize {
        self.n_ciphone
    }

    fn silence_ciphone(&self) -> CiPhone {
        0
    }

    fn compute_all_senones(&self) -> bool {
        true
    }

    fn clear_active(&mut self) {}

    fn activate_hmm(&mut self, _hmm: &Self::Hmm) {}

    fn score_next_frame(&mut self) -> Option<(FrameScores, Vec<i32>)> {
        if let Some(max) = self.max_frames {
            if self.frame_idx >= max {
                return None;
            }
        }
        self.frame_idx += 1;
        Some((
            FrameScores {
                frame_idx: self.frame_idx,
                best_senone_score: 0,
                best_senone_id: 0,
            },
            vec![0; self.n_senones],
        ))
    }

    fn frame_idx(&self) -> u64 {
        self.frame_idx
    }
}

pub struct StubDictionary {
    entries: Vec<DictEntry>,
    start_wid: WordId,
    finish_wid: WordId,
    silence_wid: WordId,
    main_words: usize,
    /// A word id above `silence_wid` that this dictionary reports as
    /// *not* a filler, to exercise `Decoder::init`'s contiguity check.
    non_filler_above_silence: Option<WordId>,
}

impl Dictionary for StubDictionary {
    fn dict_entry_count(&self) -> usize {
        self.entries.len()
    }

    fn main_words_count(&self) -> usize {
        self.main_words
    }

    fn entry(&self, w: WordId) -> &DictEntry {
        &self.entries[w as usize]
    }

    fn start_wid(&self) -> WordId {
        self.start_wid
    }

    fn finish_wid(&self) -> WordId {
        self.finish_wid
    }

    fn silence_wid(&self) -> WordId {
        self.silence_wid
    }

    fn is_filler(&self, w: WordId) -> bool {
        if Some(w) == self.non_filler_above_silence {
            return false;
        }
        w >= self.silence_wid
    }

    fn lc_fwd(&self, _diphone: SsId, lc_ciphone: CiPhone) -> SsId {
        lc_ciphone
    }

    fn rc_fwd(&self, last_phone: SsId) -> &[SsId] {
        static RC: [SsId; 2] = [1, 2];
        let _ = last_phone;
        &RC
    }

    fn rc_fwd_perm(&self, _r_diph: SsId, ci_phone: CiPhone) -> usize {
        ci_phone as usize % 2
    }

    fn rc_fwd_size(&self, _r_diph: SsId) -> usize {
        2
    }
}

pub struct StubNgramModel {
    known: Vec<WordId>,
}

impl StubNgramModel {
    pub fn new(known: Vec<WordId>) -> Self {
        Self { known }
    }
}

impl NgramModel for StubNgramModel {
    fn known_wid(&self, wid: WordId) -> bool {
        self.known.contains(&wid)
    }

    fn tg_score(&self, w: WordId, prev_w: WordId, prev_prev_w: WordId) -> i32 {
        let _ = (prev_w, prev_prev_w);
        -(100 + w)
    }
}

/// Two three-phone words `[0,1,2]` and `[0,1,3]` sharing a root (`0`)
/// and an interior node (`1`), diverging only at the penultimate
/// phone — exercising both sibling search and homophone-chain
/// collapse when the penultimate phone also matches.
pub fn dict_two_words_sharing_root() -> StubDictionary {
    let entries = vec![
        DictEntry {
            wid: 0,
            phone_ids: vec![0, 1],
            ci_phone_ids: vec![0, 1],
            mpx: false,
        },
        DictEntry {
            wid: 1,
            phone_ids: vec![0, 1],
            ci_phone_ids: vec![0, 1],
            mpx: false,
        },
        DictEntry {
            wid: 2,
            phone_ids: vec![0],
            ci_phone_ids: vec![0],
            mpx: false,
        }, // <s>
        DictEntry {
            wid: 3,
            phone_ids: vec![0],
            ci_phone_ids: vec![0],
            mpx: false,
        }, // </s>
        DictEntry {
            wid: 4,
            phone_ids: vec![0],
            ci_phone_ids: vec![0],
            mpx: false,
        }, // <sil>
    ];
    StubDictionary {
        entries,
        start_wid: 2,
        finish_wid: 3,
        silence_wid: 4,
        main_words: 2,
        non_filler_above_silence: None,
    }
}

/// A single three-phone word `[0,1,2]`: one root, one interior node,
/// one homophone-chain head at the interior node.
pub fn dict_three_phone_word() -> StubDictionary {
    let entries = vec![
        DictEntry {
            wid: 0,
            phone_ids: vec![0, 1, 2],
            ci_phone_ids: vec![0, 1, 2],
            mpx: false,
        },
        DictEntry {
            wid: 1,
            phone_ids: vec![0],
            ci_phone_ids: vec![0],
            mpx: false,
        }, // <s>
        DictEntry {
            wid: 2,
            phone_ids: vec![0],
            ci_phone_ids: vec![0],
            mpx: false,
        }, // </s>
        DictEntry {
            wid: 3,
            phone_ids: vec![0],
            ci_phone_ids: vec![0],
            mpx: false,
        }, // <sil>
    ];
    StubDictionary {
        entries,
        start_wid: 1,
        finish_wid: 2,
        silence_wid: 3,
        main_words: 1,
        non_filler_above_silence: None,
    }
}

/// Same as [`dict_three_phone_word`] plus a noise word above silence
/// that the dictionary (wrongly) reports as not a filler, violating
/// the contiguous-fillers contract (spec §9) so `Decoder::init` can be
/// exercised against `DecoderError::NonContiguousFillers`.
pub fn dict_three_phone_word_with_bad_filler() -> StubDictionary {
    let mut dict = dict_three_phone_word();
    dict.entries.push(DictEntry {
        wid: 4,
        phone_ids: vec![0],
        ci_phone_ids: vec![0],
        mpx: false,
    }); // noise word wrongly excluded from the filler contract
    dict.non_filler_above_silence = Some(4);
    dict
}
