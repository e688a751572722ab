//! The per-utterance search driver: lexicon-tree construction entry
//! point, the three-phase per-frame loop (evaluate, prune, propagate),
//! and cross-word transition (spec §4).

use tracing::{debug, info, trace};

use crate::am::{AcousticModel, CiPhone, History, Hmm, WORST_SCORE};
use crate::bptable::{BpIndex, BpTable, NO_BP};
use crate::config::Tunables;
use crate::dict::{Dictionary, WordId};
use crate::error::DecoderError;
use crate::histogram::ScoreHistogram;
use crate::lm::NgramModel;
use crate::tree::{homophones, NodeId, Tree};

pub enum StepResult {
    Done,
    Frame,
}

/// Per-utterance statistics mirroring the original's end-of-utterance
/// `E_INFO` block.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStats {
    pub n_root_chan_eval: u64,
    pub n_nonroot_chan_eval: u64,
    pub n_last_chan_eval: u64,
    pub n_word_lastchan_eval: u64,
    pub n_lastphn_cand_utt: u64,
    pub n_senone_active_utt: u64,
}

#[derive(Clone, Copy)]
struct LastPhoneCandidate {
    wid: WordId,
    score: i32,
    bp: BpIndex,
}

/// The search engine. Generic over the acoustic model, dictionary, and
/// language model it was built against — all three are consulted every
/// frame (not just at construction), so the decoder owns them for its
/// lifetime rather than borrowing them per call.
pub struct Decoder<A: AcousticModel, D: Dictionary, L: NgramModel> {
    am: A,
    dict: D,
    lm: L,
    tunables: Tunables,

    n_ciphone: usize,
    silence_ciphone: CiPhone,
    silence_wid: WordId,
    start_wid: WordId,
    finish_wid: WordId,

    tree: Tree<A::Hmm>,
    single_phone_hmm: Vec<A::Hmm>,
    /// In-LM single-phone words eligible for trigram-scored transition
    /// (spec §4.5 step 3). `</s>` is deliberately excluded: it is
    /// reached through `bestbp_rc` directly at utterance end, not
    /// through this path (see DESIGN.md on the original's off-by-one).
    single_phone_lm_words: Vec<WordId>,

    bptbl: BpTable,
    word_active: Vec<bool>,
    active_word_list: [Vec<WordId>; 2],
    active_chan_list: [Vec<NodeId>; 2],

    best_score: i32,
    last_phone_best_score: i32,
    dynamic_beam: i32,
    lastphn_cand: Vec<LastPhoneCandidate>,

    frame_idx: u64,
    started: bool,
    stats: FrameStats,
    /// Set when the most recent `step()` ran a renormalization pass
    /// (spec §4.2 step 2, §8 scenario 6); reset at `start()`.
    renormalized: bool,
}

impl<A: AcousticModel, D: Dictionary, L: NgramModel> Decoder<A, D, L> {
    pub fn init(am: A, dict: D, lm: L, tunables: Tunables) -> Result<Self, DecoderError> {
        let start_wid = dict.start_wid();
        let finish_wid = dict.finish_wid();
        let silence_wid = dict.silence_wid();
        let n_words = dict.dict_entry_count();

        if start_wid < 0 || start_wid as usize >= n_words {
            return Err(DecoderError::MissingStartWord);
        }
        if finish_wid < 0 || finish_wid as usize >= n_words {
            return Err(DecoderError::MissingFinishWord);
        }
        if silence_wid < 0 || silence_wid as usize >= n_words {
            return Err(DecoderError::MissingSilenceWord);
        }
        for w in (silence_wid + 1)..n_words as WordId {
            if !dict.is_filler(w) {
                return Err(DecoderError::NonContiguousFillers { wid: w, silence_wid });
            }
        }

        let n_ciphone = am.n_ciphone();
        let mut tree = Tree::new(n_ciphone);
        tree.build(&dict, &am, |w| lm.known_wid(w))?;

        let mut single_phone_hmm = Vec::with_capacity(n_words);
        for w in 0..n_words as WordId {
            let e = dict.entry(w);
            single_phone_hmm.push(am.make_hmm(e.first_ssid(), e.first_ciphone(), e.mpx));
        }

        let single_phone_lm_words: Vec<WordId> = tree
            .single_phone_wid
            .iter()
            .copied()
            .filter(|&w| w != finish_wid && w < silence_wid && lm.known_wid(w))
            .collect();

        let bptbl = BpTable::new(8, n_words, silence_wid);

        info!(
            n_root_chan = tree.roots.len(),
            n_nonroot_chan = tree.non_root_count(),
            n_single_phone = single_phone_hmm.len(),
            "lexicon tree built"
        );

        let silence_ciphone = dict.entry(silence_wid).first_ciphone();
        Ok(Self {
            am,
            dict,
            lm,
            tunables,
            n_ciphone,
            silence_ciphone,
            silence_wid,
            start_wid,
            finish_wid,
            tree,
            single_phone_hmm,
            single_phone_lm_words,
            bptbl,
            word_active: vec![false; n_words],
            active_word_list: [Vec::new(), Vec::new()],
            active_chan_list: [Vec::new(), Vec::new()],
            best_score: 0,
            last_phone_best_score: 0,
            dynamic_beam: 0,
            lastphn_cand: Vec::new(),
            frame_idx: 0,
            started: false,
            stats: FrameStats::default(),
            renormalized: false,
        })
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Whether the most recent `step()` ran a renormalization pass
    /// (spec §4.2 step 2, §8 scenario 6).
    pub fn renormalized(&self) -> bool {
        self.renormalized
    }

    pub fn bptable(&self) -> &BpTable {
        &self.bptbl
    }

    /// Rebuild the lexicon tree for a new active LM (spec §4.1
    /// "Rebuild is triggered whenever the active LM changes"). Must
    /// not be called while an utterance is in progress.
    pub fn rebuild_tree(&mut self) -> Result<(), DecoderError> {
        if self.started {
            return Err(DecoderError::UtteranceAlreadyStarted);
        }
        self.tree.build(&self.dict, &self.am, |w| self.lm.known_wid(w))?;
        debug!(
            n_root_chan = self.tree.roots.len(),
            n_nonroot_chan = self.tree.non_root_count(),
            "lexicon tree rebuilt"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DecoderError> {
        if self.started {
            return Err(DecoderError::UtteranceAlreadyStarted);
        }
        self.bptbl.reset();
        self.word_active.iter_mut().for_each(|x| *x = false);
        for l in &mut self.active_word_list {
            l.clear();
        }
        for l in &mut self.active_chan_list {
            l.clear();
        }
        self.stats = FrameStats::default();
        self.renormalized = false;
        self.frame_idx = 0;

        for r in &mut self.tree.roots {
            r.hmm.clear();
        }
        for h in &mut self.single_phone_hmm {
            h.clear();
        }

        self.single_phone_hmm[self.start_wid as usize].enter(0, NO_BP, 0);
        self.best_score = 0;
        self.last_phone_best_score = 0;
        self.started = true;
        Ok(())
    }

    /// Process one frame. Returns [`StepResult::Done`] once the
    /// acoustic model has no more frames.
    pub fn step(&mut self) -> Result<StepResult, DecoderError> {
        if !self.started {
            return Err(DecoderError::NoUtteranceStarted);
        }
        let frame_idx = self.frame_idx;
        let parity = (frame_idx & 1) as usize;
        let next_parity = 1 - parity;

        self.am.clear_active();
        if !self.am.compute_all_senones() {
            self.activate_senones(frame_idx, parity);
        }

        let Some((_meta, senone_scores)) = self.am.score_next_frame() else {
            return Ok(StepResult::Done);
        };

        self.renormalized = false;
        if self.best_score + 2 * self.tunables.beam < WORST_SCORE {
            self.renormalize(frame_idx, parity);
        }

        self.evaluate(frame_idx, parity, &senone_scores);

        self.bptbl.start_frame();
        self.prune_and_transition(frame_idx, parity, next_parity);
        self.word_transition(frame_idx, next_parity);
        self.deactivate(frame_idx);

        self.frame_idx += 1;
        Ok(StepResult::Frame)
    }

    pub fn finish(&mut self) -> FrameStats {
        self.bptbl.finish_mark();
        for w in 0..self.word_active.len() as WordId {
            if self.word_active[w as usize] {
                self.tree.free_all_rc(w);
                self.word_active[w as usize] = false;
            }
        }
        for h in &mut self.single_phone_hmm {
            h.clear();
        }
        for r in &mut self.tree.roots {
            r.hmm.clear();
        }
        self.started = false;

        info!(
            frames = self.frame_idx,
            bp_count = self.bptbl.len(),
            n_root_chan_eval = self.stats.n_root_chan_eval,
            n_nonroot_chan_eval = self.stats.n_nonroot_chan_eval,
            n_last_chan_eval = self.stats.n_last_chan_eval,
            n_word_lastchan_eval = self.stats.n_word_lastchan_eval,
            n_lastphn_cand_utt = self.stats.n_lastphn_cand_utt,
            n_senone_active_utt = self.stats.n_senone_active_utt,
            "utterance finished"
        );
        self.stats
    }

    pub fn deinit(self) {}

    fn activate_senones(&mut self, frame_idx: u64, parity: usize) {
        let mut n_active = 0u64;
        for r in &self.tree.roots {
            if r.hmm.frame() == frame_idx {
                self.am.activate_hmm(&r.hmm);
                n_active += r.hmm.senone_ids().len() as u64;
            }
        }
        for &id in &self.active_chan_list[parity] {
            self.am.activate_hmm(self.tree.node_hmm(id));
            n_active += self.tree.node_hmm(id).senone_ids().len() as u64;
        }
        for &w in &self.active_word_list[parity] {
            let mut cur = self.tree.word_chan[w as usize];
            while let Some(id) = cur {
                self.am.activate_hmm(self.tree.leaf_hmm(id));
                n_active += self.tree.leaf_hmm(id).senone_ids().len() as u64;
                cur = self.tree.leaf_next(id);
            }
        }
        for h in &self.single_phone_hmm {
            if h.frame() == frame_idx {
                self.am.activate_hmm(h);
                n_active += h.senone_ids().len() as u64;
            }
        }
        self.stats.n_senone_active_utt += n_active;
    }

    fn renormalize(&mut self, frame_idx: u64, parity: usize) {
        let norm = self.best_score;
        self.renormalized = true;
        debug!(frame = frame_idx, norm, "renormalizing active HMM scores");
        for r in &mut self.tree.roots {
            if r.hmm.frame() == frame_idx {
                r.hmm.normalize(norm);
            }
        }
        for &id in &self.active_chan_list[parity] {
            self.tree.node_hmm_mut(id).normalize(norm);
        }
        for &w in &self.active_word_list[parity] {
            let mut cur = self.tree.word_chan[w as usize];
            while let Some(id) = cur {
                self.tree.leaf_hmm_mut(id).normalize(norm);
                cur = self.tree.leaf_next(id);
            }
        }
        for h in &mut self.single_phone_hmm {
            if h.frame() == frame_idx {
                h.normalize(norm);
            }
        }
    }

    fn evaluate(&mut self, frame_idx: u64, parity: usize, senone_scores: &[i32]) {
        self.best_score = WORST_SCORE;
        self.last_phone_best_score = WORST_SCORE;

        for r in &mut self.tree.roots {
            if r.hmm.frame() != frame_idx {
                continue;
            }
            let s = r.hmm.vit_eval(senone_scores);
            self.stats.n_root_chan_eval += 1;
            self.best_score = self.best_score.max(s);
        }

        for &id in &self.active_chan_list[parity] {
            let s = self.tree.node_hmm_mut(id).vit_eval(senone_scores);
            self.stats.n_nonroot_chan_eval += 1;
            self.best_score = self.best_score.max(s);
        }

        for &w in &self.active_word_list[parity] {
            let mut cur = self.tree.word_chan[w as usize];
            while let Some(id) = cur {
                let s = self.tree.leaf_hmm_mut(id).vit_eval(senone_scores);
                self.stats.n_last_chan_eval += 1;
                self.stats.n_word_lastchan_eval += 1;
                self.best_score = self.best_score.max(s);
                self.last_phone_best_score = self.last_phone_best_score.max(s);
                cur = self.tree.leaf_next(id);
            }
        }

        for w in 0..self.single_phone_hmm.len() as WordId {
            if self.single_phone_hmm[w as usize].frame() != frame_idx {
                continue;
            }
            let s = self.single_phone_hmm[w as usize].vit_eval(senone_scores);
            self.best_score = self.best_score.max(s);
            self.last_phone_best_score = self.last_phone_best_score.max(s);
        }
    }

    /// Root pruning, non-root pruning, and last-phone transition
    /// (spec §4.3, §4.6): phone-internal transitions and last-phone
    /// candidate generation/resolution, producing leaf HMM entries.
    fn prune_and_transition(&mut self, frame_idx: u64, parity: usize, next_parity: usize) {
        self.lastphn_cand.clear();

        let mut hist = ScoreHistogram::new(self.best_score, self.tunables.beam);
        let mut n_eval = 0i64;
        for r in &self.tree.roots {
            if r.hmm.frame() == frame_idx {
                hist.add(r.hmm.best_score());
                n_eval += 1;
            }
        }
        for &id in &self.active_chan_list[parity] {
            hist.add(self.tree.node_hmm(id).best_score());
            n_eval += 1;
        }

        self.dynamic_beam = self.tunables.beam;
        if self.tunables.maxhmmpf != -1 && n_eval > self.tunables.maxhmmpf as i64 {
            self.dynamic_beam = hist.dynamic_beam(self.tunables.maxhmmpf);
            trace!(frame = frame_idx, dynamic_beam = self.dynamic_beam, "beam narrowed");
        }

        let thresh = self.best_score + self.dynamic_beam;
        let newphone_thresh = self.best_score + self.dynamic_beam.max(self.tunables.pbeam);
        let lastphn_thresh = self.best_score + self.dynamic_beam.max(self.tunables.lpbeam);

        self.prune_root_chan(frame_idx, next_parity, newphone_thresh, thresh, lastphn_thresh);
        self.prune_nonroot_chan(frame_idx, parity, next_parity, newphone_thresh, thresh, lastphn_thresh);
        self.last_phone_transition(frame_idx, next_parity);
        self.prune_word_chan(frame_idx, parity, next_parity, lastphn_thresh);
    }

    /// Enter `child` with `(score, history, next_frame)` if it improves
    /// on its pending entry, and ensure it is tracked on the next-frame
    /// active-chan list.
    fn enter_and_track_child(
        &mut self,
        child: NodeId,
        score: i32,
        history: History,
        next_frame: u64,
        next_parity: usize,
    ) {
        let hmm = self.tree.node_hmm_mut(child);
        if hmm.frame() < next_frame || hmm.in_score() < score {
            hmm.enter(score, history, next_frame);
        }
        if self.tree.node_hmm(child).frame() == next_frame
            && !self.active_chan_list[next_parity].contains(&child)
        {
            self.active_chan_list[next_parity].push(child);
        }
    }

    fn prune_root_chan(
        &mut self,
        frame_idx: u64,
        next_parity: usize,
        newphone_thresh: i32,
        thresh: i32,
        lastphn_thresh: i32,
    ) {
        let next_frame = frame_idx + 1;
        for ri in 0..self.tree.roots.len() {
            if self.tree.roots[ri].hmm.frame() != frame_idx {
                continue;
            }
            if self.tree.roots[ri].hmm.best_score() <= thresh {
                continue;
            }
            self.tree.roots[ri].hmm.set_frame(next_frame);
            let exit_score = self.tree.roots[ri].hmm.out_score();
            let exit_history = self.tree.roots[ri].hmm.out_history();
            let newphone_score = exit_score + self.tunables.pip;

            if newphone_score > newphone_thresh {
                let mut child = self.tree.roots[ri].next;
                while let Some(id) = child {
                    self.enter_and_track_child(id, newphone_score, exit_history, next_frame, next_parity);
                    child = self.tree.node_alt(id);
                }

                if newphone_score > lastphn_thresh {
                    let head = self.tree.roots[ri].penult_phn_wid;
                    for w in homophones(&self.tree.homophone_set, head) {
                        self.lastphn_cand.push(LastPhoneCandidate {
                            wid: w,
                            score: newphone_score - self.tunables.nwpen,
                            bp: exit_history,
                        });
                        self.stats.n_lastphn_cand_utt += 1;
                    }
                }
            }
        }
    }

    fn prune_nonroot_chan(
        &mut self,
        frame_idx: u64,
        parity: usize,
        next_parity: usize,
        newphone_thresh: i32,
        thresh: i32,
        lastphn_thresh: i32,
    ) {
        let next_frame = frame_idx + 1;
        let current: Vec<NodeId> = std::mem::take(&mut self.active_chan_list[parity]);
        for id in current {
            let best = self.tree.node_hmm(id).best_score();
            if best > thresh {
                if self.tree.node_hmm(id).frame() != next_frame
                    && !self.active_chan_list[next_parity].contains(&id)
                {
                    self.active_chan_list[next_parity].push(id);
                }

                let exit_score = self.tree.node_hmm(id).out_score() + self.tunables.pip;
                if exit_score > newphone_thresh {
                    let exit_history = self.tree.node_hmm(id).out_history();
                    let mut child = self.tree.node_next(id);
                    while let Some(cid) = child {
                        self.enter_and_track_child(cid, exit_score, exit_history, next_frame, next_parity);
                        child = self.tree.node_alt(cid);
                    }

                    if exit_score > lastphn_thresh {
                        let head = self.tree.node_penult_wid(id);
                        for w in homophones(&self.tree.homophone_set, head) {
                            self.lastphn_cand.push(LastPhoneCandidate {
                                wid: w,
                                score: exit_score - self.tunables.nwpen,
                                bp: exit_history,
                            });
                            self.stats.n_lastphn_cand_utt += 1;
                        }
                    }
                }
            } else if self.tree.node_hmm(id).frame() != next_frame {
                self.tree.node_hmm_mut(id).clear_scores();
            }
        }
    }

    /// Last-phone transition (spec §4.6): resolve candidates with
    /// trigram rescoring and materialize survivor leaf chains.
    ///
    /// Simplification relative to the original: each candidate already
    /// carries a single concrete predecessor backpointer (the one that
    /// entered its root/node), so this rescales that candidate's own
    /// `bp` rather than re-scanning every bp entry sharing the
    /// predecessor's exit frame. See DESIGN.md.
    fn last_phone_transition(&mut self, frame_idx: u64, next_parity: usize) {
        if self.lastphn_cand.is_empty() {
            return;
        }
        let next_frame = frame_idx + 1;
        let prune_at = self.last_phone_best_score + self.tunables.lponlybeam;

        let candidates = std::mem::take(&mut self.lastphn_cand);
        for cand in candidates {
            let dscr = if cand.bp == NO_BP {
                0
            } else {
                let bp = *self.bptbl.entry(cand.bp);
                self.lm.tg_score(cand.wid, bp.real_wid, bp.prev_real_wid)
            };
            let score = cand.score + dscr;
            if score <= prune_at {
                continue;
            }

            if !self.word_active[cand.wid as usize] {
                let entry = self.dict.entry(cand.wid);
                let rc_ssids = self.dict.rc_fwd(entry.last_ssid());
                let rc_ssids: Vec<_> = rc_ssids.to_vec();
                let last_ciphone = entry.last_ciphone();
                self.tree.alloc_all_rc(cand.wid, &rc_ssids, last_ciphone, &self.am);
                self.word_active[cand.wid as usize] = true;
                self.active_word_list[next_parity].push(cand.wid);
            }
            self.last_phone_best_score = self.last_phone_best_score.max(score);
            self.enter_word_leaves(cand.wid, score, cand.bp, next_frame);
        }
    }

    /// Enter every right-context leaf of `wid`'s chain with
    /// `(score, bp, frame)` when it improves on the leaf's pending
    /// entry.
    fn enter_word_leaves(&mut self, wid: WordId, score: i32, bp: BpIndex, next_frame: u64) {
        let mut cur = self.tree.word_chan[wid as usize];
        while let Some(id) = cur {
            let hmm = self.tree.leaf_hmm_mut(id);
            if hmm.frame() < next_frame || hmm.in_score() < score {
                hmm.enter(score, bp, next_frame);
            }
            cur = self.tree.leaf_next(id);
        }
    }

    fn prune_word_chan(&mut self, frame_idx: u64, parity: usize, next_parity: usize, lastphn_thresh: i32) {
        let next_frame = frame_idx + 1;
        let newword_thresh = self.last_phone_best_score + self.dynamic_beam.max(self.tunables.wbeam);

        let words: Vec<WordId> = std::mem::take(&mut self.active_word_list[parity]);
        for w in words {
            let mut any_survive = false;
            let mut cur = self.tree.word_chan[w as usize];
            while let Some(id) = cur {
                let next = self.tree.leaf_next(id);
                let best = self.tree.leaf_hmm(id).best_score();
                let entered_next = self.tree.leaf_hmm(id).frame() == next_frame;
                if best > lastphn_thresh {
                    any_survive = true;
                    let exit_score = self.tree.leaf_hmm(id).out_score();
                    if exit_score > newword_thresh {
                        self.save_leaf_exit(frame_idx, w, id, exit_score);
                    }
                } else if entered_next {
                    any_survive = true;
                } else {
                    self.unlink_leaf(w, id);
                }
                cur = next;
            }
            if !any_survive {
                self.tree.free_all_rc(w);
                self.word_active[w as usize] = false;
            } else {
                if !self.active_word_list[next_parity].contains(&w) {
                    self.active_word_list[next_parity].push(w);
                }
            }
        }

        for w in 0..self.single_phone_hmm.len() as WordId {
            if self.single_phone_hmm[w as usize].frame() != frame_idx {
                continue;
            }
            if self.single_phone_hmm[w as usize].best_score() > lastphn_thresh {
                self.single_phone_hmm[w as usize].set_frame(next_frame);
                let exit_score = self.single_phone_hmm[w as usize].out_score();
                if exit_score > newword_thresh {
                    let exit_history = self.single_phone_hmm[w as usize].out_history();
                    self.bptbl
                        .save_bwd_ptr(frame_idx, w, exit_score, exit_history, 0, -1, 1);
                }
            }
        }
    }

    /// Drop a dead leaf from `w`'s singly-linked chain and return it to
    /// the pool. O(chain length); chains are short (right-context fan
    /// out, not vocabulary size).
    fn unlink_leaf(&mut self, w: WordId, dead: NodeId) {
        let head = self.tree.word_chan[w as usize];
        match head {
            Some(h) if h == dead => {
                self.tree.word_chan[w as usize] = self.tree.leaf_next(dead);
            }
            Some(h) => {
                let mut cur = h;
                while let Some(next) = self.tree.leaf_next(cur) {
                    if next == dead {
                        let after = self.tree.leaf_next(dead);
                        self.tree.set_leaf_next(cur, after);
                        break;
                    }
                    cur = next;
                }
            }
            None => {}
        }
        self.tree.release_leaf(dead);
    }

    fn save_leaf_exit(&mut self, frame_idx: u64, w: WordId, leaf: NodeId, exit_score: i32) {
        let rc = self.tree.leaf_rc_id(leaf);
        let history = self.tree.leaf_hmm(leaf).out_history();
        let entry = self.dict.entry(w);
        let (r_diph, rcsize) = if entry.mpx {
            let last = entry.last_ssid();
            (last, self.dict.rc_fwd_size(last))
        } else {
            (-1, 1)
        };
        self.bptbl
            .save_bwd_ptr(frame_idx, w, exit_score, history, rc, r_diph, rcsize);
    }

    fn deactivate(&mut self, frame_idx: u64) {
        for r in &mut self.tree.roots {
            if r.hmm.frame() == frame_idx {
                r.hmm.clear_scores();
            }
        }
        for h in &mut self.single_phone_hmm {
            if h.frame() == frame_idx {
                h.clear_scores();
            }
        }
    }

    /// Inter-word transition (spec §4.5): best predecessor per right
    /// context, then entry of roots / single-phone LM words /
    /// silence+fillers for the next frame.
    fn word_transition(&mut self, frame_idx: u64, next_parity: usize) {
        let seg_start = self.bptbl.frame_start(frame_idx as usize);
        let seg_end = self.bptbl.len() as BpIndex;
        self.bptbl
            .cap_word_exits(seg_start, seg_end, self.tunables.maxwpf, self.word_active.len());

        // bestbp_rc[ci_phone] = (score, bp index, predecessor's last ci phone)
        let mut bestbp_rc: Vec<(i32, BpIndex, CiPhone)> = vec![(WORST_SCORE, NO_BP, 0); self.n_ciphone];
        let mut any = false;

        for idx in seg_start..seg_end {
            let e = *self.bptbl.entry(idx);
            if !e.valid || e.wid == self.finish_wid {
                continue;
            }
            any = true;
            self.bptbl.reset_word_lat_idx(e.wid);
            let last_ciphone = self.dict.entry(e.wid).last_ciphone();
            for rc in 0..self.n_ciphone {
                let slot = if e.r_diph == -1 {
                    self.dict.zero_perm_tab(rc as CiPhone)
                } else {
                    self.dict.rc_fwd_perm(e.r_diph, rc as CiPhone)
                };
                let score = self.bptbl.rc_score(idx, slot);
                if score > bestbp_rc[rc].0 {
                    bestbp_rc[rc] = (score, idx, last_ciphone);
                }
            }
        }
        if !any {
            return;
        }

        let next_frame = frame_idx + 1;
        let thresh = self.best_score + self.dynamic_beam;

        // Multi-phone roots.
        for ri in 0..self.tree.roots.len() {
            let rc = self.tree.roots[ri].ciphone as usize;
            let (score, bp, lc) = bestbp_rc[rc];
            if score == WORST_SCORE {
                continue;
            }
            let cand = score + self.tunables.nwpen + self.tunables.pip;
            if cand <= thresh {
                continue;
            }
            let is_mpx = self.tree.roots[ri].hmm.is_mpx();
            let diphone = self.tree.roots[ri].diphone;
            let hmm = &mut self.tree.roots[ri].hmm;
            if hmm.frame() < next_frame || hmm.in_score() < cand {
                hmm.enter(cand, bp, next_frame);
                if is_mpx {
                    hmm.set_mpx_ssid(self.dict.lc_fwd(diphone, lc));
                }
            }
        }

        // Single-phone in-LM words (`</s>` excluded; see field doc).
        for i in 0..self.single_phone_lm_words.len() {
            let w = self.single_phone_lm_words[i];
            let ci_first = self.dict.entry(w).first_ciphone();
            let mut best = WORST_SCORE;
            let mut best_bp = NO_BP;
            for idx in seg_start..seg_end {
                let e = *self.bptbl.entry(idx);
                if !e.valid {
                    continue;
                }
                let slot = if e.r_diph == -1 {
                    self.dict.zero_perm_tab(ci_first)
                } else {
                    self.dict.rc_fwd_perm(e.r_diph, ci_first)
                };
                let acoustic = self.bptbl.rc_score(idx, slot);
                let dscr = self.lm.tg_score(w, e.real_wid, e.prev_real_wid);
                let cand = acoustic + dscr;
                if cand > best {
                    best = cand;
                    best_bp = idx;
                }
            }
            if best == WORST_SCORE {
                continue;
            }
            let cand = best + self.tunables.pip;
            if cand <= thresh {
                continue;
            }
            let entry_mpx = self.dict.entry(w).mpx;
            let diphone = self.dict.entry(w).first_ssid();
            let last_ciphone = self.dict.entry(self.bptbl.entry(best_bp).wid).last_ciphone();
            let hmm = &mut self.single_phone_hmm[w as usize];
            if hmm.frame() < next_frame || hmm.in_score() < cand {
                hmm.enter(cand, best_bp, next_frame);
                if entry_mpx {
                    hmm.set_mpx_ssid(self.dict.lc_fwd(diphone, last_ciphone));
                }
            }
        }

        // Silence and fillers (spec §4.5 step 4).
        let (sil_score, sil_bp, _) = bestbp_rc[self.silence_ciphone as usize];
        if sil_score != WORST_SCORE {
            let sil_cand = sil_score + self.tunables.silpen + self.tunables.pip;
            if sil_cand > thresh {
                let hmm = &mut self.single_phone_hmm[self.silence_wid as usize];
                if hmm.frame() < next_frame || hmm.in_score() < sil_cand {
                    hmm.enter(sil_cand, sil_bp, next_frame);
                }
            }
            let fill_cand = sil_score + self.tunables.fillpen + self.tunables.pip;
            if fill_cand > thresh {
                for w in (self.silence_wid + 1)..self.word_active.len() as WordId {
                    let hmm = &mut self.single_phone_hmm[w as usize];
                    if hmm.frame() < next_frame || hmm.in_score() < fill_cand {
                        hmm.enter(fill_cand, sil_bp, next_frame);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        dict_three_phone_word, dict_three_phone_word_with_bad_filler, dict_two_words_sharing_root,
        FakeHmm, StubAcousticModel, StubNgramModel,
    };

    #[test]
    fn init_rejects_noncontiguous_fillers() {
        let am = StubAcousticModel::new(3);
        let dict = dict_three_phone_word_with_bad_filler();
        let lm = StubNgramModel::new(vec![0]);
        let err = Decoder::init(am, dict, lm, Tunables::default()).unwrap_err();
        assert!(matches!(
            err,
            DecoderError::NonContiguousFillers {
                wid: 4,
                silence_wid: 3
            }
        ));
    }

    #[test]
    fn start_enters_only_the_start_word() {
        let am = StubAcousticModel::new(3);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();

        assert!(dec.bptable().is_empty());
        assert_eq!(dec.single_phone_hmm[dec.start_wid as usize].frame(), 0);
        assert_eq!(
            dec.single_phone_hmm[dec.start_wid as usize].out_history(),
            NO_BP
        );
        for w in 0..dec.single_phone_hmm.len() {
            if w as WordId != dec.start_wid {
                assert_eq!(dec.single_phone_hmm[w].frame(), FakeHmm::NEVER);
            }
        }
        for r in &dec.tree.roots {
            assert_eq!(r.hmm.frame(), FakeHmm::NEVER);
        }
    }

    #[test]
    fn step_without_start_errors() {
        let am = StubAcousticModel::new(3);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        let err = dec.step().unwrap_err();
        assert!(matches!(err, DecoderError::NoUtteranceStarted));
    }

    #[test]
    fn start_while_already_started_errors() {
        let am = StubAcousticModel::new(3);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();
        let err = dec.start().unwrap_err();
        assert!(matches!(err, DecoderError::UtteranceAlreadyStarted));
    }

    #[test]
    fn step_returns_done_when_no_frames_available() {
        let am = StubAcousticModel::with_max_frames(3, 0);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();
        assert!(matches!(dec.step().unwrap(), StepResult::Done));
    }

    /// Spec §8 boundary: a frame with zero non-finish word exits must
    /// still advance frame stamping and must not enter any new roots.
    /// With all-zero senone scores, `<s>`'s own 3-state HMM cannot
    /// reach its exit state in a single frame, so no word exit is
    /// possible in frame 0 — a direct, deterministic instance of the
    /// scenario without needing to hand-tune acoustic scores.
    #[test]
    fn empty_frame_advances_without_entering_new_roots() {
        let am = StubAcousticModel::with_max_frames(3, 5);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();

        assert!(matches!(dec.step().unwrap(), StepResult::Frame));
        assert_eq!(dec.frame_idx, 1);
        assert!(dec.bptable().is_empty());
        for r in &dec.tree.roots {
            assert_eq!(
                r.hmm.frame(),
                FakeHmm::NEVER,
                "no root may be entered from a frame with zero word exits"
            );
        }
    }

    /// Regression test: a single-phone word that survives pruning on
    /// its own best score (not freshly entered this frame) must carry
    /// its internal states forward into later frames instead of having
    /// them wiped by `deactivate`. With constant zero-score frames,
    /// `<s>`'s 3-state HMM needs exactly three evaluated frames to push
    /// a nonzero score out of its exit state; if surviving HMMs were
    /// never promoted to the next frame, `deactivate` would clear them
    /// every frame and this word could never exit (spec §8 scenario 1
    /// depends on exactly this).
    #[test]
    fn surviving_single_phone_word_exits_after_enough_frames() {
        let am = StubAcousticModel::with_max_frames(3, 5);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();

        for _ in 0..3 {
            assert!(matches!(dec.step().unwrap(), StepResult::Frame));
        }

        assert!(
            !dec.bptable().is_empty(),
            "<s> must exit once its HMM has survived enough frames to reach its exit state"
        );
        let start_wid = dec.start_wid;
        assert!((0..dec.bptable().len() as i32).any(|i| dec.bptable().entry(i).wid == start_wid));
    }

    #[test]
    fn rebuild_tree_while_utterance_in_progress_errors() {
        let am = StubAcousticModel::new(3);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();
        let err = dec.rebuild_tree().unwrap_err();
        assert!(matches!(err, DecoderError::UtteranceAlreadyStarted));
    }

    /// Round-trip / idempotence (spec §8): running several utterances
    /// back-to-back must not grow the tree's non-root or leaf pools
    /// beyond their first utterance's high-water mark.
    #[test]
    fn pool_high_water_marks_are_stable_across_utterances() {
        let am = StubAcousticModel::with_max_frames(3, 30);
        let dict = dict_two_words_sharing_root();
        let lm = StubNgramModel::new(vec![0, 1]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();

        dec.start().unwrap();
        while matches!(dec.step().unwrap(), StepResult::Frame) {}
        dec.finish();
        let node_hwm = dec.tree.pool_high_water_mark();
        let leaf_hwm = dec.tree.leaf_pool_high_water_mark();

        for _ in 0..3 {
            dec.am.reset_frames();
            dec.start().unwrap();
            while matches!(dec.step().unwrap(), StepResult::Frame) {}
            dec.finish();
            assert_eq!(dec.tree.pool_high_water_mark(), node_hwm);
            assert_eq!(dec.tree.leaf_pool_high_water_mark(), leaf_hwm);
        }
    }

    #[test]
    fn maxhmmpf_disabled_leaves_dynamic_beam_at_configured_beam() {
        let am = StubAcousticModel::with_max_frames(3, 5);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut tunables = Tunables::default();
        tunables.maxhmmpf = -1;
        let mut dec = Decoder::init(am, dict, lm, tunables).unwrap();
        dec.start().unwrap();
        dec.step().unwrap();
        assert_eq!(dec.dynamic_beam, dec.tunables.beam);
    }

    /// Spec §8: after a renormalization pass, the best active HMM
    /// state score is exactly 0.
    #[test]
    fn renormalize_zeroes_out_the_best_active_score() {
        let am = StubAcousticModel::new(3);
        let dict = dict_three_phone_word();
        let lm = StubNgramModel::new(vec![0]);
        let mut dec = Decoder::init(am, dict, lm, Tunables::default()).unwrap();
        dec.start().unwrap();

        let deep_senone_scores = vec![-1_000_000_000; 64];
        let s = dec.single_phone_hmm[dec.start_wid as usize].vit_eval(&deep_senone_scores);
        dec.best_score = s;
        assert!(!dec.renormalized());
        dec.renormalize(0, 0);

        let best = dec.single_phone_hmm[dec.start_wid as usize].best_score();
        assert_eq!(best, 0);
        assert!(dec.renormalized());
    }
}
