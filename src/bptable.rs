//! The backpointer lattice (spec §3 `bptbl`, §4.4, §4.7).
//!
//! One [`BpEntry`] is saved per surviving word exit per frame. Each
//! entry's per-right-context acoustic scores live in a separately
//! growable score stack (`rcsize` slots per entry, found via
//! `s_idx`). Trigram LM lookups at use sites are O(1) because every
//! entry caches the nearest non-filler ancestor word (`real_wid`) and
//! the one before it (`prev_real_wid`) at save time rather than
//! walking the chain on demand.

use crate::am::WORST_SCORE;
use crate::dict::WordId;

pub type BpIndex = i32;

pub const NO_BP: BpIndex = -1;

#[derive(Debug, Clone, Copy)]
pub struct BpEntry {
    pub wid: WordId,
    pub frame: u64,
    pub bp: BpIndex,
    pub score: i32,
    /// Offset into the score stack where this entry's `rcsize`
    /// per-right-context scores begin.
    pub s_idx: usize,
    /// Right-context diphone key (word's last phone), or `-1` if this
    /// word carries no right-context fan-out.
    pub r_diph: i32,
    /// False once invalidated by the per-frame word-exit cap.
    pub valid: bool,
    /// Nearest non-filler word on the backpointer chain, including
    /// this entry's own word if it is not a filler.
    pub real_wid: WordId,
    /// The `real_wid` one further back, or `-1`.
    pub prev_real_wid: WordId,
}

/// Backpointer table, global right-context score stack, and the
/// per-word "has this word exited this frame yet" index, all growing
/// by doubling as an utterance demands more capacity.
pub struct BpTable {
    entries: Vec<BpEntry>,
    score_stack: Vec<i32>,
    bss_head: usize,
    /// `word_lat_idx[w] = NO_BP` iff `w` has no exit saved this frame.
    word_lat_idx: Vec<BpIndex>,
    /// `bp_table_idx[f]` = first bp index belonging to frame `f`.
    bp_table_idx: Vec<BpIndex>,
    silence_wid: WordId,
}

impl BpTable {
    pub fn new(initial_capacity: usize, n_words: usize, silence_wid: WordId) -> Self {
        Self {
            entries: Vec::with_capacity(initial_capacity.max(1)),
            score_stack: Vec::with_capacity(initial_capacity.max(1) * 4),
            bss_head: 0,
            word_lat_idx: vec![NO_BP; n_words],
            bp_table_idx: Vec::new(),
            silence_wid,
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.score_stack.clear();
        self.bss_head = 0;
        self.word_lat_idx.iter_mut().for_each(|x| *x = NO_BP);
        self.bp_table_idx.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: BpIndex) -> &BpEntry {
        &self.entries[idx as usize]
    }

    pub fn word_lat_idx(&self, w: WordId) -> BpIndex {
        self.word_lat_idx[w as usize]
    }

    pub fn reset_word_lat_idx(&mut self, w: WordId) {
        self.word_lat_idx[w as usize] = NO_BP;
    }

    /// The `rcsize` score-stack slots belonging to entry `idx`.
    pub fn rc_scores(&self, idx: BpIndex, rcsize: usize) -> &[i32] {
        let e = self.entry(idx);
        &self.score_stack[e.s_idx..e.s_idx + rcsize]
    }

    pub fn rc_score(&self, idx: BpIndex, rc: usize) -> i32 {
        let e = self.entry(idx);
        self.score_stack[e.s_idx + rc]
    }

    /// Mark the start of a new frame's bp segment. Call once per frame
    /// before any `save_bwd_ptr` for that frame.
    pub fn start_frame(&mut self) {
        self.bp_table_idx.push(self.entries.len() as BpIndex);
    }

    /// One past the end of the segment belonging to `frame`, i.e. the
    /// exclusive upper bound `[bp_table_idx[frame], end)`.
    pub fn frame_start(&self, frame: usize) -> BpIndex {
        self.bp_table_idx[frame]
    }

    /// Append one final mark for the frame just finished, so the last
    /// frame's segment has a defined upper bound.
    pub fn finish_mark(&mut self) {
        self.bp_table_idx.push(self.entries.len() as BpIndex);
    }

    fn is_filler(&self, w: WordId) -> bool {
        w >= self.silence_wid
    }

    /// Trigram path caching (spec §4.7): walk backward from `bp`
    /// skipping fillers to find `real_wid`, then one step further for
    /// `prev_real_wid`.
    fn cache_path(&self, wid: WordId, bp: BpIndex) -> (WordId, WordId) {
        let real_wid = if self.is_filler(wid) {
            let mut cur = bp;
            loop {
                if cur == NO_BP {
                    break wid;
                }
                let e = self.entry(cur);
                if !self.is_filler(e.wid) {
                    break e.wid;
                }
                cur = e.bp;
            }
        } else {
            wid
        };

        // One bp further back than the entry that supplied real_wid:
        // since real_wid entries cache their own real_wid, reuse that.
        let prev_real_wid = if self.is_filler(wid) {
            let mut cur = bp;
            loop {
                if cur == NO_BP {
                    break -1;
                }
                let e = self.entry(cur);
                if !self.is_filler(e.wid) {
                    break if e.bp == NO_BP { -1 } else { self.entry(e.bp).real_wid };
                }
                cur = e.bp;
            }
        } else if bp == NO_BP {
            -1
        } else {
            self.entry(bp).real_wid
        };

        (real_wid, prev_real_wid)
    }

    /// Save or update a word exit. `rcsize` is the width of the
    /// right-context score-stack slice this word needs (1 if
    /// `r_diph == -1`). `rc` is the right-context slot this particular
    /// call is updating.
    pub fn save_bwd_ptr(
        &mut self,
        frame: u64,
        wid: WordId,
        score: i32,
        path: BpIndex,
        rc: usize,
        r_diph: i32,
        rcsize: usize,
    ) {
        let existing = self.word_lat_idx[wid as usize];
        if existing != NO_BP {
            let e_idx = existing as usize;
            if score > self.entries[e_idx].score {
                if path != self.entries[e_idx].bp {
                    self.entries[e_idx].bp = path;
                    let (real_wid, prev_real_wid) = self.cache_path(wid, path);
                    self.entries[e_idx].real_wid = real_wid;
                    self.entries[e_idx].prev_real_wid = prev_real_wid;
                }
                self.entries[e_idx].score = score;
            }
            let s_idx = self.entries[e_idx].s_idx;
            self.score_stack[s_idx + rc] = score;
            return;
        }

        if self.entries.len() == self.entries.capacity() && !self.entries.is_empty() {
            self.entries.reserve(self.entries.len());
        }

        let s_idx = self.bss_head;
        if self.score_stack.len() < s_idx + rcsize {
            let needed = s_idx + rcsize;
            let new_cap = (self.score_stack.capacity().max(1) * 2).max(needed);
            self.score_stack.reserve(new_cap - self.score_stack.len());
        }
        self.score_stack.resize(s_idx + rcsize, WORST_SCORE);
        self.score_stack[s_idx + rc] = score;

        let (real_wid, prev_real_wid) = self.cache_path(wid, path);
        let idx = self.entries.len() as BpIndex;
        self.entries.push(BpEntry {
            wid,
            frame,
            bp: path,
            score,
            s_idx,
            r_diph,
            valid: true,
            real_wid,
            prev_real_wid,
        });
        self.word_lat_idx[wid as usize] = idx;
        self.bss_head += rcsize;
    }

    /// Word-exit cap (spec §4.4): within `[seg_start, seg_end)`, keep at
    /// most `maxwpf` valid entries, retaining only the single
    /// best-scoring filler among them.
    pub fn cap_word_exits(&mut self, seg_start: BpIndex, seg_end: BpIndex, maxwpf: i32, n_words: usize) {
        if maxwpf == -1 || maxwpf as usize >= n_words {
            return;
        }
        let start = seg_start as usize;
        let end = seg_end as usize;
        if end <= start {
            return;
        }

        let mut best_filler: Option<(usize, i32)> = None;
        for i in start..end {
            if !self.entries[i].valid {
                continue;
            }
            if self.is_filler(self.entries[i].wid) {
                if best_filler.map_or(true, |(_, s)| self.entries[i].score > s) {
                    best_filler = Some((i, self.entries[i].score));
                }
            }
        }
        if let Some((best_i, _)) = best_filler {
            for i in start..end {
                if i != best_i && self.is_filler(self.entries[i].wid) {
                    self.entries[i].valid = false;
                }
            }
        }

        loop {
            let n_valid = (start..end).filter(|&i| self.entries[i].valid).count();
            if n_valid as i32 <= maxwpf {
                break;
            }
            let worst = (start..end)
                .filter(|&i| self.entries[i].valid)
                .min_by_key(|&i| self.entries[i].score);
            match worst {
                Some(i) => self.entries[i].valid = false,
                None => break,
            }
        }
    }
}
