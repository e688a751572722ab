//! The lexicon tree: a prefix-shared forest of phone HMMs built from
//! in-LM multi-phone dictionary words (spec §4.1).
//!
//! Nodes are arena-allocated and referenced by typed ids rather than
//! raw pointers, following the same id-indirection discipline lsm
//! storage engines use for their on-disk segment references: no
//! pointer cycles, no lifetimes threaded through the search core, and
//! a node can be freed (returned to a free list) without invalidating
//! anyone else's id.

use crate::am::{AcousticModel, CiPhone, Hmm, SsId};
use crate::dict::{Dictionary, WordId};
use crate::error::DecoderError;

/// Arena index into [`Tree::nodes`]. `None` in an `Option<NodeId>`
/// plays the role of a null child/sibling pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// A root channel: one per distinct first phone among in-LM
/// multi-phone words. Allocated once at init from a pool sized to the
/// acoustic model's CI phone count, and never freed.
pub struct RootChan<H> {
    pub ciphone: CiPhone,
    pub diphone: SsId,
    pub hmm: H,
    /// First non-root child, or `None` if this root has no children
    /// (every word under it is two phones long).
    pub next: Option<NodeId>,
    /// Homophone chain of two-phone words whose penultimate phone is
    /// this root, i.e. whose tree path terminates here.
    pub penult_phn_wid: WordId,
}

/// A non-root interior tree node: one phone position shared by every
/// word passing through it.
pub struct Chan<H> {
    pub ciphone: CiPhone,
    pub ssid: SsId,
    pub hmm: H,
    /// First child along this node's path, or `None` at a leaf
    /// position (penultimate phone).
    pub next: Option<NodeId>,
    /// Next sibling under the same parent (ssid-keyed chain).
    pub alt: Option<NodeId>,
    /// Homophone chain of words whose tree path terminates at this
    /// node (this is the penultimate phone for all of them).
    pub penult_phn_wid: WordId,
}

/// A leaf (right-context) HMM, lazily allocated per word per possible
/// right context at last-phone transition (spec §4.8).
pub struct Leaf<H> {
    pub ciphone: CiPhone,
    pub hmm: H,
    /// Index into the word's `rcFwdTable` entry; identifies which
    /// right-context phone this leaf models.
    pub rc_id: usize,
    pub next: Option<NodeId>,
}

const NO_WID: WordId = -1;

/// The lexicon tree plus its word-level bookkeeping arrays.
pub struct Tree<H> {
    pub roots: Vec<RootChan<H>>,
    /// `first_phone_rchan_map[ciphone] -> root index`, `-1` if unused.
    first_phone_rchan_map: Vec<i32>,
    nodes: Vec<Chan<H>>,
    free_nodes: Vec<NodeId>,
    /// `homophone_set[w] = next_w_or_-1`.
    pub homophone_set: Vec<WordId>,
    /// `word_chan[w]` head of this word's leaf chain, if multi-phone.
    pub word_chan: Vec<Option<NodeId>>,
    leaves: Vec<Leaf<H>>,
    free_leaves: Vec<NodeId>,
    /// Words enumerated as single-phone (LM-in words first, then every
    /// post-main-vocabulary word).
    pub single_phone_wid: Vec<WordId>,
}

impl<H> Tree<H> {
    pub fn new(n_ciphone: usize) -> Self {
        Self {
            roots: Vec::new(),
            first_phone_rchan_map: vec![-1; n_ciphone],
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            homophone_set: Vec::new(),
            word_chan: Vec::new(),
            leaves: Vec::new(),
            free_leaves: Vec::new(),
            single_phone_wid: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> &Chan<H> {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Chan<H> {
        &mut self.nodes[id.0 as usize]
    }

    fn leaf(&self, id: NodeId) -> &Leaf<H> {
        &self.leaves[id.0 as usize]
    }

    fn leaf_mut(&mut self, id: NodeId) -> &mut Leaf<H> {
        &mut self.leaves[id.0 as usize]
    }

    fn alloc_node(&mut self, chan: Chan<H>) -> NodeId {
        if let Some(id) = self.free_nodes.pop() {
            *self.node_mut(id) = chan;
            id
        } else {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(chan);
            id
        }
    }

    fn alloc_leaf(&mut self, leaf: Leaf<H>) -> NodeId {
        if let Some(id) = self.free_leaves.pop() {
            *self.leaf_mut(id) = leaf;
            id
        } else {
            let id = NodeId(self.leaves.len() as u32);
            self.leaves.push(leaf);
            id
        }
    }

    pub fn non_root_count(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    pub fn pool_high_water_mark(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_pool_high_water_mark(&self) -> usize {
        self.leaves.len()
    }

    /// Free every non-root node (post-order doesn't matter for an
    /// arena: freeing just returns ids to the free list), resetting
    /// roots to their initial, childless state. Used before a rebuild.
    fn teardown_nonroot(&mut self) {
        self.nodes.clear();
        self.free_nodes.clear();
        self.leaves.clear();
        self.free_leaves.clear();
        for r in &mut self.roots {
            r.next = None;
            r.penult_phn_wid = NO_WID;
        }
    }

    /// Rebuild the tree from scratch for a (possibly new) LM's
    /// in-LM-word membership. `am` supplies HMM construction.
    pub fn build<A: AcousticModel<Hmm = H>>(
        &mut self,
        dict: &dyn Dictionary,
        am: &A,
        is_in_lm: impl Fn(WordId) -> bool,
    ) -> Result<(), DecoderError> {
        self.teardown_nonroot();

        let n_words = dict.dict_entry_count();
        self.homophone_set = vec![NO_WID; n_words];
        self.word_chan = vec![None; n_words];
        self.single_phone_wid.clear();

        let main_words = dict.main_words_count();
        let mut mpx_seen: Option<(WordId, bool)> = None;

        for w in 0..main_words as WordId {
            let entry = dict.entry(w);
            if !is_in_lm(w) || entry.len() == 1 {
                continue;
            }
            match mpx_seen {
                None => mpx_seen = Some((w, entry.mpx)),
                Some((first_w, first_mpx)) if first_mpx != entry.mpx => {
                    return Err(DecoderError::InconsistentMpx {
                        word_a: first_w,
                        word_b: w,
                    });
                }
                _ => {}
            }
            self.insert_word(w, entry.phone_ids.clone(), entry.ci_phone_ids.clone(), am);
        }

        // Single-phone words: in-LM words first, then every word past
        // the main vocabulary (start/finish/silence/fillers).
        for w in 0..main_words as WordId {
            let entry = dict.entry(w);
            if is_in_lm(w) && entry.len() == 1 {
                self.single_phone_wid.push(w);
            }
        }
        for w in main_words as WordId..n_words as WordId {
            self.single_phone_wid.push(w);
        }

        Ok(())
    }

    fn insert_word<A: AcousticModel<Hmm = H>>(
        &mut self,
        w: WordId,
        phones: Vec<SsId>,
        ciphones: Vec<CiPhone>,
        am: &A,
    ) {
        let p0 = ciphones[0] as usize;
        let root_idx = if self.first_phone_rchan_map[p0] >= 0 {
            self.first_phone_rchan_map[p0] as usize
        } else {
            let idx = self.roots.len();
            self.roots.push(RootChan {
                ciphone: ciphones[0],
                diphone: phones[0],
                hmm: am.make_hmm(phones[0], ciphones[0], false),
                next: None,
                penult_phn_wid: NO_WID,
            });
            self.first_phone_rchan_map[p0] = idx as i32;
            idx
        };

        let l = phones.len();
        if l == 2 {
            self.homophone_set[w as usize] = self.roots[root_idx].penult_phn_wid;
            self.roots[root_idx].penult_phn_wid = w;
            return;
        }

        // Descend p[1..l-2], appending missing nodes; terminal node is
        // the penultimate phone p[l-2]. `parent` is `None` only while
        // the parent is the root itself.
        let mut parent: Option<NodeId> = None;
        let mut terminal = NodeId(u32::MAX);

        for i in 1..l - 1 {
            let ssid = phones[i];
            let head = match parent {
                None => self.roots[root_idx].next,
                Some(p) => self.node(p).next,
            };
            let node_id = match self.find_sibling(head, ssid) {
                Some(id) => id,
                None => {
                    let new_id = self.alloc_node(Chan {
                        ciphone: ciphones[i],
                        ssid,
                        hmm: am.make_hmm(ssid, ciphones[i], false),
                        next: None,
                        alt: None,
                        penult_phn_wid: NO_WID,
                    });
                    self.append_sibling(head, new_id);
                    match parent {
                        None if head.is_none() => self.roots[root_idx].next = Some(new_id),
                        Some(p) if head.is_none() => self.node_mut(p).next = Some(new_id),
                        _ => {}
                    }
                    new_id
                }
            };
            terminal = node_id;
            parent = Some(node_id);
        }

        let head = self.node(terminal).penult_phn_wid;
        self.homophone_set[w as usize] = head;
        self.node_mut(terminal).penult_phn_wid = w;
    }

    fn find_sibling(&self, head: Option<NodeId>, ssid: SsId) -> Option<NodeId> {
        let mut cur = head;
        while let Some(id) = cur {
            if self.node(id).ssid == ssid {
                return Some(id);
            }
            cur = self.node(id).alt;
        }
        None
    }

    /// Append `new_id` to the tail of the sibling chain starting at
    /// `head`, if `head` is non-empty; a `head == None` caller is
    /// responsible for wiring its own parent-to-child link instead.
    fn append_sibling(&mut self, head: Option<NodeId>, new_id: NodeId) {
        if let Some(first) = head {
            let mut cur = first;
            while let Some(next_alt) = self.node(cur).alt {
                cur = next_alt;
            }
            self.node_mut(cur).alt = Some(new_id);
        }
    }

    /// Allocate or extend word `w`'s right-context leaf chain to match
    /// `rc_ssids` (0-terminated list already trimmed to real ids),
    /// reusing any prefix whose ssids already match (spec §4.8).
    pub fn alloc_all_rc<A: AcousticModel<Hmm = H>>(
        &mut self,
        w: WordId,
        rc_ssids: &[SsId],
        last_ciphone: CiPhone,
        am: &A,
    ) {
        let mut existing = self.word_chan[w as usize];
        let mut prev: Option<NodeId> = None;
        let mut head: Option<NodeId> = None;

        for (rc_id, &ssid) in rc_ssids.iter().enumerate() {
            let node_id = match existing {
                Some(id) if self.leaf(id).rc_id == rc_id => {
                    existing = self.leaf(id).next;
                    id
                }
                _ => self.alloc_leaf(Leaf {
                    ciphone: last_ciphone,
                    hmm: am.make_hmm(ssid, last_ciphone, false),
                    rc_id,
                    next: None,
                }),
            };
            if head.is_none() {
                head = Some(node_id);
            }
            if let Some(p) = prev {
                self.leaf_mut(p).next = Some(node_id);
            }
            prev = Some(node_id);
        }
        if let Some(p) = prev {
            self.leaf_mut(p).next = None;
        }
        self.word_chan[w as usize] = head;
    }

    /// Release word `w`'s entire leaf chain back to the free list.
    pub fn free_all_rc(&mut self, w: WordId) {
        let mut cur = self.word_chan[w as usize];
        while let Some(id) = cur {
            cur = self.leaf(id).next;
            self.free_leaves.push(id);
        }
        self.word_chan[w as usize] = None;
    }

    pub fn leaf_hmm(&self, id: NodeId) -> &H {
        &self.leaf(id).hmm
    }

    pub fn leaf_hmm_mut(&mut self, id: NodeId) -> &mut H {
        &mut self.leaf_mut(id).hmm
    }

    pub fn leaf_next(&self, id: NodeId) -> Option<NodeId> {
        self.leaf(id).next
    }

    pub fn set_leaf_next(&mut self, id: NodeId, next: Option<NodeId>) {
        self.leaf_mut(id).next = next;
    }

    /// Return a single leaf node to the pool, independent of whatever
    /// chain it used to belong to. Caller must have already unlinked it.
    pub fn release_leaf(&mut self, id: NodeId) {
        self.free_leaves.push(id);
    }

    pub fn leaf_rc_id(&self, id: NodeId) -> usize {
        self.leaf(id).rc_id
    }

    pub fn node_hmm(&self, id: NodeId) -> &H {
        &self.node(id).hmm
    }

    pub fn node_hmm_mut(&mut self, id: NodeId) -> &mut H {
        &mut self.node_mut(id).hmm
    }

    pub fn node_next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    pub fn node_alt(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).alt
    }

    pub fn node_penult_wid(&self, id: NodeId) -> WordId {
        self.node(id).penult_phn_wid
    }

    pub fn node_ciphone(&self, id: NodeId) -> CiPhone {
        self.node(id).ciphone
    }
}

/// Maps a word id to the next word sharing its tree path, or `None`.
pub fn homophones(set: &[WordId], start: WordId) -> impl Iterator<Item = WordId> + '_ {
    let mut cur = start;
    std::iter::from_fn(move || {
        if cur == NO_WID {
            None
        } else {
            let w = cur;
            cur = set[w as usize];
            Some(w)
        }
    })
}
