use std::fmt;

use hashbrown::HashMap;
use tracing::trace;

use crate::frontend::DeclIndex;

/// Minimum non-zero gap between two neighboring atoms. A gap of one byte
/// cannot hold the two-byte line-program no-op, so placement never produces
/// one.
pub(crate) const MIN_NOP_SIZE: u32 = 2;

const IDEAL_FACTOR: u32 = 3;

/// Over-allocation policy for freshly placed atoms: a third of slack so the
/// common small edit grows in place instead of relocating.
pub(crate) fn pad_to_ideal(len: u32) -> u32 {
    len + len / IDEAL_FACTOR
}

/// New-type'd index into an atom pool. Indices are stable for the lifetime of
/// the emitter; offsets are not.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub(crate) struct AtomIndex(u32);

impl fmt::Debug for AtomIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomIndex({})", self.0)
    }
}

/// A contiguous, relocatable region of one debug section owned by a single
/// declaration.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Atom {
    /// Byte offset within the owning section. Invalidated by any placement.
    pub(crate) off: u32,
    /// Payload length, excluding trailing padding.
    pub(crate) len: u32,
    pub(crate) prev: Option<AtomIndex>,
    pub(crate) next: Option<AtomIndex>,
}

/// What `place` did with the atom, so the caller knows which file ranges to
/// rewrite.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Placement {
    /// The atom kept its offset (first placement, tail growth, or an edit
    /// that still fits its slot).
    InPlace,
    /// The atom outgrew its slot and moved to the lane tail. The vacated
    /// range `[old_off, old_off + pad_len)` must be overwritten with the
    /// lane's padding bytes.
    Moved { old_off: u32, pad_len: u32 },
}

/// One lane of atoms: a flat arena of nodes threaded into an offset-ordered
/// doubly-linked list, plus the declaration map and the free list.
///
/// The arena-and-indices representation is deliberate: atoms are moved by
/// grow operations, and indices stay valid across moves where references
/// would not.
pub(crate) struct AtomPool {
    atoms: Vec<Atom>,
    first: Option<AtomIndex>,
    last: Option<AtomIndex>,
    free_list: Vec<AtomIndex>,
    decls: HashMap<DeclIndex, AtomIndex>,
}

impl AtomPool {
    pub(crate) fn new() -> Self {
        Self {
            atoms: Vec::new(),
            first: None,
            last: None,
            free_list: Vec::new(),
            decls: HashMap::new(),
        }
    }

    /// Appends a zero-initialized atom, not yet linked into the lane.
    pub(crate) fn create(&mut self) -> AtomIndex {
        let index = AtomIndex(self.atoms.len().try_into().expect("atom count larger than u32"));
        self.atoms.push(Atom::default());
        index
    }

    pub(crate) fn get_or_create_for_decl(&mut self, decl: DeclIndex) -> AtomIndex {
        if let Some(index) = self.decls.get(&decl) {
            return *index;
        }
        let index = self.create();
        self.decls.insert(decl, index);
        index
    }

    pub(crate) fn for_decl(&self, decl: DeclIndex) -> Option<AtomIndex> {
        self.decls.get(&decl).copied()
    }

    pub(crate) fn get(&self, index: AtomIndex) -> &Atom {
        &self.atoms[index.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, index: AtomIndex) -> &mut Atom {
        &mut self.atoms[index.0 as usize]
    }

    pub(crate) fn first(&self) -> Option<AtomIndex> {
        self.first
    }

    pub(crate) fn last(&self) -> Option<AtomIndex> {
        self.last
    }

    /// End offset of the lane's payload, if any atom has been placed.
    pub(crate) fn end(&self) -> Option<u32> {
        self.last.map(|index| {
            let last = self.get(index);
            last.off + last.len
        })
    }

    /// Adds `delta` to every atom offset. Used when the section prologue
    /// outgrows the space reserved before the first atom.
    pub(crate) fn shift(&mut self, delta: u32) {
        for atom in &mut self.atoms {
            atom.off += delta;
        }
    }

    /// Places an atom whose payload was just finalized at `new_len` bytes.
    ///
    /// `header_bytes` is the section prologue size reserved before the first
    /// atom. Returns whether the atom stayed put or vacated a range.
    pub(crate) fn place(&mut self, index: AtomIndex, new_len: u32, header_bytes: u32) -> Placement {
        self.get_mut(index).len = new_len;

        let Some(last_index) = self.last else {
            // First atom in this lane.
            self.first = Some(index);
            self.last = Some(index);
            self.get_mut(index).off = pad_to_ideal(header_bytes);
            return Placement::InPlace;
        };

        if last_index == index {
            // Tail atom: only the section end moves.
            return Placement::InPlace;
        }

        let atom = *self.get(index);
        if let Some(next_index) = atom.next {
            let next_off = self.get(next_index).off;
            if atom.off + new_len + MIN_NOP_SIZE <= next_off {
                return Placement::InPlace;
            }

            // The atom outgrew its slot; unlink it and move it to the tail.
            // The predecessor keeps the vacated padding and goes on the free
            // list; placement itself always appends, it does not reuse.
            if let Some(prev_index) = atom.prev {
                if !self.free_list.contains(&prev_index) {
                    self.free_list.push(prev_index);
                }
                self.get_mut(prev_index).next = Some(next_index);
            } else {
                self.first = Some(next_index);
            }
            self.get_mut(next_index).prev = atom.prev;

            self.append_at_tail(index, last_index);
            trace!(?index, old_off = atom.off, new_off = self.get(index).off, "atom moved to tail");
            Placement::Moved { old_off: atom.off, pad_len: next_off - atom.off }
        } else if atom.prev.is_none() {
            // Never linked: append behind the current tail.
            self.append_at_tail(index, last_index);
            Placement::InPlace
        } else {
            unreachable!("linked atom with no successor must be the lane tail");
        }
    }

    fn append_at_tail(&mut self, index: AtomIndex, last_index: AtomIndex) {
        let last = self.get(last_index);
        let off = last.off + pad_to_ideal(last.len);
        self.get_mut(last_index).next = Some(index);
        let atom = self.get_mut(index);
        atom.prev = Some(last_index);
        atom.next = None;
        atom.off = off;
        self.last = Some(index);
    }

    /// Unlinks the declaration's atom from the lane, recording its
    /// predecessor on the free list. The vacated bytes are left behind; they
    /// remain well-formed section contents.
    pub(crate) fn free(&mut self, decl: DeclIndex) -> Option<AtomIndex> {
        let index = self.decls.remove(&decl)?;
        if let Some(pos) = self.free_list.iter().position(|&i| i == index) {
            self.free_list.swap_remove(pos);
        }

        let atom = *self.get(index);
        if self.last == Some(index) {
            self.last = atom.prev;
        }
        if self.first == Some(index) {
            self.first = atom.next;
        }
        if let Some(prev_index) = atom.prev {
            self.get_mut(prev_index).next = atom.next;
            if !self.free_list.contains(&prev_index) {
                self.free_list.push(prev_index);
            }
        }
        if let Some(next_index) = atom.next {
            self.get_mut(next_index).prev = atom.prev;
        }

        let atom = self.get_mut(index);
        atom.prev = None;
        atom.next = None;
        trace!(?decl, ?index, "freed atom");
        Some(index)
    }

    #[cfg(test)]
    pub(crate) fn free_list(&self) -> &[AtomIndex] {
        &self.free_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariants(pool: &AtomPool) {
        let mut cursor = pool.first();
        let mut prev: Option<AtomIndex> = None;
        while let Some(index) = cursor {
            let atom = pool.get(index);
            assert_eq!(atom.prev, prev);
            if let Some(next_index) = atom.next {
                let next = pool.get(next_index);
                assert!(
                    atom.off + atom.len + MIN_NOP_SIZE <= next.off,
                    "atom {index:?} overlaps its successor"
                );
            } else {
                assert_eq!(pool.last(), Some(index));
            }
            prev = cursor;
            cursor = atom.next;
        }
    }

    #[test]
    fn pad_to_ideal_is_monotone() {
        let mut previous = 0;
        for len in 0..4096 {
            let padded = pad_to_ideal(len);
            assert!(padded >= len);
            assert!(padded >= previous);
            previous = padded;
        }
    }

    #[test]
    fn first_atom_lands_past_the_header() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(0));
        assert_eq!(pool.place(a, 40, 120), Placement::InPlace);
        assert_eq!(pool.get(a).off, pad_to_ideal(120));
        assert_eq!(pool.first(), Some(a));
        assert_eq!(pool.last(), Some(a));
        check_invariants(&pool);
    }

    #[test]
    fn appended_atoms_stay_offset_ordered() {
        let mut pool = AtomPool::new();
        let mut atoms = Vec::new();
        for decl in 0..8 {
            let index = pool.get_or_create_for_decl(DeclIndex(decl));
            pool.place(index, 30 + decl * 7, 120);
            atoms.push(index);
        }
        check_invariants(&pool);
        for pair in atoms.windows(2) {
            assert!(pool.get(pair[0]).off < pool.get(pair[1]).off);
        }
    }

    #[test]
    fn tail_atom_grows_in_place() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(0));
        pool.place(a, 40, 120);
        let off = pool.get(a).off;
        assert_eq!(pool.place(a, 90, 120), Placement::InPlace);
        assert_eq!(pool.get(a).off, off);
        check_invariants(&pool);
    }

    #[test]
    fn middle_atom_grows_within_its_slot() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(0));
        let b = pool.get_or_create_for_decl(DeclIndex(1));
        pool.place(a, 30, 120);
        pool.place(b, 30, 120);
        let offsets = (pool.get(a).off, pool.get(b).off);
        // 30 bytes pad to 40, so up to 38 bytes still fit in front of b.
        assert_eq!(pool.place(a, 38, 120), Placement::InPlace);
        assert_eq!((pool.get(a).off, pool.get(b).off), offsets);
        check_invariants(&pool);
    }

    #[test]
    fn outgrown_atom_moves_to_the_tail() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(0));
        let b = pool.get_or_create_for_decl(DeclIndex(1));
        let c = pool.get_or_create_for_decl(DeclIndex(2));
        pool.place(a, 30, 120);
        pool.place(b, 30, 120);
        pool.place(c, 30, 120);
        let old_b = *pool.get(b);
        let old_c_off = pool.get(c).off;

        let placement = pool.place(b, 120, 120);
        assert_eq!(
            placement,
            Placement::Moved { old_off: old_b.off, pad_len: old_c_off - old_b.off }
        );
        assert_eq!(pool.last(), Some(b));
        assert!(pool.get(b).off > old_c_off);
        // The predecessor of the moved atom owns reclaimable padding now.
        assert_eq!(pool.free_list(), &[a]);
        // Untouched atoms keep their offsets.
        assert_eq!(pool.get(a).off, pad_to_ideal(120));
        assert_eq!(pool.get(c).off, old_c_off);
        check_invariants(&pool);
    }

    #[test]
    fn moving_the_head_updates_the_first_cursor() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(0));
        let b = pool.get_or_create_for_decl(DeclIndex(1));
        pool.place(a, 30, 120);
        pool.place(b, 30, 120);

        assert!(matches!(pool.place(a, 200, 120), Placement::Moved { .. }));
        assert_eq!(pool.first(), Some(b));
        assert_eq!(pool.last(), Some(a));
        assert!(pool.free_list().is_empty());
        check_invariants(&pool);
    }

    #[test]
    fn free_unlinks_and_records_the_predecessor() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(0));
        let b = pool.get_or_create_for_decl(DeclIndex(1));
        let c = pool.get_or_create_for_decl(DeclIndex(2));
        pool.place(a, 30, 120);
        pool.place(b, 30, 120);
        pool.place(c, 30, 120);

        pool.free(DeclIndex(1));
        assert_eq!(pool.get(a).next, Some(c));
        assert_eq!(pool.get(c).prev, Some(a));
        assert_eq!(pool.free_list(), &[a]);
        assert_eq!(pool.for_decl(DeclIndex(1)), None);
        check_invariants(&pool);

        pool.free(DeclIndex(0));
        assert_eq!(pool.first(), Some(c));
        pool.free(DeclIndex(2));
        assert_eq!(pool.first(), None);
        assert_eq!(pool.last(), None);
    }

    #[test]
    fn atom_indices_survive_moves() {
        let mut pool = AtomPool::new();
        let a = pool.get_or_create_for_decl(DeclIndex(7));
        pool.place(a, 30, 120);
        let b = pool.get_or_create_for_decl(DeclIndex(8));
        pool.place(b, 30, 120);
        pool.place(a, 500, 120);
        assert_eq!(pool.for_decl(DeclIndex(7)), Some(a));
        assert_eq!(pool.for_decl(DeclIndex(8)), Some(b));
    }
}
