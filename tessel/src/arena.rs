//! Reusable scratch buffers, one slot per role.
//!
//! Compositing a frame churns through several large byte buffers (split
//! pieces, composite outputs, interlace staging). The arena keeps one buffer
//! per [`ScratchKey`] alive across composite calls so their capacity is paid
//! for once per process, not once per frame.
//!
//! A slot is checked out with [`BufferArena::take`] and handed back with
//! [`BufferArena::restore`]. Checking out a key that is already live means
//! two concurrent roles were given the same key; that is a programming error
//! in the compositing core and panics outright.

use rustc_hash::FxHashMap;

/// Identifies the role a scratch buffer is used for. Roles that are live at
/// the same time must use distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchKey {
    /// Output pool seed of the pair-composite tree.
    TreeSpare,
    /// Staging buffer of the interlace permutation.
    Interlace,
    /// Output pool seed of the render-transfer image fold.
    TransferFold,
}

#[derive(Default)]
struct Slot {
    buf: Vec<u8>,
    taken: bool,
}

/// A keyed pool of reusable byte buffers. See the module documentation.
#[derive(Default)]
pub struct BufferArena {
    slots: FxHashMap<ScratchKey, Slot>,
}

impl BufferArena {
    /// An arena with no buffers cached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out the buffer of `key`, empty but with its previous capacity.
    ///
    /// # Panics
    /// If the key is already checked out.
    pub fn take(&mut self, key: ScratchKey) -> Vec<u8> {
        let slot = self.slots.entry(key).or_default();
        assert!(!slot.taken, "scratch buffer {key:?} is already in use");
        slot.taken = true;
        core::mem::take(&mut slot.buf)
    }

    /// Returns a buffer to `key`. The buffer does not have to be the one
    /// taken; the slot only caches capacity.
    pub fn restore(&mut self, key: ScratchKey, mut buf: Vec<u8>) {
        buf.clear();
        let slot = self.slots.entry(key).or_default();
        debug_assert!(slot.taken, "restoring a scratch buffer that was not taken");
        slot.taken = false;
        if buf.capacity() > slot.buf.capacity() {
            slot.buf = buf;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_survives_take_restore() {
        let mut arena = BufferArena::new();
        let mut buf = arena.take(ScratchKey::TreeSpare);
        buf.resize(4096, 0);
        arena.restore(ScratchKey::TreeSpare, buf);

        let buf = arena.take(ScratchKey::TreeSpare);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 4096);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let mut arena = BufferArena::new();
        let a = arena.take(ScratchKey::TreeSpare);
        let b = arena.take(ScratchKey::Interlace);
        arena.restore(ScratchKey::TreeSpare, a);
        arena.restore(ScratchKey::Interlace, b);
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn double_take_is_a_key_collision() {
        let mut arena = BufferArena::new();
        let _held = arena.take(ScratchKey::TreeSpare);
        let _clash = arena.take(ScratchKey::TreeSpare);
    }
}
