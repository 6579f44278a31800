/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Nodes of the fork set and the arena that owns them.
//!
//! Fork items refer to their parents and children through [`ForkItemHandle`]s, which are indices into
//! the [`Arena`] tagged with a generation number. When an item is removed, its slot's generation is
//! bumped, so a stale handle to it can never resolve to whatever item later reuses the slot.

use std::sync::Arc;

use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ForkItemHandle {
    index: u32,
    generation: u32,
}

pub(crate) struct ForkItem {
    pub(crate) block: Arc<Block>,
    pub(crate) parent: Option<ForkItemHandle>,
    pub(crate) children: Vec<ForkItemHandle>,
    pub(crate) main_branch: bool,
}

impl ForkItem {
    pub(crate) fn new(block: Arc<Block>, parent: Option<ForkItemHandle>) -> Self {
        Self {
            block,
            parent,
            children: Vec::new(),
            main_branch: false,
        }
    }
}

/// A copy of the public parts of a fork item, handed out to callers of the fork set.
#[derive(Clone, Debug)]
pub struct ForkItemView {
    pub block: Arc<Block>,
    pub parent: Option<CryptoHash>,
    pub main_branch: bool,
}

impl ForkItemView {
    pub fn id(&self) -> CryptoHash {
        self.block.hash
    }

    pub fn height(&self) -> BlockHeight {
        self.block.height
    }
}

struct Slot {
    generation: u32,
    item: Option<ForkItem>,
}

#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub(crate) fn insert(&mut self, item: ForkItem) -> ForkItemHandle {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.item = Some(item);
                ForkItemHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    item: Some(item),
                });
                ForkItemHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn get(&self, handle: ForkItemHandle) -> Option<&ForkItem> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.item.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: ForkItemHandle) -> Option<&mut ForkItem> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.item.as_mut())
    }

    pub(crate) fn remove(&mut self, handle: ForkItemHandle) -> Option<ForkItem> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let item = slot.item.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(item)
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = ForkItemHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.item.as_ref().map(|_| ForkItemHandle {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.item.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{crypto_primitives::SigningKey, data_types::BlockHeight};

    fn item(height: u64) -> ForkItem {
        let key = SigningKey::from_bytes(&[1u8; 32]);
        let block = Block::new(BlockHeight::new(height), CryptoHash::zero(), 0, Vec::new(), &key);
        ForkItem::new(Arc::new(block), None)
    }

    #[test]
    fn stale_handles_do_not_resolve_to_reused_slots() {
        let mut arena = Arena::default();
        let first = arena.insert(item(1));
        assert!(arena.remove(first).is_some());

        let second = arena.insert(item(2));
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second).map(|item| item.block.height.int()), Some(2));
        assert_eq!(arena.len(), 1);
    }
}
