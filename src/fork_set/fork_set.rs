/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`ForkDag`] of reversible blocks, and the [`ForkSet`] lock that guards it.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, RwLock},
};

use super::{
    fork_choice::{ForkChoice, HighestBlock},
    fork_item::{Arena, ForkItem, ForkItemHandle, ForkItemView},
    synopsis::{synopsis_heights, Synopsis},
    ForkSetError,
};
use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash},
};

/// What changed in the fork set as a result of a [`push_block`](ForkDag::push_block).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushOutcome {
    /// The head before the push.
    pub old_head: CryptoHash,

    /// The head after the push.
    pub new_head: CryptoHash,

    /// Blocks of losing branches pruned because they fell past the retention horizon.
    pub pruned: Vec<CryptoHash>,
}

impl PushOutcome {
    pub fn head_changed(&self) -> bool {
        self.old_head != self.new_head
    }
}

/// A tree of blocks rooted at the oldest retained block.
///
/// The path from the root to the head is the main branch. Every item on it has `main_branch` set.
/// The anchor is the height of the last irreversible block, which is normally the root, but may be
/// one lower than it if the fork set was started from the block after the last irreversible one.
/// Main-branch blocks above the anchor are reversible, and are never pruned.
pub struct ForkDag {
    arena: Arena,
    by_id: HashMap<CryptoHash, ForkItemHandle>,
    by_height: BTreeMap<BlockHeight, Vec<ForkItemHandle>>,
    root: Option<ForkItemHandle>,
    head: Option<ForkItemHandle>,
    anchor: BlockHeight,
    max_size: u64,
    fork_choice: Box<dyn ForkChoice>,
}

impl ForkDag {
    pub fn new(max_size: u64, fork_choice: Box<dyn ForkChoice>) -> Self {
        Self {
            arena: Arena::default(),
            by_id: HashMap::new(),
            by_height: BTreeMap::new(),
            root: None,
            head: None,
            anchor: BlockHeight::zero(),
            max_size,
            fork_choice,
        }
    }

    /* ↓↓↓ Structural updates ↓↓↓ */

    /// Discard every block, then make `block` the sole block, head, and anchor. Returns the hashes of
    /// the discarded blocks.
    pub fn start_block(&mut self, block: Block) -> Vec<CryptoHash> {
        let pruned = self.clear();

        self.anchor = block.height;
        let handle = self.insert(Arc::new(block), None);
        if let Some(item) = self.arena.get_mut(handle) {
            item.main_branch = true;
        }
        self.root = Some(handle);
        self.head = Some(handle);

        pruned
    }

    /// Discard every block and reset the anchor to 0. Returns the hashes of the discarded blocks.
    pub fn clear(&mut self) -> Vec<CryptoHash> {
        let pruned = self.by_id.keys().copied().collect();
        self.arena.clear();
        self.by_id.clear();
        self.by_height.clear();
        self.root = None;
        self.head = None;
        self.anchor = BlockHeight::zero();
        pruned
    }

    /// Link `block` under its parent, then let the fork choice decide whether it becomes the head.
    pub fn push_block(&mut self, block: Block) -> Result<PushOutcome, ForkSetError> {
        if self.by_id.contains_key(&block.hash) {
            return Err(ForkSetError::DuplicateBlock { id: block.hash });
        }
        let parent = self
            .by_id
            .get(&block.previous)
            .copied()
            .filter(|parent| {
                self.arena
                    .get(*parent)
                    .is_some_and(|item| item.block.height + 1 == block.height)
            })
            .ok_or(ForkSetError::UnlinkableBlock {
                id: block.hash,
                previous: block.previous,
            })?;
        let head = self.head.ok_or(ForkSetError::Empty)?;
        let old_head = self.item(head)?.block.hash;

        let block = Arc::new(block);
        let handle = self.insert(block.clone(), Some(parent));
        if let Some(parent_item) = self.arena.get_mut(parent) {
            parent_item.children.push(handle);
        }

        if self.fork_choice.prefer(&block, &self.item(head)?.block) {
            self.set_head_handle(handle)?;
        }
        let pruned = self.prune_to_horizon(Some(head))?;

        Ok(PushOutcome {
            old_head,
            new_head: self.head_item()?.block.hash,
            pruned,
        })
    }

    /// Make the block with hash `id` the head, overriding the fork choice.
    pub fn set_head(&mut self, id: &CryptoHash) -> Result<(), ForkSetError> {
        let handle = self.handle(id)?;
        self.set_head_handle(handle)
    }

    /// Move the head to its parent. The old head stays in the fork set.
    pub fn pop_head(&mut self) -> Result<Arc<Block>, ForkSetError> {
        let head = self.head.ok_or(ForkSetError::Empty)?;
        let item = self.item(head)?;
        let block = item.block.clone();
        let parent = item.parent.ok_or(ForkSetError::CannotPopRoot)?;
        self.set_head_handle(parent)?;
        Ok(block)
    }

    /// Remove the block with hash `id` and all of its descendants. If the head is among them, the
    /// parent of the removed block becomes the head. Returns the hashes of the removed blocks.
    pub fn remove(&mut self, id: &CryptoHash) -> Result<Vec<CryptoHash>, ForkSetError> {
        let handle = self.handle(id)?;
        let parent = self.item(handle)?.parent;
        let subtree = self.subtree(handle);

        let head_removed = self.head.is_some_and(|head| subtree.contains(&head));
        if let Some(parent) = parent.and_then(|parent| self.arena.get_mut(parent)) {
            parent.children.retain(|child| *child != handle);
        }
        let removed = subtree
            .into_iter()
            .filter_map(|handle| self.unlink(handle))
            .collect();

        if parent.is_none() {
            self.root = None;
            self.head = None;
        } else if head_removed {
            self.head = parent;
        }

        Ok(removed)
    }

    /// Set the retention horizon: branches off the main branch whose highest block is more than
    /// `max_size` heights below the head are pruned. The main branch itself is only ever pruned by
    /// [`set_last_irreversible`](Self::set_last_irreversible).
    pub fn set_max_size(&mut self, max_size: u64) -> Result<Vec<CryptoHash>, ForkSetError> {
        self.max_size = max_size;
        self.prune_to_horizon(None)
    }

    /// Record that the main-branch block at `height` is irreversible, and discard every block not
    /// descended from it.
    pub fn set_last_irreversible(
        &mut self,
        height: BlockHeight,
    ) -> Result<Vec<CryptoHash>, ForkSetError> {
        let pruned = match self.root {
            Some(root) if self.item(root)?.block.height < height => {
                let new_root = self
                    .main_branch_handle(height)
                    .ok_or(ForkSetError::HeightNotOnMainBranch { height })?;
                self.re_root(new_root)
            }
            _ => Vec::new(),
        };
        self.anchor = height;
        Ok(pruned)
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub fn fetch_block(&self, id: &CryptoHash) -> Option<Arc<Block>> {
        self.by_id
            .get(id)
            .and_then(|handle| self.arena.get(*handle))
            .map(|item| item.block.clone())
    }

    pub fn fetch_item(&self, id: &CryptoHash) -> Option<ForkItemView> {
        self.by_id.get(id).and_then(|handle| self.view(*handle))
    }

    pub fn fetch_on_main_branch_by_number(&self, height: BlockHeight) -> Option<Arc<Block>> {
        self.main_branch_handle(height)
            .and_then(|handle| self.arena.get(handle))
            .map(|item| item.block.clone())
    }

    /// Get up to `count` consecutive main-branch blocks starting at `start`.
    pub fn fetch_range_on_main_branch_by_number(
        &self,
        start: BlockHeight,
        count: u64,
    ) -> Vec<Arc<Block>> {
        (start.int()..start.int().saturating_add(count))
            .map_while(|height| self.fetch_on_main_branch_by_number(BlockHeight::new(height)))
            .collect()
    }

    pub fn head(&self) -> Option<ForkItemView> {
        self.head.and_then(|handle| self.view(handle))
    }

    pub fn head_height(&self) -> Option<BlockHeight> {
        self.head().map(|head| head.height())
    }

    /// Get the height of the oldest retained block.
    pub fn get_oldest_block_num(&self) -> Option<BlockHeight> {
        self.root
            .and_then(|root| self.arena.get(root))
            .map(|item| item.block.height)
    }

    /// Get the height of the last irreversible block.
    pub fn anchor(&self) -> BlockHeight {
        self.anchor
    }

    pub fn is_known_block(&self, id: &CryptoHash) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn is_on_main_branch(&self, id: &CryptoHash) -> bool {
        self.by_id
            .get(id)
            .and_then(|handle| self.arena.get(*handle))
            .is_some_and(|item| item.main_branch)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Get the branches leading to `first` and `second` from their closest common ancestor. Each
    /// branch is ordered from its tip down, and excludes the common ancestor.
    pub fn fetch_branch_from(
        &self,
        first: &CryptoHash,
        second: &CryptoHash,
    ) -> Result<(Vec<Arc<Block>>, Vec<Arc<Block>>), ForkSetError> {
        let mut first = self.handle(first)?;
        let mut second = self.handle(second)?;
        let mut first_branch = Vec::new();
        let mut second_branch = Vec::new();

        while first != second {
            let first_item = self.item(first)?;
            let second_item = self.item(second)?;
            if first_item.block.height >= second_item.block.height {
                first_branch.push(first_item.block.clone());
                first = first_item.parent.ok_or(ForkSetError::NoCommonAncestor)?;
            } else {
                second_branch.push(second_item.block.clone());
                second = second_item.parent.ok_or(ForkSetError::NoCommonAncestor)?;
            }
        }

        Ok((first_branch, second_branch))
    }

    /// Summarize the main branch from the anchor up to `reference_point`, or up to the head if
    /// `reference_point` is `None`. See [`Synopsis`](super::synopsis) for the spacing used.
    ///
    /// Heights below the oldest retained block are replaced by it, except for the anchor itself,
    /// which is reported through [`Synopsis::need_from_log`].
    pub fn get_blockchain_synopsis(
        &self,
        reference_point: Option<&CryptoHash>,
        count_after: u64,
    ) -> Result<Synopsis, ForkSetError> {
        let reference = match reference_point {
            Some(id) => self
                .by_id
                .get(id)
                .and_then(|handle| self.arena.get(*handle))
                .filter(|item| item.main_branch)
                .map(|item| item.block.height)
                .ok_or(ForkSetError::ReferencePointNotFound { id: *id })?,
            None => self.head_item()?.block.height,
        };
        let oldest = self.get_oldest_block_num().ok_or(ForkSetError::Empty)?;
        let low = self.anchor.int().max(1);

        let mut synopsis = Synopsis::default();
        let mut last_height = None;
        for height in synopsis_heights(low, reference.int(), count_after) {
            let height = if height < oldest.int() {
                if height == low && synopsis.need_from_log.is_none() {
                    synopsis.need_from_log = Some(BlockHeight::new(height));
                    continue;
                }
                oldest.int()
            } else {
                height
            };
            if last_height == Some(height) {
                continue;
            }
            let block = self
                .fetch_on_main_branch_by_number(BlockHeight::new(height))
                .ok_or(ForkSetError::HeightNotOnMainBranch {
                    height: BlockHeight::new(height),
                })?;
            synopsis.ids.push(block.hash);
            last_height = Some(height);
        }

        Ok(synopsis)
    }

    /* ↓↓↓ Internals ↓↓↓ */

    fn insert(&mut self, block: Arc<Block>, parent: Option<ForkItemHandle>) -> ForkItemHandle {
        let id = block.hash;
        let height = block.height;
        let handle = self.arena.insert(ForkItem::new(block, parent));
        self.by_id.insert(id, handle);
        self.by_height.entry(height).or_default().push(handle);
        handle
    }

    /// Remove a single item from the arena and the lookup maps, returning its hash.
    fn unlink(&mut self, handle: ForkItemHandle) -> Option<CryptoHash> {
        let item = self.arena.remove(handle)?;
        self.by_id.remove(&item.block.hash);
        if let Some(handles) = self.by_height.get_mut(&item.block.height) {
            handles.retain(|other| *other != handle);
            if handles.is_empty() {
                self.by_height.remove(&item.block.height);
            }
        }
        Some(item.block.hash)
    }

    fn item(&self, handle: ForkItemHandle) -> Result<&ForkItem, ForkSetError> {
        self.arena.get(handle).ok_or(ForkSetError::DanglingHandle)
    }

    fn head_item(&self) -> Result<&ForkItem, ForkSetError> {
        self.item(self.head.ok_or(ForkSetError::Empty)?)
    }

    fn handle(&self, id: &CryptoHash) -> Result<ForkItemHandle, ForkSetError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or(ForkSetError::UnknownBlock { id: *id })
    }

    fn view(&self, handle: ForkItemHandle) -> Option<ForkItemView> {
        let item = self.arena.get(handle)?;
        Some(ForkItemView {
            block: item.block.clone(),
            parent: item
                .parent
                .and_then(|parent| self.arena.get(parent))
                .map(|parent| parent.block.hash),
            main_branch: item.main_branch,
        })
    }

    fn main_branch_handle(&self, height: BlockHeight) -> Option<ForkItemHandle> {
        self.by_height.get(&height).and_then(|handles| {
            handles
                .iter()
                .copied()
                .find(|handle| self.arena.get(*handle).is_some_and(|item| item.main_branch))
        })
    }

    fn set_head_handle(&mut self, new_head: ForkItemHandle) -> Result<(), ForkSetError> {
        let mut cursor = self.head;
        while let Some(handle) = cursor {
            let item = self.arena.get_mut(handle).ok_or(ForkSetError::DanglingHandle)?;
            item.main_branch = false;
            cursor = item.parent;
        }
        let mut cursor = Some(new_head);
        while let Some(handle) = cursor {
            let item = self.arena.get_mut(handle).ok_or(ForkSetError::DanglingHandle)?;
            item.main_branch = true;
            cursor = item.parent;
        }
        self.head = Some(new_head);
        Ok(())
    }

    fn subtree(&self, handle: ForkItemHandle) -> Vec<ForkItemHandle> {
        let mut subtree = Vec::new();
        let mut stack = vec![handle];
        while let Some(handle) = stack.pop() {
            if let Some(item) = self.arena.get(handle) {
                stack.extend(item.children.iter().copied());
                subtree.push(handle);
            }
        }
        subtree
    }

    /// Make `new_root` the root, discarding every item not descended from it.
    fn re_root(&mut self, new_root: ForkItemHandle) -> Vec<CryptoHash> {
        let keep: HashSet<ForkItemHandle> = self.subtree(new_root).into_iter().collect();
        let discard: Vec<ForkItemHandle> = self
            .arena
            .handles()
            .filter(|handle| !keep.contains(handle))
            .collect();
        let pruned = discard
            .into_iter()
            .filter_map(|handle| self.unlink(handle))
            .collect();
        if let Some(root) = self.arena.get_mut(new_root) {
            root.parent = None;
        }
        self.root = Some(new_root);
        pruned
    }

    /// Remove every branch off the main branch whose highest block is below the retention horizon,
    /// except the branch containing `keep`.
    fn prune_to_horizon(
        &mut self,
        keep: Option<ForkItemHandle>,
    ) -> Result<Vec<CryptoHash>, ForkSetError> {
        let head = match self.head {
            Some(head) => head,
            None => return Ok(Vec::new()),
        };
        let cutoff = self.item(head)?.block.height.int().saturating_sub(self.max_size);

        let branch_roots: Vec<ForkItemHandle> = self
            .arena
            .handles()
            .filter(|handle| {
                self.arena.get(*handle).is_some_and(|item| {
                    !item.main_branch
                        && item
                            .parent
                            .and_then(|parent| self.arena.get(parent))
                            .is_some_and(|parent| parent.main_branch)
                })
            })
            .collect();

        let mut pruned = Vec::new();
        for branch_root in branch_roots {
            let branch = self.subtree(branch_root);
            if keep.is_some_and(|keep| branch.contains(&keep)) {
                continue;
            }
            let tip = branch
                .iter()
                .filter_map(|handle| self.arena.get(*handle))
                .map(|item| item.block.height.int())
                .max()
                .unwrap_or_default();
            if tip < cutoff {
                let id = self.item(branch_root)?.block.hash;
                pruned.extend(self.remove(&id)?);
            }
        }
        Ok(pruned)
    }
}

/// The fork set: a [`ForkDag`] behind its own read/write lock.
///
/// Operations that need a consistent view across several queries should run them all inside one
/// [`with_read_lock`](Self::with_read_lock) call.
pub struct ForkSet(RwLock<ForkDag>);

impl ForkSet {
    /// Create an empty fork set with the given retention horizon and the [`HighestBlock`] fork choice.
    pub fn new(max_size: u64) -> Self {
        Self::with_fork_choice(max_size, Box::new(HighestBlock))
    }

    pub fn with_fork_choice(max_size: u64, fork_choice: Box<dyn ForkChoice>) -> Self {
        Self(RwLock::new(ForkDag::new(max_size, fork_choice)))
    }

    pub fn with_read_lock<T>(&self, f: impl FnOnce(&ForkDag) -> T) -> Result<T, ForkSetError> {
        let dag = self.0.read().map_err(|_| ForkSetError::LockPoisoned)?;
        Ok(f(&dag))
    }

    pub fn with_write_lock<T>(&self, f: impl FnOnce(&mut ForkDag) -> T) -> Result<T, ForkSetError> {
        let mut dag = self.0.write().map_err(|_| ForkSetError::LockPoisoned)?;
        Ok(f(&mut dag))
    }

    pub fn start_block(&self, block: Block) -> Result<Vec<CryptoHash>, ForkSetError> {
        self.with_write_lock(|dag| dag.start_block(block))
    }

    pub fn push_block(&self, block: Block) -> Result<PushOutcome, ForkSetError> {
        self.with_write_lock(|dag| dag.push_block(block))?
    }

    pub fn fetch_block(&self, id: &CryptoHash) -> Result<Option<Arc<Block>>, ForkSetError> {
        self.with_read_lock(|dag| dag.fetch_block(id))
    }

    pub fn fetch_on_main_branch_by_number(
        &self,
        height: BlockHeight,
    ) -> Result<Option<Arc<Block>>, ForkSetError> {
        self.with_read_lock(|dag| dag.fetch_on_main_branch_by_number(height))
    }

    pub fn fetch_range_on_main_branch_by_number(
        &self,
        start: BlockHeight,
        count: u64,
    ) -> Result<Vec<Arc<Block>>, ForkSetError> {
        self.with_read_lock(|dag| dag.fetch_range_on_main_branch_by_number(start, count))
    }

    pub fn head(&self) -> Result<Option<ForkItemView>, ForkSetError> {
        self.with_read_lock(|dag| dag.head())
    }

    pub fn get_oldest_block_num(&self) -> Result<Option<BlockHeight>, ForkSetError> {
        self.with_read_lock(|dag| dag.get_oldest_block_num())
    }

    pub fn get_blockchain_synopsis(
        &self,
        reference_point: Option<&CryptoHash>,
        count_after: u64,
    ) -> Result<Synopsis, ForkSetError> {
        self.with_read_lock(|dag| dag.get_blockchain_synopsis(reference_point, count_after))?
    }

    pub fn is_known_block(&self, id: &CryptoHash) -> Result<bool, ForkSetError> {
        self.with_read_lock(|dag| dag.is_known_block(id))
    }
}
