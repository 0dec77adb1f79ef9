//! The block arena.
//!
//! Blocks form a tree over parent links; the arena owns every block and
//! hands out integer ids, so the cyclic-looking CFG never holds owning
//! pointers between nodes.

use crate::store::Store;

/// Index of a block in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

/// One CFG node: a single instruction address and the machine state after
/// executing it from the parent's state.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    address: u64,
    parent: Option<BlockId>,
    children: Vec<BlockId>,
    store: Store,
}

impl Block {
    /// This block's id.
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// The instruction address the block carries.
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Parent block, absent for the entry.
    pub const fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    /// Successor blocks created so far.
    pub fn children(&self) -> &[BlockId] {
        &self.children
    }

    /// The post-state of this block's instruction.
    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}

/// Owner of every block created during one exploration.
#[derive(Debug, Clone, Default)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    /// Create a block and link it under its parent.
    pub fn alloc(
        &mut self,
        address: u64,
        parent: Option<BlockId>,
        store: Store,
    ) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            id,
            address,
            parent,
            children: Vec::new(),
            store,
        });
        if let Some(parent) = parent {
            self.blocks[parent.0].children.push(id);
        }
        id
    }

    /// The block behind an id.
    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    /// Walk from a block to the entry along parent links.
    pub fn ancestry(&self, id: BlockId) -> impl Iterator<Item = &Block> + '_ {
        let mut next = Some(id);
        core::iter::from_fn(move || {
            let block = self.get(next?);
            next = block.parent();
            Some(block)
        })
    }

    /// Number of blocks created.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block exists yet.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ExplorerParams;

    #[test]
    fn ancestry_walks_to_the_entry() {
        let mut arena = BlockArena::default();
        let store = Store::entry(&ExplorerParams::default());
        let a = arena.alloc(0x1000, None, store.clone());
        let b = arena.alloc(0x1004, Some(a), store.clone());
        let c = arena.alloc(0x1008, Some(b), store);
        let chain: Vec<u64> =
            arena.ancestry(c).map(Block::address).collect();
        assert_eq!(chain, vec![0x1008, 0x1004, 0x1000]);
        assert_eq!(arena.get(a).children(), &[b]);
    }
}
