//! Reading of the chromosome-interval R-tree ("cir tree") that maps genomic
//! ranges to data blocks.

use byteordered::{ByteOrdered, Endianness};
use smallvec::SmallVec;

use crate::bbi::CIR_TREE_MAGIC;
use crate::bbiread::{BBIReadError, Block};
use crate::utils::file::read_at::ReadAt;

pub(crate) const CIR_TREE_HEADER_SIZE: u64 = 48;
pub(crate) const CIR_TREE_NODE_HEADER_SIZE: u64 = 4;
pub(crate) const CIR_TREE_LEAF_ITEM_SIZE: u64 = 32;
pub(crate) const CIR_TREE_NON_LEAF_ITEM_SIZE: u64 = 24;

const MAX_DEPTH: usize = 64;

#[derive(Copy, Clone, Debug)]
pub(crate) struct CirTreeHeader {
    pub(crate) block_size: u32,
    pub(crate) item_count: u64,
    pub(crate) start_chrom_ix: u32,
    pub(crate) start_base: u32,
    pub(crate) end_chrom_ix: u32,
    pub(crate) end_base: u32,
    pub(crate) end_file_offset: u64,
    pub(crate) items_per_slot: u32,
}

/// A leaf entry: the bounding box of one data block and where it is stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CirTreeLeaf {
    pub(crate) start_chrom_ix: u32,
    pub(crate) start_base: u32,
    pub(crate) end_chrom_ix: u32,
    pub(crate) end_base: u32,
    pub(crate) block: Block,
}

#[derive(Copy, Clone, Debug)]
struct CirTreeNonLeaf {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    node_offset: u64,
}

enum CirTreeNode {
    Leaf(Vec<CirTreeLeaf>),
    NonLeaf(Vec<CirTreeNonLeaf>),
}

/// `[start, end)` on `chrom` overlaps the box `(start_chrom_ix, start_base)-(end_chrom_ix, end_base)`,
/// comparing (chrom, base) pairs lexicographically.
///
/// A degenerate box (only zero-length records at one base) also overlaps a
/// query starting exactly on it, since a query at base 0 can't be padded.
#[inline]
pub(crate) fn overlaps(
    chrom: u32,
    start: u32,
    end: u32,
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
) -> bool {
    let box_start = (start_chrom_ix, start_base);
    let box_end = (end_chrom_ix, end_base);
    let before_end = (chrom, start) < box_end || (box_start == box_end && (chrom, start) == box_end);
    before_end && (chrom, end) > box_start
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct CirTree {
    endianness: Endianness,
    pub(crate) header: CirTreeHeader,
    root_offset: u64,
}

impl CirTree {
    pub(crate) fn open<R: ReadAt + ?Sized>(
        read: &R,
        offset: u64,
        endianness: Endianness,
    ) -> Result<CirTree, BBIReadError> {
        let data = read.read_vec_at(offset, CIR_TREE_HEADER_SIZE as usize)?;
        let mut data = ByteOrdered::runtime(&data[..], endianness);
        let magic = data.read_u32()?;
        if magic != CIR_TREE_MAGIC {
            return Err(BBIReadError::InvalidFile(format!(
                "Invalid R-tree magic at offset {}",
                offset
            )));
        }
        let header = CirTreeHeader {
            block_size: data.read_u32()?,
            item_count: data.read_u64()?,
            start_chrom_ix: data.read_u32()?,
            start_base: data.read_u32()?,
            end_chrom_ix: data.read_u32()?,
            end_base: data.read_u32()?,
            end_file_offset: data.read_u64()?,
            items_per_slot: data.read_u32()?,
        };
        if header.item_count > 0 && header.block_size == 0 {
            return Err(BBIReadError::InvalidFile(
                "R-tree has items but a block size of zero".to_owned(),
            ));
        }
        Ok(CirTree {
            endianness,
            header,
            root_offset: offset + CIR_TREE_HEADER_SIZE,
        })
    }

    fn read_node<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        offset: u64,
    ) -> Result<CirTreeNode, BBIReadError> {
        let mut node_header = [0u8; CIR_TREE_NODE_HEADER_SIZE as usize];
        read.read_at(offset, &mut node_header)?;
        let is_leaf = match node_header[0] {
            0 => false,
            1 => true,
            other => {
                return Err(BBIReadError::InvalidFile(format!(
                    "Invalid R-tree node type {} at offset {}",
                    other, offset
                )))
            }
        };
        let count = ByteOrdered::runtime(&node_header[2..], self.endianness).read_u16()?;
        if u32::from(count) > self.header.block_size {
            return Err(BBIReadError::InvalidFile(format!(
                "R-tree node at offset {} has {} items, more than the block size {}",
                offset, count, self.header.block_size
            )));
        }

        let item_size = if is_leaf {
            CIR_TREE_LEAF_ITEM_SIZE
        } else {
            CIR_TREE_NON_LEAF_ITEM_SIZE
        };
        let bytes = read.read_vec_at(
            offset + CIR_TREE_NODE_HEADER_SIZE,
            usize::from(count) * item_size as usize,
        )?;
        let mut data = ByteOrdered::runtime(&bytes[..], self.endianness);
        if is_leaf {
            let mut leaves = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                leaves.push(CirTreeLeaf {
                    start_chrom_ix: data.read_u32()?,
                    start_base: data.read_u32()?,
                    end_chrom_ix: data.read_u32()?,
                    end_base: data.read_u32()?,
                    block: Block {
                        offset: data.read_u64()?,
                        size: data.read_u64()?,
                    },
                });
            }
            Ok(CirTreeNode::Leaf(leaves))
        } else {
            let mut children = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                children.push(CirTreeNonLeaf {
                    start_chrom_ix: data.read_u32()?,
                    start_base: data.read_u32()?,
                    end_chrom_ix: data.read_u32()?,
                    end_base: data.read_u32()?,
                    node_offset: data.read_u64()?,
                });
            }
            Ok(CirTreeNode::NonLeaf(children))
        }
    }

    /// Finds the blocks whose bounding box overlaps `[start, end)` on `chrom`,
    /// in file order.
    pub(crate) fn search<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        chrom: u32,
        start: u32,
        end: u32,
    ) -> Result<Vec<Block>, BBIReadError> {
        let mut blocks = vec![];
        if self.header.item_count == 0 {
            return Ok(blocks);
        }

        let mut remaining = vec![(self.root_offset, 0usize)];
        while let Some((offset, depth)) = remaining.pop() {
            if depth >= MAX_DEPTH {
                return Err(BBIReadError::InvalidFile("R-tree is too deep".to_owned()));
            }
            match self.read_node(read, offset)? {
                CirTreeNode::Leaf(leaves) => {
                    blocks.extend(
                        leaves
                            .iter()
                            .filter(|l| {
                                overlaps(
                                    chrom,
                                    start,
                                    end,
                                    l.start_chrom_ix,
                                    l.start_base,
                                    l.end_chrom_ix,
                                    l.end_base,
                                )
                            })
                            .map(|l| l.block),
                    );
                }
                CirTreeNode::NonLeaf(children) => {
                    let overlapping: SmallVec<[u64; 4]> = children
                        .iter()
                        .filter(|c| {
                            overlaps(
                                chrom,
                                start,
                                end,
                                c.start_chrom_ix,
                                c.start_base,
                                c.end_chrom_ix,
                                c.end_base,
                            )
                        })
                        .map(|c| c.node_offset)
                        .collect();
                    // Reversed, so that children are visited in file order
                    remaining.extend(overlapping.into_iter().rev().map(|o| (o, depth + 1)));
                }
            }
        }
        Ok(blocks)
    }

    /// Visits every leaf entry, in file order, without any filtering.
    pub(crate) fn traverse_leaves<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        mut visit: impl FnMut(&CirTreeLeaf) -> Result<(), BBIReadError>,
    ) -> Result<(), BBIReadError> {
        if self.header.item_count == 0 {
            return Ok(());
        }
        let mut remaining = vec![(self.root_offset, 0usize)];
        while let Some((offset, depth)) = remaining.pop() {
            if depth >= MAX_DEPTH {
                return Err(BBIReadError::InvalidFile("R-tree is too deep".to_owned()));
            }
            match self.read_node(read, offset)? {
                CirTreeNode::Leaf(leaves) => {
                    for leaf in &leaves {
                        visit(leaf)?;
                    }
                }
                CirTreeNode::NonLeaf(children) => {
                    remaining.extend(children.iter().rev().map(|c| (c.node_offset, depth + 1)));
                }
            }
        }
        Ok(())
    }
}
