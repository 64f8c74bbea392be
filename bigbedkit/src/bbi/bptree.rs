/*!
The B+ tree used for the chromosome index and the extra (name) indices.

Keys and values are fixed width. Keys shorter than the tree's key size are
right-padded with zero bytes, both on disk and when probing. Every node is
padded to `block_size` slots, so node sizes only depend on whether the node
is a leaf.
*/

#[cfg(feature = "read")]
use byteordered::{ByteOrdered, Endianness};

#[cfg(feature = "read")]
use crate::bbi::CHROM_TREE_MAGIC;
#[cfg(feature = "read")]
use crate::bbiread::BBIReadError;
#[cfg(feature = "read")]
use crate::utils::file::read_at::ReadAt;

pub(crate) const BPT_HEADER_SIZE: u64 = 32;
pub(crate) const NODE_HEADER_SIZE: u64 = 4;

#[cfg(feature = "read")]
const MAX_DEPTH: usize = 64;

/// An opened on-disk B+ tree.
#[cfg(feature = "read")]
#[derive(Copy, Clone, Debug)]
pub(crate) struct BPlusTree {
    endianness: Endianness,
    pub(crate) block_size: u32,
    pub(crate) key_size: u32,
    pub(crate) val_size: u32,
    pub(crate) item_count: u64,
    root_offset: u64,
}

#[cfg(feature = "read")]
struct BPlusTreeNode {
    is_leaf: bool,
    count: usize,
    key_size: usize,
    item_size: usize,
    data: Vec<u8>,
}

#[cfg(feature = "read")]
impl BPlusTreeNode {
    fn key(&self, index: usize) -> &[u8] {
        let start = index * self.item_size;
        &self.data[start..start + self.key_size]
    }

    fn value(&self, index: usize) -> &[u8] {
        let start = index * self.item_size + self.key_size;
        &self.data[start..start + self.item_size - self.key_size]
    }

    fn child_offset(&self, index: usize, endianness: Endianness) -> Result<u64, BBIReadError> {
        Ok(ByteOrdered::runtime(self.value(index), endianness).read_u64()?)
    }
}

#[cfg(feature = "read")]
impl BPlusTree {
    /// Reads the tree header at `offset`.
    pub(crate) fn open<R: ReadAt + ?Sized>(
        read: &R,
        offset: u64,
        endianness: Endianness,
    ) -> Result<BPlusTree, BBIReadError> {
        let header_data = read.read_vec_at(offset, BPT_HEADER_SIZE as usize)?;
        let mut header = ByteOrdered::runtime(&header_data[..], endianness);
        let magic = header.read_u32()?;
        if magic != CHROM_TREE_MAGIC {
            return Err(BBIReadError::InvalidFile(format!(
                "Invalid B+ tree magic at offset {}",
                offset
            )));
        }
        let block_size = header.read_u32()?;
        let key_size = header.read_u32()?;
        let val_size = header.read_u32()?;
        let item_count = header.read_u64()?;

        if item_count > 0 && block_size == 0 {
            return Err(BBIReadError::InvalidFile(
                "B+ tree has items but a block size of zero".to_owned(),
            ));
        }

        Ok(BPlusTree {
            endianness,
            block_size,
            key_size,
            val_size,
            item_count,
            root_offset: offset + BPT_HEADER_SIZE,
        })
    }

    fn read_node<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        offset: u64,
    ) -> Result<BPlusTreeNode, BBIReadError> {
        let mut header = [0u8; NODE_HEADER_SIZE as usize];
        read.read_at(offset, &mut header)?;
        let is_leaf = match header[0] {
            0 => false,
            1 => true,
            other => {
                return Err(BBIReadError::InvalidFile(format!(
                    "Invalid B+ tree node type {} at offset {}",
                    other, offset
                )))
            }
        };
        let count = usize::from(ByteOrdered::runtime(&header[2..], self.endianness).read_u16()?);
        if count > self.block_size as usize {
            return Err(BBIReadError::InvalidFile(format!(
                "B+ tree node at offset {} has {} items, more than the block size {}",
                offset, count, self.block_size
            )));
        }

        let key_size = self.key_size as usize;
        let item_size = if is_leaf {
            key_size + self.val_size as usize
        } else {
            key_size + 8
        };
        let data = read.read_vec_at(offset + NODE_HEADER_SIZE, count * item_size)?;
        Ok(BPlusTreeNode {
            is_leaf,
            count,
            key_size,
            item_size,
            data,
        })
    }

    /// Pads `key` to the key size. Returns `None` if the key can't be stored in this tree.
    fn probe_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        let key_size = self.key_size as usize;
        if key.len() > key_size {
            return None;
        }
        let mut probe = vec![0u8; key_size];
        probe[..key.len()].copy_from_slice(key);
        Some(probe)
    }

    /// Finds the value stored for `key`, descending a single path.
    pub(crate) fn find<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, BBIReadError> {
        if self.item_count == 0 {
            return Ok(None);
        }
        let probe = match self.probe_key(key) {
            Some(probe) => probe,
            None => return Ok(None),
        };

        let mut offset = self.root_offset;
        for _ in 0..MAX_DEPTH {
            let node = self.read_node(read, offset)?;
            if node.is_leaf {
                let found = (0..node.count)
                    .find(|&i| node.key(i) == &probe[..])
                    .map(|i| node.value(i).to_vec());
                return Ok(found);
            }
            if node.count == 0 {
                return Ok(None);
            }
            let child = (1..node.count)
                .take_while(|&i| node.key(i) <= &probe[..])
                .last()
                .unwrap_or(0);
            offset = node.child_offset(child, self.endianness)?;
        }
        Err(BBIReadError::InvalidFile("B+ tree is too deep".to_owned()))
    }

    /// Calls `found` with the value of every item whose key equals `key`.
    ///
    /// Runs of duplicate keys may cross leaf boundaries, so every child whose
    /// key range `[key(i), key(i + 1)]` contains the probe is visited.
    pub(crate) fn find_all<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        key: &[u8],
        mut found: impl FnMut(&[u8]) -> Result<(), BBIReadError>,
    ) -> Result<(), BBIReadError> {
        if self.item_count == 0 {
            return Ok(());
        }
        let probe = match self.probe_key(key) {
            Some(probe) => probe,
            None => return Ok(()),
        };
        self.find_all_in(read, self.root_offset, &probe, 0, &mut found)
    }

    fn find_all_in<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        offset: u64,
        probe: &[u8],
        depth: usize,
        found: &mut impl FnMut(&[u8]) -> Result<(), BBIReadError>,
    ) -> Result<(), BBIReadError> {
        if depth >= MAX_DEPTH {
            return Err(BBIReadError::InvalidFile("B+ tree is too deep".to_owned()));
        }
        let node = self.read_node(read, offset)?;
        if node.is_leaf {
            for i in 0..node.count {
                if node.key(i) == probe {
                    found(node.value(i))?;
                }
            }
            return Ok(());
        }
        for i in 0..node.count {
            if probe < node.key(i) {
                break;
            }
            let within_next = i + 1 == node.count || probe <= node.key(i + 1);
            if within_next {
                let child = node.child_offset(i, self.endianness)?;
                self.find_all_in(read, child, probe, depth + 1, found)?;
            }
        }
        Ok(())
    }

    /// Visits every leaf item in key order.
    pub(crate) fn traverse<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<(), BBIReadError>,
    ) -> Result<(), BBIReadError> {
        if self.item_count == 0 {
            return Ok(());
        }
        self.traverse_in(read, self.root_offset, 0, &mut visit)
    }

    fn traverse_in<R: ReadAt + ?Sized>(
        &self,
        read: &R,
        offset: u64,
        depth: usize,
        visit: &mut impl FnMut(&[u8], &[u8]) -> Result<(), BBIReadError>,
    ) -> Result<(), BBIReadError> {
        if depth >= MAX_DEPTH {
            return Err(BBIReadError::InvalidFile("B+ tree is too deep".to_owned()));
        }
        let node = self.read_node(read, offset)?;
        for i in 0..node.count {
            if node.is_leaf {
                visit(node.key(i), node.value(i))?;
            } else {
                let child = node.child_offset(i, self.endianness)?;
                self.traverse_in(read, child, depth + 1, visit)?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "write")]
pub(crate) use self::write::build_bptree;

#[cfg(feature = "write")]
mod write {
    use byteorder::{ByteOrder, WriteBytesExt};

    use super::{BPT_HEADER_SIZE, NODE_HEADER_SIZE};
    use crate::bbi::CHROM_TREE_MAGIC;
    use crate::bbiwrite::BBIWriteError;

    fn div_ceil(a: usize, b: usize) -> usize {
        (a + b - 1) / b
    }

    /// Number of levels needed for `item_count` items, counting the leaves.
    pub(super) fn count_levels(block_size: usize, item_count: usize) -> usize {
        let mut levels = 1;
        let mut count = item_count;
        while count > block_size {
            count = div_ceil(count, block_size);
            levels += 1;
        }
        levels
    }

    fn write_padded_key(out: &mut Vec<u8>, key: &[u8], key_size: usize) {
        out.extend_from_slice(key);
        out.resize(out.len() + (key_size - key.len()), 0);
    }

    /// Bulk loads a B+ tree from items already sorted by key.
    ///
    /// `base_offset` is the absolute file offset the returned bytes will be
    /// written at; internal nodes store absolute child offsets.
    pub(crate) fn build_bptree<E: ByteOrder>(
        items: &[(Vec<u8>, Vec<u8>)],
        key_size: u32,
        val_size: u32,
        block_size: u32,
        base_offset: u64,
    ) -> Result<Vec<u8>, BBIWriteError> {
        let bs = block_size as usize;
        let key_len = key_size as usize;
        let val_len = val_size as usize;
        if bs == 0 || bs > usize::from(u16::MAX) || (bs < 2 && items.len() > 1) {
            return Err(BBIWriteError::InvalidInput(format!(
                "Invalid B+ tree block size {} for {} items",
                block_size,
                items.len()
            )));
        }
        for (key, value) in items {
            if key.len() > key_len || value.len() != val_len {
                return Err(BBIWriteError::InvalidInput(format!(
                    "B+ tree item does not fit: key {} bytes (max {}), value {} bytes (expected {})",
                    key.len(),
                    key_len,
                    value.len(),
                    val_len
                )));
            }
        }
        debug_assert!(items.windows(2).all(|w| w[0].0 <= w[1].0));

        let item_count = items.len();
        let index_block_size = NODE_HEADER_SIZE as usize + bs * (key_len + 8);
        let leaf_block_size = NODE_HEADER_SIZE as usize + bs * (key_len + val_len);

        let mut out = Vec::new();
        out.write_u32::<E>(CHROM_TREE_MAGIC)?;
        out.write_u32::<E>(block_size)?;
        out.write_u32::<E>(key_size)?;
        out.write_u32::<E>(val_size)?;
        out.write_u64::<E>(item_count as u64)?;
        out.write_u64::<E>(0)?;

        let levels = count_levels(bs, item_count);
        let mut level_offset = base_offset + BPT_HEADER_SIZE;
        for level in (1..levels).rev() {
            let slot_size_per = bs.pow(level as u32);
            let node_size_per = slot_size_per * bs;
            let node_count = div_ceil(item_count, node_size_per);
            let level_end = level_offset + (node_count * index_block_size) as u64;
            let child_block_size = if level == 1 {
                leaf_block_size
            } else {
                index_block_size
            } as u64;

            let mut next_child = level_end;
            for node_start in (0..item_count).step_by(node_size_per) {
                let count = bs.min(div_ceil(item_count - node_start, slot_size_per));
                out.write_u8(0)?;
                out.write_u8(0)?;
                out.write_u16::<E>(count as u16)?;
                for slot in 0..count {
                    let (key, _) = &items[node_start + slot * slot_size_per];
                    write_padded_key(&mut out, key, key_len);
                    out.write_u64::<E>(next_child)?;
                    next_child += child_block_size;
                }
                out.resize(out.len() + (bs - count) * (key_len + 8), 0);
            }
            level_offset = level_end;
        }

        let mut leaves = items.chunks(bs).peekable();
        if leaves.peek().is_none() {
            out.write_u8(1)?;
            out.write_u8(0)?;
            out.write_u16::<E>(0)?;
            out.resize(out.len() + bs * (key_len + val_len), 0);
        }
        for leaf in leaves {
            out.write_u8(1)?;
            out.write_u8(0)?;
            out.write_u16::<E>(leaf.len() as u16)?;
            for (key, value) in leaf {
                write_padded_key(&mut out, key, key_len);
                out.extend_from_slice(value);
            }
            out.resize(out.len() + (bs - leaf.len()) * (key_len + val_len), 0);
        }

        Ok(out)
    }
}

#[cfg(all(test, feature = "read", feature = "write"))]
mod tests {
    use byteorder::{BigEndian, LittleEndian};
    use byteordered::Endianness;

    use super::write::count_levels;
    use super::*;

    fn items(keys: &[&str]) -> Vec<(Vec<u8>, Vec<u8>)> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| (k.as_bytes().to_vec(), (i as u32).to_le_bytes().to_vec()))
            .collect()
    }

    fn key_size(items: &[(Vec<u8>, Vec<u8>)]) -> u32 {
        items.iter().map(|(k, _)| k.len()).max().unwrap_or(1) as u32
    }

    #[test]
    fn test_count_levels() {
        assert_eq!(count_levels(4, 0), 1);
        assert_eq!(count_levels(4, 4), 1);
        assert_eq!(count_levels(4, 5), 2);
        assert_eq!(count_levels(4, 16), 2);
        assert_eq!(count_levels(4, 17), 3);
        assert_eq!(count_levels(256, 100_000), 3);
    }

    #[test]
    fn test_find_and_traverse() {
        let keys: Vec<String> = (0..50).map(|i| format!("chr{:02}", i)).collect();
        let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        let items = items(&keys);
        for block_size in [2, 3, 7, 50, 256] {
            let base = 100;
            let mut data = vec![0u8; base];
            data.extend(
                build_bptree::<LittleEndian>(&items, key_size(&items), 4, block_size, base as u64)
                    .unwrap(),
            );
            let tree = BPlusTree::open(&data, base as u64, Endianness::Little).unwrap();
            assert_eq!(tree.item_count, 50);

            for (i, key) in keys.iter().enumerate() {
                let value = tree.find(&data, key.as_bytes()).unwrap();
                assert_eq!(value, Some((i as u32).to_le_bytes().to_vec()), "{}", key);
            }
            assert_eq!(tree.find(&data, b"chr").unwrap(), None);
            assert_eq!(tree.find(&data, b"chr99").unwrap(), None);
            assert_eq!(tree.find(&data, b"chr000").unwrap(), None);
            assert_eq!(tree.find(&data, b"a").unwrap(), None);

            let mut seen = vec![];
            tree.traverse(&data, |k, _| {
                seen.push(k.to_vec());
                Ok(())
            })
            .unwrap();
            let expected: Vec<Vec<u8>> = items.iter().map(|(k, _)| k.clone()).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_short_keys_are_padded() {
        let items = items(&["1", "10", "2", "X"]);
        let data = build_bptree::<BigEndian>(&items, 2, 4, 2, 0).unwrap();
        let tree = BPlusTree::open(&data, 0, Endianness::Big).unwrap();
        assert_eq!(tree.key_size, 2);
        assert_eq!(tree.find(&data, b"X").unwrap(), Some(3u32.to_le_bytes().to_vec()));
        assert_eq!(tree.find(&data, b"1").unwrap(), Some(0u32.to_le_bytes().to_vec()));
        assert_eq!(tree.find(&data, b"100").unwrap(), None);

        let mut keys = vec![];
        tree.traverse(&data, |k, _| {
            keys.push(k.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(keys[0], b"1\0");
        assert_eq!(keys[3], b"X\0");
    }

    #[test]
    fn test_empty_tree() {
        let data = build_bptree::<LittleEndian>(&[], 4, 8, 256, 0).unwrap();
        assert_eq!(data.len(), 32 + 4 + 256 * 12);
        let tree = BPlusTree::open(&data, 0, Endianness::Little).unwrap();
        assert_eq!(tree.item_count, 0);
        assert_eq!(tree.find(&data, b"chr1").unwrap(), None);
        let mut count = 0;
        tree.find_all(&data, b"chr1", |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        tree.traverse(&data, |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_bad_magic() {
        let mut data = build_bptree::<LittleEndian>(&items(&["a"]), 1, 4, 2, 0).unwrap();
        data[0] ^= 0xFF;
        assert!(matches!(
            BPlusTree::open(&data, 0, Endianness::Little),
            Err(BBIReadError::InvalidFile(_))
        ));
        // The magic is fine but read in the wrong byte order.
        let data = build_bptree::<LittleEndian>(&items(&["a"]), 1, 4, 2, 0).unwrap();
        assert!(BPlusTree::open(&data, 0, Endianness::Big).is_err());
    }

    #[test]
    fn test_rejects_invalid_items() {
        assert!(build_bptree::<LittleEndian>(&items(&["abc"]), 2, 4, 2, 0).is_err());
        assert!(build_bptree::<LittleEndian>(&items(&["a", "b"]), 1, 4, 1, 0).is_err());
        assert!(build_bptree::<LittleEndian>(&items(&["a"]), 1, 8, 2, 0).is_err());
    }

    /// Duplicate runs of every length are placed at every position, for several
    /// block sizes, so that runs straddle every possible leaf and index split.
    #[test]
    fn test_find_all_duplicates_at_every_split() {
        for block_size in 2..=4u32 {
            for total in 1..=(block_size as usize * block_size as usize * 2 + 1) {
                for run in 1..=total.min(2 * block_size as usize + 1) {
                    for run_start in 0..=(total - run) {
                        let keys: Vec<String> = (0..total)
                            .map(|i| {
                                if i >= run_start && i < run_start + run {
                                    "dup".to_owned()
                                } else if i < run_start {
                                    format!("a{:03}", i)
                                } else {
                                    format!("z{:03}", i)
                                }
                            })
                            .collect();
                        let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                        let items = items(&keys);
                        let data =
                            build_bptree::<LittleEndian>(&items, 4, 4, block_size, 0).unwrap();
                        let tree = BPlusTree::open(&data, 0, Endianness::Little).unwrap();

                        let mut found = vec![];
                        tree.find_all(&data, b"dup", |v| {
                            found.push(u32::from_le_bytes([v[0], v[1], v[2], v[3]]) as usize);
                            Ok(())
                        })
                        .unwrap();
                        found.sort();
                        let expected: Vec<usize> = (run_start..run_start + run).collect();
                        assert_eq!(
                            found, expected,
                            "block_size={} total={} run={} run_start={}",
                            block_size, total, run, run_start
                        );

                        assert!(tree.find(&data, b"dup").unwrap().is_some());
                        let mut none = 0;
                        for probe in [&b"b"[..], b"zzzz", b"dupe"] {
                            tree.find_all(&data, probe, |_| {
                                none += 1;
                                Ok(())
                            })
                            .unwrap();
                        }
                        assert_eq!(none, 0);
                    }
                }
            }
        }
    }
}
