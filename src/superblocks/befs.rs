//! BeOS / Haiku BFS.
//!
//! The volume id lives either in the root directory's small-data area or
//! as a `be:volume_id` attribute, which means walking the attribute
//! directory's B+tree.

use super::{Findings, Format, Outcome, until_nul};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::{Endianness, Usage};
use crate::Result;

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "befs",
    Usage::Filesystem,
    &[
        Magic::at(b"BFS1", NAME_LEN),
        Magic::at(b"1SFB", NAME_LEN),
        Magic::at(b"BFS1", 0x200 + NAME_LEN),
        Magic::at(b"1SFB", 0x200 + NAME_LEN),
    ],
    Format::Befs,
)
.min_size(1440 * 1024);

const NAME_LEN: u64 = 32;
const SUPERBLOCK_SIZE: u64 = 164;

const SB_MAGIC1: u32 = 0x4246_5331;
const SB_MAGIC2: u32 = 0xdd12_1031;
const SB_MAGIC3: u32 = 0x15b6_830e;
const SB_BYTE_ORDER: u32 = 0x4249_4745;
const INODE_MAGIC: u32 = 0x3bbe_0ad9;
const BPLUSTREE_MAGIC: u32 = 0x69f6_c2e8;
const BPLUSTREE_NULL: i64 = -1;
const UINT64_TYPE: u32 = 0x554c_4c47;

const VOLUME_ID_KEY: &[u8] = b"be:volume_id";
const VOLUME_ID_SIZE: u16 = 8;

const BLOCK_RUN_SIZE: usize = 8;
const DIRECT_RUNS: usize = 12;
const INODE_SIZE: usize = 232;
const SMALL_DATA_HEADER: usize = 8;
const TREE_HEADER_SIZE: u32 = 40;
const TREE_NODE_HEADER: usize = 28;
const MAX_TREE_DEPTH: usize = 100;

/// Left shift that refuses to drop bits.
fn shl_exact(v: u64, shift: u32) -> Option<u64> {
    v.checked_shl(shift).filter(|r| r >> shift == v)
}

/// Extent address: allocation group, first block within it, block count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BlockRun {
    group: i32,
    start: u16,
    len: u16,
}

impl BlockRun {
    fn parse(f: &Fields<'_>, off: usize) -> Option<Self> {
        Some(Self {
            group: f.i32(off)?,
            start: f.u16(off + 4)?,
            len: f.u16(off + 6)?,
        })
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
struct DataStream {
    direct: [BlockRun; DIRECT_RUNS],
    max_direct_range: i64,
    indirect: BlockRun,
    max_indirect_range: i64,
    double_indirect: BlockRun,
    max_double_indirect_range: i64,
    size: i64,
}

impl DataStream {
    fn parse(f: &Fields<'_>, off: usize) -> Option<Self> {
        let mut direct = [BlockRun::default(); DIRECT_RUNS];
        for (i, run) in direct.iter_mut().enumerate() {
            *run = BlockRun::parse(f, off + i * BLOCK_RUN_SIZE)?;
        }
        let i64_at = |o: usize| f.u64(off + o).map(|v| v as i64);
        Some(Self {
            direct,
            max_direct_range: i64_at(96)?,
            indirect: BlockRun::parse(f, off + 104)?,
            max_indirect_range: i64_at(112)?,
            double_indirect: BlockRun::parse(f, off + 120)?,
            max_double_indirect_range: i64_at(128)?,
            size: i64_at(136)?,
        })
    }
}

#[derive(Debug, Clone)]
struct Inode {
    magic: u32,
    attributes: BlockRun,
    kind: u32,
    inode_size: u32,
    data: DataStream,
    /// Everything after the fixed inode, where small attributes live.
    small_data: Vec<u8>,
}

impl Inode {
    fn parse(buf: &[u8], order: Endianness) -> Option<Self> {
        let f = Fields::new(buf, order);
        Some(Self {
            magic: f.u32(0)?,
            attributes: BlockRun::parse(&f, 52)?,
            kind: f.u32(60)?,
            inode_size: f.u32(64)?,
            data: DataStream::parse(&f, 72)?,
            small_data: buf.get(INODE_SIZE..)?.to_vec(),
        })
    }

    fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }
}

#[derive(Debug, Clone)]
struct Superblock {
    order: Endianness,
    name: [u8; 32],
    block_size: u32,
    block_shift: u32,
    ag_shift: u32,
    root_dir: BlockRun,
}

impl Superblock {
    fn parse(buf: &[u8]) -> Option<Self> {
        let magics = |f: &Fields<'_>| {
            f.u32(32) == Some(SB_MAGIC1)
                && f.u32(68) == Some(SB_MAGIC2)
                && f.u32(112) == Some(SB_MAGIC3)
                && f.u32(36) == Some(SB_BYTE_ORDER)
        };
        let order = [Endianness::Little, Endianness::Big]
            .into_iter()
            .find(|&o| magics(&Fields::new(buf, o)))?;
        let f = Fields::new(buf, order);
        Some(Self {
            order,
            name: f.array(0)?,
            block_size: f.u32(40)?,
            block_shift: f.u32(44)?,
            ag_shift: f.u32(76)?,
            root_dir: BlockRun::parse(&f, 116)?,
        })
    }

    fn is_valid(&self) -> bool {
        (10..=13).contains(&self.block_shift)
            && self.block_size == 1 << self.block_shift
            && self.ag_shift <= 64
    }

    fn run_bytes(&self, run: &BlockRun) -> u64 {
        u64::from(run.len) << self.block_shift
    }

    fn run_offset(&self, run: &BlockRun) -> Option<u64> {
        let group = u64::try_from(run.group).ok()?;
        let base = shl_exact(shl_exact(group, self.ag_shift)?, self.block_shift)?;
        base.checked_add(u64::from(run.start) << self.block_shift)
    }

    /// The whole extent described by `run`.
    fn read_run(&self, ctx: &mut ProbeContext<'_>, run: &BlockRun) -> Result<Option<Vec<u8>>> {
        let Some(offset) = self.run_offset(run) else {
            return Ok(None);
        };
        Ok(ctx.try_fetch(offset, self.run_bytes(run))?.map(<[u8]>::to_vec))
    }

    /// `len` bytes at `start` within the extent, refused when they would
    /// spill past it.
    fn read_in_run(
        &self,
        ctx: &mut ProbeContext<'_>,
        run: &BlockRun,
        start: i64,
        len: u32,
    ) -> Result<Option<Vec<u8>>> {
        let Ok(start) = u64::try_from(start) else {
            return Ok(None);
        };
        if start + u64::from(len) > self.run_bytes(run) {
            return Ok(None);
        }
        let Some(offset) = self.run_offset(run).and_then(|o| o.checked_add(start)) else {
            return Ok(None);
        };
        Ok(ctx.try_fetch(offset, u64::from(len))?.map(<[u8]>::to_vec))
    }

    fn runs(&self, buf: &[u8]) -> Vec<BlockRun> {
        let f = Fields::new(buf, self.order);
        (0..buf.len() / BLOCK_RUN_SIZE)
            .filter_map(|i| BlockRun::parse(&f, i * BLOCK_RUN_SIZE))
            .collect()
    }

    /// Reads `len` bytes at logical position `start` of a data stream,
    /// following direct, indirect and double-indirect runs.
    fn read_stream(
        &self,
        ctx: &mut ProbeContext<'_>,
        ds: &DataStream,
        mut start: i64,
        len: u32,
    ) -> Result<Option<Vec<u8>>> {
        if start < ds.max_direct_range {
            for run in &ds.direct {
                let run_len = self.run_bytes(run) as i64;
                if start < run_len {
                    return self.read_in_run(ctx, run, start, len);
                }
                start -= run_len;
            }
            return Ok(None);
        }
        if start < ds.max_indirect_range {
            start -= ds.max_direct_range;
            if start < 0 {
                return Ok(None);
            }
            let Some(table) = self.read_run(ctx, &ds.indirect)? else {
                return Ok(None);
            };
            for run in self.runs(&table) {
                let run_len = self.run_bytes(&run) as i64;
                if start < run_len {
                    return self.read_in_run(ctx, &run, start, len);
                }
                start -= run_len;
            }
            return Ok(None);
        }
        if start < ds.max_double_indirect_range {
            start -= ds.max_indirect_range;
            if start < 0 {
                return Ok(None);
            }
            let run_size = self.run_bytes(&ds.double_indirect) as i64;
            let per_run = run_size / BLOCK_RUN_SIZE as i64;
            if per_run == 0 {
                return Ok(None);
            }
            let span = per_run * run_size;
            let outer = start / span;
            let inner = (start % span) / run_size;
            let start = (start % span) % run_size;
            let Some(table) = self.read_run(ctx, &ds.double_indirect)? else {
                return Ok(None);
            };
            let Some(outer_run) = self.runs(&table).get(outer as usize).copied() else {
                return Ok(None);
            };
            let Some(table) = self.read_run(ctx, &outer_run)? else {
                return Ok(None);
            };
            let Some(run) = self.runs(&table).get(inner as usize).copied() else {
                return Ok(None);
            };
            return self.read_in_run(ctx, &run, start, len);
        }
        Ok(None)
    }

    /// Looks `key` up in the B+tree stored in `inode`'s data stream.
    /// `Some(0)` means the key is absent; `None` means the tree is damaged.
    fn tree_lookup(&self, ctx: &mut ProbeContext<'_>, inode: &Inode, key: &[u8]) -> Result<Option<i64>> {
        let Some(header) = self.read_stream(ctx, &inode.data, 0, TREE_HEADER_SIZE)? else {
            return Ok(None);
        };
        let f = Fields::new(&header, self.order);
        if f.u32(0) != Some(BPLUSTREE_MAGIC) {
            return Ok(None);
        }
        let (Some(node_size), Some(root)) = (f.u32(4), f.u64(16)) else {
            return Ok(None);
        };
        if (node_size as usize) < TREE_NODE_HEADER {
            return Ok(None);
        }

        let mut pointer = root as i64;
        for _ in 0..MAX_TREE_DEPTH {
            let Some(raw) = self.read_stream(ctx, &inode.data, pointer, node_size)? else {
                return Ok(None);
            };
            let Some(node) = TreeNode::parse(&raw, self.order) else {
                return Ok(None);
            };
            match node.search(key) {
                Some(Step::Found(value)) => return Ok(Some(value)),
                Some(Step::Descend(next)) => pointer = next,
                None => return Ok(None),
            }
            if node.overflow == BPLUSTREE_NULL {
                break;
            }
        }
        Ok(Some(0))
    }
}

/// One B+tree node: packed keys, their end offsets and the values.
#[derive(Debug)]
struct TreeNode {
    overflow: i64,
    keys: Vec<u8>,
    key_ends: Vec<u16>,
    values: Vec<i64>,
}

enum Step {
    Found(i64),
    Descend(i64),
}

impl TreeNode {
    fn parse(raw: &[u8], order: Endianness) -> Option<Self> {
        let f = Fields::new(raw, order);
        let overflow = f.u64(16)? as i64;
        let count = usize::from(f.u16(24)?);
        let key_len = usize::from(f.u16(26)?);
        let ends_at = (TREE_NODE_HEADER + key_len + 7) & !7;
        let values_at = ends_at + count * 2;
        if values_at + count * 8 > raw.len() {
            return None;
        }
        Some(Self {
            overflow,
            keys: f.bytes(TREE_NODE_HEADER, key_len)?.to_vec(),
            key_ends: (0..count).map(|i| f.u16(ends_at + i * 2)).collect::<Option<_>>()?,
            values: (0..count)
                .map(|i| f.u64(values_at + i * 8).map(|v| v as i64))
                .collect::<Option<_>>()?,
        })
    }

    /// Compares stored key `index` with `key`, `strncmp` style; `None` for
    /// key offsets that run past the key area.
    fn compare(&self, index: usize, key: &[u8]) -> Option<i32> {
        let start = if index == 0 { 0 } else { *self.key_ends.get(index - 1)? };
        let len = self.key_ends.get(index)?.wrapping_sub(start);
        let stored = self
            .keys
            .get(usize::from(start)..usize::from(start) + usize::from(len))?;
        for (a, b) in stored.iter().zip(key) {
            if a != b {
                return Some(if a < b { -1 } else { 1 });
            }
            if *a == 0 {
                break;
            }
        }
        Some(i32::from(len) - key.len() as i32)
    }

    /// Binary search for `key`. `None` for a node with no keys or with
    /// key offsets outside the key area.
    fn search(&self, key: &[u8]) -> Option<Step> {
        let last = self.key_ends.len().checked_sub(1)?;
        let cmp = self.compare(last, key)?;
        if cmp == 0 {
            let value = *self.values.get(last)?;
            return Some(if self.overflow == BPLUSTREE_NULL {
                Step::Found(value)
            } else {
                Step::Descend(value)
            });
        }
        if cmp < 0 {
            return Some(Step::Descend(self.overflow));
        }

        let (mut first, mut last) = (0i64, last as i64);
        let (mut mid, mut cmp) = (0i64, cmp);
        while first <= last {
            mid = (first + last) / 2;
            cmp = self.compare(mid as usize, key)?;
            if cmp == 0 {
                if self.overflow == BPLUSTREE_NULL {
                    return Some(Step::Found(*self.values.get(mid as usize)?));
                }
                break;
            }
            if cmp < 0 {
                first = mid + 1;
            } else {
                last = mid - 1;
            }
        }
        let next = if cmp < 0 { mid + 1 } else { mid };
        Some(Step::Descend(*self.values.get(next as usize)?))
    }
}

/// `be:volume_id` from the root directory's small-data area.
fn small_data_volume_id(inode: &Inode, limit: usize, order: Endianness) -> Option<[u8; 8]> {
    let area = inode.small_data.get(..limit.min(inode.small_data.len()))?;
    let mut off = 0;
    while off + SMALL_DATA_HEADER <= area.len() {
        let f = Fields::new(&area[off..], order);
        let kind = f.u32(0)?;
        let name_size = f.u16(4)?;
        let data_size = f.u16(6)?;
        let size = SMALL_DATA_HEADER + usize::from(name_size) + 3 + usize::from(data_size) + 1;
        if off + size > area.len() {
            break;
        }
        let name = until_nul(&area[off + SMALL_DATA_HEADER..]);
        if kind == UINT64_TYPE
            && usize::from(name_size) == VOLUME_ID_KEY.len()
            && data_size == VOLUME_ID_SIZE
            && name == VOLUME_ID_KEY
        {
            return f.array(SMALL_DATA_HEADER + usize::from(name_size) + 3);
        }
        if kind == 0 && name_size == 0 && data_size == 0 {
            break;
        }
        off += size;
    }
    None
}

/// Volume id from small data or the attribute tree. `None` rejects the
/// volume: a damaged root directory or attribute tree means this is not a
/// usable BFS.
fn volume_id(ctx: &mut ProbeContext<'_>, sb: &Superblock) -> Result<Option<[u8; 8]>> {
    let Some(root) = sb
        .read_run(ctx, &sb.root_dir)?
        .and_then(|b| Inode::parse(&b, sb.order))
        .filter(Inode::is_valid)
    else {
        return Ok(None);
    };
    let limit = sb
        .run_bytes(&sb.root_dir)
        .saturating_sub(INODE_SIZE as u64)
        .min(u64::from(root.inode_size)) as usize;
    let mut id = small_data_volume_id(&root, limit, sb.order).unwrap_or_default();
    if id != [0; 8] || root.attributes.is_empty() {
        return Ok(Some(id));
    }

    let Some(attrs) = sb
        .read_run(ctx, &root.attributes)?
        .and_then(|b| Inode::parse(&b, sb.order))
        .filter(Inode::is_valid)
    else {
        return Ok(None);
    };
    let value = match sb.tree_lookup(ctx, &attrs, VOLUME_ID_KEY)? {
        Some(v) if v >= 0 => v,
        _ => return Ok(None),
    };
    if value > 0 {
        let Some(offset) = u64::try_from(value).ok().and_then(|v| shl_exact(v, sb.block_shift)) else {
            return Ok(None);
        };
        let Some(attr) = ctx
            .try_fetch(offset, u64::from(sb.block_size))?
            .and_then(|b| Inode::parse(b, sb.order))
            .filter(Inode::is_valid)
        else {
            return Ok(None);
        };
        let first = attr.data.direct[0];
        if attr.kind == UINT64_TYPE && attr.data.size == i64::from(VOLUME_ID_SIZE) && first.len == 1 {
            let Some(data) = sb.read_run(ctx, &first)? else {
                return Ok(None);
            };
            if let Some(raw) = Fields::le(&data).array(0) {
                id = raw;
            }
        }
    }
    Ok(Some(id))
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
    let Some(base) = hit.offset.and_then(|o| o.checked_sub(NAME_LEN)) else {
        return Ok(None);
    };
    let Some(sb) = ctx.try_fetch(base, SUPERBLOCK_SIZE)?.and_then(Superblock::parse) else {
        return Ok(None);
    };
    if !sb.is_valid() {
        tracing::debug!(shift = sb.block_shift, size = sb.block_size, "befs: bad block geometry");
        return Ok(None);
    }
    let Some(id) = volume_id(ctx, &sb)? else {
        tracing::debug!("befs: unreadable root directory or attribute tree");
        return Ok(None);
    };

    let mut out = Findings::new();
    out.set_label(&sb.name);
    let order = match sb.order {
        Endianness::Little => "little-endian",
        Endianness::Big => "big-endian",
    };
    out.set_version(order);
    let text = match sb.order {
        Endianness::Little => u64::from_le_bytes(id),
        Endianness::Big => u64::from_be_bytes(id),
    };
    out.set_uuid_text(&id, format!("{text:016x}"));
    out.block_size = Some(sb.block_size);
    out.endianness = Some(sb.order);
    Ok(Some(out))
}
