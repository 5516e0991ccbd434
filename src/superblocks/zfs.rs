//! ZFS pool members, found by counting uberblocks in the vdev labels.

use super::{Findings, Format, Outcome, until_nul};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::Descriptor;
use crate::types::{Endianness, MagicLocation, Usage, VolumeId};

pub(crate) const DESCRIPTOR: Descriptor =
    Descriptor::new("zfs_member", Usage::Filesystem, &[], Format::Zfs).min_size(64 * 1024 * 1024);

const LABEL_SIZE: u64 = 256 * 1024;
const UBERBLOCK_AREA: u64 = 128 * 1024;
const UBERBLOCK_SIZE: u64 = 1024;
const NVLIST_OFFSET: u64 = 16 * 1024;
const NVLIST_LEN: u64 = 4096;
const UBERBLOCK_MAGIC: u64 = 0x00ba_b10c;
/// Uberblocks needed across the labels before the device counts as ZFS.
const WANTED_UBERBLOCKS: usize = 4;

const NV_HEADER: usize = 12;
const NVPAIR_HEADER: usize = 12;
const DATA_TYPE_UINT64: u32 = 8;
const DATA_TYPE_STRING: u32 = 9;

/// Last uberblock seen in a label: its offset within the label and the
/// byte order its magic was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UberblockHit {
    offset: u64,
    order: Endianness,
}

/// Counts uberblocks in a label's uberblock array.
fn scan_uberblocks(area: &[u8]) -> (usize, Option<UberblockHit>) {
    let mut found = 0;
    let mut last = None;
    for (i, ub) in area.chunks_exact(UBERBLOCK_SIZE as usize).enumerate() {
        let Some(magic) = Fields::le(ub).u64(0) else {
            continue;
        };
        let order = if magic == UBERBLOCK_MAGIC {
            Endianness::Little
        } else if magic == UBERBLOCK_MAGIC.swap_bytes() {
            Endianness::Big
        } else {
            continue;
        };
        found += 1;
        last = Some(UberblockHit {
            offset: UBERBLOCK_AREA + i as u64 * UBERBLOCK_SIZE,
            order,
        });
    }
    (found, last)
}

/// Pool name, vdev guid and pool guid from the packed XDR nvlist. Only
/// the first 4 KiB is examined.
fn read_nvlist(buf: &[u8], out: &mut Findings) {
    let mut pos = NV_HEADER;
    let mut found = 0;
    while found < 3 && buf.len() - pos > NVPAIR_HEADER {
        let f = Fields::be(&buf[pos..]);
        let (Some(size), Some(namelen)) = (f.u32(0), f.u32(8)) else {
            break;
        };
        let size = size as usize;
        let namesize = (namelen as usize + 3) & !3;
        if size == 0 || size > buf.len() - pos || namesize + NVPAIR_HEADER > size {
            break;
        }
        let pair = &buf[pos..pos + size];
        let name = until_nul(&pair[NVPAIR_HEADER..NVPAIR_HEADER + namelen as usize]);
        let value = Fields::be(&pair[NVPAIR_HEADER + namesize..]);
        let data_type = value.u32(0);

        match name {
            b"name" if data_type == Some(DATA_TYPE_STRING) => {
                if let Some(text) = value
                    .u32(8)
                    .and_then(|len| value.bytes(12, len as usize))
                {
                    out.set_label(text);
                    found += 1;
                }
            }
            b"guid" if data_type == Some(DATA_TYPE_UINT64) => {
                if let Some(guid) = value.u64(8) {
                    out.uuid_sub = Some(VolumeId::new(guid.to_be_bytes(), guid.to_string()));
                    found += 1;
                }
            }
            b"pool_guid" if data_type == Some(DATA_TYPE_UINT64) => {
                if let Some(guid) = value.u64(8) {
                    out.set_uuid_text(&guid.to_be_bytes(), guid.to_string());
                    found += 1;
                }
            }
            _ => {}
        }
        pos += size;
    }
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    // L0 and L1 lead the device; L2 and L3 trail it, aligned to the label size
    let mut labels = vec![0, LABEL_SIZE];
    if let Some(size) = ctx.size() {
        let end = size - size % LABEL_SIZE;
        labels.extend(end.checked_sub(2 * LABEL_SIZE));
        labels.extend(end.checked_sub(LABEL_SIZE));
    }

    let mut found = 0;
    let mut hit = None;
    for &label in &labels {
        let Some(area) = ctx.try_fetch(label + UBERBLOCK_AREA, LABEL_SIZE - UBERBLOCK_AREA)? else {
            return Ok(None);
        };
        let (count, last) = scan_uberblocks(area);
        if let Some(last) = last {
            found += count;
            hit = Some((label, last));
            if found >= WANTED_UBERBLOCKS {
                break;
            }
        }
    }
    let Some((label, ub)) = hit.filter(|_| found >= WANTED_UBERBLOCKS) else {
        tracing::debug!(found, "zfs: too few uberblocks");
        return Ok(None);
    };

    let ub_offset = label + ub.offset;
    let Some(raw) = ctx.try_fetch(ub_offset, 16)?.map(<[u8]>::to_vec) else {
        return Ok(None);
    };
    let f = Fields::new(&raw, ub.order);
    let mut out = Findings::new();
    if let Some(version) = f.u64(8) {
        out.set_version(version.to_string());
    }
    out.endianness = Some(ub.order);
    out.magic = Some(MagicLocation {
        offset: ub_offset,
        bytes: raw[..8].to_vec(),
    });

    if let Some(nvlist) = ctx.try_fetch(label + NVLIST_OFFSET, NVLIST_LEN)? {
        read_nvlist(nvlist, &mut out);
    }
    Ok(Some(out))
}
