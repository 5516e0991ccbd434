//! Candidate scan: which descriptors have a magic present on the device.

use crate::context::ProbeContext;
use crate::signature::{Descriptor, Magic, MagicBase};
use crate::Result;

/// Bytes read around each magic. Magics sharing a KiB block share a read.
const MAGIC_WINDOW: u64 = 1024;

/// A descriptor whose magic matched (or which has no magic and passed its
/// size gate), together with where the match was made.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub descriptor: &'static Descriptor,
    pub magic: Option<&'static Magic>,
    /// Start of the header the magic belongs to.
    pub base: u64,
    /// Absolute offset of the matched pattern.
    pub offset: Option<u64>,
}

impl Candidate {
    /// Byte order implied by the matched magic, if it implies one.
    pub fn hint(&self) -> Option<crate::Endianness> {
        self.magic.and_then(|m| m.hint)
    }
}

/// Tests one descriptor against the device.
pub fn match_descriptor(
    ctx: &mut ProbeContext<'_>,
    descriptor: &'static Descriptor,
) -> Result<Option<Candidate>> {
    let size = ctx.size();
    if descriptor.min_size > 0 && size.is_some_and(|s| s < descriptor.min_size) {
        tracing::trace!(name = descriptor.name, ?size, "below minimum size");
        return Ok(None);
    }

    if descriptor.magics.is_empty() {
        return Ok(Some(Candidate {
            descriptor,
            magic: None,
            base: 0,
            offset: None,
        }));
    }

    for magic in descriptor.magics {
        if let Some((base, offset)) = find_magic(ctx, magic)? {
            tracing::trace!(name = descriptor.name, offset, "magic matched");
            return Ok(Some(Candidate {
                descriptor,
                magic: Some(magic),
                base,
                offset: Some(offset),
            }));
        }
    }
    Ok(None)
}

/// Every matching descriptor, in the order given.
pub fn scan(
    ctx: &mut ProbeContext<'_>,
    descriptors: impl IntoIterator<Item = &'static Descriptor>,
) -> Result<Vec<Candidate>> {
    let mut found = Vec::new();
    for d in descriptors {
        if let Some(c) = match_descriptor(ctx, d)? {
            found.push(c);
        }
    }
    Ok(found)
}

/// Returns `(header_base, pattern_offset)` when `magic` is present.
fn find_magic(ctx: &mut ProbeContext<'_>, magic: &Magic) -> Result<Option<(u64, u64)>> {
    let size = ctx.size();
    let Some(base) = magic.header_base(size) else {
        return Ok(None);
    };
    let Some(offset) = base.checked_add(magic.sb_offset) else {
        return Ok(None);
    };
    let len = magic.bytes.len() as u64;
    let Some(end) = offset.checked_add(len) else {
        return Ok(None);
    };
    if size.is_some_and(|s| end > s) {
        return Ok(None);
    }

    // Read the whole KiB block holding the pattern so neighbouring magics
    // and the probes that follow are served from cache.
    let window_start = match magic.base {
        MagicBase::KbFromEnd(_) => base + (magic.sb_offset & !(MAGIC_WINDOW - 1)),
        _ => offset & !(MAGIC_WINDOW - 1),
    };
    let in_block = offset - window_start;
    let mut window = MAGIC_WINDOW.max(in_block + len);
    if let Some(s) = size {
        window = window.min(s - window_start);
    }

    let found = match ctx.try_fetch(window_start, window)? {
        Some(buf) => pattern_at(buf, in_block, magic.bytes),
        None => match ctx.try_fetch(offset, len)? {
            Some(buf) => buf == magic.bytes,
            None => false,
        },
    };
    Ok(found.then_some((base, offset)))
}

fn pattern_at(buf: &[u8], at: u64, pattern: &[u8]) -> bool {
    let Ok(at) = usize::try_from(at) else {
        return false;
    };
    at.checked_add(pattern.len())
        .and_then(|end| buf.get(at..end))
        .is_some_and(|b| b == pattern)
}
