//! BitLocker encrypted volumes.
//!
//! The boot sector of a BitLocker volume looks enough like NTFS or FAT to
//! fool their magics, so this is registered ahead of both and both ask
//! [`is_bitlocker`] before accepting a device.

use super::{Findings, Format, Outcome};
use crate::codec::Fields;
use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::signature::{Descriptor, Magic};
use crate::types::Usage;

const VISTA_MAGIC: &[u8] = b"\xeb\x52\x90-FVE-FS-";
const WIN7_MAGIC: &[u8] = b"\xeb\x58\x90-FVE-FS-";
const TOGO_MAGIC: &[u8] = b"\xeb\x58\x90MSWIN4.1";

pub(crate) const DESCRIPTOR: Descriptor = Descriptor::new(
    "BitLocker",
    Usage::Crypto,
    &[
        Magic::at(VISTA_MAGIC, 0),
        Magic::at(WIN7_MAGIC, 0),
        Magic::at(TOGO_MAGIC, 0),
    ],
    Format::Bitlocker,
);

const BOOT_SECTOR_SIZE: u64 = 512;
const FVE_SIGNATURE: &[u8] = b"-FVE-FS-";
const FVE_HEADER_SIZE: u64 = 16;
const FVE_ALIGNMENT: u64 = 64;

/// Offsets inside the boot sector.
const WIN7_SERIAL: usize = 67;
const WIN7_FVE_OFFSET: usize = 176;
const TOGO_FVE_OFFSET: usize = 440;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Vista,
    Win7,
    ToGo,
}

impl Variant {
    fn detect(boot: &[u8]) -> Option<Self> {
        [(VISTA_MAGIC, Self::Vista), (WIN7_MAGIC, Self::Win7), (TOGO_MAGIC, Self::ToGo)]
            .into_iter()
            .find(|(magic, _)| boot.starts_with(magic))
            .map(|(_, v)| v)
    }
}

#[derive(Debug)]
struct Header {
    variant: Variant,
    serial: u32,
    version: Option<u16>,
}

fn read_header(ctx: &mut ProbeContext<'_>) -> crate::Result<Option<Header>> {
    let Some(boot) = ctx.try_fetch(0, BOOT_SECTOR_SIZE)? else {
        return Ok(None);
    };
    let Some(variant) = Variant::detect(boot) else {
        return Ok(None);
    };
    let f = Fields::le(boot);
    let serial = f.u32(WIN7_SERIAL).unwrap_or(0);
    let fve_off = match variant {
        // Vista keeps no pointer in the boot sector.
        Variant::Vista => {
            return Ok(Some(Header {
                variant,
                serial: 0,
                version: None,
            }));
        }
        Variant::Win7 => f.u64(WIN7_FVE_OFFSET),
        Variant::ToGo => f.u64(TOGO_FVE_OFFSET),
    };
    let Some(fve_off) = fve_off.filter(|&o| o != 0 && o % FVE_ALIGNMENT == 0) else {
        tracing::debug!(?variant, "bitlocker: bad FVE metadata pointer");
        return Ok(None);
    };
    let Some(fve) = ctx.try_fetch(fve_off, FVE_HEADER_SIZE)? else {
        return Ok(None);
    };
    if !fve.starts_with(FVE_SIGNATURE) {
        return Ok(None);
    }
    Ok(Some(Header {
        variant,
        serial,
        version: Fields::le(fve).u16(10),
    }))
}

/// Exclusion check for formats whose boot sector BitLocker imitates.
pub(crate) fn is_bitlocker(ctx: &mut ProbeContext<'_>) -> crate::Result<bool> {
    Ok(read_header(ctx)?.is_some())
}

pub(crate) fn probe(ctx: &mut ProbeContext<'_>, _hit: &Candidate) -> Outcome {
    let Some(header) = read_header(ctx)? else {
        return Ok(None);
    };
    let mut out = Findings::new();
    if let Some(version) = header.version {
        out.set_version(version.to_string());
    }
    if header.variant == Variant::Win7 && header.serial != 0 {
        out.set_uuid_text(&header.serial.to_le_bytes(), format!("{:016}", header.serial));
    }
    Ok(Some(out))
}
