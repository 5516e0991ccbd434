//! Per-format probes.
//!
//! Each submodule owns the descriptor for its format(s) and a `probe`
//! function that confirms a candidate and fills in a [`Findings`].
//! A probe answers `Ok(None)` for "not this format"; only device I/O
//! failures are errors.

pub mod befs;
pub mod bitlocker;
pub mod btrfs;
pub mod dm;
pub mod drbd;
pub mod exfat;
pub mod ext;
pub mod f2fs;
pub mod iso9660;
pub mod jmicron;
pub mod lvm;
pub mod minix;
pub mod nilfs;
pub mod ntfs;
pub mod nvidia;
pub mod silicon;
pub mod swap;
pub mod ubi;
pub mod udf;
pub mod vfat;
pub mod xfs;
pub mod zfs;

use crate::context::ProbeContext;
use crate::matcher::Candidate;
use crate::types::{Endianness, MagicLocation, ProbeRecord, VolumeId};
use crate::Result;
use std::collections::BTreeMap;

pub(crate) type Outcome = Result<Option<Findings>>;

/// Format implementations, one variant per descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    SiliconRaid,
    NvidiaRaid,
    JmicronRaid,
    Drbd,
    Lvm2,
    Lvm1,
    SnapshotCow,
    VerityHash,
    Integrity,
    Ubi,
    Bitlocker,
    Vfat,
    Swsuspend,
    Swap,
    Xfs,
    XfsLog,
    Exfs,
    Ext4,
    Ext3,
    Ext2,
    Jbd,
    Udf,
    Iso9660,
    Zfs,
    Ntfs,
    Minix,
    Btrfs,
    Befs,
    Nilfs2,
    Exfat,
    F2fs,
}

impl Format {
    pub(crate) fn probe(self, ctx: &mut ProbeContext<'_>, hit: &Candidate) -> Outcome {
        match self {
            Self::SiliconRaid => silicon::probe(ctx, hit),
            Self::NvidiaRaid => nvidia::probe(ctx, hit),
            Self::JmicronRaid => jmicron::probe(ctx, hit),
            Self::Drbd => drbd::probe(ctx, hit),
            Self::Lvm2 => lvm::probe(ctx, hit),
            Self::Lvm1 => lvm::probe_lvm1(ctx, hit),
            Self::SnapshotCow => dm::probe_snapshot_cow(ctx, hit),
            Self::VerityHash => dm::probe_verity(ctx, hit),
            Self::Integrity => dm::probe_integrity(ctx, hit),
            Self::Ubi => ubi::probe(ctx, hit),
            Self::Bitlocker => bitlocker::probe(ctx, hit),
            Self::Vfat => vfat::probe(ctx, hit),
            Self::Swsuspend => swap::probe_swsuspend(ctx, hit),
            Self::Swap => swap::probe(ctx, hit),
            Self::Xfs => xfs::probe(ctx, hit),
            Self::XfsLog => xfs::probe_log(ctx, hit),
            Self::Exfs => xfs::probe_exfs(ctx, hit),
            Self::Ext4 => ext::probe(ctx, hit, ext::Flavor::Ext4),
            Self::Ext3 => ext::probe(ctx, hit, ext::Flavor::Ext3),
            Self::Ext2 => ext::probe(ctx, hit, ext::Flavor::Ext2),
            Self::Jbd => ext::probe(ctx, hit, ext::Flavor::Jbd),
            Self::Udf => udf::probe(ctx, hit),
            Self::Iso9660 => iso9660::probe(ctx, hit),
            Self::Zfs => zfs::probe(ctx, hit),
            Self::Ntfs => ntfs::probe(ctx, hit),
            Self::Minix => minix::probe(ctx, hit),
            Self::Btrfs => btrfs::probe(ctx, hit),
            Self::Befs => befs::probe(ctx, hit),
            Self::Nilfs2 => nilfs::probe(ctx, hit),
            Self::Exfat => exfat::probe(ctx, hit),
            Self::F2fs => f2fs::probe(ctx, hit),
        }
    }
}

/// Metadata a probe extracted from an accepted header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub label: Option<String>,
    pub label_raw: Option<Vec<u8>>,
    pub uuid: Option<VolumeId>,
    pub uuid_sub: Option<VolumeId>,
    pub log_uuid: Option<VolumeId>,
    pub version: Option<String>,
    pub block_size: Option<u32>,
    pub fs_size: Option<u64>,
    pub endianness: Option<Endianness>,
    /// Overrides the magic location, for size-gated formats that locate
    /// their own signature.
    pub magic: Option<MagicLocation>,
    pub extra: BTreeMap<&'static str, String>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label stored as single-byte characters, NUL or space padded.
    pub fn set_label(&mut self, raw: &[u8]) {
        let raw = until_nul(raw);
        if let Some(text) = normalize_label(&String::from_utf8_lossy(raw)) {
            self.label = Some(text);
            self.label_raw = Some(raw.to_vec());
        }
    }

    /// Label stored as UTF-16 code units.
    pub fn set_utf16_label(&mut self, raw: &[u8], order: Endianness) {
        if let Some(text) = normalize_label(&decode_utf16(raw, order)) {
            self.label = Some(text);
            self.label_raw = Some(raw.to_vec());
        }
    }

    /// Label the format decoded itself; `raw` is kept as found on disk.
    pub fn set_decoded_label(&mut self, raw: &[u8], text: &str) {
        if let Some(text) = normalize_label(text) {
            self.label = Some(text);
            self.label_raw = Some(raw.to_vec());
        }
    }

    /// 16-byte DCE UUID. All-zero means "none".
    pub fn set_uuid(&mut self, raw: &[u8]) {
        self.uuid = dce_uuid(raw);
    }

    /// Identifier with a format-specific textual form. All-zero raw bytes
    /// mean the format never assigned one.
    pub fn set_uuid_text(&mut self, raw: &[u8], text: impl Into<String>) {
        if !is_zero(raw) {
            self.uuid = Some(VolumeId::new(raw, text));
        }
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = Some(version.into());
    }

    pub fn set_magic(&mut self, offset: u64, bytes: &[u8]) {
        self.magic = Some(MagicLocation {
            offset,
            bytes: bytes.to_vec(),
        });
    }

    pub fn set_extra(&mut self, key: &'static str, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.extra.insert(key, value);
        }
    }

    pub(crate) fn into_record(self, hit: &Candidate, sector_size: Option<u32>) -> ProbeRecord {
        let magic = self.magic.or_else(|| {
            Some(MagicLocation {
                offset: hit.offset?,
                bytes: hit.magic?.bytes.to_vec(),
            })
        });
        ProbeRecord {
            name: hit.descriptor.name,
            usage: hit.descriptor.usage,
            label: self.label,
            label_raw: self.label_raw,
            uuid: self.uuid,
            uuid_sub: self.uuid_sub,
            log_uuid: self.log_uuid,
            version: self.version,
            block_size: self.block_size,
            fs_size: self.fs_size,
            sector_size,
            endianness: self.endianness,
            magic,
            extra: self.extra,
        }
    }
}

pub(crate) fn is_zero(raw: &[u8]) -> bool {
    raw.iter().all(|&b| b == 0)
}

/// Bytes up to (not including) the first NUL.
pub(crate) fn until_nul(raw: &[u8]) -> &[u8] {
    raw.iter().position(|&b| b == 0).map_or(raw, |n| &raw[..n])
}

/// Trailing whitespace is padding; an empty result means no label.
pub(crate) fn normalize_label(text: &str) -> Option<String> {
    let trimmed = text.trim_end_matches(|c: char| c.is_whitespace() || c == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// UTF-16 to UTF-8, stopping at the first NUL code unit. Unpaired
/// surrogates become U+FFFD.
pub(crate) fn decode_utf16(raw: &[u8], order: Endianness) -> String {
    let units = raw.chunks_exact(2).map(|c| match order {
        Endianness::Little => u16::from_le_bytes([c[0], c[1]]),
        Endianness::Big => u16::from_be_bytes([c[0], c[1]]),
    });
    char::decode_utf16(units.take_while(|&u| u != 0))
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Lowercase `8-4-4-4-12` form of a 16-byte UUID.
pub(crate) fn dce_uuid(raw: &[u8]) -> Option<VolumeId> {
    let bytes: [u8; 16] = raw.try_into().ok()?;
    if is_zero(&bytes) {
        return None;
    }
    let text = uuid::Uuid::from_bytes(bytes).hyphenated().to_string();
    Some(VolumeId::new(bytes.to_vec(), text))
}

/// `XXXX-XXXX` form of a 32-bit little-endian serial, as FAT and exFAT
/// present it.
pub(crate) fn serial_uuid(raw: [u8; 4]) -> String {
    format!(
        "{:02X}{:02X}-{:02X}{:02X}",
        raw[3], raw[2], raw[1], raw[0]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_trimming() {
        let mut f = Findings::new();
        f.set_label(b"label1\0\0\0\0\0\0");
        assert_eq!(f.label.as_deref(), Some("label1"));
        assert_eq!(f.label_raw.as_deref(), Some(&b"label1"[..]));

        let mut f = Findings::new();
        f.set_label(b"DATA       ");
        assert_eq!(f.label.as_deref(), Some("DATA"));

        let mut f = Findings::new();
        f.set_label(b"\0\0\0\0");
        assert_eq!(f.label, None);

        let mut f = Findings::new();
        f.set_label(b"    ");
        assert_eq!(f.label, None);
    }

    #[test]
    fn test_utf16_labels() {
        let le: Vec<u8> = "Daten".encode_utf16().flat_map(|u| u.to_le_bytes()).chain([0, 0, 0x41, 0]).collect();
        let mut f = Findings::new();
        f.set_utf16_label(&le, Endianness::Little);
        assert_eq!(f.label.as_deref(), Some("Daten"));

        let be: Vec<u8> = "Ünïcode ".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let mut f = Findings::new();
        f.set_utf16_label(&be, Endianness::Big);
        assert_eq!(f.label.as_deref(), Some("Ünïcode"));
    }

    #[test]
    fn test_dce_uuid() {
        let raw: Vec<u8> = (0x10..0x20).collect();
        let id = dce_uuid(&raw).unwrap();
        assert_eq!(id.text, "10111213-1415-1617-1819-1a1b1c1d1e1f");
        assert!(dce_uuid(&[0u8; 16]).is_none());
        assert!(dce_uuid(&[1u8; 8]).is_none());
    }

    #[test]
    fn test_serial_uuid() {
        assert_eq!(serial_uuid([0x78, 0x56, 0x34, 0x12]), "1234-5678");
    }

    #[test]
    fn test_zero_uuid_text_is_dropped() {
        let mut f = Findings::new();
        f.set_uuid_text(&[0; 8], "0000000000000000");
        assert!(f.uuid.is_none());
    }
}
