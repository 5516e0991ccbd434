//! Synthetic device images for the integration tests.

#![allow(dead_code)]

use blkprobe::checksum::{
    crc32_raw, crc32c, exfat_boot_checksum, lvm2_crc, sum16_le, sum32_le, LVM2_CRC_SEED,
};
use blkprobe::{BlockSource, MemoryReader, ProbeError, Result};
use std::io;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * 1024;

pub const XFS_UUID: [u8; 16] = [
    0x4a, 0x1e, 0x3c, 0x2f, 0x8b, 0x0d, 0x4e, 0x5a, 0x9c, 0x71, 0x02, 0xd3, 0x6e, 0x44, 0xa8, 0x19,
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn put(img: &mut [u8], off: usize, bytes: &[u8]) {
    img[off..off + bytes.len()].copy_from_slice(bytes);
}

// ============================================================================
// Filesystems
// ============================================================================

/// XFS superblock at offset 0 with the given 12-byte name field.
pub fn xfs_superblock(img: &mut [u8], fname: &[u8; 12]) {
    put(img, 0, b"XFSB");
    put(img, 4, &4096u32.to_be_bytes());
    put(img, 8, &256u64.to_be_bytes());
    put(img, 32, &XFS_UUID);
    put(img, 108, fname);
}

pub fn xfs_image(fname: &[u8; 12]) -> Vec<u8> {
    let mut img = vec![0u8; 64 * KIB];
    xfs_superblock(&mut img, fname);
    img
}

/// ext4 superblock at 1 KiB: journal, extents, 4 KiB blocks.
pub fn ext4_superblock(img: &mut [u8], label: &[u8]) {
    let sb = 1024;
    put(img, sb + 0x04, &256u32.to_le_bytes());
    put(img, sb + 0x18, &2u32.to_le_bytes());
    put(img, sb + 0x38, &0xEF53u16.to_le_bytes());
    put(img, sb + 0x4C, &1u32.to_le_bytes());
    put(img, sb + 0x5C, &0x0004u32.to_le_bytes());
    put(img, sb + 0x60, &(0x0002u32 | 0x0040).to_le_bytes());
    put(img, sb + 0x64, &0x0003u32.to_le_bytes());
    put(img, sb + 0x68, &[0x11; 16]);
    put(img, sb + 0x78, label);
}

/// FAT12 volume on a 1 MiB image: boot label "BOOTLABEL", root directory
/// label "MYVOLUME", serial 1234-5678.
pub fn fat12_image() -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    put(&mut img, 0, &[0xEB, 0x3C, 0x90]);
    put(&mut img, 3, b"MSDOS5.0");
    put(&mut img, 0x0b, &512u16.to_le_bytes());
    img[0x0d] = 4;
    put(&mut img, 0x0e, &1u16.to_le_bytes());
    img[0x10] = 2;
    put(&mut img, 0x11, &224u16.to_le_bytes());
    put(&mut img, 0x13, &2048u16.to_le_bytes());
    img[0x15] = 0xF8;
    put(&mut img, 0x16, &2u16.to_le_bytes());
    img[0x24] = 0x80;
    img[0x26] = 0x29;
    put(&mut img, 0x27, &[0x78, 0x56, 0x34, 0x12]);
    put(&mut img, 0x2b, b"BOOTLABEL  ");
    put(&mut img, 0x36, b"FAT12   ");
    put(&mut img, 0x1fe, &[0x55, 0xAA]);
    // root directory follows the reserved sector and both FATs
    let root = (1 + 2 * 2) * 512;
    put(&mut img, root, b"MYVOLUME   ");
    img[root + 11] = 0x08;
    img
}

/// Turns a FAT image into a BitLocker To Go volume. The FVE metadata
/// block lives at 256 KiB.
pub fn bitlocker_togo(img: &mut [u8], valid_fve: bool) {
    let fve = 256 * KIB;
    put(img, 0, b"\xeb\x58\x90MSWIN4.1");
    put(img, 440, &(fve as u64).to_le_bytes());
    put(img, fve, if valid_fve { b"-FVE-FS-" } else { b"-XXX-XX-" });
    put(img, fve + 10, &2u16.to_le_bytes());
}

/// Swap v1 header with a 4 KiB page.
pub fn swap_image(label: &[u8]) -> Vec<u8> {
    let mut img = vec![0u8; 64 * KIB];
    put(&mut img, 1024, &1u32.to_le_bytes());
    put(&mut img, 1028, &15u32.to_le_bytes());
    put(&mut img, 1024 + 12, &[0x22; 16]);
    put(&mut img, 1024 + 28, label);
    put(&mut img, 0xff6, b"SWAPSPACE2");
    img
}

pub fn btrfs_image() -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    let sb = 64 * KIB;
    put(&mut img, sb + 32, &[0x33; 16]);
    put(&mut img, sb + 0x40, b"_BHRfS_M");
    put(&mut img, sb + 112, &(MIB as u64).to_le_bytes());
    put(&mut img, sb + 144, &4096u32.to_le_bytes());
    put(&mut img, sb + 267, &[0x44; 16]);
    put(&mut img, sb + 299, b"pool");
    let crc = crc32c(&img[sb + 32..sb + 4096]);
    put(&mut img, sb, &crc.to_le_bytes());
    img
}

fn iso_descriptor(img: &mut [u8], at: usize, vd_type: u8) {
    img[at] = vd_type;
    put(img, at + 1, b"CD001");
    img[at + 6] = 1;
}

/// ISO 9660 with a primary descriptor and, optionally, a Joliet
/// supplementary descriptor carrying `joliet_label`.
pub fn iso_image(joliet_label: Option<&str>) -> Vec<u8> {
    let mut img = vec![0u8; 64 * KIB];
    iso_volume(&mut img, joliet_label);
    img
}

/// Writes the ISO 9660 descriptor set into `img` and returns the offset
/// just past the set terminator.
pub fn iso_volume(img: &mut [u8], joliet_label: Option<&str>) -> usize {
    let pvd = 0x8000;
    iso_descriptor(img, pvd, 1);
    put(img, pvd + 8, &[b' '; 32]);
    put(img, pvd + 8, b"LINUX");
    put(img, pvd + 40, &[b' '; 32]);
    put(img, pvd + 40, b"MY_DISC");
    put(img, pvd + 813, b"2021031512304500");
    put(img, pvd + 830, b"0000000000000000");

    let mut next = pvd + 0x800;
    if let Some(label) = joliet_label {
        iso_descriptor(img, next, 2);
        let utf16: Vec<u8> = label.encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        put(img, next + 40, &utf16);
        put(img, next + 88, b"%/E");
        next += 0x800;
    }
    iso_descriptor(img, next, 0xFF);
    next + 0x800
}

/// A primary descriptor followed by an El Torito boot record. The boot
/// record's system id starts at offset 7, one byte before a primary
/// descriptor's.
pub fn iso_boot_image() -> Vec<u8> {
    let mut img = vec![0u8; 64 * KIB];
    let pvd = 0x8000;
    iso_descriptor(&mut img, pvd, 1);
    put(&mut img, pvd + 8, &[b' '; 32]);
    put(&mut img, pvd + 40, &[b' '; 32]);
    put(&mut img, pvd + 40, b"BOOTCD");
    let boot = pvd + 0x800;
    iso_descriptor(&mut img, boot, 0);
    put(&mut img, boot + 7, b"EL TORITO SPECIFICATION");
    iso_descriptor(&mut img, boot + 0x800, 0xFF);
    img
}

fn dstring(img: &mut [u8], at: usize, len: usize, cid: u8, chars: &[u8]) {
    img[at] = cid;
    put(img, at + 1, chars);
    img[at + len - 1] = (chars.len() + 1) as u8;
}

fn udf_tag(img: &mut [u8], block: usize, bs: usize, id: u16) {
    put(img, block * bs, &id.to_le_bytes());
    put(img, block * bs + 12, &(block as u32).to_le_bytes());
}

pub const UDF_BLOCK_SIZE: usize = 2048;

/// UDF with 2 KiB blocks: the volume recognition sequence at `vrs`, the
/// anchor at block 256, PVD and LVD at blocks 32 and 33 and the integrity
/// descriptor at block 40 announcing read revision 2.01.
pub fn udf_volume(img: &mut [u8], vrs: usize) {
    for (i, id) in [b"BEA01", b"NSR02", b"TEA01"].into_iter().enumerate() {
        let at = vrs + i * 0x800;
        img[at] = 0;
        put(img, at + 1, id);
        img[at + 6] = 1;
    }
    let bs = UDF_BLOCK_SIZE;

    udf_tag(img, 256, bs, 2);
    put(img, 256 * bs + 16, &((4 * bs) as u32).to_le_bytes());
    put(img, 256 * bs + 20, &32u32.to_le_bytes());

    udf_tag(img, 32, bs, 1);
    dstring(img, 32 * bs + 24, 32, 8, b"DVD_VOL");
    dstring(img, 32 * bs + 72, 128, 8, b"4D6A2B1CLinuxUDF");

    udf_tag(img, 33, bs, 6);
    let label: Vec<u8> = "Daten".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
    dstring(img, 33 * bs + 84, 128, 16, &label);
    put(img, 33 * bs + 268, &1u32.to_le_bytes());
    put(img, 33 * bs + 432, &(bs as u32).to_le_bytes());
    put(img, 33 * bs + 436, &40u32.to_le_bytes());

    udf_tag(img, 40, bs, 9);
    // minimum read revision after one partition's free and size tables
    put(img, 40 * bs + 80 + 8 + 40, &0x0201u16.to_le_bytes());
}

/// Win7 BitLocker boot sector with its FVE metadata at 128 KiB.
pub fn bitlocker_win7(serial: u32) -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    let fve = 128 * KIB;
    put(&mut img, 0, b"\xeb\x58\x90-FVE-FS-");
    put(&mut img, 67, &serial.to_le_bytes());
    put(&mut img, 176, &(fve as u64).to_le_bytes());
    put(&mut img, fve, b"-FVE-FS-");
    put(&mut img, fve + 10, &2u16.to_le_bytes());
    img
}

fn utf16_le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

pub const NTFS_MFT: usize = 4 * 4096;

/// NTFS on a 1 MiB image: 4 KiB clusters, 1 KiB MFT records starting at
/// cluster 4, and `$Volume` carrying `label` as its volume name.
pub fn ntfs_image(label: &str) -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    put(&mut img, 3, b"NTFS    ");
    put(&mut img, 11, &512u16.to_le_bytes());
    img[13] = 8;
    put(&mut img, 40, &2048u64.to_le_bytes());
    put(&mut img, 48, &4u64.to_le_bytes());
    put(&mut img, 56, &8u64.to_le_bytes());
    img[64] = 0xF6;
    put(&mut img, 72, &0x1122_3344_5566_7788u64.to_le_bytes());
    put(&mut img, 0x1fe, &[0x55, 0xAA]);

    put(&mut img, NTFS_MFT, b"FILE");
    let rec = NTFS_MFT + 3 * 1024;
    put(&mut img, rec, b"FILE");
    put(&mut img, rec + 20, &56u16.to_le_bytes());
    put(&mut img, rec + 28, &1024u32.to_le_bytes());
    let name = utf16_le(label);
    let attr = rec + 56;
    let attr_len = (24 + name.len() + 7) & !7;
    put(&mut img, attr, &0x60u32.to_le_bytes());
    put(&mut img, attr + 4, &(attr_len as u32).to_le_bytes());
    put(&mut img, attr + 16, &(name.len() as u32).to_le_bytes());
    put(&mut img, attr + 20, &24u16.to_le_bytes());
    put(&mut img, attr + 24, &name);
    put(&mut img, attr + attr_len, &0xFFFF_FFFFu32.to_le_bytes());
    img
}

pub const EXFAT_ROOT: usize = (256 + (2 << 3)) * 512;

/// exFAT on a 1 MiB image: 512-byte sectors, 4 KiB clusters, root
/// directory in cluster 4 holding a label entry, serial 1234-5678.
pub fn exfat_image(label: &str) -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    put(&mut img, 0, &[0xEB, 0x76, 0x90]);
    put(&mut img, 3, b"EXFAT   ");
    put(&mut img, 72, &2048u64.to_le_bytes());
    put(&mut img, 80, &128u32.to_le_bytes());
    put(&mut img, 84, &64u32.to_le_bytes());
    put(&mut img, 88, &256u32.to_le_bytes());
    put(&mut img, 92, &200u32.to_le_bytes());
    put(&mut img, 96, &4u32.to_le_bytes());
    put(&mut img, 100, &[0x78, 0x56, 0x34, 0x12]);
    img[105] = 1;
    img[108] = 9;
    img[109] = 3;
    img[110] = 1;
    put(&mut img, 510, &[0x55, 0xAA]);
    exfat_reseal(&mut img);

    let chars = utf16_le(label);
    img[EXFAT_ROOT] = 0x83;
    img[EXFAT_ROOT + 1] = (chars.len() / 2) as u8;
    put(&mut img, EXFAT_ROOT + 2, &chars);
    // the root directory is a single cluster
    put(&mut img, 128 * 512 + 4 * 4, &0xFFFF_FFFFu32.to_le_bytes());
    img
}

/// Recomputes the boot region checksum sector after an edit.
pub fn exfat_reseal(img: &mut [u8]) {
    let sum = exfat_boot_checksum(&img[..11 * 512]);
    for word in img[11 * 512..12 * 512].chunks_exact_mut(4) {
        word.copy_from_slice(&sum.to_le_bytes());
    }
}

/// F2FS 1.15 superblock at 1 KiB with 4 KiB blocks and a checksum right
/// after the volume name.
pub fn f2fs_image(label: &str) -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    let sb = KIB;
    let csum = 0x47C;
    put(&mut img, sb, &0xF2F5_2010u32.to_le_bytes());
    put(&mut img, sb + 4, &1u16.to_le_bytes());
    put(&mut img, sb + 6, &15u16.to_le_bytes());
    put(&mut img, sb + 0x10, &12u32.to_le_bytes());
    put(&mut img, sb + 0x20, &(csum as u32).to_le_bytes());
    put(&mut img, sb + 0x24, &256u64.to_le_bytes());
    put(&mut img, sb + 0x6C, &[0x55; 16]);
    put(&mut img, sb + 0x7C, &utf16_le(label));
    let crc = crc32_raw(0xF2F5_2010, &img[sb..sb + csum]);
    put(&mut img, sb + csum, &crc.to_le_bytes());
    img
}

/// A NILFS2 superblock at `at` covering 256 bytes with its seeded CRC.
pub fn nilfs_superblock(img: &mut [u8], at: usize, last_cno: u64, label: &[u8]) {
    let seed = 0x1234_5678u32;
    let dev_size = img.len() as u64;
    put(img, at, &2u32.to_le_bytes());
    put(img, at + 6, &0x3434u16.to_le_bytes());
    put(img, at + 8, &256u16.to_le_bytes());
    put(img, at + 12, &seed.to_le_bytes());
    put(img, at + 20, &2u32.to_le_bytes());
    put(img, at + 32, &dev_size.to_le_bytes());
    put(img, at + 56, &last_cno.to_le_bytes());
    put(img, at + 152, &[0x66; 16]);
    put(img, at + 168, label);
    let mut crc = crc32_raw(seed, &img[at..at + 16]);
    crc = crc32_raw(crc, &[0; 4]);
    crc = crc32_raw(crc, &img[at + 20..at + 256]);
    put(img, at + 16, &crc.to_le_bytes());
}

/// Offset of the NILFS2 backup superblock on an image of `size` bytes.
pub fn nilfs_backup_offset(size: usize) -> usize {
    (size / 512 - 8) * 512
}

/// Minix v2 in big-endian byte order: 64 inodes, 1024 zones of 1 KiB.
pub fn minix_v2_be_image() -> Vec<u8> {
    let mut img = vec![0u8; MIB];
    let sb = KIB;
    put(&mut img, sb, &64u16.to_be_bytes());
    put(&mut img, sb + 4, &1u16.to_be_bytes());
    put(&mut img, sb + 6, &1u16.to_be_bytes());
    put(&mut img, sb + 8, &8u16.to_be_bytes());
    put(&mut img, sb + 0x10, &0x2468u16.to_be_bytes());
    put(&mut img, sb + 18, &1u16.to_be_bytes());
    put(&mut img, sb + 20, &1024u32.to_be_bytes());
    img
}

/// Swap header whose signature page was taken over by a hibernation image.
pub fn swsuspend_image(magic: &[u8]) -> Vec<u8> {
    let mut img = swap_image(b"swappy");
    put(&mut img, 0xff6, &[0; 10]);
    put(&mut img, 0xff6, magic);
    img
}

/// BFS, little-endian, 1 KiB blocks. The root directory inode at block 8
/// keeps `be:volume_id` in its small-data area.
pub fn befs_image(volume_id: u64) -> Vec<u8> {
    let mut img = vec![0u8; 2 * MIB];
    let sb = 0x200;
    put(&mut img, sb, b"haiku");
    put(&mut img, sb + 32, &0x4246_5331u32.to_le_bytes());
    put(&mut img, sb + 36, &0x4249_4745u32.to_le_bytes());
    put(&mut img, sb + 40, &1024u32.to_le_bytes());
    put(&mut img, sb + 44, &10u32.to_le_bytes());
    put(&mut img, sb + 68, &0xdd12_1031u32.to_le_bytes());
    put(&mut img, sb + 76, &13u32.to_le_bytes());
    put(&mut img, sb + 112, &0x15b6_830eu32.to_le_bytes());
    // root_dir run: group 0, start 8, one block
    put(&mut img, sb + 116 + 4, &8u16.to_le_bytes());
    put(&mut img, sb + 116 + 6, &1u16.to_le_bytes());

    let inode = 8 * KIB;
    put(&mut img, inode, &0x3bbe_0ad9u32.to_le_bytes());
    put(&mut img, inode + 64, &1024u32.to_le_bytes());
    let sd = inode + 232;
    put(&mut img, sd, &0x554c_4c47u32.to_le_bytes());
    put(&mut img, sd + 4, &12u16.to_le_bytes());
    put(&mut img, sd + 6, &8u16.to_le_bytes());
    put(&mut img, sd + 8, b"be:volume_id");
    put(&mut img, sd + 8 + 12 + 3, &volume_id.to_le_bytes());
    img
}

fn nvpair(name: &str, value: &[u8]) -> Vec<u8> {
    let namesize = (name.len() + 3) & !3;
    let size = 12 + namesize + value.len();
    let mut p = Vec::with_capacity(size);
    p.extend_from_slice(&(size as u32).to_be_bytes());
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(&(name.len() as u32).to_be_bytes());
    p.extend_from_slice(name.as_bytes());
    p.resize(12 + namesize, 0);
    p.extend_from_slice(value);
    p
}

fn nv_uint64(v: u64) -> Vec<u8> {
    let mut out = 8u32.to_be_bytes().to_vec();
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&v.to_be_bytes());
    out
}

fn nv_string(s: &str) -> Vec<u8> {
    let mut out = 9u32.to_be_bytes().to_vec();
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    out.resize((out.len() + 3) & !3, 0);
    out
}

/// A 64 MiB ZFS member with `uberblocks` little-endian uberblocks in
/// label 0 and a pool "tank" in its nvlist.
pub fn zfs_image(uberblocks: usize) -> Vec<u8> {
    let mut img = vec![0u8; 64 * MIB];
    for i in 0..uberblocks {
        let ub = 128 * KIB + i * KIB;
        put(&mut img, ub, &0x00ba_b10cu64.to_le_bytes());
        put(&mut img, ub + 8, &5000u64.to_le_bytes());
    }
    let mut nv = vec![0u8; 12];
    nv.extend(nvpair("version", &nv_uint64(5000)));
    nv.extend(nvpair("name", &nv_string("tank")));
    nv.extend(nvpair("guid", &nv_uint64(42)));
    nv.extend(nvpair("pool_guid", &nv_uint64(1_234_567_890_123)));
    put(&mut img, 16 * KIB, &nv);
    img
}

// ============================================================================
// RAID, volume management and containers
// ============================================================================

/// LVM2 PV label in sector 1.
pub fn lvm2_image(pv_id: &[u8; 32]) -> Vec<u8> {
    let mut img = vec![0u8; 2 * MIB];
    let label = 512;
    put(&mut img, label, b"LABELONE");
    put(&mut img, label + 8, &1u64.to_le_bytes());
    put(&mut img, label + 20, &32u32.to_le_bytes());
    put(&mut img, label + 24, b"LVM2 001");
    put(&mut img, label + 32, pv_id);
    let crc = lvm2_crc(LVM2_CRC_SEED, &img[label + 20..label + 512]);
    put(&mut img, label + 16, &crc.to_le_bytes());
    img
}

pub fn ubi_image(image_seq: u32, valid_crc: bool) -> Vec<u8> {
    let mut img = vec![0u8; 2 * MIB];
    put(&mut img, 0, b"UBI#");
    img[4] = 1;
    put(&mut img, 16, &2048u32.to_be_bytes());
    put(&mut img, 20, &4096u32.to_be_bytes());
    put(&mut img, 24, &image_seq.to_be_bytes());
    let mut crc = crc32_raw(!0, &img[..60]);
    if !valid_crc {
        crc ^= 0x0100_0000;
    }
    put(&mut img, 60, &crc.to_be_bytes());
    img
}

/// LVM1 physical volume header on an image of `size` bytes.
pub fn lvm1_image(size: usize, pv_id: &[u8; 32]) -> Vec<u8> {
    let mut img = vec![0u8; size];
    put(&mut img, 0, b"HM");
    put(&mut img, 2, &2u16.to_le_bytes());
    put(&mut img, 44, pv_id);
    img
}

/// DRBD 9 metadata 4 KiB before the end of a 2 MiB image.
pub fn drbd_image(device_uuid: u64) -> Vec<u8> {
    let size = 2 * MIB;
    let mut img = vec![0u8; size];
    let md = size - 4096;
    put(&mut img, md + 48, &device_uuid.to_be_bytes());
    put(&mut img, md + 60, &0x8374_026du32.to_be_bytes());
    img
}

/// dm-verity hash device superblock, format version 1.
pub fn verity_image(uuid: &[u8; 16]) -> Vec<u8> {
    let mut img = vec![0u8; 64 * KIB];
    put(&mut img, 0, b"verity\0\0");
    put(&mut img, 8, &1u32.to_le_bytes());
    put(&mut img, 16, uuid);
    img
}

/// dm-integrity superblock with the given format version.
pub fn integrity_image(version: u8) -> Vec<u8> {
    let mut img = vec![0u8; 64 * KIB];
    put(&mut img, 0, b"integrt\0");
    img[8] = version;
    img
}

/// NVIDIA RAID metadata two sectors before the end.
pub fn nvidia_image(size: usize) -> Vec<u8> {
    let mut img = vec![0u8; size];
    let off = size - 1024;
    put(&mut img, off, b"NVIDIA  ");
    put(&mut img, off + 8, &30u32.to_le_bytes());
    put(&mut img, off + 16, &100u16.to_le_bytes());
    put(&mut img, off + 40, b"array0");
    let sum = sum32_le(&img[off..off + 120]);
    put(&mut img, off + 12, &sum.wrapping_neg().to_le_bytes());
    img
}

/// JMicron RAID metadata in the last sector, version 2.1.
pub fn jmicron_image(size: usize) -> Vec<u8> {
    let mut img = vec![0u8; size];
    let off = size - 512;
    put(&mut img, off, b"JM");
    img[off + 2] = 1;
    img[off + 3] = 2;
    img[off + 0x30] = 1;
    let sum = sum16_le(&img[off..off + 128]);
    put(&mut img, off + 4, &sum.wrapping_neg().to_le_bytes());
    img
}

/// Silicon Image Medley metadata in the last sector, version 2.1.
pub fn silicon_image(size: usize) -> Vec<u8> {
    let mut img = vec![0u8; size];
    let off = size - 512;
    put(&mut img, off + 0x60, &0x2F00_0000u32.to_le_bytes());
    put(&mut img, off + 0x11A, &1u16.to_le_bytes());
    put(&mut img, off + 0x11C, &2u16.to_le_bytes());
    img[off + 0x139] = 1;
    let sum = sum16_le(&img[off..off + 0x16E]);
    put(&mut img, off + 0x16E, &sum.wrapping_neg().to_le_bytes());
    img
}

// ============================================================================
// Sources
// ============================================================================

/// Wraps an in-memory image and remembers every read request.
pub struct RecordingSource {
    inner: MemoryReader,
    pub reads: Vec<(u64, usize)>,
}

impl RecordingSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: MemoryReader::new(data),
            reads: Vec::new(),
        }
    }
}

impl BlockSource for RecordingSource {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        self.reads.push((offset, buffer.len()));
        self.inner.read_chunk(offset, buffer)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}

/// An image whose reads fail with an I/O error at or beyond `fail_from`.
pub struct FailingSource {
    inner: MemoryReader,
    fail_from: u64,
}

impl FailingSource {
    pub fn new(data: Vec<u8>, fail_from: u64) -> Self {
        Self {
            inner: MemoryReader::new(data),
            fail_from,
        }
    }
}

impl BlockSource for FailingSource {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if offset + buffer.len() as u64 > self.fail_from {
            return Err(ProbeError::Io(io::Error::other("medium error")));
        }
        self.inner.read_chunk(offset, buffer)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}
