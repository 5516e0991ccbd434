//! Checksums used to turn a magic hit into a confirmed match.

/// Wrapping sum of little-endian 16-bit words. A trailing odd byte is ignored.
pub fn sum16_le(data: &[u8]) -> u16 {
    data.chunks_exact(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])))
}

/// Wrapping sum of little-endian 32-bit words. Trailing bytes are ignored.
pub fn sum32_le(data: &[u8]) -> u32 {
    data.chunks_exact(4).fold(0u32, |acc, w| {
        acc.wrapping_add(u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
    })
}

/// Reflected CRC-32 (IEEE polynomial) continuing from `seed`, with no
/// implicit inversion on entry or exit. Several on-disk formats store the
/// checksum in this raw form with a format-specific seed.
///
/// Composable: `crc32_raw(crc32_raw(s, a), b) == crc32_raw(s, a ++ b)`.
pub fn crc32_raw(seed: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(!seed);
    hasher.update(data);
    !hasher.finalize()
}

/// Standard CRC-32C (Castagnoli), as used by btrfs.
#[inline]
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Initial value of the LVM2 label checksum.
pub const LVM2_CRC_SEED: u32 = 0xf597_a6cf;

const LVM2_CRC_TABLE: [u32; 16] = [
    0x0000_0000, 0x1db7_1064, 0x3b6e_20c8, 0x26d9_30ac, 0x76dc_4190, 0x6b6b_51f4, 0x4db2_6158,
    0x5005_713c, 0xedb8_8320, 0xf00f_9344, 0xd6d6_a3e8, 0xcb61_b38c, 0x9b64_c2b0, 0x86d3_d2d4,
    0xa00a_e278, 0xbdbd_f21c,
];

/// Nibble-table CRC used in LVM2 physical volume labels.
pub fn lvm2_crc(seed: u32, data: &[u8]) -> u32 {
    data.iter().fold(seed, |mut crc, &b| {
        crc ^= u32::from(b);
        crc = (crc >> 4) ^ LVM2_CRC_TABLE[(crc & 0xf) as usize];
        (crc >> 4) ^ LVM2_CRC_TABLE[(crc & 0xf) as usize]
    })
}

/// exFAT boot region checksum over the main boot sector and the ten sectors
/// after it. Bytes 106, 107 (VolumeFlags) and 112 (PercentInUse) of the
/// first sector are excluded.
pub fn exfat_boot_checksum(region: &[u8]) -> u32 {
    region.iter().enumerate().fold(0u32, |sum, (i, &b)| {
        if matches!(i, 106 | 107 | 112) {
            sum
        } else {
            sum.rotate_right(1).wrapping_add(u32::from(b))
        }
    })
}
