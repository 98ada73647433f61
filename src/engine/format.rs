//! On-disk layout constants.
//!
//! An archive is a 16-byte header followed by data blocks and group tables:
//!
//! ```text
//! header:  magic[5] | frozen u8 | version u16 | root_pos u64
//! data:    size u64 | bytes[size]
//! group:   num_children u64 | child_offset u64 * num_children
//! ```
//!
//! Child offsets carry a type flag in the most significant bit: set for data
//! blocks, clear for groups. Groups are written bottom-up so every child
//! offset is known when its parent table is emitted; the root position is
//! patched into the header last and the frozen flag marks the file complete.

/// Magic bytes at the start of an archive.
pub const MAGIC: &[u8; 5] = b"PtArc";

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Offset of the frozen flag in the header.
pub const FROZEN_OFFSET: usize = 5;

/// Offset of the version in the header.
pub const VERSION_OFFSET: usize = 6;

/// Offset of the root group position in the header.
pub const ROOT_POS_OFFSET: usize = 8;

/// Current format version.
pub const CURRENT_VERSION: u16 = 1;

/// Frozen flag value once the archive is finalized.
pub const FROZEN_FLAG: u8 = 0xFF;

/// Frozen flag value while the archive is being written.
pub const NOT_FROZEN_FLAG: u8 = 0x00;

/// Bit marking a child offset as a data block.
pub const DATA_FLAG_MASK: u64 = 1 << 63;

/// Mask to extract the actual offset from a child pointer.
pub const OFFSET_MASK: u64 = !DATA_FLAG_MASK;

/// Node tags stored as the first byte of every node's header block.
pub mod tag {
    pub const INTEGER: u8 = 1;
    pub const SCALED_INTEGER: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STRING: u8 = 4;
    pub const BLOB: u8 = 5;
    pub const STRUCTURE: u8 = 6;
    pub const VECTOR: u8 = 7;
    pub const COMPRESSED_VECTOR: u8 = 8;
}

/// Check if a child offset points at a group.
#[inline]
pub const fn is_group_offset(offset: u64) -> bool {
    (offset & DATA_FLAG_MASK) == 0
}

/// Check if a child offset points at a data block.
#[inline]
pub const fn is_data_offset(offset: u64) -> bool {
    (offset & DATA_FLAG_MASK) != 0
}

/// Extract the actual position from a child offset.
#[inline]
pub const fn extract_offset(offset: u64) -> u64 {
    offset & OFFSET_MASK
}

/// Create a group child offset.
#[inline]
pub const fn make_group_offset(pos: u64) -> u64 {
    pos & OFFSET_MASK
}

/// Create a data child offset.
#[inline]
pub const fn make_data_offset(pos: u64) -> u64 {
    pos | DATA_FLAG_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(MAGIC.len(), FROZEN_OFFSET);
        assert_eq!(VERSION_OFFSET + 2, ROOT_POS_OFFSET);
        assert_eq!(ROOT_POS_OFFSET + 8, HEADER_SIZE);
    }

    #[test]
    fn test_offsets() {
        let group = make_group_offset(0x1234);
        assert!(is_group_offset(group));
        assert!(!is_data_offset(group));
        assert_eq!(extract_offset(group), 0x1234);

        let data = make_data_offset(0x5678);
        assert!(is_data_offset(data));
        assert!(!is_group_offset(data));
        assert_eq!(extract_offset(data), 0x5678);
        assert_eq!(data, 0x8000_0000_0000_5678);
    }
}
