//! Common scanning utilities

use memchr::memmem;

use crate::constants::PES_START_CODE;

/// Positions of every `00 00 01` prefix together with the byte after it
pub fn start_codes(data: &[u8]) -> impl Iterator<Item = (usize, u8)> + '_ {
    memmem::find_iter(data, &PES_START_CODE)
        .filter_map(move |pos| data.get(pos + 3).map(|&code| (pos, code)))
}

/// Positions of a fixed signature
pub fn signature_positions<'a>(data: &'a [u8], sig: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    memmem::find_iter(data, sig)
}

pub fn contains_signature(data: &[u8], sig: &[u8]) -> bool {
    memmem::find(data, sig).is_some()
}

pub fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

pub fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

pub fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

pub fn le_u64(data: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_le_bytes(data.get(at..at + 8)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_codes_skip_truncated_tail() {
        let data = [0, 0, 1, 0xB3, 9, 0, 0, 0, 1, 0x65, 0, 0, 1];
        let found: Vec<_> = start_codes(&data).collect();
        assert_eq!(found, vec![(0, 0xB3), (6, 0x65)]);
    }

    #[test]
    fn test_endian_readers() {
        let d = [0x01, 0x02, 0x03, 0x04, 0, 0, 0, 0];
        assert_eq!(be_u16(&d, 0), Some(0x0102));
        assert_eq!(le_u16(&d, 0), Some(0x0201));
        assert_eq!(le_u32(&d, 0), Some(0x0403_0201));
        assert_eq!(le_u64(&d, 0), Some(0x0403_0201));
        assert_eq!(le_u32(&d, 6), None);
    }
}
