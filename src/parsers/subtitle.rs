//! PGS (Blu-ray presentation graphics) segment detector

use super::utils::be_u16;

const PGS_PALETTE: u8 = 0x14;
const PGS_OBJECT: u8 = 0x15;
const PGS_PRESENTATION: u8 = 0x16;
const PGS_WINDOW: u8 = 0x17;
const PGS_END: u8 = 0x80;

fn is_segment_type(t: u8) -> bool {
    matches!(t, PGS_PALETTE | PGS_OBJECT | PGS_PRESENTATION | PGS_WINDOW | PGS_END)
}

/// Walks `type (1) | length (2) | body` segments from the start of the PGS
/// elementary stream and returns the offset of every segment header.
/// Presentation composition segments start a display set; all segment
/// headers are anchors. On an invalid type the walk resyncs on the next
/// plausible header.
pub fn pgs_sync_points(data: &[u8]) -> Vec<usize> {
    let mut points = Vec::new();
    let mut pos = 0usize;
    while pos + 3 <= data.len() {
        let seg_type = data[pos];
        let len = be_u16(data, pos + 1).unwrap_or(0) as usize;
        let next = pos + 3 + len;
        if is_segment_type(seg_type) && next <= data.len() && plausible_follow(data, next) {
            points.push(pos);
            pos = next;
        } else {
            pos += 1;
        }
    }
    points
}

/// A header is trusted when the stream ends right after it or another
/// segment type follows.
fn plausible_follow(data: &[u8], next: usize) -> bool {
    next == data.len() || data.get(next).is_some_and(|&t| is_segment_type(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(t: u8, body: &[u8]) -> Vec<u8> {
        let mut s = vec![t];
        s.extend_from_slice(&(body.len() as u16).to_be_bytes());
        s.extend_from_slice(body);
        s
    }

    #[test]
    fn test_walks_display_set() {
        let mut data = segment(PGS_PRESENTATION, &[0u8; 11]);
        data.extend(segment(PGS_WINDOW, &[1u8; 10]));
        data.extend(segment(PGS_PALETTE, &[2u8; 7]));
        data.extend(segment(PGS_END, &[]));
        assert_eq!(pgs_sync_points(&data), vec![0, 14, 27, 37]);
    }

    #[test]
    fn test_resyncs_after_garbage() {
        let mut data = vec![0x99, 0x42, 0x13];
        data.extend(segment(PGS_PRESENTATION, &[0u8; 4]));
        data.extend(segment(PGS_END, &[]));
        assert_eq!(pgs_sync_points(&data), vec![3, 10]);
    }
}
