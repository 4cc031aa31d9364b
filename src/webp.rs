//! Header-only WebP dimension sniffing.
//!
//! Walks the RIFF chunk list starting at byte 12 and decodes pixel
//! dimensions from whichever of the three bitstream chunks ("VP8 ",
//! "VP8L", "VP8X") appears first, without touching pixel data.

/// Pixel dimensions reported by a WebP bitstream chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

const VP8_MAGIC: [u8; 3] = [0x9D, 0x01, 0x2A];
const VP8L_MAGIC: u8 = 0x2F;

/// True when the buffer starts with the 12-byte RIFF/WEBP container prefix.
pub fn is_webp_container(buffer: &[u8]) -> bool {
    buffer.len() >= 12 && &buffer[0..4] == b"RIFF" && &buffer[8..12] == b"WEBP"
}

/// Decodes the pixel dimensions of a WebP buffer, or `None` when the buffer
/// is not a structurally valid WebP file.
///
/// The first dimension-bearing chunk wins. A "VP8 " or "VP8L" chunk with a
/// bad bitstream signature fails the whole parse; the scan does not resume
/// looking for a later chunk.
pub fn parse_dimensions(buffer: &[u8]) -> Option<Dimensions> {
    if buffer.len() < 30 || !is_webp_container(buffer) {
        return None;
    }
    let mut offset = 12usize;
    while buffer.len().saturating_sub(offset) >= 8 {
        let tag: [u8; 4] = buffer[offset..offset + 4].try_into().ok()?;
        let size = u32::from_le_bytes(buffer[offset + 4..offset + 8].try_into().ok()?) as usize;
        let payload_start = offset + 8;
        let payload_end = payload_start.checked_add(size)?;
        if payload_end > buffer.len() {
            return None;
        }
        let payload = &buffer[payload_start..payload_end];
        match &tag {
            b"VP8 " => return parse_lossy(payload),
            b"VP8L" => return parse_lossless(payload),
            b"VP8X" => return parse_extended(payload),
            _ => {}
        }
        // Chunks are padded to even length; the pad byte is not counted in
        // the declared size.
        offset = payload_end + (size & 1);
    }
    None
}

fn parse_lossy(payload: &[u8]) -> Option<Dimensions> {
    if payload.len() < 10 || payload[3..6] != VP8_MAGIC {
        return None;
    }
    let raw_width = u32::from(payload[6]) | (u32::from(payload[7] & 0x3F) << 8);
    let raw_height = u32::from(payload[8]) | (u32::from(payload[9] & 0x3F) << 8);
    Some(Dimensions {
        width: raw_width + 1,
        height: raw_height + 1,
    })
}

fn parse_lossless(payload: &[u8]) -> Option<Dimensions> {
    if payload.len() < 5 || payload[0] != VP8L_MAGIC {
        return None;
    }
    let width = ((u32::from(payload[2] & 0x3F) << 8) | u32::from(payload[1])) + 1;
    let height = ((u32::from(payload[4] & 0x0F) << 10)
        | (u32::from(payload[3]) << 2)
        | (u32::from(payload[2] & 0xC0) >> 6))
        + 1;
    Some(Dimensions { width, height })
}

fn parse_extended(payload: &[u8]) -> Option<Dimensions> {
    if payload.len() < 10 {
        return None;
    }
    let width =
        (u32::from(payload[4]) | (u32::from(payload[5]) << 8) | (u32::from(payload[6]) << 16)) + 1;
    let height =
        (u32::from(payload[7]) | (u32::from(payload[8]) << 8) | (u32::from(payload[9]) << 16)) + 1;
    Some(Dimensions { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(chunks: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"WEBP");
        for (tag, payload) in chunks {
            out.extend_from_slice(tag);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
            if payload.len() % 2 == 1 {
                out.push(0);
            }
        }
        out
    }

    fn vp8_payload(width: u32, height: u32) -> Vec<u8> {
        let raw_width = width - 1;
        let raw_height = height - 1;
        vec![
            0,
            0,
            0,
            0x9D,
            0x01,
            0x2A,
            (raw_width & 0xFF) as u8,
            ((raw_width >> 8) & 0x3F) as u8,
            (raw_height & 0xFF) as u8,
            ((raw_height >> 8) & 0x3F) as u8,
        ]
    }

    fn vp8l_payload(width: u32, height: u32) -> Vec<u8> {
        let w = width - 1;
        let h = height - 1;
        let mut payload = vec![
            0x2F,
            (w & 0xFF) as u8,
            (((w >> 8) & 0x3F) | ((h & 0x03) << 6)) as u8,
            ((h >> 2) & 0xFF) as u8,
            ((h >> 10) & 0x0F) as u8,
        ];
        // pad so the whole buffer clears the 30-byte container minimum
        payload.resize(10, 0);
        payload
    }

    fn vp8x_payload(width: u32, height: u32) -> Vec<u8> {
        let w = width - 1;
        let h = height - 1;
        vec![
            0,
            0,
            0,
            0,
            (w & 0xFF) as u8,
            ((w >> 8) & 0xFF) as u8,
            ((w >> 16) & 0xFF) as u8,
            (h & 0xFF) as u8,
            ((h >> 8) & 0xFF) as u8,
            ((h >> 16) & 0xFF) as u8,
        ]
    }

    #[test]
    fn lossy_dimensions_roundtrip() {
        for (width, height) in [(1, 1), (256, 256), (16384, 16384), (640, 480)] {
            let buffer = container(&[(*b"VP8 ", vp8_payload(width, height))]);
            let dims = parse_dimensions(&buffer).expect("valid lossy header");
            assert_eq!(dims, Dimensions { width, height });
        }
    }

    #[test]
    fn lossless_dimensions_roundtrip() {
        for (width, height) in [(1, 1), (256, 256), (16384, 16384), (1023, 511)] {
            let buffer = container(&[(*b"VP8L", vp8l_payload(width, height))]);
            let dims = parse_dimensions(&buffer).expect("valid lossless header");
            assert_eq!(dims, Dimensions { width, height });
        }
    }

    #[test]
    fn extended_dimensions_roundtrip() {
        for (width, height) in [(1, 1), (256, 256), (16384, 16384), (16777216, 16777216)] {
            let buffer = container(&[(*b"VP8X", vp8x_payload(width, height))]);
            let dims = parse_dimensions(&buffer).expect("valid extended header");
            assert_eq!(dims, Dimensions { width, height });
        }
    }

    #[test]
    fn lossy_signature_flip_rejected() {
        for index in 3..6 {
            let mut payload = vp8_payload(256, 256);
            payload[index] ^= 0xFF;
            let buffer = container(&[(*b"VP8 ", payload)]);
            assert_eq!(parse_dimensions(&buffer), None);
        }
    }

    #[test]
    fn lossless_signature_flip_rejected() {
        let mut payload = vp8l_payload(256, 256);
        payload[0] ^= 0xFF;
        let buffer = container(&[(*b"VP8L", payload)]);
        assert_eq!(parse_dimensions(&buffer), None);
    }

    #[test]
    fn bad_signature_stops_the_scan() {
        // A broken VP8L chunk followed by a good VP8 chunk must not recover.
        let mut broken = vp8l_payload(256, 256);
        broken[0] = 0x00;
        let buffer = container(&[
            (*b"VP8L", broken),
            (*b"VP8 ", vp8_payload(256, 256)),
        ]);
        assert_eq!(parse_dimensions(&buffer), None);
    }

    #[test]
    fn truncation_never_panics() {
        let buffer = container(&[(*b"VP8 ", vp8_payload(256, 256))]);
        assert!(parse_dimensions(&buffer).is_some());
        for len in 0..buffer.len() {
            assert_eq!(parse_dimensions(&buffer[..len]), None);
        }
    }

    #[test]
    fn oversized_declared_chunk_rejected() {
        let mut buffer = container(&[(*b"VP8 ", vp8_payload(256, 256))]);
        // declare a chunk size far past the end of the buffer
        buffer[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(parse_dimensions(&buffer), None);
    }

    #[test]
    fn non_webp_rejected() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.resize(64, 0);
        assert_eq!(parse_dimensions(&jpeg), None);

        let mut riff_only = container(&[(*b"VP8 ", vp8_payload(256, 256))]);
        riff_only[8..12].copy_from_slice(b"WAVE");
        assert_eq!(parse_dimensions(&riff_only), None);
    }

    #[test]
    fn skips_unrelated_odd_chunk_with_padding() {
        let buffer = container(&[
            (*b"JUNK", vec![1, 2, 3, 4, 5, 6, 7]),
            (*b"VP8 ", vp8_payload(128, 64)),
        ]);
        let dims = parse_dimensions(&buffer).expect("dimensions after skipped chunk");
        assert_eq!(
            dims,
            Dimensions {
                width: 128,
                height: 64
            }
        );
    }

    #[test]
    fn extended_chunk_has_no_signature_check() {
        let mut payload = vp8x_payload(512, 512);
        payload[0] = 0xAB;
        payload[1] = 0xCD;
        let buffer = container(&[(*b"VP8X", payload)]);
        assert!(parse_dimensions(&buffer).is_some());
    }

    #[test]
    fn parse_is_idempotent() {
        let buffer = container(&[(*b"VP8L", vp8l_payload(300, 200))]);
        let first = parse_dimensions(&buffer);
        let second = parse_dimensions(&buffer);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn container_sniff() {
        let buffer = container(&[(*b"VP8 ", vp8_payload(256, 256))]);
        assert!(is_webp_container(&buffer));
        assert!(!is_webp_container(&buffer[..11]));
        assert!(!is_webp_container(b"\xFF\xD8\xFF\xE0            "));
    }
}
