// encoding.rs — encoded-keypoint texture layout: sizing math and the
// host-side record codec (the "decoder" half of the encoder/decoder pair).
//
// THE PACKED TEXTURE
// ───────────────────
// Keypoint records are packed into a square Rgba8Uint texture of side
// `encoder_length`. Reading the texture's pixels in raster order gives a
// flat byte stream; each record occupies `pixels_per_keypoint` pixels
// (4 bytes each), laid out as:
//
//   pixel 0: x_lo x_hi y_lo y_hi     position, u16 fixed point (3 frac bits)
//   pixel 1: lod  rot  s_lo s_hi     lod u8 fixed, rotation byte, score 8.8
//   pixel 2+: descriptor bytes, then extra bytes, zero-padded to the
//             pixel boundary
//
// A slot whose position bytes are all 0xFF is a null slot — the sentinel
// the GPU writes for every slot past the last detected keypoint. The
// decoder must treat the layout as a stable wire format: the GPU encoder
// (gpu/encoder.rs + shaders) and this module must agree byte for byte.
//
// Everything here is pure and CPU-side, so the whole sizing contract is
// covered by fast unit tests with no GPU in sight.

use crate::keypoint::{
    decode_lod, decode_position, decode_rotation, decode_score, encode_lod,
    encode_position, encode_rotation, encode_score, Keypoint, MAX_ENCODER_CAPACITY,
    MIN_ENCODER_LENGTH, MIN_KEYPOINT_SIZE, NULL_POSITION,
};

/// Pixels needed per keypoint record for a given payload configuration.
/// Always ≥ 2 (the 8-byte header fills two Rgba8 pixels).
pub fn pixels_per_keypoint(descriptor_size: usize, extra_size: usize) -> usize {
    (MIN_KEYPOINT_SIZE + descriptor_size + extra_size).div_ceil(4)
}

/// Side length of the square texture holding `capacity` records.
/// Never below [`MIN_ENCODER_LENGTH`], even for capacity 0.
pub fn encoder_length(capacity: usize, descriptor_size: usize, extra_size: usize) -> u32 {
    let capacity = capacity.min(MAX_ENCODER_CAPACITY);
    let pixels = capacity * pixels_per_keypoint(descriptor_size, extra_size);
    let side = (pixels as f64).sqrt().ceil() as u32;
    side.max(MIN_ENCODER_LENGTH)
}

/// Inverse query: how many records fit in a texture of side `length`?
pub fn encoder_capacity(descriptor_size: usize, extra_size: usize, length: u32) -> usize {
    (length as usize * length as usize) / pixels_per_keypoint(descriptor_size, extra_size)
}

/// Payload configuration shared by the GPU encoder and the host decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeypointEncoding {
    /// Descriptor payload per record, in bytes.
    pub descriptor_size: usize,
    /// Extra opaque payload per record, in bytes.
    pub extra_size: usize,
}

impl KeypointEncoding {
    pub fn new(descriptor_size: usize, extra_size: usize) -> Self {
        KeypointEncoding { descriptor_size, extra_size }
    }

    /// Pixels per record under this encoding.
    pub fn pixels_per_keypoint(&self) -> usize {
        pixels_per_keypoint(self.descriptor_size, self.extra_size)
    }

    /// Bytes per record (pixel count × 4, includes padding).
    pub fn record_bytes(&self) -> usize {
        self.pixels_per_keypoint() * 4
    }

    /// Side length for the given capacity.
    pub fn length_for(&self, capacity: usize) -> u32 {
        encoder_length(capacity, self.descriptor_size, self.extra_size)
    }

    /// Record capacity of a texture with the given side length.
    pub fn capacity_of(&self, length: u32) -> usize {
        encoder_capacity(self.descriptor_size, self.extra_size, length)
    }

    // -----------------------------------------------------------------------
    // Record codec
    // -----------------------------------------------------------------------

    /// Serialize one keypoint into `out` (must be `record_bytes()` long).
    /// Descriptor bytes beyond `descriptor_size` are truncated; missing
    /// bytes are zero-filled.
    pub fn encode_record(&self, kp: &Keypoint, out: &mut [u8]) {
        assert_eq!(out.len(), self.record_bytes(), "record buffer size mismatch");
        out.fill(0);

        out[0..2].copy_from_slice(&encode_position(kp.x).to_le_bytes());
        out[2..4].copy_from_slice(&encode_position(kp.y).to_le_bytes());
        out[4] = encode_lod(kp.lod);
        out[5] = encode_rotation(kp.rotation);
        out[6..8].copy_from_slice(&encode_score(kp.score).to_le_bytes());

        if let Some(desc) = &kp.descriptor {
            let n = desc.len().min(self.descriptor_size);
            out[MIN_KEYPOINT_SIZE..MIN_KEYPOINT_SIZE + n].copy_from_slice(&desc[..n]);
        }
    }

    /// Write the null sentinel into `out`.
    pub fn encode_null(&self, out: &mut [u8]) {
        assert_eq!(out.len(), self.record_bytes(), "record buffer size mismatch");
        out.fill(0xff);
    }

    /// Deserialize one record; `None` for a null slot.
    pub fn decode_record(&self, bytes: &[u8]) -> Option<Keypoint> {
        assert!(bytes.len() >= self.record_bytes(), "record truncated");

        let raw_x = u16::from_le_bytes([bytes[0], bytes[1]]);
        if raw_x == NULL_POSITION {
            return None;
        }
        let raw_y = u16::from_le_bytes([bytes[2], bytes[3]]);
        let raw_score = u16::from_le_bytes([bytes[6], bytes[7]]);

        let descriptor = (self.descriptor_size > 0).then(|| {
            bytes[MIN_KEYPOINT_SIZE..MIN_KEYPOINT_SIZE + self.descriptor_size].to_vec()
        });

        Some(Keypoint {
            x: decode_position(raw_x),
            y: decode_position(raw_y),
            lod: decode_lod(bytes[4]),
            rotation: decode_rotation(bytes[5]),
            score: decode_score(raw_score),
            descriptor,
        })
    }
}

/// Decode a full encoded-keypoint texture read back as raw bytes.
///
/// `bytes` is the raster-order pixel data of a square Rgba8Uint texture of
/// side `length` (so `length * length * 4` bytes). Returns the non-null
/// records in slot order. This is the host-side decoder the GPU encoder's
/// output contract is written against: the same `(descriptor_size,
/// extra_size, length)` triple must reconstruct identical field values
/// regardless of which compaction strategy produced the texture.
pub fn decode_keypoints(
    bytes: &[u8],
    descriptor_size: usize,
    extra_size: usize,
    length: u32,
) -> Vec<Keypoint> {
    let encoding = KeypointEncoding::new(descriptor_size, extra_size);
    let expected = length as usize * length as usize * 4;
    assert_eq!(bytes.len(), expected, "texture byte length mismatch");

    let record_bytes = encoding.record_bytes();
    let slots = encoding.capacity_of(length);

    let mut out = Vec::new();
    for slot in 0..slots {
        let start = slot * record_bytes;
        if let Some(kp) = encoding.decode_record(&bytes[start..start + record_bytes]) {
            out.push(kp);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
