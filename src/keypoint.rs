// keypoint.rs — the keypoint record and its byte-level field codecs.
//
// A keypoint is the logical record `{x, y, lod, rotation, score,
// descriptor}`. On the GPU it lives inside a packed Rgba8Uint texture
// (see encoding.rs for the slot layout); this module defines the value
// type and the per-field conversions between `f32` fields and the bytes
// stored in that texture.
//
// FIXED-POINT CHOICES
// ────────────────────
// Position: u16 with 3 fractional bits. Sub-pixel eighths are the finest
// precision the upstream refinement produces, and 13 integer bits cover
// images up to 8191 px per side — beyond the 2-D texture limit of every
// target device.
//
// LOD: u8 with 3 fractional bits. Level-of-detail is a small non-negative
// number (scale = 2^lod); 0..=31.875 in eighths is more than any pyramid.
//
// Rotation: one byte mapping [-π, π] linearly onto [0, 255].
//
// Score: u16 fixed point 8.8. Scores are non-negative responses; 8.8
// keeps relative ordering for values up to 256 with 1/256 granularity.

use std::f32::consts::PI;

/// Smallest keypoint record: 8 header bytes (position + properties),
/// before any descriptor/extra payload.
pub const MIN_KEYPOINT_SIZE: usize = 8;

/// Hard upper bound on encoder capacity. Capacity writes saturate here.
pub const MAX_ENCODER_CAPACITY: usize = 8192;

/// Lower bound on the encoded texture's side length. Enforced even for
/// capacity 0 so the decoder never special-cases tiny textures.
pub const MIN_ENCODER_LENGTH: u32 = 32;

/// Fractional bits in the fixed-point position encoding (eighths).
pub const POSITION_FIX_BITS: u32 = 3;

/// Sentinel raw value marking a null slot: a position x of 0xFFFF never
/// decodes to a real coordinate.
pub const NULL_POSITION: u16 = 0xffff;

/// A decoded keypoint.
///
/// Immutable value type; `scale()` derives the pyramid scale from `lod`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    /// Sub-pixel x coordinate (eighth-pixel precision after a round trip).
    pub x: f32,
    /// Sub-pixel y coordinate.
    pub y: f32,
    /// Level-of-detail; 0 = base resolution.
    pub lod: f32,
    /// Orientation in radians, in [-π, π].
    pub rotation: f32,
    /// Detector response. Higher = stronger.
    pub score: f32,
    /// Opaque descriptor bytes, if the encoder was configured with a
    /// non-zero descriptor size.
    pub descriptor: Option<Vec<u8>>,
}

impl Keypoint {
    /// The scale corresponding to this keypoint's level-of-detail.
    pub fn scale(&self) -> f32 {
        self.lod.exp2()
    }
}

// ---------------------------------------------------------------------------
// Field codecs
// ---------------------------------------------------------------------------

/// Encode a coordinate as u16 fixed point (3 fractional bits).
/// Saturates below the null sentinel so a real coordinate can never
/// alias a null slot.
pub fn encode_position(v: f32) -> u16 {
    let fixed = (v.max(0.0) * (1 << POSITION_FIX_BITS) as f32).round() as u32;
    fixed.min(NULL_POSITION as u32 - 1) as u16
}

/// Decode a u16 fixed-point coordinate.
pub fn decode_position(raw: u16) -> f32 {
    raw as f32 / (1 << POSITION_FIX_BITS) as f32
}

/// Encode level-of-detail as u8 fixed point (3 fractional bits).
pub fn encode_lod(lod: f32) -> u8 {
    (lod.clamp(0.0, 255.0 / 8.0) * 8.0).round() as u8
}

/// Decode a u8 fixed-point level-of-detail.
pub fn decode_lod(raw: u8) -> f32 {
    raw as f32 / 8.0
}

/// Map rotation in [-π, π] onto one byte.
pub fn encode_rotation(rot: f32) -> u8 {
    let t = (rot.clamp(-PI, PI) + PI) / (2.0 * PI);
    (t * 255.0).round() as u8
}

/// Inverse of [`encode_rotation`].
pub fn decode_rotation(raw: u8) -> f32 {
    (raw as f32 / 255.0) * 2.0 * PI - PI
}

/// Encode a score as u16 fixed point 8.8 (clamped to [0, 255.996]).
pub fn encode_score(score: f32) -> u16 {
    (score.clamp(0.0, 65535.0 / 256.0) * 256.0).round() as u16
}

/// Decode a u16 fixed-point 8.8 score.
pub fn decode_score(raw: u16) -> f32 {
    raw as f32 / 256.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
