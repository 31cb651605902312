// tests/test_compaction.rs — end-to-end properties of the compaction
// reference and the encoded-texture byte contract, all CPU-side.
//
// The GPU kernels replay the exact pass schedule tested here (see
// src/gpu/encoder.rs for the GPU-vs-CPU comparison tests), so these
// tests define the behavior: slot count, raster ordering, truncation,
// strategy equivalence, and the encode/decode byte layout.

use keypack::compaction::{compact, CandidateMask, CompactionStrategy};
use keypack::encoding::{decode_keypoints, KeypointEncoding};
use keypack::keypoint::{Keypoint, MAX_ENCODER_CAPACITY};

const BOTH: [CompactionStrategy; 2] =
    [CompactionStrategy::SkipOffset, CompactionStrategy::PrefixSum];

/// Deterministic LCG noise mask with roughly `density_num/8` density.
fn noise_mask(width: u32, height: u32, mut seed: u32, density_num: u32) -> CandidateMask {
    let mut mask = CandidateMask::new(width, height);
    for y in 0..height {
        for x in 0..width {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            if seed >> 29 < density_num {
                mask.set(x, y);
            }
        }
    }
    mask
}

/// All candidates of a mask, in raster order.
fn raster_candidates(mask: &CandidateMask) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.get(x, y) {
                out.push((x, y));
            }
        }
    }
    out
}

// ===== Slot count and ordering =====

#[test]
fn resolves_min_of_candidates_and_capacity() {
    let mask = noise_mask(80, 60, 42, 1);
    let k = mask.count();
    assert!(k > 0);

    for strategy in BOTH {
        for capacity in [1usize, k / 2, k, k + 50, 4096] {
            let resolved = compact(&mask, capacity, strategy)
                .into_iter()
                .flatten()
                .count();
            assert_eq!(
                resolved,
                k.min(capacity),
                "{strategy:?} with capacity {capacity} on {k} candidates"
            );
        }
    }
}

#[test]
fn slots_follow_raster_order_exactly() {
    let mask = noise_mask(100, 40, 5, 1);
    let expected = raster_candidates(&mask);

    for strategy in BOTH {
        let slots: Vec<(u32, u32)> = compact(&mask, expected.len(), strategy)
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(slots, expected, "{strategy:?} broke raster ordering");
    }
}

#[test]
fn single_candidate_lands_in_slot_zero() {
    let mask = CandidateMask::from_coords(64, 64, &[(10, 20)]);
    for strategy in BOTH {
        let slots = compact(&mask, 8, strategy);
        assert_eq!(slots[0], Some((10, 20)));
        assert!(slots[1..].iter().all(|s| s.is_none()));
    }
}

// ===== Truncation =====

#[test]
fn truncation_keeps_the_raster_prefix() {
    // More candidates than the capacity: ~3000 over a capacity of 2048.
    let mask = noise_mask(200, 120, 17, 1);
    let all = raster_candidates(&mask);
    assert!(all.len() > 2048, "mask too sparse: {} candidates", all.len());

    for strategy in BOTH {
        let slots: Vec<(u32, u32)> =
            compact(&mask, 2048, strategy).into_iter().flatten().collect();
        assert_eq!(slots.len(), 2048);
        assert_eq!(slots, all[..2048], "{strategy:?} truncated the wrong candidates");
    }
}

// ===== Walk budget =====

#[test]
fn sparse_stride_fills_every_slot_at_max_capacity() {
    // Candidates every 8th texel — one more than the raw scan window, so
    // every slot walk leans on the composed long-skip chains. 384×192 =
    // 73728 texels, 9216 candidates against 8192 slots.
    let (w, h) = (384u32, 192u32);
    let mut mask = CandidateMask::new(w, h);
    for i in (0..(w * h) as usize).step_by(8) {
        mask.set(i as u32 % w, i as u32 / w);
    }
    let all = raster_candidates(&mask);
    assert!(all.len() > MAX_ENCODER_CAPACITY);

    for strategy in BOTH {
        let slots: Vec<(u32, u32)> = compact(&mask, MAX_ENCODER_CAPACITY, strategy)
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(slots.len(), MAX_ENCODER_CAPACITY, "{strategy:?} left slots unresolved");
        assert_eq!(slots, all[..MAX_ENCODER_CAPACITY]);
    }
}

#[test]
fn dense_block_with_far_tail_fills_every_slot() {
    // A dense block of exactly MAX_ENCODER_CAPACITY candidates, then a
    // long empty stretch and one trailing candidate past the capacity.
    let mut mask = CandidateMask::new(512, 256);
    for i in 0..MAX_ENCODER_CAPACITY {
        mask.set(i as u32 % 512, i as u32 / 512);
    }
    mask.set(511, 255);
    let all = raster_candidates(&mask);

    for strategy in BOTH {
        let slots: Vec<(u32, u32)> = compact(&mask, MAX_ENCODER_CAPACITY, strategy)
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(slots.len(), MAX_ENCODER_CAPACITY);
        assert_eq!(slots, all[..MAX_ENCODER_CAPACITY], "{strategy:?} lost the dense prefix");
    }
}

// ===== Strategy equivalence =====

#[test]
fn strategies_agree_on_non_power_of_two_shapes() {
    // Odd shapes exercise the prefix strategy's padding.
    for (w, h) in [(7u32, 5u32), (31, 17), (100, 33), (129, 65)] {
        let mask = noise_mask(w, h, w * 31 + h, 2);
        let a = compact(&mask, 512, CompactionStrategy::SkipOffset);
        let b = compact(&mask, 512, CompactionStrategy::PrefixSum);
        assert_eq!(a, b, "strategies diverge on {w}×{h}");
    }
}

#[test]
fn strategies_agree_on_degenerate_masks() {
    let cases = [
        CandidateMask::new(1, 1),
        CandidateMask::from_coords(1, 1, &[(0, 0)]),
        CandidateMask::from_coords(512, 1, &[(0, 0), (511, 0)]),
        CandidateMask::from_coords(1, 512, &[(0, 0), (0, 511)]),
    ];
    for mask in &cases {
        let a = compact(mask, 16, CompactionStrategy::SkipOffset);
        let b = compact(mask, 16, CompactionStrategy::PrefixSum);
        assert_eq!(a, b);
    }
}

// ===== Encode/decode byte contract =====

/// Build the encoded texture bytes the way the GPU property pass does:
/// resolved slots become records, everything else becomes the sentinel.
fn encode_texture_bytes(
    mask: &CandidateMask,
    capacity: usize,
    encoding: KeypointEncoding,
    strategy: CompactionStrategy,
) -> (Vec<u8>, u32) {
    let length = encoding.length_for(capacity);
    let mut bytes = vec![0xffu8; (length * length * 4) as usize];
    let rb = encoding.record_bytes();

    for (q, slot) in compact(mask, capacity, strategy).into_iter().enumerate() {
        if let Some((x, y)) = slot {
            let kp = Keypoint {
                x: x as f32,
                y: y as f32,
                lod: 0.0,
                rotation: 0.0,
                score: 1.0,
                descriptor: None,
            };
            encoding.encode_record(&kp, &mut bytes[q * rb..(q + 1) * rb]);
        }
    }
    (bytes, length)
}

#[test]
fn encoded_texture_decodes_to_the_same_candidates() {
    let mask = noise_mask(96, 64, 7, 1);
    let expected = raster_candidates(&mask);
    let encoding = KeypointEncoding::new(0, 0);

    for strategy in BOTH {
        let (bytes, length) = encode_texture_bytes(&mask, 2048, encoding, strategy);
        let decoded = decode_keypoints(&bytes, 0, 0, length);

        assert_eq!(decoded.len(), expected.len());
        for (kp, &(x, y)) in decoded.iter().zip(expected.iter()) {
            assert_eq!((kp.x, kp.y), (x as f32, y as f32));
            assert_eq!(kp.score, 1.0);
            assert_eq!(kp.lod, 0.0);
        }
    }
}

#[test]
fn decoder_is_strategy_blind() {
    // Same mask through both strategies must yield byte-identical
    // textures — the decoder cannot tell which one ran.
    let mask = noise_mask(50, 70, 23, 1);
    let encoding = KeypointEncoding::new(4, 0);
    let (a, _) = encode_texture_bytes(&mask, 1000, encoding, CompactionStrategy::SkipOffset);
    let (b, _) = encode_texture_bytes(&mask, 1000, encoding, CompactionStrategy::PrefixSum);
    assert_eq!(a, b);
}

#[test]
fn oversized_capacity_is_clamped_by_sizing() {
    // Sizing math caps at MAX_ENCODER_CAPACITY; a texture sized for an
    // oversized request holds exactly the clamped count.
    let encoding = KeypointEncoding::new(0, 0);
    let length = encoding.length_for(MAX_ENCODER_CAPACITY * 4);
    assert_eq!(length, encoding.length_for(MAX_ENCODER_CAPACITY));
    assert!(encoding.capacity_of(length) >= MAX_ENCODER_CAPACITY);
}
