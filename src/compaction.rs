// compaction.rs — CPU reference implementation of the stream-compaction
// algorithms, mirrored pass-for-pass from the WGSL kernels.
//
// The GPU cannot produce a variable-length list in one pass: every thread
// writes only its own output pixel and no thread can know a running index.
// Compaction is therefore a fixed schedule of full-texture passes. This
// module runs the exact same schedule on the CPU — same state encoding,
// same saturation limits, same walk rules — and is the authoritative
// reference the GPU kernels are validated against (same architecture rule
// as the rest of this crate: CPU first, GPU must match).
//
// SKIP-OFFSET STRATEGY
// ─────────────────────
// Treat the image as one raster-order sequence. Three pass kinds:
//
//   1. skip pass — each pixel scans SKIP_WINDOW pixels ahead and stores
//      (offset to the nearest subsequent candidate, 1) or (SKIP_WINDOW, 0)
//      if the window is empty. This distributes a singly-linked "next
//      candidate" structure across the image.
//
//   2. long-skip passes (pointer jumping) — each pixel composes up to
//      LONG_SKIP_JUMPS successor jumps from the previous pass into one.
//      Jump reach grows like SKIP_WINDOW * (1 + LONG_SKIP_JUMPS)^pass, so
//      a handful of passes cover any image. The composed state keeps an
//      exact count of candidates consumed by the jump; offsets and counts
//      saturate at 0xFFFF (a saturated jump is simply never taken).
//
//   3. position passes — each output slot q walks the chains from the
//      image origin until it has consumed q+1 candidates: long jumps while
//      the consumed count stays below what is still needed, single raw
//      skips otherwise. The GPU splits slots across POSITION_PASSES
//      dispatches to bound per-pass work; the walk itself is identical.
//
// PREFIX-SUM STRATEGY
// ────────────────────
// Pad the mask to power-of-two sides, run a Hillis–Steele inclusive scan
// over the flattened raster index (log2(N) doubling passes), then resolve
// each slot q with a bitwise binary-search descent over the monotonic
// prefix array (one bit per pass on the GPU). Slot q maps to the smallest
// flat index whose prefix reaches q+1.
//
// Both strategies fill slots in raster order of the candidates, so their
// outputs agree exactly — the decoder cannot tell them apart.

/// Scan window of the initial skip pass, and the largest raw offset.
pub const SKIP_WINDOW: u16 = 7;

/// Number of pointer-jumping passes. Reach after the last pass is
/// SKIP_WINDOW * (1 + LONG_SKIP_JUMPS)^LONG_SKIP_PASSES ≈ 117k pixels,
/// clamped to the 16-bit offset encoding.
pub const LONG_SKIP_PASSES: usize = 5;

/// Jump compositions per pixel per long-skip pass.
pub const LONG_SKIP_JUMPS: usize = 6;

/// Dispatches the slot range is split across in the position-encoding
/// step. Purely a per-pass work bound; results do not depend on it.
pub const POSITION_PASSES: usize = 4;

/// Iteration cap for one slot's chain walk. Generous: a walk needs at
/// most ~capacity candidate-consuming steps plus a few long jumps per
/// 64k pixels of dead space.
pub const WALK_BUDGET: usize = 16384;

/// Saturation limit for composed offsets and counts (16-bit encoding in
/// the rg/ba channels of the skip texture).
const SKIP_SATURATE: u32 = 0xffff;

/// Which compaction algorithm the encoder schedules. Both satisfy the
/// same output contract; this is a construction-time choice, invisible
/// in the encoded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStrategy {
    #[default]
    SkipOffset,
    PrefixSum,
}

// ---------------------------------------------------------------------------
// Candidate mask
// ---------------------------------------------------------------------------

/// A binary per-pixel candidate mask. Each pixel is exactly set or unset,
/// so duplicate candidates cannot exist by construction.
#[derive(Debug, Clone)]
pub struct CandidateMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl CandidateMask {
    pub fn new(width: u32, height: u32) -> Self {
        CandidateMask { width, height, bits: vec![false; (width * height) as usize] }
    }

    /// Build a mask with the given candidate pixels set.
    pub fn from_coords(width: u32, height: u32, coords: &[(u32, u32)]) -> Self {
        let mut mask = Self::new(width, height);
        for &(x, y) in coords {
            mask.set(x, y);
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set(&mut self, x: u32, y: u32) {
        assert!(x < self.width && y < self.height, "candidate out of bounds");
        self.bits[(y * self.width + x) as usize] = true;
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.width + x) as usize]
    }

    /// Number of set candidates.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Raster-order pixel data in the mask texture convention: r = 255
    /// for a candidate, 0 otherwise; gba unused.
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len() * 4];
        for (i, &b) in self.bits.iter().enumerate() {
            if b {
                out[i * 4] = 255;
            }
        }
        out
    }

    fn flat(&self, i: usize) -> bool {
        self.bits[i]
    }

    fn len(&self) -> usize {
        self.bits.len()
    }
}

// ---------------------------------------------------------------------------
// Skip-offset passes
// ---------------------------------------------------------------------------

/// Per-pixel skip state: jumping from pixel `i` to `i + off` consumes
/// exactly `cnt` candidates (the candidates in the half-open interval
/// `(i, i + off]`). The invariant is preserved by composition, which is
/// what makes pointer jumping sound here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipState {
    pub off: u16,
    pub cnt: u16,
}

/// Pass 1: raw skip offsets. Mirrors `skip_offset.wgsl`.
pub fn skip_offsets(mask: &CandidateMask) -> Vec<SkipState> {
    let n = mask.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut state = SkipState { off: SKIP_WINDOW, cnt: 0 };
        for j in 1..=SKIP_WINDOW as usize {
            if i + j >= n {
                break;
            }
            if mask.flat(i + j) {
                state = SkipState { off: j as u16, cnt: 1 };
                break;
            }
        }
        out.push(state);
    }
    out
}

/// One pointer-jumping pass: compose each pixel's jump with up to
/// [`LONG_SKIP_JUMPS`] successor jumps. Mirrors `long_skip.wgsl`.
pub fn long_skip_pass(prev: &[SkipState]) -> Vec<SkipState> {
    let n = prev.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut off: u32 = 0;
        let mut cnt: u32 = 0;
        for _ in 0..=LONG_SKIP_JUMPS {
            let pos = i + off as usize;
            if pos >= n {
                break;
            }
            let s = prev[pos];
            if off + s.off as u32 > SKIP_SATURATE || cnt + s.cnt as u32 > SKIP_SATURATE {
                break;
            }
            off += s.off as u32;
            cnt += s.cnt as u32;
        }
        out.push(SkipState { off: off as u16, cnt: cnt as u16 });
    }
    out
}

/// Run the full long-skip schedule.
pub fn long_skip_passes(raw: &[SkipState]) -> Vec<SkipState> {
    let mut composed = raw.to_vec();
    for _ in 0..LONG_SKIP_PASSES {
        composed = long_skip_pass(&composed);
    }
    composed
}

/// Resolve output slot `q` to the flat index of the (q+1)-th candidate in
/// raster order, or `None` if fewer candidates exist (or the walk budget
/// is exhausted). Mirrors the walk in `encode_positions.wgsl`.
pub fn resolve_slot(
    mask: &CandidateMask,
    raw: &[SkipState],
    composed: &[SkipState],
    q: usize,
) -> Option<u32> {
    let n = mask.len();
    if n == 0 {
        return None;
    }

    let mut remaining = q + 1;
    let mut cursor = 0usize;
    if mask.flat(0) {
        remaining -= 1;
        if remaining == 0 {
            return Some(0);
        }
    }

    for _ in 0..WALK_BUDGET {
        // Long jump while it cannot overshoot the target candidate.
        let long = composed[cursor];
        if long.off > 0 && (long.cnt as usize) < remaining && cursor + (long.off as usize) < n {
            remaining -= long.cnt as usize;
            cursor += long.off as usize;
            continue;
        }

        // Raw skip: lands exactly on the next candidate when cnt == 1.
        let step = raw[cursor];
        if cursor + step.off as usize >= n {
            return None; // ran off the end of the image
        }
        cursor += step.off as usize;
        if step.cnt == 1 {
            remaining -= 1;
            if remaining == 0 {
                return Some(cursor as u32);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Prefix-sum passes
// ---------------------------------------------------------------------------

fn next_pow2(v: u32) -> u32 {
    v.max(1).next_power_of_two()
}

/// Inclusive prefix sum of the mask over padded power-of-two dimensions,
/// built with log2(N) Hillis–Steele doubling passes. Returns the prefix
/// array and the padded width. Mirrors `prefix_scan.wgsl`.
pub fn prefix_scan(mask: &CandidateMask) -> (Vec<u32>, u32) {
    let pw = next_pow2(mask.width());
    let ph = next_pow2(mask.height());
    let n = (pw * ph) as usize;

    let mut a: Vec<u32> = (0..n)
        .map(|i| {
            let x = i as u32 % pw;
            let y = i as u32 / pw;
            (x < mask.width() && y < mask.height() && mask.get(x, y)) as u32
        })
        .collect();

    let passes = n.trailing_zeros(); // n is a power of two
    for k in 0..passes {
        let stride = 1usize << k;
        let mut b = Vec::with_capacity(n);
        for i in 0..n {
            let lower = if i >= stride { a[i - stride] } else { 0 };
            b.push(a[i] + lower);
        }
        a = b;
    }
    (a, pw)
}

/// Resolve slot `q` against the prefix array: the smallest flat index
/// whose inclusive prefix reaches q+1, found by a bitwise binary-search
/// descent (one bit per GPU pass). Mirrors `prefix_lookup.wgsl`.
pub fn prefix_lookup(prefix: &[u32], q: usize) -> u32 {
    let n = prefix.len();
    let target = (q + 1) as u32;
    let mut lo = 0usize;
    let mut bit = n >> 1;
    while bit > 0 {
        let probe = lo + bit;
        if probe <= n && prefix[probe - 1] < target {
            lo = probe;
        }
        bit >>= 1;
    }
    lo as u32
}

// ---------------------------------------------------------------------------
// Full schedules
// ---------------------------------------------------------------------------

/// Run a complete compaction on the CPU: resolve up to `capacity` output
/// slots to candidate coordinates. Slot `q` is `None` when fewer than
/// q+1 candidates exist (excess candidates past `capacity` are silently
/// dropped — bounded slots, lossy truncation by contract).
pub fn compact(
    mask: &CandidateMask,
    capacity: usize,
    strategy: CompactionStrategy,
) -> Vec<Option<(u32, u32)>> {
    match strategy {
        CompactionStrategy::SkipOffset => {
            let raw = skip_offsets(mask);
            let composed = long_skip_passes(&raw);
            (0..capacity)
                .map(|q| {
                    resolve_slot(mask, &raw, &composed, q)
                        .map(|flat| (flat % mask.width(), flat / mask.width()))
                })
                .collect()
        }
        CompactionStrategy::PrefixSum => {
            let (prefix, pw) = prefix_scan(mask);
            let total = *prefix.last().unwrap_or(&0) as usize;
            (0..capacity)
                .map(|q| {
                    (q < total).then(|| {
                        let flat = prefix_lookup(&prefix, q);
                        (flat % pw, flat / pw)
                    })
                })
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_offsets_point_at_next_candidate() {
        let mask = CandidateMask::from_coords(8, 1, &[(2, 0), (5, 0)]);
        let raw = skip_offsets(&mask);
        assert_eq!(raw[0], SkipState { off: 2, cnt: 1 });
        assert_eq!(raw[1], SkipState { off: 1, cnt: 1 });
        assert_eq!(raw[2], SkipState { off: 3, cnt: 1 });
        // Past the last candidate: empty window.
        assert_eq!(raw[5], SkipState { off: SKIP_WINDOW, cnt: 0 });
    }

    #[test]
    fn test_skip_offsets_cross_row_boundary() {
        // Raster order ignores rows: a candidate at the start of the next
        // row is "next" for a pixel at the end of the previous one.
        let mask = CandidateMask::from_coords(4, 2, &[(1, 1)]);
        let raw = skip_offsets(&mask);
        // Flat index of (1,1) is 5; pixel 3 (end of row 0) sees off=2.
        assert_eq!(raw[3], SkipState { off: 2, cnt: 1 });
    }

    #[test]
    fn test_long_skip_preserves_count_invariant() {
        let mut mask = CandidateMask::new(64, 1);
        for x in [3u32, 9, 10, 30, 55] {
            mask.set(x, 0);
        }
        let raw = skip_offsets(&mask);
        let composed = long_skip_passes(&raw);
        // For every pixel, cnt must equal the true number of candidates
        // in (i, i+off].
        for (i, s) in composed.iter().enumerate() {
            let end = (i + s.off as usize).min(63);
            let truth = (i + 1..=end).filter(|&j| mask.flat(j)).count();
            assert_eq!(s.cnt as usize, truth, "count invariant broken at pixel {i}");
        }
    }

    #[test]
    fn test_resolve_slots_in_raster_order() {
        let mask = CandidateMask::from_coords(16, 4, &[(10, 2), (3, 0), (0, 0), (15, 3)]);
        let slots = compact(&mask, 8, CompactionStrategy::SkipOffset);
        assert_eq!(slots[0], Some((0, 0)));
        assert_eq!(slots[1], Some((3, 0)));
        assert_eq!(slots[2], Some((10, 2)));
        assert_eq!(slots[3], Some((15, 3)));
        assert!(slots[4..].iter().all(|s| s.is_none()));
    }

    #[test]
    fn test_prefix_scan_totals() {
        let mask = CandidateMask::from_coords(10, 6, &[(0, 0), (9, 5), (4, 3)]);
        let (prefix, pw) = prefix_scan(&mask);
        assert_eq!(pw, 16);
        assert_eq!(*prefix.last().unwrap(), 3);
    }

    #[test]
    fn test_prefix_lookup_finds_each_candidate() {
        let mask = CandidateMask::from_coords(8, 8, &[(1, 1), (6, 2), (7, 7)]);
        let (prefix, pw) = prefix_scan(&mask);
        let flats: Vec<u32> = (0..3).map(|q| prefix_lookup(&prefix, q)).collect();
        let coords: Vec<(u32, u32)> =
            flats.iter().map(|&f| (f % pw, f / pw)).collect();
        assert_eq!(coords, vec![(1, 1), (6, 2), (7, 7)]);
    }

    #[test]
    fn test_strategies_agree_on_random_mask() {
        // Deterministic LCG noise, ~12% density.
        let mut rng = 7u32;
        let mut mask = CandidateMask::new(96, 64);
        for y in 0..64 {
            for x in 0..96 {
                rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                if rng >> 29 == 0 {
                    mask.set(x, y);
                }
            }
        }
        let a = compact(&mask, 2048, CompactionStrategy::SkipOffset);
        let b = compact(&mask, 2048, CompactionStrategy::PrefixSum);
        assert_eq!(a, b, "strategies must resolve identical slots");
    }

    #[test]
    fn test_capacity_truncates_excess() {
        let mut mask = CandidateMask::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                mask.set(x, y); // 1024 candidates
            }
        }
        for strategy in [CompactionStrategy::SkipOffset, CompactionStrategy::PrefixSum] {
            let slots = compact(&mask, 100, strategy);
            assert_eq!(slots.len(), 100);
            assert!(slots.iter().all(|s| s.is_some()));
        }
    }

    #[test]
    fn test_empty_mask_resolves_nothing() {
        let mask = CandidateMask::new(64, 64);
        for strategy in [CompactionStrategy::SkipOffset, CompactionStrategy::PrefixSum] {
            let slots = compact(&mask, 16, strategy);
            assert!(slots.iter().all(|s| s.is_none()));
        }
    }

    #[test]
    fn test_dense_runs_and_long_gaps() {
        // Stress both the cnt bookkeeping (dense run) and the pointer
        // jumping (a gap far longer than SKIP_WINDOW).
        let mut mask = CandidateMask::new(256, 8);
        for x in 0..20 {
            mask.set(x, 0);
        }
        mask.set(200, 7);
        let slots = compact(&mask, 32, CompactionStrategy::SkipOffset);
        for (q, slot) in slots.iter().take(20).enumerate() {
            assert_eq!(*slot, Some((q as u32, 0)));
        }
        assert_eq!(slots[20], Some((200, 7)));
        assert!(slots[21].is_none());
    }
}
