// gpu/encoder.rs — the GPU keypoint encoder.
//
// Owns the compiled compaction kernels and the intermediate work
// textures, and records the full pass schedule for one mask into a
// command encoder. The schedule depends only on construction-time
// choices (strategy, capacity, mask dimensions) — identical inputs
// produce a bit-identical encoded texture.
//
// Work textures come from the shared [`TexturePool`] and are reshaped
// lazily: changing the capacity or mask size releases the old set and
// acquires fresh shapes on the next encode. The skip-chain textures run
// with `WrapMode::Repeat` while borrowed; the prior params are recorded
// at acquire time and restored before release (restore-then-release is
// the pool's contract, see gpu/pool.rs).

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};

use crate::compaction::{CompactionStrategy, LONG_SKIP_PASSES, POSITION_PASSES};
use crate::encoding::{decode_keypoints, KeypointEncoding};
use crate::keypoint::{Keypoint, MAX_ENCODER_CAPACITY};

use super::device::{GpuDevice, GpuError};
use super::pool::TexturePool;
use super::program::Program;
use super::texture::{GpuTexture, PendingReadback, TextureParams, WrapMode};

const CLEAR_SRC: &str = include_str!("../shaders/clear.wgsl");
const SKIP_OFFSET_SRC: &str = include_str!("../shaders/skip_offset.wgsl");
const LONG_SKIP_SRC: &str = include_str!("../shaders/long_skip.wgsl");
const ENCODE_POSITIONS_SRC: &str = include_str!("../shaders/encode_positions.wgsl");
const ENCODE_PROPERTIES_SRC: &str = include_str!("../shaders/encode_properties.wgsl");
const PREFIX_SEED_SRC: &str = include_str!("../shaders/prefix_seed.wgsl");
const PREFIX_SCAN_SRC: &str = include_str!("../shaders/prefix_scan.wgsl");
const PREFIX_LOOKUP_SRC: &str = include_str!("../shaders/prefix_lookup.wgsl");
const PREFIX_RESOLVE_SRC: &str = include_str!("../shaders/prefix_resolve.wgsl");

// ---------------------------------------------------------------------------
// Shader uniform mirrors (layouts must match src/shaders/*.wgsl)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ClearParams {
    value: [u32; 4],
}

/// Shared by the skip, long-skip and prefix-seed passes, whose uniforms
/// all carry just the mask dimensions.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MaskParams {
    mask_width: u32,
    mask_height: u32,
    _pad0: u32,
    _pad1: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PositionParams {
    mask_width: u32,
    mask_height: u32,
    length: u32,
    capacity: u32,
    pass_first: u32,
    pass_last: u32,
    _pad0: u32,
    _pad1: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PropertyParams {
    length: u32,
    capacity: u32,
    pixels_per_keypoint: u32,
    _pad0: u32,
    lod_log2_scale: f32,
    max_lod: f32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScanParams {
    stride: u32,
    padded_width: u32,
    padded_height: u32,
    _pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LookupParams {
    probe: u32,
    n: u32,
    padded_width: u32,
    length: u32,
    capacity: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ResolveParams {
    n: u32,
    padded_width: u32,
    length: u32,
    capacity: u32,
}

// ---------------------------------------------------------------------------
// Encoded output handle
// ---------------------------------------------------------------------------

/// A packed keypoint texture produced by one encode, plus the layout
/// needed to decode it on the host.
#[derive(Debug, Clone)]
pub struct EncodedKeypoints {
    pub texture: Arc<GpuTexture>,
    pub encoding: KeypointEncoding,
    /// Side length of the (square) texture.
    pub length: u32,
    /// Slot count the encode ran with.
    pub capacity: usize,
}

impl EncodedKeypoints {
    /// Start an asynchronous readback of the packed texture.
    pub fn read_back(&self, gpu: &GpuDevice) -> PendingReadback {
        self.texture.read_back(gpu)
    }

    /// Decode raster-order texture bytes (from [`Self::read_back`]) into
    /// keypoints.
    pub fn decode(&self, bytes: &[u8]) -> Vec<Keypoint> {
        decode_keypoints(
            bytes,
            self.encoding.descriptor_size,
            self.encoding.extra_size,
            self.length,
        )
    }
}

// ---------------------------------------------------------------------------
// Work textures
// ---------------------------------------------------------------------------

enum WorkSet {
    Skip {
        /// Raw single-window skip offsets, mask-sized.
        raw: Arc<GpuTexture>,
        /// Ping/pong pair for the pointer-jumping passes, mask-sized.
        skip_a: Arc<GpuTexture>,
        skip_b: Arc<GpuTexture>,
        /// Ping/pong pair for the position passes, length-sized.
        pos_a: Arc<GpuTexture>,
        pos_b: Arc<GpuTexture>,
        /// Params the skip-chain textures carried before we patched them
        /// to `Repeat`, in [raw, skip_a, skip_b] order.
        prior: [TextureParams; 3],
    },
    Prefix {
        /// Ping/pong pair for the scan, padded power-of-two sized.
        scan_a: Arc<GpuTexture>,
        scan_b: Arc<GpuTexture>,
        /// Ping/pong pair for the binary-search state, length-sized.
        lo_a: Arc<GpuTexture>,
        lo_b: Arc<GpuTexture>,
        /// Resolved positions, length-sized.
        pos: Arc<GpuTexture>,
    },
}

impl WorkSet {
    /// Do the held shapes still match the encoder configuration?
    fn matches(&self, mask_width: u32, mask_height: u32, length: u32) -> bool {
        match self {
            WorkSet::Skip { raw, pos_a, .. } => {
                raw.width == mask_width && raw.height == mask_height && pos_a.width == length
            }
            WorkSet::Prefix { scan_a, lo_a, .. } => {
                scan_a.width == mask_width.max(1).next_power_of_two()
                    && scan_a.height == mask_height.max(1).next_power_of_two()
                    && lo_a.width == length
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

enum StrategyPasses {
    Skip {
        skip: Program,
        long_skip: Program,
        positions: Program,
    },
    Prefix {
        seed: Program,
        scan: Program,
        lookup: Program,
        resolve: Program,
    },
}

/// Schedules the compaction passes that turn a candidate mask plus a
/// score map into a packed keypoint texture.
pub struct GpuKeypointEncoder {
    strategy: CompactionStrategy,
    encoding: KeypointEncoding,
    mask_width: u32,
    mask_height: u32,
    capacity: usize,
    length: u32,
    clear: Program,
    properties: Program,
    passes: StrategyPasses,
    work: Option<WorkSet>,
}

impl GpuKeypointEncoder {
    /// Compile the kernel set for `strategy`. `capacity` above
    /// [`MAX_ENCODER_CAPACITY`] is clamped with a warning.
    pub fn new(
        gpu: &GpuDevice,
        mask_width: u32,
        mask_height: u32,
        encoding: KeypointEncoding,
        capacity: usize,
        strategy: CompactionStrategy,
    ) -> Self {
        let capacity = clamp_capacity(capacity);
        let length = encoding.length_for(capacity);

        let clear = Program::new(gpu, "clear", CLEAR_SRC, "clear_texels", 0, 1);
        let properties = Program::new(
            gpu,
            "encode properties",
            ENCODE_PROPERTIES_SRC,
            "encode_properties",
            2,
            1,
        );
        let passes = match strategy {
            CompactionStrategy::SkipOffset => StrategyPasses::Skip {
                skip: Program::new(gpu, "skip offsets", SKIP_OFFSET_SRC, "skip_offsets", 1, 1),
                long_skip: Program::new(gpu, "long skip", LONG_SKIP_SRC, "long_skip", 1, 1),
                positions: Program::new(
                    gpu,
                    "encode positions",
                    ENCODE_POSITIONS_SRC,
                    "encode_positions",
                    4,
                    1,
                ),
            },
            CompactionStrategy::PrefixSum => StrategyPasses::Prefix {
                seed: Program::new(gpu, "prefix seed", PREFIX_SEED_SRC, "prefix_seed", 1, 1),
                scan: Program::new(gpu, "prefix scan", PREFIX_SCAN_SRC, "prefix_scan", 1, 1),
                lookup: Program::new(gpu, "prefix lookup", PREFIX_LOOKUP_SRC, "prefix_lookup", 2, 1),
                resolve: Program::new(
                    gpu,
                    "prefix resolve",
                    PREFIX_RESOLVE_SRC,
                    "prefix_resolve",
                    2,
                    1,
                ),
            },
        };

        debug!(
            "keypoint encoder: {strategy:?}, mask {mask_width}×{mask_height}, \
             capacity {capacity}, length {length}"
        );
        GpuKeypointEncoder {
            strategy,
            encoding,
            mask_width,
            mask_height,
            capacity,
            length,
            clear,
            properties,
            passes,
            work: None,
        }
    }

    pub fn strategy(&self) -> CompactionStrategy {
        self.strategy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Side length of the encoded output texture.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Change the slot count. Clamped to [`MAX_ENCODER_CAPACITY`]; the
    /// output length and work set are resized on the next encode.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = clamp_capacity(capacity);
        self.length = self.encoding.length_for(self.capacity);
    }

    /// Acquire the work textures up front instead of on the first
    /// encode. Useful for nodes that want allocation (and its errors) at
    /// init time.
    pub fn prepare(&mut self, gpu: &GpuDevice, pool: &TexturePool) -> Result<(), GpuError> {
        self.ensure_work(gpu, pool)
    }

    /// Record one full encode into `encoder`: the compaction schedule
    /// over `mask` followed by the property pass over `scores`.
    ///
    /// `mask` flags candidates in its red channel; `scores` carries
    /// score (rg, 8.8 fixed point), rotation byte (b) and level byte (a)
    /// at candidate pixels. `lod_log2_scale` converts the level byte to
    /// a level-of-detail (0 for single-scale), capped at `max_lod`.
    ///
    /// The returned texture comes from the pool; the caller decides when
    /// it goes back.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        gpu: &GpuDevice,
        pool: &TexturePool,
        encoder: &mut wgpu::CommandEncoder,
        mask: &GpuTexture,
        scores: &GpuTexture,
        lod_log2_scale: f32,
        max_lod: f32,
    ) -> Result<EncodedKeypoints, GpuError> {
        let length = self.length;
        let out = pool.acquire(gpu, length, length)?;

        if self.capacity == 0 {
            // Nothing to resolve: the whole texture is the null sentinel.
            self.clear.outputs(gpu, length, length, &[&out]);
            self.clear.invoke(
                gpu,
                encoder,
                &[],
                bytemuck::bytes_of(&ClearParams { value: [255; 4] }),
            );
            return Ok(self.finish(out));
        }

        self.ensure_work(gpu, pool)?;

        let (mw, mh) = (self.mask_width, self.mask_height);
        let capacity = self.capacity as u32;

        let positions_texture = match (&mut self.passes, self.work.as_ref()) {
            (
                StrategyPasses::Skip { skip, long_skip, positions },
                Some(WorkSet::Skip { raw, skip_a, skip_b, pos_a, pos_b, .. }),
            ) => {
                let mask_params =
                    MaskParams { mask_width: mw, mask_height: mh, _pad0: 0, _pad1: 0 };

                skip.outputs(gpu, mw, mh, &[raw]);
                skip.invoke(gpu, encoder, &[mask], bytemuck::bytes_of(&mask_params));

                // Pointer jumping: raw → a → b → a → b → a.
                let mut src: &Arc<GpuTexture> = raw;
                let mut ping = skip_a;
                let mut pong = skip_b;
                for _ in 0..LONG_SKIP_PASSES {
                    long_skip.outputs(gpu, mw, mh, &[ping]);
                    long_skip.invoke(gpu, encoder, &[src], bytemuck::bytes_of(&mask_params));
                    src = ping;
                    std::mem::swap(&mut ping, &mut pong);
                }
                let composed = src;

                // Seed the position ping/pong with the null sentinel so
                // copy-through texels stay null across every pass.
                self.clear.outputs(gpu, length, length, &[pos_a]);
                self.clear.invoke(
                    gpu,
                    encoder,
                    &[],
                    bytemuck::bytes_of(&ClearParams { value: [255; 4] }),
                );

                let chunk = capacity.div_ceil(POSITION_PASSES as u32);
                let mut pos_src: &Arc<GpuTexture> = pos_a;
                let mut pos_dst: &Arc<GpuTexture> = pos_b;
                for p in 0..POSITION_PASSES as u32 {
                    let params = PositionParams {
                        mask_width: mw,
                        mask_height: mh,
                        length,
                        capacity,
                        pass_first: (p * chunk).min(capacity),
                        pass_last: ((p + 1) * chunk).min(capacity),
                        _pad0: 0,
                        _pad1: 0,
                    };
                    positions.outputs(gpu, length, length, &[pos_dst]);
                    positions.invoke(
                        gpu,
                        encoder,
                        &[mask, raw, composed, pos_src],
                        bytemuck::bytes_of(&params),
                    );
                    std::mem::swap(&mut pos_src, &mut pos_dst);
                }
                pos_src
            }

            (
                StrategyPasses::Prefix { seed, scan, lookup, resolve },
                Some(WorkSet::Prefix { scan_a, scan_b, lo_a, lo_b, pos }),
            ) => {
                let pw = mw.max(1).next_power_of_two();
                let ph = mh.max(1).next_power_of_two();
                let n = pw * ph;

                seed.outputs(gpu, pw, ph, &[scan_a]);
                seed.invoke(
                    gpu,
                    encoder,
                    &[mask],
                    bytemuck::bytes_of(&MaskParams {
                        mask_width: mw,
                        mask_height: mh,
                        _pad0: 0,
                        _pad1: 0,
                    }),
                );

                // Hillis–Steele: doubling strides until the scan spans N.
                let mut src: &Arc<GpuTexture> = scan_a;
                let mut dst: &Arc<GpuTexture> = scan_b;
                let mut stride = 1u32;
                while stride < n {
                    scan.outputs(gpu, pw, ph, &[dst]);
                    scan.invoke(
                        gpu,
                        encoder,
                        &[src],
                        bytemuck::bytes_of(&ScanParams {
                            stride,
                            padded_width: pw,
                            padded_height: ph,
                            _pad0: 0,
                        }),
                    );
                    std::mem::swap(&mut src, &mut dst);
                    stride <<= 1;
                }
                let prefix = src;

                // Binary-search state starts at lo = 0 everywhere.
                self.clear.outputs(gpu, length, length, &[lo_a]);
                self.clear.invoke(
                    gpu,
                    encoder,
                    &[],
                    bytemuck::bytes_of(&ClearParams { value: [0; 4] }),
                );

                let mut lo_src: &Arc<GpuTexture> = lo_a;
                let mut lo_dst: &Arc<GpuTexture> = lo_b;
                let mut probe = n >> 1;
                while probe > 0 {
                    lookup.outputs(gpu, length, length, &[lo_dst]);
                    lookup.invoke(
                        gpu,
                        encoder,
                        &[prefix, lo_src],
                        bytemuck::bytes_of(&LookupParams {
                            probe,
                            n,
                            padded_width: pw,
                            length,
                            capacity,
                            _pad0: 0,
                            _pad1: 0,
                            _pad2: 0,
                        }),
                    );
                    std::mem::swap(&mut lo_src, &mut lo_dst);
                    probe >>= 1;
                }

                resolve.outputs(gpu, length, length, &[pos]);
                resolve.invoke(
                    gpu,
                    encoder,
                    &[prefix, lo_src],
                    bytemuck::bytes_of(&ResolveParams {
                        n,
                        padded_width: pw,
                        length,
                        capacity,
                    }),
                );
                pos
            }

            // `ensure_work` allocates the variant matching `self.passes`.
            _ => unreachable!("work set does not match compaction strategy"),
        };

        self.properties.outputs(gpu, length, length, &[&out]);
        self.properties.invoke(
            gpu,
            encoder,
            &[positions_texture, scores],
            bytemuck::bytes_of(&PropertyParams {
                length,
                capacity,
                pixels_per_keypoint: self.encoding.pixels_per_keypoint() as u32,
                _pad0: 0,
                lod_log2_scale,
                max_lod,
                _pad1: 0,
                _pad2: 0,
            }),
        );

        Ok(self.finish(out))
    }

    /// Restore patched sampling params and return all work textures to
    /// the pool. Call before dropping the encoder; the pool never
    /// reclaims implicitly.
    pub fn release(&mut self, pool: &TexturePool) {
        if let Some(work) = self.work.take() {
            release_work(work, pool);
        }
    }

    fn finish(&self, texture: Arc<GpuTexture>) -> EncodedKeypoints {
        EncodedKeypoints {
            texture,
            encoding: self.encoding,
            length: self.length,
            capacity: self.capacity,
        }
    }

    /// Make sure the work set exists and matches the current shapes.
    fn ensure_work(&mut self, gpu: &GpuDevice, pool: &TexturePool) -> Result<(), GpuError> {
        if let Some(work) = &self.work {
            if work.matches(self.mask_width, self.mask_height, self.length) {
                return Ok(());
            }
            debug!("work set shapes stale, reacquiring");
            if let Some(stale) = self.work.take() {
                release_work(stale, pool);
            }
        }

        let (mw, mh) = (self.mask_width, self.mask_height);
        let length = self.length;
        let work = match self.strategy {
            CompactionStrategy::SkipOffset => {
                let raw = pool.acquire(gpu, mw, mh)?;
                let skip_a = pool.acquire(gpu, mw, mh)?;
                let skip_b = pool.acquire(gpu, mw, mh)?;
                let pos_a = pool.acquire(gpu, length, length)?;
                let pos_b = pool.acquire(gpu, length, length)?;
                // The skip chains address past-the-end pixels modularly.
                let repeat = TextureParams { wrap: WrapMode::Repeat };
                let prior =
                    [raw.set_params(repeat), skip_a.set_params(repeat), skip_b.set_params(repeat)];
                WorkSet::Skip { raw, skip_a, skip_b, pos_a, pos_b, prior }
            }
            CompactionStrategy::PrefixSum => {
                let pw = mw.max(1).next_power_of_two();
                let ph = mh.max(1).next_power_of_two();
                WorkSet::Prefix {
                    scan_a: pool.acquire(gpu, pw, ph)?,
                    scan_b: pool.acquire(gpu, pw, ph)?,
                    lo_a: pool.acquire(gpu, length, length)?,
                    lo_b: pool.acquire(gpu, length, length)?,
                    pos: pool.acquire(gpu, length, length)?,
                }
            }
        };
        self.work = Some(work);
        Ok(())
    }
}

pub(super) fn clamp_capacity(capacity: usize) -> usize {
    if capacity > MAX_ENCODER_CAPACITY {
        warn!("keypoint capacity {capacity} exceeds {MAX_ENCODER_CAPACITY}, clamping");
        MAX_ENCODER_CAPACITY
    } else {
        capacity
    }
}

fn release_work(work: WorkSet, pool: &TexturePool) {
    match work {
        WorkSet::Skip { raw, skip_a, skip_b, pos_a, pos_b, prior } => {
            // Restore-then-release, in acquire order.
            raw.set_params(prior[0]);
            skip_a.set_params(prior[1]);
            skip_b.set_params(prior[2]);
            for t in [raw, skip_a, skip_b, pos_a, pos_b] {
                pool.release(t);
            }
        }
        WorkSet::Prefix { scan_a, scan_b, lo_a, lo_b, pos } => {
            for t in [scan_a, scan_b, lo_a, lo_b, pos] {
                pool.release(t);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
