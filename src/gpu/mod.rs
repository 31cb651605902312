// gpu/mod.rs — wgpu execution layer.
//
// Everything here mirrors a CPU counterpart in the parent crate: the
// compaction kernels implement the exact pass schedule of
// `crate::compaction`, and the encoded texture decodes with
// `crate::encoding`. The CPU implementations are the authoritative
// reference — every GPU kernel is validated against them byte for byte
// by the `--ignored` tests in `encoder`.
//
// Layering, bottom up:
//
//   device   — adapter selection, device/queue, workgroup math
//   texture  — Rgba8Uint handles, upload, async readback
//   pool     — shared free-list of work textures
//   program  — compiled WGSL kernel + configure-then-invoke contract
//   encoder  — the compaction pass schedules
//   detector — pipeline nodes wrapping the encoder

pub mod detector;
pub mod device;
pub mod encoder;
pub mod pool;
pub mod program;
pub mod texture;

pub use detector::{GpuContext, MultiScaleDetector, SingleScaleDetector, TextureSource};
pub use device::{GpuDevice, GpuError, WorkgroupSize};
pub use encoder::{EncodedKeypoints, GpuKeypointEncoder};
pub use pool::TexturePool;
pub use program::Program;
pub use texture::{GpuTexture, PendingReadback, TextureParams, WrapMode};
