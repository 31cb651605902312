// keypack: GPU keypoint stream compaction.
//
// Turns a sparse per-pixel candidate mask (the output of a corner
// detector) into a densely packed texture of keypoint records, entirely
// on the GPU. Because a compute pass cannot maintain a running output
// index across threads, compaction runs as a fixed schedule of
// full-texture passes; two interchangeable strategies (skip offsets
// with pointer jumping, and a prefix-sum scan) produce byte-identical
// output.
//
// Module map:
//
//   keypoint   — the keypoint type and the field codecs
//   encoding   — packed-texture sizing math and the host-side decoder
//   compaction — CPU reference implementation of both strategies
//   pipeline   — typed node/port DAG scheduler
//   gpu        — wgpu devices, textures, pools, kernels, detector nodes
//
// The CPU modules are pure and carry the test weight; the GPU layer is
// validated against them by the `--ignored` tests in `gpu::encoder`.

pub mod compaction;
pub mod encoding;
pub mod keypoint;
pub mod pipeline;

pub mod gpu;

pub use compaction::CompactionStrategy;
pub use encoding::{decode_keypoints, KeypointEncoding};
pub use keypoint::Keypoint;
pub use pipeline::{Pipeline, PipelineError, PipelineNode};
