// gpu/detector.rs — pipeline nodes around the keypoint encoder.
//
// The detectors take a candidate mask and a score map produced upstream
// (corner detection and scoring are out of scope here) and emit the
// packed keypoint texture. Single-scale and multi-scale differ only in
// how the score map's level byte is interpreted: single-scale pins the
// level of detail to zero, multi-scale converts the byte through
// log2(scale_factor).
//
// Output lifetime contract: a detector's encoded texture is valid until
// the node's next run. The previous frame's texture goes back to the
// pool at that point, which is safe under the scheduler's sequential
// execution — every consumer of the previous run has already finished.

use std::sync::Arc;

use log::warn;

use crate::compaction::CompactionStrategy;
use crate::encoding::KeypointEncoding;
use crate::pipeline::{Message, NodeError, PipelineNode, PortSpec};

use super::device::GpuDevice;
use super::encoder::{clamp_capacity, GpuKeypointEncoder};
use super::pool::TexturePool;
use super::texture::GpuTexture;

/// Execution context the GPU nodes run against: the shared device and
/// the process-wide texture pool.
pub struct GpuContext {
    pub gpu: Arc<GpuDevice>,
    pub pool: Arc<TexturePool>,
}

impl GpuContext {
    pub fn new(gpu: Arc<GpuDevice>, pool: Arc<TexturePool>) -> Self {
        GpuContext { gpu, pool }
    }
}

const DETECTOR_INPUTS: [PortSpec; 2] =
    [PortSpec::texture("mask"), PortSpec::texture("scores")];
const DETECTOR_OUTPUTS: [PortSpec; 1] = [PortSpec::keypoints("keypoints")];

const MIN_SCALE_FACTOR: f32 = 1.0;
const MAX_SCALE_FACTOR: f32 = 2.0;

// ---------------------------------------------------------------------------
// Shared detector state
// ---------------------------------------------------------------------------

/// Everything common to the detector variants: configuration, the lazily
/// initialized encoder, and the previous run's output texture.
struct DetectorCore {
    mask_width: u32,
    mask_height: u32,
    encoding: KeypointEncoding,
    capacity: usize,
    strategy: CompactionStrategy,
    encoder: Option<GpuKeypointEncoder>,
    last_output: Option<Arc<GpuTexture>>,
}

impl DetectorCore {
    fn new(
        mask_width: u32,
        mask_height: u32,
        encoding: KeypointEncoding,
        capacity: usize,
        strategy: CompactionStrategy,
    ) -> Self {
        DetectorCore {
            mask_width,
            mask_height,
            encoding,
            capacity: clamp_capacity(capacity),
            strategy,
            encoder: None,
            last_output: None,
        }
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.capacity = clamp_capacity(capacity);
        if let Some(enc) = &mut self.encoder {
            enc.set_capacity(self.capacity);
        }
    }

    fn init(&mut self, cx: &mut GpuContext) -> Result<(), NodeError> {
        let mut encoder = GpuKeypointEncoder::new(
            &cx.gpu,
            self.mask_width,
            self.mask_height,
            self.encoding,
            self.capacity,
            self.strategy,
        );
        encoder.prepare(&cx.gpu, &cx.pool)?;
        self.encoder = Some(encoder);
        Ok(())
    }

    fn encode(
        &mut self,
        cx: &mut GpuContext,
        inputs: &[Message],
        lod_log2_scale: f32,
        max_lod: f32,
    ) -> Result<Vec<Message>, NodeError> {
        let mask = inputs[0].as_texture().ok_or("mask input is not a texture")?;
        let scores = inputs[1].as_texture().ok_or("scores input is not a texture")?;
        if mask.width != self.mask_width || mask.height != self.mask_height {
            return Err(format!(
                "mask is {}×{}, detector configured for {}×{}",
                mask.width, mask.height, self.mask_width, self.mask_height
            )
            .into());
        }

        let encoder = self.encoder.as_mut().ok_or("detector was not initialized")?;
        let mut cmds = cx
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("keypoint detector"),
            });
        let encoded = encoder.encode(
            &cx.gpu,
            &cx.pool,
            &mut cmds,
            mask,
            scores,
            lod_log2_scale,
            max_lod,
        )?;
        cx.gpu.queue.submit(std::iter::once(cmds.finish()));

        // Recycle the previous frame's output now that no consumer can
        // still be scheduled against it.
        if let Some(prev) = self.last_output.replace(encoded.texture.clone()) {
            cx.pool.release(prev);
        }
        Ok(vec![Message::Keypoints(encoded)])
    }

    fn release(&mut self, cx: &mut GpuContext) {
        if let Some(mut enc) = self.encoder.take() {
            enc.release(&cx.pool);
        }
        if let Some(prev) = self.last_output.take() {
            cx.pool.release(prev);
        }
    }
}

// ---------------------------------------------------------------------------
// Detector nodes
// ---------------------------------------------------------------------------

/// Detector for a single-scale mask: every keypoint gets level of
/// detail 0.
pub struct SingleScaleDetector {
    core: DetectorCore,
}

impl SingleScaleDetector {
    pub fn new(
        mask_width: u32,
        mask_height: u32,
        encoding: KeypointEncoding,
        capacity: usize,
        strategy: CompactionStrategy,
    ) -> Self {
        SingleScaleDetector {
            core: DetectorCore::new(mask_width, mask_height, encoding, capacity, strategy),
        }
    }

    /// Change the keypoint slot count for subsequent runs.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.core.set_capacity(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }
}

impl PipelineNode<GpuContext> for SingleScaleDetector {
    fn name(&self) -> &str {
        "single-scale keypoint detector"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &DETECTOR_INPUTS
    }

    fn output_ports(&self) -> &[PortSpec] {
        &DETECTOR_OUTPUTS
    }

    fn init(&mut self, cx: &mut GpuContext) -> Result<(), NodeError> {
        self.core.init(cx)
    }

    fn run(&mut self, cx: &mut GpuContext, inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        self.core.encode(cx, inputs, 0.0, 0.0)
    }

    fn release(&mut self, cx: &mut GpuContext) -> Result<(), NodeError> {
        self.core.release(cx);
        Ok(())
    }
}

/// Detector for a pyramid-derived mask: the score map's level byte
/// selects the pyramid level, converted to a level of detail through
/// log2 of the pyramid's scale factor.
pub struct MultiScaleDetector {
    core: DetectorCore,
    levels: usize,
    scale_factor: f32,
}

impl MultiScaleDetector {
    pub fn new(
        mask_width: u32,
        mask_height: u32,
        encoding: KeypointEncoding,
        capacity: usize,
        strategy: CompactionStrategy,
    ) -> Self {
        MultiScaleDetector {
            core: DetectorCore::new(mask_width, mask_height, encoding, capacity, strategy),
            levels: 1,
            scale_factor: std::f32::consts::SQRT_2,
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.core.set_capacity(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Number of pyramid levels. At least 1.
    pub fn set_levels(&mut self, levels: usize) {
        if levels == 0 {
            warn!("pyramid needs at least one level, clamping");
        }
        self.levels = levels.max(1);
    }

    /// Scale ratio between consecutive pyramid levels, clamped to
    /// [1.0, 2.0].
    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        if !(MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&scale_factor) {
            warn!(
                "scale factor {scale_factor} outside \
                 [{MIN_SCALE_FACTOR}, {MAX_SCALE_FACTOR}], clamping"
            );
        }
        self.scale_factor = scale_factor.clamp(MIN_SCALE_FACTOR, MAX_SCALE_FACTOR);
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }
}

impl PipelineNode<GpuContext> for MultiScaleDetector {
    fn name(&self) -> &str {
        "multi-scale keypoint detector"
    }

    fn input_ports(&self) -> &[PortSpec] {
        &DETECTOR_INPUTS
    }

    fn output_ports(&self) -> &[PortSpec] {
        &DETECTOR_OUTPUTS
    }

    fn init(&mut self, cx: &mut GpuContext) -> Result<(), NodeError> {
        self.core.init(cx)
    }

    fn run(&mut self, cx: &mut GpuContext, inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        let lod_log2_scale = self.scale_factor.log2();
        let max_lod = (self.levels - 1) as f32 * lod_log2_scale;
        self.core.encode(cx, inputs, lod_log2_scale, max_lod)
    }

    fn release(&mut self, cx: &mut GpuContext) -> Result<(), NodeError> {
        self.core.release(cx);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Texture source
// ---------------------------------------------------------------------------

const SOURCE_OUTPUTS: [PortSpec; 1] = [PortSpec::texture("texture")];

/// Feeds an externally produced texture into a pipeline. Used to inject
/// the mask and score textures when the upstream producer lives outside
/// the graph.
pub struct TextureSource {
    name: String,
    texture: Option<Arc<GpuTexture>>,
}

impl TextureSource {
    pub fn new(name: impl Into<String>) -> Self {
        TextureSource { name: name.into(), texture: None }
    }

    /// Set the texture emitted by subsequent runs.
    pub fn set_texture(&mut self, texture: Arc<GpuTexture>) {
        self.texture = Some(texture);
    }
}

impl PipelineNode<GpuContext> for TextureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_ports(&self) -> &[PortSpec] {
        &[]
    }

    fn output_ports(&self) -> &[PortSpec] {
        &SOURCE_OUTPUTS
    }

    fn run(&mut self, _cx: &mut GpuContext, _inputs: &[Message]) -> Result<Vec<Message>, NodeError> {
        let texture = self.texture.clone().ok_or("texture source has no texture set")?;
        Ok(vec![Message::Texture(texture)])
    }
}

// ============================================================
// Tests
// ============================================================
