// gpu/texture.rs — GPU texture handles, upload, and asynchronous readback.
//
// Every working texture in this crate is Rgba8Uint: 4 channels × 8 bits,
// loaded with `textureLoad` and written with `textureStore`. Integer
// texels make every pass bit-deterministic — no filtering, no UNORM
// rounding — which the encoder/decoder byte contract depends on.
//
// THE STRIDE/ALIGNMENT PROBLEM
// ─────────────────────────────
// wgpu requires `bytes_per_row` in buffer↔texture copies to be a
// multiple of COPY_BYTES_PER_ROW_ALIGNMENT (256). CPU-side pixel data is
// tightly packed, so uploads stage through a row-aligned buffer and
// readbacks strip the padding again.
//
// SAMPLING PARAMETERS
// ────────────────────
// Addressing is resolved inside the shaders (explicit bounds checks on
// `textureLoad`), but textures still carry a host-tracked `WrapMode` as
// pool state: an algorithm that flips a texture to `Repeat` for its skip
// chains must restore the pool default before the texture is released,
// or the next borrower inherits the wrong addressing contract.

use std::sync::mpsc::Receiver;
use std::sync::Mutex;

use super::device::{GpuDevice, GpuError};

/// Round `value` up to the next multiple of `alignment`.
pub fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Host-tracked texture addressing mode. `ClampToEdge` is the pool
/// default; anything else must be restored before release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Host-tracked sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureParams {
    pub wrap: WrapMode,
}

/// A 2-D Rgba8Uint texture with read and write views.
///
/// Shared by `Arc`; the sampling params use interior mutability so a
/// node can patch and restore them on a shared handle.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    /// View for binding as `texture_2d<u32>` input.
    pub read_view: wgpu::TextureView,
    /// View for binding as `texture_storage_2d<rgba8uint, write>` output.
    pub write_view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// Whether a pass may bind this texture as a destination. Every
    /// texture allocated by this crate is drawable; the flag is
    /// reserved for wrapping externally imported read-only textures.
    drawable: bool,
    params: Mutex<TextureParams>,
}

impl GpuTexture {
    /// Allocate a new drawable Rgba8Uint texture.
    pub fn new(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let format = wgpu::TextureFormat::Rgba8Uint;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let read_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let write_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            read_view,
            write_view,
            width,
            height,
            format,
            drawable: true,
            params: Mutex::new(TextureParams::default()),
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.drawable
    }

    /// Current sampling parameters.
    pub fn params(&self) -> TextureParams {
        *self.params.lock().expect("texture params poisoned")
    }

    /// Replace the sampling parameters, returning the previous values so
    /// the caller can restore them later.
    pub fn set_params(&self, params: TextureParams) -> TextureParams {
        let mut guard = self.params.lock().expect("texture params poisoned");
        std::mem::replace(&mut guard, params)
    }

    /// Upload tightly packed raster-order RGBA bytes (`width * height *
    /// 4`), staging through a row-aligned buffer.
    pub fn upload(&self, gpu: &GpuDevice, pixels: &[u8]) {
        assert_eq!(
            pixels.len(),
            (self.width * self.height * 4) as usize,
            "pixel data does not match texture dimensions"
        );

        let bytes_per_row = self.width * 4;
        let aligned = align_to(bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let mut staging = vec![0u8; (aligned * self.height) as usize];
        for y in 0..self.height as usize {
            let src = y * bytes_per_row as usize;
            let dst = y * aligned as usize;
            staging[dst..dst + bytes_per_row as usize]
                .copy_from_slice(&pixels[src..src + bytes_per_row as usize]);
        }

        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &staging,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(aligned),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Begin an asynchronous readback of the full texture. The copy is
    /// submitted immediately; call [`PendingReadback::wait`] to block for
    /// the bytes or [`PendingReadback::cancel`] to drop the request.
    pub fn read_back(self: &std::sync::Arc<Self>, gpu: &GpuDevice) -> PendingReadback {
        let bytes_per_row = self.width * 4;
        let aligned = align_to(bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let size = (aligned * self.height) as u64;

        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |r| {
                let _ = tx.send(r);
            });

        PendingReadback {
            source: self.clone(),
            buffer,
            rx,
            width: self.width,
            height: self.height,
            aligned_bytes_per_row: aligned,
        }
    }
}

/// An in-flight texture readback.
///
/// Holds an `Arc` on the source texture for its entire lifetime, so the
/// texture cannot be recycled out from under a pending copy — cancelling
/// is always safe for the pool.
pub struct PendingReadback {
    source: std::sync::Arc<GpuTexture>,
    buffer: wgpu::Buffer,
    rx: Receiver<Result<(), wgpu::BufferAsyncError>>,
    width: u32,
    height: u32,
    aligned_bytes_per_row: u32,
}

impl PendingReadback {
    /// The texture being read back.
    pub fn source(&self) -> &std::sync::Arc<GpuTexture> {
        &self.source
    }

    /// Block until the map completes and return the tightly packed
    /// raster-order bytes (`width * height * 4`, padding stripped).
    pub fn wait(self, gpu: &GpuDevice) -> Result<Vec<u8>, GpuError> {
        gpu.device.poll(wgpu::Maintain::Wait);
        self.rx
            .recv()
            .map_err(|_| GpuError::ReadbackCancelled)?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let slice = self.buffer.slice(..);
        let mapped = slice.get_mapped_range();

        let row_bytes = self.width as usize * 4;
        let mut out = vec![0u8; row_bytes * self.height as usize];
        for y in 0..self.height as usize {
            let src = y * self.aligned_bytes_per_row as usize;
            out[y * row_bytes..(y + 1) * row_bytes]
                .copy_from_slice(&mapped[src..src + row_bytes]);
        }
        drop(mapped);
        self.buffer.unmap();
        Ok(out)
    }

    /// Abandon the readback. The GPU-side copy may still execute, but
    /// the result is discarded and the source texture stays valid.
    pub fn cancel(self) {
        self.buffer.destroy();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
