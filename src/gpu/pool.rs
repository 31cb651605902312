// gpu/pool.rs — the texture resource pool.
//
// Intermediate textures churn every frame; allocating them fresh per
// run would fragment VRAM and stall the driver. The pool keeps a free
// list keyed by (width, height, format) and hands shapes back out on
// request. Contents are NOT cleared on release — a fresh borrower must
// not assume zeroed state.
//
// Multiple independently constructed pipelines may share one pool, so
// acquire/release serialize on one mutex. Passes submit on a single
// GPU queue anyway; no finer-grained locking buys anything here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use super::device::{GpuDevice, GpuError};
use super::texture::{GpuTexture, TextureParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

/// A free-list pool of Rgba8Uint work textures.
#[derive(Default)]
pub struct TexturePool {
    free: Mutex<HashMap<PoolKey, Vec<Arc<GpuTexture>>>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a free texture of the requested shape, or allocate one.
    ///
    /// # Errors
    /// `GpuError::TextureTooLarge` when the dimensions exceed the
    /// device's 2-D texture limit. Never clamped: the caller decides
    /// whether to retry with a smaller capacity/resolution.
    pub fn acquire(
        &self,
        gpu: &GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<Arc<GpuTexture>, GpuError> {
        let max = gpu.max_texture_dimension();
        if width > max || height > max {
            return Err(GpuError::TextureTooLarge { width, height, max });
        }

        let key = PoolKey { width, height, format: wgpu::TextureFormat::Rgba8Uint };
        let mut free = self.free.lock().expect("texture pool poisoned");
        if let Some(tex) = free.get_mut(&key).and_then(Vec::pop) {
            debug!("pool hit: {width}×{height}");
            return Ok(tex);
        }
        drop(free);

        debug!("pool miss: allocating {width}×{height}");
        let label = format!("pool {width}×{height}");
        Ok(Arc::new(GpuTexture::new(&gpu.device, width, height, &label)))
    }

    /// Return a texture to the free set. Contents are kept as-is.
    ///
    /// Restoring mutated sampling params is the *caller's* contract
    /// (restore-then-release); a violation is logged but not masked, so
    /// the resulting corruption is attributable.
    pub fn release(&self, texture: Arc<GpuTexture>) {
        if texture.params() != TextureParams::default() {
            debug!(
                "texture {}×{} released with non-default sampling params",
                texture.width, texture.height
            );
        }
        let key = PoolKey {
            width: texture.width,
            height: texture.height,
            format: texture.format,
        };
        self.free
            .lock()
            .expect("texture pool poisoned")
            .entry(key)
            .or_default()
            .push(texture);
    }

    /// Number of textures currently sitting in the free set.
    pub fn free_count(&self) -> usize {
        self.free
            .lock()
            .expect("texture pool poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Drop every free texture. The only way pooled resources are ever
    /// reclaimed — nothing is disposed implicitly.
    pub fn dispose(&self) {
        self.free.lock().expect("texture pool poisoned").clear();
    }
}
