// gpu/program.rs — the GPU pass abstraction.
//
// A `Program` wraps one compiled WGSL compute kernel behind the
// configure-then-invoke contract every compaction pass uses:
//
//   1. `Program::new`    — compile once (shader module + pipeline).
//   2. `outputs(w, h, dests)` — fix the output shape and destination
//      textures. May be called again between runs to retarget.
//   3. `invoke(inputs, uniform)` — record one dispatch covering every
//      output pixel. Different inputs/uniforms per invocation; identical
//      inputs produce bit-identical output (integer texels, no
//      cross-pixel communication inside a pass).
//
// Binding convention, mirrored by every shader in src/shaders/:
//   @group(0) @binding(0..N-1)  input textures (texture_2d<u32>)
//   @group(0) @binding(N)       uniform params
//   @group(1) @binding(0..M-1)  destination storage textures
//
// The per-pixel independence inside one pass is the whole reason the
// encoder needs a multi-pass schedule: no single pass can compute a
// running output index.

use wgpu::util::DeviceExt;

use super::device::GpuDevice;
use super::texture::GpuTexture;

/// One compiled compute kernel with configured destinations.
pub struct Program {
    label: String,
    pipeline: wgpu::ComputePipeline,
    input_bgl: wgpu::BindGroupLayout,
    output_bgl: wgpu::BindGroupLayout,
    input_count: usize,
    output_count: usize,
    out_width: u32,
    out_height: u32,
    output_bind_group: Option<wgpu::BindGroup>,
    dest_ids: Vec<wgpu::Id<wgpu::Texture>>,
}

impl Program {
    /// Compile `source` (WGSL with `{{WG_X}}`/`{{WG_Y}}` placeholders)
    /// and build the pipeline for `entry_point`. `input_count` and
    /// `output_count` fix the binding layout per the module convention.
    pub fn new(
        gpu: &GpuDevice,
        label: &str,
        source: &str,
        entry_point: &str,
        input_count: usize,
        output_count: usize,
    ) -> Self {
        let shader_src = source
            .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string())
            .replace("{{WG_Y}}", &gpu.workgroup_size.y.to_string());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let mut input_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..input_count)
            .map(|i| wgpu::BindGroupLayoutEntry {
                binding: i as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Uint,
                },
                count: None,
            })
            .collect();
        // Uniform params always sit after the input textures.
        input_entries.push(wgpu::BindGroupLayoutEntry {
            binding: input_count as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let input_bgl =
            gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label} inputs")),
                entries: &input_entries,
            });

        let output_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..output_count)
            .map(|i| wgpu::BindGroupLayoutEntry {
                binding: i as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba8Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            })
            .collect();
        let output_bgl =
            gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label} outputs")),
                entries: &output_entries,
            });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{label} layout")),
                bind_group_layouts: &[&input_bgl, &output_bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        Program {
            label: label.to_string(),
            pipeline,
            input_bgl,
            output_bgl,
            input_count,
            output_count,
            out_width: 0,
            out_height: 0,
            output_bind_group: None,
            dest_ids: Vec::new(),
        }
    }

    /// Fix the output shape and destination textures. Destinations must
    /// be drawable and match the declared output count.
    pub fn outputs(&mut self, gpu: &GpuDevice, width: u32, height: u32, dests: &[&GpuTexture]) {
        assert_eq!(
            dests.len(),
            self.output_count,
            "{}: expected {} destinations",
            self.label,
            self.output_count
        );
        for d in dests {
            assert!(d.is_drawable(), "{}: destination is not drawable", self.label);
        }

        let entries: Vec<wgpu::BindGroupEntry> = dests
            .iter()
            .enumerate()
            .map(|(i, d)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::TextureView(&d.write_view),
            })
            .collect();
        self.output_bind_group =
            Some(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} outputs", self.label)),
                layout: &self.output_bgl,
                entries: &entries,
            }));
        self.dest_ids = dests.iter().map(|d| d.texture.global_id()).collect();
        self.out_width = width;
        self.out_height = height;
    }

    /// Record one dispatch into `encoder`. `uniform` is the raw bytes of
    /// the shader's params struct.
    ///
    /// # Panics
    /// If `outputs` was not called, if the input count is wrong, or — in
    /// debug builds — if an input texture is also a configured
    /// destination (one writer per pass; a read texture must not be the
    /// write target).
    pub fn invoke(
        &self,
        gpu: &GpuDevice,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &[&GpuTexture],
        uniform: &[u8],
    ) {
        assert_eq!(
            inputs.len(),
            self.input_count,
            "{}: expected {} inputs",
            self.label,
            self.input_count
        );
        let output_bind_group = self
            .output_bind_group
            .as_ref()
            .unwrap_or_else(|| panic!("{}: outputs() not configured", self.label));
        debug_assert!(
            inputs
                .iter()
                .all(|t| !self.dest_ids.contains(&t.texture.global_id())),
            "{}: input texture is also a write target",
            self.label
        );

        let uniform_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} params", self.label)),
            contents: uniform,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::TextureView(&t.read_view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: self.input_count as u32,
            resource: uniform_buf.as_entire_binding(),
        });
        let input_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} inputs", self.label)),
            layout: &self.input_bgl,
            entries: &entries,
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &input_bind_group, &[]);
        pass.set_bind_group(1, output_bind_group, &[]);
        let (dx, dy) = gpu.dispatch_size(self.out_width, self.out_height);
        pass.dispatch_workgroups(dx, dy, 1);
    }
}
