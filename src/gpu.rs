//! Uploading and drawing a [`Stage`] with wgpu.
//!
//! [`GpuStore`] keeps one vertex/index buffer pair per geometry
//! [`ResourceId`]. It learns about disposed geometry through a
//! [`ReleaseQueue`], the [`ResourceReleaser`] handed to the stage, and destroys
//! the buffers at the start of the next frame. Materials have no buffers of
//! their own: their parameters travel in the per-draw object uniform.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use log::{debug, warn};
use wgpu::util::DeviceExt;

use crate::{
    camera::CameraUniform,
    context::Context,
    data_structures::{
        geometry::{GeometryData, ResourceId, Topology},
        texture::Texture,
        transform::TransformRaw,
    },
    lifecycle::{ResourceHandle, ResourceKind, ResourceReleaser},
    pipelines::{
        basic::{StagePass, mk_stage_pipeline},
        light::{self, LightUniform},
        shadow::mk_shadow_pipeline,
    },
    stage::{DrawItem, DrawLayer, Stage, Surface},
};

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    /// Interleaves positions and normals; missing normals point up.
    pub fn interleave(data: &GeometryData) -> Vec<Vertex> {
        data.positions
            .iter()
            .enumerate()
            .map(|(i, position)| Vertex {
                position: *position,
                normal: data.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            })
            .collect()
    }
}

/// Per-draw uniform: transform and surface.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 3],
    pub base_color: [f32; 4],
    /// metallic, roughness, unlit, unused
    pub params: [f32; 4],
}

impl ObjectUniform {
    pub fn new(item: &DrawItem) -> Self {
        let TransformRaw { model, normal } = TransformRaw::from_matrix(item.world);
        let Surface {
            base_color,
            metallic,
            roughness,
            wireframe,
            ..
        } = item.surface;
        let unlit = wireframe || item.topology == Topology::Lines || item.layer == DrawLayer::Overlay;
        Self {
            model,
            normal,
            base_color,
            params: [metallic, roughness, if unlit { 1.0 } else { 0.0 }, 0.0],
        }
    }
}

/// Geometry ids whose GPU buffers are no longer needed.
#[derive(Clone, Default)]
pub struct ReleaseQueue {
    released: Rc<RefCell<Vec<ResourceId>>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ResourceId> {
        self.released.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.released.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.released.borrow().is_empty()
    }
}

impl ResourceReleaser for ReleaseQueue {
    fn release(&self, handle: &ResourceHandle) {
        if handle.kind == ResourceKind::Geometry {
            self.released.borrow_mut().push(handle.id);
        }
    }
}

pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

/// GPU buffers keyed by geometry id.
pub struct GpuStore {
    meshes: HashMap<ResourceId, GpuMesh>,
    queue: ReleaseQueue,
}

impl GpuStore {
    pub fn new(queue: ReleaseQueue) -> Self {
        Self {
            meshes: HashMap::new(),
            queue,
        }
    }

    /// Uploads the geometry of `item` unless it already lives on the GPU.
    pub fn ensure(&mut self, device: &wgpu::Device, item: &DrawItem) -> &GpuMesh {
        self.meshes.entry(item.geometry).or_insert_with(|| {
            let vertices = Vertex::interleave(&item.data);
            let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Stage Vertex Buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Stage Index Buffer"),
                contents: bytemuck::cast_slice(&item.data.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            GpuMesh {
                vertex_buffer,
                index_buffer,
                index_count: item.data.indices.len() as u32,
            }
        })
    }

    pub fn get(&self, id: ResourceId) -> Option<&GpuMesh> {
        self.meshes.get(&id)
    }

    /// Destroys the buffers of every geometry released since the last call.
    pub fn collect_garbage(&mut self) -> usize {
        let mut destroyed = 0;
        for id in self.queue.drain() {
            if let Some(mesh) = self.meshes.remove(&id) {
                mesh.vertex_buffer.destroy();
                mesh.index_buffer.destroy();
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            debug!("Destroyed {destroyed} mesh buffers");
        }
        destroyed
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Object uniforms of one frame, packed at the device's dynamic offset
/// alignment.
struct ObjectBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: u64,
}

impl ObjectBuffer {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, capacity: u64) -> Self {
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let size = std::mem::size_of::<ObjectUniform>() as u64;
        let stride = size.div_ceil(alignment) * alignment;
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Object Uniform Buffer"),
            size: stride * capacity,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("object_bind_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(size),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    fn write(&mut self, ctx: &Context, layout: &wgpu::BindGroupLayout, objects: &[ObjectUniform]) {
        let needed = objects.len() as u64;
        if needed > self.capacity {
            self.buffer.destroy();
            *self = Self::new(&ctx.device, layout, needed.next_power_of_two());
        }
        let mut bytes = vec![0u8; (self.stride * needed) as usize];
        for (i, object) in objects.iter().enumerate() {
            let start = i * self.stride as usize;
            let raw = bytemuck::bytes_of(object);
            bytes[start..start + raw.len()].copy_from_slice(raw);
        }
        ctx.queue.write_buffer(&self.buffer, 0, &bytes);
    }

    fn offset(&self, index: usize) -> u32 {
        (index as u64 * self.stride) as u32
    }
}

fn mk_object_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("object_bind_group_layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<ObjectUniform>() as u64),
            },
            count: None,
        }],
    })
}

struct StagePipelines {
    triangles: wgpu::RenderPipeline,
    lines: wgpu::RenderPipeline,
    overlay: wgpu::RenderPipeline,
    shadow: wgpu::RenderPipeline,
}

/// Draws a [`Stage`] into the window of a [`Context`].
pub struct Renderer {
    store: GpuStore,
    pipelines: StagePipelines,
    object_layout: wgpu::BindGroupLayout,
    objects: ObjectBuffer,
    light_buffer: wgpu::Buffer,
    light_bind_group: wgpu::BindGroup,
    shadow_map: Texture,
    shadow_bind_group: wgpu::BindGroup,
}

impl Renderer {
    pub fn new(ctx: &Context, releases: ReleaseQueue) -> anyhow::Result<Self> {
        let device = &ctx.device;
        let light_layout = light::mk_bind_group_layout(device);
        let shadow_layout = light::mk_shadow_bind_group_layout(device);
        let object_layout = mk_object_bind_group_layout(device);

        let layouts = [
            &ctx.camera_bind_group_layout,
            &light_layout,
            &object_layout,
            &shadow_layout,
        ];
        let pipelines = StagePipelines {
            triangles: mk_stage_pipeline(device, &ctx.config, &layouts, StagePass::Triangles),
            lines: mk_stage_pipeline(device, &ctx.config, &layouts, StagePass::Lines),
            overlay: mk_stage_pipeline(device, &ctx.config, &layouts, StagePass::Overlay),
            shadow: mk_shadow_pipeline(device, &light_layout, &object_layout),
        };

        let light_buffer = light::mk_buffer(device, LightUniform::new(&Default::default(), None));
        let light_bind_group = light::mk_bind_group(device, &light_layout, &light_buffer);
        let shadow_map = Texture::create_shadow_map(device);
        let shadow_bind_group = light::mk_shadow_bind_group(device, &shadow_layout, &shadow_map)?;
        let objects = ObjectBuffer::new(device, &object_layout, 64);

        Ok(Self {
            store: GpuStore::new(releases),
            pipelines,
            object_layout,
            objects,
            light_buffer,
            light_bind_group,
            shadow_map,
            shadow_bind_group,
        })
    }

    pub fn store(&self) -> &GpuStore {
        &self.store
    }

    pub fn render(&mut self, ctx: &Context, stage: &mut Stage) -> Result<(), wgpu::SurfaceError> {
        self.store.collect_garbage();

        let camera: CameraUniform = stage.camera().borrow().uniform();
        ctx.queue
            .write_buffer(&ctx.camera_buffer, 0, bytemuck::cast_slice(&[camera]));
        let lighting = *stage.lighting();
        let bounds = stage.scene_bounds();
        let light_uniform = LightUniform::new(&lighting, bounds.as_ref());
        ctx.queue
            .write_buffer(&self.light_buffer, 0, bytemuck::cast_slice(&[light_uniform]));

        let items = stage.draw_list();
        for item in &items {
            self.store.ensure(&ctx.device, item);
        }
        let uniforms: Vec<ObjectUniform> = items.iter().map(ObjectUniform::new).collect();
        self.objects.write(ctx, &self.object_layout, &uniforms);

        let output = ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        if light_uniform.casts_shadows() {
            let mut shadow_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.shadow_map.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            shadow_pass.set_pipeline(&self.pipelines.shadow);
            shadow_pass.set_bind_group(0, &self.light_bind_group, &[]);
            for (i, item) in items.iter().enumerate() {
                if item.layer != DrawLayer::Scene || item.topology != Topology::Triangles {
                    continue;
                }
                self.draw(&mut shadow_pass, 1, i, item);
            }
        }

        {
            let [r, g, b, a] = lighting.backdrop.map(f64::from);
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &ctx.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_bind_group(0, &ctx.camera_bind_group, &[]);
            render_pass.set_bind_group(1, &self.light_bind_group, &[]);
            render_pass.set_bind_group(3, &self.shadow_bind_group, &[]);

            for pass in [StagePass::Triangles, StagePass::Lines, StagePass::Overlay] {
                render_pass.set_pipeline(match pass {
                    StagePass::Triangles => &self.pipelines.triangles,
                    StagePass::Lines => &self.pipelines.lines,
                    StagePass::Overlay => &self.pipelines.overlay,
                });
                for (i, item) in items.iter().enumerate() {
                    if pass_of(item) == pass {
                        self.draw(&mut render_pass, 2, i, item);
                    }
                }
            }
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn draw(&self, pass: &mut wgpu::RenderPass<'_>, object_group: u32, index: usize, item: &DrawItem) {
        let Some(mesh) = self.store.get(item.geometry) else {
            warn!("No GPU buffers for geometry {:?}", item.geometry);
            return;
        };
        if item.indices.end > mesh.index_count {
            warn!("Index range {:?} exceeds {} indices", item.indices, mesh.index_count);
            return;
        }
        pass.set_bind_group(object_group, &self.objects.bind_group, &[self.objects.offset(index)]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(item.indices.clone(), 0, 0..1);
    }
}

fn pass_of(item: &DrawItem) -> StagePass {
    match (item.layer, item.topology) {
        (DrawLayer::Overlay, _) => StagePass::Overlay,
        (DrawLayer::Scene, Topology::Lines) => StagePass::Lines,
        (DrawLayer::Scene, Topology::Triangles) => StagePass::Triangles,
    }
}
