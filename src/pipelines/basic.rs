use crate::{data_structures::texture::Texture, gpu::Vertex};

/// How a stage pipeline rasterizes and depth-tests its draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagePass {
    /// Lit triangles, depth tested and written.
    Triangles,
    /// Wireframes and placeholders, depth tested.
    Lines,
    /// Gizmo handles, drawn on top of everything.
    Overlay,
}

impl StagePass {
    fn primitive(&self) -> wgpu::PrimitiveState {
        let (topology, cull_mode) = match self {
            StagePass::Triangles => (wgpu::PrimitiveTopology::TriangleList, Some(wgpu::Face::Back)),
            StagePass::Lines | StagePass::Overlay => (wgpu::PrimitiveTopology::LineList, None),
        };
        wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        }
    }

    fn depth_stencil(&self) -> wgpu::DepthStencilState {
        let (depth_write_enabled, depth_compare) = match self {
            StagePass::Triangles | StagePass::Lines => (true, wgpu::CompareFunction::Less),
            StagePass::Overlay => (false, wgpu::CompareFunction::Always),
        };
        wgpu::DepthStencilState {
            format: Texture::DEPTH_FORMAT,
            depth_write_enabled,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

/// Bind groups: 0 camera, 1 lighting, 2 per-draw object, 3 shadow map.
pub fn mk_stage_pipeline(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    pass: StagePass,
) -> wgpu::RenderPipeline {
    let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Stage Pipeline Layout"),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    let shader = wgpu::ShaderModuleDescriptor {
        label: Some("Stage Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("stage.wgsl").into()),
    };

    mk_render_pipeline(
        device,
        &render_pipeline_layout,
        config.format,
        Some(wgpu::BlendState::ALPHA_BLENDING),
        pass.primitive(),
        Some(pass.depth_stencil()),
        &[Vertex::desc()],
        shader,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    primitive: wgpu::PrimitiveState,
    depth_stencil: Option<wgpu::DepthStencilState>,
    vertex_layouts: &[wgpu::VertexBufferLayout],
    shader: wgpu::ShaderModuleDescriptor,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(shader);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Render Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: vertex_layouts,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive,
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}
