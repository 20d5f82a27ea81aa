use cgmath::{Matrix4, SquareMatrix};
use wgpu::util::DeviceExt;

use crate::{bounds::BoundingVolume, data_structures::texture::Texture, stage::LightingRig};

/// The lighting rig as the shaders see it.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    pub light_view_proj: [[f32; 4]; 4],
    /// xyz direction from the light into the scene, w shadow strength.
    pub sun_direction: [f32; 4],
    /// rgb premultiplied by the intensity, w unused.
    pub sun_color: [f32; 4],
    pub ambient: [f32; 4],
}

impl LightUniform {
    /// Without `bounds` nothing casts a shadow.
    pub fn new(rig: &LightingRig, bounds: Option<&BoundingVolume>) -> Self {
        let sun = &rig.sun;
        let direction = sun.unit_direction();
        let (light_view_proj, strength) = match bounds {
            Some(bounds) if sun.cast_shadows => (sun.view_projection(bounds), 1.0),
            _ => (Matrix4::identity(), 0.0),
        };
        let scaled = |color: [f32; 3], intensity: f32| {
            [color[0] * intensity, color[1] * intensity, color[2] * intensity, 1.0]
        };
        Self {
            light_view_proj: light_view_proj.into(),
            sun_direction: [direction.x, direction.y, direction.z, strength],
            sun_color: scaled(sun.color, sun.intensity),
            ambient: scaled(rig.ambient.color, rig.ambient.intensity),
        }
    }

    pub fn casts_shadows(&self) -> bool {
        self.sun_direction[3] > 0.0
    }
}

pub fn mk_buffer(device: &wgpu::Device, light_uniform: LightUniform) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Light Uniform Buffer"),
        contents: bytemuck::cast_slice(&[light_uniform]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("light_bind_group_layout"),
    })
}

pub fn mk_bind_group(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    light_buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: bind_group_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: light_buffer.as_entire_binding(),
        }],
        label: Some("light_bind_group"),
    })
}

/// Shadow map texture plus its comparison sampler.
pub fn mk_shadow_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("shadow_bind_group_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Depth,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
        ],
    })
}

pub fn mk_shadow_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    shadow_map: &Texture,
) -> anyhow::Result<wgpu::BindGroup> {
    let sampler = shadow_map
        .sampler
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("shadow map has no comparison sampler"))?;
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("shadow_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&shadow_map.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Point3;

    #[test]
    fn shadows_need_bounds_and_the_flag() {
        let mut rig = LightingRig::default();
        assert!(!LightUniform::new(&rig, None).casts_shadows());

        let bounds = BoundingVolume::from_corners(Point3::new(-1.0, 0.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        assert!(LightUniform::new(&rig, Some(&bounds)).casts_shadows());

        rig.sun.cast_shadows = false;
        assert!(!LightUniform::new(&rig, Some(&bounds)).casts_shadows());
    }

    #[test]
    fn colors_are_premultiplied_by_intensity() {
        let mut rig = LightingRig::default();
        rig.ambient.color = [1.0, 0.5, 0.0];
        rig.ambient.intensity = 0.5;
        let uniform = LightUniform::new(&rig, None);
        assert_eq!(uniform.ambient, [0.5, 0.25, 0.0, 1.0]);
    }
}
