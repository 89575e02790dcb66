use std::f32::consts::PI;

use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::math::Aabb;
use crate::render::{v, Vertex};

/// CPU-side mesh description. Stays around for bounds queries and tests;
/// `Mesh::from_data` uploads it.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn local_bounds(&self) -> Aabb {
        let points: Vec<Vec3> = self.vertices.iter().map(|v| Vec3::from(v.pos)).collect();
        Aabb::from_points(&points)
    }

    /// Unit cube centered at the origin.
    pub fn cube() -> Self {
        let n = |x, y, z| [x, y, z];
        let mut vertices = Vec::with_capacity(24);
        let faces = [
            (n(1.0, 0.0, 0.0), n(0.0, 0.0, 1.0), n(0.0, 1.0, 0.0)),
            (n(-1.0, 0.0, 0.0), n(0.0, 0.0, -1.0), n(0.0, 1.0, 0.0)),
            (n(0.0, 1.0, 0.0), n(1.0, 0.0, 0.0), n(0.0, 0.0, 1.0)),
            (n(0.0, -1.0, 0.0), n(1.0, 0.0, 0.0), n(0.0, 0.0, -1.0)),
            (n(0.0, 0.0, 1.0), n(1.0, 0.0, 0.0), n(0.0, 1.0, 0.0)),
            (n(0.0, 0.0, -1.0), n(-1.0, 0.0, 0.0), n(0.0, 1.0, 0.0)),
        ];
        let corners = [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]];
        let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
        for (normal, tangent, bitangent) in faces {
            let normal = Vec3::from(normal);
            let tangent = Vec3::from(tangent);
            let bitangent = Vec3::from(bitangent);
            for (corner, uv) in corners.iter().zip(uvs) {
                let pos = normal * 0.5 + tangent * corner[0] + bitangent * corner[1];
                vertices.push(v(pos.to_array(), normal.to_array(), uv));
            }
        }
        let mut indices = Vec::with_capacity(36);
        for face in 0..6u32 {
            let base = face * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self { vertices, indices }
    }

    /// Unit sphere, latitude/longitude tessellation.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = 2.0 * PI * segment as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();
                let u = segment as f32 / segments as f32;
                let tex_v = ring as f32 / rings as f32;
                // Unit sphere: position doubles as the normal.
                vertices.push(v([x, y, z], [x, y, z], [u, tex_v]));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                indices.extend_from_slice(&[current, next, current + 1]);
                indices.extend_from_slice(&[current + 1, next, next + 1]);
            }
        }

        Self { vertices, indices }
    }

    /// Flat quad in the XZ plane, `size` wide, normal up.
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        let up = [0.0, 1.0, 0.0];
        Self {
            vertices: vec![
                v([-h, 0.0, -h], up, [0.0, 0.0]),
                v([h, 0.0, -h], up, [1.0, 0.0]),
                v([h, 0.0, h], up, [1.0, 1.0]),
                v([-h, 0.0, h], up, [0.0, 1.0]),
            ],
            indices: vec![0, 2, 1, 0, 3, 2],
        }
    }
}

#[derive(Debug)]
pub struct Mesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    local_bounds: Aabb,
}

impl Mesh {
    pub fn from_data(device: &wgpu::Device, data: &MeshData) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("VertexBuffer"),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("IndexBuffer"),
            contents: bytemuck::cast_slice(&data.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
            local_bounds: data.local_bounds(),
        }
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.index_buffer
    }

    pub fn index_format(&self) -> wgpu::IndexFormat {
        wgpu::IndexFormat::Uint32
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_bounds_are_unit() {
        let bounds = MeshData::cube().local_bounds();
        assert!(bounds.min.abs_diff_eq(Vec3::splat(-0.5), 1e-6));
        assert!(bounds.max.abs_diff_eq(Vec3::splat(0.5), 1e-6));
    }

    #[test]
    fn sphere_vertices_are_unit_length() {
        let data = MeshData::sphere(16, 8);
        for vertex in &data.vertices {
            let len = Vec3::from(vertex.pos).length();
            assert!((len - 1.0).abs() < 1e-4, "vertex at radius {len}");
        }
    }

    #[test]
    fn sphere_indices_in_range() {
        let data = MeshData::sphere(12, 6);
        let count = data.vertices.len() as u32;
        assert!(data.indices.iter().all(|i| *i < count));
        assert_eq!(data.indices.len() % 3, 0);
    }
}
