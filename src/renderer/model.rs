// Meshes - vertex format, OBJ loading and GPU-resident models

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::mem::{offset_of, size_of};
use std::path::Path;
use std::sync::Arc;

use crate::backend::{Buffer, GpuDevice, RenderError, RenderResult};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        ]
    }

    /// Bit pattern used to merge identical vertices
    fn key(&self) -> [u32; 11] {
        bytemuck::cast(*self)
    }
}

/// CPU-side mesh, ready for upload
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open model {:?}", path))?;
        let mesh = Self::parse_obj(&mut BufReader::new(file))
            .with_context(|| format!("Failed to parse model {:?}", path))?;
        log::info!(
            "Loaded {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text, triangulating faces and merging duplicate vertices
    pub fn parse_obj<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _) = tobj::load_obj_buf(
            reader,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ..Default::default()
            },
            |_| Ok(Default::default()),
        )?;

        let mut mesh = MeshData::default();
        let mut unique_vertices: HashMap<[u32; 11], u32> = HashMap::new();

        for model in &models {
            let m = &model.mesh;
            for &index in &m.indices {
                let i = index as usize;
                let vec3_at = |data: &[f32], fallback: [f32; 3]| {
                    data.get(3 * i..3 * i + 3)
                        .map_or(fallback, |v| [v[0], v[1], v[2]])
                };

                let vertex = Vertex {
                    position: vec3_at(&m.positions, [0.0; 3]),
                    color: vec3_at(&m.vertex_color, [1.0; 3]),
                    normal: vec3_at(&m.normals, [0.0; 3]),
                    // OBJ puts v = 0 at the bottom of the image
                    uv: m
                        .texcoords
                        .get(2 * i..2 * i + 2)
                        .map_or([0.0; 2], |t| [t[0], 1.0 - t[1]]),
                };

                let next = mesh.vertices.len() as u32;
                let slot = *unique_vertices.entry(vertex.key()).or_insert_with(|| {
                    mesh.vertices.push(vertex);
                    next
                });
                mesh.indices.push(slot);
            }
        }

        Ok(mesh)
    }

    /// Unit cube centered on the origin, one color per face
    pub fn cube() -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3], [f32; 3]); 6] = [
            // normal, u axis, v axis, color
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.8, 0.8, 0.1]),
            ([-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.9, 0.9, 0.9]),
            ([0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.9, 0.6, 0.1]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.8, 0.1, 0.1]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.1, 0.1, 0.8]),
            ([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.1, 0.8, 0.1]),
        ];

        let mut mesh = MeshData::default();
        for (normal, u, v, color) in faces {
            let base = mesh.vertices.len() as u32;
            for (su, sv) in [(-0.5f32, -0.5f32), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let position = [0, 1, 2].map(|k| normal[k] * 0.5 + u[k] * su + v[k] * sv);
                mesh.vertices.push(Vertex {
                    position,
                    color,
                    normal,
                    uv: [su + 0.5, 0.5 - sv],
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }
}

/// Mesh uploaded to device-local vertex and index buffers
pub struct Model {
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
    device: Arc<dyn GpuDevice>,
}

impl Model {
    pub fn new(device: Arc<dyn GpuDevice>, mesh: &MeshData) -> RenderResult<Self> {
        if mesh.vertices.len() < 3 {
            return Err(RenderError::InvalidState("a model needs at least 3 vertices"));
        }

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )?;

        let index_buffer = if mesh.indices.is_empty() {
            None
        } else {
            Some(Buffer::device_local_with_data(
                device.clone(),
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(&mesh.indices),
            )?)
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
            device,
        })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        self.device
            .cmd_bind_vertex_buffer(cmd, self.vertex_buffer.handle());
        if let Some(indices) = &self.index_buffer {
            self.device.cmd_bind_index_buffer(cmd, indices.handle());
        }
    }

    pub fn draw(&self, cmd: vk::CommandBuffer) {
        if self.index_buffer.is_some() {
            self.device.cmd_draw_indexed(cmd, self.index_count);
        } else {
            self.device.cmd_draw(cmd, self.vertex_count);
        }
    }
}
