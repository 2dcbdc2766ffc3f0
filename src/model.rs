//! Tools for loading models.

use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ahash::AHashMap;
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use nalgebra_glm as glm;
use tracing::debug;

use crate::{mesh::Mesh, vertex::Vertex};

/// Load a Wavefront OBJ file as an indexed mesh, fitted into the benchmark's
/// clip-space volume.
#[tracing::instrument(level = "DEBUG", skip_all, fields(path = ?path))]
pub fn load_model<P>(path: P) -> Result<Mesh>
where
    P: AsRef<Path> + Debug,
{
    let mut reader = BufReader::new(
        File::open(&path).wrap_err_with(|| format!("Error opening model {path:?}"))?,
    );

    let (models, _) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
        |_| Ok((vec![tobj::Material::default()], Default::default())),
    )?;

    let mut mesh = Mesh::default();
    let mut unique_vertices = AHashMap::new();

    for model in &models {
        let m = &model.mesh;
        for index in &m.indices {
            let i = *index as usize;

            let normal = if m.normals.len() >= 3 * (i + 1) {
                glm::vec3(m.normals[3 * i], m.normals[3 * i + 1], m.normals[3 * i + 2])
            } else {
                glm::vec3(0.0, 0.0, 1.0)
            };
            let tex_coord = if m.texcoords.len() >= 2 * (i + 1) {
                glm::vec2(m.texcoords[2 * i], 1.0 - m.texcoords[2 * i + 1])
            } else {
                glm::vec2(0.0, 0.0)
            };

            let vertex = Vertex {
                pos: glm::vec3(m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]),
                normal,
                tex_coord,
            };

            if let Some(index) = unique_vertices.get(&vertex) {
                mesh.indices.push(*index as u32);
            } else {
                let index = mesh.vertices.len();
                unique_vertices.insert(vertex, index);
                mesh.vertices.push(vertex);
                mesh.indices.push(index as u32);
            }
        }
    }

    if mesh.indices.is_empty() {
        return Err(eyre!("Model {path:?} contains no triangles"));
    }

    fit_to_clip_volume(&mut mesh);

    debug!(
        vertex_count = mesh.vertices.len(),
        index_count = mesh.indices.len(),
        "Successfully loaded model"
    );

    Ok(mesh)
}

/// Uniformly scale and translate the mesh so it is centred on the Z axis,
/// spans at most one unit in X and Y, and sits within `0..=1` in Z.
///
/// The benchmark draws with identity view and projection, so this stands in
/// for framing the model with a camera.
pub fn fit_to_clip_volume(mesh: &mut Mesh) {
    let Some((lo, hi)) = mesh.bounds() else {
        return;
    };

    let extent = hi - lo;
    let largest = extent.max();
    let scale = if largest > 0.0 { 1.0 / largest } else { 1.0 };
    let center = glm::vec3((lo.x + hi.x) / 2.0, (lo.y + hi.y) / 2.0, lo.z);

    for v in &mut mesh.vertices {
        v.pos = (v.pos - center) * scale;
    }
}
