//! # greta
//!
//! Guaranteed Robust Envelope Tetrahedralization Algorithms.
//!
//! Converts an arbitrary triangle soup (self-intersecting, non-manifold, or
//! holed) into a valid tetrahedral volume mesh whose boundary stays within a
//! user-chosen Hausdorff envelope of the input, with no inverted elements and
//! best-effort dihedral-angle quality.
//!
//! ```
//! use greta::{tetrahedralize, Config};
//!
//! // the unit tetrahedron as a closed soup
//! let vertices = vec![
//!     [0.0, 0.0, 0.0],
//!     [1.0, 0.0, 0.0],
//!     [0.0, 1.0, 0.0],
//!     [0.0, 0.0, 1.0],
//! ];
//! let faces = vec![[0, 2, 1], [0, 3, 2], [0, 1, 3], [1, 2, 3]];
//!
//! let cfg = Config {
//!     use_voxel_stuffing: false,
//!     eps_rel: 100.0,
//!     max_num_passes: 2,
//!     ..Config::default()
//! };
//! let out = tetrahedralize(&vertices, &faces, &cfg).unwrap();
//!
//! assert!(!out.tets.is_empty());
//! assert_eq!(out.tets.len(), out.min_dihedral.len());
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub use config::{CancelToken, Config, ProgressStep, SizingMesh};
pub use error::{MeshError, MeshWarning};
pub use node::VertexNode;
pub use pipeline::{tetrahedralize, tetrahedralize_with_progress, TetMeshOutput};

pub mod bsp;
pub mod cell_tets;
pub mod config;
pub mod conform;
pub mod delaunay;
pub mod energy;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod mesh;
pub mod node;
pub mod optimize;
pub mod pipeline;
pub mod point;
pub mod predicates;
pub mod simplify;
pub mod state;
mod tetds;
mod utils;

#[cfg(test)]
mod test_utils {
    use std::collections::HashMap;
    use std::ops::RangeInclusive;

    use rand::{distributions::Uniform, prelude::Distribution};

    pub type Vertex3 = [f64; 3];

    pub fn sample_vertices_3d(n: usize, range: Option<RangeInclusive<f64>>) -> Vec<Vertex3> {
        let mut rng = rand::thread_rng();
        let range = range.unwrap_or(-0.5..=0.5);
        let uniform = Uniform::from(range);

        let mut vertices: Vec<Vertex3> = Vec::with_capacity(n);
        for _ in 0..n {
            let x = uniform.sample(&mut rng);
            let y = uniform.sample(&mut rng);
            let z = uniform.sample(&mut rng);

            vertices.push([x, y, z]);
        }

        vertices
    }

    /// The unit tetrahedron as a closed, outward-oriented soup.
    pub fn unit_tet_soup() -> (Vec<Vertex3>, Vec<[usize; 3]>) {
        (
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            vec![[0, 2, 1], [0, 3, 2], [0, 1, 3], [1, 2, 3]],
        )
    }

    /// The axis-aligned unit cube as 12 outward-oriented triangles.
    pub fn unit_cube_soup() -> (Vec<Vertex3>, Vec<[usize; 3]>) {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 1.0],
        ];
        let faces = vec![
            [0, 2, 3],
            [0, 3, 1],
            [4, 5, 7],
            [4, 7, 6],
            [0, 1, 5],
            [0, 5, 4],
            [2, 7, 3],
            [2, 6, 7],
            [0, 4, 6],
            [0, 6, 2],
            [1, 7, 5],
            [1, 3, 7],
        ];
        (vertices, faces)
    }

    /// Two coplanar triangles sharing a single vertex.
    pub fn bowtie_soup() -> (Vec<Vertex3>, Vec<[usize; 3]>) {
        (
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, -1.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 3, 4]],
        )
    }

    /// An icosphere with `subdivisions` refinement levels: 20·4ⁿ triangles on
    /// the unit sphere, outward-oriented.
    pub fn unit_sphere_soup(subdivisions: usize) -> (Vec<Vertex3>, Vec<[usize; 3]>) {
        let t = (1.0 + 5f64.sqrt()) / 2.0;
        let mut vertices: Vec<Vertex3> = vec![
            [-1.0, t, 0.0],
            [1.0, t, 0.0],
            [-1.0, -t, 0.0],
            [1.0, -t, 0.0],
            [0.0, -1.0, t],
            [0.0, 1.0, t],
            [0.0, -1.0, -t],
            [0.0, 1.0, -t],
            [t, 0.0, -1.0],
            [t, 0.0, 1.0],
            [-t, 0.0, -1.0],
            [-t, 0.0, 1.0],
        ];
        for v in vertices.iter_mut() {
            normalize(v);
        }

        let mut faces: Vec<[usize; 3]> = vec![
            [0, 11, 5],
            [0, 5, 1],
            [0, 1, 7],
            [0, 7, 10],
            [0, 10, 11],
            [1, 5, 9],
            [5, 11, 4],
            [11, 10, 2],
            [10, 7, 6],
            [7, 1, 8],
            [3, 9, 4],
            [3, 4, 2],
            [3, 2, 6],
            [3, 6, 8],
            [3, 8, 9],
            [4, 9, 5],
            [2, 4, 11],
            [6, 2, 10],
            [8, 6, 7],
            [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut cache: HashMap<(usize, usize), usize> = HashMap::new();
            let mut next = Vec::with_capacity(faces.len() * 4);
            for [a, b, c] in faces {
                let ab = midpoint(&mut vertices, &mut cache, a, b);
                let bc = midpoint(&mut vertices, &mut cache, b, c);
                let ca = midpoint(&mut vertices, &mut cache, c, a);
                next.push([a, ab, ca]);
                next.push([b, bc, ab]);
                next.push([c, ca, bc]);
                next.push([ab, bc, ca]);
            }
            faces = next;
        }

        (vertices, faces)
    }

    fn midpoint(
        vertices: &mut Vec<Vertex3>,
        cache: &mut HashMap<(usize, usize), usize>,
        a: usize,
        b: usize,
    ) -> usize {
        let key = (a.min(b), a.max(b));
        if let Some(&m) = cache.get(&key) {
            return m;
        }
        let mut v = [
            (vertices[a][0] + vertices[b][0]) / 2.0,
            (vertices[a][1] + vertices[b][1]) / 2.0,
            (vertices[a][2] + vertices[b][2]) / 2.0,
        ];
        normalize(&mut v);
        vertices.push(v);
        cache.insert(key, vertices.len() - 1);
        vertices.len() - 1
    }

    fn normalize(v: &mut Vertex3) {
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        v[0] /= len;
        v[1] /= len;
        v[2] /= len;
    }

    #[test]
    fn generated_soups_are_closed_and_oriented() {
        use crate::filter::winding_number;

        let (v, f) = unit_cube_soup();
        assert!((winding_number(&[0.5, 0.5, 0.5], &v, &f) - 1.0).abs() < 1e-9);

        let (v, f) = unit_tet_soup();
        assert!((winding_number(&[0.2, 0.2, 0.2], &v, &f) - 1.0).abs() < 1e-9);

        let (v, f) = unit_sphere_soup(1);
        assert_eq!(f.len(), 80);
        assert!((winding_number(&[0.0, 0.0, 0.0], &v, &f) - 1.0).abs() < 1e-9);
    }
}
