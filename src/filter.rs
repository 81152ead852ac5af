//! Inside/outside classification of the ambient mesh via the generalized
//! winding number.

use crate::mesh::TetMesh;
use crate::utils::types::Vertex3;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Generalized winding number of the soup at `p`: the solid angles of all
/// triangles summed (van Oosterom-Strackee) over 4π. Close to 1 deep inside a
/// closed surface, close to 0 outside, fractional near holes.
pub fn winding_number(p: &Vertex3, vertices: &[Vertex3], faces: &[[usize; 3]]) -> f64 {
    let p = Vector3::from(*p);
    let mut total = 0.0;

    for f in faces {
        let a = Vector3::from(vertices[f[0]]) - p;
        let b = Vector3::from(vertices[f[1]]) - p;
        let c = Vector3::from(vertices[f[2]]) - p;

        let la = a.norm();
        let lb = b.norm();
        let lc = c.norm();

        let det = a.dot(&b.cross(&c));
        let denom = la * lb * lc + a.dot(&b) * lc + b.dot(&c) * la + c.dot(&a) * lb;

        total += 2.0 * det.atan2(denom);
    }

    total / (4.0 * std::f64::consts::PI)
}

/// Remove every tet whose barycenter has winding number ≤ 1/2, then drop
/// vertices that lost all incident tets. Returns the number of removed tets.
///
/// Idempotent: surviving tets keep their barycenters, so a second pass
/// removes nothing.
pub fn filter_outside(mesh: &mut TetMesh, vertices: &[Vertex3], faces: &[[usize; 3]]) -> usize {
    let candidates: Vec<usize> = mesh.active_tets().collect();

    let outside: Vec<usize> = candidates
        .par_iter()
        .filter(|&&t| {
            let pos = mesh.positions(t);
            let barycenter = [
                (pos[0][0] + pos[1][0] + pos[2][0] + pos[3][0]) / 4.0,
                (pos[0][1] + pos[1][1] + pos[2][1] + pos[3][1]) / 4.0,
                (pos[0][2] + pos[1][2] + pos[2][2] + pos[3][2]) / 4.0,
            ];
            winding_number(&barycenter, vertices, faces) <= 0.5
        })
        .copied()
        .collect();

    for &t in &outside {
        mesh.remove_tet(t);
    }

    for v in 0..mesh.verts.len() {
        if !mesh.verts[v].removed && mesh.verts[v].tets.is_empty() {
            mesh.remove_vertex(v);
        }
    }

    log::debug!(
        "winding filter: removed {} of {} tets",
        outside.len(),
        candidates.len()
    );

    outside.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::unit_cube_soup;

    #[test]
    fn winding_number_classifies_cube() {
        let (v, f) = unit_cube_soup();

        assert!((winding_number(&[0.5, 0.5, 0.5], &v, &f) - 1.0).abs() < 1e-9);
        assert!(winding_number(&[2.0, 0.5, 0.5], &v, &f).abs() < 1e-9);
        assert!(winding_number(&[0.5, 0.5, -3.0], &v, &f).abs() < 1e-9);
    }

    #[test]
    fn open_surface_has_fractional_winding() {
        let (v, mut f) = unit_cube_soup();
        // remove the two triangles of the top face
        f.retain(|t| !(v[t[0]][2] == 1.0 && v[t[1]][2] == 1.0 && v[t[2]][2] == 1.0));

        let w = winding_number(&[0.5, 0.5, 0.5], &v, &f);
        assert!(w > 0.5 && w < 1.0, "got {w}");
    }

    #[test]
    fn filter_is_idempotent() {
        use crate::mesh::FacetTag;
        use crate::point::Point;

        let (v, f) = unit_cube_soup();

        let mut mesh = TetMesh::new();
        // one tet inside the cube, one far outside
        for p in [
            [0.1, 0.1, 0.1],
            [0.9, 0.1, 0.1],
            [0.1, 0.9, 0.1],
            [0.1, 0.1, 0.9],
            [5.0, 5.0, 5.0],
            [6.0, 5.0, 5.0],
            [5.0, 6.0, 5.0],
            [5.0, 5.0, 6.0],
        ] {
            mesh.add_vertex(Point::rounded(p));
        }
        mesh.add_tet([0, 1, 2, 3], [FacetTag::NotSurface; 4]);
        mesh.add_tet([4, 5, 6, 7], [FacetTag::NotSurface; 4]);

        let removed = filter_outside(&mut mesh, &v, &f);
        assert_eq!(removed, 1);
        assert_eq!(mesh.num_active_tets(), 1);

        let removed_again = filter_outside(&mut mesh, &v, &f);
        assert_eq!(removed_again, 0);
    }
}
