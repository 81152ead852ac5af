//! Decomposition of the convex BSP cells into the initial tet mesh.
//!
//! Each cell is coned from its lowest-index vertex over the triangulations of
//! the faces that do not contain it. Face triangulations are computed once
//! and shared by both adjacent cells, so the resulting tet mesh is a
//! conforming simplicial complex. Facets inherit the surface/bbox tags of the
//! faces they lie in.

use crate::bsp::BspComplex;
use crate::mesh::{FacetTag, TetMesh};
use crate::predicates::Sign;
use crate::state::RefineState;
use crate::utils::types::{Vertex3, VertexIdx};
use nalgebra::Vector3;
use std::collections::HashMap;

/// Build the initial [TetMesh] from the subdivided cell complex.
pub fn tetrahedralize_cells(
    bsp: &BspComplex,
    state: &RefineState,
    boundary_edges: &[(Vertex3, Vertex3)],
) -> TetMesh {
    let mut mesh = TetMesh::new();

    // shared per-face triangulation: fan from the lowest loop vertex
    let mut face_tris: HashMap<usize, Vec<[VertexIdx; 3]>> = HashMap::new();
    for f in bsp.active_faces() {
        face_tris.insert(f, fan_triangulate(bsp, &bsp.faces[f].verts));
    }

    // facet tags by sorted vertex triple
    let mut tag_map: HashMap<[VertexIdx; 3], FacetTag> = HashMap::new();
    for f in bsp.active_faces() {
        let tag = bsp.faces[f].tag;
        if tag == FacetTag::NotSurface {
            continue;
        }
        for tri in &face_tris[&f] {
            let mut key = *tri;
            key.sort_unstable();
            tag_map.insert(key, tag);
        }
    }

    let mut vert_remap: HashMap<VertexIdx, VertexIdx> = HashMap::new();

    for n in bsp.active_nodes() {
        let pivot = match bsp.nodes[n]
            .faces
            .iter()
            .flat_map(|&f| bsp.faces[f].verts.iter().copied())
            .min()
        {
            Some(v) => v,
            None => continue,
        };

        for &f in &bsp.nodes[n].faces {
            if bsp.faces[f].verts.contains(&pivot) {
                continue;
            }
            for tri in &face_tris[&f] {
                emit_tet(&mut mesh, bsp, &mut vert_remap, pivot, tri, &tag_map);
            }
        }
    }

    mark_vertex_flags(&mut mesh);

    let unrounded = mesh.round_vertices();
    if unrounded > 0 {
        log::debug!("initial mesh keeps {unrounded} unrounded vertices");
    }

    if !state.is_mesh_closed {
        mark_boundary_vertices(&mut mesh, boundary_edges, state.sampling_dist);
    }

    log::debug!(
        "initial mesh: {} vertices, {} tets",
        mesh.num_active_verts(),
        mesh.num_active_tets()
    );

    mesh
}

/// Fan triangulation of a convex loop, skipping the degenerate slivers that
/// collinear loop vertices produce.
fn fan_triangulate(bsp: &BspComplex, loop_verts: &[VertexIdx]) -> Vec<[VertexIdx; 3]> {
    let apex_pos = loop_verts
        .iter()
        .enumerate()
        .min_by_key(|&(_, v)| *v)
        .map(|(i, _)| i)
        .unwrap();
    let apex = loop_verts[apex_pos];

    let mut tris = Vec::with_capacity(loop_verts.len().saturating_sub(2));
    let n = loop_verts.len();
    for k in 1..n - 1 {
        let a = loop_verts[(apex_pos + k) % n];
        let b = loop_verts[(apex_pos + k + 1) % n];
        if crate::predicates::is_degenerate_triangle(
            &bsp.verts[apex].pos.to_exact(),
            &bsp.verts[a].pos.to_exact(),
            &bsp.verts[b].pos.to_exact(),
        ) {
            continue;
        }
        tris.push([apex, a, b]);
    }
    tris
}

fn emit_tet(
    mesh: &mut TetMesh,
    bsp: &BspComplex,
    vert_remap: &mut HashMap<VertexIdx, VertexIdx>,
    pivot: VertexIdx,
    tri: &[VertexIdx; 3],
    tag_map: &HashMap<[VertexIdx; 3], FacetTag>,
) {
    let orientation = crate::predicates::orient3d_points(
        &bsp.verts[pivot].pos,
        &bsp.verts[tri[0]].pos,
        &bsp.verts[tri[1]].pos,
        &bsp.verts[tri[2]].pos,
    );
    let (a, b, c) = match orientation {
        Sign::Positive => (tri[0], tri[1], tri[2]),
        Sign::Negative => (tri[0], tri[2], tri[1]),
        Sign::Zero => return, // coplanar with the pivot, zero volume
    };

    let lookup = |x: VertexIdx, y: VertexIdx, z: VertexIdx| -> FacetTag {
        let mut key = [x, y, z];
        key.sort_unstable();
        tag_map.get(&key).copied().unwrap_or(FacetTag::NotSurface)
    };
    // tags[i] labels the facet opposite vertex i of (pivot, a, b, c)
    let tags = [
        lookup(a, b, c),
        lookup(pivot, b, c),
        lookup(pivot, a, c),
        lookup(pivot, a, b),
    ];

    let vs = [pivot, a, b, c].map(|v| {
        *vert_remap
            .entry(v)
            .or_insert_with(|| mesh.add_vertex(bsp.verts[v].pos.clone()))
    });

    mesh.add_tet(vs, tags);
}

fn mark_vertex_flags(mesh: &mut TetMesh) {
    let mut on_surface = vec![false; mesh.verts.len()];
    let mut on_bbox = vec![false; mesh.verts.len()];

    for t in mesh.active_tets() {
        for i in 0..4 {
            let tag = mesh.tets[t].tags[i];
            if tag == FacetTag::NotSurface {
                continue;
            }
            for v in mesh.tets[t].facet(i) {
                match tag {
                    FacetTag::Surface(_) => on_surface[v] = true,
                    FacetTag::Bbox => on_bbox[v] = true,
                    FacetTag::NotSurface => {}
                }
            }
        }
    }

    for (v, vert) in mesh.verts.iter_mut().enumerate() {
        vert.on_surface = on_surface[v];
        vert.on_bbox = on_bbox[v];
    }
}

/// Flag surface vertices sitting on an open rim of the input.
fn mark_boundary_vertices(
    mesh: &mut TetMesh,
    boundary_edges: &[(Vertex3, Vertex3)],
    tolerance: f64,
) {
    let tol_sq = tolerance * tolerance;
    for vert in mesh.verts.iter_mut() {
        if vert.removed || !vert.on_surface {
            continue;
        }
        let p = vert.pos.approx();
        if boundary_edges
            .iter()
            .any(|(a, b)| sq_dist_point_segment(&p, a, b) <= tol_sq)
        {
            vert.on_boundary = true;
        }
    }
}

fn sq_dist_point_segment(p: &Vertex3, a: &Vertex3, b: &Vertex3) -> f64 {
    let p = Vector3::from(*p);
    let a = Vector3::from(*a);
    let b = Vector3::from(*b);

    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq == 0.0 {
        return (p - a).norm_squared();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::delaunay::Tetrahedralization;
    use crate::energy::tet_volume;
    use crate::simplify::SimplifiedSoup;

    fn state() -> RefineState {
        RefineState::new(&Config::default(), 3f64.sqrt(), true)
    }

    fn cube_complex() -> BspComplex {
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
        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, false).unwrap();
        BspComplex::from_delaunay(delaunay.vertices(), &delaunay.casual_tets())
    }

    #[test]
    fn cube_cells_fill_the_cube() {
        let bsp = cube_complex();
        let mesh = tetrahedralize_cells(&bsp, &state(), &[]);

        assert!(mesh.is_sound());
        let volume: f64 = mesh
            .active_tets()
            .map(|t| tet_volume(&mesh.positions(t)))
            .sum();
        assert!((volume - 1.0).abs() < 1e-9, "volume {volume}");

        // every tet is positively oriented
        for t in mesh.active_tets() {
            assert!(tet_volume(&mesh.positions(t)) > 0.0);
        }
    }

    #[test]
    fn split_cells_stay_conforming() {
        let mut bsp = cube_complex();
        let soup = SimplifiedSoup {
            vertices: vec![[-1.0, -1.0, 0.5], [9.0, -1.0, 0.5], [-1.0, 9.0, 0.5]],
            faces: vec![[0, 1, 2]],
            is_closed: false,
            boundary_edges: Vec::new(),
        };
        crate::conform::match_faces(&mut bsp, &soup);
        bsp.subdivide(&soup);
        crate::conform::tag_faces(&mut bsp, &soup);
        assert!(bsp.is_sound());

        let mesh = tetrahedralize_cells(&bsp, &state(), &[]);
        assert!(mesh.is_sound());

        let volume: f64 = mesh
            .active_tets()
            .map(|t| tet_volume(&mesh.positions(t)))
            .sum();
        assert!((volume - 1.0).abs() < 1e-9, "volume {volume}");

        // the z = 0.5 section is tagged as surface, and its vertices flagged
        let mut surface_facets = 0;
        for t in mesh.active_tets() {
            for i in 0..4 {
                if mesh.tets[t].tags[i].is_surface() {
                    surface_facets += 1;
                    for v in mesh.tets[t].facet(i) {
                        assert!(mesh.verts[v].on_surface);
                        assert_eq!(mesh.verts[v].pos.approx()[2], 0.5);
                    }
                }
            }
        }
        assert!(surface_facets >= 2);
    }

    #[test]
    fn bbox_facets_are_tagged() {
        let bsp = cube_complex();
        let mesh = tetrahedralize_cells(&bsp, &state(), &[]);

        let mut bbox_facets = 0;
        for t in mesh.active_tets() {
            for i in 0..4 {
                if mesh.tets[t].tags[i] == FacetTag::Bbox {
                    bbox_facets += 1;
                }
            }
        }
        // the cube hull is covered by box facets
        assert!(bbox_facets >= 12);
    }
}
