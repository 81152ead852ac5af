//! Edge splitting, longest edge first.

use super::{candidate_orient, candidate_quality, edge_len_sq, edge_target_len, OptContext};
use crate::mesh::{FacetTag, TetMesh};
use crate::point::Point;
use crate::utils::types::VertexIdx;

/// Split every edge longer than 4/3 of its local target length, longest
/// first. Returns the number of accepted splits.
pub(crate) fn split_pass(mesh: &mut TetMesh, ctx: &OptContext) -> usize {
    let mut candidates: Vec<(f64, VertexIdx, VertexIdx)> = mesh
        .edges()
        .into_iter()
        .filter_map(|(u, v)| {
            let len_sq = edge_len_sq(mesh, u, v);
            let target = edge_target_len(mesh, ctx.state, u, v) * 4.0 / 3.0;
            (len_sq > target * target).then_some((len_sq, u, v))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let mut accepted = 0;
    for (_, u, v) in candidates {
        if try_split(mesh, ctx, u, v) {
            accepted += 1;
        }
    }
    accepted
}

fn try_split(mesh: &mut TetMesh, ctx: &OptContext, u: VertexIdx, v: VertexIdx) -> bool {
    if mesh.verts[u].removed || mesh.verts[v].removed {
        return false;
    }
    let old_tets = mesh.edge_tets(u, v);
    if old_tets.is_empty() {
        return false;
    }

    let old_max = super::max_energy(mesh, &old_tets);

    let pu = mesh.verts[u].pos.approx();
    let pv = mesh.verts[v].pos.approx();
    let mid = Point::rounded([
        (pu[0] + pv[0]) / 2.0,
        (pu[1] + pv[1]) / 2.0,
        (pu[2] + pv[2]) / 2.0,
    ]);

    // candidate children: each incident tet splits into a u-side and v-side
    // copy with the midpoint replacing the far endpoint
    let mut new_tets: Vec<([VertexIdx; 4], [FacetTag; 4], usize)> = Vec::new();
    let mut surface_checks = Vec::new();
    let mut on_surface = false;
    let mut on_bbox = false;

    for &t in &old_tets {
        let vs = mesh.tets[t].vs;
        let tags = mesh.tets[t].tags;
        let iu = mesh.tets[t].index_of(u).unwrap();
        let iv = mesh.tets[t].index_of(v).unwrap();

        let mut child_u = vs;
        child_u[iv] = usize::MAX; // placeholder for the midpoint
        let mut tags_u = tags;
        tags_u[iu] = FacetTag::NotSurface;

        let mut child_v = vs;
        child_v[iu] = usize::MAX;
        let mut tags_v = tags;
        tags_v[iv] = FacetTag::NotSurface;

        new_tets.push((child_u, tags_u, t));
        new_tets.push((child_v, tags_v, t));

        // facets containing the whole edge are cut in two; if tagged, both
        // halves must stay inside the envelope
        for i in 0..4 {
            if i == iu || i == iv {
                continue;
            }
            match tags[i] {
                FacetTag::Surface(_) => {
                    on_surface = true;
                    let facet = mesh.tets[t].facet(i);
                    for &kept in &[u, v] {
                        let tri: Vec<_> = facet
                            .iter()
                            .map(|&w| {
                                if w == u || w == v {
                                    if w == kept {
                                        mesh.verts[w].pos.approx()
                                    } else {
                                        mid.approx()
                                    }
                                } else {
                                    mesh.verts[w].pos.approx()
                                }
                            })
                            .collect();
                        surface_checks.push([tri[0], tri[1], tri[2]]);
                    }
                }
                FacetTag::Bbox => on_bbox = true,
                FacetTag::NotSurface => {}
            }
        }
    }

    // materialize the midpoint, then validate orientation and energy before
    // paying for the envelope sampling
    let m = mesh.add_vertex(mid);
    let mut ok = true;
    for (vs, _, _) in new_tets.iter_mut() {
        for w in vs.iter_mut() {
            if *w == usize::MAX {
                *w = m;
            }
        }
        if !candidate_orient(mesh, vs, None).is_positive() {
            ok = false;
            break;
        }
        if candidate_quality(mesh, vs, None).energy > old_max {
            ok = false;
            break;
        }
    }
    if ok {
        for tri in &surface_checks {
            if !ctx
                .env
                .triangle_inside(tri, ctx.state.eps, ctx.state.sampling_dist)
            {
                ok = false;
                break;
            }
        }
    }

    if !ok {
        mesh.verts.pop();
        return false;
    }

    for &t in &old_tets {
        mesh.remove_tet(t);
    }
    for (vs, tags, _) in new_tets {
        mesh.add_tet(vs, tags);
    }

    mesh.verts[m].on_surface = on_surface;
    mesh.verts[m].on_bbox = on_bbox;
    mesh.verts[m].on_boundary = mesh.verts[u].on_boundary && mesh.verts[v].on_boundary;
    mesh.verts[m].sizing_scale =
        (mesh.verts[u].sizing_scale + mesh.verts[v].sizing_scale) / 2.0;

    true
}
