//! Edge collapsing, shortest edge first.

use super::{candidate_orient, candidate_quality, edge_len_sq, edge_target_len, OptContext};
use crate::energy::Energy;
use crate::mesh::TetMesh;
use crate::utils::types::VertexIdx;
use std::collections::BTreeSet;

/// Collapse every edge shorter than 4/5 of its local target length, shortest
/// first. Returns the number of accepted collapses.
pub(crate) fn collapse_pass(mesh: &mut TetMesh, ctx: &OptContext) -> usize {
    let mut candidates: Vec<(f64, VertexIdx, VertexIdx)> = mesh
        .edges()
        .into_iter()
        .filter_map(|(u, v)| {
            let len_sq = edge_len_sq(mesh, u, v);
            let target = edge_target_len(mesh, ctx.state, u, v) * 4.0 / 5.0;
            (len_sq < target * target).then_some((len_sq, u, v))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut accepted = 0;
    for (_, u, v) in candidates {
        if try_collapse(mesh, ctx, u, v) || try_collapse(mesh, ctx, v, u) {
            accepted += 1;
        }
    }
    accepted
}

/// Collapse `u` into `v`, removing `u`.
fn try_collapse(mesh: &mut TetMesh, ctx: &OptContext, u: VertexIdx, v: VertexIdx) -> bool {
    if mesh.verts[u].removed || mesh.verts[v].removed {
        return false;
    }
    // box and rim vertices must survive in place
    if mesh.verts[u].on_bbox || mesh.verts[u].on_boundary {
        return false;
    }

    let dying = mesh.edge_tets(u, v);
    if dying.is_empty() {
        return false;
    }
    let moving: Vec<usize> = mesh.verts[u]
        .tets
        .iter()
        .copied()
        .filter(|t| !dying.contains(t))
        .collect();

    let mut affected = dying.clone();
    affected.extend(&moving);
    let old_max = super::max_energy(mesh, &affected);
    let old_sum = super::sum_energy(mesh, &affected);

    // no candidate may duplicate an existing tet of v's star
    let existing: BTreeSet<[VertexIdx; 4]> = mesh.verts[v]
        .tets
        .iter()
        .map(|&t| {
            let mut key = mesh.tets[t].vs;
            key.sort_unstable();
            key
        })
        .collect();

    let mut new_tets = Vec::with_capacity(moving.len());
    let mut new_max = Energy::Finite(0.0);
    let mut new_sum = 0.0;
    let mut seen = BTreeSet::new();

    for &t in &moving {
        let vs = mesh.tets[t].vs.map(|w| if w == u { v } else { w });

        let mut key = vs;
        key.sort_unstable();
        if existing.contains(&key) || !seen.insert(key) {
            return false;
        }

        if !candidate_orient(mesh, &vs, None).is_positive() {
            return false;
        }
        let q = candidate_quality(mesh, &vs, None);
        new_max = new_max.max(q.energy);
        new_sum += q.energy.as_f64();

        new_tets.push((vs, mesh.tets[t].tags, t));
    }

    if ctx.cfg.use_energy_max {
        if new_max > old_max {
            return false;
        }
    } else if !new_sum.is_finite() || new_sum >= old_sum {
        return false;
    }

    // tagged facets that move with u must stay inside the envelope
    for &t in &moving {
        for i in 0..4 {
            if !mesh.tets[t].tags[i].is_surface() {
                continue;
            }
            let facet = mesh.tets[t].facet(i);
            if !facet.contains(&u) {
                continue;
            }
            let tri = facet.map(|w| {
                if w == u {
                    mesh.verts[v].pos.approx()
                } else {
                    mesh.verts[w].pos.approx()
                }
            });
            if !ctx
                .env
                .triangle_inside(&tri, ctx.state.eps, ctx.state.sampling_dist)
            {
                return false;
            }
        }
    }

    for &t in &dying {
        mesh.remove_tet(t);
    }
    for &t in &moving {
        mesh.remove_tet(t);
    }
    for (vs, tags, _) in new_tets {
        mesh.add_tet(vs, tags);
    }

    let u_on_surface = mesh.verts[u].on_surface;
    mesh.verts[v].on_surface |= u_on_surface;
    mesh.remove_vertex(u);

    true
}
