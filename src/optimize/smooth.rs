//! Vertex smoothing: line search toward the one-ring centroid.

use super::{candidate_orient, candidate_quality, OptContext};
use crate::energy::Energy;
use crate::mesh::TetMesh;
use crate::point::Point;
use crate::predicates::triangle_normal;
use crate::utils::types::{Vertex3, VertexIdx};
use nalgebra::Vector3;

const LINE_SEARCH_STEPS: [f64; 4] = [1.0, 0.5, 0.25, 0.125];

pub(crate) fn smooth_pass(mesh: &mut TetMesh, ctx: &OptContext) -> usize {
    let mut accepted = 0;
    for v in 0..mesh.verts.len() {
        if mesh.verts[v].removed
            || mesh.verts[v].tets.is_empty()
            || mesh.verts[v].is_frozen(ctx.cfg.smooth_open_boundary)
        {
            continue;
        }
        if try_smooth(mesh, ctx, v) {
            accepted += 1;
        }
    }
    accepted
}

fn try_smooth(mesh: &mut TetMesh, ctx: &OptContext, v: VertexIdx) -> bool {
    let pos = Vector3::from(mesh.verts[v].pos.approx());

    let neighbors = mesh.vertex_neighbors(v);
    if neighbors.is_empty() {
        return false;
    }
    let mut centroid = Vector3::zeros();
    for &u in &neighbors {
        centroid += Vector3::from(mesh.verts[u].pos.approx());
    }
    centroid /= neighbors.len() as f64;

    let dir = centroid - pos;
    if dir.norm_squared() == 0.0 {
        return false;
    }

    let incident: Vec<usize> = mesh.verts[v].tets.iter().copied().collect();
    let old_max = super::max_energy(mesh, &incident);

    for step in LINE_SEARCH_STEPS {
        let mut target: Vertex3 = (pos + dir * step).into();
        if mesh.verts[v].on_surface {
            target = if ctx.cfg.use_onering_projection {
                project_onto_onering_plane(mesh, v, &target)
            } else {
                ctx.env.project(&target)
            };
        }
        let candidate = Point::rounded(target);

        if accept_position(mesh, ctx, v, &candidate, old_max) {
            mesh.verts[v].pos = candidate;
            for &t in &incident {
                mesh.refresh_quality(t);
            }
            return true;
        }
    }

    false
}

fn accept_position(
    mesh: &TetMesh,
    ctx: &OptContext,
    v: VertexIdx,
    candidate: &Point,
    old_max: Energy,
) -> bool {
    let mut new_max = Energy::Finite(0.0);
    for &t in &mesh.verts[v].tets {
        let vs = mesh.tets[t].vs;
        if !candidate_orient(mesh, &vs, Some((v, candidate))).is_positive() {
            return false;
        }
        new_max = new_max.max(candidate_quality(mesh, &vs, Some((v, candidate))).energy);
    }
    if new_max >= old_max {
        return false;
    }

    // envelope on every tagged facet touching v
    if mesh.verts[v].on_surface {
        for &t in &mesh.verts[v].tets {
            for i in 0..4 {
                if !mesh.tets[t].tags[i].is_surface() {
                    continue;
                }
                let facet = mesh.tets[t].facet(i);
                if !facet.contains(&v) {
                    continue;
                }
                let tri = facet.map(|w| {
                    if w == v {
                        candidate.approx()
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
    }

    true
}

/// Project onto the least-squares plane of the surface star: through the
/// centroid of the surface neighbors, normal to the average facet normal.
fn project_onto_onering_plane(mesh: &TetMesh, v: VertexIdx, target: &Vertex3) -> Vertex3 {
    let mut normal = Vector3::zeros();
    let mut centroid = Vector3::zeros();
    let mut count = 0usize;

    for &t in &mesh.verts[v].tets {
        for i in 0..4 {
            if !mesh.tets[t].tags[i].is_surface() {
                continue;
            }
            let facet = mesh.tets[t].facet(i);
            if !facet.contains(&v) {
                continue;
            }
            let tri = mesh.facet_positions(&facet);
            let mut n = triangle_normal(&tri);
            if n.norm_squared() > 0.0 {
                n.normalize_mut();
                if normal.dot(&n) < 0.0 {
                    n = -n;
                }
                normal += n;
            }
            for p in tri {
                centroid += Vector3::from(p);
                count += 1;
            }
        }
    }

    if count == 0 || normal.norm_squared() == 0.0 {
        return *target;
    }
    centroid /= count as f64;
    normal.normalize_mut();

    let t = Vector3::from(*target);
    (t - normal * (t - centroid).dot(&normal)).into()
}
