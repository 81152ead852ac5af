//! The mesh refinement engine: passes of {split, collapse, swap, smooth}
//! driven by the AMIPS energy, with envelope tests on every candidate
//! configuration and an adaptive target-length field that shrinks where the
//! energy refuses to come down.

mod collapse;
mod smooth;
mod split;
mod swap;

use crate::config::{Config, SizingMesh};
use crate::energy::{Energy, Quality};
use crate::envelope::Envelope;
use crate::error::MeshWarning;
use crate::mesh::TetMesh;
use crate::point::Point;
use crate::predicates::orient3d_points;
use crate::state::RefineState;
use crate::utils::types::{Vertex3, VertexIdx};
use nalgebra::Vector3;

/// The tagged local operations of a pass, in execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocalOp {
    Split,
    Collapse,
    Swap,
    Smooth,
}

pub(crate) struct OptContext<'a> {
    pub env: &'a Envelope,
    pub state: &'a RefineState,
    pub cfg: &'a Config,
}

const MIN_SIZING_SCALE: f64 = 0.01;

/// Run refinement passes until convergence, a stall at full envelope width,
/// cancellation, or pass-budget exhaustion.
pub fn optimize(
    mesh: &mut TetMesh,
    env: &Envelope,
    state: &mut RefineState,
    cfg: &Config,
) -> Option<MeshWarning> {
    mesh.refresh_all_quality();

    let (mut prev_max, mut prev_avg) = mesh.energy_stats();
    log::debug!(
        "optimize: start max {:.3} avg {prev_avg:.3}",
        prev_max.as_f64()
    );

    for pass in 1..=cfg.max_num_passes {
        // a mesh that already meets the energy bar is left untouched
        if prev_max < Energy::Finite(cfg.filter_energy_thres) {
            log::debug!("optimize: converged before pass {pass}");
            return None;
        }
        if cfg.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            log::debug!("optimize: cancelled before pass {pass}");
            return None;
        }

        let ctx = OptContext {
            env,
            state,
            cfg,
        };

        let nv = mesh.num_active_verts();
        let (skip_split, skip_collapse) = match cfg.target_num_vertices {
            Some(target) => (
                nv as f64 > target as f64 * 1.05,
                (nv as f64) < target as f64 * 0.95,
            ),
            None => (false, false),
        };

        let mut counts = [0usize; 4];
        if !skip_split {
            counts[0] = split::split_pass(mesh, &ctx);
        }
        if !skip_collapse {
            counts[1] = collapse::collapse_pass(mesh, &ctx);
        }
        counts[2] = swap::swap_pass(mesh, &ctx);
        counts[3] = smooth::smooth_pass(mesh, &ctx);

        let (max_e, avg_e) = mesh.energy_stats();
        log::debug!(
            "pass {pass}: split {} collapse {} swap {} smooth {} | max {:.3} avg {avg_e:.3} eps {:.2e}",
            counts[0],
            counts[1],
            counts[2],
            counts[3],
            max_e.as_f64(),
            state.eps
        );

        let d_max = (max_e.as_f64() - prev_max.as_f64()).abs();
        let d_avg = (avg_e - prev_avg).abs();
        if d_max < cfg.delta_energy_thres && d_avg < cfg.delta_energy_thres {
            let target_len = state.target_edge_len;
            shrink_sizing_field(mesh, cfg, target_len);
            state.advance_sub_stage();
        }

        prev_max = max_e;
        prev_avg = avg_e;
    }

    let (max_e, _) = mesh.energy_stats();
    if max_e < Energy::Finite(cfg.filter_energy_thres) {
        None
    } else {
        log::warn!(
            "optimize: pass budget exhausted at max energy {:.3}",
            max_e.as_f64()
        );
        Some(MeshWarning::PassLimitExceeded)
    }
}

/// Shrink the target-length field at vertices whose stars hold over-energy
/// tets, capped from below and by the background sizing mesh if present.
fn shrink_sizing_field(mesh: &mut TetMesh, cfg: &Config, target_len: f64) {
    let mut shrunk = 0usize;
    for v in 0..mesh.verts.len() {
        if mesh.verts[v].removed {
            continue;
        }
        let over = mesh.verts[v].tets.iter().any(|&t| {
            mesh.tets[t].quality.energy > Energy::Finite(cfg.filter_energy_thres)
        });
        if !over {
            continue;
        }

        let mut scale = mesh.verts[v].sizing_scale * cfg.adaptive_scalar;
        if let Some(bg) = &cfg.background_mesh {
            if let Some(size) = sample_sizing(bg, &mesh.verts[v].pos.approx()) {
                scale = scale.min(size / target_len);
            }
        }
        mesh.verts[v].sizing_scale = scale.max(MIN_SIZING_SCALE);
        shrunk += 1;
    }
    log::debug!("adaptive sizing: shrunk {shrunk} vertices");
}

/// Barycentric sample of the background sizing field at `p`; `None` outside
/// the background mesh.
fn sample_sizing(bg: &SizingMesh, p: &Vertex3) -> Option<f64> {
    for tet in &bg.tets {
        let corners = [
            bg.vertices[tet[0]],
            bg.vertices[tet[1]],
            bg.vertices[tet[2]],
            bg.vertices[tet[3]],
        ];
        if !crate::predicates::point_in_tet(p, &corners) {
            continue;
        }

        let a = Vector3::from(corners[0]);
        let m = nalgebra::Matrix3::from_columns(&[
            Vector3::from(corners[1]) - a,
            Vector3::from(corners[2]) - a,
            Vector3::from(corners[3]) - a,
        ]);
        let Some(inv) = m.try_inverse() else { continue };
        let bary = inv * (Vector3::from(*p) - a);
        let (u, v, w) = (bary.x, bary.y, bary.z);
        let t = 1.0 - u - v - w;
        return Some(
            t * bg.sizes[tet[0]]
                + u * bg.sizes[tet[1]]
                + v * bg.sizes[tet[2]]
                + w * bg.sizes[tet[3]],
        );
    }
    None
}

/// Per-edge target length: the uniform target scaled by the endpoint field.
pub(crate) fn edge_target_len(mesh: &TetMesh, state: &RefineState, u: VertexIdx, v: VertexIdx) -> f64 {
    state.target_edge_len * (mesh.verts[u].sizing_scale + mesh.verts[v].sizing_scale) / 2.0
}

pub(crate) fn edge_len_sq(mesh: &TetMesh, u: VertexIdx, v: VertexIdx) -> f64 {
    let a = Vector3::from(mesh.verts[u].pos.approx());
    let b = Vector3::from(mesh.verts[v].pos.approx());
    (a - b).norm_squared()
}

/// Orientation of a candidate tet with one vertex position overridden.
pub(crate) fn candidate_orient(
    mesh: &TetMesh,
    vs: &[VertexIdx; 4],
    moved: Option<(VertexIdx, &Point)>,
) -> crate::predicates::Sign {
    let pick = |v: VertexIdx| -> &Point {
        match moved {
            Some((m, p)) if m == v => p,
            _ => &mesh.verts[v].pos,
        }
    };
    orient3d_points(pick(vs[0]), pick(vs[1]), pick(vs[2]), pick(vs[3]))
}

/// Quality of a candidate tet with one vertex position overridden.
pub(crate) fn candidate_quality(
    mesh: &TetMesh,
    vs: &[VertexIdx; 4],
    moved: Option<(VertexIdx, &Point)>,
) -> Quality {
    let pick = |v: VertexIdx| -> Vertex3 {
        match moved {
            Some((m, p)) if m == v => p.approx(),
            _ => mesh.verts[v].pos.approx(),
        }
    };
    Quality::of(&[pick(vs[0]), pick(vs[1]), pick(vs[2]), pick(vs[3])])
}

/// Max energy over a set of existing tets, from their quality records.
pub(crate) fn max_energy(mesh: &TetMesh, tets: &[usize]) -> Energy {
    tets.iter()
        .map(|&t| mesh.tets[t].quality.energy)
        .fold(Energy::Finite(0.0), Energy::max)
}

pub(crate) fn sum_energy(mesh: &TetMesh, tets: &[usize]) -> f64 {
    tets.iter()
        .map(|&t| mesh.tets[t].quality.energy.as_f64())
        .sum()
}
