//! Edge swaps (3-2, 4-4) and face swaps (2-3), strict-improvement only.

use super::{candidate_orient, candidate_quality, OptContext};
use crate::energy::Energy;
use crate::mesh::{FacetTag, TetMesh};
use crate::predicates::segment_crosses_triangle;
use crate::utils::types::VertexIdx;
use std::collections::BTreeSet;

/// Whether the segment `uv` passes through the triangle `abc`; the swapped
/// configurations only tile the old region when it does.
fn edge_pierces(mesh: &TetMesh, u: VertexIdx, v: VertexIdx, tri: [VertexIdx; 3]) -> bool {
    segment_crosses_triangle(
        &mesh.verts[u].pos.approx(),
        &mesh.verts[v].pos.approx(),
        &mesh.facet_positions(&tri),
    )
}

pub(crate) fn swap_pass(mesh: &mut TetMesh, ctx: &OptContext) -> usize {
    let mut accepted = 0;

    // edge swaps, worst stars first
    let mut edges: Vec<(f64, VertexIdx, VertexIdx)> = mesh
        .edges()
        .into_iter()
        .map(|(u, v)| {
            let e = super::max_energy(mesh, &mesh.edge_tets(u, v));
            (e.as_f64(), u, v)
        })
        .collect();
    edges.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    for (_, u, v) in edges {
        if mesh.verts[u].removed || mesh.verts[v].removed {
            continue;
        }
        let ring = mesh.edge_tets(u, v);
        let ok = match ring.len() {
            3 => try_swap_32(mesh, ctx, u, v, &ring),
            4 => try_swap_44(mesh, ctx, u, v, &ring),
            _ => false,
        };
        if ok {
            accepted += 1;
        }
    }

    // face swaps
    let tets: Vec<usize> = mesh.active_tets().collect();
    for t in tets {
        if mesh.tets[t].removed {
            continue;
        }
        for i in 0..4 {
            if try_swap_23(mesh, ctx, t, i) {
                accepted += 1;
                break;
            }
        }
    }

    accepted
}

/// The vertices of `tets` that are not `u` or `v`.
fn ring_verts(mesh: &TetMesh, tets: &[usize], u: VertexIdx, v: VertexIdx) -> Vec<VertexIdx> {
    let mut set = BTreeSet::new();
    for &t in tets {
        for w in mesh.tets[t].vs {
            if w != u && w != v {
                set.insert(w);
            }
        }
    }
    set.into_iter().collect()
}

/// Any facet of `tets` that contains the edge `uv` carries a tag; swapping
/// would destroy the tagged surface, so such configurations are rejected.
fn edge_facets_untagged(mesh: &TetMesh, tets: &[usize], u: VertexIdx, v: VertexIdx) -> bool {
    for &t in tets {
        for i in 0..4 {
            if mesh.tets[t].tags[i] == FacetTag::NotSurface {
                continue;
            }
            let f = mesh.tets[t].facet(i);
            if f.contains(&u) && f.contains(&v) {
                return false;
            }
        }
    }
    true
}

/// Tags of the surviving outer facets, keyed by sorted vertex triple.
fn outer_tags(mesh: &TetMesh, tets: &[usize]) -> std::collections::BTreeMap<[VertexIdx; 3], FacetTag> {
    let mut map = std::collections::BTreeMap::new();
    for &t in tets {
        for i in 0..4 {
            let tag = mesh.tets[t].tags[i];
            if tag != FacetTag::NotSurface {
                let mut key = mesh.tets[t].facet(i);
                key.sort_unstable();
                map.insert(key, tag);
            }
        }
    }
    map
}

/// Orient a candidate, fix its handedness, validate, and report its energy.
fn oriented(mesh: &TetMesh, vs: [VertexIdx; 4]) -> Option<([VertexIdx; 4], Energy)> {
    let fixed = match candidate_orient(mesh, &vs, None) {
        crate::predicates::Sign::Positive => vs,
        crate::predicates::Sign::Negative => [vs[0], vs[1], vs[3], vs[2]],
        crate::predicates::Sign::Zero => return None,
    };
    let q = candidate_quality(mesh, &fixed, None);
    if q.energy.is_inverted() {
        return None;
    }
    Some((fixed, q.energy))
}

fn commit(
    mesh: &mut TetMesh,
    old: &[usize],
    new: &[[VertexIdx; 4]],
    tags: &std::collections::BTreeMap<[VertexIdx; 3], FacetTag>,
) {
    for &t in old {
        mesh.remove_tet(t);
    }
    for vs in new {
        let tet_tags = std::array::from_fn(|i| {
            let mut key = [0; 3];
            let mut k = 0;
            for (j, &w) in vs.iter().enumerate() {
                if j != i {
                    key[k] = w;
                    k += 1;
                }
            }
            key.sort_unstable();
            tags.get(&key).copied().unwrap_or(FacetTag::NotSurface)
        });
        mesh.add_tet(*vs, tet_tags);
    }
}

/// Remove an edge with three incident tets, leaving two tets over the ring
/// triangle.
fn try_swap_32(
    mesh: &mut TetMesh,
    _ctx: &OptContext,
    u: VertexIdx,
    v: VertexIdx,
    ring: &[usize],
) -> bool {
    let rv = ring_verts(mesh, ring, u, v);
    if rv.len() != 3 {
        return false;
    }
    if !edge_facets_untagged(mesh, ring, u, v) {
        return false;
    }

    let [a, b, c] = [rv[0], rv[1], rv[2]];
    if !edge_pierces(mesh, u, v, [a, b, c]) {
        return false;
    }
    let old_max = super::max_energy(mesh, ring);

    let Some((t1, e1)) = oriented(mesh, [a, b, c, u]) else {
        return false;
    };
    let Some((t2, e2)) = oriented(mesh, [a, b, c, v]) else {
        return false;
    };
    if e1.max(e2) >= old_max {
        return false;
    }

    let tags = outer_tags(mesh, ring);
    commit(mesh, ring, &[t1, t2], &tags);
    true
}

/// Reconnect an edge with four incident tets across one of the two ring
/// diagonals.
fn try_swap_44(
    mesh: &mut TetMesh,
    _ctx: &OptContext,
    u: VertexIdx,
    v: VertexIdx,
    ring: &[usize],
) -> bool {
    let rv = ring_verts(mesh, ring, u, v);
    if rv.len() != 4 {
        return false;
    }
    if !edge_facets_untagged(mesh, ring, u, v) {
        return false;
    }

    // recover the cyclic order: two ring vertices are adjacent iff they share
    // one of the four tets
    let shares = |p: VertexIdx, q: VertexIdx| {
        ring.iter()
            .any(|&t| mesh.tets[t].contains(p) && mesh.tets[t].contains(q))
    };
    let a = rv[0];
    let others: Vec<VertexIdx> = rv[1..].to_vec();
    let Some(&b) = others.iter().find(|&&w| shares(a, w)) else {
        return false;
    };
    let Some(&c) = others.iter().find(|&&w| w != b && shares(b, w)) else {
        return false;
    };
    let Some(&d) = others.iter().find(|&&w| w != b && w != c) else {
        return false;
    };

    let old_max = super::max_energy(mesh, ring);
    let tags = outer_tags(mesh, ring);

    for (p, q, r, s) in [(a, b, c, d), (b, c, d, a)] {
        // diagonal (p, r) of the ring cycle p-q-r-s
        if !edge_pierces(mesh, u, v, [p, q, r]) && !edge_pierces(mesh, u, v, [p, r, s]) {
            continue;
        }
        let candidates = [
            [p, q, r, u],
            [p, r, s, u],
            [p, r, q, v],
            [p, s, r, v],
        ];
        let mut fixed = Vec::with_capacity(4);
        let mut new_max = Energy::Finite(0.0);
        let mut ok = true;
        for vs in candidates {
            match oriented(mesh, vs) {
                Some((f, e)) => {
                    new_max = new_max.max(e);
                    fixed.push(f);
                }
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok && new_max < old_max {
            commit(mesh, ring, &fixed, &tags);
            return true;
        }
    }
    false
}

/// Replace an untagged interior facet shared by two tets with the edge
/// joining their apices.
fn try_swap_23(mesh: &mut TetMesh, _ctx: &OptContext, t: usize, i: usize) -> bool {
    if mesh.tets[t].removed || mesh.tets[t].tags[i] != FacetTag::NotSurface {
        return false;
    }
    let facet = mesh.tets[t].facet(i);
    let [a, b, c] = facet;

    // the tet on the other side of the facet
    let other = mesh.verts[a]
        .tets
        .iter()
        .copied()
        .find(|&s| {
            s != t
                && !mesh.tets[s].removed
                && facet.iter().all(|&w| mesh.tets[s].contains(w))
        });
    let Some(s) = other else {
        return false;
    };
    // the facet must be untagged from both sides
    let js = (0..4)
        .find(|&j| !facet.contains(&mesh.tets[s].vs[j]))
        .unwrap();
    if mesh.tets[s].tags[js] != FacetTag::NotSurface {
        return false;
    }

    let u = mesh.tets[t].vs[i];
    let v = mesh.tets[s].vs[js];
    if u == v || !mesh.edge_tets(u, v).is_empty() {
        // already connected; a 2-3 swap would create a duplicate edge star
        return false;
    }
    if !edge_pierces(mesh, u, v, facet) {
        return false;
    }

    let old = [t, s];
    let old_max = super::max_energy(mesh, &old);

    let mut fixed = Vec::with_capacity(3);
    let mut new_max = Energy::Finite(0.0);
    for (p, q) in [(a, b), (b, c), (c, a)] {
        match oriented(mesh, [u, v, p, q]) {
            Some((f, e)) => {
                new_max = new_max.max(e);
                fixed.push(f);
            }
            None => return false,
        }
    }
    if new_max >= old_max {
        return false;
    }

    let tags = outer_tags(mesh, &old);
    commit(mesh, &old, &fixed, &tags);
    true
}
