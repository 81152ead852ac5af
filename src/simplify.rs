//! Preprocessing: envelope-constrained simplification of the input soup.
//!
//! Vertices are deduplicated, degenerate triangles dropped, then alternating
//! sweeps of edge collapses and edge swaps shrink the soup as long as every
//! changed triangle stays inside the envelope. The soup contracts
//! substantially on typical inputs without ever leaving the tolerance.

use crate::envelope::Envelope;
use crate::error::MeshError;
use crate::point::rat3;
use crate::predicates::{is_degenerate_triangle, triangle_normal};
use crate::utils::types::{Triangle3, Vertex3};
use nalgebra::Vector3;
use std::collections::{BTreeMap, BTreeSet};

const MAX_SWEEPS: usize = 10;

/// The simplified soup handed to the Delaunay stage, plus the topology facts
/// later stages need.
#[derive(Debug, Clone)]
pub struct SimplifiedSoup {
    pub vertices: Vec<Vertex3>,
    pub faces: Vec<[usize; 3]>,
    /// No edge is incident to exactly one triangle.
    pub is_closed: bool,
    /// Open rim segments, by position.
    pub boundary_edges: Vec<(Vertex3, Vertex3)>,
}

struct Soup {
    verts: Vec<Vertex3>,
    faces: Vec<[usize; 3]>,
    alive: Vec<bool>,
    v2f: Vec<BTreeSet<usize>>,
}

impl Soup {
    fn triangle(&self, f: usize) -> Triangle3 {
        let [a, b, c] = self.faces[f];
        [self.verts[a], self.verts[b], self.verts[c]]
    }

    fn live_edges(&self) -> Vec<(usize, usize)> {
        let mut set = BTreeSet::new();
        for (f, face) in self.faces.iter().enumerate() {
            if !self.alive[f] {
                continue;
            }
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                set.insert((a.min(b), a.max(b)));
            }
        }
        set.into_iter().collect()
    }
}

/// Run the preprocess stage at the current envelope tolerance.
pub fn preprocess(
    vertices: &[Vertex3],
    faces: &[[usize; 3]],
    env: &Envelope,
    eps: f64,
    sampling_dist: f64,
) -> Result<SimplifiedSoup, MeshError> {
    let mut soup = dedup(vertices, faces)?;

    let before = soup.alive.iter().filter(|a| **a).count();

    for sweep in 0..MAX_SWEEPS {
        let mut changed = collapse_sweep(&mut soup, env, eps, sampling_dist);
        changed |= swap_sweep(&mut soup, env, eps, sampling_dist);
        if !changed {
            log::debug!("preprocess converged after {sweep} sweeps");
            break;
        }
    }

    let after = soup.alive.iter().filter(|a| **a).count();
    log::debug!("preprocess: {before} -> {after} triangles");

    compact(soup)
}

/// Deduplicate vertices by exact coordinate, drop degenerate and duplicate
/// triangles.
fn dedup(vertices: &[Vertex3], faces: &[[usize; 3]]) -> Result<Soup, MeshError> {
    let mut key_to_idx: BTreeMap<[u64; 3], usize> = BTreeMap::new();
    let mut remap = Vec::with_capacity(vertices.len());
    let mut verts = Vec::new();

    for v in vertices {
        let key = [v[0].to_bits(), v[1].to_bits(), v[2].to_bits()];
        let idx = *key_to_idx.entry(key).or_insert_with(|| {
            verts.push(*v);
            verts.len() - 1
        });
        remap.push(idx);
    }

    let mut seen = BTreeSet::new();
    let mut out_faces = Vec::new();
    for f in faces {
        let mapped = [remap[f[0]], remap[f[1]], remap[f[2]]];
        if mapped[0] == mapped[1] || mapped[1] == mapped[2] || mapped[0] == mapped[2] {
            continue;
        }
        if is_degenerate_triangle(
            &rat3(&verts[mapped[0]]),
            &rat3(&verts[mapped[1]]),
            &rat3(&verts[mapped[2]]),
        ) {
            continue;
        }
        let mut key = mapped;
        key.sort_unstable();
        if seen.insert(key) {
            out_faces.push(mapped);
        }
    }

    if out_faces.is_empty() {
        return Err(MeshError::EmptyInput);
    }

    let mut v2f = vec![BTreeSet::new(); verts.len()];
    for (f, face) in out_faces.iter().enumerate() {
        for &v in face {
            v2f[v].insert(f);
        }
    }

    let alive = vec![true; out_faces.len()];
    Ok(Soup {
        verts,
        faces: out_faces,
        alive,
        v2f,
    })
}

fn collapse_sweep(soup: &mut Soup, env: &Envelope, eps: f64, sampling_dist: f64) -> bool {
    let mut edges: Vec<(f64, usize, usize)> = soup
        .live_edges()
        .iter()
        .map(|&(u, v)| {
            let d = Vector3::from(soup.verts[u]) - Vector3::from(soup.verts[v]);
            (d.norm_squared(), u, v)
        })
        .collect();
    edges.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut changed = false;
    for (_, u, v) in edges {
        // the edge may be gone by now
        if !soup.v2f[u].iter().any(|&f| soup.alive[f])
            || !soup.v2f[v].iter().any(|&f| soup.alive[f])
        {
            continue;
        }
        if try_collapse(soup, u, v, env, eps, sampling_dist)
            || try_collapse(soup, v, u, env, eps, sampling_dist)
        {
            changed = true;
        }
    }
    changed
}

/// Collapse `u` into `v` if the resulting star stays valid and enveloped.
fn try_collapse(
    soup: &mut Soup,
    u: usize,
    v: usize,
    env: &Envelope,
    eps: f64,
    sampling_dist: f64,
) -> bool {
    let dying: Vec<usize> = soup.v2f[u]
        .iter()
        .copied()
        .filter(|f| soup.alive[*f] && soup.faces[*f].contains(&v))
        .collect();
    if dying.is_empty() {
        return false; // not an edge of the live soup
    }

    let moving: Vec<usize> = soup.v2f[u]
        .iter()
        .copied()
        .filter(|f| soup.alive[*f] && !soup.faces[*f].contains(&v))
        .collect();

    let existing: BTreeSet<[usize; 3]> = soup.v2f[v]
        .iter()
        .filter(|f| soup.alive[**f])
        .map(|&f| {
            let mut key = soup.faces[f];
            key.sort_unstable();
            key
        })
        .collect();

    for &f in &moving {
        let old_tri = soup.triangle(f);
        let new_face = soup.faces[f].map(|w| if w == u { v } else { w });
        let new_tri = [
            soup.verts[new_face[0]],
            soup.verts[new_face[1]],
            soup.verts[new_face[2]],
        ];

        let mut key = new_face;
        key.sort_unstable();
        if existing.contains(&key) {
            return false;
        }
        if is_degenerate_triangle(&rat3(&new_tri[0]), &rat3(&new_tri[1]), &rat3(&new_tri[2])) {
            return false;
        }
        if triangle_normal(&old_tri).dot(&triangle_normal(&new_tri)) <= 0.0 {
            return false;
        }
        if !env.triangle_inside(&new_tri, eps, sampling_dist) {
            return false;
        }
    }

    for &f in &dying {
        soup.alive[f] = false;
        for w in soup.faces[f] {
            if w != u {
                soup.v2f[w].remove(&f);
            }
        }
    }
    for &f in &moving {
        for w in soup.faces[f].iter_mut() {
            if *w == u {
                *w = v;
            }
        }
        soup.v2f[v].insert(f);
    }
    soup.v2f[u].clear();

    true
}

fn swap_sweep(soup: &mut Soup, env: &Envelope, eps: f64, sampling_dist: f64) -> bool {
    let mut edge_faces: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    for (f, face) in soup.faces.iter().enumerate() {
        if !soup.alive[f] {
            continue;
        }
        for i in 0..3 {
            let (a, b) = (face[i], face[(i + 1) % 3]);
            edge_faces
                .entry((a.min(b), a.max(b)))
                .or_default()
                .push(f);
        }
    }

    let mut changed = false;
    for ((u, v), fs) in edge_faces {
        if fs.len() != 2 || !soup.alive[fs[0]] || !soup.alive[fs[1]] {
            continue;
        }
        if try_swap(soup, u, v, fs[0], fs[1], env, eps, sampling_dist) {
            changed = true;
        }
    }
    changed
}

/// Replace the diagonal `uv` of the quad spanned by two adjacent triangles if
/// the swap raises the minimum triangle angle without leaving the envelope.
fn try_swap(
    soup: &mut Soup,
    u: usize,
    v: usize,
    f1: usize,
    f2: usize,
    env: &Envelope,
    eps: f64,
    sampling_dist: f64,
) -> bool {
    // an earlier swap in this sweep may have rewritten either face
    for f in [f1, f2] {
        if !soup.faces[f].contains(&u) || !soup.faces[f].contains(&v) {
            return false;
        }
    }

    let a = match soup.faces[f1].iter().find(|w| **w != u && **w != v) {
        Some(&w) => w,
        None => return false,
    };
    let b = match soup.faces[f2].iter().find(|w| **w != u && **w != v) {
        Some(&w) => w,
        None => return false,
    };
    if a == b {
        return false;
    }

    // keep the orientation of f1: (u, v, a) -> (a, u, b) and (b, v, a)
    let (u, v) = if oriented_edge(&soup.faces[f1], u, v) {
        (u, v)
    } else {
        (v, u)
    };
    let new1 = [a, u, b];
    let new2 = [b, v, a];

    let old_tri1 = soup.triangle(f1);
    let old_tri2 = soup.triangle(f2);
    let new_tri1 = [soup.verts[a], soup.verts[u], soup.verts[b]];
    let new_tri2 = [soup.verts[b], soup.verts[v], soup.verts[a]];

    for tri in [&new_tri1, &new_tri2] {
        if is_degenerate_triangle(&rat3(&tri[0]), &rat3(&tri[1]), &rat3(&tri[2])) {
            return false;
        }
    }

    let old_normal = triangle_normal(&old_tri1) + triangle_normal(&old_tri2);
    if triangle_normal(&new_tri1).dot(&old_normal) <= 0.0
        || triangle_normal(&new_tri2).dot(&old_normal) <= 0.0
    {
        return false;
    }

    let old_min = min_angle(&old_tri1).min(min_angle(&old_tri2));
    let new_min = min_angle(&new_tri1).min(min_angle(&new_tri2));
    if new_min <= old_min {
        return false;
    }

    if !env.triangle_inside(&new_tri1, eps, sampling_dist)
        || !env.triangle_inside(&new_tri2, eps, sampling_dist)
    {
        return false;
    }

    for (f, old, new) in [(f1, soup.faces[f1], new1), (f2, soup.faces[f2], new2)] {
        for w in old {
            soup.v2f[w].remove(&f);
        }
        soup.faces[f] = new;
        for w in new {
            soup.v2f[w].insert(f);
        }
    }

    true
}

fn oriented_edge(face: &[usize; 3], u: usize, v: usize) -> bool {
    (0..3).any(|i| face[i] == u && face[(i + 1) % 3] == v)
}

fn min_angle(tri: &Triangle3) -> f64 {
    let a = Vector3::from(tri[0]);
    let b = Vector3::from(tri[1]);
    let c = Vector3::from(tri[2]);

    let mut min = f64::INFINITY;
    for (p, q, r) in [(a, b, c), (b, c, a), (c, a, b)] {
        let e1 = q - p;
        let e2 = r - p;
        let denom = e1.norm() * e2.norm();
        if denom == 0.0 {
            return 0.0;
        }
        min = min.min((e1.dot(&e2) / denom).clamp(-1.0, 1.0).acos());
    }
    min
}

fn compact(soup: Soup) -> Result<SimplifiedSoup, MeshError> {
    let mut vert_map = vec![usize::MAX; soup.verts.len()];
    let mut vertices = Vec::new();
    let mut faces = Vec::new();

    for (f, face) in soup.faces.iter().enumerate() {
        if !soup.alive[f] {
            continue;
        }
        let mut out = [0usize; 3];
        for (k, &v) in face.iter().enumerate() {
            if vert_map[v] == usize::MAX {
                vert_map[v] = vertices.len();
                vertices.push(soup.verts[v]);
            }
            out[k] = vert_map[v];
        }
        faces.push(out);
    }

    if faces.is_empty() {
        return Err(MeshError::EmptyInput);
    }

    let mut edge_count: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for face in &faces {
        for i in 0..3 {
            let (a, b) = (face[i], face[(i + 1) % 3]);
            *edge_count.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }

    let boundary_edges: Vec<(Vertex3, Vertex3)> = edge_count
        .iter()
        .filter(|(_, &n)| n == 1)
        .map(|(&(a, b), _)| (vertices[a], vertices[b]))
        .collect();
    let is_closed = boundary_edges.is_empty();

    Ok(SimplifiedSoup {
        vertices,
        faces,
        is_closed,
        boundary_edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{unit_cube_soup, unit_sphere_soup};

    fn run(vertices: &[Vertex3], faces: &[[usize; 3]], eps: f64) -> SimplifiedSoup {
        let env = Envelope::new(vertices, faces);
        preprocess(vertices, faces, &env, eps, eps / 2f64.sqrt()).unwrap()
    }

    #[test]
    fn cube_survives_with_tight_envelope() {
        let (v, f) = unit_cube_soup();
        let out = run(&v, &f, 1e-6);

        // nothing can collapse without leaving a micro envelope
        assert_eq!(out.vertices.len(), 8);
        assert_eq!(out.faces.len(), 12);
        assert!(out.is_closed);
        assert!(out.boundary_edges.is_empty());
    }

    #[test]
    fn duplicate_vertices_are_merged() {
        // same cube but every triangle brings its own vertex copies
        let (v, f) = unit_cube_soup();
        let mut soup_v = Vec::new();
        let mut soup_f = Vec::new();
        for tri in &f {
            let base = soup_v.len();
            soup_v.extend(tri.iter().map(|&i| v[i]));
            soup_f.push([base, base + 1, base + 2]);
        }

        let out = run(&soup_v, &soup_f, 1e-6);
        assert_eq!(out.vertices.len(), 8);
        assert_eq!(out.faces.len(), 12);
        assert!(out.is_closed);
    }

    #[test]
    fn sphere_contracts_under_loose_envelope() {
        let (v, f) = unit_sphere_soup(2);
        let before = f.len();
        let out = run(&v, &f, 0.1);

        assert!(out.faces.len() < before, "no contraction happened");
        assert!(out.is_closed);

        // every simplified triangle is still inside the envelope
        let env = Envelope::new(&v, &f);
        for face in &out.faces {
            let tri = [
                out.vertices[face[0]],
                out.vertices[face[1]],
                out.vertices[face[2]],
            ];
            assert!(env.triangle_inside(&tri, 0.1, 0.1 / 2f64.sqrt()));
        }
    }

    #[test]
    fn degenerate_triangles_are_dropped() {
        let v = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0], // collinear with the first two
            [0.0, 1.0, 0.0],
        ];
        let f = vec![[0, 1, 2], [0, 1, 3], [0, 1, 3], [1, 1, 3]];

        let env = Envelope::new(&v, &f);
        let out = preprocess(&v, &f, &env, 1e-6, 1e-6).unwrap();
        assert_eq!(out.faces.len(), 1);
        assert!(!out.is_closed);
        assert_eq!(out.boundary_edges.len(), 3);
    }

    #[test]
    fn fully_degenerate_soup_is_empty_input() {
        let v = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let f = vec![[0, 1, 2]];

        let env = Envelope::new(&v, &f);
        match preprocess(&v, &f, &env, 1e-6, 1e-6) {
            Err(MeshError::EmptyInput) => {}
            other => panic!("expected EmptyInput, got {other:?}"),
        }
    }
}
