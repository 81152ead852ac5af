//! The mutable tetrahedral mesh: arena-style vertex and tet arrays with
//! tombstoned removal, so indices stay stable across the whole refinement
//! stage. Compaction happens once, at pipeline exit.

use crate::energy::{Energy, Quality};
use crate::point::Point;
use crate::predicates::{orient3d_points, Sign};
use crate::utils::types::{Tetrahedron3, TetIdx, TriIdx, Vertex3, VertexIdx};
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Per-facet surface label. Facet `i` of a tet is the face opposite vertex
/// `vs[i]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FacetTag {
    NotSurface,
    /// The facet lies on the given input-surface triangle.
    Surface(TriIdx),
    /// The facet lies on the outer bounding box.
    Bbox,
}

impl FacetTag {
    pub const fn is_surface(&self) -> bool {
        matches!(self, FacetTag::Surface(_))
    }

    pub const fn is_constrained(&self) -> bool {
        !matches!(self, FacetTag::NotSurface)
    }
}

#[derive(Debug, Clone)]
pub struct TetVertex {
    pub pos: Point,
    /// Incident-tet set; kept sorted so sweeps are deterministic.
    pub tets: BTreeSet<TetIdx>,
    pub on_surface: bool,
    pub on_bbox: bool,
    /// On an open-hole rim of a non-closed input.
    pub on_boundary: bool,
    /// Local multiplier of the uniform target edge length.
    pub sizing_scale: f64,
    pub removed: bool,
}

impl TetVertex {
    pub fn new(pos: Point) -> Self {
        Self {
            pos,
            tets: BTreeSet::new(),
            on_surface: false,
            on_bbox: false,
            on_boundary: false,
            sizing_scale: 1.0,
            removed: false,
        }
    }

    /// Frozen vertices are never relocated.
    pub const fn is_frozen(&self, smooth_open_boundary: bool) -> bool {
        self.on_bbox || (self.on_boundary && !smooth_open_boundary)
    }
}

#[derive(Debug, Clone)]
pub struct Tet {
    pub vs: [VertexIdx; 4],
    /// `tags[i]` labels the facet opposite `vs[i]`.
    pub tags: [FacetTag; 4],
    pub quality: Quality,
    pub removed: bool,
}

impl Tet {
    pub fn facet(&self, i: usize) -> [VertexIdx; 3] {
        let [a, b, c, d] = self.vs;
        match i {
            0 => [b, c, d],
            1 => [a, c, d],
            2 => [a, b, d],
            _ => [a, b, c],
        }
    }

    pub fn contains(&self, v: VertexIdx) -> bool {
        self.vs.contains(&v)
    }

    /// Local index of vertex `v` within this tet.
    pub fn index_of(&self, v: VertexIdx) -> Option<usize> {
        self.vs.iter().position(|&u| u == v)
    }
}

#[derive(Debug, Default)]
pub struct TetMesh {
    pub verts: Vec<TetVertex>,
    pub tets: Vec<Tet>,
}

impl TetMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, pos: Point) -> VertexIdx {
        self.verts.push(TetVertex::new(pos));
        self.verts.len() - 1
    }

    /// Insert a tet and register it with its vertices. The caller provides a
    /// positively oriented vertex order.
    pub fn add_tet(&mut self, vs: [VertexIdx; 4], tags: [FacetTag; 4]) -> TetIdx {
        let idx = self.tets.len();
        let quality = Quality::of(&self.positions_of(&vs));
        self.tets.push(Tet {
            vs,
            tags,
            quality,
            removed: false,
        });
        for v in vs {
            self.verts[v].tets.insert(idx);
        }
        idx
    }

    pub fn remove_tet(&mut self, t: TetIdx) {
        if self.tets[t].removed {
            return;
        }
        self.tets[t].removed = true;
        for v in self.tets[t].vs {
            self.verts[v].tets.remove(&t);
        }
    }

    /// Tombstone a vertex that no longer has incident tets.
    pub fn remove_vertex(&mut self, v: VertexIdx) {
        debug_assert!(self.verts[v].tets.is_empty());
        self.verts[v].removed = true;
    }

    pub fn positions(&self, t: TetIdx) -> Tetrahedron3 {
        self.positions_of(&self.tets[t].vs)
    }

    pub fn positions_of(&self, vs: &[VertexIdx; 4]) -> Tetrahedron3 {
        [
            self.verts[vs[0]].pos.approx(),
            self.verts[vs[1]].pos.approx(),
            self.verts[vs[2]].pos.approx(),
            self.verts[vs[3]].pos.approx(),
        ]
    }

    pub fn facet_positions(&self, vs: &[VertexIdx; 3]) -> [Vertex3; 3] {
        [
            self.verts[vs[0]].pos.approx(),
            self.verts[vs[1]].pos.approx(),
            self.verts[vs[2]].pos.approx(),
        ]
    }

    /// Exact orientation of a candidate tet.
    pub fn orient_tet(&self, vs: &[VertexIdx; 4]) -> Sign {
        orient3d_points(
            &self.verts[vs[0]].pos,
            &self.verts[vs[1]].pos,
            &self.verts[vs[2]].pos,
            &self.verts[vs[3]].pos,
        )
    }

    pub fn refresh_quality(&mut self, t: TetIdx) {
        let q = Quality::of(&self.positions(t));
        self.tets[t].quality = q;
    }

    /// Recompute every active quality record in parallel.
    pub fn refresh_all_quality(&mut self) {
        let records: Vec<Option<Quality>> = self
            .tets
            .par_iter()
            .map(|tet| {
                if tet.removed {
                    None
                } else {
                    Some(Quality::of(&[
                        self.verts[tet.vs[0]].pos.approx(),
                        self.verts[tet.vs[1]].pos.approx(),
                        self.verts[tet.vs[2]].pos.approx(),
                        self.verts[tet.vs[3]].pos.approx(),
                    ]))
                }
            })
            .collect();

        for (tet, q) in self.tets.iter_mut().zip(records) {
            if let Some(q) = q {
                tet.quality = q;
            }
        }
    }

    pub fn active_tets(&self) -> impl Iterator<Item = TetIdx> + '_ {
        (0..self.tets.len()).filter(move |&t| !self.tets[t].removed)
    }

    pub fn num_active_tets(&self) -> usize {
        self.tets.iter().filter(|t| !t.removed).count()
    }

    pub fn num_active_verts(&self) -> usize {
        self.verts.iter().filter(|v| !v.removed).count()
    }

    /// Max and mean energy over active tets; the mean skips inverted elements
    /// (which are tracked through the max).
    pub fn energy_stats(&self) -> (Energy, f64) {
        let mut max_e = Energy::Finite(0.0);
        let mut sum = 0.0;
        let mut n = 0usize;
        for t in self.active_tets() {
            let e = self.tets[t].quality.energy;
            max_e = max_e.max(e);
            if let Energy::Finite(v) = e {
                sum += v;
                n += 1;
            }
        }
        (max_e, if n == 0 { 0.0 } else { sum / n as f64 })
    }

    /// Undirected edges of the active mesh.
    pub fn edges(&self) -> Vec<(VertexIdx, VertexIdx)> {
        let mut set = BTreeSet::new();
        for t in self.active_tets() {
            let vs = self.tets[t].vs;
            for i in 0..4 {
                for j in (i + 1)..4 {
                    let (a, b) = (vs[i].min(vs[j]), vs[i].max(vs[j]));
                    set.insert((a, b));
                }
            }
        }
        set.into_iter().collect()
    }

    /// Tets containing both endpoints of an edge.
    pub fn edge_tets(&self, u: VertexIdx, v: VertexIdx) -> Vec<TetIdx> {
        self.verts[u]
            .tets
            .iter()
            .copied()
            .filter(|&t| self.verts[v].tets.contains(&t))
            .collect()
    }

    /// One-ring vertex neighborhood.
    pub fn vertex_neighbors(&self, v: VertexIdx) -> BTreeSet<VertexIdx> {
        let mut out = BTreeSet::new();
        for &t in &self.verts[v].tets {
            for u in self.tets[t].vs {
                if u != v {
                    out.insert(u);
                }
            }
        }
        out
    }

    /// Whether some tagged facet contains both `u` and `v`.
    pub fn edge_on_surface(&self, u: VertexIdx, v: VertexIdx) -> bool {
        if !(self.verts[u].on_surface && self.verts[v].on_surface) {
            return false;
        }
        self.edge_tets(u, v).iter().any(|&t| {
            (0..4).any(|i| {
                self.tets[t].tags[i].is_surface() && {
                    let f = self.tets[t].facet(i);
                    f.contains(&u) && f.contains(&v)
                }
            })
        })
    }

    /// Round every unrounded vertex whose incident tets keep strictly positive
    /// orientation under the rounded coordinate. Returns the number of
    /// vertices that remain unrounded.
    pub fn round_vertices(&mut self) -> usize {
        let mut unrounded = 0;
        for v in 0..self.verts.len() {
            if self.verts[v].removed || self.verts[v].pos.is_rounded() {
                continue;
            }
            if self.can_round(v) {
                self.verts[v].pos.round();
                for &t in &self.verts[v].tets.clone() {
                    self.refresh_quality(t);
                }
            } else {
                unrounded += 1;
            }
        }
        unrounded
    }

    fn can_round(&self, v: VertexIdx) -> bool {
        let candidate = Point::rounded(self.verts[v].pos.approx());
        self.verts[v].tets.iter().all(|&t| {
            let vs = self.tets[t].vs;
            let pos: Vec<&Point> = vs
                .iter()
                .map(|&u| {
                    if u == v {
                        &candidate
                    } else {
                        &self.verts[u].pos
                    }
                })
                .collect();
            orient3d_points(pos[0], pos[1], pos[2], pos[3]).is_positive()
        })
    }

    /// Topological soundness: mutual vertex/tet incidence and distinct
    /// positions (the P3/P4 checks).
    pub fn is_sound(&self) -> bool {
        for (t, tet) in self.tets.iter().enumerate() {
            if tet.removed {
                continue;
            }
            for i in 0..4 {
                for j in (i + 1)..4 {
                    if tet.vs[i] == tet.vs[j] {
                        log::error!("tet {t} lists vertex {} twice", tet.vs[i]);
                        return false;
                    }
                    if self.verts[tet.vs[i]]
                        .pos
                        .same_position(&self.verts[tet.vs[j]].pos)
                    {
                        log::error!("tet {t} has coincident vertices");
                        return false;
                    }
                }
            }
            for v in tet.vs {
                if !self.verts[v].tets.contains(&t) {
                    log::error!("vertex {v} misses incidence of tet {t}");
                    return false;
                }
            }
        }
        for (v, vert) in self.verts.iter().enumerate() {
            for &t in &vert.tets {
                if self.tets[t].removed || !self.tets[t].contains(v) {
                    log::error!("vertex {v} lists stale tet {t}");
                    return false;
                }
            }
        }
        true
    }

    /// Drop tombstones and remap to dense, zero-based indices.
    pub fn compact(&self) -> (Vec<Vertex3>, Vec<[usize; 4]>, Vec<f64>) {
        let mut vert_map = vec![usize::MAX; self.verts.len()];
        let mut vertices = Vec::new();
        let mut tets = Vec::new();
        let mut min_d_angles = Vec::new();

        for t in self.active_tets() {
            let tet = &self.tets[t];
            let mut out = [0usize; 4];
            for (k, &v) in tet.vs.iter().enumerate() {
                if vert_map[v] == usize::MAX {
                    vert_map[v] = vertices.len();
                    vertices.push(self.verts[v].pos.approx());
                }
                out[k] = vert_map[v];
            }
            tets.push(out);
            min_d_angles.push(tet.quality.min_d_angle);
        }

        (vertices, tets, min_d_angles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::rat;

    fn single_tet() -> TetMesh {
        let mut mesh = TetMesh::new();
        let a = mesh.add_vertex(Point::rounded([0.0, 0.0, 0.0]));
        let b = mesh.add_vertex(Point::rounded([1.0, 0.0, 0.0]));
        let c = mesh.add_vertex(Point::rounded([0.0, 1.0, 0.0]));
        let d = mesh.add_vertex(Point::rounded([0.0, 0.0, 1.0]));
        mesh.add_tet([a, b, c, d], [FacetTag::NotSurface; 4]);
        mesh
    }

    #[test]
    fn incidence_is_mutual() {
        let mesh = single_tet();
        assert!(mesh.is_sound());
        for v in 0..4 {
            assert!(mesh.verts[v].tets.contains(&0));
        }
    }

    #[test]
    fn removal_tombstones_and_compaction_remaps() {
        let mut mesh = single_tet();
        let e = mesh.add_vertex(Point::rounded([1.0, 1.0, 1.0]));
        mesh.add_tet([1, 2, 3, e], [FacetTag::NotSurface; 4]);

        mesh.remove_tet(0);
        assert!(mesh.is_sound());
        assert_eq!(mesh.num_active_tets(), 1);
        // tombstoned, not compacted
        assert_eq!(mesh.tets.len(), 2);

        let (vo, to, ao) = mesh.compact();
        assert_eq!(vo.len(), 4);
        assert_eq!(to.len(), 1);
        assert_eq!(ao.len(), 1);
        assert!(to[0].iter().all(|&v| v < vo.len()));
    }

    #[test]
    fn rounding_keeps_orientation() {
        let mut mesh = single_tet();
        // a rational point close to the centroid rounds fine
        let p = Point::exact([
            rat(0.25) + rat(1.0) / rat(3.0) * rat(1e-18),
            rat(0.25),
            rat(0.25),
        ]);
        assert!(!p.is_rounded());
        let m = mesh.add_vertex(p);
        mesh.add_tet([0, 1, 2, m], [FacetTag::NotSurface; 4]);

        let unrounded = mesh.round_vertices();
        assert_eq!(unrounded, 0);
        assert!(mesh.verts[m].pos.is_rounded());
        assert!(mesh.is_sound());
    }

    #[test]
    fn edge_queries() {
        let mesh = single_tet();
        assert_eq!(mesh.edges().len(), 6);
        assert_eq!(mesh.edge_tets(0, 1), vec![0]);
        assert_eq!(mesh.vertex_neighbors(0).len(), 3);
    }
}
