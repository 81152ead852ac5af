//! Incremental 3D Delaunay tetrahedralization of the simplified vertex set.
//!
//! Vertices are inserted in Hilbert-curve order with a visibility-walk point
//! location and Bowyer-Watson cavity retriangulation. The convex hull is
//! closed off by conceptual tets through a vertex at infinity.

use core::cmp;

use crate::{
    envelope::Envelope,
    filter::winding_number,
    predicates::Aabb,
    tetds::{FacetId, TetDataStructure, TetId},
    utils::{
        point_order::sort_along_hilbert_curve_3d,
        types::{Triangle3, Tetrahedron3, Vertex3, VertexIdx},
    },
    VertexNode,
};
use anyhow::Result as HowResult;
use geogram_predicates as gp;
use rayon::prelude::*;

/// Extended tetrahedron, including the point at infinity
pub enum ExtendedTetrahedron {
    /// Regular tetrahedron
    Tetrahedron(Tetrahedron3),
    /// Tetrahedron with a point at infinity
    Triangle(Triangle3),
}

/// An unweighted 3D Delaunay tetrahedralization.
///
/// ```
/// use greta::delaunay::Tetrahedralization;
///
/// let vertices = vec![
///     [0.0, 0.0, -2.0],
///     [-0.5, 1.0, 0.5],
///     [0.0, 2.5, 2.5],
///     [2.0, 3.0, 5.0],
///     [4.0, 2.5, 9.5],
///     [1.0, 1.5, 6.5],
///     [4.5, 0.5, 5.0],
///     [2.5, -0.5, 2.0],
/// ];
///
/// let mut delaunay = Tetrahedralization::new();
/// delaunay.insert_vertices(&vertices, true).unwrap();
/// assert_eq!(delaunay.par_is_regular(), 1.0);
/// ```
#[derive(Debug, Default)]
pub struct Tetrahedralization {
    tds: TetDataStructure,
    vertices: Vec<Vertex3>,
}

impl Tetrahedralization {
    pub const fn new() -> Self {
        Self {
            tds: TetDataStructure::new(),
            vertices: Vec::new(),
        }
    }

    pub fn with_vert_capacity(capacity: usize) -> Self {
        Self {
            tds: TetDataStructure::new(),
            vertices: Vec::with_capacity(capacity),
        }
    }

    pub const fn num_tets(&self) -> usize {
        self.tds.num_tets()
    }

    pub const fn vertices(&self) -> &Vec<Vertex3> {
        &self.vertices
    }

    /// The casual tets as vertex index quadruples.
    ///
    /// Does not include conceptual tets, i.e. the convex hull faces connected
    /// to the point at infinity.
    pub fn casual_tets(&self) -> Vec<[VertexIdx; 4]> {
        self.tds
            .tets()
            .filter(|&t| !self.tds.is_conceptual(t))
            .map(|t| self.tds.nodes_of(t).map(|n| n.idx().unwrap()))
            .collect()
    }

    /// Gets extended tetrahedron from index
    fn get_tet_as_extended(&self, t: TetId) -> HowResult<ExtendedTetrahedron> {
        let ext_tet = match self.tds.try_nodes_of(t)? {
            [VertexNode::Conceptual, VertexNode::Casual(v1), VertexNode::Casual(v2), VertexNode::Casual(v3)] => {
                ExtendedTetrahedron::Triangle([
                    self.vertices[v1],
                    self.vertices[v3],
                    self.vertices[v2],
                ])
            }
            [VertexNode::Casual(v0), VertexNode::Conceptual, VertexNode::Casual(v2), VertexNode::Casual(v3)] => {
                ExtendedTetrahedron::Triangle([
                    self.vertices[v0],
                    self.vertices[v2],
                    self.vertices[v3],
                ])
            }
            [VertexNode::Casual(v0), VertexNode::Casual(v1), VertexNode::Conceptual, VertexNode::Casual(v3)] => {
                ExtendedTetrahedron::Triangle([
                    self.vertices[v0],
                    self.vertices[v3],
                    self.vertices[v1],
                ])
            }
            [VertexNode::Casual(v0), VertexNode::Casual(v1), VertexNode::Casual(v2), VertexNode::Conceptual] => {
                ExtendedTetrahedron::Triangle([
                    self.vertices[v0],
                    self.vertices[v1],
                    self.vertices[v2],
                ])
            }
            [VertexNode::Casual(v0), VertexNode::Casual(v1), VertexNode::Casual(v2), VertexNode::Casual(v3)] => {
                ExtendedTetrahedron::Tetrahedron([
                    self.vertices[v0],
                    self.vertices[v1],
                    self.vertices[v2],
                    self.vertices[v3],
                ])
            }
            _ => {
                return Err(anyhow::Error::msg("Case should not happen"));
            }
        };

        Ok(ext_tet)
    }

    fn is_v_in_sphere(&self, v_idx: usize, t: TetId, strict: bool) -> HowResult<bool> {
        let p = self.vertices[v_idx];

        // geogram's in-sphere is inverted relative to its orientation convention
        let in_sphere = match self.get_tet_as_extended(t)? {
            ExtendedTetrahedron::Tetrahedron([a, b, c, d]) => {
                -gp::in_sphere_3d_SOS(&a, &b, &c, &d, &p)
            }
            ExtendedTetrahedron::Triangle([a, b, c]) => -gp::orient_3d(&a, &b, &c, &p),
        };

        if strict {
            Ok(in_sphere > 0)
        } else {
            Ok(in_sphere >= 0)
        }
    }

    fn is_tet_flat(&self, t: TetId) -> HowResult<bool> {
        let is_flat = match self.get_tet_as_extended(t)? {
            ExtendedTetrahedron::Tetrahedron([a, b, c, d]) => gp::orient_3d(&a, &b, &c, &d) == 0,
            ExtendedTetrahedron::Triangle(_) => false,
        };

        Ok(is_flat)
    }

    /// Among `facets`, one whose supporting plane separates `v` from its tet.
    fn choose_facet(&self, facets: &[FacetId], v: &Vertex3) -> Option<FacetId> {
        for &f in facets {
            if let [VertexNode::Casual(i0), VertexNode::Casual(i1), VertexNode::Casual(i2)] =
                self.tds.facet_nodes(f)
            {
                let orientation = -gp::orient_3d(
                    &self.vertices[i0],
                    &self.vertices[i1],
                    &self.vertices[i2],
                    v,
                );

                if self.tds.is_conceptual(f.tet()) {
                    if orientation <= 0 {
                        return Some(f);
                    }
                } else if orientation < 0 {
                    return Some(f);
                }
            }
        }

        None
    }

    fn walk_check_all(&self, v_idx: usize) -> HowResult<TetId> {
        for t in self.tds.tets() {
            if self.is_tet_flat(t)? {
                continue;
            }

            if self.is_v_in_sphere(v_idx, t, false)? {
                return Ok(t);
            }
        }

        Err(anyhow::Error::msg("Could not find sphere containing point"))
    }

    fn locate_vis_walk(&self, v_idx: usize, start: TetId) -> HowResult<TetId> {
        let v = self.vertices[v_idx];

        let mut curr = start;
        let mut facets = curr.facets().to_vec();

        let mut side = 0;
        let mut num_visited = 0;
        let tets_visitable = self.tds.num_tets() >> 2;

        loop {
            if num_visited > tets_visitable {
                break Err(anyhow::Error::msg("Could not find sphere containing point"));
            }

            if let Some(f) = self.choose_facet(&facets, &v) {
                num_visited += 1;

                let entry = self.tds.twin(f);
                curr = entry.tet();

                // continue through the three other facets of the tet just
                // entered, rotating the scan start to avoid cycling
                facets.clear();
                facets.push(entry.hedge(side % 3).mate().facet);
                facets.push(entry.hedge((1 + side) % 3).mate().facet);
                facets.push(entry.hedge((2 + side) % 3).mate().facet);

                side = (side + 1) % 3;
            } else if self.is_v_in_sphere(v_idx, curr, false)? {
                break Ok(curr);
            } else {
                break Err(anyhow::Error::msg("Could not find sphere containing point"));
            }
        }
    }

    /// Inserts a located vertex by carving and refilling its cavity
    fn insert_bw(&mut self, v_idx: usize, first: TetId) -> HowResult<Vec<TetId>> {
        self.tds.cavity_start(first)?;

        while let Some(t) = self.tds.next_unclassified() {
            if self.is_v_in_sphere(v_idx, t, false)? {
                self.tds.carve(t);
            } else {
                self.tds.fence(t);
            }
        }

        self.tds.refill(VertexNode::Casual(v_idx))
    }

    fn insert_vertex_helper(&mut self, v_idx: usize, near_to: TetId) -> HowResult<TetId> {
        let containing = match self.locate_vis_walk(v_idx, near_to) {
            Ok(t) => t,
            Err(_) => {
                self.tds.reclaim();
                self.walk_check_all(v_idx)?
            }
        };

        let new_tets = self.insert_bw(v_idx, containing)?;

        Ok(new_tets[0])
    }

    fn insert_first_tet(&mut self, idxs_to_insert: &mut Vec<usize>) -> HowResult<()> {
        // pick two seed vertices, a third maximizing the spanned area, and a
        // fourth that is not coplanar with them
        if self.vertices.len() == idxs_to_insert.len() {
            let idx0 = idxs_to_insert.pop().unwrap();
            let idx1 = idxs_to_insert.pop().unwrap();

            let v0 = self.vertices[idx0];
            let v1 = self.vertices[idx1];

            let mut aligned = Vec::new();
            let v01 = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];

            // the third seed maximizes the triangle area with the first two,
            // so collinear runs (grids) can never produce a degenerate seed
            let i2 = idxs_to_insert
                .iter()
                .rev()
                .enumerate()
                .map(|(e, &idx)| (e, self.vertices[idx]))
                .map(|(e, v)| (e, [v[0] - v0[0], v[1] - v0[1], v[2] - v0[2]]))
                .map(|(e, vec)| {
                    let cross = [
                        vec[1] * v01[2] - vec[2] * v01[1],
                        vec[2] * v01[0] - vec[0] * v01[2],
                        vec[0] * v01[1] - vec[1] * v01[0],
                    ];
                    (
                        e,
                        cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2],
                    )
                })
                .max_by(|(_, val1), (_, val2)| val1.partial_cmp(val2).unwrap())
                .map(|(e, _)| e)
                .unwrap();

            let idx2 = idxs_to_insert.remove(idxs_to_insert.len() - 1 - i2);
            let v2 = self.vertices[idx2];

            loop {
                if let Some(idx3) = idxs_to_insert.pop() {
                    let v3 = self.vertices[idx3];

                    let orientation = -gp::orient_3d(&v0, &v1, &v2, &v3);

                    match orientation.cmp(&0) {
                        cmp::Ordering::Greater => {
                            self.tds.seed([idx0, idx1, idx2, idx3])?
                        }
                        cmp::Ordering::Less => {
                            self.tds.seed([idx0, idx2, idx1, idx3])?
                        }
                        cmp::Ordering::Equal => {
                            aligned.push(idx3);
                            continue;
                        }
                    };
                } else {
                    return Err(anyhow::Error::msg("Could not find four non aligned points"));
                }

                break;
            }
            idxs_to_insert.append(&mut aligned);
        }

        Ok(())
    }

    /// Builds the tetrahedralization over the given vertices.
    ///
    /// ## Errors
    /// Returns an error for fewer than four vertices or an all-coplanar set.
    pub fn insert_vertices(
        &mut self,
        vertices: &[Vertex3],
        spatial_sorting: bool,
    ) -> HowResult<()> {
        let mut idxs_to_insert = Vec::with_capacity(vertices.len());

        for &v in vertices {
            idxs_to_insert.push(self.vertices.len());
            self.vertices.push(v);
        }

        if self.vertices.len() < 4 {
            return Err(anyhow::Error::msg(
                "Needs at least 4 vertices to compute Delaunay",
            ));
        }

        if spatial_sorting {
            idxs_to_insert = sort_along_hilbert_curve_3d(&self.vertices, &idxs_to_insert);
        }

        if self.tds.num_tets() == 0 {
            self.insert_first_tet(&mut idxs_to_insert)?;
        }

        let mut last_added = TetId(self.tds.num_tets() - 1);
        while let Some(v_idx) = idxs_to_insert.pop() {
            last_added = self.insert_vertex_helper(v_idx, last_added)?;
        }

        self.tds.reclaim();

        log::trace!(
            "Delaunay: {} vertices, {} tets",
            self.vertices.len(),
            self.tds.num_tets()
        );

        Ok(())
    }

    /// Check that no vertex lies inside the circumsphere of any tet.
    pub fn is_regular(&self) -> HowResult<(bool, f64)> {
        let mut regular = true;
        let mut num_violated_tets = 0;

        for t in self.tds.tets() {
            if self.is_tet_flat(t)? {
                log::error!("Flat tetrahedron: {:?}", self.tds.try_nodes_of(t)?);
                regular = false;
                num_violated_tets += 1;
                continue;
            }

            for v_idx in 0..self.vertices.len() {
                // skip vertices of the tet itself; the SOS predicates avoid
                // returning 0, so a vertex exactly on the sphere may be
                // considered inside
                if self
                    .tds
                    .try_nodes_of(t)?
                    .contains(&VertexNode::Casual(v_idx))
                {
                    continue;
                }

                if self.is_v_in_sphere(v_idx, t, false)? {
                    log::error!("Non Delaunay tetrahedron: {:?}", self.tds.try_nodes_of(t)?);
                    regular = false;
                    num_violated_tets += 1;
                    break;
                }
            }
        }

        Ok((
            regular,
            1.0 - num_violated_tets as f64 / self.tds.num_tets() as f64,
        ))
    }

    /// Checks regularity in parallel using [`rayon`].
    ///
    /// This can significantly reduce the runtime of this predicate.
    #[must_use]
    pub fn par_is_regular(&self) -> f64 {
        let num_tets = self.tds.num_tets();

        let num_violated_tets: f64 = (0..num_tets)
            .into_par_iter()
            .map(|i| {
                let t = TetId(i);
                if self.is_tet_flat(t).unwrap() {
                    return 1.0;
                }

                let violation = (0..self.vertices.len()).find(|&v_idx| {
                    if self.tds.nodes_of(t).contains(&VertexNode::Casual(v_idx)) {
                        return false;
                    }

                    self.is_v_in_sphere(v_idx, t, false).unwrap()
                });

                if violation.is_some() {
                    1.0
                } else {
                    0.0
                }
            })
            .sum();

        1.0 - num_violated_tets / num_tets as f64
    }

    pub fn is_sound(&self) -> HowResult<bool> {
        match self.tds.is_sound() {
            Ok(true) => Ok(true),
            Ok(false) => {
                log::error!("Tetrahedralization is not sound!");
                Ok(false)
            }
            Err(e) => {
                log::error!("Tetrahedralization is not sound: {e}");
                Ok(false)
            }
        }
    }
}

impl core::fmt::Display for Tetrahedralization {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Tetrahedralization with {} vertices and {} tets",
            self.vertices.len(),
            self.tds.num_tets()
        )
    }
}

/// Interior voxel seed points on a grid spaced by `spacing`.
///
/// A point is kept iff it is inside the input volume (winding number) and
/// outside the envelope, so seeds never crowd the surface. Each point is
/// jittered by a deterministic hash so the seeds are never exactly
/// cospherical, which keeps degenerate (flat) Delaunay cells out of the
/// structure.
pub fn voxel_points(
    bbox: &Aabb,
    spacing: f64,
    env: &Envelope,
    eps: f64,
    vertices: &[Vertex3],
    faces: &[[usize; 3]],
) -> Vec<Vertex3> {
    let jitter = |i: u64, j: u64, k: u64, axis: u64| -> f64 {
        // splitmix64 scramble, mapped to [-0.05, 0.05] of the spacing
        let mut h = i
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(j.wrapping_mul(0xbf58_476d_1ce4_e5b9))
            .wrapping_add(k.wrapping_mul(0x94d0_49bb_1331_11eb))
            .wrapping_add(axis);
        h ^= h >> 30;
        h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        h ^= h >> 27;
        ((h >> 11) as f64 / (1u64 << 53) as f64 - 0.5) * 0.1
    };

    let mut candidates = Vec::new();
    let mut i = 0u64;
    let mut x = bbox.min[0] + spacing / 2.0;
    while x < bbox.max[0] {
        let mut j = 0u64;
        let mut y = bbox.min[1] + spacing / 2.0;
        while y < bbox.max[1] {
            let mut k = 0u64;
            let mut z = bbox.min[2] + spacing / 2.0;
            while z < bbox.max[2] {
                candidates.push([
                    x + spacing * jitter(i, j, k, 0),
                    y + spacing * jitter(i, j, k, 1),
                    z + spacing * jitter(i, j, k, 2),
                ]);
                z += spacing;
                k += 1;
            }
            y += spacing;
            j += 1;
        }
        x += spacing;
        i += 1;
    }

    candidates
        .into_par_iter()
        .filter(|p| !env.inside(p, eps) && winding_number(p, vertices, faces) > 0.5)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_vertices_3d;

    fn verify(delaunay: &Tetrahedralization) {
        let (_, regularity) = delaunay.is_regular().unwrap();
        let sound = delaunay.is_sound().unwrap();
        assert_eq!(regularity, 1.0);
        assert!(sound);
    }

    const NUM_VERTICES_LIST: [usize; 5] = [4, 5, 10, 50, 100];

    #[test]
    fn test_delaunay_3d() {
        for n in NUM_VERTICES_LIST {
            let vertices = sample_vertices_3d(n, None);

            let mut delaunay = Tetrahedralization::new();
            delaunay.insert_vertices(&vertices, true).unwrap();

            verify(&delaunay);
        }
    }

    #[test]
    fn casual_tets_reference_inserted_vertices() {
        let vertices = sample_vertices_3d(20, None);
        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, true).unwrap();

        let tets = delaunay.casual_tets();
        assert!(!tets.is_empty());
        for tet in tets {
            for v in tet {
                assert!(v < delaunay.vertices().len());
            }
        }
    }

    #[test]
    fn grid_points_are_handled() {
        // regular grids are maximally degenerate input for in-sphere tests;
        // the SOS predicates must keep the structure sound
        let mut vertices = Vec::new();
        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    vertices.push([x as f64, y as f64, z as f64]);
                }
            }
        }

        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, true).unwrap();

        assert!(delaunay.is_sound().unwrap());
        assert!(delaunay.casual_tets().len() >= 2 * 2 * 2 * 5);
    }

    #[test]
    #[ignore]
    // only run this test isolated, as test concurrency can mess up par_iter
    fn test_parallel_regularity_3d() {
        let vertices = sample_vertices_3d(500, None);

        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, true).unwrap();

        assert_eq!(delaunay.par_is_regular(), 1.0);
    }
}
