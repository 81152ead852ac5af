//! The convex cell complex and its subdivision by input-triangle planes.
//!
//! The Delaunay tets seed the complex; worklist-driven cuts then split cells
//! until every input triangle lies on a union of cell faces. All
//! classifications run through the exact kernel; intersection vertices are
//! exact rationals deduplicated by position, and faces are shared objects
//! between their two cells, so cutting one cell updates its neighbor's
//! boundary and the complex stays conforming by construction.

use crate::mesh::FacetTag;
use crate::point::Point;
use crate::predicates::{segment_plane_intersection, side_of_plane, Aabb, Sign};
use crate::simplify::SimplifiedSoup;
use crate::utils::types::{Triangle3, TriIdx, Vertex3, VertexIdx};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug)]
pub struct BspVert {
    pub pos: Point,
}

#[derive(Debug)]
pub struct BspEdge {
    pub verts: [VertexIdx; 2],
    /// Every face whose loop uses this edge, across all cells. Edge splits
    /// propagate through this set so no face is left with a hanging vertex.
    pub faces: BTreeSet<usize>,
    pub removed: bool,
}

#[derive(Debug)]
pub struct BspFace {
    /// Ordered vertex loop (orientation is not meaningful).
    pub verts: Vec<VertexIdx>,
    /// The one or two cells this face bounds.
    pub nodes: [Option<usize>; 2],
    pub tag: FacetTag,
    pub removed: bool,
}

#[derive(Debug, Default)]
pub struct BspNode {
    pub faces: Vec<usize>,
    /// Input triangles still to be cut through this cell.
    pub cutters: Vec<TriIdx>,
    pub removed: bool,
}

/// Exact-position key for vertex deduplication.
#[derive(PartialEq, Eq, Hash)]
enum VertKey {
    Bits([u64; 3]),
    Exact(Box<[num_rational::BigRational; 3]>),
}

fn vert_key(p: &Point) -> VertKey {
    if p.is_rounded() {
        let v = p.approx();
        VertKey::Bits([v[0].to_bits(), v[1].to_bits(), v[2].to_bits()])
    } else {
        VertKey::Exact(Box::new(p.to_exact()))
    }
}

#[derive(Default)]
pub struct BspComplex {
    pub verts: Vec<BspVert>,
    pub edges: Vec<BspEdge>,
    pub faces: Vec<BspFace>,
    pub nodes: Vec<BspNode>,
    edge_map: HashMap<(VertexIdx, VertexIdx), usize>,
    vert_map: HashMap<VertKey, VertexIdx>,
}

impl BspComplex {
    /// Seed the complex from a Delaunay tetrahedralization. Faces on the
    /// convex hull (the inflated bounding box) are tagged as such.
    pub fn from_delaunay(vertices: &[Vertex3], tets: &[[VertexIdx; 4]]) -> Self {
        let mut bsp = Self::default();

        for v in vertices {
            let p = Point::rounded(*v);
            bsp.vert_map.insert(vert_key(&p), bsp.verts.len());
            bsp.verts.push(BspVert { pos: p });
        }

        let mut tri_map: HashMap<[VertexIdx; 3], usize> = HashMap::new();
        for (t, tet) in tets.iter().enumerate() {
            bsp.nodes.push(BspNode::default());

            for i in 0..4 {
                let mut tri = [0; 3];
                let mut k = 0;
                for (j, &v) in tet.iter().enumerate() {
                    if j != i {
                        tri[k] = v;
                        k += 1;
                    }
                }
                let mut key = tri;
                key.sort_unstable();

                match tri_map.get(&key) {
                    Some(&f) => {
                        bsp.faces[f].nodes[1] = Some(t);
                        bsp.nodes[t].faces.push(f);
                    }
                    None => {
                        let f = bsp.faces.len();
                        tri_map.insert(key, f);
                        bsp.faces.push(BspFace {
                            verts: tri.to_vec(),
                            nodes: [Some(t), None],
                            tag: FacetTag::NotSurface,
                            removed: false,
                        });
                        bsp.register_face_edges(f);
                        bsp.nodes[t].faces.push(f);
                    }
                }
            }
        }

        // single-sided faces close off the convex hull, i.e. the outer box
        for face in &mut bsp.faces {
            if face.nodes[1].is_none() {
                face.tag = FacetTag::Bbox;
            }
        }

        bsp
    }

    fn get_or_create_edge(&mut self, a: VertexIdx, b: VertexIdx) -> usize {
        let key = (a.min(b), a.max(b));
        match self.edge_map.get(&key) {
            Some(&e) => e,
            None => {
                let e = self.edges.len();
                self.edges.push(BspEdge {
                    verts: [key.0, key.1],
                    faces: BTreeSet::new(),
                    removed: false,
                });
                self.edge_map.insert(key, e);
                e
            }
        }
    }

    fn register_face_edges(&mut self, f: usize) {
        let loop_verts = self.faces[f].verts.clone();
        for i in 0..loop_verts.len() {
            let a = loop_verts[i];
            let b = loop_verts[(i + 1) % loop_verts.len()];
            let e = self.get_or_create_edge(a, b);
            self.edges[e].faces.insert(f);
        }
    }

    fn unregister_face_edges(&mut self, f: usize) {
        let loop_verts = self.faces[f].verts.clone();
        for i in 0..loop_verts.len() {
            let a = loop_verts[i];
            let b = loop_verts[(i + 1) % loop_verts.len()];
            if let Some(&e) = self.edge_map.get(&(a.min(b), a.max(b))) {
                self.edges[e].faces.remove(&f);
            }
        }
    }

    fn get_or_create_vert(&mut self, p: Point) -> VertexIdx {
        let key = vert_key(&p);
        match self.vert_map.get(&key) {
            Some(&v) => v,
            None => {
                let v = self.verts.len();
                self.vert_map.insert(key, v);
                self.verts.push(BspVert { pos: p });
                v
            }
        }
    }

    /// Insert `m` on edge `e`, rewriting the loop of every incident face.
    fn split_edge(&mut self, e: usize, m: VertexIdx) {
        let [a, b] = self.edges[e].verts;
        let faces: Vec<usize> = self.edges[e].faces.iter().copied().collect();

        for f in &faces {
            let loop_verts = &mut self.faces[*f].verts;
            let n = loop_verts.len();
            for i in 0..n {
                let (p, q) = (loop_verts[i], loop_verts[(i + 1) % n]);
                if (p == a && q == b) || (p == b && q == a) {
                    loop_verts.insert(i + 1, m);
                    break;
                }
            }
        }

        self.edges[e].removed = true;
        self.edge_map.remove(&(a.min(b), a.max(b)));

        let e1 = self.get_or_create_edge(a, m);
        let e2 = self.get_or_create_edge(m, b);
        for f in faces {
            self.edges[e1].faces.insert(f);
            self.edges[e2].faces.insert(f);
        }
    }

    fn distinct_verts(&self, node: usize) -> Vec<VertexIdx> {
        let mut set = BTreeSet::new();
        for &f in &self.nodes[node].faces {
            set.extend(self.faces[f].verts.iter().copied());
        }
        set.into_iter().collect()
    }

    pub fn node_bbox(&self, node: usize) -> Aabb {
        let mut bbox = Aabb::EMPTY;
        for v in self.distinct_verts(node) {
            bbox.insert(&self.verts[v].pos.approx());
        }
        bbox
    }

    /// Whether the plane of `tri` passes strictly through the cell interior.
    pub fn straddles(&self, node: usize, tri: &Triangle3) -> bool {
        let mut has_pos = false;
        let mut has_neg = false;
        for v in self.distinct_verts(node) {
            match side_of_plane(tri, &self.verts[v].pos) {
                Sign::Positive => has_pos = true,
                Sign::Negative => has_neg = true,
                Sign::Zero => {}
            }
            if has_pos && has_neg {
                return true;
            }
        }
        false
    }

    /// Run the cut worklist to exhaustion.
    pub fn subdivide(&mut self, soup: &SimplifiedSoup) {
        let mut worklist: Vec<usize> = (0..self.nodes.len())
            .filter(|&n| !self.nodes[n].cutters.is_empty())
            .collect();

        let mut num_cuts = 0usize;
        while let Some(n) = worklist.pop() {
            if self.nodes[n].removed {
                continue;
            }
            let Some(t) = self.nodes[n].cutters.pop() else {
                continue;
            };

            let tri = soup_triangle(soup, t);
            if let Some((above, below)) = self.split_node(n, &tri) {
                num_cuts += 1;
                for child in [above, below] {
                    if !self.nodes[child].cutters.is_empty() {
                        worklist.push(child);
                    }
                }
            } else if !self.nodes[n].cutters.is_empty() {
                worklist.push(n);
            }
        }

        log::debug!(
            "bsp: {num_cuts} cuts, {} cells",
            self.nodes.iter().filter(|n| !n.removed).count()
        );
    }

    /// Split `node` by the plane of `tri`. Returns the two children, or
    /// `None` when the plane misses the cell interior.
    fn split_node(&mut self, node: usize, tri: &Triangle3) -> Option<(usize, usize)> {
        let mut signs: HashMap<VertexIdx, Sign> = HashMap::new();
        for v in self.distinct_verts(node) {
            signs.insert(v, side_of_plane(tri, &self.verts[v].pos));
        }

        if !signs.values().any(|s| s.is_positive()) || !signs.values().any(|s| s.is_negative()) {
            return None;
        }

        // phase A: insert exact intersection vertices on every crossed edge,
        // which rewrites the loops of all incident faces everywhere
        let node_faces = self.nodes[node].faces.clone();
        for &f in &node_faces {
            loop {
                let loop_verts = self.faces[f].verts.clone();
                let n = loop_verts.len();
                let mut crossed = None;
                for i in 0..n {
                    let (a, b) = (loop_verts[i], loop_verts[(i + 1) % n]);
                    let (sa, sb) = (signs[&a], signs[&b]);
                    if (sa.is_positive() && sb.is_negative())
                        || (sa.is_negative() && sb.is_positive())
                    {
                        crossed = Some((a, b));
                        break;
                    }
                }
                let Some((a, b)) = crossed else { break };

                let pos = segment_plane_intersection(
                    &self.verts[a].pos.to_exact(),
                    &self.verts[b].pos.to_exact(),
                    tri,
                );
                let m = self.get_or_create_vert(Point::exact(pos));
                signs.insert(m, Sign::Zero);

                let e = self.edge_map[&(a.min(b), a.max(b))];
                self.split_edge(e, m);
            }
        }

        // phase B: distribute and split faces
        let above = self.nodes.len();
        self.nodes.push(BspNode::default());
        let below = self.nodes.len();
        self.nodes.push(BspNode::default());

        for &f in &node_faces {
            let has_pos = self.faces[f]
                .verts
                .iter()
                .any(|v| signs[v].is_positive());
            let has_neg = self.faces[f]
                .verts
                .iter()
                .any(|v| signs[v].is_negative());

            match (has_pos, has_neg) {
                (true, false) | (false, false) => self.assign_face(f, node, above),
                (false, true) => self.assign_face(f, node, below),
                (true, true) => self.split_face(f, node, above, below, &signs),
            }
        }

        // section face: on-plane edges bordering both children
        let mut flags: HashMap<(VertexIdx, VertexIdx), (bool, bool)> = HashMap::new();
        for (child, slot) in [(above, 0), (below, 1)] {
            for &f in &self.nodes[child].faces {
                let loop_verts = &self.faces[f].verts;
                let n = loop_verts.len();
                for i in 0..n {
                    let (a, b) = (loop_verts[i], loop_verts[(i + 1) % n]);
                    if signs[&a].is_zero() && signs[&b].is_zero() {
                        let entry = flags.entry((a.min(b), a.max(b))).or_default();
                        if slot == 0 {
                            entry.0 = true;
                        } else {
                            entry.1 = true;
                        }
                    }
                }
            }
        }
        let section_edges: Vec<(VertexIdx, VertexIdx)> = flags
            .iter()
            .filter(|(_, &(a, b))| a && b)
            .map(|(&e, _)| e)
            .collect();

        let loop_verts = chain_loop(&section_edges);
        debug_assert!(loop_verts.len() >= 3, "degenerate section loop");

        let f = self.faces.len();
        self.faces.push(BspFace {
            verts: loop_verts,
            nodes: [Some(above), Some(below)],
            tag: FacetTag::NotSurface,
            removed: false,
        });
        self.register_face_edges(f);
        self.nodes[above].faces.push(f);
        self.nodes[below].faces.push(f);

        // children inherit the cutters that still cross them
        let remaining = std::mem::take(&mut self.nodes[node].cutters);
        for child in [above, below] {
            for &c in &remaining {
                self.nodes[child].cutters.push(c);
            }
        }
        self.nodes[node].removed = true;

        Some((above, below))
    }

    fn assign_face(&mut self, f: usize, from: usize, to: usize) {
        for slot in self.faces[f].nodes.iter_mut() {
            if *slot == Some(from) {
                *slot = Some(to);
            }
        }
        self.nodes[to].faces.push(f);
    }

    /// Split a mixed face at its two on-plane vertices.
    fn split_face(
        &mut self,
        f: usize,
        from: usize,
        above: usize,
        below: usize,
        signs: &HashMap<VertexIdx, Sign>,
    ) {
        let loop_verts = self.faces[f].verts.clone();
        let above_loop: Vec<VertexIdx> = loop_verts
            .iter()
            .copied()
            .filter(|v| !signs[v].is_negative())
            .collect();
        let below_loop: Vec<VertexIdx> = loop_verts
            .iter()
            .copied()
            .filter(|v| !signs[v].is_positive())
            .collect();
        debug_assert!(above_loop.len() >= 3 && below_loop.len() >= 3);

        let other = match self.faces[f].nodes {
            [Some(a), b] if a == from => b,
            [a, Some(b)] if b == from => a,
            _ => None,
        };
        let tag = self.faces[f].tag;

        self.unregister_face_edges(f);
        self.faces[f].removed = true;
        if let Some(o) = other {
            self.nodes[o].faces.retain(|&g| g != f);
        }

        for (child, child_loop) in [(above, above_loop), (below, below_loop)] {
            let nf = self.faces.len();
            self.faces.push(BspFace {
                verts: child_loop,
                nodes: [Some(child), other],
                tag,
                removed: false,
            });
            self.register_face_edges(nf);
            self.nodes[child].faces.push(nf);
            if let Some(o) = other {
                self.nodes[o].faces.push(nf);
            }
        }
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(move |&n| !self.nodes[n].removed)
    }

    pub fn active_faces(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.faces.len()).filter(move |&f| !self.faces[f].removed)
    }

    /// Structural consistency of the cell complex.
    pub fn is_sound(&self) -> bool {
        for f in self.active_faces() {
            let face = &self.faces[f];
            if face.verts.len() < 3 {
                log::error!("face {f} has a short loop");
                return false;
            }
            if face.nodes[0].is_none() {
                log::error!("face {f} has no owning cell");
                return false;
            }
            for node in face.nodes.into_iter().flatten() {
                if self.nodes[node].removed || !self.nodes[node].faces.contains(&f) {
                    log::error!("face {f} references stale cell {node}");
                    return false;
                }
            }
        }
        for n in self.active_nodes() {
            if self.nodes[n].faces.len() < 4 {
                log::error!("cell {n} has fewer than 4 faces");
                return false;
            }
            for &f in &self.nodes[n].faces {
                if self.faces[f].removed || !self.faces[f].nodes.contains(&Some(n)) {
                    log::error!("cell {n} references stale face {f}");
                    return false;
                }
            }
        }
        for (e, edge) in self.edges.iter().enumerate() {
            if edge.removed {
                continue;
            }
            for &f in &edge.faces {
                if self.faces[f].removed {
                    continue;
                }
                let lv = &self.faces[f].verts;
                let ok = (0..lv.len()).any(|i| {
                    let (a, b) = (lv[i], lv[(i + 1) % lv.len()]);
                    (a.min(b), a.max(b)) == (edge.verts[0], edge.verts[1])
                });
                if !ok {
                    log::error!("edge {e} lists face {f} that does not use it");
                    return false;
                }
            }
        }
        true
    }
}

pub fn soup_triangle(soup: &SimplifiedSoup, t: TriIdx) -> Triangle3 {
    let [a, b, c] = soup.faces[t];
    [soup.vertices[a], soup.vertices[b], soup.vertices[c]]
}

/// Chain undirected edges into a closed vertex loop.
fn chain_loop(edges: &[(VertexIdx, VertexIdx)]) -> Vec<VertexIdx> {
    if edges.is_empty() {
        return Vec::new();
    }

    let mut adjacency: HashMap<VertexIdx, Vec<VertexIdx>> = HashMap::new();
    for &(a, b) in edges {
        adjacency.entry(a).or_default().push(b);
        adjacency.entry(b).or_default().push(a);
    }

    let start = edges[0].0;
    let mut loop_verts = vec![start];
    let mut prev = None;
    let mut current = start;

    loop {
        let next = adjacency[&current]
            .iter()
            .copied()
            .find(|&v| Some(v) != prev);
        let Some(next) = next else { break };
        if next == start {
            break;
        }
        loop_verts.push(next);
        prev = Some(current);
        current = next;
        if loop_verts.len() > edges.len() {
            break; // malformed chain, bail instead of spinning
        }
    }

    loop_verts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delaunay::Tetrahedralization;

    fn single_tet_complex() -> BspComplex {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        BspComplex::from_delaunay(&vertices, &[[0, 1, 2, 3]])
    }

    #[test]
    fn delaunay_seeding_shares_faces() {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
        ];
        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, false).unwrap();

        let bsp = BspComplex::from_delaunay(delaunay.vertices(), &delaunay.casual_tets());
        assert!(bsp.is_sound());

        let shared = bsp
            .active_faces()
            .filter(|&f| bsp.faces[f].nodes[1].is_some())
            .count();
        assert!(shared >= 1);
    }

    #[test]
    fn splitting_a_tet_produces_two_cells_and_a_section() {
        let mut bsp = single_tet_complex();
        assert!(bsp.is_sound());

        // a plane at z = 0.25 crossing the tet
        let cutter = [[0.0, 0.0, 0.25], [1.0, 0.0, 0.25], [0.0, 1.0, 0.25]];
        assert!(bsp.straddles(0, &cutter));

        let (above, below) = bsp.split_node(0, &cutter).unwrap();
        assert!(bsp.is_sound());
        assert!(bsp.nodes[0].removed);

        // three new intersection vertices on the three crossing edges; their
        // coordinates are representable, so they are born rounded
        assert_eq!(bsp.verts.len(), 7);
        for v in 4..7 {
            assert!(bsp.verts[v].pos.is_rounded());
            assert_eq!(bsp.verts[v].pos.approx()[2], 0.25);
        }

        let section = bsp
            .active_faces()
            .find(|&f| bsp.faces[f].nodes.contains(&Some(above)) && bsp.faces[f].nodes.contains(&Some(below)))
            .expect("no section face");
        assert_eq!(bsp.faces[section].verts.len(), 3);
    }

    #[test]
    fn missing_plane_is_a_no_op() {
        let mut bsp = single_tet_complex();
        let far = [[0.0, 0.0, 5.0], [1.0, 0.0, 5.0], [0.0, 1.0, 5.0]];
        assert!(!bsp.straddles(0, &far));
        assert!(bsp.split_node(0, &far).is_none());
        assert!(bsp.is_sound());
    }

    #[test]
    fn cut_through_existing_vertices_creates_no_new_ones() {
        let mut bsp = single_tet_complex();
        // plane through vertices 0 and 3, splitting edge (1,2)
        let cutter = [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.5, 0.5, 0.0]];
        assert!(bsp.straddles(0, &cutter));

        let (above, below) = bsp.split_node(0, &cutter).unwrap();
        assert!(bsp.is_sound());
        assert_eq!(bsp.verts.len(), 5); // only the midpoint of (1,2)

        for child in [above, below] {
            assert_eq!(bsp.nodes[child].faces.len(), 4);
        }
    }
}
