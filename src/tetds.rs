//! Tetrahedral connectivity for the Delaunay stage.
//!
//! Four nodes per tetrahedron, stored flat. Half facet `4t + i` is the face
//! of tet `t` opposite its corner `i` and stores the index of its twin in the
//! neighboring tet, which makes the structure walkable without any per-face
//! allocation. Edges are addressed as (facet, position) pairs.
//!
//! The Bowyer-Watson machinery speaks in terms of the *cavity* (tets whose
//! circumsphere contains the new vertex, to be carved out) and its *rim*
//! (kept tets bounding the cavity); [TetDataStructure::refill] retriangulates
//! the carved region by coning the rim facets onto the new node, reusing the
//! carved slots.

use crate::VertexNode;
use anyhow::{Ok, Result};

/// Index of a tetrahedron.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct TetId(pub usize);

/// Index of a half facet: `4 * tet + corner`.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct FacetId(pub usize);

/// An edge of a half facet, addressed by its position in the facet loop.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Hedge {
    pub facet: FacetId,
    pub edge: usize,
}

impl TetId {
    pub const fn facet(self, corner: usize) -> FacetId {
        FacetId((self.0 << 2) + corner)
    }

    pub const fn facets(self) -> [FacetId; 4] {
        [self.facet(0), self.facet(1), self.facet(2), self.facet(3)]
    }
}

impl FacetId {
    pub const fn tet(self) -> TetId {
        TetId(self.0 >> 2)
    }

    pub const fn corner(self) -> usize {
        self.0 & 3
    }

    pub const fn hedge(self, edge: usize) -> Hedge {
        Hedge { facet: self, edge }
    }
}

/// For each facet corner, the tet corners spanning that facet, ordered so
/// the three loops of a tet agree on edge directions.
const FACET_CORNERS: [[usize; 3]; 4] = [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

/// Derived from [FACET_CORNERS]: entry `[i][k]` names the facet corner and
/// edge position carrying the reverse of edge `k` of facet `i` within the
/// same tet.
const EDGE_MATES: [[(usize, usize); 3]; 4] = [
    [(2, 1), (1, 1), (3, 1)],
    [(3, 2), (0, 1), (2, 0)],
    [(1, 2), (0, 0), (3, 0)],
    [(2, 2), (0, 2), (1, 0)],
];

impl Hedge {
    /// The reverse of this edge on the adjacent facet of the same tet.
    /// Pure combinatorics, no structure lookup needed.
    pub const fn mate(self) -> Hedge {
        let (corner, edge) = EDGE_MATES[self.facet.corner()][self.edge];
        Hedge {
            facet: self.facet.tet().facet(corner),
            edge,
        }
    }
}

/// The half-facet connectivity plus the Bowyer-Watson scratch state.
#[derive(Debug, Default)]
pub struct TetDataStructure {
    /// Four nodes per tet, flat.
    nodes: Vec<VertexNode>,
    /// Twin half facet per half facet, flat and parallel to `nodes`.
    twins: Vec<usize>,
    num_tets: usize,

    in_cavity: Vec<bool>,
    on_rim: Vec<bool>,
    /// Carved slots awaiting reuse by [Self::refill] or [Self::reclaim].
    carved: Vec<usize>,
    rim: Vec<usize>,
    pending: Vec<usize>,
}

impl TetDataStructure {
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            twins: Vec::new(),
            num_tets: 0,
            in_cavity: Vec::new(),
            on_rim: Vec::new(),
            carved: Vec::new(),
            rim: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub const fn num_tets(&self) -> usize {
        self.num_tets
    }

    pub fn tets(&self) -> impl Iterator<Item = TetId> {
        (0..self.num_tets).map(TetId)
    }

    pub fn nodes_of(&self, t: TetId) -> [VertexNode; 4] {
        let base = t.0 << 2;
        [
            self.nodes[base],
            self.nodes[base + 1],
            self.nodes[base + 2],
            self.nodes[base + 3],
        ]
    }

    /// Bounds-checked [Self::nodes_of], for callers threading `Result`s.
    pub fn try_nodes_of(&self, t: TetId) -> Result<[VertexNode; 4]> {
        if t.0 < self.num_tets {
            Ok(self.nodes_of(t))
        } else {
            Err(anyhow::Error::msg("tetrahedron not in structure"))
        }
    }

    pub fn facet_nodes(&self, f: FacetId) -> [VertexNode; 3] {
        let base = f.tet().0 << 2;
        let corners = FACET_CORNERS[f.corner()];
        [
            self.nodes[base + corners[0]],
            self.nodes[base + corners[1]],
            self.nodes[base + corners[2]],
        ]
    }

    pub fn twin(&self, f: FacetId) -> FacetId {
        FacetId(self.twins[f.0])
    }

    pub fn is_conceptual(&self, t: TetId) -> bool {
        self.nodes_of(t).iter().any(VertexNode::is_conceptual)
    }

    fn hedge_nodes(&self, h: Hedge) -> [VertexNode; 2] {
        let tri = self.facet_nodes(h.facet);
        [tri[h.edge], tri[(h.edge + 1) % 3]]
    }

    /// The reverse of this edge on the twin facet of the neighboring tet.
    fn hedge_twin(&self, h: Hedge) -> Hedge {
        let twin = self.twin(h.facet);
        let tail = self.hedge_nodes(h)[1];
        for k in 0..2 {
            if self.hedge_nodes(twin.hedge(k))[0] == tail {
                return twin.hedge(k);
            }
        }
        // twins carry the same three nodes, so the remaining edge matches
        twin.hedge(2)
    }

    fn push_tet(
        &mut self,
        a: VertexNode,
        b: VertexNode,
        c: VertexNode,
        d: VertexNode,
    ) -> TetId {
        let t = TetId(self.num_tets);
        self.nodes.extend_from_slice(&[a, b, c, d]);
        self.twins.extend_from_slice(&[0; 4]);
        self.in_cavity.push(false);
        self.on_rim.push(false);
        self.num_tets += 1;
        t
    }

    fn rewrite_tet(
        &mut self,
        t: TetId,
        a: VertexNode,
        b: VertexNode,
        c: VertexNode,
        d: VertexNode,
    ) {
        let base = t.0 << 2;
        self.nodes[base] = a;
        self.nodes[base + 1] = b;
        self.nodes[base + 2] = c;
        self.nodes[base + 3] = d;
        self.in_cavity[t.0] = false;
        self.on_rim[t.0] = false;
    }

    fn link(&mut self, a: FacetId, b: FacetId) {
        self.twins[a.0] = b.0;
        self.twins[b.0] = a.0;
    }

    /// Insert the first tetrahedron and close it off with four conceptual
    /// neighbors through the node at infinity.
    pub fn seed(&mut self, corners: [usize; 4]) -> Result<()> {
        if self.num_tets != 0 {
            return Err(anyhow::Error::msg("structure is already seeded"));
        }

        let n0 = VertexNode::Casual(corners[0]);
        let n1 = VertexNode::Casual(corners[1]);
        let n2 = VertexNode::Casual(corners[2]);
        let n3 = VertexNode::Casual(corners[3]);
        let inf = VertexNode::Conceptual;

        let inner = self.push_tet(n0, n1, n2, n3);
        let c0 = self.push_tet(n1, n2, n3, inf);
        let c1 = self.push_tet(n0, n3, n2, inf);
        let c2 = self.push_tet(n0, n1, n3, inf);
        let c3 = self.push_tet(n0, n2, n1, inf);

        // each inner facet twins the finite facet of one conceptual tet
        self.link(inner.facet(0), c0.facet(3));
        self.link(inner.facet(1), c1.facet(3));
        self.link(inner.facet(2), c2.facet(3));
        self.link(inner.facet(3), c3.facet(3));
        // the conceptual tets twin each other across the hull edges
        self.link(c0.facet(0), c1.facet(0));
        self.link(c0.facet(1), c2.facet(0));
        self.link(c0.facet(2), c3.facet(0));
        self.link(c1.facet(1), c3.facet(2));
        self.link(c1.facet(2), c2.facet(1));
        self.link(c2.facet(2), c3.facet(1));

        Ok(())
    }

    /// Open a cavity at `first`, which must contain the vertex to insert.
    pub fn cavity_start(&mut self, first: TetId) -> Result<()> {
        if !self.pending.is_empty() || !self.rim.is_empty() {
            return Err(anyhow::Error::msg("a cavity is already open"));
        }
        self.carve(first);
        Ok(())
    }

    /// Next neighbor of the cavity that has not been classified yet.
    pub fn next_unclassified(&mut self) -> Option<TetId> {
        while let Some(i) = self.pending.pop() {
            if !self.in_cavity[i] && !self.on_rim[i] {
                return Some(TetId(i));
            }
        }
        None
    }

    /// Add `t` to the cavity and queue its neighbors for classification.
    pub fn carve(&mut self, t: TetId) {
        for f in t.facets() {
            self.pending.push(self.twin(f).tet().0);
        }
        self.in_cavity[t.0] = true;
        self.carved.push(t.0);
    }

    /// Keep `t`, making it part of the cavity rim.
    pub fn fence(&mut self, t: TetId) {
        self.on_rim[t.0] = true;
        self.rim.push(t.0);
    }

    /// Retriangulate the carved cavity by coning every rim facet onto `node`,
    /// reusing carved slots. Returns the tets of the new star.
    pub fn refill(&mut self, node: VertexNode) -> Result<Vec<TetId>> {
        if !self.pending.is_empty() {
            return Err(anyhow::Error::msg("cavity boundary is not classified"));
        }

        // 1 - some rim facet facing the cavity
        let first = {
            let &rim_tet = self
                .rim
                .last()
                .ok_or_else(|| anyhow::Error::msg("cavity without rim"))?;
            TetId(rim_tet)
                .facets()
                .into_iter()
                .find(|&f| self.in_cavity[self.twin(f).tet().0])
                .ok_or_else(|| anyhow::Error::msg("rim tetrahedron off the cavity"))?
        };

        // 2 - walk the whole cavity boundary, recording for every boundary
        // facet which boundary facet continues it across each edge (rotate
        // around the edge through carved tets until a kept facet shows up)
        let mut boundary = vec![first];
        let mut links: Vec<[Option<usize>; 3]> = vec![[None; 3]];
        let mut cur = 0;
        while cur < boundary.len() {
            for j in 0..3 {
                if links[cur][j].is_some() {
                    continue;
                }

                let start = self.hedge_twin(boundary[cur].hedge(j));
                let mut h = self.hedge_twin(start.mate());
                let (other, j2) = loop {
                    if !self.in_cavity[h.facet.tet().0] {
                        break (h.facet, h.edge);
                    }
                    h = self.hedge_twin(h.mate());
                };

                let other_pos = match boundary.iter().position(|&f| f == other) {
                    Some(p) => p,
                    None => {
                        boundary.push(other);
                        links.push([None; 3]);
                        boundary.len() - 1
                    }
                };
                links[cur][j] = Some(other_pos);
                links[other_pos][j2] = Some(cur);
            }
            cur += 1;
        }

        // 3 - one tet per boundary facet, coned onto the node
        let mut created = Vec::with_capacity(boundary.len());
        for &f in &boundary {
            let [n0, n1, n2] = self.facet_nodes(f);
            match self.carved.pop() {
                Some(hole) => {
                    self.rewrite_tet(TetId(hole), n0, n2, n1, node);
                    created.push(TetId(hole));
                }
                None => created.push(self.push_tet(n0, n2, n1, node)),
            }
        }

        // 4 - twin the new tets with the rim and with each other; the corner
        // permutation follows from the (n0, n2, n1, node) build order
        for i in 0..boundary.len() {
            let t = created[i];

            let across = [
                created[links[i][1].unwrap()],
                created[links[i][0].unwrap()],
                created[links[i][2].unwrap()],
            ];
            let back = [links[i][1].unwrap(), links[i][0].unwrap(), links[i][2].unwrap()];

            for (corner, (&nei, &pos)) in across.iter().zip(back.iter()).enumerate() {
                let twin_corner = if links[pos][0] == Some(i) {
                    1
                } else if links[pos][1] == Some(i) {
                    0
                } else {
                    2
                };
                self.twins[t.facet(corner).0] = nei.facet(twin_corner).0;
            }
            self.link(t.facet(3), boundary[i]);
        }

        while let Some(r) = self.rim.pop() {
            self.on_rim[r] = false;
        }

        Ok(created)
    }

    /// Drop carved tets that were not reused, moving end tets into the holes
    /// so the id range stays dense.
    pub fn reclaim(&mut self) {
        self.carved.sort_unstable();
        while let Some(hole) = self.carved.pop() {
            self.in_cavity[hole] = false;
            self.relocate_last(TetId(hole));
        }
    }

    fn relocate_last(&mut self, into: TetId) {
        let last = self.num_tets - 1;
        if into.0 != last {
            let base = self.twins.len() - 4;
            let moved_twins = [
                self.twins[base],
                self.twins[base + 1],
                self.twins[base + 2],
                self.twins[base + 3],
            ];
            let [a, b, c, d] = self.nodes_of(TetId(last));
            self.rewrite_tet(into, a, b, c, d);
            for (corner, &twin) in moved_twins.iter().enumerate() {
                let f = into.facet(corner).0;
                self.twins[f] = twin;
                self.twins[twin] = f;
            }
        }

        self.nodes.truncate(self.nodes.len() - 4);
        self.twins.truncate(self.twins.len() - 4);
        self.in_cavity.pop();
        self.on_rim.pop();
        self.num_tets -= 1;
    }

    /// Structural soundness: no leftover scratch marks, no duplicate nodes,
    /// twin involution, and reversed node cycles across every twin pair.
    pub fn is_sound(&self) -> Result<bool> {
        let mut sound = true;

        for t in self.tets() {
            if self.in_cavity[t.0] || self.on_rim[t.0] {
                log::error!("tet {t:?} still carries cavity marks");
                sound = false;
            }

            let nodes = self.nodes_of(t);
            for i in 0..4 {
                for j in (i + 1)..4 {
                    if nodes[i] == nodes[j] {
                        log::error!("tet {t:?} lists {} twice", nodes[i]);
                        sound = false;
                    }
                }
            }

            for f in t.facets() {
                let twin = self.twin(f);
                if self.twin(twin) != f {
                    log::error!("facet {f:?}: twin is not an involution");
                    sound = false;
                }
                if !reversed_cycle(self.facet_nodes(f), self.facet_nodes(twin)) {
                    log::error!("facet {f:?} and twin {twin:?} disagree on nodes");
                    sound = false;
                }
                for k in 0..3 {
                    let h = f.hedge(k);
                    let [head, tail] = self.hedge_nodes(h);
                    if self.hedge_nodes(h.mate()) != [tail, head] {
                        log::error!("hedge {h:?}: mate does not reverse it");
                        sound = false;
                    }
                    if self.hedge_nodes(self.hedge_twin(h)) != [tail, head] {
                        log::error!("hedge {h:?}: twin does not reverse it");
                        sound = false;
                    }
                }
            }
        }

        Ok(sound)
    }
}

/// Whether `b` is `a` traversed backwards, up to rotation.
fn reversed_cycle(a: [VertexNode; 3], b: [VertexNode; 3]) -> bool {
    (0..3).any(|r| (0..3).all(|k| a[k] == b[(r + 3 - k) % 3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_links_the_conceptual_shell() {
        let mut tds = TetDataStructure::new();
        tds.seed([0, 1, 2, 3]).unwrap();

        assert_eq!(tds.num_tets(), 5);
        assert!(tds.is_sound().unwrap());

        assert!(!tds.is_conceptual(TetId(0)));
        for i in 1..5 {
            assert!(tds.is_conceptual(TetId(i)));
        }
    }

    #[test]
    fn facet_addressing_round_trips() {
        let t = TetId(7);
        for corner in 0..4 {
            let f = t.facet(corner);
            assert_eq!(f.tet(), t);
            assert_eq!(f.corner(), corner);
        }
    }

    #[test]
    fn mates_reverse_edges_combinatorially() {
        // on any facet pair within a tet, the mate of an edge is its reverse
        let mut tds = TetDataStructure::new();
        tds.seed([0, 1, 2, 3]).unwrap();

        for f in TetId(0).facets() {
            for k in 0..3 {
                let h = f.hedge(k);
                let [head, tail] = tds.hedge_nodes(h);
                assert_eq!(tds.hedge_nodes(h.mate()), [tail, head]);
                assert_eq!(h.mate().facet.tet(), f.tet());
            }
        }
    }
}
