//! The ε-envelope predicate: is a point (or a whole triangle) within Hausdorff
//! distance ε of the input surface?
//!
//! Queries run against a static median-split AABB tree over the input
//! triangles, built once after input validation. All queries are `&self` so
//! they can be fanned out with rayon.

use crate::predicates::{sample_triangle, squared_dist_point_triangle, Aabb};
use crate::predicates::closest_point_on_triangle;
use crate::utils::types::{Triangle3, TriIdx, Vertex3};

const LEAF_SIZE: usize = 8;

struct TreeNode {
    bbox: Aabb,
    /// Indices of the two children, `None` for leaves.
    children: Option<(usize, usize)>,
    /// Triangle ids, only filled for leaves.
    tris: Vec<TriIdx>,
}

/// Static AABB tree over a triangle list.
pub struct TriangleTree {
    tris: Vec<Triangle3>,
    nodes: Vec<TreeNode>,
}

impl TriangleTree {
    pub fn new(tris: Vec<Triangle3>) -> Self {
        let mut tree = Self {
            tris,
            nodes: Vec::new(),
        };
        if !tree.tris.is_empty() {
            let all: Vec<TriIdx> = (0..tree.tris.len()).collect();
            tree.build(all);
        }
        tree
    }

    fn build(&mut self, mut ids: Vec<TriIdx>) -> usize {
        let mut bbox = Aabb::EMPTY;
        for &id in &ids {
            bbox = bbox.union(&Aabb::from_triangle(&self.tris[id]));
        }

        let node_idx = self.nodes.len();
        self.nodes.push(TreeNode {
            bbox,
            children: None,
            tris: Vec::new(),
        });

        if ids.len() <= LEAF_SIZE {
            self.nodes[node_idx].tris = ids;
            return node_idx;
        }

        // median split on the longest axis of the centroid cloud
        let axis = {
            let ext = [
                bbox.max[0] - bbox.min[0],
                bbox.max[1] - bbox.min[1],
                bbox.max[2] - bbox.min[2],
            ];
            if ext[0] >= ext[1] && ext[0] >= ext[2] {
                0
            } else if ext[1] >= ext[2] {
                1
            } else {
                2
            }
        };
        let centroid = |t: &Triangle3| (t[0][axis] + t[1][axis] + t[2][axis]) / 3.0;
        ids.sort_by(|&a, &b| {
            centroid(&self.tris[a])
                .partial_cmp(&centroid(&self.tris[b]))
                .unwrap()
        });

        let right_ids = ids.split_off(ids.len() / 2);
        let left = self.build(ids);
        let right = self.build(right_ids);
        self.nodes[node_idx].children = Some((left, right));

        node_idx
    }

    pub fn is_empty(&self) -> bool {
        self.tris.is_empty()
    }

    pub fn triangle(&self, id: TriIdx) -> &Triangle3 {
        &self.tris[id]
    }

    /// Squared distance to the closest triangle, with the triangle id.
    pub fn nearest(&self, p: &Vertex3) -> (f64, TriIdx) {
        let mut best = (f64::INFINITY, 0);
        if self.nodes.is_empty() {
            return best;
        }

        let mut stack = vec![0usize];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if node.bbox.sq_distance(p) >= best.0 {
                continue;
            }
            match node.children {
                Some((l, r)) => {
                    // visit the closer child first
                    let dl = self.nodes[l].bbox.sq_distance(p);
                    let dr = self.nodes[r].bbox.sq_distance(p);
                    if dl <= dr {
                        stack.push(r);
                        stack.push(l);
                    } else {
                        stack.push(l);
                        stack.push(r);
                    }
                }
                None => {
                    for &id in &node.tris {
                        let d = squared_dist_point_triangle(p, &self.tris[id]);
                        if d < best.0 {
                            best = (d, id);
                        }
                    }
                }
            }
        }
        best
    }

    /// Ids of all triangles whose bbox intersects `query`.
    pub fn query_box(&self, query: &Aabb) -> Vec<TriIdx> {
        let mut out = Vec::new();
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![0usize];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if !node.bbox.intersects(query) {
                continue;
            }
            match node.children {
                Some((l, r)) => {
                    stack.push(l);
                    stack.push(r);
                }
                None => {
                    for &id in &node.tris {
                        if Aabb::from_triangle(&self.tris[id]).intersects(query) {
                            out.push(id);
                        }
                    }
                }
            }
        }
        out
    }
}

/// The envelope of the input surface.
pub struct Envelope {
    tree: TriangleTree,
    bbox: Aabb,
}

impl Envelope {
    pub fn new(vertices: &[Vertex3], faces: &[[usize; 3]]) -> Self {
        let tris: Vec<Triangle3> = faces
            .iter()
            .map(|f| [vertices[f[0]], vertices[f[1]], vertices[f[2]]])
            .collect();

        let bbox = Aabb::from_points(tris.iter().flatten());

        Self {
            tree: TriangleTree::new(tris),
            bbox,
        }
    }

    pub const fn bbox(&self) -> &Aabb {
        &self.bbox
    }

    pub fn sq_distance(&self, p: &Vertex3) -> f64 {
        self.tree.nearest(p).0
    }

    /// Closest point on the input surface.
    pub fn project(&self, p: &Vertex3) -> Vertex3 {
        let (_, id) = self.tree.nearest(p);
        closest_point_on_triangle(p, self.tree.triangle(id)).into()
    }

    /// Whether `p` lies within distance `eps` of the input surface.
    ///
    /// Monotone in `eps`: growing the tolerance never expels a point.
    pub fn inside(&self, p: &Vertex3, eps: f64) -> bool {
        self.sq_distance(p) <= eps * eps
    }

    /// Whether every sample of `tri` at density `sampling_dist` is inside.
    pub fn triangle_inside(&self, tri: &Triangle3, eps: f64, sampling_dist: f64) -> bool {
        let eps_sq = eps * eps;
        sample_triangle(tri, sampling_dist)
            .iter()
            .all(|s| self.tree.nearest(s).0 <= eps_sq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vertex3>, Vec<[usize; 3]>) {
        (
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn points_near_surface_are_inside() {
        let (v, f) = quad();
        let env = Envelope::new(&v, &f);

        assert!(env.inside(&[0.5, 0.5, 0.0], 1e-3));
        assert!(env.inside(&[0.5, 0.5, 0.0009], 1e-3));
        assert!(!env.inside(&[0.5, 0.5, 0.1], 1e-3));
    }

    #[test]
    fn envelope_is_monotone_in_eps() {
        let (v, f) = quad();
        let env = Envelope::new(&v, &f);

        let p = [0.5, 0.5, 0.05];
        assert!(!env.inside(&p, 0.01));
        assert!(env.inside(&p, 0.06));
    }

    #[test]
    fn triangle_inside_detects_excursions() {
        let (v, f) = quad();
        let env = Envelope::new(&v, &f);

        // coplanar triangle within the quad
        let flat = [[0.1, 0.1, 0.0], [0.8, 0.1, 0.0], [0.1, 0.8, 0.0]];
        assert!(env.triangle_inside(&flat, 1e-3, 1e-3 / 2f64.sqrt()));

        // one corner lifted way out of the envelope
        let lifted = [[0.1, 0.1, 0.0], [0.8, 0.1, 0.0], [0.1, 0.8, 0.5]];
        assert!(!env.triangle_inside(&lifted, 1e-3, 1e-3 / 2f64.sqrt()));
    }

    #[test]
    fn nearest_returns_projection() {
        let (v, f) = quad();
        let env = Envelope::new(&v, &f);

        let q = env.project(&[0.25, 0.25, 2.0]);
        assert_eq!(q, [0.25, 0.25, 0.0]);
    }

    #[test]
    fn tree_box_queries_prefilter() {
        let (v, f) = quad();
        let env = Envelope::new(&v, &f);

        let hits = env.tree.query_box(&Aabb {
            min: [0.9, 0.0, -0.1],
            max: [1.1, 0.2, 0.1],
        });
        assert_eq!(hits, vec![0]);
    }
}
