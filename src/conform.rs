//! Face matching between the cell complex and the simplified soup.
//!
//! A cell face is *matched* to an input triangle when it lies in the
//! triangle's plane and its loop is covered by the triangle; matched faces
//! carry the triangle's id as surface tag. Triangles not fully matched are
//! recorded as cutting constraints on every cell their plane still crosses.

use crate::bsp::{soup_triangle, BspComplex};
use crate::envelope::TriangleTree;
use crate::mesh::FacetTag;
use crate::predicates::{covered_by_triangle, side_of_plane, Aabb};
use crate::simplify::SimplifiedSoup;

/// Initial matching on the Delaunay complex: tag coplanar covered faces and
/// hand every triangle to the cells it must cut. Returns the matched count.
pub fn match_faces(bsp: &mut BspComplex, soup: &SimplifiedSoup) -> usize {
    let matched = tag_faces(bsp, soup);

    let tree = soup_tree(soup);
    let nodes: Vec<usize> = bsp.active_nodes().collect();
    for n in nodes {
        let candidates = tree.query_box(&bsp.node_bbox(n));
        for t in candidates {
            if bsp.straddles(n, &soup_triangle(soup, t)) {
                bsp.nodes[n].cutters.push(t);
            }
        }
    }

    let num_cutters: usize = bsp.nodes.iter().map(|n| n.cutters.len()).sum();
    log::debug!("face matching: {matched} faces matched, {num_cutters} cutter assignments");

    matched
}

/// Tag every untagged face that is coplanar with and covered by the input
/// surface. Runs once before subdivision and once after, when every input
/// triangle is covered by a union of cell faces.
///
/// Coverage is tested against the union of all coplanar input triangles, not
/// a single one: a cell face may span two input triangles of the same plane
/// (a box face split along the opposite diagonal). Every loop vertex and the
/// loop centroid must land in some coplanar triangle; the tag records the
/// triangle covering the centroid.
pub fn tag_faces(bsp: &mut BspComplex, soup: &SimplifiedSoup) -> usize {
    let tree = soup_tree(soup);

    let mut matched = 0;
    let faces: Vec<usize> = bsp.active_faces().collect();
    for f in faces {
        if bsp.faces[f].tag != FacetTag::NotSurface {
            continue;
        }

        let mut bbox = Aabb::EMPTY;
        let mut centroid = [0.0; 3];
        for &v in &bsp.faces[f].verts {
            let p = bsp.verts[v].pos.approx();
            bbox.insert(&p);
            for d in 0..3 {
                centroid[d] += p[d];
            }
        }
        let n = bsp.faces[f].verts.len() as f64;
        for c in centroid.iter_mut() {
            *c /= n;
        }

        let coplanar: Vec<_> = tree
            .query_box(&bbox)
            .into_iter()
            .filter(|&t| {
                let tri = soup_triangle(soup, t);
                bsp.faces[f]
                    .verts
                    .iter()
                    .all(|&v| side_of_plane(&tri, &bsp.verts[v].pos).is_zero())
            })
            .collect();
        if coplanar.is_empty() {
            continue;
        }

        let in_union = |p: &crate::point::Point| {
            coplanar
                .iter()
                .any(|&t| covered_by_triangle(p, &soup_triangle(soup, t)))
        };

        let verts_covered = bsp.faces[f]
            .verts
            .iter()
            .all(|&v| in_union(&bsp.verts[v].pos));
        let centroid_tri = coplanar.iter().copied().find(|&t| {
            covered_by_triangle(&crate::point::Point::rounded(centroid), &soup_triangle(soup, t))
        });

        if verts_covered {
            if let Some(t) = centroid_tri {
                bsp.faces[f].tag = FacetTag::Surface(t);
                matched += 1;
            }
        }
    }

    matched
}

fn soup_tree(soup: &SimplifiedSoup) -> TriangleTree {
    TriangleTree::new(
        (0..soup.faces.len())
            .map(|t| soup_triangle(soup, t))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delaunay::Tetrahedralization;

    /// A tet complex over the unit tetrahedron's own four corners: every soup
    /// triangle coincides with a hull face and must be matched, never cut.
    #[test]
    fn exact_tet_input_matches_without_cutters() {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let soup = SimplifiedSoup {
            vertices: vertices.clone(),
            faces: vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
            is_closed: true,
            boundary_edges: Vec::new(),
        };

        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, false).unwrap();
        let mut bsp = BspComplex::from_delaunay(delaunay.vertices(), &delaunay.casual_tets());
        // hull faces double as surface here; clear the box tag for the test
        for face in bsp.faces.iter_mut() {
            face.tag = FacetTag::NotSurface;
        }

        let matched = match_faces(&mut bsp, &soup);
        assert_eq!(matched, 4);
        assert!(bsp.nodes.iter().all(|n| n.cutters.is_empty()));
    }

    /// A triangle slicing through the middle of a cell is a cutter, and after
    /// subdivision the section becomes a tagged face.
    #[test]
    fn crossing_triangle_is_cut_then_tagged() {
        let vertices = vec![
            [0.0, 0.0, -1.0],
            [2.0, 0.0, -1.0],
            [0.0, 2.0, -1.0],
            [0.0, 0.0, 1.0],
        ];
        let soup = SimplifiedSoup {
            vertices: vec![[-1.0, -1.0, 0.0], [6.0, -1.0, 0.0], [-1.0, 6.0, 0.0]],
            faces: vec![[0, 1, 2]],
            is_closed: false,
            boundary_edges: Vec::new(),
        };

        let mut delaunay = Tetrahedralization::new();
        delaunay.insert_vertices(&vertices, false).unwrap();
        let mut bsp = BspComplex::from_delaunay(delaunay.vertices(), &delaunay.casual_tets());

        let matched = match_faces(&mut bsp, &soup);
        assert_eq!(matched, 0);
        assert_eq!(bsp.nodes.iter().map(|n| n.cutters.len()).sum::<usize>(), 1);

        bsp.subdivide(&soup);
        assert!(bsp.is_sound());

        let tagged_after = tag_faces(&mut bsp, &soup);
        assert!(tagged_after >= 1);
        assert_eq!(bsp.active_nodes().count(), 2);
    }
}
