//! The full pipeline: soup → simplified soup → Delaunay → conformer → BSP →
//! initial tets → refined tets → filtered tets.

use crate::bsp::BspComplex;
use crate::config::{Config, ProgressStep};
use crate::envelope::Envelope;
use crate::error::{MeshError, MeshWarning};
use crate::mesh::TetMesh;
use crate::state::RefineState;
use crate::utils::types::Vertex3;
use crate::{cell_tets, conform, delaunay, filter, optimize, simplify};

/// Margin of the ambient box around the input, relative to its diagonal.
const BBOX_MARGIN_REL: f64 = 0.1;

/// The final tet mesh.
#[derive(Debug, Clone, Default)]
pub struct TetMeshOutput {
    /// Vertex positions, rounded doubles.
    pub vertices: Vec<Vertex3>,
    /// Tets as zero-based indices into `vertices`.
    pub tets: Vec<[usize; 4]>,
    /// Minimum dihedral angle per tet, radians.
    pub min_dihedral: Vec<f64>,
    pub warning: Option<MeshWarning>,
}

/// Tetrahedralize a triangle soup; see the crate docs for the guarantees.
pub fn tetrahedralize(
    vertices: &[Vertex3],
    faces: &[[usize; 3]],
    cfg: &Config,
) -> Result<TetMeshOutput, MeshError> {
    tetrahedralize_with_progress(vertices, faces, cfg, &mut |_, _| {})
}

/// [tetrahedralize] with a per-stage progress callback.
pub fn tetrahedralize_with_progress(
    vertices: &[Vertex3],
    faces: &[[usize; 3]],
    cfg: &Config,
    progress: &mut dyn FnMut(ProgressStep, f64),
) -> Result<TetMeshOutput, MeshError> {
    validate_input(vertices, faces)?;

    let env = Envelope::new(vertices, faces);
    let bbox_diag = env.bbox().diag();
    if bbox_diag == 0.0 {
        return Err(MeshError::InputInvalid("degenerate bounding box".into()));
    }

    let eps_input = bbox_diag / cfg.eps_rel;
    let sampling_dist = match cfg.sampling_dist_rel {
        Some(rel) => bbox_diag / rel,
        None => eps_input / 2f64.sqrt(),
    };

    // 1 - simplify the soup inside the envelope
    let soup = simplify::preprocess(vertices, faces, &env, eps_input, sampling_dist)?;
    progress(ProgressStep::Preprocess, 1.0);

    let mut state = RefineState::new(cfg, bbox_diag, soup.is_closed);

    // 2 - Delaunay over soup vertices, ambient box corners, voxel seeds
    let mut points = soup.vertices.clone();
    points.extend(
        env.bbox()
            .inflated(bbox_diag * BBOX_MARGIN_REL)
            .corners(),
    );
    if cfg.use_voxel_stuffing {
        let seeds = delaunay::voxel_points(
            env.bbox(),
            state.target_edge_len,
            &env,
            state.eps_input,
            &soup.vertices,
            &soup.faces,
        );
        log::debug!("voxel stuffing: {} seeds", seeds.len());
        points.extend(seeds);
    }

    let mut del = delaunay::Tetrahedralization::with_vert_capacity(points.len());
    del.insert_vertices(&points, true)
        .map_err(|e| MeshError::InputInvalid(e.to_string()))?;
    progress(ProgressStep::Delaunay, 1.0);

    // 3 - conform and subdivide
    let mut bsp = BspComplex::from_delaunay(del.vertices(), &del.casual_tets());
    conform::match_faces(&mut bsp, &soup);
    progress(ProgressStep::FaceMatching, 1.0);

    bsp.subdivide(&soup);
    conform::tag_faces(&mut bsp, &soup);
    progress(ProgressStep::Bsp, 1.0);

    // 4 - initial tets
    let mut mesh = cell_tets::tetrahedralize_cells(&bsp, &state, &soup.boundary_edges);
    drop(bsp);
    progress(ProgressStep::Tetra, 1.0);

    // 5 - refinement
    let warning = optimize::optimize(&mut mesh, &env, &mut state, cfg);
    progress(ProgressStep::Optimize, 1.0);

    // 6 - keep the inside
    filter::filter_outside(&mut mesh, &soup.vertices, &soup.faces);

    // every output position must be a plain double; a surviving vertex that
    // cannot be rounded without inverting its star is pinned by the envelope
    let unrounded = mesh.round_vertices();
    if unrounded > 0 {
        log::warn!("{unrounded} vertices cannot be rounded");
        return Err(MeshError::EnvelopeInfeasible(Box::new(output_of(
            &mesh, warning,
        ))));
    }

    Ok(output_of(&mesh, warning))
}

fn output_of(mesh: &TetMesh, warning: Option<MeshWarning>) -> TetMeshOutput {
    let (vertices, tets, min_dihedral) = mesh.compact();
    TetMeshOutput {
        vertices,
        tets,
        min_dihedral,
        warning,
    }
}

fn validate_input(vertices: &[Vertex3], faces: &[[usize; 3]]) -> Result<(), MeshError> {
    if faces.is_empty() {
        return Err(MeshError::InputInvalid("no input triangles".into()));
    }
    for v in vertices {
        if !v.iter().all(|c| c.is_finite()) {
            return Err(MeshError::InputInvalid(
                "non-finite vertex coordinate".into(),
            ));
        }
    }
    for f in faces {
        if f.iter().any(|&i| i >= vertices.len()) {
            return Err(MeshError::InputInvalid("face index out of range".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::tet_volume;
    use crate::predicates::Aabb;
    use crate::test_utils::{
        bowtie_soup, unit_cube_soup, unit_sphere_soup, unit_tet_soup,
    };

    // debug builds pay dearly for envelope sampling at the default density,
    // so the fast tests run with a slightly wider envelope and few passes
    fn quick_cfg() -> Config {
        Config {
            use_voxel_stuffing: false,
            max_num_passes: 3,
            eps_rel: 200.0,
            ..Config::default()
        }
    }

    fn total_volume(out: &TetMeshOutput) -> f64 {
        out.tets
            .iter()
            .map(|t| {
                tet_volume(&[
                    out.vertices[t[0]],
                    out.vertices[t[1]],
                    out.vertices[t[2]],
                    out.vertices[t[3]],
                ])
            })
            .sum()
    }

    #[test]
    fn rejects_invalid_input() {
        let err = tetrahedralize(&[], &[], &Config::default()).unwrap_err();
        assert!(matches!(err, MeshError::InputInvalid(_)));

        let err = tetrahedralize(
            &[[0.0, 0.0, f64::NAN], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[[0, 1, 2]],
            &Config::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::InputInvalid(_)));

        let err = tetrahedralize(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[[0, 1, 5]],
            &Config::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::InputInvalid(_)));
    }

    #[test]
    fn unit_tet_yields_a_tiny_exact_mesh() {
        let (v, f) = unit_tet_soup();
        // no refinement: the interior cell of an exactly representable input
        // is already a perfect mesh, and this pins the output for inspection
        let cfg = Config {
            use_voxel_stuffing: false,
            max_num_passes: 0,
            ..Config::default()
        };
        let out = tetrahedralize(&v, &f, &cfg).unwrap();

        assert!(!out.tets.is_empty() && out.tets.len() <= 8, "{} tets", out.tets.len());

        // all output vertices are on (within 1e-3 of) the input tetrahedron
        let env = Envelope::new(&v, &f);
        for p in &out.vertices {
            assert!(env.sq_distance(p) <= 1e-3 * 1e-3);
        }
        // min dihedral above 10 degrees
        for &a in &out.min_dihedral {
            assert!(a > 10f64.to_radians(), "angle {a}");
            assert!(a > 0.0 && a < std::f64::consts::PI);
        }

        let volume = total_volume(&out);
        assert!((volume - 1.0 / 6.0).abs() < 1e-9, "volume {volume}");
    }

    #[test]
    fn unit_cube_fills_its_volume() {
        let (v, f) = unit_cube_soup();
        let out = tetrahedralize(&v, &f, &quick_cfg()).unwrap();

        assert!(out.tets.len() >= 5);
        let volume = total_volume(&out);
        assert!((0.95..=1.0 + 1e-9).contains(&volume), "volume {volume}");

        // output bbox is contained in the input bbox inflated by eps
        let eps = 3f64.sqrt() / 200.0;
        let outer = Aabb {
            min: [-eps; 3],
            max: [1.0 + eps; 3],
        };
        for p in &out.vertices {
            assert!(outer.contains(p));
        }
    }

    #[test]
    fn progress_reports_every_stage() {
        let (v, f) = unit_tet_soup();
        let mut steps = Vec::new();
        tetrahedralize_with_progress(&v, &f, &quick_cfg(), &mut |step, frac| {
            steps.push((step, frac));
        })
        .unwrap();

        for expected in [
            ProgressStep::Preprocess,
            ProgressStep::Delaunay,
            ProgressStep::FaceMatching,
            ProgressStep::Bsp,
            ProgressStep::Tetra,
            ProgressStep::Optimize,
        ] {
            assert!(steps.iter().any(|&(s, _)| s == expected));
        }
        assert!(steps.iter().all(|&(_, f)| (0.0..=1.0).contains(&f)));
    }

    #[test]
    fn single_triangle_gives_an_empty_volume() {
        let v = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let f = vec![[0, 1, 2]];
        let out = tetrahedralize(&v, &f, &quick_cfg()).unwrap();
        assert!(out.tets.is_empty());
        assert!(out.vertices.is_empty());
    }

    #[test]
    fn bowtie_does_not_crash() {
        let (v, f) = bowtie_soup();
        let out = tetrahedralize(&v, &f, &quick_cfg()).unwrap();
        // a flat non-manifold soup bounds no volume
        assert!(total_volume(&out) < 1e-6);
    }

    #[test]
    fn overlapping_cubes_cover_their_union() {
        let (mut v, mut f) = unit_cube_soup();
        let (v2, f2) = unit_cube_soup();
        let base = v.len();
        v.extend(v2.iter().map(|p| [p[0] + 0.75, p[1] + 0.75, p[2] + 0.75]));
        f.extend(f2.iter().map(|t| t.map(|i| i + base)));

        let cfg = Config {
            max_num_passes: 2,
            ..quick_cfg()
        };
        let out = tetrahedralize(&v, &f, &cfg).unwrap();

        let union = 2.0 - 0.25f64.powi(3);
        let volume = total_volume(&out);
        assert!(
            (volume - union).abs() <= union * 0.01,
            "volume {volume} vs union {union}"
        );
    }

    #[test]
    fn open_cube_is_meshed_with_and_without_boundary_smoothing() {
        let (v, mut f) = unit_cube_soup();
        // remove the two triangles of the top face
        f.retain(|t| !(v[t[0]][2] == 1.0 && v[t[1]][2] == 1.0 && v[t[2]][2] == 1.0));

        for smooth_open_boundary in [false, true] {
            let cfg = Config {
                smooth_open_boundary,
                ..quick_cfg()
            };
            let out = tetrahedralize(&v, &f, &cfg).unwrap();

            // the winding number stays above 1/2 in most of the open box
            let volume = total_volume(&out);
            assert!((0.6..=1.05).contains(&volume), "volume {volume}");
            for &a in &out.min_dihedral {
                assert!(a > 0.0 && a < std::f64::consts::PI);
            }
        }
    }

    #[test]
    fn pass_limit_is_a_warning_not_an_error() {
        let (v, f) = unit_tet_soup();
        let cfg = Config {
            use_voxel_stuffing: false,
            max_num_passes: 1,
            eps_rel: 50.0,
            // nothing reaches an energy below 1, so the budget must run out
            filter_energy_thres: 0.5,
            delta_energy_thres: 0.0,
            ..Config::default()
        };
        let out = tetrahedralize(&v, &f, &cfg).unwrap();
        assert_eq!(out.warning, Some(MeshWarning::PassLimitExceeded));
        assert!(!out.tets.is_empty());
    }

    #[test]
    fn winding_filter_is_idempotent_on_output() {
        let (v, f) = unit_cube_soup();
        let out = tetrahedralize(&v, &f, &quick_cfg()).unwrap();

        // re-filtering the output against the same soup removes nothing
        for t in &out.tets {
            let b = [
                (out.vertices[t[0]][0]
                    + out.vertices[t[1]][0]
                    + out.vertices[t[2]][0]
                    + out.vertices[t[3]][0])
                    / 4.0,
                (out.vertices[t[0]][1]
                    + out.vertices[t[1]][1]
                    + out.vertices[t[2]][1]
                    + out.vertices[t[3]][1])
                    / 4.0,
                (out.vertices[t[0]][2]
                    + out.vertices[t[1]][2]
                    + out.vertices[t[2]][2]
                    + out.vertices[t[3]][2])
                    / 4.0,
            ];
            assert!(filter::winding_number(&b, &v, &f) > 0.5);
        }
    }

    #[test]
    fn sphere_end_to_end() {
        let (v, f) = unit_sphere_soup(1);
        let out = tetrahedralize(&v, &f, &quick_cfg()).unwrap();

        assert!(out.tets.len() >= 50, "{} tets", out.tets.len());
        for &a in &out.min_dihedral {
            assert!(a > 0.0 && a < std::f64::consts::PI);
        }

        // the tet mesh fills the polyhedron up to the envelope slack
        let soup_volume: f64 = f
            .iter()
            .map(|t| {
                tet_volume(&[[0.0, 0.0, 0.0], v[t[0]], v[t[1]], v[t[2]]])
            })
            .sum();
        let volume = total_volume(&out);
        assert!(
            (volume - soup_volume).abs() < soup_volume * 0.05,
            "volume {volume} vs soup {soup_volume}"
        );
    }

    #[test]
    #[ignore]
    // scenario-sized sphere; run with --ignored when time allows
    fn sphere_1024_quality_bounds() {
        let (v, f) = unit_sphere_soup(3);
        assert!(f.len() >= 1024);

        let out = tetrahedralize(&v, &f, &Config::default()).unwrap();
        let nv = out.vertices.len();
        assert!((200..=20000).contains(&nv), "{nv} vertices");
        for &a in &out.min_dihedral {
            assert!(a > 5f64.to_radians());
        }
    }
}
