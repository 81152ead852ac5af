#![no_main]

use greta::{tetrahedralize, Config, MeshError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (Vec<[f64; 3]>, Vec<[u8; 3]>)| {
    let (vertices, raw_faces) = data;

    // small soups only; indices are folded into range so most inputs are valid
    if vertices.is_empty() || vertices.len() > 24 || raw_faces.len() > 16 {
        return;
    }
    let n = vertices.len();
    let faces: Vec<[usize; 3]> = raw_faces
        .iter()
        .map(|f| [f[0] as usize % n, f[1] as usize % n, f[2] as usize % n])
        .collect();

    let cfg = Config {
        use_voxel_stuffing: false,
        max_num_passes: 2,
        eps_rel: 100.0,
        ..Config::default()
    };

    match tetrahedralize(&vertices, &faces, &cfg) {
        Ok(out) => {
            assert_eq!(out.tets.len(), out.min_dihedral.len());
            for tet in &out.tets {
                for &v in tet {
                    assert!(v < out.vertices.len());
                }
            }
            for &a in &out.min_dihedral {
                assert!(a > 0.0 && a < std::f64::consts::PI);
            }
        }
        Err(MeshError::InputInvalid(_) | MeshError::EmptyInput) => {}
        Err(MeshError::EnvelopeInfeasible(_)) => {}
    }
});
