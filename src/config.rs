use crate::utils::types::Vertex3;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tuning knobs of the pipeline. All fields have usable defaults; most are
/// relative to the input's bounding-box diagonal so the same configuration
/// works across scales.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target edge length = bbox diagonal / this.
    pub initial_edge_len_rel: f64,
    /// Envelope tolerance ε = bbox diagonal / this.
    pub eps_rel: f64,
    /// Sampling density = bbox diagonal / this; `None` derives ε/√2.
    pub sampling_dist_rel: Option<f64>,
    /// Retry index; raising it starts the envelope ramp tighter and narrows
    /// its increments.
    pub stage: u32,
    /// Local shrink factor applied to the target-length field on stalls.
    pub adaptive_scalar: f64,
    /// Optimization stops once every tet's energy is below this.
    pub filter_energy_thres: f64,
    /// A pass that moves max and mean energy by less than this is a stall.
    pub delta_energy_thres: f64,
    pub max_num_passes: u32,
    /// Seed the Delaunay stage with interior voxel points.
    pub use_voxel_stuffing: bool,
    /// Allow smoothing of open-hole rims instead of freezing them.
    pub smooth_open_boundary: bool,
    /// Steer the vertex count toward this value (±5%); `None` leaves it free.
    pub target_num_vertices: Option<usize>,
    /// Optional background sizing field capping the target edge length.
    pub background_mesh: Option<SizingMesh>,
    /// Collapse acceptance compares max energy (`true`) or total energy.
    pub use_energy_max: bool,
    /// Smooth surface vertices onto the one-ring plane instead of projecting
    /// them back onto the input surface.
    pub use_onering_projection: bool,
    /// Checked between optimization passes; see [CancelToken].
    pub cancel: Option<CancelToken>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_edge_len_rel: 20.0,
            eps_rel: 1000.0,
            sampling_dist_rel: None,
            stage: 1,
            adaptive_scalar: 0.6,
            filter_energy_thres: 10.0,
            delta_energy_thres: 0.1,
            max_num_passes: 80,
            use_voxel_stuffing: true,
            smooth_open_boundary: false,
            target_num_vertices: None,
            background_mesh: None,
            use_energy_max: true,
            use_onering_projection: false,
            cancel: None,
        }
    }
}

/// A tet mesh with a per-vertex sizing value, sampled by barycentric
/// interpolation to cap the adaptive target-length field. Tets are expected
/// positively oriented.
#[derive(Debug, Clone)]
pub struct SizingMesh {
    pub vertices: Vec<Vertex3>,
    pub tets: Vec<[usize; 4]>,
    /// Desired edge length at each vertex.
    pub sizes: Vec<f64>,
}

/// Cooperative cancellation handle. The engine only checks it at pass
/// boundaries, so a cancelled run still returns the last valid mesh.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pipeline stages reported through the progress callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProgressStep {
    Preprocess,
    Delaunay,
    FaceMatching,
    Bsp,
    Tetra,
    Optimize,
}
