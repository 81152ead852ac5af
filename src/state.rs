use crate::config::Config;

/// Substages per retry stage of the envelope ramp.
const SUBSTAGES_PER_STAGE: u32 = 5;

/// The mutable state threaded through the refinement stages.
///
/// This replaces the process-wide singleton of comparable meshers: every stage
/// is a function of (inputs, state) and the engine owns the single instance.
#[derive(Debug, Clone)]
pub struct RefineState {
    /// Full envelope tolerance requested by the caller.
    pub eps_input: f64,
    /// Tolerance of the current sub-stage, ramps toward `eps_input`.
    pub eps: f64,
    pub eps_delta: f64,
    /// Density at which surface triangles are sampled for envelope tests.
    pub sampling_dist: f64,
    /// Uniform target edge length; per-vertex scales refine it locally.
    pub target_edge_len: f64,
    pub sub_stage: u32,
    pub bbox_diag: f64,
    pub is_mesh_closed: bool,
}

impl RefineState {
    pub fn new(cfg: &Config, bbox_diag: f64, is_mesh_closed: bool) -> Self {
        let eps_input = bbox_diag / cfg.eps_rel;
        let stage = cfg.stage.max(1);
        let sampling_dist = match cfg.sampling_dist_rel {
            Some(rel) => bbox_diag / rel,
            None => eps_input / 2f64.sqrt(),
        };

        Self {
            eps_input,
            eps: eps_input / stage as f64,
            eps_delta: eps_input / (SUBSTAGES_PER_STAGE * stage) as f64,
            sampling_dist,
            target_edge_len: bbox_diag / cfg.initial_edge_len_rel,
            sub_stage: 1,
            bbox_diag,
            is_mesh_closed,
        }
    }

    /// Widen the envelope by one sub-stage. Returns whether it changed.
    pub fn advance_sub_stage(&mut self) -> bool {
        if self.eps >= self.eps_input {
            return false;
        }
        self.eps = (self.eps + self.eps_delta).min(self.eps_input);
        self.sub_stage += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stage_starts_at_full_eps() {
        let state = RefineState::new(&Config::default(), 1000.0, true);
        assert_eq!(state.eps, state.eps_input);
        assert_eq!(state.eps, 1.0);
        assert_eq!(state.target_edge_len, 50.0);
    }

    #[test]
    fn retry_stage_ramps_up_to_full_eps() {
        let cfg = Config {
            stage: 2,
            ..Config::default()
        };
        let mut state = RefineState::new(&cfg, 1000.0, true);
        assert_eq!(state.eps, 0.5);

        let mut steps = 0;
        while state.advance_sub_stage() {
            steps += 1;
            assert!(state.eps <= state.eps_input);
        }
        assert_eq!(state.eps, state.eps_input);
        assert_eq!(steps, 5);
    }
}
