pub const FLAG_EVALUATIONS_COUNTER: &str = "rollout_flag_evaluations_total";
pub const FLAG_MUTATIONS_COUNTER: &str = "rollout_flag_mutations_total";
pub const STORAGE_ERRORS_COUNTER: &str = "rollout_storage_errors_total";
