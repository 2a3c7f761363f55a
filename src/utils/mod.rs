pub mod utils_time;

pub use utils_time::{age_ms, current_time_ms};
