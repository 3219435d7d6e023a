use std::time::Duration;

pub const POLL_INTERVAL_MS: u64 = 20;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DATASET_1: &str = "d1";
#[allow(dead_code)]
pub const DATASET_2: &str = "d2";
#[allow(dead_code)]
pub const HUNT_1: &str = "hunt-1";
