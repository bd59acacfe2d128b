use std::collections::HashMap;
use lazy_static::lazy_static;

pub const LISTEN_ADDR: [u8; 4] = [127, 0, 0, 1];
pub const LISTEN_PORT: u16 = 3030;
pub const DEFAULT_CALLS_PER_SECOND: f64 = 1.0; // applies until set_rate_limit is called
pub const REQUEST_TIMEOUT_SECS: u64 = 30; // per outbound call
pub const MAX_IN_FLIGHT: usize = 8; // outbound worker pool bound, all managers combined

lazy_static! {
    pub static ref VALID_AUTH_TOKENS: HashMap<String, String> = {
        let mut m = HashMap::new();
        m.insert("example-token".to_string(), "example-user".to_string());
        m
    };
}
