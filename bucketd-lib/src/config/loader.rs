use std::fs;
use std::path::Path;

use crate::address::MAX_ADDRESS_LEN;
use crate::config::Config;
use crate::error::{BucketError, Result};
use crate::rate_limit::is_prime;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| BucketError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| BucketError::Config(format!("Failed to parse config: {e}")))?;

    validate(&cfg)?;

    Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
    if !cfg.listen.is_ipv4() {
        return Err(BucketError::Config(format!(
            "Only IPv4 listen addresses are supported: {}",
            cfg.listen
        )));
    }
    if cfg.bucket.max_tokens == 0 {
        return Err(BucketError::Config("bucket.max_tokens must be > 0".into()));
    }
    if cfg.bucket.refill_tokens == 0 {
        return Err(BucketError::Config("bucket.refill_tokens must be > 0".into()));
    }
    if cfg.bucket.refill_interval_ms == 0 {
        return Err(BucketError::Config("bucket.refill_interval_ms must be > 0".into()));
    }
    if cfg.queue.capacity == 0 {
        return Err(BucketError::Config("queue.capacity must be > 0".into()));
    }
    if cfg.queue.max_message_len <= MAX_ADDRESS_LEN {
        return Err(BucketError::Config(format!(
            "queue.max_message_len must be > {MAX_ADDRESS_LEN} to hold an IPv4 address and its terminator"
        )));
    }
    if cfg.table.capacity < 3 || !is_prime(cfg.table.capacity) {
        return Err(BucketError::Config(format!(
            "table.capacity must be a prime >= 3, got {}",
            cfg.table.capacity
        )));
    }
    Ok(())
}
