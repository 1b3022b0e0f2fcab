pub mod assignment;
pub mod backoff;
pub mod status;
