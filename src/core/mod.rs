pub mod cache;
pub mod distance;
pub mod fingerprint;
pub mod grouping;
pub mod library;
