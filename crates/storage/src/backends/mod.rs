//! Storage client implementations.

pub mod s3;
