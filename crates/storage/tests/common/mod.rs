pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{MIB, seeded_bytes, sha256_hash, upload_config};
#[allow(unused_imports)]
pub use mocks::{RecordedPart, RecordingClient};
