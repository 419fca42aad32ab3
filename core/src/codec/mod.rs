pub mod compression;
pub mod encryption;
pub mod snapshot_codec;

pub use snapshot_codec::SnapshotCodec;
