//! Utility types for encoding/decoding SMB1 wire structures with `binrw`.

pub mod pos_marker;
pub mod prelude {
    pub use super::pos_marker::PosMarker;
}
