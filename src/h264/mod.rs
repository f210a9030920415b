//! H.264 elementary stream parsing
//!
//! Just enough of the bitstream to answer "what resolution is this camera
//! sending":
//! - `bits` - bit-granular reader with Exp-Golomb decoding
//! - `nal` - Annex-B start code scanning
//! - `sps` - Sequence Parameter Set decoding to picture width/height
//!
//! Nothing here allocates per frame and nothing here fails loudly: callers get
//! an `H264Error` or `None` and decide what "insufficient data" means for them.

pub mod bits;
pub mod nal;
pub mod sps;

pub use bits::BitCursor;
pub use nal::{extract_sps, locate, NalScanner, NalUnit, NAL_TYPE_IDR, NAL_TYPE_SPS};
pub use sps::{decode_sps, parse_sps, sps_from_frame, SpsInfo};

use thiserror::Error;

/// Bitstream parsing errors
///
/// None of these are fatal; they mean the payload was truncated or corrupt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum H264Error {
    #[error("bitstream exhausted at bit {position} (wanted {wanted} more)")]
    BitstreamExhausted { position: usize, wanted: usize },

    #[error("exp-golomb value does not fit ({zeros} leading zeros)")]
    ExpGolombOverflow { zeros: u32 },

    #[error("malformed SPS: {0}")]
    MalformedSps(&'static str),
}
