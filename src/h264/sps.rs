//! Sequence Parameter Set decoding
//!
//! Decodes only the fields needed to reach the picture geometry. The field
//! model is a simplified one: `level_idc` is read as `ue(v)`, `chroma_format_idc`
//! is only consumed when the next bit is set, and `num_ref_frames` plus
//! `gaps_in_frame_num_value_allowed_flag` are single-bit skips. Streams from
//! the cameras this was written against decode correctly; a full H.264 SPS
//! parser would not treat those fields this way.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::bits::BitCursor;
use super::nal::extract_sps;
use super::H264Error;

/// Decoded picture geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpsInfo {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for SpsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decode one SPS NAL unit (header byte included, start code excluded)
///
/// Any exhaustion or malformed field aborts the whole decode.
pub fn decode_sps(nal: &[u8]) -> Result<SpsInfo, H264Error> {
    let mut r = BitCursor::new(nal);

    r.skip_bits(8)?; // NAL header
    let _profile_idc = r.read_bits(8)?;
    r.skip_bits(8)?; // constraint_set flags + reserved_zero_2bits
    let _level_idc = r.read_ue()?;
    let _seq_parameter_set_id = r.read_ue()?;

    let mut chroma_format_idc = 1;
    if r.peek_bit()? {
        chroma_format_idc = r.read_ue()?;
    }
    if chroma_format_idc == 3 {
        r.skip_bits(1)?; // separate_colour_plane_flag
    }

    let _bit_depth_luma_minus8 = r.read_ue()?;
    let _bit_depth_chroma_minus8 = r.read_ue()?;
    r.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag

    if r.read_bit()? {
        for i in 0..8 {
            if r.read_bit()? {
                skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
            }
        }
    }

    let _log2_max_frame_num_minus4 = r.read_ue()?;
    let _pic_order_cnt_type = r.read_ue()?;
    let _log2_max_pic_order_cnt_lsb_minus4 = r.read_ue()?;
    r.skip_bits(1)?; // num_ref_frames
    r.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = i64::from(r.read_ue()?) + 1;
    let pic_height_in_map_units = i64::from(r.read_ue()?) + 1;
    let frame_mbs_only = i64::from(r.read_bit()?);
    if frame_mbs_only == 0 {
        r.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    r.skip_bits(1)?; // direct_8x8_inference_flag

    let (mut left, mut right, mut top, mut bottom) = (0i64, 0i64, 0i64, 0i64);
    if r.read_bit()? {
        left = i64::from(r.read_ue()?);
        right = i64::from(r.read_ue()?);
        top = i64::from(r.read_ue()?);
        bottom = i64::from(r.read_ue()?);
    }

    let width = pic_width_in_mbs * 16 - (left + right) * 2;
    let height = pic_height_in_map_units * 16 * (2 - frame_mbs_only) - (top + bottom) * 2;

    if width <= 0 || height <= 0 {
        return Err(H264Error::MalformedSps("cropping exceeds picture size"));
    }

    Ok(SpsInfo {
        width: u32::try_from(width).map_err(|_| H264Error::MalformedSps("width out of range"))?,
        height: u32::try_from(height)
            .map_err(|_| H264Error::MalformedSps("height out of range"))?,
    })
}

/// Consume a scaling list; the values themselves are not needed
fn skip_scaling_list(r: &mut BitCursor<'_>, size: usize) -> Result<(), H264Error> {
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;

    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = i64::from(r.read_se()?);
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// `decode_sps` with the reason dropped
pub fn parse_sps(nal: &[u8]) -> Option<SpsInfo> {
    decode_sps(nal).ok()
}

/// Find the first SPS in an Annex-B frame and decode it
pub fn sps_from_frame(frame: &[u8]) -> Option<SpsInfo> {
    extract_sps(frame).and_then(parse_sps)
}
