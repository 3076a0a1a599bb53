// Quality presets and the derived quantization tables.
//
// Each preset is a bundle of integer ratios. The base quant matrices from
// consts.rs are reshaped at encoder/decoder construction:
//   1. boost the lowest frequencies (u+v <= 2) by edge_num/edge_den
//   2. attenuate the highest frequencies (u+v >= 8, or u or v >= 6)
//   3. scale all AC entries, then the DC entry, by their global ratios
// with every entry clamped to [1, 255]. The quant ratios travel in the
// stream header, so the decoder rebuilds the exact same tables; the RD
// and skip thresholds are encoder-only.

use crate::consts::*;
use crate::util::scale_round;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
  Min,
  Low,
  Default,
  High,
  Max
}

// The quantization ratios carried in the stream header, in header order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuantParams {
  pub ac_y_num: i32, pub ac_y_den: i32,
  pub ac_c_num: i32, pub ac_c_den: i32,
  pub dc_y_num: i32, pub dc_y_den: i32,
  pub dc_c_num: i32, pub dc_c_den: i32,
  pub edge_num: i32, pub edge_den: i32,
  pub hf_y_num: i32, pub hf_y_den: i32,
  pub hf_c_num: i32, pub hf_c_den: i32,
  pub dz_num: i32, pub dz_den: i32
}

// The full encoder-side parameter bundle for one stream
#[derive(Clone, Copy, Debug)]
pub struct QualityParams {
  pub quant: QuantParams,

  // Lagrangian lambda for mode decision, in eighths of a unit
  pub rd_lambda: i32,

  // Early-SKIP thresholds
  pub skip_luma_max: i32, pub skip_luma_sum: i32,
  pub skip_chroma_max: i32, pub skip_chroma_sum: i32,
  pub skip_luma_mean_abs_max: i32, pub skip_chroma_mean_abs_max: i32,
  pub skip_coarse_mv_margin: i32
}

impl QualityParams {
  pub fn for_quality(q: Quality) -> Self {
    match q {
      Quality::Min => QualityParams {
        quant: QuantParams {
          ac_y_num: 160, ac_y_den: 100,
          ac_c_num: 180, ac_c_den: 100,
          dc_y_num: 180, dc_y_den: 100,
          dc_c_num: 210, dc_c_den: 100,
          edge_num: 6, edge_den: 5,
          hf_y_num: 64, hf_y_den: 40,
          hf_c_num: 68, hf_c_den: 40,
          dz_num: 80, dz_den: 40
        },
        rd_lambda: 110,
        skip_luma_max: 8, skip_luma_sum: 2048,
        skip_chroma_max: 9, skip_chroma_sum: 512,
        skip_luma_mean_abs_max: 2, skip_chroma_mean_abs_max: 3,
        skip_coarse_mv_margin: 16
      },
      Quality::Low => QualityParams {
        quant: QuantParams {
          ac_y_num: 130, ac_y_den: 100,
          ac_c_num: 145, ac_c_den: 100,
          dc_y_num: 120, dc_y_den: 100,
          dc_c_num: 130, dc_c_den: 100,
          edge_num: 5, edge_den: 5,
          hf_y_num: 56, hf_y_den: 40,
          hf_c_num: 60, hf_c_den: 40,
          dz_num: 60, dz_den: 40
        },
        rd_lambda: 60,
        skip_luma_max: 3, skip_luma_sum: 384,
        skip_chroma_max: 4, skip_chroma_sum: 96,
        skip_luma_mean_abs_max: 1, skip_chroma_mean_abs_max: 1,
        skip_coarse_mv_margin: 8
      },
      Quality::Default => QualityParams {
        quant: QuantParams {
          ac_y_num: 103, ac_y_den: 100,
          ac_c_num: 109, ac_c_den: 100,
          dc_y_num: 100, dc_y_den: 100,
          dc_c_num: 100, dc_c_den: 100,
          edge_num: 4, edge_den: 5,
          hf_y_num: 47, hf_y_den: 40,
          hf_c_num: 51, hf_c_den: 40,
          dz_num: 53, dz_den: 40
        },
        rd_lambda: 42,
        skip_luma_max: 2, skip_luma_sum: 256,
        skip_chroma_max: 3, skip_chroma_sum: 64,
        skip_luma_mean_abs_max: 0, skip_chroma_mean_abs_max: 1,
        skip_coarse_mv_margin: 6
      },
      Quality::High => QualityParams {
        quant: QuantParams {
          ac_y_num: 70, ac_y_den: 100,
          ac_c_num: 75, ac_c_den: 100,
          dc_y_num: 100, dc_y_den: 100,
          dc_c_num: 100, dc_c_den: 100,
          edge_num: 3, edge_den: 5,
          hf_y_num: 43, hf_y_den: 40,
          hf_c_num: 45, hf_c_den: 40,
          dz_num: 40, dz_den: 40
        },
        rd_lambda: 28,
        skip_luma_max: 1, skip_luma_sum: 128,
        skip_chroma_max: 2, skip_chroma_sum: 32,
        skip_luma_mean_abs_max: 0, skip_chroma_mean_abs_max: 0,
        skip_coarse_mv_margin: 3
      },
      Quality::Max => QualityParams {
        quant: QuantParams {
          ac_y_num: 50, ac_y_den: 100,
          ac_c_num: 55, ac_c_den: 100,
          dc_y_num: 100, dc_y_den: 100,
          dc_c_num: 100, dc_c_den: 100,
          edge_num: 2, edge_den: 5,
          hf_y_num: 41, hf_y_den: 40,
          hf_c_num: 43, hf_c_den: 40,
          dz_num: 20, dz_den: 40
        },
        rd_lambda: 18,
        skip_luma_max: 0, skip_luma_sum: 64,
        skip_chroma_max: 1, skip_chroma_sum: 16,
        skip_luma_mean_abs_max: 0, skip_chroma_mean_abs_max: 0,
        skip_coarse_mv_margin: 2
      }
    }
  }
}

fn reshape_one(dst: &mut [u8; 64], edge_num: i32, edge_den: i32, hf_num: i32, hf_den: i32) {
  for i in 1..64 {
    let u = (i & 7) as i32;
    let v = (i >> 3) as i32;
    let s = u + v;
    let mut q = dst[i] as i32;
    if s <= 2 {
      q = scale_round(q, edge_num, edge_den).max(1);
    } else if s >= 8 || u >= 6 || v >= 6 {
      q = scale_round(q, hf_num, hf_den).min(255);
    }
    dst[i] = q as u8;
  }
}

// Build the per-stream luma and chroma quant tables from the ratios
pub fn build_quants(qp: &QuantParams) -> ([u8; 64], [u8; 64]) {
  let mut qy = QUANT_BASE_Y;
  let mut qc = QUANT_BASE_C;
  reshape_one(&mut qy, qp.edge_num, qp.edge_den, qp.hf_y_num, qp.hf_y_den);
  reshape_one(&mut qc, qp.edge_num, qp.edge_den, qp.hf_c_num, qp.hf_c_den);

  qy[0] = scale_round(qy[0] as i32, qp.dc_y_num, qp.dc_y_den).clamp(1, 255) as u8;
  qc[0] = scale_round(qc[0] as i32, qp.dc_c_num, qp.dc_c_den).clamp(1, 255) as u8;
  for i in 1..64 {
    qy[i] = scale_round(qy[i] as i32, qp.ac_y_num, qp.ac_y_den).clamp(1, 255) as u8;
    qc[i] = scale_round(qc[i] as i32, qp.ac_c_num, qp.ac_c_den).clamp(1, 255) as u8;
  }
  (qy, qc)
}

// Frequency post-weight window in Q8 fixed point, applied after
// dequantization. Low frequencies pass through unchanged; the weight
// tapers as u+v grows, with an extra cut on the last two rows/columns.
pub fn build_window() -> [u16; 64] {
  const W_SOFT: i32 = 240;
  const W_MID: i32 = 212;
  const W_HIGH: i32 = 190;
  const W_XHI: i32 = 176;
  let mut w8 = [0u16; 64];
  for v in 0..8 {
    for u in 0..8 {
      let s = u + v;
      let w = if s <= 2 {
        256
      } else if s <= 4 {
        W_SOFT
      } else if s <= 6 {
        W_MID
      } else if u >= 6 || v >= 6 {
        (W_HIGH * W_XHI + 128) >> 8
      } else {
        W_HIGH
      };
      w8[v * 8 + u] = w as u16;
    }
  }
  w8
}
