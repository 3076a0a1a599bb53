// Forward and inverse 8x8 DCT, plus quantization.
//
// Both transform directions use the Q14 cosine matrix from consts.rs,
// applied row-then-column with rounding after each 1-D pass. The inverse
// also folds in dequantization and the frequency post-weight window, so
// encoder reconstruction and decoder output go through identical code.

use crate::consts::*;
use crate::util::*;

// One rounded Q14 multiply-accumulate pass over 8 samples
fn dot8(coeffs: &[i32; 8], r: &[i32; 8]) -> i32 {
  let mut s = 0i64;
  for x in 0..8 {
    s += coeffs[x] as i64 * r[x] as i64;
  }
  ((s + (1i64 << (COS_SHIFT - 1))) >> COS_SHIFT) as i32
}

fn fdct8x8(rows: &[[i32; 8]; 8], out: &mut [i32; 64]) {
  let mut tmp = [0i32; 64];
  for y in 0..8 {
    for u in 0..8 {
      tmp[y * 8 + u] = dot8(&COS8[u], &rows[y]);
    }
  }
  for u in 0..8 {
    let mut col = [0i32; 8];
    for y in 0..8 {
      col[y] = tmp[y * 8 + u];
    }
    for v in 0..8 {
      out[v * 8 + u] = dot8(&COS8[v], &col);
    }
  }
}

// Forward DCT of an 8x8 block of pixels, with the usual -128 level shift
pub fn fdct8x8_u8(src: &[u8], stride: usize, out: &mut [i32; 64]) {
  let mut rows = [[0i32; 8]; 8];
  for y in 0..8 {
    for x in 0..8 {
      rows[y][x] = src[y * stride + x] as i32 - 128;
    }
  }
  fdct8x8(&rows, out);
}

// Forward DCT of an 8x8 block of signed residuals
pub fn fdct8x8_s16(src: &[i16; 64], out: &mut [i32; 64]) {
  let mut rows = [[0i32; 8]; 8];
  for y in 0..8 {
    for x in 0..8 {
      rows[y][x] = src[y * 8 + x] as i32;
    }
  }
  fdct8x8(&rows, out);
}

// Plain rounded division for the DC coefficient
pub fn quant_dc(f: i32, qstep: i32) -> i16 {
  div_round(f, qstep)
}

// Dead-zone quantizer for AC coefficients: values inside the enlarged
// zero bin are dropped, everything else is rounded division
pub fn quant_ac_deadzone(f: i32, qstep: i32, dz_num: i32, dz_den: i32) -> i16 {
  let a = f.abs();
  let t0 = (qstep * dz_num + dz_den) / (2 * dz_den);
  if a <= t0 {
    return 0;
  }
  div_round(f, qstep)
}

// Quantize a full raster-order coefficient block
pub fn quantize_block(f: &[i32; 64], q: &[u8; 64], dz_num: i32, dz_den: i32) -> [i16; 64] {
  let mut cq = [0i16; 64];
  cq[0] = quant_dc(f[0], q[0] as i32);
  for i in 1..64 {
    cq[i] = quant_ac_deadzone(f[i], q[i] as i32, dz_num, dz_den);
  }
  cq
}

// Dequantize, then apply the Q8 post-weight window
fn dequant_weighted(qcoef: &[i16; 64], q: &[u8; 64], w8: &[u16; 64]) -> [i32; 64] {
  let mut f = [0i32; 64];
  for i in 0..64 {
    let t = qcoef[i] as i64 * q[i] as i64 * w8[i] as i64;
    f[i] = ((t + 128) >> 8) as i32;
  }
  f
}

fn idct8x8(f: &[i32; 64], out: &mut [i32; 64]) {
  let mut tmp = [0i32; 64];
  for u in 0..8 {
    let mut col = [0i32; 8];
    for v in 0..8 {
      col[v] = f[v * 8 + u];
    }
    for y in 0..8 {
      let mut basis = [0i32; 8];
      for v in 0..8 {
        basis[v] = COS8[v][y];
      }
      tmp[y * 8 + u] = dot8(&basis, &col);
    }
  }
  for y in 0..8 {
    let mut row = [0i32; 8];
    for u in 0..8 {
      row[u] = tmp[y * 8 + u];
    }
    for x in 0..8 {
      let mut basis = [0i32; 8];
      for u in 0..8 {
        basis[u] = COS8[u][x];
      }
      out[y * 8 + x] = dot8(&basis, &row);
    }
  }
}

// Inverse transform to pixels: dequant, post-weight, IDCT, +128, clamp
pub fn idct8x8_dequant_to_u8(qcoef: &[i16; 64], q: &[u8; 64], w8: &[u16; 64], dst: &mut [u8], stride: usize) {
  let f = dequant_weighted(qcoef, q, w8);
  let mut px = [0i32; 64];
  idct8x8(&f, &mut px);
  for y in 0..8 {
    for x in 0..8 {
      dst[y * stride + x] = clamp255(px[y * 8 + x] + 128);
    }
  }
}

// Inverse transform to a signed residual block, for inter reconstruction
pub fn idct8x8_dequant_to_s16(qcoef: &[i16; 64], q: &[u8; 64], w8: &[u16; 64], dst: &mut [i16; 64]) {
  let f = dequant_weighted(qcoef, q, w8);
  let mut px = [0i32; 64];
  idct8x8(&f, &mut px);
  for i in 0..64 {
    dst[i] = px[i] as i16;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const UNIT_Q: [u8; 64] = [1; 64];
  const UNIT_W8: [u16; 64] = [256; 64];

  #[test]
  fn flat_block_transforms_to_dc_only() {
    let src = [100u8; 64];
    let mut f = [0i32; 64];
    fdct8x8_u8(&src, 8, &mut f);
    // (100 - 128) * 8 = -224 in the DC slot, everything else ~0
    assert!((f[0] + 224).abs() <= 2);
    for i in 1..64 {
      assert!(f[i].abs() <= 2, "AC {} leaked to {}", i, f[i]);
    }
  }

  #[test]
  fn dct_then_idct_is_near_identity() {
    // Exercise the unquantized transform pair on a gradient and on a
    // checkerboard; fixed point error should stay within a couple of LSBs
    let mut grad = [0u8; 64];
    let mut check = [0u8; 64];
    for y in 0..8 {
      for x in 0..8 {
        grad[y * 8 + x] = (16 + x * 20 + y * 7) as u8;
        check[y * 8 + x] = if (x + y) & 1 == 0 { 40 } else { 210 };
      }
    }
    for src in [grad, check] {
      let mut f = [0i32; 64];
      fdct8x8_u8(&src, 8, &mut f);
      let mut cq = [0i16; 64];
      for i in 0..64 {
        cq[i] = f[i] as i16;
      }
      let mut recon = [0u8; 64];
      idct8x8_dequant_to_u8(&cq, &UNIT_Q, &UNIT_W8, &mut recon, 8);
      for i in 0..64 {
        let d = (recon[i] as i32 - src[i] as i32).abs();
        assert!(d <= 2, "pixel {} off by {}", i, d);
      }
    }
  }

  #[test]
  fn residual_transform_round_trips() {
    let mut res = [0i16; 64];
    for i in 0..64 {
      res[i] = ((i as i16) % 17) - 8;
    }
    let mut f = [0i32; 64];
    fdct8x8_s16(&res, &mut f);
    let mut cq = [0i16; 64];
    for i in 0..64 {
      cq[i] = f[i] as i16;
    }
    let mut back = [0i16; 64];
    idct8x8_dequant_to_s16(&cq, &UNIT_Q, &UNIT_W8, &mut back);
    for i in 0..64 {
      assert!((back[i] - res[i]).abs() <= 2);
    }
  }

  #[test]
  fn dead_zone_drops_small_coefficients() {
    // qstep 16, dz 53/40 gives a zero bin of (16*53 + 40) / 80 = 11
    assert_eq!(quant_ac_deadzone(11, 16, 53, 40), 0);
    assert_eq!(quant_ac_deadzone(-11, 16, 53, 40), 0);
    assert_ne!(quant_ac_deadzone(12, 16, 53, 40), 0);
    // DC has no dead zone
    assert_eq!(quant_dc(11, 16), 1);
    assert_eq!(quant_dc(-11, 16), -1);
  }
}
