// Top-level encoder: frame type decision, macroblock mode decision, and
// the container framing around each coded frame.
//
// Every frame is serialized into `bitstream`, DEFLATE-compressed, and
// appended to `out` behind a pair of little-endian length fields. The
// caller gets a borrow of `out`, so the data is valid exactly until the
// next call on the same encoder.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::debug;

use crate::consts::*;
use crate::error::CodecError;
use crate::filter::{deblock_plane, dering_luma};
use crate::frame::{Frame, Plane};
use crate::mc::*;
use crate::me::{sad_block_clamped, search_best_mv16x16, SearchPlanes};
use crate::quality::{build_quants, build_window, Quality, QualityParams};
use crate::refresh::RefreshMap;
use crate::rle::*;
use crate::scenecut::{cut_metrics, is_cut};
use crate::txfm::*;

// Full-pel search radius for motion estimation
const SEARCH_RAD: i32 = 96;

// Minimum number of P frames between scene-cut keyframes
const MIN_KEYFRAME_GAP: u32 = 10;

// Running totals, updated after every successfully emitted frame
#[derive(Clone, Copy, Debug, Default)]
pub struct EncoderStats {
  pub frames_total: u64,
  pub frames_i: u64,
  pub frames_p: u64,
  pub bytes_raw_total: u64,
  pub bytes_compressed_total: u64
}

pub struct Encoder {
  w: usize,
  h: usize,
  fps_n: i32,
  fps_d: i32,
  sar_n: i32,
  sar_d: i32,
  qp: QualityParams,
  qy: [u8; 64],
  qc: [u8; 64],
  w8: [u16; 64],

  // Reconstruction of the current frame, and the previous one
  recon: Frame,
  reference: Frame,

  // Downsampled luma pyramid for motion search and cut detection
  cur2: Plane,
  ref2: Plane,
  cur4: Plane,
  ref4: Plane,

  // RGB conversion staging
  conv: Frame,

  bitstream: Vec<u8>,
  out: Vec<u8>,

  mb_w: usize,
  cir: RefreshMap,
  cir_frame: u16,
  frames_since_last_i: u32,
  fidx: u64,
  wrote_header: bool,
  finalized: bool,
  stats: EncoderStats
}

fn neutral_for_plane(is_luma: bool) -> u8 {
  if is_luma { 16 } else { 128 }
}

// Result of trial-coding one 8x8 block as intra
struct IntraTrial {
  zzq: [i16; 64],
  recon: [u8; 64],
  rle_bytes: i32,
  sse: i64
}

// Result of trial-coding one 8x8 block as an inter residual
struct InterTrial {
  zzq: [i16; 64],
  add: [i16; 64],
  rle_bytes: i32,
  sse: i64
}

fn trial_intra_block(src: &[u8], stride: usize, qt: &[u8; 64], w8: &[u16; 64],
                     qp: &QualityParams, bwid: usize, bhgt: usize) -> IntraTrial {
  let mut f = [0i32; 64];
  fdct8x8_u8(src, stride, &mut f);
  let cq = quantize_block(&f, qt, qp.quant.dz_num, qp.quant.dz_den);
  let zzq = to_zigzag(&cq);
  let mut recon = [0u8; 64];
  idct8x8_dequant_to_u8(&cq, qt, w8, &mut recon, 8);
  let mut sse = 0i64;
  for by in 0..bhgt {
    for bx in 0..bwid {
      let d = src[by * stride + bx] as i64 - recon[by * 8 + bx] as i64;
      sse += d * d;
    }
  }
  IntraTrial {
    zzq: zzq,
    recon: recon,
    rle_bytes: rle_len_est(&zzq),
    sse: sse
  }
}

fn trial_inter_block(cur: &[u8; 64], pred: &[u8; 64], qt: &[u8; 64], w8: &[u16; 64],
                     qp: &QualityParams, is_luma: bool, bwid: usize, bhgt: usize) -> InterTrial {
  let small_th = if is_luma { 1 } else { 2 };
  let mut r = [0i16; 64];
  let mut maxabs = 0;
  for y in 0..8 {
    for x in 0..8 {
      if y < bhgt && x < bwid {
        let d = cur[y * 8 + x] as i32 - pred[y * 8 + x] as i32;
        r[y * 8 + x] = d as i16;
        maxabs = maxabs.max(d.abs());
      }
    }
  }

  // Residuals this small never survive quantization; skip the transform
  // and code the block as all-zero
  if maxabs <= small_th {
    let mut sse = 0i64;
    for by in 0..bhgt {
      for bx in 0..bwid {
        let d = r[by * 8 + bx] as i64;
        sse += d * d;
      }
    }
    return InterTrial {
      zzq: [0; 64],
      add: [0; 64],
      rle_bytes: 5,
      sse: sse
    };
  }

  let mut f = [0i32; 64];
  fdct8x8_s16(&r, &mut f);
  let mut cq = quantize_block(&f, qt, qp.quant.dz_num, qp.quant.dz_den);

  // Post-quantization safety net: a block that barely has any signal
  // left is cheaper as all-zero
  let mut sum_ac = 0;
  for i in 1..64 {
    sum_ac += (cq[i] as i32).abs();
    if sum_ac > 2 {
      break;
    }
  }
  if sum_ac <= 2 && (cq[0] as i32).abs() <= 1 {
    cq = [0; 64];
  }

  let zzq = to_zigzag(&cq);
  let mut add = [0i16; 64];
  idct8x8_dequant_to_s16(&cq, qt, w8, &mut add);
  let mut sse = 0i64;
  for by in 0..bhgt {
    for bx in 0..bwid {
      let d = r[by * 8 + bx] as i64 - add[by * 8 + bx] as i64;
      sse += d * d;
    }
  }
  InterTrial {
    zzq: zzq,
    add: add,
    rle_bytes: rle_len_est(&zzq),
    sse: sse
  }
}

// Code one full 8x8 block as intra and reconstruct it in place
fn encode_block_intra(bitstream: &mut Vec<u8>, src: &[u8], stride: usize, qt: &[u8; 64],
                      w8: &[u16; 64], recon: &mut [u8], rstride: usize, qp: &QualityParams) {
  let mut f = [0i32; 64];
  fdct8x8_u8(src, stride, &mut f);
  let cq = quantize_block(&f, qt, qp.quant.dz_num, qp.quant.dz_den);
  let zzq = to_zigzag(&cq);
  rle_write(bitstream, &zzq);
  idct8x8_dequant_to_u8(&cq, qt, w8, recon, rstride);
}

// Code a whole plane of an I frame in 8x8 raster order. Partial blocks
// at the right/bottom edges are padded with the plane's neutral value
// and only the valid region is stored back.
fn encode_plane_intra(bitstream: &mut Vec<u8>, src: &[u8], w: usize, h: usize, qt: &[u8; 64],
                      w8: &[u16; 64], recon: &mut [u8], qp: &QualityParams, is_luma: bool) {
  for y in (0..h).step_by(8) {
    for x in (0..w).step_by(8) {
      let bwid = (w - x).min(8);
      let bhgt = (h - y).min(8);
      if bwid == 8 && bhgt == 8 {
        encode_block_intra(bitstream, &src[y * w + x..], w, qt, w8, &mut recon[y * w + x..], w, qp);
      } else {
        let fill = neutral_for_plane(is_luma);
        let mut s8 = [fill; 64];
        for by in 0..bhgt {
          for bx in 0..bwid {
            s8[by * 8 + bx] = src[(y + by) * w + x + bx];
          }
        }
        let mut r8 = [0u8; 64];
        encode_block_intra(bitstream, &s8, 8, qt, w8, &mut r8, 8, qp);
        store_block(recon, w, h, x, y, &r8);
      }
    }
  }
}

pub fn make_cbp6(zz_y: &[[i16; 64]; 4], zz_u: &[i16; 64], zz_v: &[i16; 64]) -> u8 {
  let mut cbp = 0u8;
  for i in 0..4 {
    if !all_zero(&zz_y[i]) {
      cbp |= 1 << i;
    }
  }
  if !all_zero(zz_u) {
    cbp |= 1 << 4;
  }
  if !all_zero(zz_v) {
    cbp |= 1 << 5;
  }
  cbp
}

// BT.601 studio-range RGB to YUV
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
  (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

fn rgb_to_u(r: i32, g: i32, b: i32) -> i32 {
  (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255)
}

fn rgb_to_v(r: i32, g: i32, b: i32) -> i32 {
  (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255)
}

// Convert packed R,G,B,X bytes to planar YUV 4:2:0 with a 2x2 box
// downsample for chroma
fn xbgr_to_yuv420(px: &[u8], w: usize, h: usize, dst: &mut Frame) {
  for y in 0..h {
    let row = &px[y * w * 4..(y + 1) * w * 4];
    let yrow = &mut dst.y.data[y * w..(y + 1) * w];
    for x in 0..w {
      yrow[x] = rgb_to_y(row[x * 4] as i32, row[x * 4 + 1] as i32, row[x * 4 + 2] as i32);
    }
  }
  let cw = w / 2;
  for y in (0..h).step_by(2) {
    let y1 = (y + 1).min(h - 1);
    let r0 = &px[y * w * 4..(y + 1) * w * 4];
    let r1 = &px[y1 * w * 4..(y1 + 1) * w * 4];
    for x in (0..w).step_by(2) {
      let x1 = (x + 1).min(w - 1);
      let mut u = 0;
      let mut v = 0;
      for (row, col) in [(r0, x), (r0, x1), (r1, x), (r1, x1)] {
        let (r, g, b) = (row[col * 4] as i32, row[col * 4 + 1] as i32, row[col * 4 + 2] as i32);
        u += rgb_to_u(r, g, b);
        v += rgb_to_v(r, g, b);
      }
      dst.u.data[(y >> 1) * cw + (x >> 1)] = ((u + 2) >> 2).clamp(0, 255) as u8;
      dst.v.data[(y >> 1) * cw + (x >> 1)] = ((v + 2) >> 2).clamp(0, 255) as u8;
    }
  }
}

impl Encoder {
  pub fn new(width: i32, height: i32, fps_n: i32, fps_d: i32, sar_n: i32, sar_d: i32,
             quality: Quality) -> Result<Encoder, CodecError> {
    if width <= 0 || height <= 0 || width % 8 != 0 || height % 8 != 0 {
      return Err(CodecError::InvalidDimensions(width, height));
    }
    if fps_d == 0 {
      return Err(CodecError::InvalidFrameRate);
    }
    let w = width as usize;
    let h = height as usize;
    let mb_w = (w + 15) >> 4;
    let mb_h = (h + 15) >> 4;
    let qp = QualityParams::for_quality(quality);
    let (qy, qc) = build_quants(&qp.quant);

    Ok(Encoder {
      w: w,
      h: h,
      fps_n: fps_n,
      fps_d: fps_d,
      sar_n: sar_n.max(1),
      sar_d: sar_d.max(1),
      qp: qp,
      qy: qy,
      qc: qc,
      w8: build_window(),
      recon: Frame::new(w, h),
      reference: Frame::new(w, h),
      cur2: Plane::new(w / 2, h / 2, 0),
      ref2: Plane::new(w / 2, h / 2, 0),
      cur4: Plane::new(w / 4, h / 4, 0),
      ref4: Plane::new(w / 4, h / 4, 0),
      conv: Frame::new(w, h),
      bitstream: Vec::new(),
      out: Vec::new(),
      mb_w: mb_w,
      cir: RefreshMap::new(mb_w, mb_h),
      cir_frame: 0,
      frames_since_last_i: 0,
      fidx: 0,
      wrote_header: false,
      finalized: false,
      stats: EncoderStats::default()
    })
  }

  pub fn width(&self) -> usize {
    self.w
  }

  pub fn height(&self) -> usize {
    self.h
  }

  pub fn stats(&self) -> EncoderStats {
    self.stats
  }

  // Encode one frame given as packed planar YUV 4:2:0 (Y, then U, then V)
  pub fn encode_yuv420(&mut self, yuv: &[u8]) -> Result<&[u8], CodecError> {
    let ysz = self.w * self.h;
    let csz = (self.w / 2) * (self.h / 2);
    let expected = ysz + 2 * csz;
    if yuv.len() != expected {
      return Err(CodecError::BadInputSize { got: yuv.len(), expected: expected });
    }
    let (y, uv) = yuv.split_at(ysz);
    let (u, v) = uv.split_at(csz);
    self.encode_from_planes_indirect(y, u, v)?;
    Ok(&self.out)
  }

  // Encode one frame given as packed 32-bit pixels (bytes R, G, B, X)
  pub fn encode_xbgr(&mut self, xbgr: &[u8]) -> Result<&[u8], CodecError> {
    let expected = self.w * self.h * 4;
    if xbgr.len() != expected {
      return Err(CodecError::BadInputSize { got: xbgr.len(), expected: expected });
    }
    // Move the staging frame out so its planes can be borrowed while
    // the rest of the encoder is mutated
    let mut conv = std::mem::replace(&mut self.conv, Frame::new(0, 0));
    xbgr_to_yuv420(xbgr, self.w, self.h, &mut conv);
    let result = self.encode_from_planes_indirect(&conv.y.data, &conv.u.data, &conv.v.data);
    self.conv = conv;
    result?;
    Ok(&self.out)
  }

  // Write the stream header (if not yet written) and the end-of-stream
  // marker. After this the encoder accepts no more frames.
  pub fn finalize(&mut self) -> &[u8] {
    self.out.clear();
    self.write_header();
    self.out.extend_from_slice(&0u32.to_le_bytes());
    self.finalized = true;
    &self.out
  }

  fn encode_from_planes_indirect(&mut self, y: &[u8], u: &[u8], v: &[u8]) -> Result<(), CodecError> {
    if self.finalized {
      return Err(CodecError::Finalized);
    }
    self.out.clear();
    self.write_header();

    let emit_i = self.should_emit_iframe(y);
    if emit_i {
      self.encode_iframe(y, u, v);
      self.stats.frames_i += 1;
      self.frames_since_last_i = 0;
    } else {
      let group = self.cir_frame;
      self.encode_pframe(y, u, v, group);
      self.stats.frames_p += 1;
      self.frames_since_last_i += 1;
      self.cir_frame = (self.cir_frame + 1) % self.cir.groups;
    }
    self.fidx += 1;
    self.compress_and_append(emit_i)?;
    Ok(())
  }

  fn should_emit_iframe(&mut self, y: &[u8]) -> bool {
    if self.fidx == 0 {
      return true;
    }
    if self.frames_since_last_i < MIN_KEYFRAME_GAP {
      return false;
    }
    let w4 = self.w >> 2;
    let h4 = self.h >> 2;
    if w4 < 4 || h4 < 4 {
      return false;
    }
    let w2 = self.w >> 1;
    let h2 = self.h >> 1;
    down2_box(y, self.w, self.h, &mut self.cur2.data);
    down2_box(&self.cur2.data, w2, h2, &mut self.cur4.data);
    down2_box(&self.recon.y.data, self.w, self.h, &mut self.ref2.data);
    down2_box(&self.ref2.data, w2, h2, &mut self.ref4.data);
    let m = cut_metrics(&self.cur4.data, &self.ref4.data, w4, h4);
    let cut = is_cut(&m);
    debug!("frame {}: cut metrics sad/px {} hist {} -> {}", self.fidx, m.sad_perpx,
           m.hist_l1_mmp, if cut { "keyframe" } else { "predicted" });
    cut
  }

  fn write_header(&mut self) {
    if self.wrote_header {
      return;
    }
    self.out.extend_from_slice(&SIGNATURE);
    let q = &self.qp.quant;
    let words = [
      self.w as i32, self.h as i32,
      self.fps_n, self.fps_d,
      self.sar_n, self.sar_d,
      q.ac_y_num, q.ac_y_den,
      q.ac_c_num, q.ac_c_den,
      q.dc_y_num, q.dc_y_den,
      q.dc_c_num, q.dc_c_den,
      q.edge_num, q.edge_den,
      q.hf_y_num, q.hf_y_den,
      q.hf_c_num, q.hf_c_den,
      q.dz_num, q.dz_den
    ];
    for v in words {
      self.out.extend_from_slice(&v.to_le_bytes());
    }
    self.wrote_header = true;
  }

  fn compress_and_append(&mut self, is_keyframe: bool) -> Result<(), CodecError> {
    let raw = self.bitstream.len();
    let size_pos = self.out.len();
    self.out.extend_from_slice(&[0u8; 4]);
    self.out.extend_from_slice(&(raw as u32).to_le_bytes());
    let mut z = DeflateEncoder::new(&mut self.out, Compression::default());
    z.write_all(&self.bitstream)?;
    z.finish()?;
    let clen = self.out.len() - size_pos - 8;
    let size_field = (4 + clen) as u32;
    self.out[size_pos..size_pos + 4].copy_from_slice(&size_field.to_le_bytes());

    self.stats.frames_total += 1;
    self.stats.bytes_raw_total += raw as u64;
    self.stats.bytes_compressed_total += clen as u64;
    debug!("frame {}: {} {} raw -> {} compressed", self.fidx - 1,
           if is_keyframe { "I" } else { "P" }, raw, clen);
    Ok(())
  }

  fn encode_iframe(&mut self, y: &[u8], u: &[u8], v: &[u8]) {
    let w = self.w;
    let h = self.h;
    self.bitstream.clear();
    self.bitstream.push(FT_I);
    encode_plane_intra(&mut self.bitstream, y, w, h, &self.qy, &self.w8,
                       &mut self.recon.y.data, &self.qp, true);
    encode_plane_intra(&mut self.bitstream, u, w / 2, h / 2, &self.qc, &self.w8,
                       &mut self.recon.u.data, &self.qp, false);
    encode_plane_intra(&mut self.bitstream, v, w / 2, h / 2, &self.qc, &self.w8,
                       &mut self.recon.v.data, &self.qp, false);
    deblock_plane(&mut self.recon.y.data, w, h, false);
    deblock_plane(&mut self.recon.u.data, w / 2, h / 2, true);
    deblock_plane(&mut self.recon.v.data, w / 2, h / 2, true);
    dering_luma(&mut self.recon.y.data, w, h);
  }

  // Does the macroblock at (xb, yb) qualify for SKIP against the
  // co-located reference content?
  fn skip_acceptable(&self, y: &[u8], u: &[u8], v: &[u8], xb: usize, yb: usize) -> bool {
    let w = self.w;
    let h = self.h;
    let qp = &self.qp;
    let bwid = (w - xb).min(16);
    let bhgt = (h - yb).min(16);
    let n_luma = (bwid * bhgt) as i32;

    let mut sum_y_abs = 0;
    let mut sum_y_signed = 0;
    let mut max_y = 0;
    for row in 0..bhgt {
      let a = &y[(yb + row) * w + xb..(yb + row) * w + xb + bwid];
      let b = &self.reference.y.data[(yb + row) * w + xb..(yb + row) * w + xb + bwid];
      for x in 0..bwid {
        let d = a[x] as i32 - b[x] as i32;
        sum_y_abs += d.abs();
        sum_y_signed += d;
        max_y = max_y.max(d.abs());
      }
    }
    if max_y > qp.skip_luma_max || sum_y_abs > qp.skip_luma_sum {
      return false;
    }

    let cw = w >> 1;
    let ch = h >> 1;
    let cx = xb >> 1;
    let cy = yb >> 1;
    let cbw = (cw - cx).min(8);
    let cbh = (ch - cy).min(8);
    let n_chroma = (cbw * cbh) as i32;
    let mut sums = [(0i32, 0i32, 0i32); 2]; // (abs, signed, max) per chroma plane
    for (pi, plane) in [(0, u), (1, v)] {
      let refp = if pi == 0 { &self.reference.u.data } else { &self.reference.v.data };
      let (mut s_abs, mut s_signed, mut s_max) = (0, 0, 0);
      for row in 0..cbh {
        let a = &plane[(cy + row) * cw + cx..(cy + row) * cw + cx + cbw];
        let b = &refp[(cy + row) * cw + cx..(cy + row) * cw + cx + cbw];
        for x in 0..cbw {
          let d = a[x] as i32 - b[x] as i32;
          s_abs += d.abs();
          s_signed += d;
          s_max = s_max.max(d.abs());
        }
      }
      sums[pi] = (s_abs, s_signed, s_max);
    }
    for (s_abs, _, s_max) in sums {
      if s_max > qp.skip_chroma_max || s_abs > qp.skip_chroma_sum {
        return false;
      }
    }

    // Mean drift: a consistent small bias across the block is visible
    // even when every individual difference is tiny
    if sum_y_signed.abs() > qp.skip_luma_mean_abs_max * n_luma {
      return false;
    }
    for (_, s_signed, _) in sums {
      if s_signed.abs() > qp.skip_chroma_mean_abs_max * n_chroma {
        return false;
      }
    }

    // Coarse motion sanity: only skip when zero motion is competitive
    // with the best nearby coarse vector
    let w4 = w >> 2;
    let h4 = h >> 2;
    if w4 < 4 || h4 < 4 {
      return false;
    }
    let cx4 = (xb >> 2) as i32;
    let cy4 = (yb >> 2) as i32;
    let s00 = sad_block_clamped(&self.cur4.data, w4, h4, cx4, cy4,
                                &self.ref4.data, cx4, cy4, 4, i32::MAX);
    let mut best = i32::MAX;
    for dy in -1..=1 {
      for dx in -1..=1 {
        let s = sad_block_clamped(&self.cur4.data, w4, h4, cx4, cy4,
                                  &self.ref4.data, cx4 + dx, cy4 + dy, 4, best);
        if s < best {
          best = s;
        }
      }
    }
    s00 <= best + qp.skip_coarse_mv_margin
  }

  // Copy the co-located macroblock from the reference into the
  // reconstruction (the decoder's SKIP behaviour)
  fn reconstruct_skip(&mut self, xb: usize, yb: usize) {
    let w = self.w;
    let h = self.h;
    let mut blk = [0u8; 64];
    for by in 0..2 {
      for bx in 0..2 {
        let x = xb + bx * 8;
        let y = yb + by * 8;
        copy_block_from(&self.reference.y.data, w, h, x as i32, y as i32, &mut blk);
        store_block(&mut self.recon.y.data, w, h, x, y, &blk);
      }
    }
    let cw = w >> 1;
    let ch = h >> 1;
    let cx = xb >> 1;
    let cy = yb >> 1;
    copy_block_from(&self.reference.u.data, cw, ch, cx as i32, cy as i32, &mut blk);
    store_block(&mut self.recon.u.data, cw, ch, cx, cy, &blk);
    copy_block_from(&self.reference.v.data, cw, ch, cx as i32, cy as i32, &mut blk);
    store_block(&mut self.recon.v.data, cw, ch, cx, cy, &blk);
  }

  // Trial-code the macroblock as intra (all six blocks)
  fn trial_intra_mb(&self, y: &[u8], u: &[u8], v: &[u8], xb: usize, yb: usize)
                    -> ([IntraTrial; 4], IntraTrial, IntraTrial) {
    let w = self.w;
    let h = self.h;
    let luma = std::array::from_fn(|i| {
      let x = xb + (i & 1) * 8;
      let yy = yb + (i >> 1) * 8;
      let bwid = w.saturating_sub(x).min(8);
      let bhgt = h.saturating_sub(yy).min(8);
      if bwid == 0 || bhgt == 0 {
        // The block lies entirely past the plane edge; code nothing
        return IntraTrial {
          zzq: [0; 64],
          recon: [0; 64],
          rle_bytes: 5,
          sse: 0
        };
      }
      trial_intra_block(&y[yy * w + x..], w, &self.qy, &self.w8, &self.qp, bwid, bhgt)
    });
    let cw = w >> 1;
    let ch = h >> 1;
    let cx = xb >> 1;
    let cy = yb >> 1;
    let cbw = (cw - cx).min(8);
    let cbh = (ch - cy).min(8);
    let tu = trial_intra_block(&u[cy * cw + cx..], cw, &self.qc, &self.w8, &self.qp, cbw, cbh);
    let tv = trial_intra_block(&v[cy * cw + cx..], cw, &self.qc, &self.w8, &self.qp, cbw, cbh);
    (luma, tu, tv)
  }

  fn emit_intra_mb(&mut self, luma: &[IntraTrial; 4], tu: &IntraTrial, tv: &IntraTrial,
                   xb: usize, yb: usize) {
    let w = self.w;
    let h = self.h;
    self.bitstream.push(MB_INTRA);
    let zz_y = std::array::from_fn(|i| luma[i].zzq);
    let cbp = make_cbp6(&zz_y, &tu.zzq, &tv.zzq);
    self.bitstream.push(cbp);
    for i in 0..4 {
      if cbp & (1 << i) != 0 {
        rle_write(&mut self.bitstream, &luma[i].zzq);
      }
    }
    if cbp & (1 << 4) != 0 {
      rle_write(&mut self.bitstream, &tu.zzq);
    }
    if cbp & (1 << 5) != 0 {
      rle_write(&mut self.bitstream, &tv.zzq);
    }
    for i in 0..4 {
      let x = xb + (i & 1) * 8;
      let y = yb + (i >> 1) * 8;
      store_block(&mut self.recon.y.data, w, h, x, y, &luma[i].recon);
    }
    let cw = w >> 1;
    let ch = h >> 1;
    store_block(&mut self.recon.u.data, cw, ch, xb >> 1, yb >> 1, &tu.recon);
    store_block(&mut self.recon.v.data, cw, ch, xb >> 1, yb >> 1, &tv.recon);
  }

  fn encode_pframe(&mut self, y: &[u8], u: &[u8], v: &[u8], group: u16) {
    let w = self.w;
    let h = self.h;
    let w2 = w >> 1;
    let h2 = h >> 1;

    // The previous reconstruction becomes the prediction reference
    self.reference.copy_from(&self.recon);
    down2_box(y, w, h, &mut self.cur2.data);
    down2_box(&self.reference.y.data, w, h, &mut self.ref2.data);
    down2_box(&self.cur2.data, w2, h2, &mut self.cur4.data);
    down2_box(&self.ref2.data, w2, h2, &mut self.ref4.data);

    self.bitstream.clear();
    self.bitstream.push(FT_P);
    let lambda = (self.qp.rd_lambda * 11 + 5) / 10;

    for yb in (0..h).step_by(16) {
      for xb in (0..w).step_by(16) {
        let mbx = xb >> 4;
        let mby = yb >> 4;
        let force_intra = self.cir.group(self.mb_w, mbx, mby) == group;

        if !force_intra && self.skip_acceptable(y, u, v, xb, yb) {
          self.bitstream.push(MB_SKIP);
          self.reconstruct_skip(xb, yb);
          continue;
        }

        if force_intra {
          let (luma, tu, tv) = self.trial_intra_mb(y, u, v, xb, yb);
          self.emit_intra_mb(&luma, &tu, &tv, xb, yb);
          continue;
        }

        // Motion search, then rate-distortion between INTER and INTRA
        let (dxh, dyh) = {
          let planes = SearchPlanes {
            cur: y,
            refp: &self.reference.y.data,
            w: w,
            h: h,
            cur2: &self.cur2.data,
            ref2: &self.ref2.data,
            cur4: &self.cur4.data,
            ref4: &self.ref4.data
          };
          search_best_mv16x16(&planes, xb as i32, yb as i32, SEARCH_RAD)
        };
        let dx8 = dxh.clamp(-127, 127);
        let dy8 = dyh.clamp(-127, 127);
        let is_inter_zero = dx8 == 0 && dy8 == 0;

        let mut d_inter = 0i64;
        let mut r_inter = 1 + if is_inter_zero { 0 } else { 2 };
        let mut cur = [0u8; 64];
        let mut pred = [0u8; 64];
        let inter_y: [InterTrial; 4] = std::array::from_fn(|i| {
          let x = xb + (i & 1) * 8;
          let yy = yb + (i >> 1) * 8;
          let bwid = (w - x).min(8);
          let bhgt = (h - yy).min(8);
          copy_block_from(y, w, h, x as i32, yy as i32, &mut cur);
          copy_block_frac_luma(&self.reference.y.data, w, h, x as i32, yy as i32, dx8, dy8, &mut pred);
          trial_inter_block(&cur, &pred, &self.qy, &self.w8, &self.qp, true, bwid, bhgt)
        });
        for t in &inter_y {
          d_inter += t.sse;
          r_inter += t.rle_bytes;
        }
        let cw = w >> 1;
        let ch = h >> 1;
        let cx = xb >> 1;
        let cy = yb >> 1;
        let cbw = (cw - cx).min(8);
        let cbh = (ch - cy).min(8);
        copy_block_from(u, cw, ch, cx as i32, cy as i32, &mut cur);
        copy_block_frac_chroma(&self.reference.u.data, cw, ch, cx as i32, cy as i32, dx8, dy8, &mut pred);
        let inter_u = trial_inter_block(&cur, &pred, &self.qc, &self.w8, &self.qp, false, cbw, cbh);
        copy_block_from(v, cw, ch, cx as i32, cy as i32, &mut cur);
        copy_block_frac_chroma(&self.reference.v.data, cw, ch, cx as i32, cy as i32, dx8, dy8, &mut pred);
        let inter_v = trial_inter_block(&cur, &pred, &self.qc, &self.w8, &self.qp, false, cbw, cbh);
        d_inter += inter_u.sse + inter_v.sse;
        r_inter += inter_u.rle_bytes + inter_v.rle_bytes;

        let (intra_y, intra_u, intra_v) = self.trial_intra_mb(y, u, v, xb, yb);
        let mut d_intra = 0i64;
        let mut r_intra = 1;
        for t in &intra_y {
          d_intra += t.sse;
          r_intra += t.rle_bytes;
        }
        d_intra += intra_u.sse + intra_v.sse;
        r_intra += intra_u.rle_bytes + intra_v.rle_bytes;

        // A zero-vector INTER with nothing to code is just a SKIP
        let inter_all_zero = is_inter_zero
          && inter_y.iter().all(|t| all_zero(&t.zzq))
          && all_zero(&inter_u.zzq) && all_zero(&inter_v.zzq);
        if inter_all_zero {
          self.bitstream.push(MB_SKIP);
          self.reconstruct_skip(xb, yb);
          continue;
        }

        let zeros_inter = inter_y.iter().filter(|t| all_zero(&t.zzq)).count() as i32
          + all_zero(&inter_u.zzq) as i32 + all_zero(&inter_v.zzq) as i32;
        let zeros_intra = intra_y.iter().filter(|t| all_zero(&t.zzq)).count() as i32
          + all_zero(&intra_u.zzq) as i32 + all_zero(&intra_v.zzq) as i32;
        let r_inter_cbp = r_inter - 5 * zeros_inter + 1;
        let r_intra_cbp = r_intra - 5 * zeros_intra + 1;
        let c_inter = d_inter + lambda as i64 * r_inter_cbp as i64;
        let c_intra = d_intra + lambda as i64 * r_intra_cbp as i64;

        if c_intra < c_inter {
          self.emit_intra_mb(&intra_y, &intra_u, &intra_v, xb, yb);
        } else {
          self.bitstream.push(if is_inter_zero { MB_INTER_ZERO } else { MB_INTER });
          if !is_inter_zero {
            self.bitstream.push(dx8 as i8 as u8);
            self.bitstream.push(dy8 as i8 as u8);
          }
          let zz_y = std::array::from_fn(|i| inter_y[i].zzq);
          let cbp = make_cbp6(&zz_y, &inter_u.zzq, &inter_v.zzq);
          self.bitstream.push(cbp);
          for i in 0..4 {
            if cbp & (1 << i) != 0 {
              rle_write(&mut self.bitstream, &inter_y[i].zzq);
            }
          }
          if cbp & (1 << 4) != 0 {
            rle_write(&mut self.bitstream, &inter_u.zzq);
          }
          if cbp & (1 << 5) != 0 {
            rle_write(&mut self.bitstream, &inter_v.zzq);
          }

          // Reconstruct: motion-compensated prediction plus the coded
          // residual, exactly as the decoder will
          let mut out8 = [0u8; 64];
          for (i, t) in inter_y.iter().enumerate() {
            let x = xb + (i & 1) * 8;
            let yy = yb + (i >> 1) * 8;
            copy_block_frac_luma(&self.reference.y.data, w, h, x as i32, yy as i32, dx8, dy8, &mut pred);
            for j in 0..64 {
              out8[j] = (pred[j] as i32 + t.add[j] as i32).clamp(0, 255) as u8;
            }
            store_block(&mut self.recon.y.data, w, h, x, yy, &out8);
          }
          copy_block_frac_chroma(&self.reference.u.data, cw, ch, cx as i32, cy as i32, dx8, dy8, &mut pred);
          for j in 0..64 {
            out8[j] = (pred[j] as i32 + inter_u.add[j] as i32).clamp(0, 255) as u8;
          }
          store_block(&mut self.recon.u.data, cw, ch, cx, cy, &out8);
          copy_block_frac_chroma(&self.reference.v.data, cw, ch, cx as i32, cy as i32, dx8, dy8, &mut pred);
          for j in 0..64 {
            out8[j] = (pred[j] as i32 + inter_v.add[j] as i32).clamp(0, 255) as u8;
          }
          store_block(&mut self.recon.v.data, cw, ch, cx, cy, &out8);
        }
      }
    }

    deblock_plane(&mut self.recon.y.data, w, h, false);
    deblock_plane(&mut self.recon.u.data, w / 2, h / 2, true);
    deblock_plane(&mut self.recon.v.data, w / 2, h / 2, true);
    dering_luma(&mut self.recon.y.data, w, h);
  }
}
