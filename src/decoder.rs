// Decoder: parses the stream header, then pulls one frame record at a
// time, inverting the encoder's block coding and running the identical
// in-loop filters so both sides agree on every reference picture.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;
use log::warn;

use crate::consts::*;
use crate::error::CodecError;
use crate::filter::{deblock_plane, dering_luma};
use crate::frame::Frame;
use crate::mc::*;
use crate::quality::{build_quants, build_window, QuantParams};
use crate::rle::{from_zigzag, rle_read_block};
use crate::txfm::{idct8x8_dequant_to_s16, idct8x8_dequant_to_u8};

pub struct Decoder {
  w: usize,
  h: usize,
  fps_n: i32,
  fps_d: i32,
  sar_n: i32,
  sar_d: i32,
  quant: QuantParams,
  qy: [u8; 64],
  qc: [u8; 64],
  w8: [u16; 64],
  cur: Frame,
  reference: Frame,
  zbuf: Vec<u8>,
  bytes_needed: usize
}

impl Decoder {
  pub const HEADER_SIZE: usize = crate::consts::HEADER_SIZE;

  // Parse the fixed-size stream header. `header` must hold at least
  // HEADER_SIZE bytes from the start of the stream.
  pub fn new(header: &[u8]) -> Result<Decoder, CodecError> {
    if header.len() < HEADER_SIZE {
      return Err(CodecError::HeaderTooShort(header.len(), HEADER_SIZE));
    }
    if header[0..4] != SIGNATURE {
      return Err(CodecError::BadSignature);
    }
    let word = |i: usize| LittleEndian::read_i32(&header[4 + i * 4..8 + i * 4]);
    let w = word(0);
    let h = word(1);
    let fps_n = word(2);
    let fps_d = word(3);
    let sar_n = word(4);
    let sar_d = word(5);
    if w <= 0 || h <= 0 || w % 8 != 0 || h % 8 != 0 {
      return Err(CodecError::InvalidHeaderField("dimensions"));
    }
    if fps_d == 0 {
      return Err(CodecError::InvalidHeaderField("fps_d"));
    }
    if sar_d == 0 {
      return Err(CodecError::InvalidHeaderField("sar_d"));
    }
    let quant = QuantParams {
      ac_y_num: word(6), ac_y_den: word(7),
      ac_c_num: word(8), ac_c_den: word(9),
      dc_y_num: word(10), dc_y_den: word(11),
      dc_c_num: word(12), dc_c_den: word(13),
      edge_num: word(14), edge_den: word(15),
      hf_y_num: word(16), hf_y_den: word(17),
      hf_c_num: word(18), hf_c_den: word(19),
      dz_num: word(20), dz_den: word(21)
    };
    if quant.ac_y_den <= 0 || quant.ac_c_den <= 0 || quant.dc_y_den <= 0
      || quant.dc_c_den <= 0 || quant.edge_den <= 0 || quant.hf_y_den <= 0
      || quant.hf_c_den <= 0 || quant.dz_den <= 0 {
      return Err(CodecError::InvalidHeaderField("quant denominator"));
    }

    // The last header word is the first frame record's size field; it
    // seeds the bytes-needed hint for the first next_frame call
    let first_size = LittleEndian::read_u32(&header[92..96]) as usize;
    let bytes_needed = if first_size > 0 { first_size + 4 } else { 0 };

    let (qy, qc) = build_quants(&quant);
    let w = w as usize;
    let h = h as usize;
    Ok(Decoder {
      w: w,
      h: h,
      fps_n: fps_n,
      fps_d: fps_d,
      sar_n: sar_n,
      sar_d: sar_d,
      quant: quant,
      qy: qy,
      qc: qc,
      w8: build_window(),
      cur: Frame::new(w, h),
      reference: Frame::new(w, h),
      zbuf: Vec::new(),
      bytes_needed: bytes_needed
    })
  }

  pub fn width(&self) -> i32 {
    self.w as i32
  }

  pub fn height(&self) -> i32 {
    self.h as i32
  }

  pub fn fps(&self) -> (i32, i32) {
    (self.fps_n, self.fps_d)
  }

  pub fn aspect_ratio(&self) -> (i32, i32) {
    (self.sar_n, self.sar_d)
  }

  pub fn quant_params(&self) -> &QuantParams {
    &self.quant
  }

  // How many bytes the next call to next_frame wants; 0 after the
  // end-of-stream marker has been seen
  pub fn bytes_needed(&self) -> usize {
    self.bytes_needed
  }

  // Decode the next frame record into `out_xbgr` (packed R,G,B,255
  // bytes, width * height * 4 of them). `data` must hold exactly the
  // bytes_needed() bytes that follow the previous record's size field.
  //
  // Returns the size of the following record, or 0 at end-of-stream.
  // Malformed input also returns 0; the stream is then finished and no
  // pixels have been written.
  pub fn next_frame(&mut self, data: &[u8], out_xbgr: &mut [u8]) -> usize {
    match self.next_frame_inner(data, out_xbgr) {
      Ok(n) => n,
      Err(e) => {
        warn!("stream terminated: {}", e);
        0
      }
    }
  }

  fn next_frame_inner(&mut self, data: &[u8], out_xbgr: &mut [u8]) -> Result<usize, CodecError> {
    if data.len() < 8 {
      return Err(CodecError::Truncated);
    }
    let raw = LittleEndian::read_u32(&data[0..4]) as usize;
    if raw == 0 {
      self.bytes_needed = 0;
      return Ok(0);
    }
    if out_xbgr.len() < self.w * self.h * 4 {
      return Err(CodecError::BadInputSize {
        got: out_xbgr.len(),
        expected: self.w * self.h * 4
      });
    }

    // Everything between the raw length and the trailing size field is
    // the DEFLATE payload
    let comp = &data[4..data.len() - 4];
    let mut zbuf = std::mem::take(&mut self.zbuf);
    zbuf.clear();
    let inflated = DeflateDecoder::new(comp).read_to_end(&mut zbuf);
    let result = match inflated {
      Ok(n) if n == raw => self.decode_payload(&zbuf),
      Ok(_) => Err(CodecError::InflateMismatch),
      Err(e) => Err(CodecError::Io(e))
    };
    self.zbuf = zbuf;
    result?;

    self.write_xbgr(out_xbgr);

    let next = LittleEndian::read_u32(&data[data.len() - 4..]) as usize;
    self.bytes_needed = if next > 0 { next + 4 } else { 0 };
    Ok(self.bytes_needed)
  }

  fn decode_payload(&mut self, payload: &[u8]) -> Result<(), CodecError> {
    let mut z = payload;
    let ftype = take_u8(&mut z)?;
    match ftype {
      FT_I => self.decode_iframe(&mut z)?,
      FT_P => self.decode_pframe(&mut z)?,
      other => return Err(CodecError::UnknownFrameType(other))
    }
    let w = self.w;
    let h = self.h;
    deblock_plane(&mut self.cur.y.data, w, h, false);
    deblock_plane(&mut self.cur.u.data, w / 2, h / 2, true);
    deblock_plane(&mut self.cur.v.data, w / 2, h / 2, true);
    dering_luma(&mut self.cur.y.data, w, h);
    Ok(())
  }

  fn decode_iframe(&mut self, z: &mut &[u8]) -> Result<(), CodecError> {
    let w = self.w;
    let h = self.h;
    decode_plane_intra(z, w, h, &mut self.cur.y.data, &self.qy, &self.w8)?;
    decode_plane_intra(z, w / 2, h / 2, &mut self.cur.u.data, &self.qc, &self.w8)?;
    decode_plane_intra(z, w / 2, h / 2, &mut self.cur.v.data, &self.qc, &self.w8)?;
    Ok(())
  }

  fn decode_pframe(&mut self, z: &mut &[u8]) -> Result<(), CodecError> {
    let w = self.w;
    let h = self.h;
    self.reference.copy_from(&self.cur);

    for yb in (0..h).step_by(16) {
      for xb in (0..w).step_by(16) {
        let mode = take_u8(z)?;
        match mode {
          MB_SKIP => {
            let mut blk = [0u8; 64];
            for by in 0..2 {
              for bx in 0..2 {
                let x = xb + bx * 8;
                let y = yb + by * 8;
                copy_block_from(&self.reference.y.data, w, h, x as i32, y as i32, &mut blk);
                store_block(&mut self.cur.y.data, w, h, x, y, &blk);
              }
            }
            let cw = w >> 1;
            let ch = h >> 1;
            let cx = xb >> 1;
            let cy = yb >> 1;
            copy_block_from(&self.reference.u.data, cw, ch, cx as i32, cy as i32, &mut blk);
            store_block(&mut self.cur.u.data, cw, ch, cx, cy, &blk);
            copy_block_from(&self.reference.v.data, cw, ch, cx as i32, cy as i32, &mut blk);
            store_block(&mut self.cur.v.data, cw, ch, cx, cy, &blk);
          }
          MB_INTER | MB_INTER_ZERO => {
            let (dx, dy) = if mode == MB_INTER {
              (take_u8(z)? as i8 as i32, take_u8(z)? as i8 as i32)
            } else {
              (0, 0)
            };
            let cbp = take_u8(z)?;
            let mut zzq = [0i16; 64];
            let mut add = [0i16; 64];
            let mut pred = [0u8; 64];
            let mut out8 = [0u8; 64];
            for by in 0..2 {
              for bx in 0..2 {
                let x = xb + bx * 8;
                let y = yb + by * 8;
                let idx = by * 2 + bx;
                if cbp & (1 << idx) != 0 {
                  rle_read_block(z, &mut zzq)?;
                  let rq = from_zigzag(&zzq);
                  idct8x8_dequant_to_s16(&rq, &self.qy, &self.w8, &mut add);
                } else {
                  add = [0; 64];
                }
                copy_block_frac_luma(&self.reference.y.data, w, h, x as i32, y as i32, dx, dy, &mut pred);
                for i in 0..64 {
                  out8[i] = (pred[i] as i32 + add[i] as i32).clamp(0, 255) as u8;
                }
                store_block(&mut self.cur.y.data, w, h, x, y, &out8);
              }
            }
            let cw = w >> 1;
            let ch = h >> 1;
            let cx = xb >> 1;
            let cy = yb >> 1;
            for (bit, plane) in [(4, 0), (5, 1)] {
              if cbp & (1u8 << bit) != 0 {
                rle_read_block(z, &mut zzq)?;
                let rq = from_zigzag(&zzq);
                idct8x8_dequant_to_s16(&rq, &self.qc, &self.w8, &mut add);
              } else {
                add = [0; 64];
              }
              let refp = if plane == 0 { &self.reference.u.data } else { &self.reference.v.data };
              copy_block_frac_chroma(refp, cw, ch, cx as i32, cy as i32, dx, dy, &mut pred);
              for i in 0..64 {
                out8[i] = (pred[i] as i32 + add[i] as i32).clamp(0, 255) as u8;
              }
              let dst = if plane == 0 { &mut self.cur.u.data } else { &mut self.cur.v.data };
              store_block(dst, cw, ch, cx, cy, &out8);
            }
          }
          MB_INTRA => {
            let cbp = take_u8(z)?;
            let mut zzq = [0i16; 64];
            let mut blk = [0u8; 64];
            for by in 0..2 {
              for bx in 0..2 {
                let x = xb + bx * 8;
                let y = yb + by * 8;
                let idx = by * 2 + bx;
                if cbp & (1 << idx) != 0 {
                  rle_read_block(z, &mut zzq)?;
                  let rq = from_zigzag(&zzq);
                  idct8x8_dequant_to_u8(&rq, &self.qy, &self.w8, &mut blk, 8);
                } else {
                  blk = [128; 64];
                }
                store_block(&mut self.cur.y.data, w, h, x, y, &blk);
              }
            }
            let cw = w >> 1;
            let ch = h >> 1;
            let cx = xb >> 1;
            let cy = yb >> 1;
            for (bit, plane) in [(4, 0), (5, 1)] {
              if cbp & (1u8 << bit) != 0 {
                rle_read_block(z, &mut zzq)?;
                let rq = from_zigzag(&zzq);
                idct8x8_dequant_to_u8(&rq, &self.qc, &self.w8, &mut blk, 8);
              } else {
                blk = [128; 64];
              }
              let dst = if plane == 0 { &mut self.cur.u.data } else { &mut self.cur.v.data };
              store_block(dst, cw, ch, cx, cy, &blk);
            }
          }
          other => return Err(CodecError::UnknownMode(other))
        }
      }
    }
    Ok(())
  }

  // BT.601 integer YUV to packed R,G,B,255 bytes
  fn write_xbgr(&self, out: &mut [u8]) {
    let w = self.w;
    let cw = w >> 1;
    for y in 0..self.h {
      let orow = &mut out[y * w * 4..(y + 1) * w * 4];
      let yrow = &self.cur.y.data[y * w..(y + 1) * w];
      let urow = &self.cur.u.data[(y >> 1) * cw..(y >> 1) * cw + cw];
      let vrow = &self.cur.v.data[(y >> 1) * cw..(y >> 1) * cw + cw];
      for x in 0..w {
        let yv = (yrow[x] as i32 - 16).max(0);
        let uv = urow[x >> 1] as i32 - 128;
        let vv = vrow[x >> 1] as i32 - 128;
        let c = 298 * yv;
        let r = ((c + 409 * vv + 128) >> 8).clamp(0, 255);
        let g = ((c - 100 * uv - 208 * vv + 128) >> 8).clamp(0, 255);
        let b = ((c + 516 * uv + 128) >> 8).clamp(0, 255);
        orow[x * 4] = r as u8;
        orow[x * 4 + 1] = g as u8;
        orow[x * 4 + 2] = b as u8;
        orow[x * 4 + 3] = 255;
      }
    }
  }
}

fn take_u8(p: &mut &[u8]) -> Result<u8, CodecError> {
  match p.split_first() {
    Some((&b, rest)) => {
      *p = rest;
      Ok(b)
    }
    None => Err(CodecError::Truncated)
  }
}

fn decode_plane_intra(z: &mut &[u8], w: usize, h: usize, out: &mut [u8],
                      qt: &[u8; 64], w8: &[u16; 64]) -> Result<(), CodecError> {
  let mut zzq = [0i16; 64];
  for y in (0..h).step_by(8) {
    for x in (0..w).step_by(8) {
      let bwid = (w - x).min(8);
      let bhgt = (h - y).min(8);
      rle_read_block(z, &mut zzq)?;
      let rq = from_zigzag(&zzq);
      if bwid == 8 && bhgt == 8 {
        idct8x8_dequant_to_u8(&rq, qt, w8, &mut out[y * w + x..], w);
      } else {
        let mut blk = [0u8; 64];
        idct8x8_dequant_to_u8(&rq, qt, w8, &mut blk, 8);
        store_block(out, w, h, x, y, &blk);
      }
    }
  }
  Ok(())
}
