// Zig-zag run-length coding of quantized coefficient blocks.
//
// Per-block wire format:
//   int16 LE   dc
//   repeated:  u8 run_of_zeros, int16 LE level   (run 255 + level 0 = pad)
//   terminator: run 0, level 0
//
// The writer always emits the terminator, so an all-zero block costs
// 5 bytes (DC plus terminator).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::consts::ZIGZAG;
use crate::error::CodecError;

// Reorder a raster-order coefficient block into scan order
pub fn to_zigzag(cq: &[i16; 64]) -> [i16; 64] {
  let mut zzq = [0i16; 64];
  for i in 0..64 {
    zzq[i] = cq[ZIGZAG[i]];
  }
  zzq
}

// Reorder a scan-order block back to raster order
pub fn from_zigzag(zzq: &[i16; 64]) -> [i16; 64] {
  let mut rq = [0i16; 64];
  for i in 0..64 {
    rq[ZIGZAG[i]] = zzq[i];
  }
  rq
}

pub fn all_zero(zzq: &[i16; 64]) -> bool {
  zzq.iter().all(|&v| v == 0)
}

// Exact byte cost of rle_write for a block, used by the RD search so it
// can price candidates without serializing them
pub fn rle_len_est(zzq: &[i16; 64]) -> i32 {
  let mut len = 2;
  let mut run = 0;
  for i in 1..64 {
    if zzq[i] == 0 {
      run += 1;
      continue;
    }
    while run > 255 {
      len += 3;
      run -= 255;
    }
    len += 3;
    run = 0;
  }
  len + 3
}

pub fn rle_write(out: &mut Vec<u8>, zzq: &[i16; 64]) {
  out.write_i16::<LittleEndian>(zzq[0]).unwrap();
  let mut run = 0u32;
  for i in 1..64 {
    if zzq[i] == 0 {
      run += 1;
      continue;
    }
    while run > 255 {
      out.push(255);
      out.write_i16::<LittleEndian>(0).unwrap();
      run -= 255;
    }
    out.push(run as u8);
    out.write_i16::<LittleEndian>(zzq[i]).unwrap();
    run = 0;
  }
  out.push(0);
  out.write_i16::<LittleEndian>(0).unwrap();
}

// Parse one block from the front of `p`, consuming bytes as it goes.
// Levels that would land past the end of the block are dropped, the way
// the encoder never produces them; a truncated buffer is an error.
pub fn rle_read_block(p: &mut &[u8], zzq: &mut [i16; 64]) -> Result<(), CodecError> {
  zzq.fill(0);
  zzq[0] = p.read_i16::<LittleEndian>().map_err(|_| CodecError::Truncated)?;
  let mut idx = 1usize;
  loop {
    let run = p.read_u8().map_err(|_| CodecError::Truncated)?;
    let lev = p.read_i16::<LittleEndian>().map_err(|_| CodecError::Truncated)?;
    if run == 0 && lev == 0 {
      break;
    }
    idx += run as usize;
    if idx >= 64 {
      break;
    }
    zzq[idx] = lev;
    idx += 1;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn round_trip(zzq: &[i16; 64]) -> [i16; 64] {
    let mut buf = Vec::new();
    rle_write(&mut buf, zzq);
    assert_eq!(buf.len(), rle_len_est(zzq) as usize);
    let mut out = [0i16; 64];
    let mut p = &buf[..];
    rle_read_block(&mut p, &mut out).unwrap();
    assert!(p.is_empty());
    out
  }

  #[test]
  fn zigzag_inverts() {
    let mut cq = [0i16; 64];
    for i in 0..64 {
      cq[i] = i as i16 - 32;
    }
    assert_eq!(from_zigzag(&to_zigzag(&cq)), cq);
  }

  #[test]
  fn all_zero_block_costs_five_bytes() {
    let zzq = [0i16; 64];
    let mut buf = Vec::new();
    rle_write(&mut buf, &zzq);
    assert_eq!(buf, [0, 0, 0, 0, 0]);
    assert_eq!(rle_len_est(&zzq), 5);
    assert_eq!(round_trip(&zzq), zzq);
  }

  #[test]
  fn sparse_block_round_trips() {
    let mut zzq = [0i16; 64];
    zzq[0] = -300;
    zzq[5] = 7;
    zzq[6] = -1;
    zzq[63] = 2;
    assert_eq!(round_trip(&zzq), zzq);
  }

  #[test]
  fn dense_block_round_trips() {
    let mut zzq = [0i16; 64];
    for i in 0..64 {
      zzq[i] = (i as i16 * 13) % 29 - 14;
    }
    assert_eq!(round_trip(&zzq), zzq);
  }

  #[test]
  fn truncated_input_is_an_error() {
    let mut zzq = [0i16; 64];
    zzq[0] = 5;
    zzq[10] = -5;
    let mut buf = Vec::new();
    rle_write(&mut buf, &zzq);
    for cut in 0..buf.len() {
      let mut out = [0i16; 64];
      let mut p = &buf[..cut];
      assert!(rle_read_block(&mut p, &mut out).is_err());
    }
  }
}
