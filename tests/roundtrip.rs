// End-to-end encode/decode scenarios exercising the public API and the
// on-disk stream format.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;

use tinyfmv::{CodecError, Decoder, Encoder, Quality, HEADER_SIZE};

// Build a packed planar YUV 4:2:0 buffer from constant plane values
fn flat_yuv(w: usize, h: usize, y: u8, u: u8, v: u8) -> Vec<u8> {
  let mut f = vec![y; w * h];
  f.extend(vec![u; (w / 2) * (h / 2)]);
  f.extend(vec![v; (w / 2) * (h / 2)]);
  f
}

// Split a finished stream into the header and the inflated payload of
// every frame record
fn split_stream(stream: &[u8]) -> (Vec<u8>, Vec<Vec<u8>>) {
  let header = stream[..92].to_vec();
  let mut payloads = Vec::new();
  let mut pos = 92;
  loop {
    let size = LittleEndian::read_u32(&stream[pos..pos + 4]) as usize;
    if size == 0 {
      assert_eq!(pos + 4, stream.len(), "end marker must close the stream");
      break;
    }
    let raw = LittleEndian::read_u32(&stream[pos + 4..pos + 8]) as usize;
    let comp = &stream[pos + 8..pos + 4 + size];
    let mut payload = Vec::new();
    DeflateDecoder::new(comp).read_to_end(&mut payload).unwrap();
    assert_eq!(payload.len(), raw, "declared raw length must match");
    payloads.push(payload);
    pos += 4 + size;
  }
  (header, payloads)
}

// Decode every frame of a finished stream, returning the RGB output of
// each frame
fn decode_all(stream: &[u8], w: usize, h: usize) -> Vec<Vec<u8>> {
  let mut dec = Decoder::new(&stream[..HEADER_SIZE]).unwrap();
  assert_eq!(dec.width() as usize, w);
  assert_eq!(dec.height() as usize, h);
  let mut frames = Vec::new();
  let mut pos = HEADER_SIZE;
  let mut rgb = vec![0u8; w * h * 4];
  while dec.bytes_needed() > 0 {
    let need = dec.bytes_needed();
    let ret = dec.next_frame(&stream[pos..pos + need], &mut rgb);
    pos += need;
    frames.push(rgb.clone());
    if ret == 0 {
      break;
    }
  }
  assert_eq!(dec.bytes_needed(), 0, "stream must end with the zero marker");
  frames
}

// Skip one RLE coefficient block, asserting its structure
fn skip_rle_block(payload: &[u8], mut pos: usize) -> usize {
  pos += 2; // DC
  loop {
    let run = payload[pos];
    let level = LittleEndian::read_i16(&payload[pos + 1..pos + 3]);
    pos += 3;
    if run == 0 && level == 0 {
      return pos;
    }
  }
}

// A single black 16x8 frame round-trips to pure black RGB
#[test]
fn single_black_frame_round_trips() {
  let mut enc = Encoder::new(16, 8, 30, 1, 1, 1, Quality::Default).unwrap();
  let mut stream = enc.encode_yuv420(&flat_yuv(16, 8, 16, 128, 128)).unwrap().to_vec();
  stream.extend_from_slice(enc.finalize());

  assert_eq!(&stream[0..4], &[0x46, 0x4d, 0x56, 0x00]);
  assert_eq!(LittleEndian::read_i32(&stream[4..8]), 16);
  assert_eq!(LittleEndian::read_i32(&stream[8..12]), 8);

  let frames = decode_all(&stream, 16, 8);
  assert_eq!(frames.len(), 1);
  for px in frames[0].chunks(4) {
    assert_eq!(px, &[0x00, 0x00, 0x00, 0xff]);
  }
}

// The second of two identical frames is a single SKIP macroblock
#[test]
fn identical_frame_is_one_skip_macroblock() {
  let mut enc = Encoder::new(8, 8, 1, 1, 1, 1, Quality::Default).unwrap();
  let frame = flat_yuv(8, 8, 128, 128, 128);
  let mut stream = enc.encode_yuv420(&frame).unwrap().to_vec();
  stream.extend_from_slice(enc.encode_yuv420(&frame).unwrap());
  stream.extend_from_slice(enc.finalize());

  let (_, payloads) = split_stream(&stream);
  assert_eq!(payloads.len(), 2);
  assert_eq!(payloads[0][0], 0x00, "first frame is I");
  assert_eq!(payloads[1], vec![0x01, 0x00], "second frame is P with one SKIP");
}

// A total luma swing one frame after the keyframe is still coded as P,
// because the cut detector is not yet armed
#[test]
fn cut_detector_respects_the_minimum_gap() {
  let mut enc = Encoder::new(8, 8, 30, 1, 1, 1, Quality::Default).unwrap();
  let mut stream = enc.encode_yuv420(&flat_yuv(8, 8, 16, 128, 128)).unwrap().to_vec();
  stream.extend_from_slice(enc.encode_yuv420(&flat_yuv(8, 8, 235, 128, 128)).unwrap());
  stream.extend_from_slice(enc.finalize());
  let (_, payloads) = split_stream(&stream);
  assert_eq!(payloads[0][0], 0x00);
  assert_eq!(payloads[1][0], 0x01);
}

// With violently alternating content, a keyframe is forced within
// every 20 frames once the warm-up gap has passed
#[test]
fn cut_detector_forces_keyframes_on_alternating_content() {
  let w = 32;
  let h = 32;
  let mut enc = Encoder::new(w as i32, h as i32, 30, 1, 1, 1, Quality::Default).unwrap();
  let dark = flat_yuv(w, h, 16, 128, 128);
  let light = flat_yuv(w, h, 235, 128, 128);
  let mut stream = Vec::new();
  for i in 0..30 {
    let f = if i % 2 == 0 { &dark } else { &light };
    stream.extend_from_slice(enc.encode_yuv420(f).unwrap());
  }
  stream.extend_from_slice(enc.finalize());

  let (_, payloads) = split_stream(&stream);
  let types: Vec<u8> = payloads.iter().map(|p| p[0]).collect();
  assert_eq!(types[0], 0x00);
  for window in types.windows(20) {
    assert!(window.iter().any(|&t| t == 0x00),
            "no keyframe in a 20-frame window: {:?}", types);
  }
}

// A static scene settles into SKIP-only P frames of a small fixed size
#[test]
fn zero_motion_produces_skip_only_frames() {
  let w = 48;
  let h = 32;
  let mb_count = (w / 16) * (h / 16);
  let mut enc = Encoder::new(w as i32, h as i32, 30, 1, 1, 1, Quality::Default).unwrap();
  let frame = flat_yuv(w, h, 100, 120, 140);
  let mut stream = Vec::new();
  for _ in 0..5 {
    stream.extend_from_slice(enc.encode_yuv420(&frame).unwrap());
  }
  stream.extend_from_slice(enc.finalize());

  let (_, payloads) = split_stream(&stream);
  for p in &payloads[1..] {
    assert_eq!(p[0], 0x01);
    assert_eq!(p.len(), 1 + mb_count, "all macroblocks must be SKIP");
    assert!(p[1..].iter().all(|&m| m == 0x00));
  }
}

// Every P macroblock starts with a mode byte in 0..=3, mode 1 carries
// exactly two MV bytes, the CBP has at most six significant bits, and
// exactly popcount(cbp) blocks follow
#[test]
fn pframe_mode_and_cbp_layout() {
  let w = 64;
  let h = 64;
  let mut enc = Encoder::new(w as i32, h as i32, 30, 1, 1, 1, Quality::Default).unwrap();

  // Frame 1: textured background. Frame 2: same background with a
  // moved bright square, so the P frame mixes modes.
  let mut y0 = vec![0u8; w * h];
  for yy in 0..h {
    for xx in 0..w {
      y0[yy * w + xx] = (40 + ((xx / 4 + yy / 4) % 2) * 60) as u8;
    }
  }
  let mut y1 = y0.clone();
  for yy in 10..26 {
    for xx in 12..28 {
      y1[yy * w + xx] = 230;
    }
  }
  let mut f0 = y0.clone();
  f0.extend(vec![128u8; (w / 2) * (h / 2) * 2]);
  let mut f1 = y1.clone();
  f1.extend(vec![128u8; (w / 2) * (h / 2) * 2]);

  let mut stream = enc.encode_yuv420(&f0).unwrap().to_vec();
  stream.extend_from_slice(enc.encode_yuv420(&f1).unwrap());
  stream.extend_from_slice(enc.finalize());

  let (_, payloads) = split_stream(&stream);
  let p = &payloads[1];
  assert_eq!(p[0], 0x01);
  let mut pos = 1;
  let mb_count = (w / 16) * (h / 16);
  for _ in 0..mb_count {
    let mode = p[pos];
    pos += 1;
    assert!(mode <= 3, "mode byte out of range: {}", mode);
    if mode == 0 {
      continue;
    }
    if mode == 1 {
      pos += 2; // dx, dy
    }
    let cbp = p[pos];
    pos += 1;
    assert_eq!(cbp & 0xc0, 0, "CBP has at most six significant bits");
    for _ in 0..cbp.count_ones() {
      pos = skip_rle_block(p, pos);
    }
  }
  assert_eq!(pos, p.len(), "payload must end exactly after the last macroblock");
}

// Header fields round-trip through the decoder
#[test]
fn header_round_trip() {
  let mut enc = Encoder::new(128, 96, 24000, 1001, 4, 3, Quality::Max).unwrap();
  let header = enc.finalize().to_vec();
  let dec = Decoder::new(&header).unwrap();
  assert_eq!(dec.width(), 128);
  assert_eq!(dec.height(), 96);
  assert_eq!(dec.fps(), (24000, 1001));
  assert_eq!(dec.aspect_ratio(), (4, 3));
  // Max preset quant ratios travel in the header
  let q = dec.quant_params();
  assert_eq!((q.ac_y_num, q.ac_y_den), (50, 100));
  assert_eq!((q.dz_num, q.dz_den), (20, 40));
}

// A decoder fed one byte short of a header must refuse
#[test]
fn short_header_is_rejected() {
  let mut enc = Encoder::new(16, 16, 30, 1, 1, 1, Quality::Default).unwrap();
  let header = enc.finalize().to_vec();
  assert!(matches!(Decoder::new(&header[..95]),
                   Err(CodecError::HeaderTooShort(95, 96))));
}

// A moving grayscale scene survives the full encode/decode round trip
// with modest error
#[test]
fn moving_content_round_trips_with_low_error() {
  let w = 64;
  let h = 64;
  let mut enc = Encoder::new(w as i32, h as i32, 30, 1, 1, 1, Quality::High).unwrap();

  let make_rgb = |shift: usize| -> Vec<u8> {
    let mut rgb = vec![0u8; w * h * 4];
    for y in 0..h {
      for x in 0..w {
        // Smooth triangle-wave shading plus a bright moving bar
        let phase = (x * 3 + y * 2) % 160;
        let tri = if phase < 80 { phase } else { 160 - phase };
        let mut v = (40 + tri) as u8;
        if (x + shift) % 32 < 4 {
          v = 220;
        }
        let px = &mut rgb[(y * w + x) * 4..(y * w + x) * 4 + 4];
        px[0] = v;
        px[1] = v;
        px[2] = v;
        px[3] = 255;
      }
    }
    rgb
  };

  let f0 = make_rgb(0);
  let f1 = make_rgb(1);
  let mut stream = enc.encode_xbgr(&f0).unwrap().to_vec();
  stream.extend_from_slice(enc.encode_xbgr(&f1).unwrap());
  stream.extend_from_slice(enc.finalize());

  let frames = decode_all(&stream, w, h);
  assert_eq!(frames.len(), 2);
  for (decoded, original) in [(&frames[0], &f0), (&frames[1], &f1)] {
    let mut total_err = 0u64;
    let mut max_err = 0i32;
    for (d, o) in decoded.chunks(4).zip(original.chunks(4)) {
      assert_eq!(d[3], 255);
      let e = (d[0] as i32 - o[0] as i32).abs();
      total_err += e as u64;
      max_err = max_err.max(e);
    }
    let mean = total_err as f64 / (w * h) as f64;
    assert!(max_err <= 72, "max error {}", max_err);
    assert!(mean <= 8.0, "mean error {}", mean);
  }
}

// The decoder keeps pace with the encoder across many frames and frame
// types (keyframes, skips, motion, refresh)
#[test]
fn long_sequence_stays_in_sync() {
  let w = 32;
  let h = 32;
  let mut enc = Encoder::new(w as i32, h as i32, 25, 1, 1, 1, Quality::Default).unwrap();
  let mut stream = Vec::new();
  for i in 0..24usize {
    let mut yuv = vec![0u8; w * h];
    for y in 0..h {
      for x in 0..w {
        yuv[y * w + x] = (60 + ((x + i * 2) % 24) * 5) as u8;
      }
    }
    yuv.extend(vec![128u8; (w / 2) * (h / 2) * 2]);
    stream.extend_from_slice(enc.encode_yuv420(&yuv).unwrap());
  }
  stream.extend_from_slice(enc.finalize());

  let stats = enc.stats();
  assert_eq!(stats.frames_total, 24);
  assert!(stats.bytes_compressed_total < stats.bytes_raw_total);

  let frames = decode_all(&stream, w, h);
  assert_eq!(frames.len(), 24);
}
