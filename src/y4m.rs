// Minimal Y4M (YUV4MPEG2) reader for the encoder tool.
//
// Parses the parameter line for width, height, frame rate, aspect ratio
// and chroma subsampling, then streams frames into reusable buffers.

use std::io;
use std::io::prelude::*;

use byteorder::ReadBytesExt;

use crate::frame::Frame;

const Y4M_FILE_MAGIC: &str = "YUV4MPEG2";
const Y4M_FRAME_MAGIC: &str = "FRAME";

pub struct Y4mReader<R> {
  inner: R,
  pub width: usize,
  pub height: usize,
  pub fps_n: i32,
  pub fps_d: i32,
  pub sar_n: i32,
  pub sar_d: i32,
  pub is_420: bool
}

fn bad_data(msg: &str) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

// Parse a "N:D" ratio; a missing denominator defaults to 1
fn parse_ratio(s: &str) -> Option<(i32, i32)> {
  let mut parts = s.splitn(2, ':');
  let n = parts.next()?.parse().ok()?;
  let d = match parts.next() {
    Some(d) => d.parse().ok()?,
    None => 1
  };
  Some((n, d))
}

impl<R: Read> Y4mReader<R> {
  pub fn new(mut inner: R) -> io::Result<Self> {
    let mut line = Vec::new();
    loop {
      let byte = inner.read_u8()?;
      if byte == b'\n' {
        break;
      }
      if line.len() > 2048 {
        return Err(bad_data("Y4M header line too long"));
      }
      line.push(byte);
    }
    let line = String::from_utf8(line).map_err(|_| bad_data("Y4M header is not ASCII"))?;
    if !line.starts_with(Y4M_FILE_MAGIC) {
      return Err(bad_data("not a Y4M file"));
    }

    let mut width = 0;
    let mut height = 0;
    let mut fps_n = 0;
    let mut fps_d = 0;
    let mut sar_n = 1;
    let mut sar_d = 1;
    // 4:2:0 is the default when no colourspace tag is present
    let mut is_420 = true;

    for param in line[Y4M_FILE_MAGIC.len()..].split_whitespace() {
      let (tag, value) = param.split_at(1);
      match tag {
        "W" => width = value.parse().unwrap_or(0),
        "H" => height = value.parse().unwrap_or(0),
        "F" => {
          if let Some((n, d)) = parse_ratio(value) {
            fps_n = n;
            fps_d = d.max(1);
          }
        }
        "A" => {
          if let Some((n, d)) = parse_ratio(value) {
            if n > 0 && d > 0 {
              sar_n = n;
              sar_d = d;
            }
          }
        }
        "C" => is_420 = value.starts_with("420"),
        _ => {}
      }
    }

    if width == 0 || height == 0 {
      return Err(bad_data("Y4M header is missing the frame size"));
    }
    if fps_n == 0 || fps_d == 0 {
      fps_n = 30;
      fps_d = 1;
    }

    Ok(Y4mReader {
      inner: inner,
      width: width,
      height: height,
      fps_n: fps_n,
      fps_d: fps_d,
      sar_n: sar_n,
      sar_d: sar_d,
      is_420: is_420
    })
  }

  // Read the next frame into `frame`, which must match the file's
  // dimensions. Returns false at a clean end of file.
  pub fn read_frame(&mut self, frame: &mut Frame) -> io::Result<bool> {
    let mut magic = [0u8; 5];
    match self.inner.read_exact(&mut magic) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
      Err(e) => return Err(e)
    }
    if magic != Y4M_FRAME_MAGIC.as_bytes() {
      return Err(bad_data("invalid frame header"));
    }
    // Frame parameters are legal but useless here, skip to end of line
    while self.inner.read_u8()? != b'\n' {}

    self.inner.read_exact(&mut frame.y.data)?;
    self.inner.read_exact(&mut frame.u.data)?;
    self.inner.read_exact(&mut frame.v.data)?;
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn y4m_bytes(header: &str, frames: usize, w: usize, h: usize) -> Vec<u8> {
    let mut data = header.as_bytes().to_vec();
    for i in 0..frames {
      data.extend_from_slice(b"FRAME\n");
      data.extend(vec![i as u8; w * h]);
      data.extend(vec![128u8; (w / 2) * (h / 2) * 2]);
    }
    data
  }

  #[test]
  fn parses_a_full_parameter_line() {
    let data = y4m_bytes("YUV4MPEG2 W16 H8 F24000:1001 A4:3 C420jpeg\n", 1, 16, 8);
    let r = Y4mReader::new(&data[..]).unwrap();
    assert_eq!((r.width, r.height), (16, 8));
    assert_eq!((r.fps_n, r.fps_d), (24000, 1001));
    assert_eq!((r.sar_n, r.sar_d), (4, 3));
    assert!(r.is_420);
  }

  #[test]
  fn missing_frame_rate_defaults_to_thirty() {
    let data = y4m_bytes("YUV4MPEG2 W8 H8\n", 0, 8, 8);
    let r = Y4mReader::new(&data[..]).unwrap();
    assert_eq!((r.fps_n, r.fps_d), (30, 1));
  }

  #[test]
  fn rejects_other_subsampling() {
    let data = y4m_bytes("YUV4MPEG2 W8 H8 C444\n", 0, 8, 8);
    let r = Y4mReader::new(&data[..]).unwrap();
    assert!(!r.is_420);
  }

  #[test]
  fn rejects_non_y4m_input() {
    assert!(Y4mReader::new(&b"RIFF....\n"[..]).is_err());
  }

  #[test]
  fn reads_frames_until_eof() {
    let data = y4m_bytes("YUV4MPEG2 W8 H8 F1:1\n", 2, 8, 8);
    let mut r = Y4mReader::new(&data[..]).unwrap();
    let mut frame = Frame::new(8, 8);
    assert!(r.read_frame(&mut frame).unwrap());
    assert!(frame.y.data.iter().all(|&p| p == 0));
    assert!(r.read_frame(&mut frame).unwrap());
    assert!(frame.y.data.iter().all(|&p| p == 1));
    assert!(!r.read_frame(&mut frame).unwrap());
  }
}
