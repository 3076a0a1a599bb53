// Encoder command line tool: compress a Y4M file or a directory of
// numbered PNG frames into an .fmv stream.

use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use tinyfmv::y4m::Y4mReader;
use tinyfmv::{Encoder, EncoderStats, Frame, Quality};

#[derive(Parser)]
#[command(name = "tinyfmv", about = "FMV encoder")]
struct Args {
  /// Input: a .y4m file, or a directory of PNG frames
  input: PathBuf,

  /// Frame rate as N or N:D (PNG directories only; Y4M carries its own)
  fps: Option<String>,

  /// Quality preset, 1 (smallest) to 5 (best)
  #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=5))]
  quality: u8
}

fn quality_from_level(level: u8) -> Quality {
  match level {
    1 => Quality::Min,
    2 => Quality::Low,
    3 => Quality::Default,
    4 => Quality::High,
    _ => Quality::Max
  }
}

fn quality_name(level: u8) -> &'static str {
  match level {
    1 => "min",
    2 => "low",
    3 => "default",
    4 => "high",
    _ => "max"
  }
}

fn parse_fps(s: &str) -> Result<(i32, i32), Box<dyn Error>> {
  let mut parts = s.splitn(2, ':');
  let n: i32 = parts.next().unwrap().parse()?;
  let d: i32 = match parts.next() {
    Some(d) => d.parse()?,
    None => 1
  };
  if n <= 0 || d <= 0 {
    return Err(format!("invalid frame rate '{}' (expected N or N:D)", s).into());
  }
  Ok((n, d))
}

fn out_path_from(input: &Path) -> PathBuf {
  let mut out = input.to_path_buf();
  out.set_extension("fmv");
  out
}

fn fmt_bytes(bytes: u64) -> String {
  let units = ["B", "KB", "MB", "GB", "TB"];
  let mut v = bytes as f64;
  let mut i = 0;
  while v >= 1024.0 && i < units.len() - 1 {
    v /= 1024.0;
    i += 1;
  }
  format!("{:.2} {}", v, units[i])
}

fn fmt_duration(mut s: f64) -> String {
  if s < 0.0 {
    s = 0.0;
  }
  let hours = (s / 3600.0) as u32;
  let minutes = ((s - hours as f64 * 3600.0) / 60.0) as u32;
  let rest = s - hours as f64 * 3600.0 - minutes as f64 * 60.0;
  if hours > 0 {
    format!("{}:{:02}:{:06.3}", hours, minutes, rest)
  } else {
    format!("{}:{:06.3}", minutes, rest)
  }
}

fn print_summary(stats: &EncoderStats, w: usize, h: usize, fps: (i32, i32), sar: (i32, i32),
                 file_bytes: u64, quality: u8) {
  let frames = stats.frames_total;
  let fps_f = fps.0 as f64 / fps.1 as f64;
  let dur_s = if fps_f > 0.0 { frames as f64 / fps_f } else { 0.0 };
  let dar = (w as f64 * sar.0 as f64) / (h as f64 * sar.1 as f64);

  println!("==== Compression summary ====");
  println!("Resolution:        {}x{}  (SAR {}:{})  DAR = {:.3}:1", w, h, sar.0, sar.1, dar);
  println!("Frame rate:        {}/{} = {:.3} fps", fps.0, fps.1, fps_f);
  println!("Duration:          {}", fmt_duration(dur_s));
  println!("Frames:            {}  (keyframes: {})", frames, stats.frames_i);
  if stats.frames_i > 0 {
    let gop = frames as f64 / stats.frames_i as f64;
    println!("Avg keyframe gap:  {:.1} frames (= {:.2} s)", gop, gop / fps_f);
  }
  println!("File size:         {} ({} bytes)", fmt_bytes(file_bytes), file_bytes);
  if dur_s > 0.0 {
    println!("Avg bitrate:       {:.3} Mbit/s", file_bytes as f64 * 8.0 / (dur_s * 1e6));
  }
  let raw_bytes = w as f64 * h as f64 * 1.5 * frames as f64;
  if raw_bytes > 0.0 && file_bytes > 0 {
    let ratio = raw_bytes / file_bytes as f64;
    let saved = (100.0 * (1.0 - file_bytes as f64 / raw_bytes)).clamp(0.0, 100.0);
    println!("Vs raw YUV420:     {} raw  |  {:.2}x smaller  |  {:.1}% space saved",
             fmt_bytes(raw_bytes as u64), ratio, saved);
  }
  println!("Quality preset:    {}", quality_name(quality));
  println!("=============================");
}

fn process_y4m(path: &Path, quality: u8) -> Result<(), Box<dyn Error>> {
  let input = BufReader::new(File::open(path)
    .map_err(|e| format!("cannot open input file '{}': {}", path.display(), e))?);
  let mut reader = Y4mReader::new(input)?;
  if !reader.is_420 {
    return Err("Y4M file must be in 4:2:0 format".into());
  }
  if reader.width % 8 != 0 || reader.height % 8 != 0 {
    return Err(format!("Y4M dimensions must be multiples of 8 (got {}x{})",
                       reader.width, reader.height).into());
  }

  let out_path = out_path_from(path);
  let mut out = BufWriter::new(File::create(&out_path)
    .map_err(|e| format!("cannot create output file '{}': {}", out_path.display(), e))?);

  let mut enc = Encoder::new(reader.width as i32, reader.height as i32, reader.fps_n,
                             reader.fps_d, reader.sar_n, reader.sar_d,
                             quality_from_level(quality))?;
  let mut frame = Frame::new(reader.width, reader.height);
  let mut yuv = vec![0u8; reader.width * reader.height * 3 / 2];
  let mut frames = 0u64;
  while reader.read_frame(&mut frame)? {
    let ysz = reader.width * reader.height;
    let csz = ysz / 4;
    yuv[..ysz].copy_from_slice(&frame.y.data);
    yuv[ysz..ysz + csz].copy_from_slice(&frame.u.data);
    yuv[ysz + csz..].copy_from_slice(&frame.v.data);
    let blob = enc.encode_yuv420(&yuv)?;
    out.write_all(blob)?;
    frames += 1;
    if frames & 0xf == 0 {
      eprint!("\rframes: {}", frames);
    }
  }
  out.write_all(enc.finalize())?;
  out.flush()?;
  eprintln!("\rframes: {}", frames);

  let file_bytes = std::fs::metadata(&out_path)?.len();
  print_summary(&enc.stats(), reader.width, reader.height, (reader.fps_n, reader.fps_d),
                (reader.sar_n, reader.sar_d), file_bytes, quality);
  eprintln!("wrote {}", out_path.display());
  Ok(())
}

fn process_png_dir(path: &Path, fps: (i32, i32), quality: u8) -> Result<(), Box<dyn Error>> {
  let mut names: Vec<PathBuf> = std::fs::read_dir(path)
    .map_err(|e| format!("cannot open directory '{}': {}", path.display(), e))?
    .filter_map(|e| e.ok())
    .map(|e| e.path())
    .filter(|p| {
      p.is_file()
        && p.extension()
          .map(|ext| ext.eq_ignore_ascii_case("png"))
          .unwrap_or(false)
    })
    .collect();
  if names.is_empty() {
    return Err(format!("no PNG files found in directory '{}'", path.display()).into());
  }
  names.sort();

  let out_path = out_path_from(path);
  let mut out = BufWriter::new(File::create(&out_path)
    .map_err(|e| format!("cannot create output file '{}': {}", out_path.display(), e))?);

  let mut enc: Option<Encoder> = None;
  let mut enc_w = 0;
  let mut enc_h = 0;
  let mut frames = 0u64;
  for name in &names {
    let img = image::open(name)
      .map_err(|e| format!("cannot load PNG file '{}': {}", name.display(), e))?
      .to_rgba8();
    let (w, h) = (img.width() as usize, img.height() as usize);
    if enc.is_none() {
      if w % 8 != 0 || h % 8 != 0 {
        return Err(format!("PNG dimensions must be multiples of 8 (got {}x{})", w, h).into());
      }
      enc_w = w;
      enc_h = h;
      enc = Some(Encoder::new(w as i32, h as i32, fps.0, fps.1, 1, 1,
                              quality_from_level(quality))?);
    } else if w != enc_w || h != enc_h {
      return Err(format!("size mismatch in '{}' (got {}x{}, expected {}x{})",
                         name.display(), w, h, enc_w, enc_h).into());
    }
    let enc = enc.as_mut().unwrap();
    let blob = enc.encode_xbgr(img.as_raw())?;
    out.write_all(blob)?;
    frames += 1;
    if frames & 0xf == 0 {
      eprint!("\rframes: {}", frames);
    }
  }

  let mut enc = enc.unwrap();
  out.write_all(enc.finalize())?;
  out.flush()?;
  eprintln!("\rframes: {}", frames);

  let file_bytes = std::fs::metadata(&out_path)?.len();
  print_summary(&enc.stats(), enc_w, enc_h, fps, (1, 1), file_bytes, quality);
  eprintln!("wrote {}", out_path.display());
  Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
  let is_y4m = args.input.extension().map(|e| e.eq_ignore_ascii_case("y4m")).unwrap_or(false);
  if is_y4m {
    process_y4m(&args.input, args.quality)
  } else if args.input.is_dir() {
    let fps_arg = args.fps.as_deref().ok_or("PNG mode requires a frame rate (N or N:D)")?;
    let fps = parse_fps(fps_arg)?;
    process_png_dir(&args.input, fps, args.quality)
  } else {
    Err(format!("unknown input type '{}' (expected a .y4m file or a directory)",
                args.input.display()).into())
  }
}

fn main() -> ExitCode {
  env_logger::init();
  let args = Args::parse();
  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{}", e);
      ExitCode::FAILURE
    }
  }
}
