// Scene cut detection.
//
// Both metrics run at quarter resolution: a motion-tolerant SAD (the
// minimum over small shifts, so a pan does not read as a cut) and an L1
// distance between coarse luma histograms (which catches fades and
// palette changes that leave the SAD low). The caller combines them with
// the fixed thresholds below.

// Empirically tuned cut thresholds
const CUT_HIST_ONLY: i32 = 3500;
const CUT_SAD_HI: i32 = 26;
const CUT_SAD_MID: i32 = 18;
const CUT_HIST_MID: i32 = 1500;

// Shift search radius for the SAD metric, in quarter-res pixels
const RAD4: i32 = 2;

#[derive(Clone, Copy, Debug, Default)]
pub struct CutMetrics {
  // Per-pixel SAD at quarter resolution, minimized over small shifts
  pub sad_perpx: i32,
  // Histogram L1 distance, in ten-thousandths per pixel
  pub hist_l1_mmp: i32
}

// Whole-plane SAD between A and B with B shifted by (dx, dy), edge
// clamped, with a running cutoff
fn sad_plane_shifted(a: &[u8], b: &[u8], w: usize, h: usize, dx: i32, dy: i32, cutoff: i64) -> i64 {
  let mut s = 0i64;
  for y in 0..h as i32 {
    let yb = (y + dy).clamp(0, h as i32 - 1) as usize;
    let ra = &a[y as usize * w..y as usize * w + w];
    let rb = &b[yb * w..yb * w + w];
    for x in 0..w as i32 {
      let xb = (x + dx).clamp(0, w as i32 - 1) as usize;
      s += (ra[x as usize] as i64 - rb[xb] as i64).abs();
    }
    if s >= cutoff {
      return s;
    }
  }
  s
}

// 32-bin luma histogram
fn hist32(img: &[u8]) -> [u32; 32] {
  let mut hist = [0u32; 32];
  for &p in img {
    hist[(p >> 3) as usize] += 1;
  }
  hist
}

// Compute both cut metrics between the current and reference luma at
// quarter resolution
pub fn cut_metrics(cur4: &[u8], ref4: &[u8], w4: usize, h4: usize) -> CutMetrics {
  let mut best = i64::MAX;
  for dy in -RAD4..=RAD4 {
    for dx in -RAD4..=RAD4 {
      let s = sad_plane_shifted(cur4, ref4, w4, h4, dx, dy, best);
      if s < best {
        best = s;
      }
    }
  }
  let n = (w4 * h4) as i64;
  let sad_perpx = ((best + (n >> 1)) / n) as i32;

  let hc = hist32(cur4);
  let hr = hist32(ref4);
  let mut diff = 0i64;
  for i in 0..32 {
    diff += (hc[i] as i64 - hr[i] as i64).abs();
  }
  let hist_l1_mmp = ((diff * 10000) / n) as i32;

  CutMetrics {
    sad_perpx: sad_perpx,
    hist_l1_mmp: hist_l1_mmp
  }
}

// Decide whether the metrics indicate a scene cut
pub fn is_cut(m: &CutMetrics) -> bool {
  m.hist_l1_mmp >= CUT_HIST_ONLY
    || m.sad_perpx >= CUT_SAD_HI
    || (m.sad_perpx >= CUT_SAD_MID && m.hist_l1_mmp >= CUT_HIST_MID)
}
