// Cyclic intra refresh.
//
// Every macroblock belongs to one of K refresh groups; a counter walks
// the groups, one per P frame, and macroblocks in the matching group are
// forced to intra. Over any K consecutive P frames every macroblock is
// refreshed at least once, which bounds error propagation and lets a
// decoder resynchronize mid-stream.
//
// Group assignment splits the macroblock grid by checkerboard parity
// first (so neighbouring refreshes never land on the same frame), then
// scatters each parity class across its share of the groups with a
// spatial hash.

pub const CIR_GROUPS: usize = 120;

fn hash_xy(x: u32, y: u32) -> u32 {
  (x.wrapping_mul(73856093)) ^ (y.wrapping_mul(19349663)) ^ 0x9e3779b9
}

pub struct RefreshMap {
  pub groups: u16,
  gid: Vec<u16>
}

impl RefreshMap {
  pub fn new(mb_w: usize, mb_h: usize) -> Self {
    let k = CIR_GROUPS;
    let mb_n = mb_w * mb_h;
    let mut gid = vec![0u16; mb_n];

    let n_a = (0..mb_h)
      .flat_map(|my| (0..mb_w).map(move |mx| (mx + my) & 1))
      .filter(|&p| p == 0)
      .count();

    // Split the groups between the two parity classes in proportion to
    // their populations, keeping at least one group on each side
    let k_a = (((k * n_a + mb_n / 2) / mb_n).max(1)).min(k - 1);
    let k_b = k - k_a;

    for my in 0..mb_h {
      for mx in 0..mb_w {
        let parity = (mx + my) & 1;
        let (base, k_side) = if parity == 0 { (0, k_a) } else { (k_a, k_b) };
        let g = base + (hash_xy(mx as u32, my as u32) as usize) % k_side;
        gid[my * mb_w + mx] = g as u16;
      }
    }

    Self {
      groups: k as u16,
      gid: gid
    }
  }

  // Group ID of the macroblock at (mx, my)
  pub fn group(&self, mb_w: usize, mx: usize, my: usize) -> u16 {
    self.gid[my * mb_w + mx]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_group_is_in_range() {
    let map = RefreshMap::new(12, 9);
    for my in 0..9 {
      for mx in 0..12 {
        assert!(map.group(12, mx, my) < map.groups);
      }
    }
  }

  #[test]
  fn parity_classes_use_disjoint_group_ranges() {
    let mb_w = 10;
    let mb_h = 10;
    let map = RefreshMap::new(mb_w, mb_h);
    // With an even split, K_A = 60
    let k_a = 60;
    for my in 0..mb_h {
      for mx in 0..mb_w {
        let g = map.group(mb_w, mx, my) as usize;
        if (mx + my) & 1 == 0 {
          assert!(g < k_a);
        } else {
          assert!(g >= k_a);
        }
      }
    }
  }

  #[test]
  fn refresh_covers_every_macroblock_within_one_cycle() {
    // Walking the counter through all K groups must hit each MB exactly
    // once, since each MB has a single group ID
    let mb_w = 7;
    let mb_h = 5;
    let map = RefreshMap::new(mb_w, mb_h);
    let mut hits = vec![0u32; mb_w * mb_h];
    for frame in 0..map.groups {
      for my in 0..mb_h {
        for mx in 0..mb_w {
          if map.group(mb_w, mx, my) == frame {
            hits[my * mb_w + mx] += 1;
          }
        }
      }
    }
    assert!(hits.iter().all(|&h| h == 1));
  }

  #[test]
  fn tiny_grids_still_get_valid_groups() {
    let map = RefreshMap::new(1, 1);
    assert!(map.group(1, 0, 0) < map.groups);
  }
}
