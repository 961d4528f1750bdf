use crate::config::Connectivity;
use ndarray::{Array2, ArrayView2};

const EDGE_NEIGHBOURS: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
const ALL_NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// A connected group of same-class pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// 1-based, in row-major discovery order
    pub id: u32,
    pub class: u8,
    pub pixel_count: usize,
    /// `(row, col)` of the first pixel met in row-major order
    pub first_pixel: (usize, usize),
}

/// Per-pixel region ids (`0` for background) and the regions they refer to.
/// `regions[k - 1]` describes id `k`.
#[derive(Clone, Debug)]
pub struct RegionMap {
    pub ids: Array2<u32>,
    pub regions: Vec<Region>,
}

impl RegionMap {
    pub fn region(&self, id: u32) -> Option<&Region> {
        id.checked_sub(1).and_then(|i| self.regions.get(i as usize))
    }
}

/// Flood-fills every non-background pixel into regions.
pub fn label_regions(
    labels: ArrayView2<'_, u8>,
    background: u8,
    connectivity: Connectivity,
) -> RegionMap {
    let (height, width) = labels.dim();
    let neighbours: &[(isize, isize)] = match connectivity {
        Connectivity::Four => &EDGE_NEIGHBOURS,
        Connectivity::Eight => &ALL_NEIGHBOURS,
    };

    let mut ids = Array2::<u32>::zeros((height, width));
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for row in 0..height {
        for col in 0..width {
            let class = labels[[row, col]];
            if class == background || ids[[row, col]] != 0 {
                continue;
            }

            let id = regions.len() as u32 + 1;
            let mut pixel_count = 0usize;
            ids[[row, col]] = id;
            stack.push((row, col));
            while let Some((r, c)) = stack.pop() {
                pixel_count += 1;
                for &(dr, dc) in neighbours {
                    let (Some(nr), Some(nc)) =
                        (r.checked_add_signed(dr), c.checked_add_signed(dc))
                    else {
                        continue;
                    };
                    if nr >= height || nc >= width {
                        continue;
                    }
                    if ids[[nr, nc]] == 0 && labels[[nr, nc]] == class {
                        ids[[nr, nc]] = id;
                        stack.push((nr, nc));
                    }
                }
            }

            regions.push(Region {
                id,
                class,
                pixel_count,
                first_pixel: (row, col),
            });
        }
    }

    RegionMap { ids, regions }
}
