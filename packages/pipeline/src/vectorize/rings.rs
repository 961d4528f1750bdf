//! Boundary tracing on the pixel-corner lattice.
//!
//! Vertices are `(x, y)` = `(col, row)` corner coordinates with y pointing
//! down. Every boundary edge is directed so its region lies on the right,
//! which makes outer rings positive and holes negative under the shoelace
//! formula in these coordinates.

use ahash::AHashMap;
use ndarray::Array2;

pub type Vertex = (i64, i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: Vertex,
    pub to: Vertex,
}

impl Edge {
    fn direction(&self) -> Vertex {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// One polygon in pixel-corner coordinates; rings are closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelPolygon {
    pub exterior: Vec<Vertex>,
    pub holes: Vec<Vec<Vertex>>,
}

/// Boundary edges of every region, indexed by `id - 1`.
pub fn boundary_edges(ids: &Array2<u32>, region_count: usize) -> Vec<Vec<Edge>> {
    let (height, width) = ids.dim();
    let mut edges = vec![Vec::new(); region_count];
    let id_at = |r: i64, c: i64| -> u32 {
        if r < 0 || c < 0 || r >= height as i64 || c >= width as i64 {
            0
        } else {
            ids[[r as usize, c as usize]]
        }
    };

    for ((r, c), &id) in ids.indexed_iter() {
        if id == 0 {
            continue;
        }
        let Some(out) = edges.get_mut(id as usize - 1) else {
            continue;
        };
        let (x, y) = (c as i64, r as i64);
        if id_at(y - 1, x) != id {
            out.push(Edge { from: (x, y), to: (x + 1, y) });
        }
        if id_at(y, x + 1) != id {
            out.push(Edge { from: (x + 1, y), to: (x + 1, y + 1) });
        }
        if id_at(y + 1, x) != id {
            out.push(Edge { from: (x + 1, y + 1), to: (x, y + 1) });
        }
        if id_at(y, x - 1) != id {
            out.push(Edge { from: (x, y + 1), to: (x, y) });
        }
    }
    edges
}

/// Right-hand turn of a direction in y-down coordinates.
fn turn_right(d: Vertex) -> Vertex {
    (-d.1, d.0)
}

fn turn_left(d: Vertex) -> Vertex {
    (d.1, -d.0)
}

/// Links edges into closed rings. At a vertex with two outgoing edges the
/// rightmost turn wins, so regions touching only at a corner yield separate
/// rings.
pub fn trace_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: AHashMap<Vertex, Vec<usize>> = AHashMap::default();
    for (i, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(i);
    }

    let next_edge = |current: usize| -> Option<usize> {
        let candidates = outgoing.get(&edges[current].to)?;
        if let [only] = candidates.as_slice() {
            return Some(*only);
        }
        let d = edges[current].direction();
        [turn_right(d), d, turn_left(d)]
            .into_iter()
            .find_map(|want| {
                candidates
                    .iter()
                    .copied()
                    .find(|&i| edges[i].direction() == want)
            })
            .or_else(|| candidates.first().copied())
    };

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            ring.push(edges[current].from);
            match next_edge(current) {
                Some(next) if next != start && !used[next] => current = next,
                _ => break,
            }
        }
        rings.extend(split_at_repeats(ring).into_iter().map(simplify));
    }
    rings
}

/// Splits a ring that passes through a vertex more than once into simple
/// loops. A background pixel pinched against the outline at one corner comes
/// out as its own (negative) loop.
fn split_at_repeats(ring: Vec<Vertex>) -> Vec<Vec<Vertex>> {
    let mut loops = Vec::new();
    let mut stack: Vec<Vertex> = Vec::with_capacity(ring.len());
    let mut seen: AHashMap<Vertex, usize> = AHashMap::default();
    for v in ring {
        if let Some(&pos) = seen.get(&v) {
            let closed = stack.split_off(pos);
            for u in &closed[1..] {
                seen.remove(u);
            }
            loops.push(closed);
            stack.push(v);
        } else {
            seen.insert(v, stack.len());
            stack.push(v);
        }
    }
    loops.push(stack);
    loops
}

/// Drops vertices between collinear edges and closes the ring.
fn simplify(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 3 {
        return ring;
    }
    let step = |a: Vertex, b: Vertex| ((b.0 - a.0).signum(), (b.1 - a.1).signum());
    let mut out: Vec<Vertex> = (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let next = ring[(i + 1) % n];
            step(prev, ring[i]) != step(ring[i], next)
        })
        .map(|i| ring[i])
        .collect();
    if let Some(&first) = out.first() {
        out.push(first);
    }
    out
}

/// Twice the signed shoelace area.
pub fn doubled_area(ring: &[Vertex]) -> i64 {
    ring.windows(2)
        .map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1)
        .sum()
}

fn contains(ring: &[Vertex], (px, py): (f64, f64)) -> bool {
    let mut inside = false;
    for w in ring.windows(2) {
        let (x0, y0) = (w[0].0 as f64, w[0].1 as f64);
        let (x1, y1) = (w[1].0 as f64, w[1].1 as f64);
        if (y0 > py) != (y1 > py) {
            let x = x0 + (py - y0) / (y1 - y0) * (x1 - x0);
            if px < x {
                inside = !inside;
            }
        }
    }
    inside
}

/// Centre of the region pixel to the right of the ring's first edge.
fn interior_point(ring: &[Vertex]) -> (f64, f64) {
    let (a, b) = (ring[0], ring[1]);
    let d = ((b.0 - a.0).signum(), (b.1 - a.1).signum());
    let n = turn_right(d);
    (
        a.0 as f64 + 0.5 * (d.0 + n.0) as f64,
        a.1 as f64 + 0.5 * (d.1 + n.1) as f64,
    )
}

/// Traces a region's edges and groups its rings into polygons, attaching
/// each hole to the smallest exterior that contains it.
pub fn polygons(edges: &[Edge]) -> Vec<PixelPolygon> {
    let mut exteriors: Vec<(Vec<Vertex>, i64)> = Vec::new();
    let mut holes = Vec::new();
    for ring in trace_rings(edges) {
        if ring.len() < 4 {
            continue;
        }
        let area = doubled_area(&ring);
        if area > 0 {
            exteriors.push((ring, area));
        } else if area < 0 {
            holes.push(ring);
        }
    }

    let mut polygons: Vec<PixelPolygon> = exteriors
        .iter()
        .map(|(ring, _)| PixelPolygon {
            exterior: ring.clone(),
            holes: Vec::new(),
        })
        .collect();

    for hole in holes {
        let inside = interior_point(&hole);
        let owner = exteriors
            .iter()
            .enumerate()
            .filter(|(_, (ring, _))| contains(ring, inside))
            .min_by_key(|(_, (_, area))| *area)
            .map(|(i, _)| i);
        match owner {
            Some(i) => polygons[i].holes.push(hole),
            None => tracing::warn!("Dropping hole with no enclosing exterior at {:?}", hole[0]),
        }
    }
    polygons
}
