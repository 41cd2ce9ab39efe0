use crate::types::TileRect;
use ndarray::Array2;
use std::collections::HashMap;

/// Barycentric weight tolerance for pixels on triangle edges
const EDGE_EPSILON: f64 = -1e-9;
/// Walk length after which point location falls back to a full scan
const MAX_WALK_STEPS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    /// Counter-clockwise vertex ids
    v: [usize; 3],
    /// `adj[i]` is the triangle across the edge opposite `v[i]`
    adj: [Option<usize>; 3],
    alive: bool,
}

/// Incremental Delaunay triangulation (Bowyer-Watson)
///
/// Vertex ids 0..3 are the enclosing super triangle; input point `k` has id `k + 3`.
/// Duplicate points are skipped and never appear in a triangle.
#[derive(Debug, Clone)]
pub struct Delaunay {
    points: Vec<[f64; 2]>,
    triangles: Vec<Triangle>,
    last: usize,
}

impl Delaunay {
    pub fn new(points: &[[f64; 2]]) -> Self {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p[0]);
            min_y = min_y.min(p[1]);
            max_x = max_x.max(p[0]);
            max_y = max_y.max(p[1]);
        }
        if points.is_empty() {
            (min_x, min_y, max_x, max_y) = (0.0, 0.0, 1.0, 1.0);
        }

        let d = (max_x - min_x).max(max_y - min_y).max(1.0);
        let cx = 0.5 * (min_x + max_x);
        let cy = 0.5 * (min_y + max_y);

        let mut all = Vec::with_capacity(points.len() + 3);
        all.push([cx - 20.0 * d, cy - d]);
        all.push([cx + 20.0 * d, cy - d]);
        all.push([cx, cy + 20.0 * d]);
        all.extend_from_slice(points);

        let mut triangulation = Self {
            points: all,
            triangles: vec![Triangle { v: [0, 1, 2], adj: [None; 3], alive: true }],
            last: 0,
        };
        for id in 3..triangulation.points.len() {
            triangulation.insert(id);
        }
        triangulation
    }

    /// Triangles made only of input points, as input point indices
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.triangles
            .iter()
            .filter(|t| t.alive && t.v.iter().all(|&v| v >= 3))
            .map(|t| [t.v[0] - 3, t.v[1] - 3, t.v[2] - 3])
    }

    fn insert(&mut self, id: usize) {
        let p = self.points[id];
        if !(p[0].is_finite() && p[1].is_finite()) {
            return;
        }
        let Some(start) = self.locate(p) else {
            return;
        };
        if self.triangles[start].v.iter().any(|&v| self.points[v] == p) {
            return;
        }

        let mut in_cavity = HashMap::new();
        let mut cavity = vec![start];
        in_cavity.insert(start, true);
        let mut queue = vec![start];
        while let Some(t) = queue.pop() {
            for n in self.triangles[t].adj.into_iter().flatten() {
                if in_cavity.contains_key(&n) {
                    continue;
                }
                let inside = self.in_circumcircle(n, p);
                in_cavity.insert(n, inside);
                if inside {
                    cavity.push(n);
                    queue.push(n);
                }
            }
        }

        // grow the cavity until every boundary edge sees the new point on its left
        let boundary = loop {
            let mut boundary = Vec::new();
            let mut grow = None;
            for &t in &cavity {
                let tri = self.triangles[t];
                for i in 0..3 {
                    let outer = tri.adj[i];
                    if outer.map_or(false, |n| in_cavity.get(&n) == Some(&true)) {
                        continue;
                    }
                    let a = tri.v[(i + 1) % 3];
                    let b = tri.v[(i + 2) % 3];
                    if orient(self.points[a], self.points[b], p) <= 0.0 {
                        if let Some(n) = outer {
                            grow = Some(n);
                            break;
                        }
                    }
                    boundary.push((a, b, outer, t));
                }
                if grow.is_some() {
                    break;
                }
            }
            match grow {
                Some(n) => {
                    in_cavity.insert(n, true);
                    cavity.push(n);
                }
                None => break boundary,
            }
        };

        for &t in &cavity {
            self.triangles[t].alive = false;
        }

        let mut by_start = HashMap::with_capacity(boundary.len());
        let mut by_end = HashMap::with_capacity(boundary.len());
        let mut created = Vec::with_capacity(boundary.len());
        for &(a, b, outer, old) in &boundary {
            let new = self.triangles.len();
            self.triangles.push(Triangle { v: [a, b, id], adj: [None, None, outer], alive: true });
            if let Some(n) = outer {
                for slot in self.triangles[n].adj.iter_mut() {
                    if *slot == Some(old) {
                        *slot = Some(new);
                    }
                }
            }
            by_start.insert(a, new);
            by_end.insert(b, new);
            created.push(new);
        }
        for &t in &created {
            let [a, b, _] = self.triangles[t].v;
            self.triangles[t].adj[0] = by_start.get(&b).copied();
            self.triangles[t].adj[1] = by_end.get(&a).copied();
        }

        if let Some(&t) = created.last() {
            self.last = t;
        }
    }

    /// Alive triangle containing `p`, walking from the last inserted triangle
    fn locate(&self, p: [f64; 2]) -> Option<usize> {
        let mut t = self.last;
        'walk: for _ in 0..MAX_WALK_STEPS {
            let tri = &self.triangles[t];
            for i in 0..3 {
                let a = self.points[tri.v[(i + 1) % 3]];
                let b = self.points[tri.v[(i + 2) % 3]];
                if orient(a, b, p) < 0.0 {
                    match tri.adj[i] {
                        Some(n) => {
                            t = n;
                            continue 'walk;
                        }
                        None => break 'walk,
                    }
                }
            }
            return Some(t);
        }

        self.triangles.iter().position(|tri| {
            tri.alive
                && (0..3).all(|i| {
                    let a = self.points[tri.v[(i + 1) % 3]];
                    let b = self.points[tri.v[(i + 2) % 3]];
                    orient(a, b, p) >= 0.0
                })
        })
    }

    fn in_circumcircle(&self, t: usize, d: [f64; 2]) -> bool {
        let [a, b, c] = self.triangles[t].v.map(|v| self.points[v]);
        let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
        let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
        let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
        let det = (adx * adx + ady * ady) * (bdx * cdy - cdx * bdy)
            - (bdx * bdx + bdy * bdy) * (adx * cdy - cdx * ady)
            + (cdx * cdx + cdy * cdy) * (adx * bdy - bdx * ady);
        det > 0.0
    }
}

/// Twice the signed area of `abc`, positive when counter-clockwise
fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Piecewise-linear interpolation of scattered samples onto a pixel grid
///
/// Samples sit at `(range, azimuth)` pixel positions. Range is multiplied by
/// `range_scale` before triangulating so that triangles are well shaped in
/// ground distance. Pixels of `rect` outside the triangulated hull are `None`.
pub fn grid_linear<const N: usize>(
    positions: &[[f64; 2]],
    values: &[[f64; N]],
    rect: &TileRect,
    range_scale: f64,
) -> Array2<Option<[f64; N]>> {
    let mut grid = Array2::from_elem(rect.shape(), None);
    if positions.len() < 3 || positions.len() != values.len() {
        return grid;
    }

    let scaled: Vec<[f64; 2]> = positions.iter().map(|p| [p[0] * range_scale, p[1]]).collect();
    let triangulation = Delaunay::new(&scaled);

    let (height, width) = rect.shape();
    for [ia, ib, ic] in triangulation.triangles() {
        let (a, b, c) = (scaled[ia], scaled[ib], scaled[ic]);
        let area = orient(a, b, c);
        if area <= 1e-12 {
            continue;
        }

        let min_col = (a[0].min(b[0]).min(c[0]) / range_scale - rect.x as f64).ceil().max(0.0);
        let max_col = (a[0].max(b[0]).max(c[0]) / range_scale - rect.x as f64).floor();
        let min_row = (a[1].min(b[1]).min(c[1]) - rect.y as f64).ceil().max(0.0);
        let max_row = (a[1].max(b[1]).max(c[1]) - rect.y as f64).floor();
        if max_col < 0.0 || max_row < 0.0 || min_col >= width as f64 || min_row >= height as f64 {
            continue;
        }
        let max_col = (max_col as usize).min(width - 1);
        let max_row = (max_row as usize).min(height - 1);

        for row in min_row as usize..=max_row {
            for col in min_col as usize..=max_col {
                if grid[[row, col]].is_some() {
                    continue;
                }
                let q = [(rect.x + col) as f64 * range_scale, (rect.y + row) as f64];
                let wa = orient(b, c, q) / area;
                let wb = orient(c, a, q) / area;
                let wc = orient(a, b, q) / area;
                if wa < EDGE_EPSILON || wb < EDGE_EPSILON || wc < EDGE_EPSILON {
                    continue;
                }
                let mut value = [0.0; N];
                for k in 0..N {
                    value[k] = wa * values[ia][k] + wb * values[ib][k] + wc * values[ic][k];
                }
                grid[[row, col]] = Some(value);
            }
        }
    }

    grid
}
