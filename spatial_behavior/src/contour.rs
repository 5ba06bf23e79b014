//! Marching-squares iso-contours over a regular 2-D grid.
//!
//! Contours are returned in fractional `(row, col)` index space. Cells whose
//! value is `>= level` are inside. Segment endpoints are keyed by the grid
//! edge they lie on, so chaining is exact and never depends on float equality.

use std::collections::HashMap;

use ndarray::Array2;

/// A grid edge: horizontal between `(r, c)` and `(r, c + 1)`, or vertical
/// between `(r, c)` and `(r + 1, c)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Edge {
    H(usize, usize),
    V(usize, usize),
}

/// A contour as a sequence of `(row, col)` points. Closed contours repeat
/// their first point at the end.
pub type Contour = Vec<(f64, f64)>;

pub fn find_contours(values: &Array2<f64>, level: f64) -> Vec<Contour> {
    let (rows, cols) = values.dim();
    if rows < 2 || cols < 2 {
        return Vec::new();
    }
    let inside = |r: usize, c: usize| values[[r, c]] >= level;

    let mut segments: Vec<(Edge, Edge)> = Vec::new();
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            let mut case = 0u8;
            if inside(r, c) {
                case |= 1;
            }
            if inside(r, c + 1) {
                case |= 2;
            }
            if inside(r + 1, c + 1) {
                case |= 4;
            }
            if inside(r + 1, c) {
                case |= 8;
            }
            let top = Edge::H(r, c);
            let bottom = Edge::H(r + 1, c);
            let left = Edge::V(r, c);
            let right = Edge::V(r, c + 1);
            match case {
                0 | 15 => {}
                1 | 14 => segments.push((top, left)),
                2 | 13 => segments.push((top, right)),
                3 | 12 => segments.push((left, right)),
                4 | 11 => segments.push((right, bottom)),
                6 | 9 => segments.push((top, bottom)),
                7 | 8 => segments.push((left, bottom)),
                5 | 10 => {
                    let center = (values[[r, c]]
                        + values[[r, c + 1]]
                        + values[[r + 1, c]]
                        + values[[r + 1, c + 1]])
                        / 4.0;
                    // saddle: the centre value decides which diagonal connects
                    let cut_off_top_right = (case == 5) == (center >= level);
                    if cut_off_top_right {
                        segments.push((top, right));
                        segments.push((left, bottom));
                    } else {
                        segments.push((top, left));
                        segments.push((right, bottom));
                    }
                }
                _ => unreachable!("case is a 4-bit mask"),
            }
        }
    }

    chain_segments(&segments)
        .into_iter()
        .map(|edges| {
            edges
                .into_iter()
                .map(|e| edge_point(values, e, level))
                .collect()
        })
        .collect()
}

fn chain_segments(segments: &[(Edge, Edge)]) -> Vec<Vec<Edge>> {
    let mut by_edge: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (idx, (a, b)) in segments.iter().enumerate() {
        by_edge.entry(*a).or_default().push(idx);
        by_edge.entry(*b).or_default().push(idx);
    }

    let mut used = vec![false; segments.len()];
    let mut chains = Vec::new();
    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (head, tail) = segments[start];
        let mut forward = vec![head, tail];
        let closed = extend(&mut forward, &by_edge, segments, &mut used);
        if !closed {
            let mut backward = vec![head];
            extend(&mut backward, &by_edge, segments, &mut used);
            backward.reverse();
            backward.pop();
            backward.extend(forward);
            forward = backward;
        }
        chains.push(forward);
    }
    chains
}

/// Walk from the last edge of `chain` through unused segments. Returns
/// `true` when the walk arrives back at the chain's first edge.
fn extend(
    chain: &mut Vec<Edge>,
    by_edge: &HashMap<Edge, Vec<usize>>,
    segments: &[(Edge, Edge)],
    used: &mut [bool],
) -> bool {
    let first = chain[0];
    loop {
        let Some(&current) = chain.last() else {
            return false;
        };
        let next = by_edge
            .get(&current)
            .and_then(|ids| ids.iter().copied().find(|&id| !used[id]));
        let Some(id) = next else {
            return false;
        };
        used[id] = true;
        let (a, b) = segments[id];
        let other = if a == current { b } else { a };
        chain.push(other);
        if other == first {
            return true;
        }
    }
}

fn edge_point(values: &Array2<f64>, edge: Edge, level: f64) -> (f64, f64) {
    match edge {
        Edge::H(r, c) => {
            let t = crossing(values[[r, c]], values[[r, c + 1]], level);
            (r as f64, c as f64 + t)
        }
        Edge::V(r, c) => {
            let t = crossing(values[[r, c]], values[[r + 1, c]], level);
            (r as f64 + t, c as f64)
        }
    }
}

fn crossing(v0: f64, v1: f64, level: f64) -> f64 {
    let t = (level - v0) / (v1 - v0);
    if t.is_finite() {
        t.clamp(0.0, 1.0)
    } else {
        0.5
    }
}
