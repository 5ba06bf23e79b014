//! Portable ring-based boundary format for home-range polygons.
//!
//! Coordinates are `[longitude, latitude]` in degrees, exactly as produced by
//! the estimators. Every ring is closed (first vertex repeated last); within a
//! polygon the exterior ring comes first, followed by its holes.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

pub type Ring = Vec<[f64; 2]>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "coordinates")]
pub enum Boundary {
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Boundary {
    pub fn from_polygon(polygon: &Polygon<f64>) -> Self {
        Boundary::Polygon(encode_polygon(polygon))
    }

    /// Encode a multi-polygon; a single member collapses to `Polygon`.
    /// Returns `None` when there is nothing to encode.
    pub fn from_multi_polygon(multi: &MultiPolygon<f64>) -> Option<Self> {
        let polygons: Vec<&Polygon<f64>> = multi
            .iter()
            .filter(|p| !p.exterior().0.is_empty())
            .collect();
        match polygons.as_slice() {
            [] => None,
            [single] => Some(Boundary::from_polygon(single)),
            many => Some(Boundary::MultiPolygon(
                many.iter().map(|p| encode_polygon(p)).collect(),
            )),
        }
    }

    pub fn polygon_count(&self) -> usize {
        match self {
            Boundary::Polygon(_) => 1,
            Boundary::MultiPolygon(polys) => polys.len(),
        }
    }

    /// Rings of every polygon, exterior first.
    pub fn polygons(&self) -> Vec<&[Ring]> {
        match self {
            Boundary::Polygon(rings) => vec![rings.as_slice()],
            Boundary::MultiPolygon(polys) => polys.iter().map(Vec::as_slice).collect(),
        }
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(self.polygons().into_iter().filter_map(decode_polygon).collect())
    }
}

fn encode_polygon(polygon: &Polygon<f64>) -> Vec<Ring> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .map(encode_ring)
        .filter(|ring| !ring.is_empty())
        .collect()
}

fn encode_ring(line: &LineString<f64>) -> Ring {
    let mut ring: Ring = line.coords().map(|c| [c.x, c.y]).collect();
    close_ring(&mut ring);
    ring
}

pub(crate) fn close_ring(ring: &mut Ring) {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
}

fn decode_polygon(rings: &[Ring]) -> Option<Polygon<f64>> {
    let (exterior, holes) = rings.split_first()?;
    Some(Polygon::new(
        decode_ring(exterior),
        holes.iter().map(decode_ring).collect(),
    ))
}

fn decode_ring(ring: &Ring) -> LineString<f64> {
    LineString::new(ring.iter().map(|&[x, y]| Coord { x, y }).collect())
}
