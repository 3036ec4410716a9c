//! Per-tick view of the game world, as supplied by the host glue.
//!
//! Host data is loosely typed: coordinates may be missing, `null`, strings or
//! NaN. Decoding never fails on a bad coordinate; it becomes `None` and the
//! entity is skipped during accumulation.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPoint {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
}

impl SnapshotPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
        }
    }

    /// Both coordinates, if present and finite.
    #[inline]
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        }
    }
}

/// The snake the collector is attached to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observer {
    /// Absent ids never match, so every body counts as an enemy.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
    /// Radians, world frame.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub scale: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub length: Option<f64>,
    #[serde(default)]
    pub boosting: bool,
}

impl Observer {
    /// Position and heading, the minimum needed to emit a frame.
    pub fn pose(&self) -> Option<(f64, f64, f64)> {
        match (self.x, self.y, self.heading) {
            (Some(x), Some(y), Some(h)) if x.is_finite() && y.is_finite() && h.is_finite() => {
                Some((x, y, h))
            }
            _ => None,
        }
    }
}

/// One snake body; `points[0]` is the head.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub scale: Option<f64>,
    #[serde(default)]
    pub points: Vec<SnapshotPoint>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Food {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub size: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    #[serde(default)]
    pub observer: Option<Observer>,
    #[serde(default)]
    pub bodies: Vec<Body>,
    #[serde(default)]
    pub food: Vec<Food>,
}

/// Raw pointing state: offset of the pointer from screen center in world
/// axes, plus the boost button.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerState {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
    #[serde(default)]
    pub boost: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Number(f64),
    Other(serde::de::IgnoredAny),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match LenientNumber::deserialize(deserializer)? {
        LenientNumber::Number(value) => Some(value),
        LenientNumber::Other(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_numeric_coordinates_decode_as_missing() {
        let food: Vec<Food> = serde_json::from_str(
            r#"[{"x": 1.5, "y": "oops", "size": 3}, {"x": null, "y": 2}, {"size": 1}]"#,
        )
        .unwrap();
        assert_eq!(food[0].x, Some(1.5));
        assert_eq!(food[0].y, None);
        assert_eq!(food[0].size, Some(3.0));
        assert_eq!(food[1].x, None);
        assert_eq!(food[2], Food { x: None, y: None, size: Some(1.0) });
    }

    #[test]
    fn coords_reject_nan() {
        let point = SnapshotPoint {
            x: Some(f64::NAN),
            y: Some(1.0),
        };
        assert_eq!(point.coords(), None);
        assert_eq!(SnapshotPoint::new(2.0, 3.0).coords(), Some((2.0, 3.0)));
    }

    #[test]
    fn snapshot_tolerates_absent_lists() {
        let snapshot: EntitySnapshot = serde_json::from_str(
            r#"{"observer": {"id": 7, "x": 10, "y": 20, "heading": 0.5}}"#,
        )
        .unwrap();
        assert!(snapshot.bodies.is_empty());
        assert!(snapshot.food.is_empty());
        assert_eq!(
            snapshot.observer.and_then(|o| o.pose()),
            Some((10.0, 20.0, 0.5))
        );
    }
}
