//! Math types.
//!
//! Poses travel through records and scene attributes as text, so besides the
//! arithmetic this module owns the `"x y z"` attribute encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Parses a space-separated `"x y z"` attribute string.
    pub fn parse_attr(s: &str) -> Option<Self> {
        let mut parts = s.split_whitespace().map(|p| p.parse::<f64>().ok());
        let x = parts.next()??;
        let y = parts.next()??;
        let z = parts.next()??;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(x, y, z))
    }

    /// Formats as a space-separated `"x y z"` attribute string.
    pub fn to_attr(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// Euler rotation in degrees.
///
/// Serialized as the `"x y z"` string form used by pose records.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rotation(pub Vec3);

impl Rotation {
    pub const ZERO: Self = Self(Vec3::ZERO);

    pub const fn degrees(x: f64, y: f64, z: f64) -> Self {
        Self(Vec3::new(x, y, z))
    }

    pub fn parse_attr(s: &str) -> Option<Self> {
        Vec3::parse_attr(s).map(Self)
    }

    pub fn to_attr(self) -> String {
        self.0.to_attr()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Rotation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_attr())
    }
}

impl<'de> Deserialize<'de> for Rotation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rotation::parse_attr(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid rotation `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_attr_roundtrip_keeps_exact_values() {
        let v = Vec3::new(2.25, 0.2, -0.6);
        assert_eq!(v.to_attr(), "2.25 0.2 -0.6");
        assert_eq!(Vec3::parse_attr(&v.to_attr()), Some(v));
    }

    #[test]
    fn vec3_parse_rejects_bad_input() {
        assert_eq!(Vec3::parse_attr("1 2"), None);
        assert_eq!(Vec3::parse_attr("1 2 3 4"), None);
        assert_eq!(Vec3::parse_attr("a b c"), None);
        assert_eq!(Vec3::parse_attr("  1   2 3 "), Some(Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn rotation_serializes_as_string() {
        let r = Rotation::degrees(0.0, 0.0, -10.0);
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json, serde_json::json!("0 0 -10"));
        let back: Rotation = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
