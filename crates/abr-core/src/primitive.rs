//! Primitive input values and primitive gradients
//!
//! Primitives travel as strings with a unit suffix: lengths as `"0.1m"`,
//! percents as `"50%"`, angles as `"30deg"`. Integers, floats and booleans
//! are plain.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InputError, InputResult};

/// Kind of primitive value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Length,
    Percent,
    Angle,
    Integer,
    Float,
    Boolean,
}

impl PrimitiveKind {
    pub fn unit(&self) -> &'static str {
        match self {
            PrimitiveKind::Length => "m",
            PrimitiveKind::Percent => "%",
            PrimitiveKind::Angle => "deg",
            _ => "",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Length => "Length",
            PrimitiveKind::Percent => "Percent",
            PrimitiveKind::Angle => "Angle",
            PrimitiveKind::Integer => "Integer",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Boolean => "Boolean",
        }
    }
}

/// A parsed primitive value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Length(f32),
    /// Percent as written (50% is `Percent(50.0)`)
    Percent(f32),
    /// Degrees
    Angle(f32),
    Integer(i64),
    Float(f32),
    Boolean(bool),
}

impl Primitive {
    /// Parse a value string for a primitive kind
    pub fn parse(kind: PrimitiveKind, value: &str) -> InputResult<Self> {
        let invalid = || InputError::InvalidPrimitive {
            kind: kind.name().to_string(),
            value: value.to_string(),
        };
        let trimmed = value.trim();
        let number = |unit: &str| -> InputResult<f32> {
            let digits = trimmed.strip_suffix(unit).unwrap_or(trimmed).trim();
            let n: f32 = digits.parse().map_err(|_| invalid())?;
            if n.is_finite() {
                Ok(n)
            } else {
                Err(invalid())
            }
        };

        Ok(match kind {
            PrimitiveKind::Length => Primitive::Length(number("m")?),
            PrimitiveKind::Percent => Primitive::Percent(number("%")?),
            PrimitiveKind::Angle => Primitive::Angle(number("deg")?),
            PrimitiveKind::Float => Primitive::Float(number("")?),
            PrimitiveKind::Integer => Primitive::Integer(trimmed.parse().map_err(|_| invalid())?),
            PrimitiveKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Primitive::Boolean(true),
                "false" => Primitive::Boolean(false),
                _ => return Err(invalid()),
            },
        })
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Length(_) => PrimitiveKind::Length,
            Primitive::Percent(_) => PrimitiveKind::Percent,
            Primitive::Angle(_) => PrimitiveKind::Angle,
            Primitive::Integer(_) => PrimitiveKind::Integer,
            Primitive::Float(_) => PrimitiveKind::Float,
            Primitive::Boolean(_) => PrimitiveKind::Boolean,
        }
    }

    /// Numeric value in the primitive's own unit
    pub fn value(&self) -> f32 {
        match *self {
            Primitive::Length(v) | Primitive::Percent(v) | Primitive::Angle(v) | Primitive::Float(v) => v,
            Primitive::Integer(v) => v as f32,
            Primitive::Boolean(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Percent as a fraction (50% is 0.5); other kinds return their value
    pub fn fraction(&self) -> f32 {
        match *self {
            Primitive::Percent(v) => v / 100.0,
            other => other.value(),
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            Primitive::Boolean(b) => b,
            other => other.value() != 0.0,
        }
    }

    /// Same kind, new numeric value
    fn with_value(&self, value: f32) -> Self {
        match self {
            Primitive::Length(_) => Primitive::Length(value),
            Primitive::Percent(_) => Primitive::Percent(value),
            Primitive::Angle(_) => Primitive::Angle(value),
            Primitive::Float(_) => Primitive::Float(value),
            Primitive::Integer(_) => Primitive::Integer(value.round() as i64),
            Primitive::Boolean(_) => Primitive::Boolean(value >= 0.5),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Length(v) => write!(f, "{}m", v),
            Primitive::Percent(v) => write!(f, "{}%", v),
            Primitive::Angle(v) => write!(f, "{}deg", v),
            Primitive::Integer(v) => write!(f, "{}", v),
            Primitive::Float(v) => write!(f, "{}", v),
            Primitive::Boolean(v) => write!(f, "{}", v),
        }
    }
}

/// Piecewise-linear primitive values over 0..1
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveGradient {
    pub uuid: Uuid,
    pub points: Vec<f32>,
    pub values: Vec<Primitive>,
}

impl PrimitiveGradient {
    /// Build from points and value strings; all values must share a kind
    pub fn parse(uuid: Uuid, points: Vec<f32>, values: &[String]) -> InputResult<Self> {
        if points.len() != values.len() || points.is_empty() {
            return Err(InputError::InvalidPrimitive {
                kind: "PrimitiveGradient".to_string(),
                value: format!("{} points for {} values", points.len(), values.len()),
            });
        }
        let kind = infer_kind(&values[0]);
        let parsed = values
            .iter()
            .map(|v| Primitive::parse(kind, v))
            .collect::<InputResult<Vec<_>>>()?;

        let mut stops: Vec<(f32, Primitive)> = points.into_iter().zip(parsed).collect();
        stops.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (points, values) = stops.into_iter().unzip();
        Ok(Self { uuid, points, values })
    }

    pub fn kind(&self) -> Option<PrimitiveKind> {
        self.values.first().map(|v| v.kind())
    }

    /// Interpolate at `t`, clamping beyond the first and last points
    pub fn evaluate(&self, t: f32) -> Primitive {
        let n = self.points.len();
        if t <= self.points[0] || n == 1 {
            return self.values[0];
        }
        if t >= self.points[n - 1] {
            return self.values[n - 1];
        }
        let upper = self.points.iter().position(|&p| p >= t).unwrap_or(n - 1).max(1);
        let (p0, p1) = (self.points[upper - 1], self.points[upper]);
        let (v0, v1) = (self.values[upper - 1].value(), self.values[upper].value());
        let alpha = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
        self.values[upper - 1].with_value(v0 + (v1 - v0) * alpha)
    }

    /// Sample `size` evenly spaced values as fractions (percents become 0..1)
    pub fn sample_fractions(&self, size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| self.evaluate(i as f32 / (size - 1).max(1) as f32).fraction())
            .collect()
    }
}

/// Guess a primitive kind from a value's unit suffix
pub fn infer_kind(value: &str) -> PrimitiveKind {
    let v = value.trim();
    if v.ends_with('%') {
        PrimitiveKind::Percent
    } else if v.ends_with("deg") {
        PrimitiveKind::Angle
    } else if v.ends_with('m') {
        PrimitiveKind::Length
    } else if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false") {
        PrimitiveKind::Boolean
    } else if v.parse::<i64>().is_ok() {
        PrimitiveKind::Integer
    } else {
        PrimitiveKind::Float
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(Primitive::parse(PrimitiveKind::Length, "0.1m").unwrap(), Primitive::Length(0.1));
        assert_eq!(Primitive::parse(PrimitiveKind::Percent, "50%").unwrap().fraction(), 0.5);
        assert_eq!(Primitive::parse(PrimitiveKind::Angle, "30deg").unwrap(), Primitive::Angle(30.0));
        assert_eq!(Primitive::parse(PrimitiveKind::Integer, "7").unwrap(), Primitive::Integer(7));
        assert_eq!(Primitive::parse(PrimitiveKind::Boolean, "True").unwrap(), Primitive::Boolean(true));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Primitive::parse(PrimitiveKind::Length, "abc").is_err());
        assert!(Primitive::parse(PrimitiveKind::Integer, "1.5").is_err());
        assert!(Primitive::parse(PrimitiveKind::Boolean, "yes").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for (kind, text) in [
            (PrimitiveKind::Length, "0.25m"),
            (PrimitiveKind::Percent, "12.5%"),
            (PrimitiveKind::Angle, "90deg"),
            (PrimitiveKind::Boolean, "false"),
        ] {
            let p = Primitive::parse(kind, text).unwrap();
            assert_eq!(p.to_string(), text);
        }
    }

    #[test]
    fn test_gradient_interpolates() {
        let g = PrimitiveGradient::parse(
            Uuid::nil(),
            vec![1.0, 0.0],
            &["100%".to_string(), "0%".to_string()],
        )
        .unwrap();
        assert_eq!(g.kind(), Some(PrimitiveKind::Percent));
        assert_eq!(g.evaluate(0.25), Primitive::Percent(25.0));
        assert_eq!(g.evaluate(-1.0), Primitive::Percent(0.0));
        assert_eq!(g.sample_fractions(3), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_gradient_length_mismatch() {
        assert!(PrimitiveGradient::parse(Uuid::nil(), vec![0.0], &[]).is_err());
    }
}
