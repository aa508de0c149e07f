//! Colormap VisAssets
//!
//! Colormaps are stored as XML control points:
//!
//! ```xml
//! <ColorMaps>
//!   <ColorMap space="CIELAB" name="...">
//!     <Point x="0.0" o="1" r="0.0" g="0.0" b="0.5"/>
//!     ...
//!   </ColorMap>
//! </ColorMaps>
//! ```
//!
//! Lookups between control points interpolate in CIELab space, so
//! gradients stay perceptually even. Values beyond the first/last control
//! point clamp to that point's color.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{VisAssetError, VisAssetResult};

/// Default width of rasterised gradient textures
pub const DEFAULT_TEXTURE_WIDTH: usize = 1024;

/// A color in RGBA format (0.0 to 1.0)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Create a new color
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create a color from RGB (alpha = 1.0)
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Create a color from hex string (e.g., "#FF5733" or "FF5733")
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 && hex.len() != 8 {
            return None;
        }

        let channel = |i: usize| -> Option<f32> {
            Some(u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()? as f32 / 255.0)
        };
        let a = if hex.len() == 8 { channel(6)? } else { 1.0 };

        Some(Self::new(channel(0)?, channel(2)?, channel(4)?, a))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        format!(
            "#{:02X}{:02X}{:02X}",
            (self.r * 255.0).round() as u8,
            (self.g * 255.0).round() as u8,
            (self.b * 255.0).round() as u8
        )
    }

    /// Convert to array [r, g, b, a]
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_rgba8(&self) -> [u8; 4] {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0) as u8;
        [c(self.r), c(self.g), c(self.b), c(self.a)]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::rgb(0.5, 0.5, 0.5)
    }
}

/// A color in CIELab space (D65 white point)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lab {
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

const WHITE_X: f32 = 0.95047;
const WHITE_Y: f32 = 1.0;
const WHITE_Z: f32 = 1.08883;

impl Lab {
    /// Convert from sRGB (alpha ignored)
    pub fn from_rgb(color: &Color) -> Self {
        let linear = |c: f32| {
            if c > 0.04045 {
                ((c + 0.055) / 1.055).powf(2.4)
            } else {
                c / 12.92
            }
        };
        let (r, g, b) = (linear(color.r), linear(color.g), linear(color.b));

        let x = (r * 0.4124 + g * 0.3576 + b * 0.1805) / WHITE_X;
        let y = (r * 0.2126 + g * 0.7152 + b * 0.0722) / WHITE_Y;
        let z = (r * 0.0193 + g * 0.1192 + b * 0.9505) / WHITE_Z;

        let f = |t: f32| {
            if t > 0.008856 {
                t.cbrt()
            } else {
                7.787 * t + 16.0 / 116.0
            }
        };
        let (fx, fy, fz) = (f(x), f(y), f(z));

        Self {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }

    /// Convert to sRGB, clamped to the displayable gamut
    pub fn to_rgb(&self) -> Color {
        let fy = (self.l + 16.0) / 116.0;
        let fx = self.a / 500.0 + fy;
        let fz = fy - self.b / 200.0;

        let finv = |t: f32| {
            let cubed = t * t * t;
            if cubed > 0.008856 {
                cubed
            } else {
                (t - 16.0 / 116.0) / 7.787
            }
        };
        let x = finv(fx) * WHITE_X;
        let y = finv(fy) * WHITE_Y;
        let z = finv(fz) * WHITE_Z;

        let r = x * 3.2406 + y * -1.5372 + z * -0.4986;
        let g = x * -0.9689 + y * 1.8758 + z * 0.0415;
        let b = x * 0.0557 + y * -0.2040 + z * 1.0570;

        let gamma = |c: f32| {
            let c = if c > 0.0031308 {
                1.055 * c.powf(1.0 / 2.4) - 0.055
            } else {
                12.92 * c
            };
            c.clamp(0.0, 1.0)
        };

        Color::rgb(gamma(r), gamma(g), gamma(b))
    }

    pub fn lerp(a: &Lab, b: &Lab, t: f32) -> Lab {
        Lab {
            l: a.l + (b.l - a.l) * t,
            a: a.a + (b.a - a.a) * t,
            b: a.b + (b.b - a.b) * t,
        }
    }
}

/// A colormap for mapping normalized scalar values to colors
#[derive(Clone, Debug, PartialEq)]
pub struct Colormap {
    /// Name of the colormap
    pub name: String,
    /// Control points, sorted by position
    points: Vec<(f32, Color)>,
}

impl Colormap {
    /// Create a colormap from control points in any order
    pub fn from_points(name: impl Into<String>, mut points: Vec<(f32, Color)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            name: name.into(),
            points,
        }
    }

    /// Black to white
    pub fn grayscale() -> Self {
        Self::from_points(
            "grayscale",
            vec![(0.0, Color::rgb(0.0, 0.0, 0.0)), (1.0, Color::rgb(1.0, 1.0, 1.0))],
        )
    }

    /// Parse a colormap XML document
    pub fn from_xml(xml: &str) -> VisAssetResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut name = String::new();
        let mut points = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    match e.name().as_ref() {
                        b"ColorMap" => {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"name" {
                                    name = String::from_utf8_lossy(&attr.value).to_string();
                                }
                            }
                        }
                        b"Point" => {
                            let mut values = [None; 5];
                            for attr in e.attributes().flatten() {
                                let slot = match attr.key.as_ref() {
                                    b"x" => 0,
                                    b"r" => 1,
                                    b"g" => 2,
                                    b"b" => 3,
                                    b"o" => 4,
                                    _ => continue,
                                };
                                let text = String::from_utf8_lossy(&attr.value);
                                let value = text.trim().parse::<f32>().map_err(|_| {
                                    VisAssetError::Decode {
                                        file: "colormap.xml".to_string(),
                                        message: format!("bad number '{}'", text),
                                    }
                                })?;
                                values[slot] = Some(value);
                            }
                            match values {
                                [Some(x), Some(r), Some(g), Some(b), o] => {
                                    points.push((x, Color::new(r, g, b, o.unwrap_or(1.0))));
                                }
                                _ => {
                                    return Err(VisAssetError::Decode {
                                        file: "colormap.xml".to_string(),
                                        message: "Point needs x, r, g and b".to_string(),
                                    })
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(VisAssetError::Decode {
                        file: "colormap.xml".to_string(),
                        message: format!("XML parse error: {}", e),
                    })
                }
                _ => {}
            }
            buf.clear();
        }

        if points.is_empty() {
            return Err(VisAssetError::Decode {
                file: "colormap.xml".to_string(),
                message: "no control points".to_string(),
            });
        }

        Ok(Self::from_points(name, points))
    }

    pub fn points(&self) -> &[(f32, Color)] {
        &self.points
    }

    /// Sample the colormap at a position, interpolating in CIELab
    pub fn sample(&self, t: f32) -> Color {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Color::rgb(0.0, 0.0, 0.0),
        };
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }

        let upper = self.points.iter().position(|(x, _)| *x >= t).unwrap_or(0).max(1);
        let (x0, c0) = self.points[upper - 1];
        let (x1, c1) = self.points[upper];
        let alpha = if x1 > x0 { (t - x0) / (x1 - x0) } else { 0.0 };

        let lab = Lab::lerp(&Lab::from_rgb(&c0), &Lab::from_rgb(&c1), alpha);
        let mut color = lab.to_rgb();
        color.a = c0.a + (c1.a - c0.a) * alpha;
        color
    }

    /// Generate a lookup table of the specified size
    pub fn generate_lut(&self, size: usize) -> Vec<Color> {
        (0..size)
            .map(|i| self.sample(i as f32 / (size - 1).max(1) as f32))
            .collect()
    }

    /// Generate RGBA bytes for a 1-D texture (4 bytes per entry)
    pub fn generate_texture(&self, size: usize) -> Vec<u8> {
        self.generate_lut(size)
            .iter()
            .flat_map(|c| c.to_rgba8())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0"?>
        <ColorMaps>
          <ColorMap space="CIELAB" name="BlueRed">
            <Point x="1.0" o="1" r="1.0" g="0.0" b="0.0"/>
            <Point x="0.0" o="1" r="0.0" g="0.0" b="1.0"/>
          </ColorMap>
        </ColorMaps>"#;

    #[test]
    fn test_parse_xml_sorts_points() {
        let cmap = Colormap::from_xml(XML).unwrap();
        assert_eq!(cmap.name, "BlueRed");
        assert_eq!(cmap.points().len(), 2);
        assert_eq!(cmap.points()[0].1, Color::rgb(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_sample_clamps_at_ends() {
        let cmap = Colormap::from_xml(XML).unwrap();
        assert_eq!(cmap.sample(-1.0), Color::rgb(0.0, 0.0, 1.0));
        assert_eq!(cmap.sample(2.0), Color::rgb(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_lab_midpoint_of_grayscale() {
        let mid = Colormap::grayscale().sample(0.5);
        // L* = 50 is darker than sRGB 0.5
        assert!((mid.r - 0.466).abs() < 0.01);
        assert!((mid.r - mid.g).abs() < 1e-3);
        assert!((mid.g - mid.b).abs() < 1e-2);
    }

    #[test]
    fn test_lab_white_point() {
        let lab = Lab::from_rgb(&Color::rgb(1.0, 1.0, 1.0));
        assert!((lab.l - 100.0).abs() < 0.1);
        assert!(lab.a.abs() < 0.5 && lab.b.abs() < 0.5);
    }

    #[test]
    fn test_texture_size() {
        let bytes = Colormap::grayscale().generate_texture(16);
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 255]);
        assert_eq!(&bytes[60..64], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_missing_attributes_rejected() {
        let xml = r#"<ColorMaps><ColorMap><Point x="0" r="1"/></ColorMap></ColorMaps>"#;
        assert!(Colormap::from_xml(xml).is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        let c = Color::from_hex("#336699").unwrap();
        assert_eq!(c.to_hex(), "#336699");
        assert!(Color::from_hex("#12").is_none());
    }
}
