// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame image filters and the ordered filter chain
//!
//! A [`FilterChain`] is an immutable, cheaply clonable list of
//! [`FilterSpec`]s. Updating the chain means swapping in a new value, so a
//! frame that is already being filtered always finishes with the chain it
//! started with.

use crate::backends::camera::types::Frame;
use image::{RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A named image transform with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum FilterSpec {
    Mono,
    Sepia,
    Noir,
    Vivid,
    Cool,
    Warm,
    Fade,
    Duotone,
    Vignette,
    Negative,
    /// Warm faded instant-film look
    Instant,
    /// Quantize each channel to `levels` steps (at least 2)
    Posterize { levels: u8 },
    /// Invert channels brighter than `threshold` (0..=1)
    Solarize { threshold: f32 },
    /// Add `delta` to every channel
    Brightness { delta: i32 },
    /// Contrast adjustment in percent, negative reduces contrast
    Contrast { amount: f32 },
    #[serde(rename = "huerotate")]
    HueRotate { degrees: i32 },
    /// Gaussian blur, `sigma` must be positive
    Blur { sigma: f32 },
    /// Cut out a rectangle; fails when it exceeds the frame
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

impl FilterSpec {
    /// One representative of every filter, for listings
    pub fn catalogue() -> Vec<FilterSpec> {
        vec![
            FilterSpec::Mono,
            FilterSpec::Sepia,
            FilterSpec::Noir,
            FilterSpec::Vivid,
            FilterSpec::Cool,
            FilterSpec::Warm,
            FilterSpec::Fade,
            FilterSpec::Duotone,
            FilterSpec::Vignette,
            FilterSpec::Negative,
            FilterSpec::Instant,
            FilterSpec::Posterize { levels: 4 },
            FilterSpec::Solarize { threshold: 0.5 },
            FilterSpec::Brightness { delta: 20 },
            FilterSpec::Contrast { amount: 25.0 },
            FilterSpec::HueRotate { degrees: 90 },
            FilterSpec::Blur { sigma: 2.0 },
            FilterSpec::Crop {
                x: 0,
                y: 0,
                width: 320,
                height: 240,
            },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterSpec::Mono => "mono",
            FilterSpec::Sepia => "sepia",
            FilterSpec::Noir => "noir",
            FilterSpec::Vivid => "vivid",
            FilterSpec::Cool => "cool",
            FilterSpec::Warm => "warm",
            FilterSpec::Fade => "fade",
            FilterSpec::Duotone => "duotone",
            FilterSpec::Vignette => "vignette",
            FilterSpec::Negative => "negative",
            FilterSpec::Instant => "instant",
            FilterSpec::Posterize { .. } => "posterize",
            FilterSpec::Solarize { .. } => "solarize",
            FilterSpec::Brightness { .. } => "brightness",
            FilterSpec::Contrast { .. } => "contrast",
            FilterSpec::HueRotate { .. } => "huerotate",
            FilterSpec::Blur { .. } => "blur",
            FilterSpec::Crop { .. } => "crop",
        }
    }

    /// Apply to one image, `None` when the filter cannot produce output
    pub fn apply(&self, input: &RgbaImage) -> Option<RgbaImage> {
        match *self {
            FilterSpec::Posterize { levels } if levels < 2 => None,
            FilterSpec::Solarize { threshold } if !(0.0..=1.0).contains(&threshold) => None,
            FilterSpec::Contrast { amount } if !amount.is_finite() => None,
            FilterSpec::Blur { sigma } if !(sigma.is_finite() && sigma > 0.0) => None,
            FilterSpec::Brightness { delta } => Some(imageops::brighten(input, delta)),
            FilterSpec::Contrast { amount } => Some(imageops::contrast(input, amount)),
            FilterSpec::HueRotate { degrees } => Some(imageops::huerotate(input, degrees)),
            FilterSpec::Blur { sigma } => Some(imageops::blur(input, sigma)),
            FilterSpec::Crop {
                x,
                y,
                width,
                height,
            } => {
                let fits = width > 0
                    && height > 0
                    && x.checked_add(width).is_some_and(|r| r <= input.width())
                    && y.checked_add(height).is_some_and(|b| b <= input.height());
                fits.then(|| imageops::crop_imm(input, x, y, width, height).to_image())
            }
            _ => Some(self.apply_per_pixel(input)),
        }
    }

    fn apply_per_pixel(&self, input: &RgbaImage) -> RgbaImage {
        let mut output = input.clone();
        let (width, height) = (output.width() as f32, output.height() as f32);
        for (x, y, pixel) in output.enumerate_pixels_mut() {
            let mut r = pixel[0] as f32 / 255.0;
            let mut g = pixel[1] as f32 / 255.0;
            let mut b = pixel[2] as f32 / 255.0;
            let position = ((x as f32 + 0.5) / width, (y as f32 + 0.5) / height);
            self.apply_rgb(&mut r, &mut g, &mut b, position);
            pixel[0] = to_byte(r);
            pixel[1] = to_byte(g);
            pixel[2] = to_byte(b);
        }
        output
    }

    /// Colour transform of one normalized RGB value
    #[inline]
    fn apply_rgb(&self, r: &mut f32, g: &mut f32, b: &mut f32, position: (f32, f32)) {
        match *self {
            FilterSpec::Mono => {
                let gray = luminance(*r, *g, *b);
                (*r, *g, *b) = (gray, gray, gray);
            }
            FilterSpec::Sepia => {
                let l = luminance(*r, *g, *b);
                *r = l * 1.2 + 0.1;
                *g = l * 0.9 + 0.05;
                *b = l * 0.7;
            }
            FilterSpec::Noir => {
                let adjusted = (luminance(*r, *g, *b) - 0.5) * 2.0 + 0.5;
                (*r, *g, *b) = (adjusted, adjusted, adjusted);
            }
            FilterSpec::Vivid => {
                saturate(r, g, b, 1.4);
                for c in [&mut *r, &mut *g, &mut *b] {
                    *c = ((*c - 0.5) * 1.15 + 0.5).clamp(0.0, 1.0);
                }
            }
            FilterSpec::Cool => {
                *r *= 0.9;
                *g *= 0.95;
                *b *= 1.1;
            }
            FilterSpec::Warm => {
                *r *= 1.1;
                *b *= 0.85;
            }
            FilterSpec::Fade => fade(r, g, b),
            FilterSpec::Instant => {
                fade(r, g, b);
                *r = (*r * 1.08).min(1.0);
                *b *= 0.9;
            }
            FilterSpec::Duotone => {
                let l = luminance(*r, *g, *b);
                let dark = (0.1, 0.1, 0.4);
                let light = (1.0, 0.9, 0.5);
                *r = dark.0 + l * (light.0 - dark.0);
                *g = dark.1 + l * (light.1 - dark.1);
                *b = dark.2 + l * (light.2 - dark.2);
            }
            FilterSpec::Vignette => {
                let dx = position.0 - 0.5;
                let dy = position.1 - 0.5;
                let factor = 1.0 - smoothstep(0.3, 0.9, (dx * dx + dy * dy).sqrt());
                *r *= factor;
                *g *= factor;
                *b *= factor;
            }
            FilterSpec::Negative => {
                *r = 1.0 - *r;
                *g = 1.0 - *g;
                *b = 1.0 - *b;
            }
            FilterSpec::Posterize { levels } => {
                let steps = (levels - 1) as f32;
                for c in [&mut *r, &mut *g, &mut *b] {
                    *c = (*c * steps).round() / steps;
                }
            }
            FilterSpec::Solarize { threshold } => {
                for c in [&mut *r, &mut *g, &mut *b] {
                    if *c > threshold {
                        *c = 1.0 - *c;
                    }
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::Posterize { levels } => write!(f, "posterize:{}", levels),
            FilterSpec::Solarize { threshold } => write!(f, "solarize:{}", threshold),
            FilterSpec::Brightness { delta } => write!(f, "brightness:{}", delta),
            FilterSpec::Contrast { amount } => write!(f, "contrast:{}", amount),
            FilterSpec::HueRotate { degrees } => write!(f, "huerotate:{}", degrees),
            FilterSpec::Blur { sigma } => write!(f, "blur:{}", sigma),
            FilterSpec::Crop {
                x,
                y,
                width,
                height,
            } => write!(f, "crop:{},{},{},{}", x, y, width, height),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Parses `name` or `name:argument`, the format produced by `Display`
impl std::str::FromStr for FilterSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim().to_ascii_lowercase(), Some(arg.trim())),
            None => (s.trim().to_ascii_lowercase(), None),
        };

        fn parse<T: std::str::FromStr>(name: &str, arg: Option<&str>, default: T) -> Result<T, String> {
            match arg {
                None => Ok(default),
                Some(value) => value
                    .parse()
                    .map_err(|_| format!("invalid argument '{}' for filter {}", value, name)),
            }
        }

        let spec = match name.as_str() {
            "mono" => FilterSpec::Mono,
            "sepia" => FilterSpec::Sepia,
            "noir" => FilterSpec::Noir,
            "vivid" => FilterSpec::Vivid,
            "cool" => FilterSpec::Cool,
            "warm" => FilterSpec::Warm,
            "fade" => FilterSpec::Fade,
            "duotone" => FilterSpec::Duotone,
            "vignette" => FilterSpec::Vignette,
            "negative" => FilterSpec::Negative,
            "instant" => FilterSpec::Instant,
            "posterize" => FilterSpec::Posterize {
                levels: parse(&name, arg, 4)?,
            },
            "solarize" => FilterSpec::Solarize {
                threshold: parse(&name, arg, 0.5)?,
            },
            "brightness" => FilterSpec::Brightness {
                delta: parse(&name, arg, 20)?,
            },
            "contrast" => FilterSpec::Contrast {
                amount: parse(&name, arg, 25.0)?,
            },
            "huerotate" | "hue" => FilterSpec::HueRotate {
                degrees: parse(&name, arg, 90)?,
            },
            "blur" => FilterSpec::Blur {
                sigma: parse(&name, arg, 2.0)?,
            },
            "crop" => {
                let values = arg
                    .ok_or_else(|| "crop needs x,y,width,height".to_string())?
                    .split(',')
                    .map(|v| v.trim().parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| format!("invalid crop rectangle: {}", e))?;
                let [x, y, width, height] = values[..] else {
                    return Err("crop needs x,y,width,height".to_string());
                };
                FilterSpec::Crop {
                    x,
                    y,
                    width,
                    height,
                }
            }
            other => return Err(format!("unknown filter '{}'", other)),
        };
        Ok(spec)
    }
}

/// Ordered, immutable list of filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: Arc<[FilterSpec]>,
}

impl FilterChain {
    pub fn new(filters: Vec<FilterSpec>) -> Self {
        Self {
            filters: Arc::from(filters),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    /// Run every filter in order over `frame`
    ///
    /// A filter that yields no output is skipped and the previous stage is
    /// carried forward. The empty chain returns the input frame unchanged.
    pub fn apply(&self, frame: &Frame) -> Frame {
        if self.is_empty() {
            return frame.clone();
        }
        let mut image = frame.to_image();
        for spec in self.filters.iter() {
            match spec.apply(&image) {
                Some(next) => image = next,
                None => debug!(filter = %spec, "Filter produced no output, keeping previous stage"),
            }
        }
        Frame::from_image(image, frame.timestamp())
    }
}

impl From<Vec<FilterSpec>> for FilterChain {
    fn from(filters: Vec<FilterSpec>) -> Self {
        Self::new(filters)
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        for (i, spec) in self.filters.iter().enumerate() {
            if i > 0 {
                write!(f, " → ")?;
            }
            write!(f, "{}", spec)?;
        }
        Ok(())
    }
}

/// Vertical flip applied to front-camera frames before filtering
pub fn flip_vertical(frame: &Frame) -> Frame {
    Frame::from_image(imageops::flip_vertical(&frame.to_image()), frame.timestamp())
}

/// BT.601 luma
#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

#[inline]
fn saturate(r: &mut f32, g: &mut f32, b: &mut f32, amount: f32) {
    let l = luminance(*r, *g, *b);
    *r = (l + (*r - l) * amount).clamp(0.0, 1.0);
    *g = (l + (*g - l) * amount).clamp(0.0, 1.0);
    *b = (l + (*b - l) * amount).clamp(0.0, 1.0);
}

#[inline]
fn fade(r: &mut f32, g: &mut f32, b: &mut f32) {
    *r = *r * 0.85 + 0.1;
    *g = *g * 0.85 + 0.1;
    *b = *b * 0.85 + 0.1;
    saturate(r, g, b, 0.7);
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{Dimensions, Timestamp};

    fn frame(rgba: [u8; 4]) -> Frame {
        Frame::filled(Dimensions::new(8, 6), rgba, Timestamp::from_millis(40))
    }

    #[test]
    fn test_empty_chain_returns_input() {
        let input = frame([10, 20, 30, 255]);
        let output = FilterChain::empty().apply(&input);
        assert_eq!(output.pixels(), input.pixels());
        assert_eq!(output.timestamp(), input.timestamp());
    }

    #[test]
    fn test_chain_applies_in_list_order() {
        let input = frame([200, 100, 50, 255]);
        let negative_then_brighter =
            FilterChain::new(vec![FilterSpec::Negative, FilterSpec::Brightness { delta: 40 }]);
        let brighter_then_negative =
            FilterChain::new(vec![FilterSpec::Brightness { delta: 40 }, FilterSpec::Negative]);

        let a = negative_then_brighter.apply(&input);
        let b = brighter_then_negative.apply(&input);
        // 255-200+40 = 95 versus 255-(200+40) = 15
        assert_eq!(a.pixel(0, 0), Some([95, 195, 245, 255]));
        assert_eq!(b.pixel(0, 0), Some([15, 115, 165, 255]));
    }

    #[test]
    fn test_failed_filter_carries_previous_stage_forward() {
        let input = frame([200, 100, 50, 255]);
        let chain = FilterChain::new(vec![
            FilterSpec::Negative,
            FilterSpec::Crop {
                x: 4,
                y: 0,
                width: 100,
                height: 1,
            },
            FilterSpec::Blur { sigma: -1.0 },
        ]);
        let output = chain.apply(&input);
        assert_eq!(output.dimensions(), input.dimensions());
        assert_eq!(output.pixel(3, 3), Some([55, 155, 205, 255]));
    }

    #[test]
    fn test_crop_changes_dimensions() {
        let input = frame([1, 2, 3, 255]);
        let chain = FilterChain::new(vec![FilterSpec::Crop {
            x: 2,
            y: 1,
            width: 4,
            height: 3,
        }]);
        assert_eq!(chain.apply(&input).dimensions(), Dimensions::new(4, 3));
    }

    #[test]
    fn test_mono_equalizes_channels() {
        let output = FilterChain::new(vec![FilterSpec::Mono]).apply(&frame([200, 100, 50, 255]));
        let [r, g, b, a] = output.pixel(1, 1).unwrap();
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_posterize_rejects_single_level() {
        let image = frame([1, 2, 3, 255]).to_image();
        assert!(FilterSpec::Posterize { levels: 1 }.apply(&image).is_none());
        assert!(FilterSpec::Posterize { levels: 2 }.apply(&image).is_some());
    }

    #[test]
    fn test_parse_round_trips_display() {
        for spec in FilterSpec::catalogue() {
            let parsed: FilterSpec = spec.to_string().parse().unwrap();
            assert_eq!(parsed, spec);
        }
        assert!("sparkle".parse::<FilterSpec>().is_err());
        assert!("crop:1,2".parse::<FilterSpec>().is_err());
        assert_eq!("Blur".parse::<FilterSpec>(), Ok(FilterSpec::Blur { sigma: 2.0 }));
    }

    #[test]
    fn test_flip_vertical() {
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let flipped = flip_vertical(&Frame::from_image(image, Timestamp::ZERO));
        assert_eq!(flipped.pixel(0, 1), Some([255, 0, 0, 255]));
        assert_eq!(flipped.pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_chain_display() {
        let chain = FilterChain::new(vec![FilterSpec::Sepia, FilterSpec::Posterize { levels: 3 }]);
        assert_eq!(chain.to_string(), "sepia → posterize:3");
        assert_eq!(FilterChain::empty().to_string(), "(none)");
    }
}
