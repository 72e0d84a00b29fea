//! Reconstruction kernels, edge modes and sample spaces.

use std::f32::consts::PI;

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum Filter {
    /// Catmull-Rom when upsampling, Mitchell when downsampling.
    #[default]
    Default = 0,
    /// Area average; nearest neighbour when upsampling.
    Box = 1,
    /// Bilinear.
    Triangle = 2,
    /// Cubic B-spline (B=1, C=0); smooth, never overshoots.
    CubicBSpline = 3,
    /// Interpolating cubic (B=0, C=1/2).
    CatmullRom = 4,
    /// Mitchell-Netravali (B=C=1/3).
    Mitchell = 5,
    /// Windowed sinc, three lobes.
    Lanczos3 = 6,
}

impl Filter {
    pub const ALL: [Filter; 7] = [
        Filter::Default,
        Filter::Box,
        Filter::Triangle,
        Filter::CubicBSpline,
        Filter::CatmullRom,
        Filter::Mitchell,
        Filter::Lanczos3,
    ];

    /// Replaces [`Filter::Default`] with the concrete kernel for this axis.
    pub fn resolve(self, upsampling: bool) -> Filter {
        match self {
            Filter::Default if upsampling => Filter::CatmullRom,
            Filter::Default => Filter::Mitchell,
            other => other,
        }
    }

    /// Half-width of the kernel at unit scale.
    pub fn support(self) -> f32 {
        match self {
            Filter::Box => 0.5,
            Filter::Triangle => 1.0,
            Filter::Default | Filter::CubicBSpline | Filter::CatmullRom | Filter::Mitchell => 2.0,
            Filter::Lanczos3 => 3.0,
        }
    }

    #[inline]
    pub fn eval(self, x: f32) -> f32 {
        match self {
            Filter::Box => box_filter(x),
            Filter::Triangle => triangle(x),
            Filter::CubicBSpline => cubic_bspline(x),
            Filter::Default | Filter::CatmullRom => catmull_rom(x),
            Filter::Mitchell => mitchell(x),
            Filter::Lanczos3 => lanczos3(x),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::Default => "default",
            Filter::Box => "box",
            Filter::Triangle => "triangle",
            Filter::CubicBSpline => "cubic-bspline",
            Filter::CatmullRom => "catmull-rom",
            Filter::Mitchell => "mitchell",
            Filter::Lanczos3 => "lanczos3",
        }
    }
}

/// What a kernel tap sees past the edge of the image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum Edge {
    /// Repeat the edge sample.
    #[default]
    Clamp = 1,
    /// Mirror the image, repeating the edge sample.
    Reflect = 2,
    /// Tile the image.
    Wrap = 3,
    /// Zero outside the image.
    Zero = 4,
}

impl Edge {
    /// Maps a tap position to a sample index in `0..len`, or `None` for a
    /// tap that contributes nothing.
    #[inline]
    pub fn map(self, index: i64, len: usize) -> Option<usize> {
        let n = len as i64;
        if (0..n).contains(&index) {
            return Some(index as usize);
        }
        match self {
            Edge::Clamp => Some(index.clamp(0, n - 1) as usize),
            Edge::Reflect => {
                let m = index.rem_euclid(2 * n);
                Some(if m >= n { 2 * n - 1 - m } else { m } as usize)
            }
            Edge::Wrap => Some(index.rem_euclid(n) as usize),
            Edge::Zero => None,
        }
    }
}

/// How 8-bit samples map to the values that are filtered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum ColorSpace {
    /// Samples are linear intensities.
    #[default]
    Linear = 0,
    /// Samples are sRGB-encoded and are filtered in linear light.
    Srgb = 1,
}

#[inline]
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn box_filter(x: f32) -> f32 {
    if x <= -0.5 || x > 0.5 { 0.0 } else { 1.0 }
}

#[inline]
fn triangle(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 { 1.0 - x } else { 0.0 }
}

#[inline]
fn cubic_bspline(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 {
        (4.0 + x * x * (3.0 * x - 6.0)) / 6.0
    } else if x < 2.0 {
        (8.0 + x * (-12.0 + x * (6.0 - x))) / 6.0
    } else {
        0.0
    }
}

#[inline]
fn catmull_rom(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 {
        1.0 - x * x * (2.5 - 1.5 * x)
    } else if x < 2.0 {
        2.0 - x * (4.0 + x * (0.5 * x - 2.5))
    } else {
        0.0
    }
}

#[inline]
fn mitchell(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 {
        (16.0 + x * x * (21.0 * x - 36.0)) / 18.0
    } else if x < 2.0 {
        (32.0 + x * (-60.0 + x * (36.0 - 7.0 * x))) / 18.0
    } else {
        0.0
    }
}

#[inline]
fn lanczos3(x: f32) -> f32 {
    if x.abs() < 1e-8 {
        1.0
    } else if x.abs() >= 3.0 {
        0.0
    } else {
        let pi_x = PI * x;
        let pi_x_3 = pi_x / 3.0;
        (pi_x.sin() / pi_x) * (pi_x_3.sin() / pi_x_3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolating_kernels_are_one_at_zero_and_zero_at_integers() {
        for filter in [Filter::Triangle, Filter::CatmullRom, Filter::Lanczos3] {
            assert!((filter.eval(0.0) - 1.0).abs() < 1e-6, "{filter:?}");
            for k in 1..4 {
                assert!(filter.eval(k as f32).abs() < 1e-5, "{filter:?} at {k}");
            }
        }
    }

    #[test]
    fn cubic_kernels_partition_unity() {
        for filter in [Filter::CubicBSpline, Filter::CatmullRom, Filter::Mitchell] {
            for offset in [0.0f32, 0.25, 0.5, 0.75] {
                let sum: f32 = (-3..=3).map(|k| filter.eval(k as f32 + offset)).sum();
                assert!((sum - 1.0).abs() < 1e-5, "{filter:?} offset {offset}: {sum}");
            }
        }
    }

    #[test]
    fn kernels_vanish_outside_support() {
        for filter in Filter::ALL {
            let filter = filter.resolve(true);
            assert_eq!(filter.eval(filter.support() + 0.01), 0.0, "{filter:?}");
        }
    }

    #[test]
    fn default_filter_depends_on_direction() {
        assert_eq!(Filter::Default.resolve(true), Filter::CatmullRom);
        assert_eq!(Filter::Default.resolve(false), Filter::Mitchell);
        assert_eq!(Filter::Box.resolve(false), Filter::Box);
    }

    #[test]
    fn edge_modes_map_out_of_range_taps() {
        assert_eq!(Edge::Clamp.map(-2, 4), Some(0));
        assert_eq!(Edge::Clamp.map(6, 4), Some(3));
        assert_eq!(Edge::Reflect.map(-1, 4), Some(0));
        assert_eq!(Edge::Reflect.map(-2, 4), Some(1));
        assert_eq!(Edge::Reflect.map(4, 4), Some(3));
        assert_eq!(Edge::Reflect.map(5, 4), Some(2));
        assert_eq!(Edge::Wrap.map(-1, 4), Some(3));
        assert_eq!(Edge::Wrap.map(4, 4), Some(0));
        assert_eq!(Edge::Zero.map(-1, 4), None);
        assert_eq!(Edge::Zero.map(2, 4), Some(2));
    }

    #[test]
    fn integer_conversions_reject_unknown_values() {
        assert_eq!(Filter::try_from(5).ok(), Some(Filter::Mitchell));
        assert!(Filter::try_from(42).is_err());
        assert_eq!(Edge::try_from(3).ok(), Some(Edge::Wrap));
        assert!(Edge::try_from(0).is_err());
        assert_eq!(i32::from(ColorSpace::Srgb), 1);
        assert!(ColorSpace::try_from(2).is_err());
    }

    #[test]
    fn defaults_match_the_zero_configuration() {
        assert_eq!(Filter::default(), Filter::Default);
        assert_eq!(Edge::default(), Edge::Clamp);
        assert_eq!(ColorSpace::default(), ColorSpace::Linear);
    }

    #[test]
    fn srgb_transfer_round_trips_every_level() {
        for level in 0..=255u8 {
            let v = f32::from(level) / 255.0;
            let back = linear_to_srgb(srgb_to_linear(v));
            assert_eq!((back * 255.0 + 0.5) as u8, level);
        }
    }
}
