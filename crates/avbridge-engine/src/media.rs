//! Media enums and numeric helpers shared by the engine and the bridge.

use serde::{Deserialize, Serialize};

use crate::codes::NOPTS_VALUE;

/// A rational number, used for time bases and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// A rational with a zero numerator or denominator carries no information.
    pub fn is_unset(&self) -> bool {
        self.num == 0 || self.den == 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self { num: 0, den: 1 }
    }
}

/// Rescale a timestamp from one time base to another, rounding to nearest.
///
/// [`NOPTS_VALUE`] passes through untouched, as does any value when either
/// time base is unset.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == NOPTS_VALUE || from.is_unset() || to.is_unset() || from == to {
        return value;
    }
    let mut num = value as i128 * from.num as i128 * to.den as i128;
    let mut den = from.den as i128 * to.num as i128;
    if den < 0 {
        num = -num;
        den = -den;
    }
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64
}

/// Join a split 64-bit value into a float, mirroring the engine's split
/// low/high word accessors.
pub fn i64_to_f64(lo: u32, hi: i32) -> f64 {
    hi as f64 * 4_294_967_296.0 + lo as f64
}

/// Split a float holding an integral value into low/high 32-bit words.
pub fn f64_to_i64(value: f64) -> (u32, i32) {
    let whole = value as i64;
    (whole as u32, (whole >> 32) as i32)
}

/// Default channel layout mask for a channel count.
pub fn channel_layout_for(channels: u32) -> u64 {
    match channels {
        0 => 0,
        1 => 0x4,
        2 => 0x3,
        n if n >= 64 => u64::MAX,
        n => (1u64 << n) - 1,
    }
}

/// Channel count described by a layout mask.
pub fn channels_for(layout: u64) -> u32 {
    layout.count_ones()
}

/// Media type of a stream or codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum MediaType {
    Unknown = -1,
    Video = 0,
    Audio = 1,
    Data = 2,
    Subtitle = 3,
    Attachment = 4,
}

impl MediaType {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => Self::Video,
            1 => Self::Audio,
            2 => Self::Data,
            3 => Self::Subtitle,
            4 => Self::Attachment,
            _ => Self::Unknown,
        }
    }
}

/// Audio sample format. The engine's `NONE` (-1) maps to `None` in
/// [`SampleFormat::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SampleFormat {
    U8 = 0,
    S16 = 1,
    S32 = 2,
    Flt = 3,
    Dbl = 4,
    U8p = 5,
    S16p = 6,
    S32p = 7,
    Fltp = 8,
    Dblp = 9,
    S64 = 10,
    S64p = 11,
}

impl SampleFormat {
    pub fn from_raw(raw: i64) -> Option<Self> {
        Some(match raw {
            0 => Self::U8,
            1 => Self::S16,
            2 => Self::S32,
            3 => Self::Flt,
            4 => Self::Dbl,
            5 => Self::U8p,
            6 => Self::S16p,
            7 => Self::S32p,
            8 => Self::Fltp,
            9 => Self::Dblp,
            10 => Self::S64,
            11 => Self::S64p,
            _ => return None,
        })
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Planar formats keep one buffer per channel.
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            Self::U8p | Self::S16p | Self::S32p | Self::Fltp | Self::Dblp | Self::S64p
        )
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 | Self::U8p => 1,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::Flt | Self::Fltp => 4,
            Self::Dbl | Self::Dblp | Self::S64 | Self::S64p => 8,
        }
    }

    /// Interleaved counterpart of this format.
    pub fn packed(self) -> Self {
        match self {
            Self::U8p => Self::U8,
            Self::S16p => Self::S16,
            Self::S32p => Self::S32,
            Self::Fltp => Self::Flt,
            Self::Dblp => Self::Dbl,
            Self::S64p => Self::S64,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::Flt => "flt",
            Self::Dbl => "dbl",
            Self::U8p => "u8p",
            Self::S16p => "s16p",
            Self::S32p => "s32p",
            Self::Fltp => "fltp",
            Self::Dblp => "dblp",
            Self::S64 => "s64",
            Self::S64p => "s64p",
        }
    }
}

/// Pixel formats the bridge knows layout rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PixelFormat {
    Yuv420p = 0,
    Rgb24 = 2,
    Yuv444p = 5,
    Gray8 = 8,
    Rgba = 26,
}

impl PixelFormat {
    pub fn from_raw(raw: i64) -> Option<Self> {
        Some(match raw {
            0 => Self::Yuv420p,
            2 => Self::Rgb24,
            5 => Self::Yuv444p,
            8 => Self::Gray8,
            26 => Self::Rgba,
            _ => return None,
        })
    }

    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// Layout description of a pixel format, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFmtDescriptor {
    /// Number of components (Y, U, V, A or R, G, B, A).
    pub nb_components: u8,
    /// Horizontal chroma subsampling shift for planes 1 and 2.
    pub log2_chroma_w: u8,
    /// Vertical chroma subsampling shift for planes 1 and 2.
    pub log2_chroma_h: u8,
    /// Each component lives in its own plane.
    pub planar: bool,
}

impl PixFmtDescriptor {
    /// Number of data planes.
    pub fn plane_count(&self) -> usize {
        if self.planar {
            self.nb_components as usize
        } else {
            1
        }
    }

    /// Bytes per pixel within a plane, assuming 8-bit components.
    pub fn bytes_per_pixel(&self) -> usize {
        if self.planar {
            1
        } else {
            self.nb_components as usize
        }
    }

    /// Visible `(width_bytes, rows)` of a plane for a picture size.
    pub fn plane_extent(&self, plane: usize, width: usize, height: usize) -> (usize, usize) {
        let (w, h) = if plane == 1 || plane == 2 {
            (
                shift_ceil(width, self.log2_chroma_w),
                shift_ceil(height, self.log2_chroma_h),
            )
        } else {
            (width, height)
        };
        (w * self.bytes_per_pixel(), h)
    }
}

fn shift_ceil(value: usize, shift: u8) -> usize {
    (value + (1 << shift) - 1) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_rounds_to_nearest() {
        let ms = Rational::new(1, 1000);
        let khz48 = Rational::new(1, 48000);
        assert_eq!(rescale(1000, ms, khz48), 48000);
        assert_eq!(rescale(1, khz48, ms), 0);
        assert_eq!(rescale(24, khz48, ms), 1);
        assert_eq!(rescale(-24, khz48, ms), -1);
    }

    #[test]
    fn rescale_leaves_nopts_alone() {
        assert_eq!(
            rescale(NOPTS_VALUE, Rational::new(1, 2), Rational::new(1, 3)),
            NOPTS_VALUE
        );
    }

    #[test]
    fn split_words_join_back() {
        let (lo, hi) = f64_to_i64(8_589_934_597.0);
        assert_eq!((lo, hi), (5, 2));
        assert_eq!(i64_to_f64(lo, hi), 8_589_934_597.0);
        let (lo, hi) = f64_to_i64(-1.0);
        assert_eq!(i64_to_f64(lo, hi), -1.0);
    }

    #[test]
    fn default_layouts() {
        assert_eq!(channel_layout_for(1), 0x4);
        assert_eq!(channel_layout_for(2), 0x3);
        assert_eq!(channel_layout_for(6), 0x3f);
        assert_eq!(channels_for(0x3f), 6);
    }

    #[test]
    fn sample_format_classification() {
        assert!(SampleFormat::Fltp.is_planar());
        assert!(!SampleFormat::Flt.is_planar());
        assert_eq!(SampleFormat::from_raw(-1), None);
        assert_eq!(SampleFormat::from_raw(8), Some(SampleFormat::Fltp));
        assert_eq!(SampleFormat::S16p.packed(), SampleFormat::S16);
        assert_eq!(SampleFormat::Dblp.bytes_per_sample(), 8);
    }

    #[test]
    fn chroma_planes_are_subsampled() {
        let yuv420 = PixFmtDescriptor {
            nb_components: 3,
            log2_chroma_w: 1,
            log2_chroma_h: 1,
            planar: true,
        };
        assert_eq!(yuv420.plane_extent(0, 5, 3), (5, 3));
        assert_eq!(yuv420.plane_extent(1, 5, 3), (3, 2));
        let rgb24 = PixFmtDescriptor {
            nb_components: 3,
            log2_chroma_w: 0,
            log2_chroma_h: 0,
            planar: false,
        };
        assert_eq!(rgb24.plane_count(), 1);
        assert_eq!(rgb24.plane_extent(0, 4, 2), (12, 2));
    }
}
