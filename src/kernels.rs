use std::f64::consts::PI;

/// Fixed registry of SPH smoothing kernels, selected by name once per
/// interpolation call.
///
/// Each kernel is a unary weighting function `w(q)` of the normalized
/// distance `q = r / h`, with compact support on `[0, 1)` and 3-D
/// normalization (`∫ w(|x|) d³x = 1` over the support).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothingKernel {
    CubicSpline,
    QuarticSpline,
    QuinticSpline,
    WendlandC2,
    WendlandC4,
    WendlandC6,
}

impl SmoothingKernel {
    pub const ALL: [Self; 6] = [
        Self::CubicSpline,
        Self::QuarticSpline,
        Self::QuinticSpline,
        Self::WendlandC2,
        Self::WendlandC4,
        Self::WendlandC6,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cubic" => Some(Self::CubicSpline),
            "quartic" => Some(Self::QuarticSpline),
            "quintic" => Some(Self::QuinticSpline),
            "wendland2" => Some(Self::WendlandC2),
            "wendland4" => Some(Self::WendlandC4),
            "wendland6" => Some(Self::WendlandC6),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CubicSpline => "cubic",
            Self::QuarticSpline => "quartic",
            Self::QuinticSpline => "quintic",
            Self::WendlandC2 => "wendland2",
            Self::WendlandC4 => "wendland4",
            Self::WendlandC6 => "wendland6",
        }
    }

    /// Evaluates `w(q)`. Zero outside the support, including negative `q`.
    pub fn evaluate(self, q: f64) -> f64 {
        if !(0.0..1.0).contains(&q) {
            return 0.0;
        }
        match self {
            Self::CubicSpline => {
                let c = 8.0 / PI;
                if q <= 0.5 {
                    c * (1.0 + 6.0 * q * q * (q - 1.0))
                } else {
                    let t = 1.0 - q;
                    2.0 * c * t * t * t
                }
            }
            Self::QuarticSpline => {
                let c = 15625.0 / (512.0 * PI);
                let mut w = (1.0 - q).powi(4);
                if q < 0.6 {
                    w -= 5.0 * (0.6 - q).powi(4);
                }
                if q < 0.2 {
                    w += 10.0 * (0.2 - q).powi(4);
                }
                c * w
            }
            Self::QuinticSpline => {
                let c = 2187.0 / (40.0 * PI);
                let mut w = (1.0 - q).powi(5);
                if q < 2.0 / 3.0 {
                    w -= 6.0 * (2.0 / 3.0 - q).powi(5);
                }
                if q < 1.0 / 3.0 {
                    w += 15.0 * (1.0 / 3.0 - q).powi(5);
                }
                c * w
            }
            Self::WendlandC2 => {
                let c = 21.0 / (2.0 * PI);
                c * (1.0 - q).powi(4) * (1.0 + 4.0 * q)
            }
            Self::WendlandC4 => {
                let c = 495.0 / (32.0 * PI);
                c * (1.0 - q).powi(6) * (1.0 + 6.0 * q + 35.0 / 3.0 * q * q)
            }
            Self::WendlandC6 => {
                let c = 1365.0 / (64.0 * PI);
                c * (1.0 - q).powi(8) * (1.0 + 8.0 * q + 25.0 * q * q + 32.0 * q * q * q)
            }
        }
    }
}
