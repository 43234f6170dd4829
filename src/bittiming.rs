//! CAN bit-timing solver
//!
//! Turns a requested bitrate, sample point and sync jump width into register
//! values `(brp, tseg1, tseg2, sjw)` that the device accepts. Only exact
//! bitrates are produced: `clock / (brp * (1 + tseg1 + tseg2))` must equal
//! the request.
//!
//! # Search order
//!
//! Every prescaler `brp_min, brp_min + brp_step, ..= brp_max` that divides the
//! clock into an integer bit length is a candidate. For one bit length the
//! split with the smallest sample point deviation wins, preferring the larger
//! `tseg2` on ties. Across prescalers the smallest deviation wins, preferring
//! the smaller `brp` on ties. The search stops at the first prescaler whose
//! bit length falls below the shortest one the registers can express. The
//! result is a pure function of the inputs.

use log::debug;

use crate::constants::{
    data_sample_point_permille, nominal_sample_point_permille, CAN_DATA_BITRATE_MAX,
    CAN_NOMINAL_BITRATE_MAX, CAN_SAMPLE_POINT_SCALE,
};
use crate::error::{NoSolutionReason, Result, SuperCanError};

/// Bit-timing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Arbitration phase, also the only phase of classic CAN
    Nominal,
    /// CAN-FD data phase
    Data,
}

impl Phase {
    /// Highest bitrate accepted for this phase
    pub fn max_bitrate(self) -> u32 {
        match self {
            Phase::Nominal => CAN_NOMINAL_BITRATE_MAX,
            Phase::Data => CAN_DATA_BITRATE_MAX,
        }
    }

    fn default_permille(self, bitrate: u32) -> u32 {
        match self {
            Phase::Nominal => nominal_sample_point_permille(bitrate),
            Phase::Data => data_sample_point_permille(bitrate),
        }
    }
}

/// Get the default sample point for a bitrate in the given phase
pub fn default_sample_point(bitrate: u32, phase: Phase) -> f32 {
    phase.default_permille(bitrate) as f32 / CAN_SAMPLE_POINT_SCALE as f32
}

/// Register ranges of one bit-timing phase as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTimingConstraints {
    /// CAN core clock in Hz
    pub clock_hz: u32,
    /// Smallest bit-rate prescaler
    pub brp_min: u32,
    /// Largest bit-rate prescaler
    pub brp_max: u32,
    /// Prescaler increment between `brp_min` and `brp_max`
    pub brp_step: u32,
    /// Time segment 1 range in time quanta, propagation segment included
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    /// Time segment 2 range in time quanta
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    /// Largest sync jump width in time quanta
    pub sjw_max: u32,
}

impl BitTimingConstraints {
    /// Check that the ranges describe a usable device
    pub fn validate(&self) -> Result<()> {
        if self.clock_hz < 1 {
            return Err(SuperCanError::InvalidConstraints("clock is zero"));
        }
        if self.brp_min < 1 {
            return Err(SuperCanError::InvalidConstraints("brp_min is zero"));
        }
        if self.brp_step < 1 {
            return Err(SuperCanError::InvalidConstraints("brp_step is zero"));
        }
        if self.brp_max < self.brp_min {
            return Err(SuperCanError::InvalidConstraints("brp_max below brp_min"));
        }
        if (self.brp_max - self.brp_min) % self.brp_step != 0 {
            return Err(SuperCanError::InvalidConstraints(
                "brp range not divisible by brp_step",
            ));
        }
        if self.tseg1_max < self.tseg1_min {
            return Err(SuperCanError::InvalidConstraints("tseg1_max below tseg1_min"));
        }
        if self.tseg2_min < 1 {
            return Err(SuperCanError::InvalidConstraints("tseg2_min is zero"));
        }
        if self.tseg2_max < self.tseg2_min {
            return Err(SuperCanError::InvalidConstraints("tseg2_max below tseg2_min"));
        }
        if self.sjw_max < 1 {
            return Err(SuperCanError::InvalidConstraints("sjw_max is zero"));
        }
        Ok(())
    }

    /// Shortest bit in time quanta
    pub fn min_bit_length(&self) -> u64 {
        1 + u64::from(self.tseg1_min) + u64::from(self.tseg2_min)
    }

    /// Longest bit in time quanta
    pub fn max_bit_length(&self) -> u64 {
        1 + u64::from(self.tseg1_max) + u64::from(self.tseg2_max)
    }
}

/// Requested bit timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitTimingTarget {
    /// Bits per second
    pub bitrate: u32,
    /// Sample point in (0, 1], 0 selects the recommended value
    pub sample_point: f32,
    /// Sync jump width in time quanta, 0 or less selects the largest feasible
    pub sjw: i32,
    /// Minimum time quanta per bit, 0 for no minimum
    pub min_tq: u32,
}

impl BitTimingTarget {
    /// Target with default sample point and sync jump width
    pub fn new(bitrate: u32) -> Self {
        Self {
            bitrate,
            sample_point: 0.0,
            sjw: 0,
            min_tq: 0,
        }
    }

    pub fn with_sample_point(mut self, sample_point: f32) -> Self {
        self.sample_point = sample_point;
        self
    }

    pub fn with_sjw(mut self, sjw: i32) -> Self {
        self.sjw = sjw;
        self
    }

    pub fn with_min_tq(mut self, min_tq: u32) -> Self {
        self.min_tq = min_tq;
        self
    }
}

/// Solved register values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitTimingSettings {
    /// Bit-rate prescaler
    pub brp: u32,
    /// Time quanta before the sample point, excluding the sync segment
    pub tseg1: u32,
    /// Time quanta after the sample point
    pub tseg2: u32,
    /// Sync jump width
    pub sjw: u32,
}

impl BitTimingSettings {
    /// Bit length in time quanta
    pub fn bit_length(&self) -> u32 {
        1 + self.tseg1 + self.tseg2
    }

    /// Achieved sample point
    pub fn sample_point(&self) -> f32 {
        (1 + self.tseg1) as f32 / self.bit_length() as f32
    }

    /// Achieved bitrate for a clock
    pub fn bitrate(&self, clock_hz: u32) -> u32 {
        let divisor = u64::from(self.brp) * u64::from(self.bit_length());
        if divisor == 0 {
            return 0;
        }
        (u64::from(clock_hz) / divisor) as u32
    }
}

impl std::fmt::Display for BitTimingSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "brp={} tseg1={} tseg2={} sjw={} sp={:.3}",
            self.brp,
            self.tseg1,
            self.tseg2,
            self.sjw,
            self.sample_point()
        )
    }
}

/// Best split found so far: deviation numerator and its bit length
#[derive(Clone, Copy)]
struct Candidate {
    settings: BitTimingSettings,
    dev: u64,
    bit_length: u64,
}

impl Candidate {
    /// Compare `dev / bit_length` fractions without division
    fn beats(&self, other: &Candidate) -> bool {
        u128::from(self.dev) * u128::from(other.bit_length)
            < u128::from(other.dev) * u128::from(self.bit_length)
    }
}

/// Validated request in integer form
struct Request {
    bitrate: u64,
    permille: u64,
    sjw: Option<u32>,
    min_tq: u64,
}

fn validate_target(
    constraints: &BitTimingConstraints,
    target: &BitTimingTarget,
    phase: Phase,
) -> Result<Request> {
    if target.bitrate == 0 {
        return Err(SuperCanError::InvalidRequest("bitrate is zero"));
    }
    if target.bitrate > phase.max_bitrate() {
        return Err(SuperCanError::InvalidRequest("bitrate above phase maximum"));
    }

    let sp = target.sample_point;
    if sp.is_nan() || !(0.0..=1.0).contains(&sp) {
        return Err(SuperCanError::InvalidRequest("sample point outside (0, 1]"));
    }
    let permille = if sp == 0.0 {
        phase.default_permille(target.bitrate)
    } else {
        (f64::from(sp) * f64::from(CAN_SAMPLE_POINT_SCALE)).round() as u32
    };

    let sjw = if target.sjw > 0 {
        let sjw = target.sjw as u32;
        if sjw > constraints.sjw_max {
            return Err(SuperCanError::InvalidRequest("sjw above hardware maximum"));
        }
        Some(sjw)
    } else {
        None
    };

    Ok(Request {
        bitrate: u64::from(target.bitrate),
        permille: u64::from(permille),
        sjw,
        min_tq: u64::from(target.min_tq),
    })
}

/// Best split of one bit length, or `None` if no tseg2 fits
fn best_split(
    constraints: &BitTimingConstraints,
    request: &Request,
    brp: u32,
    bit_length: u64,
) -> Option<Candidate> {
    let scale = u64::from(CAN_SAMPLE_POINT_SCALE);
    let t2_lo = u64::from(constraints.tseg2_min).max(request.sjw.map_or(0, u64::from));
    let t2_hi = u64::from(constraints.tseg2_max);
    let target = request.permille * bit_length;

    let mut best: Option<Candidate> = None;
    for tseg2 in t2_lo..=t2_hi {
        if tseg2 + 1 >= bit_length {
            break;
        }
        let tseg1 = bit_length - 1 - tseg2;
        if tseg1 < u64::from(constraints.tseg1_min) || tseg1 > u64::from(constraints.tseg1_max) {
            continue;
        }

        let dev = (scale * (bit_length - tseg2)).abs_diff(target);
        // ties go to the larger tseg2
        if best.map_or(true, |b| dev <= b.dev) {
            let tseg2 = tseg2 as u32;
            let sjw = request
                .sjw
                .unwrap_or_else(|| constraints.sjw_max.min(tseg2));
            best = Some(Candidate {
                settings: BitTimingSettings {
                    brp,
                    tseg1: tseg1 as u32,
                    tseg2,
                    sjw,
                },
                dev,
                bit_length,
            });
        }
    }
    best
}

/// Solve one phase
pub fn solve(
    constraints: &BitTimingConstraints,
    target: &BitTimingTarget,
    phase: Phase,
) -> Result<BitTimingSettings> {
    constraints.validate()?;
    let request = validate_target(constraints, target, phase)?;

    let clock = u64::from(constraints.clock_hz);
    let min_len = constraints.min_bit_length();
    let max_len = constraints.max_bit_length();

    let mut reason = NoSolutionReason::NoIntegerBitLength;
    let mut best: Option<Candidate> = None;

    let mut brp = constraints.brp_min;
    loop {
        let divisor = u64::from(brp) * request.bitrate;
        if clock / divisor < min_len {
            // bit lengths only shrink as brp grows
            if clock % divisor == 0 {
                reason = reason.max(NoSolutionReason::BitLengthOutOfRange);
            }
            break;
        }
        if clock % divisor == 0 {
            let bit_length = clock / divisor;
            if bit_length < min_len || bit_length > max_len {
                reason = reason.max(NoSolutionReason::BitLengthOutOfRange);
            } else if bit_length < request.min_tq {
                reason = reason.max(NoSolutionReason::MinTimeQuantaUnreachable);
            } else {
                match best_split(constraints, &request, brp, bit_length) {
                    Some(c) if best.map_or(true, |b| c.beats(&b)) => best = Some(c),
                    Some(_) => {}
                    None => reason = reason.max(NoSolutionReason::SjwUnreachable),
                }
            }
        }

        match brp.checked_add(constraints.brp_step) {
            Some(next) if next <= constraints.brp_max => brp = next,
            _ => break,
        }
    }

    match best {
        Some(c) => {
            debug!(
                "{:?} bit timing for {} bit/s at {} Hz: {}",
                phase, target.bitrate, constraints.clock_hz, c.settings
            );
            Ok(c.settings)
        }
        None => {
            debug!(
                "{:?} bit timing for {} bit/s at {} Hz: {}",
                phase, target.bitrate, constraints.clock_hz, reason
            );
            Err(SuperCanError::NoSolution(reason))
        }
    }
}

/// Solved nominal and data phase settings for CAN-FD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdBitTiming {
    pub nominal: BitTimingSettings,
    pub data: BitTimingSettings,
}

/// Solve both CAN-FD phases against the same clock
///
/// The nominal phase is solved first and independently of the data phase.
pub fn solve_fd(
    nominal_constraints: &BitTimingConstraints,
    data_constraints: &BitTimingConstraints,
    nominal: &BitTimingTarget,
    data: &BitTimingTarget,
) -> Result<FdBitTiming> {
    if nominal_constraints.clock_hz != data_constraints.clock_hz {
        return Err(SuperCanError::InvalidConstraints(
            "nominal and data phase clocks differ",
        ));
    }

    let nominal = solve(nominal_constraints, nominal, Phase::Nominal)?;
    let data = solve(data_constraints, data, Phase::Data)?;
    Ok(FdBitTiming { nominal, data })
}
