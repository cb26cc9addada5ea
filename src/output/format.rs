use std::fmt;

use crate::engine::error::FastError;

const KBPS_PER_MBPS: f64 = 1_000.0;
const KBPS_PER_GBPS: f64 = 1_000_000.0;

/// How rates are scaled for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnitPolicy {
    #[default]
    Auto,
    ForceKb,
    ForceMb,
    ForceGb,
}

impl UnitPolicy {
    /// Build a policy from the three forcing switches; at most one may be set.
    pub fn from_flags(kb: bool, mb: bool, gb: bool) -> Result<Self, FastError> {
        match (kb, mb, gb) {
            (false, false, false) => Ok(UnitPolicy::Auto),
            (true, false, false) => Ok(UnitPolicy::ForceKb),
            (false, true, false) => Ok(UnitPolicy::ForceMb),
            (false, false, true) => Ok(UnitPolicy::ForceGb),
            _ => Err(FastError::Config(
                "You may have at most one formatting switch. Choose either -k, -m, or -g"
                    .to_string(),
            )),
        }
    }

    pub fn is_forced(self) -> bool {
        self != UnitPolicy::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Kbps,
    Mbps,
    Gbps,
}

impl Unit {
    pub fn label(self) -> &'static str {
        match self {
            Unit::Kbps => "Kbps",
            Unit::Mbps => "Mbps",
            Unit::Gbps => "Gbps",
        }
    }

    fn pick(kbps: f64) -> Self {
        if kbps > KBPS_PER_GBPS {
            Unit::Gbps
        } else if kbps > KBPS_PER_MBPS {
            Unit::Mbps
        } else {
            Unit::Kbps
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rate rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedRate {
    pub value: String,
    pub unit: Unit,
    /// Forced units print the bare value.
    pub forced: bool,
}

impl fmt::Display for FormattedRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.forced {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

pub fn format_kbps(kbps: f64) -> (String, Unit) {
    (format!("{:.0}", kbps.round()), Unit::Kbps)
}

pub fn format_mbps(kbps: f64) -> (String, Unit) {
    (two_decimals(kbps, KBPS_PER_MBPS), Unit::Mbps)
}

pub fn format_gbps(kbps: f64) -> (String, Unit) {
    (two_decimals(kbps, KBPS_PER_GBPS), Unit::Gbps)
}

/// `kbps / kbps_per_unit` with two decimals, ties rounded away from zero.
///
/// Rounds a whole count of hundredths taken straight from `kbps`, so a tie
/// such as 1005 Kbps (exactly 100.5 hundredths of a Mbps) is not lost to
/// the error of an intermediate `1.005`.
fn two_decimals(kbps: f64, kbps_per_unit: f64) -> String {
    let hundredths = (kbps.max(0.0) / (kbps_per_unit / 100.0)).round() as u64;
    format!("{}.{:02}", hundredths / 100, hundredths % 100)
}

pub fn format_rate(kbps: f64, policy: UnitPolicy) -> FormattedRate {
    let unit = match policy {
        UnitPolicy::ForceKb => Unit::Kbps,
        UnitPolicy::ForceMb => Unit::Mbps,
        UnitPolicy::ForceGb => Unit::Gbps,
        UnitPolicy::Auto => Unit::pick(kbps),
    };
    let (value, unit) = match unit {
        Unit::Kbps => format_kbps(kbps),
        Unit::Mbps => format_mbps(kbps),
        Unit::Gbps => format_gbps(kbps),
    };
    FormattedRate {
        value,
        unit,
        forced: policy.is_forced(),
    }
}
