//! Air quality level assessment for consumers of fused samples.

/// Coarse equivalent-CO2 level, used to drive indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Co2Level {
    /// Below 1000 ppm
    Ok,
    /// 1000 to 4999 ppm
    Warning,
    /// 5000 ppm and above
    Danger,
}

impl Co2Level {
    pub const WARNING_PPM: u16 = 1_000;
    pub const DANGER_PPM: u16 = 5_000;

    /// Assess the level for an equivalent-CO2 reading in ppm.
    pub const fn assess(eco2: u16) -> Self {
        if eco2 >= Self::DANGER_PPM {
            Self::Danger
        } else if eco2 >= Self::WARNING_PPM {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    /// Get the display label for this level
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "Warning",
            Self::Danger => "Danger",
        }
    }
}
