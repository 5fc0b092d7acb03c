//! Pass configuration from the process environment
//!
//! All recognized variables are consulted once, when the configuration is
//! built. Parsing is separated from environment access so tests never
//! have to mutate the process environment.

use std::env;

use crate::error::ConfigError;

/// Selects which fraction of eligible blocks gets instrumented.
pub const ENV_INST_RATIO: &str = "AFL_INST_RATIO";

/// Suppresses the banner and counter output.
pub const ENV_QUIET: &str = "AFL_QUIET";

/// Labels the banner as a hardened build.
pub const ENV_HARDEN: &str = "AFL_HARDEN";

/// Labels the banner as an ASAN build.
pub const ENV_USE_ASAN: &str = "AFL_USE_ASAN";

/// Labels the banner as an MSAN build.
pub const ENV_USE_MSAN: &str = "AFL_USE_MSAN";

/// Build-mode label shown in the end-of-pass banner. Purely cosmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SanitizeMode {
    /// `AFL_HARDEN` was set.
    #[strum(serialize = "hardened")]
    Hardened,
    /// `AFL_USE_ASAN` or `AFL_USE_MSAN` was set.
    #[strum(serialize = "ASAN/MSAN")]
    AsanMsan,
    /// Neither hardening nor sanitizers were requested.
    #[strum(serialize = "non-hardened")]
    NonHardened,
}

/// Configuration of the coverage instrumenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassConfig {
    /// Percentage of eligible blocks to instrument, in `[1, 100]`.
    pub inst_ratio: u32,
    /// Whether banner and counter output is suppressed.
    pub quiet: bool,
    /// Build-mode label for the banner.
    pub mode: SanitizeMode,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            inst_ratio: 100,
            quiet: false,
            mode: SanitizeMode::NonHardened,
        }
    }
}

impl PassConfig {
    /// Read the recognized environment variables once.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse(
            env::var(ENV_INST_RATIO).ok().as_deref(),
            env::var_os(ENV_QUIET).is_some(),
            env::var_os(ENV_HARDEN).is_some(),
            env::var_os(ENV_USE_ASAN).is_some(),
            env::var_os(ENV_USE_MSAN).is_some(),
        )
    }

    /// Build a configuration from raw settings.
    ///
    /// `ratio` is the raw `AFL_INST_RATIO` value when the variable is
    /// set. The value is read the way `sscanf("%u")` reads it: leading
    /// whitespace is skipped, the leading digit run is the number, and
    /// trailing garbage is ignored. No digits at all, or a number
    /// outside `[1, 100]`, is fatal.
    pub fn parse(
        ratio: Option<&str>,
        quiet: bool,
        harden: bool,
        asan: bool,
        msan: bool,
    ) -> Result<Self, ConfigError> {
        let inst_ratio = match ratio {
            None => 100,
            Some(raw) => {
                let digits = raw.trim_start();
                let end = digits
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(digits.len());
                let parsed: u32 = digits[..end]
                    .parse()
                    .map_err(|_| ConfigError::BadInstRatio(raw.to_owned()))?;
                if parsed == 0 || parsed > 100 {
                    return Err(ConfigError::BadInstRatio(raw.to_owned()));
                }
                parsed
            }
        };
        let mode = if harden {
            SanitizeMode::Hardened
        } else if asan || msan {
            SanitizeMode::AsanMsan
        } else {
            SanitizeMode::NonHardened
        };
        Ok(Self {
            inst_ratio,
            quiet,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, Ok(100))]
    #[case(Some("1"), Ok(1))]
    #[case(Some("100"), Ok(100))]
    #[case(Some(" 42 "), Ok(42))]
    // Trailing garbage after the digit run is ignored, as sscanf does.
    #[case(Some("5x"), Ok(5))]
    #[case(Some("30%"), Ok(30))]
    #[case(Some("0"), Err(()))]
    #[case(Some("101"), Err(()))]
    #[case(Some("-5"), Err(()))]
    #[case(Some("x5"), Err(()))]
    #[case(Some(""), Err(()))]
    fn inst_ratio_parsing(
        #[case] raw: Option<&str>,
        #[case] expected: Result<u32, ()>,
    ) {
        let parsed = PassConfig::parse(raw, false, false, false, false);
        match expected {
            Ok(ratio) => assert_eq!(parsed.unwrap().inst_ratio, ratio),
            Err(()) => {
                assert!(matches!(parsed, Err(ConfigError::BadInstRatio(_))))
            }
        }
    }

    #[test]
    fn mode_labels() {
        let m = |harden, asan, msan| {
            PassConfig::parse(None, false, harden, asan, msan)
                .unwrap()
                .mode
        };
        assert_eq!(m(false, false, false), SanitizeMode::NonHardened);
        assert_eq!(m(true, false, false), SanitizeMode::Hardened);
        assert_eq!(m(false, true, false), SanitizeMode::AsanMsan);
        assert_eq!(m(false, false, true), SanitizeMode::AsanMsan);
        // Hardening wins over sanitizer labels.
        assert_eq!(m(true, true, true), SanitizeMode::Hardened);
        assert_eq!(SanitizeMode::AsanMsan.to_string(), "ASAN/MSAN");
    }
}
