//! Search tunables, loaded from TOML the same way the rest of this
//! codebase's settings are: embedded defaults via `include_str!`,
//! parse-then-validate, no silent clamping of nonsensical values.
//!
//! Unlike a long-lived host process's global settings, a decoder is
//! constructed per caller and per utterance batch, so `Tunables` is a
//! plain value the caller owns and passes to [`crate::search::Decoder`]
//! rather than a process-wide `OnceLock` singleton.

use serde::Deserialize;

use crate::error::DecoderError;

pub const DEFAULT_TUNABLES_TOML: &str = include_str!("default_tunables.toml");

/// All scores in `Tunables` are additive log-domain penalties (negative
/// numbers widen a beam or worsen a score; see spec'd beam semantics).
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Tunables {
    /// General pruning beam, relative to the current frame's best score.
    pub beam: i32,
    /// Phone-transition beam (root/non-root phone-internal transition).
    pub pbeam: i32,
    /// Last-phone transition beam.
    pub lpbeam: i32,
    /// Last-phone-only beam, used when bucketing last-phone candidates
    /// by in-LM vs out-of-LM vocabulary.
    pub lponlybeam: i32,
    /// Word-exit beam, applied to last-phone-transition candidates
    /// before they become backpointer exits.
    pub wbeam: i32,
    /// Phone insertion penalty, added on every phone-to-phone and
    /// phone-to-word transition.
    pub pip: i32,
    /// New-word penalty, added once per cross-word transition.
    pub nwpen: i32,
    /// Penalty applied when silence is exited.
    pub silpen: i32,
    /// Penalty applied when a non-silence filler is exited.
    pub fillpen: i32,
    /// Max backpointer exits kept per frame; `-1` disables the cap.
    pub maxwpf: i32,
    /// Max root+non-root HMMs evaluated per frame before the dynamic
    /// beam narrows; `-1` disables the cap.
    pub maxhmmpf: i32,
}

impl Default for Tunables {
    fn default() -> Self {
        from_toml(DEFAULT_TUNABLES_TOML).expect("default_tunables.toml must be valid")
    }
}

/// Parse and validate a `Tunables` value from TOML text.
pub fn from_toml(toml_str: &str) -> Result<Tunables, DecoderError> {
    let t: Tunables = toml::from_str(toml_str)?;
    validate(&t)?;
    Ok(t)
}

fn validate(t: &Tunables) -> Result<(), DecoderError> {
    macro_rules! non_positive {
        ($field:ident) => {
            if t.$field > 0 {
                return Err(DecoderError::InvalidConfig(format!(
                    "{} must be <= 0 (it is a log-domain penalty/beam)",
                    stringify!($field)
                )));
            }
        };
    }
    non_positive!(beam);
    non_positive!(pbeam);
    non_positive!(lpbeam);
    non_positive!(lponlybeam);
    non_positive!(wbeam);
    non_positive!(pip);
    non_positive!(nwpen);
    non_positive!(silpen);
    non_positive!(fillpen);

    if t.maxwpf == 0 {
        return Err(DecoderError::InvalidConfig(
            "maxwpf must be positive, or -1 to disable".to_string(),
        ));
    }
    if t.maxhmmpf == 0 {
        return Err(DecoderError::InvalidConfig(
            "maxhmmpf must be positive, or -1 to disable".to_string(),
        ));
    }
    Ok(())
}
