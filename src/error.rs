//! Error types returned from decoder construction and configuration.
//!
//! The per-frame search loop itself never returns `Result` (it keeps
//! the 0/1 "more frames"/"done" contract); only setup — tree build and
//! configuration — can fail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("dictionary has no entry for `<s>`")]
    MissingStartWord,

    #[error("dictionary has no entry for `</s>`")]
    MissingFinishWord,

    #[error("dictionary has no silence entry")]
    MissingSilenceWord,

    #[error(
        "word {wid} has id below silence_wid ({silence_wid}) but dictionary reports it as a filler"
    )]
    NonContiguousFillers { wid: i32, silence_wid: i32 },

    #[error("dictionary mixes mpx and non-mpx entries among words sharing a tree path ({word_a} vs {word_b})")]
    InconsistentMpx { word_a: i32, word_b: i32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse tunables TOML: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("decoder step() called with no utterance in progress")]
    NoUtteranceStarted,

    #[error("decoder start() called while an utterance is already in progress")]
    UtteranceAlreadyStarted,
}
