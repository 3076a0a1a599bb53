use thiserror::Error;

/// Errors surfaced at the encoder/decoder API boundary.
#[derive(Debug, Error)]
pub enum CodecError {
  /// Frame dimensions must be positive multiples of 8.
  #[error("invalid dimensions {0}x{1} (must be positive multiples of 8)")]
  InvalidDimensions(i32, i32),

  /// The frame rate denominator must be nonzero.
  #[error("invalid frame rate denominator")]
  InvalidFrameRate,

  /// The stream header is shorter than the required 96 bytes.
  #[error("stream header too short ({0} bytes, need {1})")]
  HeaderTooShort(usize, usize),

  /// The header signature or version did not match.
  #[error("bad stream signature or unsupported version")]
  BadSignature,

  /// A header field holds a value the decoder cannot work with.
  #[error("invalid header field: {0}")]
  InvalidHeaderField(&'static str),

  /// A frame record ended before its payload was complete.
  #[error("truncated frame payload")]
  Truncated,

  /// The DEFLATE payload did not inflate to the declared length.
  #[error("frame payload inflated to the wrong size")]
  InflateMismatch,

  /// A P-frame macroblock carried an unknown mode byte.
  #[error("unknown macroblock mode {0}")]
  UnknownMode(u8),

  /// A frame carried an unknown frame type byte.
  #[error("unknown frame type {0}")]
  UnknownFrameType(u8),

  /// An encode call was made after the stream was finalized.
  #[error("encoder already finalized")]
  Finalized,

  /// The supplied input buffer does not match the frame dimensions.
  #[error("input buffer has the wrong size ({got} bytes, expected {expected})")]
  BadInputSize { got: usize, expected: usize },

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error)
}
