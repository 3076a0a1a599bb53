//! A small MPEG-style intraframe/interframe video codec for game FMV
//! playback: 8x8 DCT with perceptual quantization, hierarchical motion
//! search with half-pel luma vectors, per-macroblock SKIP/INTER/INTRA
//! decision, cyclic intra refresh, in-loop deblocking and deringing,
//! zig-zag RLE entropy coding and DEFLATE framing around each frame.

mod consts;
mod decoder;
mod encoder;
mod error;
mod filter;
mod frame;
mod mc;
mod me;
mod quality;
mod refresh;
mod rle;
mod scenecut;
mod txfm;
mod util;
pub mod y4m;

pub use consts::HEADER_SIZE;
pub use decoder::Decoder;
pub use encoder::{Encoder, EncoderStats};
pub use error::CodecError;
pub use frame::{Frame, Plane};
pub use quality::{QuantParams, Quality};
