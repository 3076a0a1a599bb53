// Fixed tables shared by the encoder and decoder.
//
// The quant tables here are the *base* matrices; they get reshaped per
// quality preset before use (see quality.rs).

// Stream signature: 'F', 'M', 'V' followed by a version byte.
// Only version 0 is defined; decoders reject anything else.
pub const SIGNATURE: [u8; 4] = [b'F', b'M', b'V', 0];

// Fixed-size stream header: 4 signature bytes plus 22 little-endian i32
// values (dimensions, frame rate, aspect ratio, 8 quant num/den pairs),
// plus the size field of the first frame record.
pub const HEADER_SIZE: usize = 96;

// Frame type bytes
pub const FT_I: u8 = 0;
pub const FT_P: u8 = 1;

// Macroblock mode bytes in a P frame
pub const MB_SKIP: u8 = 0;
pub const MB_INTER: u8 = 1;
pub const MB_INTRA: u8 = 2;
pub const MB_INTER_ZERO: u8 = 3;

// Zig-zag scan order for an 8x8 coefficient block: index in scan order,
// value is the raster index (row * 8 + col) into the coefficient array
pub const ZIGZAG: [usize; 64] = [
   0,  1,  8, 16,  9,  2,  3, 10, 17, 24, 32, 25, 18, 11,  4,  5,
  12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13,  6,  7, 14, 21, 28,
  35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51,
  58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63
];

// Base luma quantization matrix
pub const QUANT_BASE_Y: [u8; 64] = [
   8, 16, 19, 22, 26, 27, 29, 34, 16, 16, 22, 24, 27, 29, 34, 37,
  19, 22, 26, 27, 29, 34, 34, 38, 22, 22, 26, 27, 29, 34, 37, 40,
  22, 26, 27, 29, 32, 35, 40, 48, 26, 27, 29, 32, 35, 40, 48, 58,
  26, 27, 29, 34, 38, 46, 56, 69, 27, 29, 35, 38, 46, 56, 69, 83
];

// Base chroma quantization matrix
pub const QUANT_BASE_C: [u8; 64] = [
  16, 17, 18, 19, 20, 21, 22, 24, 17, 18, 19, 20, 21, 22, 24, 25,
  18, 19, 20, 21, 22, 24, 25, 27, 19, 20, 21, 22, 24, 25, 27, 28,
  20, 21, 22, 24, 25, 27, 28, 30, 21, 22, 24, 25, 27, 28, 30, 32,
  22, 24, 25, 27, 28, 30, 32, 35, 24, 25, 27, 28, 30, 32, 35, 38
];

// Number of fractional bits in the cosine matrix below
pub const COS_SHIFT: u32 = 14;

// Orthonormal 8-point DCT basis in Q14 fixed point.
// COS8[u][x] = round(16384 * c(u) * cos((2x+1) * u * pi / 16))
// with c(0) = 1/sqrt(8) and c(u) = 1/2 otherwise.
pub const COS8: [[i32; 8]; 8] = [
  [ 5793,  5793,  5793,  5793,  5793,  5793,  5793,  5793 ],
  [ 8035,  6811,  4551,  1598, -1598, -4551, -6811, -8035 ],
  [ 7568,  3135, -3135, -7568, -7568, -3135,  3135,  7568 ],
  [ 6811, -1598, -8035, -4551,  4551,  8035,  1598, -6811 ],
  [ 5793, -5793, -5793,  5793,  5793, -5793, -5793,  5793 ],
  [ 4551, -8035,  1598,  6811, -6811, -1598,  8035, -4551 ],
  [ 3135, -7568,  7568, -3135, -3135,  7568, -7568,  3135 ],
  [ 1598, -4551,  6811, -8035,  8035, -6811,  4551, -1598 ]
];
