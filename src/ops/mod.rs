// ============================================================================
// PIXEL OPERATIONS: palette quantization and tile chunking
// ============================================================================

pub mod chunk;
pub mod quantize;

pub use chunk::{Chunk, ChunkError, ChunkMap, chunk};
pub use quantize::{nearest_color, quantize, quantize_with_palette};
