//! Audio post-processing: validation, resampling, clipping and encoding.
//!
//! Output is always mono. Supported containers are WAV (16-bit PCM or 32-bit
//! float) and OGG/Vorbis.

mod ogg;
mod postprocess;
mod resample;
mod wav;

pub use ogg::encode_ogg;
pub use postprocess::{AudioFormat, EncodedAudio, OutputOptions, SAMPLE_RATE_RANGE, finalize};
pub use resample::resample;
pub use wav::{WavEncoding, decode_wav, encode_wav};
