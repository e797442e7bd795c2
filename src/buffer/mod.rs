mod noise_variance_buffer;

pub use noise_variance_buffer::{BufferRow, ErrorMode, NoiseVarianceBuffer};
