pub mod conv_encoder;

pub use conv_encoder::ConvEncoder;
