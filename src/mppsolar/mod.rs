pub mod protocol;  // Command encoding and response decoding
pub mod transport; // Serial command transport
