pub mod quantize;
pub mod replay;
