//! Кадры протокола RESP2 (REdis Serialization Protocol).
//!
//! - `frame`: тип `RespFrame` и распознавание push-сообщений.
//! - `decoder`: инкрементальное декодирование из буфера `BytesMut`.
//! - `encoder`: кодирование команд и кадров.

pub mod decoder;
pub mod encoder;
pub mod frame;

pub use decoder::*;
pub use encoder::*;
pub use frame::*;
