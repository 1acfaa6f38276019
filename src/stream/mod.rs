pub mod frame;

pub use frame::{event_stream, ChunkDecoder, DecodeFlow, FrameAssembler, FrameResult};
