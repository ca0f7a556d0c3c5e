//! Command/response protocol engine for the wireless link.
//!
//! Framing lives in [`frame`], the dispatch table and handlers in
//! [`engine`]. The link adapter feeds raw command frames in and carries
//! response frames out; everything in between is synchronous.

pub mod engine;
pub mod frame;

pub use engine::{
    CommandId, DeviceIdentity, ProtocolEngine, SystemStatus, DEVICE_INFO_SIZE, FIRMWARE_VERSION,
    SYSTEM_STATUS_SIZE, TIME_DATA_RESPONSE_SIZE,
};
pub use frame::{
    CommandFrame, FrameError, ResponseBuilder, ResponseFrame, StatusCode, COMMAND_HEADER_LEN,
    RESPONSE_DATA_CAPACITY, RESPONSE_HEADER_LEN,
};
