//! WearLink protocol support
//!
//! Pure frame codec and command model for the WearLink wearable protocol
//! family (WL01). This crate owns the wire format only: length-prefixed,
//! checksummed frames and the typed get/set command variants carried inside
//! them. It performs no I/O and holds no transport state; the sync engine
//! in `syncsrv` drives it.

pub mod command;
pub mod error;
pub mod frame;

pub use command::{
    AlarmSetting, Command, DeviceMessage, DeviceTime, SleepMessage, SlotMessage, SlotRange,
    SummaryMessage, OP_GET, OP_SET,
};
pub use error::{CommandError, FrameError};
pub use frame::{checksum, Frame, DEVICE_RESPONSE_ID, FRAME_OVERHEAD, HOST_REQUEST_ID};
