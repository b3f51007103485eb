//! Wire protocol: framing, commands, and typed messages

pub mod frame;
pub mod messages;

pub use frame::{
    begin_frame, finish_frame, take_frame, Command, FrameHeader, FRAME_HEADER_LEN,
    PROTOCOL_VERSION,
};
pub use messages::{
    Claim, ClientList, ClientListEntry, ClientListFlags, Hello, NewMaster, StateEntry, StateInfo,
    Welcome, CLIENT_LIST_FLAGS_OFFSET,
};
