pub mod device;
pub mod participant;
pub mod registry;
pub mod response;
pub mod room;

pub use device::{Device, RingStatus};
pub use participant::{InvitedParticipant, MediaState, Participant};
pub use registry::RoomRegistry;
pub use response::{
    NotifyMessage, NotifyPreconnectMessage, NotifyPreconnectResponse, NotifyResponse,
};
pub use room::{Room, RoomSnapshot};
