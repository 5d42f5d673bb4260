pub mod dispatch;
pub mod handler;
pub mod messages;
pub mod session;

pub use handler::ws_routes;
pub use messages::{Envelope, JoinResponse, PreconnectResponse};
pub use session::ConnSession;
