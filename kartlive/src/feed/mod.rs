mod link_core;

pub mod link;
pub mod scorecard;
pub mod socket;
pub mod util;

pub use link::{Event, Link, LinkStatus, ReconnectPolicy};
pub use scorecard::{FetchError, HttpScorecard, ScorecardSource};
pub use socket::{Connector, Frame, SocketError, WsConnector};
