pub mod highlight;
pub mod reconcile;
pub mod session;
pub mod snapshot;

pub use reconcile::{reconcile, AnnotatedRow, Gap, PositionDelta};
pub use session::{Board, Session, SessionCore, SessionError, SessionEvent, Summary};
pub use snapshot::{HeatError, HeatId, RacerId, RawScoreRow, Snapshot};
