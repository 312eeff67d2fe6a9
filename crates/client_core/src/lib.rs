pub mod driver;
pub mod engine;
pub mod presenter;
pub mod reconcile;
pub mod router;
pub mod server_api;
pub mod session;
pub mod transport;

pub use driver::{EngineHandle, HandleError, SyncDriver};
pub use engine::{ChatEngine, Clock, Effect, EngineEvent, EngineLimits, SystemClock};
pub use presenter::{BroadcastPresenter, ClientEvent, Presenter};
pub use reconcile::{merge_histories, FetchTicket, Reconciliation};
pub use router::route;
pub use server_api::{ChatServerApi, FileUpload, HttpChatServer, MissingChatServerApi};
pub use session::{Session, SessionId, SessionState};
pub use transport::{EventSink, InboundEvent, MissingPushTransport, PushTransport};
