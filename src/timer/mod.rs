pub mod controller;
pub mod events;
pub mod manager;
pub mod state;

pub use controller::{SessionSnapshot, TimerEngine};
pub use events::{EventDispatcher, EventHandler, HandlerId, TimerEvent, TimerEventKind};
pub use manager::SessionManager;
pub use state::ActiveSession;
