pub mod controller;
pub mod state;
mod units;

pub use controller::SessionController;
pub use state::{CurrentAnalysis, SessionEvent, SessionPhase, SessionSnapshot, SessionState};
