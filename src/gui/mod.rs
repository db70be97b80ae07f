mod error;
mod monitor;

pub use error::GuiError;
pub use monitor::{monitor, ui, MonitorSink, MonitorState, Snapshot};
