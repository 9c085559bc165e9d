pub mod projector;
pub mod tui;
pub mod widgets;

// Re-export important structs for convenience
pub use projector::{Projector, RecordingProjector};
pub use tui::TuiProjector;
pub use widgets::StatefulList;
