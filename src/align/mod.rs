//! Alignment pipeline.
//!
//! Turns the raw sessions of one subject into the aligned ΔF/F tensor.
//!
//! # Pipeline
//!
//! ```text
//! sessions (sorted by acquisition age)
//!     ├── common_cell_order()      ← cells present in every session, ascending
//!     └── per session
//!           └── extract_windows()  ← R fixed-length windows per cell
//!                 └── tensor[:, session, :, :]
//! ```
//!
//! Every function here is pure; fetching the sessions is the caller's job.

pub mod cells;
pub mod tensor;
pub mod window;

pub use cells::{common_cell_order, common_cells};
pub use tensor::{align_sessions, sort_by_acquisition_age, Alignment};
pub use window::{extract_windows, SessionWindows, TrialWindow};
