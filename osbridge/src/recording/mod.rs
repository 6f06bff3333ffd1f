//! Workflow recording and replay.
//!
//! A named session captures every plan executed while it is active; the
//! replayer merges a recording into one sequential plan that re-runs the
//! session.

mod models;
mod recorder;
mod replayer;

pub use models::{RecordedPlan, RecordingStatus, WorkflowRecording};
pub use recorder::ShadowRecorder;
pub use replayer::WorkflowReplayer;
