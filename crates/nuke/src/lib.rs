//! External renderer (Nuke) wrapper.
//!
//! [`args`] builds the command lines of the preview and plate render
//! scripts. [`process::NukeProcess`] runs one render job, follows its
//! progress protocol on standard output and reports state changes to a
//! [`process::RenderObserver`].

pub mod args;
pub mod error;
pub mod process;

pub use args::{PreviewArgs, SequenceArgs, SequenceSlate};
pub use error::RenderError;
pub use process::{NukeProcess, RenderObserver, RenderState};
