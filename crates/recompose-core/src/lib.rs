//! # Recompose core
//!
//! A reactive recomposition runtime. UI is a tree of scopes; each scope runs
//! a body that reads observable cells. When a cell changes, only the scopes
//! that read it are executed again, in the phase they belong to.
//!
//! The pieces:
//!
//! - [`Cell<T>`]: a versioned, observable value. Writes that compare equal to
//!   the current value are dropped. Reads made while a scope executes are
//!   recorded against that scope.
//! - The observer registry maps cells to the scopes that read them in their
//!   last successful execution.
//! - The scheduler collects dirty cells at the end of a turn and plans a
//!   [`Batch`]: dependents deduplicated and ordered by phase, then depth, then
//!   age. Writes made while a pass runs are seen by the next pass of the same
//!   turn, up to [`RuntimeConfig::max_cascade_iterations`] passes.
//! - The pipeline runs Composition, Layout, then Draw. A read in a later phase
//!   never re-runs an earlier one.
//! - Effects are tasks owned by a scope and a key, cancelled on key change or
//!   when the scope leaves the tree.
//!
//! ```rust
//! use recompose_core::*;
//!
//! let rt = Runtime::new();
//! let count = rt.cell(0);
//! rt.set_content(move |cx| {
//!     let n = cx.get(count);
//!     cx.draw(move |d| d.text(format!("count = {n}"), Color::WHITE, 14.0));
//! });
//!
//! let report = rt.frame().unwrap();
//! assert_eq!(report.scene.unwrap().texts(), vec!["count = 0"]);
//!
//! rt.write(count, 1);
//! let report = rt.frame().unwrap();
//! assert_eq!(report.scene.unwrap().texts(), vec!["count = 1"]);
//! ```
//!
//! A [`Runtime`] is single-threaded. Other threads write through a
//! [`RemoteWriter`]; those writes are applied at the start of the next turn.

pub mod color;
pub mod composer;
pub mod config;
pub mod effects;
pub mod error;
pub mod geometry;
pub mod locals;
pub mod pipeline;
pub mod prelude;
mod registry;
pub mod remote;
pub mod runtime;
pub mod scene;
pub mod scheduler;
pub mod scope;
pub mod store;

pub use color::*;
pub use composer::{Composer, DrawCx, LayoutCx, ScopeCx, ScopeHandle};
pub use config::*;
pub use effects::{Dispose, EffectCx, Latest, on_dispose};
pub use error::*;
pub use geometry::*;
pub use locals::*;
pub use pipeline::{FrameReport, Phase, PhaseSet};
pub use remote::RemoteWriter;
pub use runtime::{Runtime, WeakRuntime};
pub use scene::*;
pub use scheduler::Batch;
pub use scope::{ChildKey, ScopeId, ScopeInfo};
pub use store::{Cell, CellId};
