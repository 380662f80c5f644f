pub use crate::color::Color;
pub use crate::composer::{Composer, DrawCx, LayoutCx, ScopeCx, ScopeHandle};
pub use crate::config::RuntimeConfig;
pub use crate::effects::{Dispose, EffectCx, Latest, on_dispose};
pub use crate::error::{Error, ErrorInfo, Result};
pub use crate::geometry::{Rect, Size, Vec2};
pub use crate::locals::{Density, Theme};
pub use crate::pipeline::{FrameReport, Phase, PhaseSet};
pub use crate::remote::RemoteWriter;
pub use crate::runtime::Runtime;
pub use crate::scene::{Scene, SceneNode};
pub use crate::store::Cell;
