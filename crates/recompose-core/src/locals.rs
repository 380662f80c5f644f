//! # Locals
//!
//! Values a scope provides to its whole subtree without threading them
//! through every body:
//!
//! ```ignore
//! rt.set_content(|cx| {
//!     cx.provide(Theme { primary: Color::from_hex("#0061A4"), ..Theme::default() });
//!     cx.child(|cx| {
//!         let theme = cx.theme(); // nearest provider wins
//!         cx.draw(move |d| d.fill(theme.primary));
//!     });
//! });
//! ```
//!
//! A local is an ordinary cell owned by the providing scope, so reading one
//! is a tracked read: providing a different value re-runs exactly the scopes
//! that read it. When a scope stops providing a value its readers re-run and
//! resolve to the next provider up the tree, or the type's default.

use crate::{Color, ScopeCx};

/// Small semantic color scheme for draw scopes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Theme {
    pub background: Color,
    pub surface: Color,
    pub on_surface: Color,
    pub primary: Color,
    pub on_primary: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Color::from_hex("#121212"),
            surface: Color::from_hex("#1E1E1E"),
            on_surface: Color::from_hex("#DDDDDD"),
            primary: Color::from_hex("#34AF82"),
            on_primary: Color::WHITE,
            error: Color::from_hex("#AE3636"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Density {
    pub scale: f32, // dp→px multiplier
}

impl Default for Density {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl ScopeCx {
    pub fn theme(&self) -> Theme {
        self.local_or_default()
    }

    pub fn density(&self) -> Density {
        self.local_or_default()
    }

    pub fn dp_to_px(&self, dp: f32) -> f32 {
        dp * self.density().scale
    }
}
