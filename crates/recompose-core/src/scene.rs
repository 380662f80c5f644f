//! Draw-phase output.
//!
//! Draw scopes push [`SceneNode`]s; the runtime retains each scope's list and
//! assembles them in tree order into one [`Scene`] per frame. A renderer
//! collaborator consumes the scene as-is.

use crate::{Color, Rect};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub clear_color: Color,
    pub nodes: Vec<SceneNode>,
}

impl Scene {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Text of every `Text` node, in paint order. Handy for assertions.
    pub fn texts(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                SceneNode::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SceneNode {
    Rect {
        rect: Rect,
        color: Color,
        radius: f32,
    },
    Border {
        rect: Rect,
        color: Color,
        width: f32,
        radius: f32,
    },
    Text {
        rect: Rect,
        text: String,
        color: Color,
        size: f32,
    },
    PushClip {
        rect: Rect,
        radius: f32,
    },
    PopClip,
}
