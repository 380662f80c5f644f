//! Developer tools: per-frame metrics, a HUD overlay and a scope tree dump.
//!
//! Feed every [`FrameReport`] to [`Inspector::frame`]. When the inspector is
//! enabled the HUD is painted on top of the report's scene.

use std::fmt::Write as _;

use web_time::Instant;

use recompose_core::{ChildKey, Color, Error, FrameReport, Phase, Rect, Runtime, Scene, SceneNode, ScopeId};

pub struct Hud {
    pub inspector_enabled: bool,
    /// Outlined on top of the scene, e.g. the bounds of a selected scope.
    pub highlight: Option<Rect>,
    frame_count: u64,
    last_frame: Option<Instant>,
    fps_smooth: f32,
    pub metrics: Option<Metrics>,
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}

impl Hud {
    pub fn new() -> Self {
        Self {
            inspector_enabled: false,
            highlight: None,
            frame_count: 0,
            last_frame: None,
            fps_smooth: 0.0,
            metrics: None,
        }
    }

    pub fn toggle_inspector(&mut self) {
        self.inspector_enabled = !self.inspector_enabled;
    }

    pub fn set_highlight(&mut self, r: Option<Rect>) {
        self.highlight = r;
    }

    pub fn fps(&self) -> f32 {
        self.fps_smooth
    }

    pub fn overlay(&mut self, scene: &mut Scene) {
        self.frame_count += 1;
        let now = Instant::now();
        if let Some(prev) = self.last_frame.replace(now) {
            let dt = (now - prev).as_secs_f32();
            if dt > 0.0 {
                let fps = 1.0 / dt;
                // simple EMA
                let a = 0.2;
                self.fps_smooth = if self.fps_smooth == 0.0 {
                    fps
                } else {
                    (1.0 - a) * self.fps_smooth + a * fps
                };
            }
        }
        let mut lines = vec![
            format!("frame: {}", self.frame_count),
            format!("fps: {:.1}", self.fps_smooth),
        ];
        if let Some(m) = &self.metrics {
            lines.push(format!("c/l/d: {}/{}/{}", m.composed, m.laid_out, m.drawn));
            lines.push(format!("skipped: {}", m.skipped));
            lines.push(format!("turn: {:.2} ms", m.frame_ms));
            lines.push(format!("nodes: {}", m.scene_nodes));
        }
        scene.nodes.push(SceneNode::Text {
            rect: Rect {
                x: 8.0,
                y: 8.0,
                w: 320.0,
                h: 16.0,
            },
            text: lines.join("  |  "),
            color: Color::from_hex("#AAAAAA"),
            size: 14.0,
        });

        if let Some(r) = self.highlight {
            scene.nodes.push(SceneNode::Border {
                rect: r,
                color: Color::from_hex("#44AAFF"),
                width: 2.0,
                radius: 0.0,
            });
        }
    }
}

/// Counters for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    pub frame_ms: f32,
    pub composed: usize,
    pub laid_out: usize,
    pub drawn: usize,
    pub skipped: usize,
    pub removed: usize,
    pub passes: usize,
    pub diagnostics: usize,
    pub scene_nodes: usize,
    pub scopes: usize,
    pub cells: usize,
    pub running_effects: usize,
}

impl Metrics {
    pub fn from_report(report: &FrameReport) -> Self {
        Self {
            frame_ms: report.duration.as_secs_f32() * 1000.0,
            composed: report.executed(Phase::Composition).len(),
            laid_out: report.executed(Phase::Layout).len(),
            drawn: report.executed(Phase::Draw).len(),
            skipped: report.skipped.len(),
            removed: report.removed.len(),
            passes: report.passes,
            diagnostics: report.diagnostics.len(),
            scene_nodes: report.scene.as_ref().map_or(0, |s| s.nodes.len()),
            ..Self::default()
        }
    }

    /// [`Metrics::from_report`] plus the runtime's current sizes.
    pub fn sample(rt: &Runtime, report: &FrameReport) -> Self {
        Self {
            scopes: rt.scope_count(),
            cells: rt.cell_count(),
            running_effects: rt.running_effects(),
            ..Self::from_report(report)
        }
    }
}

/// Running totals since the inspector was created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub frames: u64,
    pub executed: u64,
    pub skipped: u64,
    pub capped_turns: u64,
    pub caught_failures: u64,
    pub cancelled_writes: u64,
}

impl Totals {
    fn add(&mut self, report: &FrameReport) {
        self.frames += 1;
        self.executed += report.total_executed() as u64;
        self.skipped += report.skipped.len() as u64;
        for d in &report.diagnostics {
            match d {
                Error::UnboundedInvalidation { .. } => self.capped_turns += 1,
                Error::ScopeExecution(_) => self.caught_failures += 1,
                Error::EffectCancellationViolation { .. } => self.cancelled_writes += 1,
                _ => {}
            }
        }
    }
}

pub struct Inspector {
    pub hud: Hud,
    pub totals: Totals,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self {
            hud: Hud::new(),
            totals: Totals::default(),
        }
    }

    /// Records `report` and, when enabled, paints the HUD onto its scene.
    pub fn frame(&mut self, rt: &Runtime, report: &mut FrameReport) {
        self.totals.add(report);
        for d in &report.diagnostics {
            log::warn!("frame {}: {d}", self.totals.frames);
        }
        self.hud.metrics = Some(Metrics::sample(rt, report));
        if self.hud.inspector_enabled
            && let Some(scene) = report.scene.as_mut()
        {
            self.hud.overlay(scene);
        }
    }
}

/// The scope tree as indented text, one scope per line: key, phase, and
/// markers for skippable scopes and captured errors.
pub fn dump_tree(rt: &Runtime) -> String {
    let mut out = String::new();
    if let Some(root) = rt.root() {
        dump_into(rt, root, &mut out);
    }
    out
}

fn dump_into(rt: &Runtime, id: ScopeId, out: &mut String) {
    let Some(info) = rt.scope_info(id) else {
        return;
    };
    let indent = "  ".repeat(info.depth as usize);
    let key = match &info.key {
        ChildKey::Positional(n) => format!("#{n}"),
        ChildKey::Explicit(k) => k.clone(),
    };
    let _ = write!(out, "{indent}{key} {:?}", info.phase);
    if info.skippable {
        out.push_str(" skippable");
    }
    if let Some(e) = &info.error {
        let _ = write!(out, " error={e:?}");
    }
    out.push('\n');
    for child in info.children {
        dump_into(rt, child, out);
    }
}
