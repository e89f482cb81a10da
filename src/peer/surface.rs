//! The local screen region a controlling peer may interact with.
//!
//! Synthetic interaction is restricted to a single allow-listed element, the chat
//! message input. Buttons and everything else under a remote click are left alone.

use crate::peer::control::PointerButton;

/// The one element a remote click may act on.
pub const MESSAGE_INPUT_ID: &str = "message-input";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    /// Percent-of-viewport coordinates to local pixels.
    pub fn to_local(&self, x_pct: f64, y_pct: f64) -> (f64, f64) {
        (self.width * x_pct / 100.0, self.height * y_pct / 100.0)
    }
}

/// Hit-testing view of the local UI, supplied by the embedding application.
pub trait ControlSurface: Send + Sync {
    fn viewport(&self) -> Viewport;

    /// Id of the topmost element at a local point, if any.
    fn element_at(&self, x: f64, y: f64) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Fixed layout of rectangles; later regions are stacked above earlier ones.
#[derive(Debug, Clone)]
pub struct StaticSurface {
    pub viewport: Viewport,
    pub regions: Vec<Region>,
}

impl StaticSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            viewport: Viewport { width, height },
            regions: Vec::new(),
        }
    }

    pub fn with_region(mut self, id: &str, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.regions.push(Region {
            id: id.to_owned(),
            x,
            y,
            width,
            height,
        });
        self
    }
}

impl ControlSurface for StaticSurface {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn element_at(&self, x: f64, y: f64) -> Option<String> {
        self.regions
            .iter()
            .rev()
            .find(|r| r.contains(x, y))
            .map(|r| r.id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    FocusInput,
    Ignored,
}

pub fn resolve_click(
    surface: &dyn ControlSurface,
    x_pct: f64,
    y_pct: f64,
    button: Option<PointerButton>,
) -> ClickOutcome {
    if button == Some(PointerButton::Right) {
        return ClickOutcome::Ignored;
    }
    let (x, y) = surface.viewport().to_local(x_pct, y_pct);
    match surface.element_at(x, y) {
        Some(id) if id == MESSAGE_INPUT_ID => ClickOutcome::FocusInput,
        _ => ClickOutcome::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StaticSurface {
        StaticSurface::new(1000.0, 800.0)
            .with_region("chat-panel", 0.0, 0.0, 1000.0, 800.0)
            .with_region(MESSAGE_INPUT_ID, 100.0, 700.0, 600.0, 60.0)
            .with_region("send-button", 720.0, 700.0, 100.0, 60.0)
    }

    #[test]
    fn percent_maps_to_pixels() {
        let v = Viewport {
            width: 1000.0,
            height: 800.0,
        };
        assert_eq!(v.to_local(50.5, 10.25), (505.0, 82.0));
    }

    #[test]
    fn only_the_message_input_is_clickable() {
        let s = layout();
        assert_eq!(resolve_click(&s, 30.0, 91.0, Some(PointerButton::Left)), ClickOutcome::FocusInput);
        assert_eq!(resolve_click(&s, 30.0, 91.0, None), ClickOutcome::FocusInput);
        assert_eq!(resolve_click(&s, 75.0, 91.0, Some(PointerButton::Left)), ClickOutcome::Ignored);
        assert_eq!(resolve_click(&s, 50.0, 10.0, Some(PointerButton::Left)), ClickOutcome::Ignored);
    }

    #[test]
    fn right_clicks_never_act() {
        let s = layout();
        assert_eq!(resolve_click(&s, 30.0, 91.0, Some(PointerButton::Right)), ClickOutcome::Ignored);
    }

    #[test]
    fn topmost_region_wins() {
        let s = layout();
        assert_eq!(s.element_at(300.0, 720.0).as_deref(), Some(MESSAGE_INPUT_ID));
        assert_eq!(s.element_at(300.0, 100.0).as_deref(), Some("chat-panel"));
        assert_eq!(s.element_at(2000.0, 100.0), None);
    }
}
