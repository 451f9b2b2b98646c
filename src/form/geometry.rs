//! Coordinate spaces
//!
//! Four spaces are in play when a field is placed on a page:
//!
//! - **Screen**: client (CSS) pixels of a pointer event.
//! - **Canvas**: backing pixels of the canvas the page is rendered into.
//! - **View**: unscaled page points with a top-left origin, after the page's
//!   `/Rotate` has been applied. Field descriptors are stored in this space.
//! - **User**: PDF user space, bottom-left origin, unrotated.
//!
//! Canvas and view differ only by the zoom scale. View and user differ by the
//! page box origin, a y-flip, and the page rotation.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A point in any 2D space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle given by its top-left corner and size.
///
/// In user space "top-left" is simply the minimum corner; the struct carries
/// no orientation of its own.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a rectangle from two opposite corners in any order
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x0 = a.x.min(b.x);
        let y0 = a.y.min(b.y);
        Self {
            x: x0,
            y: y0,
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Flip negative extents so width and height are non-negative
    pub fn normalized(&self) -> Self {
        Self::from_corners(
            Point::new(self.x, self.y),
            Point::new(self.x + self.width, self.y + self.height),
        )
    }

    /// Edges are inclusive so a click on the border still hits the field
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Move the rectangle inside `[0, width] x [0, height]`, shrinking it
    /// only when it is larger than the bounds.
    pub fn clamp_within(&self, width: f32, height: f32) -> Self {
        let w = self.width.min(width).max(0.0);
        let h = self.height.min(height).max(0.0);
        Self {
            x: self.x.clamp(0.0, (width - w).max(0.0)),
            y: self.y.clamp(0.0, (height - h).max(0.0)),
            width: w,
            height: h,
        }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// `[llx, lly, urx, ury]` as written in a PDF `/Rect`
    pub fn to_pdf_array(&self) -> [f32; 4] {
        [self.x, self.y, self.right(), self.bottom()]
    }

    /// Parse a PDF `[x0 y0 x1 y1]` array in any corner order
    pub fn from_pdf_array(values: [f32; 4]) -> Self {
        Self::from_corners(
            Point::new(values[0], values[1]),
            Point::new(values[2], values[3]),
        )
    }
}

/// A page box (MediaBox or CropBox) in user space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PdfBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// US Letter, the fallback when a page carries no usable box
    pub fn letter() -> Self {
        Self::new(0.0, 0.0, 612.0, 792.0)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

/// Geometry of one page: its visible box and display rotation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    /// 0-based page index
    pub index: u32,
    /// Visible box in user space (CropBox, falling back to MediaBox)
    #[serde(rename = "box")]
    pub bounds: PdfBox,
    /// Clockwise display rotation, one of 0, 90, 180, 270
    pub rotation: u16,
}

impl PageGeometry {
    pub fn new(index: u32, bounds: PdfBox, rotation: i64) -> Self {
        Self {
            index,
            bounds,
            rotation: normalize_rotation(rotation),
        }
    }

    /// Width and height of the page as displayed
    pub fn view_size(&self) -> (f32, f32) {
        match self.rotation {
            90 | 270 => (self.bounds.height(), self.bounds.width()),
            _ => (self.bounds.width(), self.bounds.height()),
        }
    }

    pub fn view_point_to_user(&self, p: Point) -> Point {
        let b = &self.bounds;
        match self.rotation {
            90 => Point::new(b.x0 + p.y, b.y0 + p.x),
            180 => Point::new(b.x1 - p.x, b.y0 + p.y),
            270 => Point::new(b.x1 - p.y, b.y1 - p.x),
            _ => Point::new(b.x0 + p.x, b.y1 - p.y),
        }
    }

    pub fn user_point_to_view(&self, p: Point) -> Point {
        let b = &self.bounds;
        match self.rotation {
            90 => Point::new(p.y - b.y0, p.x - b.x0),
            180 => Point::new(b.x1 - p.x, p.y - b.y0),
            270 => Point::new(b.y1 - p.y, b.x1 - p.x),
            _ => Point::new(p.x - b.x0, b.y1 - p.y),
        }
    }

    /// Convert a stored (view-space) field rectangle into a user-space rectangle
    pub fn view_to_user(&self, rect: &Rect) -> Rect {
        Rect::from_corners(
            self.view_point_to_user(Point::new(rect.x, rect.y)),
            self.view_point_to_user(Point::new(rect.right(), rect.bottom())),
        )
    }

    /// Convert a user-space rectangle (e.g. a widget `/Rect`) into view space
    pub fn user_to_view(&self, rect: &Rect) -> Rect {
        Rect::from_corners(
            self.user_point_to_view(Point::new(rect.x, rect.y)),
            self.user_point_to_view(Point::new(rect.right(), rect.bottom())),
        )
    }
}

fn normalize_rotation(rotation: i64) -> u16 {
    // /Rotate must be a multiple of 90; anything else is treated as unrotated
    if rotation % 90 != 0 {
        return 0;
    }
    rotation.rem_euclid(360) as u16
}

/// Zoom applied when rendering a page into a canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f32,
}

impl Viewport {
    pub fn new(scale: f32) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::InvalidScale { scale });
        }
        Ok(Self { scale })
    }

    pub fn to_canvas(&self, rect: &Rect) -> Rect {
        rect.scaled(self.scale)
    }

    pub fn from_canvas(&self, rect: &Rect) -> Rect {
        rect.scaled(1.0 / self.scale)
    }

    pub fn point_from_canvas(&self, p: Point) -> Point {
        Point::new(p.x / self.scale, p.y / self.scale)
    }

    /// Canvas size in whole pixels for a page at this zoom
    pub fn canvas_size(&self, page: &PageGeometry) -> (u32, u32) {
        let (w, h) = page.view_size();
        (
            (w * self.scale).round().max(1.0) as u32,
            (h * self.scale).round().max(1.0) as u32,
        )
    }
}

/// Where a canvas sits on screen, as reported by the client's layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanvasBounds {
    /// Left edge in client pixels
    pub left: f32,
    /// Top edge in client pixels
    pub top: f32,
    /// Displayed (CSS) width
    pub css_width: f32,
    /// Displayed (CSS) height
    pub css_height: f32,
    /// Backing store width in device pixels
    pub pixel_width: u32,
    /// Backing store height in device pixels
    pub pixel_height: u32,
}

impl CanvasBounds {
    /// Map a client-space pointer position to canvas pixels
    pub fn screen_to_canvas(&self, client: Point) -> Point {
        let sx = if self.css_width > 0.0 {
            self.pixel_width as f32 / self.css_width
        } else {
            1.0
        };
        let sy = if self.css_height > 0.0 {
            self.pixel_height as f32 / self.css_height
        } else {
            1.0
        };
        Point::new((client.x - self.left) * sx, (client.y - self.top) * sy)
    }

    /// Screen point all the way down to view space
    pub fn screen_to_view(&self, client: Point, viewport: &Viewport) -> Point {
        viewport.point_from_canvas(self.screen_to_canvas(client))
    }
}
