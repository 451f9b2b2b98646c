//! Field placement and drag/resize interaction
//!
//! A [`DesignSession`] owns the fields being designed for one document and
//! turns pointer events (already converted to view space, see
//! [`crate::form::geometry::CanvasBounds::screen_to_view`]) into edits.

use crate::error::{Error, Result};
use crate::form::field::{FieldDescriptor, FieldType, FormSchema};
use crate::form::geometry::{PageGeometry, Point, Rect};

/// Side length of the square resize handle at a field's bottom-right corner
pub const HANDLE_SIZE: f32 = 8.0;

/// Smallest width/height a field can be resized to
pub const MIN_FIELD_SIZE: f32 = 10.0;

/// Whether the next click places a new field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Placing(FieldType),
}

/// Pointer gesture in progress
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    None,
    Dragging {
        id: String,
        /// Pointer position relative to the field's top-left corner
        grab: Point,
        origin: Rect,
    },
    Resizing {
        id: String,
        origin: Rect,
    },
}

/// What a pointer-down did
#[derive(Debug, Clone, PartialEq)]
pub enum PointerOutcome {
    Placed(String),
    DragStarted(String),
    ResizeStarted(String),
    Deselected,
}

/// Partial update of a field's properties
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub name: Option<String>,
    pub field_type: Option<FieldType>,
    pub required: Option<bool>,
    pub read_only: Option<bool>,
    pub default_value: Option<Option<String>>,
    pub options: Option<Vec<String>>,
    pub rect: Option<Rect>,
}

/// Editing state for one document's form design
#[derive(Debug, Clone)]
pub struct DesignSession {
    pages: Vec<PageGeometry>,
    fields: Vec<FieldDescriptor>,
    mode: Mode,
    interaction: Interaction,
    selected: Option<String>,
    next_id: u32,
}

impl DesignSession {
    pub fn new(pages: Vec<PageGeometry>) -> Self {
        Self {
            pages,
            fields: Vec::new(),
            mode: Mode::Idle,
            interaction: Interaction::None,
            selected: None,
            next_id: 1,
        }
    }

    /// Resume editing a saved schema. Fields on pages the document no longer
    /// has are kept so nothing is silently lost; they are simply unreachable
    /// by pointer events.
    pub fn from_schema(pages: Vec<PageGeometry>, schema: FormSchema) -> Self {
        let next_id = schema
            .fields
            .iter()
            .filter_map(|f| f.id.strip_prefix("field_")?.parse::<u32>().ok())
            .max()
            .map_or(1, |n| n + 1);
        Self {
            fields: schema.fields,
            next_id,
            ..Self::new(pages)
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn begin_placing(&mut self, field_type: FieldType) {
        self.mode = Mode::Placing(field_type);
        self.interaction = Interaction::None;
    }

    pub fn cancel_placing(&mut self) {
        self.mode = Mode::Idle;
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn fields_on_page(&self, page: u32) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(move |f| f.page == page)
    }

    pub fn selected(&self) -> Option<&FieldDescriptor> {
        self.selected.as_deref().and_then(|id| self.field(id))
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        self.index_of(id)?;
        self.selected = Some(id.to_string());
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Topmost field on `page` under `point`
    pub fn field_at(&self, page: u32, point: Point) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .rev()
            .find(|f| f.page == page && f.contains(point))
    }

    pub fn pointer_down(&mut self, page: u32, point: Point) -> Result<PointerOutcome> {
        let geometry = self.page(page)?;

        if let Mode::Placing(field_type) = self.mode {
            let (width, height) = field_type.default_size();
            let (page_w, page_h) = geometry.view_size();
            let rect = Rect::new(point.x, point.y, width, height).clamp_within(page_w, page_h);
            let id = self.place(field_type, page, rect);
            self.mode = Mode::Idle;
            return Ok(PointerOutcome::Placed(id));
        }

        let Some(hit) = self.field_at(page, point) else {
            self.selected = None;
            self.interaction = Interaction::None;
            return Ok(PointerOutcome::Deselected);
        };

        let id = hit.id.clone();
        let origin = hit.rect();
        self.selected = Some(id.clone());

        if in_resize_handle(&origin, point) {
            self.interaction = Interaction::Resizing {
                id: id.clone(),
                origin,
            };
            Ok(PointerOutcome::ResizeStarted(id))
        } else {
            self.interaction = Interaction::Dragging {
                id: id.clone(),
                grab: Point::new(point.x - origin.x, point.y - origin.y),
                origin,
            };
            Ok(PointerOutcome::DragStarted(id))
        }
    }

    /// Apply pointer motion to the gesture in progress. Returns the updated
    /// field when something moved.
    pub fn pointer_move(&mut self, point: Point) -> Option<&FieldDescriptor> {
        let (id, rect) = match &self.interaction {
            Interaction::None => return None,
            Interaction::Dragging { id, grab, origin } => (
                id.clone(),
                Rect::new(point.x - grab.x, point.y - grab.y, origin.width, origin.height),
            ),
            Interaction::Resizing { id, origin } => (
                id.clone(),
                Rect::new(
                    origin.x,
                    origin.y,
                    (point.x - origin.x).max(MIN_FIELD_SIZE),
                    (point.y - origin.y).max(MIN_FIELD_SIZE),
                ),
            ),
        };

        let idx = self.fields.iter().position(|f| f.id == id)?;
        let page = self.fields[idx].page;
        let (page_w, page_h) = self
            .pages
            .iter()
            .find(|p| p.index == page)
            .map(PageGeometry::view_size)?;

        // A resize near the page edge keeps the minimum size and moves the
        // origin back onto the page instead
        let rect = match self.interaction {
            Interaction::Resizing { .. } => Rect::new(
                rect.x,
                rect.y,
                rect.width.min(page_w - rect.x).max(MIN_FIELD_SIZE),
                rect.height.min(page_h - rect.y).max(MIN_FIELD_SIZE),
            )
            .clamp_within(page_w, page_h),
            _ => rect.clamp_within(page_w, page_h),
        };

        self.fields[idx].set_rect(rect);
        Some(&self.fields[idx])
    }

    /// Finish the gesture. Returns true when the field's geometry changed.
    pub fn pointer_up(&mut self) -> bool {
        let interaction = std::mem::replace(&mut self.interaction, Interaction::None);
        let (id, origin) = match interaction {
            Interaction::None => return false,
            Interaction::Dragging { id, origin, .. } | Interaction::Resizing { id, origin } => {
                (id, origin)
            }
        };
        self.field(&id).is_some_and(|f| f.rect() != origin)
    }

    /// Add a field programmatically (same id/name generation as placement)
    pub fn place(&mut self, field_type: FieldType, page: u32, rect: Rect) -> String {
        let id = self.generate_id();
        let name = self.generate_name(field_type);
        tracing::debug!(%id, %name, page, "placing field");
        self.fields
            .push(FieldDescriptor::new(id.clone(), name, field_type, page, rect));
        self.selected = Some(id.clone());
        id
    }

    pub fn remove(&mut self, id: &str) -> Result<FieldDescriptor> {
        let idx = self.index_of(id)?;
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        if matches!(&self.interaction, Interaction::Dragging { id: g, .. } | Interaction::Resizing { id: g, .. } if g == id)
        {
            self.interaction = Interaction::None;
        }
        Ok(self.fields.remove(idx))
    }

    pub fn remove_selected(&mut self) -> Option<FieldDescriptor> {
        let id = self.selected.clone()?;
        self.remove(&id).ok()
    }

    /// Move a field to the top of the z-order
    pub fn bring_to_front(&mut self, id: &str) -> Result<()> {
        let idx = self.index_of(id)?;
        let field = self.fields.remove(idx);
        self.fields.push(field);
        Ok(())
    }

    pub fn update(&mut self, id: &str, patch: FieldPatch) -> Result<&FieldDescriptor> {
        let idx = self.index_of(id)?;
        let page = self.fields[idx].page;
        let bounds = self.page(page).ok().map(PageGeometry::view_size);

        let field = &mut self.fields[idx];
        if let Some(name) = patch.name {
            field.name = name;
        }
        if let Some(field_type) = patch.field_type {
            field.field_type = field_type;
        }
        if let Some(required) = patch.required {
            field.required = required;
        }
        if let Some(read_only) = patch.read_only {
            field.read_only = read_only;
        }
        if let Some(default_value) = patch.default_value {
            field.default_value = default_value;
        }
        if let Some(options) = patch.options {
            field.options = options;
        }
        if let Some(rect) = patch.rect {
            let rect = rect.normalized();
            let rect = match bounds {
                Some((w, h)) => rect.clamp_within(w, h),
                None => rect,
            };
            field.set_rect(rect);
        }
        Ok(&self.fields[idx])
    }

    pub fn schema(&self) -> FormSchema {
        FormSchema::new(self.fields.clone())
    }

    fn page(&self, index: u32) -> Result<&PageGeometry> {
        self.pages
            .iter()
            .find(|p| p.index == index)
            .ok_or(Error::PageOutOfBounds {
                page: index,
                total: self.pages.len() as u32,
            })
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| Error::FieldNotFound { id: id.to_string() })
    }

    fn generate_id(&mut self) -> String {
        loop {
            let id = format!("field_{}", self.next_id);
            self.next_id += 1;
            if self.field(&id).is_none() {
                return id;
            }
        }
    }

    fn generate_name(&self, field_type: FieldType) -> String {
        let mut n = self
            .fields
            .iter()
            .filter(|f| f.field_type == field_type)
            .count()
            + 1;
        loop {
            let name = format!("{}_{}", field_type, n);
            if !self.fields.iter().any(|f| f.name == name) {
                return name;
            }
            n += 1;
        }
    }
}

fn in_resize_handle(rect: &Rect, p: Point) -> bool {
    p.x >= rect.right() - HANDLE_SIZE && p.y >= rect.bottom() - HANDLE_SIZE
}
