//! Widget appearance streams
//!
//! Viewers that honor `/NeedAppearances` regenerate these, but printing and
//! flattening paths use whatever `/AP` the widget carries, so every widget
//! gets a normal appearance drawn in its displayed (unrotated) orientation.

use crate::form::field::{FieldDescriptor, FieldType, Rgb};
use crate::pdf::objects::{
    escape_literal, fmt_num, inherited, number, object_text, real, resolve, resolve_array,
    resolve_dict,
};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

/// Resource name of the Helvetica font placed in `/DR`
pub const FONT_NAME: &str = "Helv";

const TEXT_PADDING: f32 = 2.0;

/// Colors and border of one widget
#[derive(Debug, Clone, Copy)]
pub struct AppearanceStyle {
    pub border_width: f32,
    pub border: Option<Rgb>,
    pub background: Option<Rgb>,
    pub text: Rgb,
    /// 0 means auto-size to the widget height
    pub font_size: f32,
    pub dashed: bool,
}

impl AppearanceStyle {
    /// Style recovered from a widget's `/DA`, `/MK` and `/BS`
    pub fn from_widget(doc: &Document, widget: &Dictionary) -> Self {
        let da = inherited(doc, widget, b"DA")
            .and_then(|o| object_text(doc, o))
            .unwrap_or_default();
        let tokens: Vec<&str> = da.split_whitespace().collect();
        let operand = |op: &str, back: usize| -> Option<f32> {
            let at = tokens.iter().rposition(|t| *t == op)?;
            tokens.get(at.checked_sub(back)?)?.parse().ok()
        };

        let font_size = operand("Tf", 1).unwrap_or(0.0);
        let text = match (operand("rg", 3), operand("rg", 2), operand("rg", 1)) {
            (Some(r), Some(g), Some(b)) => Rgb(r, g, b),
            _ => operand("g", 1).map(|v| Rgb(v, v, v)).unwrap_or(Rgb::BLACK),
        };

        let mk = widget.get(b"MK").ok().and_then(|m| resolve_dict(doc, m));
        let mk_color = |key: &[u8]| -> Option<Rgb> {
            let arr = mk?.get(key).ok().and_then(|a| resolve_array(doc, a))?;
            let c: Vec<f32> = arr.iter().filter_map(|v| number(resolve(doc, v))).collect();
            match c.as_slice() {
                [gray] => Some(Rgb(*gray, *gray, *gray)),
                [r, g, b] => Some(Rgb(*r, *g, *b)),
                [c, m, y, k] => Some(Rgb(
                    (1.0 - c) * (1.0 - k),
                    (1.0 - m) * (1.0 - k),
                    (1.0 - y) * (1.0 - k),
                )),
                _ => None,
            }
        };

        let bs = widget.get(b"BS").ok().and_then(|b| resolve_dict(doc, b));
        let border_width = bs
            .and_then(|b| b.get(b"W").ok())
            .and_then(|w| number(resolve(doc, w)))
            .unwrap_or(1.0);
        let dashed = bs
            .and_then(|b| b.get(b"S").ok())
            .and_then(|s| s.as_name().ok())
            == Some(b"D".as_slice());

        Self {
            border_width,
            border: mk_color(b"BC"),
            background: mk_color(b"BG"),
            text,
            font_size,
            dashed,
        }
    }

    pub fn for_field(field: &FieldDescriptor, border_width: f32) -> Self {
        Self {
            border_width,
            border: Some(Rgb::parse_or(field.border_color.as_deref(), Rgb::BLACK)),
            background: field.fill_color.as_deref().and_then(Rgb::parse),
            text: Rgb::parse_or(field.text_color.as_deref(), Rgb::BLACK),
            font_size: field.font_size_or_default(),
            dashed: field.field_type == FieldType::Signature,
        }
    }

    /// `/DA` string for this style
    pub fn default_appearance(&self) -> String {
        format!(
            "/{} {} Tf {} {} {} rg",
            FONT_NAME,
            fmt_num(self.font_size),
            fmt_num(self.text.0),
            fmt_num(self.text.1),
            fmt_num(self.text.2)
        )
    }

    fn frame(&self, width: f32, height: f32) -> String {
        let mut stream = String::new();
        if let Some(Rgb(r, g, b)) = self.background {
            stream.push_str(&format!("{} {} {} rg\n", fmt_num(r), fmt_num(g), fmt_num(b)));
            stream.push_str(&format!("0 0 {} {} re f\n", fmt_num(width), fmt_num(height)));
        }
        if let Some(Rgb(r, g, b)) = self.border {
            if self.border_width > 0.0 {
                let half = self.border_width / 2.0;
                stream.push_str(&format!("{} {} {} RG\n", fmt_num(r), fmt_num(g), fmt_num(b)));
                stream.push_str(&format!("{} w\n", fmt_num(self.border_width)));
                if self.dashed {
                    stream.push_str("[3] 0 d\n");
                }
                stream.push_str(&format!(
                    "{} {} {} {} re S\n",
                    fmt_num(half),
                    fmt_num(half),
                    fmt_num(width - self.border_width),
                    fmt_num(height - self.border_width)
                ));
                if self.dashed {
                    stream.push_str("[] 0 d\n");
                }
            }
        }
        stream
    }

    fn effective_font_size(&self, height: f32) -> f32 {
        if self.font_size > 0.0 {
            self.font_size
        } else {
            ((height - 2.0 * TEXT_PADDING) * 0.75).clamp(4.0, 12.0)
        }
    }

    /// Single-line text, vertically centered, clipped to the field
    pub fn text(&self, width: f32, height: f32, value: &str) -> String {
        let mut stream = self.frame(width, height);
        if value.is_empty() {
            return stream;
        }
        let size = self.effective_font_size(height);
        let baseline = ((height - size) / 2.0 + size * 0.22).max(TEXT_PADDING);
        let Rgb(r, g, b) = self.text;

        stream.push_str("/Tx BMC\nq\n");
        stream.push_str(&format!(
            "{} {} {} {} re W n\n",
            fmt_num(self.border_width),
            fmt_num(self.border_width),
            fmt_num(width - 2.0 * self.border_width),
            fmt_num(height - 2.0 * self.border_width)
        ));
        stream.push_str("BT\n");
        stream.push_str(&format!("/{} {} Tf\n", FONT_NAME, fmt_num(size)));
        stream.push_str(&format!("{} {} {} rg\n", fmt_num(r), fmt_num(g), fmt_num(b)));
        stream.push_str(&format!("{} {} Td\n", fmt_num(TEXT_PADDING), fmt_num(baseline)));
        stream.push_str(&format!("({}) Tj\n", escape_literal(value)));
        stream.push_str("ET\nQ\nEMC\n");
        stream
    }

    /// Selected entries of a list box, one per line from the top
    pub fn list(&self, width: f32, height: f32, options: &[String], selected: &[String]) -> String {
        let mut stream = self.frame(width, height);
        let size = self.effective_font_size(height.min(20.0));
        let line = size * 1.2;
        let Rgb(r, g, b) = self.text;

        stream.push_str("/Tx BMC\nq\n");
        stream.push_str(&format!(
            "0 0 {} {} re W n\n",
            fmt_num(width),
            fmt_num(height)
        ));
        for (i, option) in options.iter().enumerate() {
            let top = height - TEXT_PADDING - line * (i as f32 + 1.0);
            if top < 0.0 {
                break;
            }
            if selected.contains(option) {
                stream.push_str(&format!(
                    "0.6 0.75 0.9 rg\n{} {} {} {} re f\n",
                    fmt_num(TEXT_PADDING / 2.0),
                    fmt_num(top),
                    fmt_num(width - TEXT_PADDING),
                    fmt_num(line)
                ));
            }
            stream.push_str(&format!(
                "BT\n/{} {} Tf\n{} {} {} rg\n{} {} Td\n({}) Tj\nET\n",
                FONT_NAME,
                fmt_num(size),
                fmt_num(r),
                fmt_num(g),
                fmt_num(b),
                fmt_num(TEXT_PADDING),
                fmt_num(top + line * 0.25),
                escape_literal(option)
            ));
        }
        stream.push_str("Q\nEMC\n");
        stream
    }

    pub fn checkbox_on(&self, width: f32, height: f32) -> String {
        let mut stream = self.frame(width, height);
        let Rgb(r, g, b) = self.text;
        let margin = width.min(height) * 0.2;
        stream.push_str(&format!("{} {} {} RG\n", fmt_num(r), fmt_num(g), fmt_num(b)));
        stream.push_str(&format!("{} w\n", fmt_num((width.min(height) * 0.1).max(0.5))));
        stream.push_str(&format!(
            "{} {} m {} {} l {} {} l S\n",
            fmt_num(margin),
            fmt_num(height * 0.5),
            fmt_num(width * 0.4),
            fmt_num(margin),
            fmt_num(width - margin),
            fmt_num(height - margin)
        ));
        stream
    }

    pub fn checkbox_off(&self, width: f32, height: f32) -> String {
        self.frame(width, height)
    }

    pub fn radio_on(&self, width: f32, height: f32) -> String {
        let mut stream = self.radio_off(width, height);
        let Rgb(r, g, b) = self.text;
        let radius = (width.min(height) / 2.0 - self.border_width) * 0.5;
        stream.push_str(&format!("{} {} {} rg\n", fmt_num(r), fmt_num(g), fmt_num(b)));
        stream.push_str(&circle_path(width / 2.0, height / 2.0, radius));
        stream.push_str("f\n");
        stream
    }

    pub fn radio_off(&self, width: f32, height: f32) -> String {
        let mut stream = String::new();
        let (cx, cy) = (width / 2.0, height / 2.0);
        let radius = (width.min(height) / 2.0 - self.border_width / 2.0).max(0.5);
        if let Some(Rgb(r, g, b)) = self.background {
            stream.push_str(&format!("{} {} {} rg\n", fmt_num(r), fmt_num(g), fmt_num(b)));
            stream.push_str(&circle_path(cx, cy, radius));
            stream.push_str("f\n");
        }
        if let Some(Rgb(r, g, b)) = self.border {
            if self.border_width > 0.0 {
                stream.push_str(&format!("{} {} {} RG\n", fmt_num(r), fmt_num(g), fmt_num(b)));
                stream.push_str(&format!("{} w\n", fmt_num(self.border_width)));
                stream.push_str(&circle_path(cx, cy, radius));
                stream.push_str("S\n");
            }
        }
        stream
    }
}

/// Circle as four Bezier curves (kappa approximation)
fn circle_path(cx: f32, cy: f32, r: f32) -> String {
    let k = 0.5523 * r;
    format!(
        "{} {} m\n{} {} {} {} {} {} c\n{} {} {} {} {} {} c\n{} {} {} {} {} {} c\n{} {} {} {} {} {} c\n",
        fmt_num(cx + r),
        fmt_num(cy),
        fmt_num(cx + r),
        fmt_num(cy + k),
        fmt_num(cx + k),
        fmt_num(cy + r),
        fmt_num(cx),
        fmt_num(cy + r),
        fmt_num(cx - k),
        fmt_num(cy + r),
        fmt_num(cx - r),
        fmt_num(cy + k),
        fmt_num(cx - r),
        fmt_num(cy),
        fmt_num(cx - r),
        fmt_num(cy - k),
        fmt_num(cx - k),
        fmt_num(cy - r),
        fmt_num(cx),
        fmt_num(cy - r),
        fmt_num(cx + k),
        fmt_num(cy - r),
        fmt_num(cx + r),
        fmt_num(cy - k),
        fmt_num(cx + r),
        fmt_num(cy)
    )
}

/// Size of the appearance box as displayed, given the widget's user-space
/// size and the page rotation
pub fn display_size(user_width: f32, user_height: f32, rotation: u16) -> (f32, f32) {
    match rotation {
        90 | 270 => (user_height, user_width),
        _ => (user_width, user_height),
    }
}

/// Matrix turning content drawn upright into the page's unrotated space
fn rotation_matrix(rotation: u16, width: f32, height: f32) -> Option<Object> {
    let m: [f32; 6] = match rotation {
        90 => [0.0, 1.0, -1.0, 0.0, height, 0.0],
        180 => [-1.0, 0.0, 0.0, -1.0, width, height],
        270 => [0.0, -1.0, 1.0, 0.0, 0.0, width],
        _ => return None,
    };
    Some(Object::Array(m.iter().map(|v| real(*v)).collect()))
}

/// Add a form XObject holding `content` drawn in a `width` x `height`
/// display-oriented box
pub fn add_form_xobject(
    doc: &mut Document,
    content: String,
    width: f32,
    height: f32,
    rotation: u16,
    font: Option<ObjectId>,
) -> ObjectId {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "BBox" => vec![real(0.0), real(0.0), real(width), real(height)],
    };
    if let Some(matrix) = rotation_matrix(rotation, width, height) {
        dict.set("Matrix", matrix);
    }
    if let Some(font_id) = font {
        dict.set(
            "Resources",
            dictionary! {
                "Font" => dictionary! { FONT_NAME => Object::Reference(font_id) },
            },
        );
    }
    doc.add_object(Stream::new(dict, content.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::geometry::Rect;
    use crate::pdf::objects::text_string;

    fn style() -> AppearanceStyle {
        let field = FieldDescriptor::new("f", "f", FieldType::Text, 0, Rect::new(0.0, 0.0, 100.0, 20.0));
        AppearanceStyle::for_field(&field, 1.0)
    }

    #[test]
    fn test_default_appearance_string() {
        assert_eq!(style().default_appearance(), "/Helv 10 Tf 0 0 0 rg");
    }

    #[test]
    fn test_text_appearance_escapes_value() {
        let stream = style().text(100.0, 20.0, "a (b)");
        assert!(stream.contains("(a \\(b\\)) Tj"));
        assert!(stream.contains("/Helv 10 Tf"));
        assert!(stream.starts_with("0 0 0 RG"));
    }

    #[test]
    fn test_empty_text_is_frame_only() {
        let stream = style().text(100.0, 20.0, "");
        assert!(!stream.contains("BT"));
    }

    #[test]
    fn test_signature_border_is_dashed() {
        let field = FieldDescriptor::new("s", "s", FieldType::Signature, 0, Rect::new(0.0, 0.0, 200.0, 50.0));
        let stream = AppearanceStyle::for_field(&field, 1.0).checkbox_off(200.0, 50.0);
        assert!(stream.contains("[3] 0 d"));
    }

    #[test]
    fn test_radio_on_fills_circle() {
        let s = style();
        let on = s.radio_on(20.0, 20.0);
        let off = s.radio_off(20.0, 20.0);
        assert!(on.starts_with(&off));
        assert!(on.ends_with("f\n"));
        assert_eq!(on.matches(" c\n").count(), 8);
    }

    #[test]
    fn test_display_size_swaps_for_quarter_turns() {
        assert_eq!(display_size(20.0, 100.0, 90), (100.0, 20.0));
        assert_eq!(display_size(20.0, 100.0, 180), (20.0, 100.0));
        assert!(rotation_matrix(0, 1.0, 1.0).is_none());
        assert!(rotation_matrix(270, 1.0, 1.0).is_some());
    }

    #[test]
    fn test_style_from_widget() {
        let doc = Document::with_version("1.7");
        let widget = dictionary! {
            "DA" => text_string("/Helv 12 Tf 1 0 0 rg"),
            "MK" => dictionary! { "BC" => vec![Object::Integer(0)] },
        };
        let style = AppearanceStyle::from_widget(&doc, &widget);
        assert_eq!(style.font_size, 12.0);
        assert_eq!(style.text, Rgb(1.0, 0.0, 0.0));
        assert_eq!(style.border, Some(Rgb::BLACK));
        assert_eq!(style.background, None);
        assert!(!style.dashed);
    }
}
