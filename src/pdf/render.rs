//! Page rendering with PDFium, with an optional field overlay

use crate::error::{Error, Result};
use crate::form::field::{FieldType, FormSchema};
use crate::form::geometry::Rect;
use base64::Engine;
use image::{DynamicImage, Rgba, RgbaImage};
use pdfium_render::prelude::*;
use serde::Serialize;

/// Rendered bitmaps larger than this many pixels are refused
pub const MAX_RENDER_PIXELS: u64 = 40_000_000;

const OUTLINE_WIDTH: u32 = 2;

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

fn map_pdfium_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        _ => Error::Pdfium {
            reason: format!("{}", err),
        },
    }
}

/// Rendered page image data
#[derive(Debug, Clone, Serialize)]
pub struct RenderedPage {
    /// 0-based page index
    pub page_index: u32,
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Pixels per page point actually used
    pub scale: f32,
    /// Base64-encoded PNG image data
    #[serde(skip_serializing)]
    pub data_base64: String,
    pub mime_type: String,
    /// Number of field outlines drawn
    pub fields_drawn: u32,
}

/// Render one page at `scale` pixels per point.
///
/// Pages whose canvas would exceed `max_pixels` are refused before any
/// bitmap is allocated. With `overlay`, every field of the schema on this
/// page is outlined at its canvas position.
pub fn render_page(
    data: &[u8],
    password: Option<&str>,
    page_index: u32,
    scale: f32,
    max_pixels: u64,
    overlay: Option<&FormSchema>,
) -> Result<RenderedPage> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidScale { scale });
    }

    let pdfium = create_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(data, password)
        .map_err(map_pdfium_error)?;

    let pages = document.pages();
    let total = pages.len() as u32;
    if page_index >= total {
        return Err(Error::PageOutOfBounds {
            page: page_index,
            total,
        });
    }

    let page = pages.get(page_index as u16).map_err(|e| Error::Pdfium {
        reason: format!("Failed to get page {}: {}", page_index, e),
    })?;

    let view_width = page.width().value;
    let view_height = page.height().value;
    check_canvas_size(view_width, view_height, scale, max_pixels)?;

    let config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .render_form_data(true)
        .render_annotations(true);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to render page {}: {}", page_index, e),
        })?;

    let mut canvas = bitmap.as_image().to_rgba8();
    let effective_scale = if view_width > 0.0 {
        canvas.width() as f32 / view_width
    } else {
        scale
    };

    let mut fields_drawn = 0;
    if let Some(schema) = overlay {
        for field in schema.fields_on_page(page_index) {
            let rect = field.rect().scaled(effective_scale);
            draw_outline(&mut canvas, &rect, overlay_color(field.field_type));
            fields_drawn += 1;
        }
    }

    let (width, height) = canvas.dimensions();
    let mut png_bytes = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to encode page {} as PNG: {}", page_index, e),
        })?;

    Ok(RenderedPage {
        page_index,
        width,
        height,
        scale: effective_scale,
        data_base64: base64::engine::general_purpose::STANDARD.encode(&png_bytes),
        mime_type: "image/png".to_string(),
        fields_drawn,
    })
}

/// Outline color per field kind
fn overlay_color(field_type: FieldType) -> Rgba<u8> {
    match field_type {
        FieldType::Text => Rgba([33, 150, 243, 255]),
        FieldType::Checkbox => Rgba([76, 175, 80, 255]),
        FieldType::Radiobutton => Rgba([0, 150, 136, 255]),
        FieldType::Signature => Rgba([156, 39, 176, 255]),
        FieldType::Date => Rgba([255, 152, 0, 255]),
        FieldType::Number => Rgba([121, 85, 72, 255]),
        FieldType::Combobox | FieldType::Listbox => Rgba([233, 30, 99, 255]),
    }
}

/// Stroke the inside edge of `rect`, clipped to the canvas
fn draw_outline(canvas: &mut RgbaImage, rect: &Rect, color: Rgba<u8>) {
    let (cw, ch) = canvas.dimensions();
    if cw == 0 || ch == 0 || !rect.is_finite() {
        return;
    }
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(cw - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(ch - 1);

    let (x0, x1) = (clamp_x(rect.x), clamp_x(rect.right()));
    let (y0, y1) = (clamp_y(rect.y), clamp_y(rect.bottom()));
    if rect.right() < 0.0 || rect.bottom() < 0.0 || rect.x >= cw as f32 || rect.y >= ch as f32 {
        return;
    }

    for t in 0..OUTLINE_WIDTH {
        for x in x0..=x1 {
            canvas.put_pixel(x, y0.saturating_add(t).min(y1), color);
            canvas.put_pixel(x, y1.saturating_sub(t).max(y0), color);
        }
        for y in y0..=y1 {
            canvas.put_pixel(x0.saturating_add(t).min(x1), y, color);
            canvas.put_pixel(x1.saturating_sub(t).max(x0), y, color);
        }
    }
}

/// Pixel dimensions of a page canvas, refused when the area exceeds
/// `max_pixels`
fn check_canvas_size(
    view_width: f32,
    view_height: f32,
    scale: f32,
    max_pixels: u64,
) -> Result<(u64, u64)> {
    let width = (view_width * scale).ceil() as u64;
    let height = (view_height * scale).ceil() as u64;
    if width.saturating_mul(height) > max_pixels {
        return Err(Error::ImageDimensionExceeded {
            detail: format!(
                "{}x{} pixels exceeds the {} pixel limit",
                width, height, max_pixels
            ),
        });
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_outline_marks_edges_only() {
        let mut canvas = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
        let red = Rgba([255, 0, 0, 255]);
        draw_outline(&mut canvas, &Rect::new(5.0, 5.0, 10.0, 10.0), red);
        assert_eq!(*canvas.get_pixel(5, 5), red);
        assert_eq!(*canvas.get_pixel(15, 10), red);
        assert_eq!(*canvas.get_pixel(6, 10), red);
        assert_eq!(*canvas.get_pixel(10, 10), Rgba([255, 255, 255, 255]));
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_draw_outline_clips_to_canvas() {
        let mut canvas = RgbaImage::new(10, 10);
        let blue = Rgba([0, 0, 255, 255]);
        draw_outline(&mut canvas, &Rect::new(-5.0, -5.0, 100.0, 100.0), blue);
        assert_eq!(*canvas.get_pixel(0, 0), blue);
        assert_eq!(*canvas.get_pixel(9, 9), blue);
        draw_outline(&mut canvas, &Rect::new(50.0, 50.0, 5.0, 5.0), Rgba([1, 1, 1, 255]));
        assert_eq!(*canvas.get_pixel(9, 9), blue);
    }

    #[test]
    fn test_overlay_colors_are_distinct_for_buttons() {
        assert_ne!(
            overlay_color(FieldType::Checkbox),
            overlay_color(FieldType::Radiobutton)
        );
    }

    #[test]
    fn test_canvas_size_limit() {
        assert_eq!(check_canvas_size(612.0, 792.0, 1.5, MAX_RENDER_PIXELS).unwrap(), (918, 1188));
        assert!(matches!(
            check_canvas_size(612.0, 792.0, 2.0, 1_000_000),
            Err(Error::ImageDimensionExceeded { .. })
        ));
        assert!(check_canvas_size(612.0, 792.0, 1.0, 612 * 792).is_ok());
    }

    #[test]
    fn test_render_rejects_bad_input() {
        assert!(matches!(
            render_page(b"nope", None, 0, 1.0, MAX_RENDER_PIXELS, None),
            Err(Error::InvalidPdf { .. })
        ));
        assert!(matches!(
            render_page(b"%PDF-1.7", None, 0, 0.0, MAX_RENDER_PIXELS, None),
            Err(Error::InvalidScale { .. })
        ));
    }
}
