//! Signature stamp embedding.
//!
//! Takes the original PDF bytes and the signed signers' PNG artefacts and
//! produces the finalized document: each PNG becomes an image XObject (with a
//! soft mask when the PNG carries alpha) drawn at the signer's recorded
//! coordinates, or stacked centered on the last page when no coordinates were
//! recorded. Pages are 1-indexed and coordinates use the PDF convention of an
//! origin at the bottom-left.
//!
//! Undecodable artefacts are logged and skipped; finalization applies the
//! remaining stamps rather than aborting.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;
use thiserror::Error;
use tracing::warn;

/// Stamp width in PDF points.
pub const STAMP_WIDTH: f32 = 180.0;
/// Stamp height in PDF points.
pub const STAMP_HEIGHT: f32 = 65.0;

const FALLBACK_BASE_Y: f32 = 30.0;
const FALLBACK_STEP_Y: f32 = 75.0;
const FALLBACK_PAGE_WIDTH: f32 = 612.0;

/// Error type for stamping.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("document has no pages")]
    NoPages,
    #[error("stream encoding failed: {0}")]
    Encode(#[from] std::io::Error),
}

/// Recorded placement for one signature stamp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StampPlacement {
    /// 1-indexed page number.
    pub page: u32,
    pub x: f32,
    pub y: f32,
}

/// One signature artefact to embed.
#[derive(Clone, Debug)]
pub struct SignatureStamp {
    pub image_png: Vec<u8>,
    /// Stamps without a placement stack on the last page.
    pub placement: Option<StampPlacement>,
}

/// Embed the given stamps into the PDF and return the finalized bytes.
pub fn stamp_signatures(pdf: &[u8], stamps: &[SignatureStamp]) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::load_mem(pdf)?;
    let pages = doc.get_pages();
    let Some(&last_page) = pages.keys().max() else {
        return Err(PdfError::NoPages);
    };

    let mut stacked = 0u32;
    for (index, stamp) in stamps.iter().enumerate() {
        let Some(image_id) = add_png_xobject(&mut doc, &stamp.image_png)? else {
            continue;
        };

        let (page_no, x, y) = match stamp.placement {
            Some(p) => (p.page.clamp(1, last_page), p.x, p.y),
            None => {
                let width = page_width(&doc, pages[&last_page]);
                let y = FALLBACK_BASE_Y + FALLBACK_STEP_Y * stacked as f32;
                stacked += 1;
                (last_page, (width - STAMP_WIDTH) / 2.0, y)
            }
        };

        let page_id = pages[&page_no];
        let name = format!("SeloSig{}", index);
        doc.add_xobject(page_id, name.clone(), image_id)?;
        doc.add_to_page_content(page_id, draw_ops(&name, x, y))?;
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// `q / cm / Do / Q` drawing the named XObject at (x, y), stamp-sized.
/// Coordinates are rounded to whole points.
fn draw_ops(name: &str, x: f32, y: f32) -> Content {
    let n = |v: f32| Object::Integer(v.round() as i64);
    Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    n(STAMP_WIDTH),
                    n(0.0),
                    n(0.0),
                    n(STAMP_HEIGHT),
                    n(x),
                    n(y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    }
}

/// Decode a PNG and register it as an image XObject, returning its id.
/// Returns `None` (after logging) when the bytes are not a decodable PNG.
fn add_png_xobject(doc: &mut Document, png: &[u8]) -> Result<Option<ObjectId>, PdfError> {
    let decoded = match image::load_from_memory_with_format(png, ImageFormat::Png) {
        Ok(img) => img,
        Err(err) => {
            warn!(error = %err, "skipping undecodable signature artefact");
            return Ok(None);
        }
    };

    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    let mut translucent = false;
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
        if pixel.0[3] != u8::MAX {
            translucent = true;
        }
    }

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if translucent {
        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        let smask_id = doc.add_object(smask);
        dict.set("SMask", Object::Reference(smask_id));
    }

    let stream = Stream::new(dict, deflate(&rgb)?);
    Ok(Some(doc.add_object(stream)))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Effective page width from the page's (possibly inherited) MediaBox.
fn page_width(doc: &Document, page_id: ObjectId) -> f32 {
    let mut current = page_id;
    // Parent chains are shallow; bail out rather than loop on a cycle.
    for _ in 0..16 {
        let Ok(dict) = doc.get_object(current).and_then(Object::as_dict) else {
            break;
        };
        if let Ok(media_box) = dict.get(b"MediaBox") {
            let resolved = match media_box {
                Object::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
            if let Some(bounds) = resolved.and_then(|o| o.as_array().ok()) {
                if bounds.len() == 4 {
                    if let (Some(x0), Some(x1)) = (number(&bounds[0]), number(&bounds[2])) {
                        return x1 - x0;
                    }
                }
            }
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => break,
        }
    }
    FALLBACK_PAGE_WIDTH
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Minimal n-page PDF with US Letter pages.
    fn test_pdf(page_count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for _ in 0..page_count {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn test_png(opaque: bool) -> Vec<u8> {
        let alpha = if opaque { 255 } else { 128 };
        let img = image::RgbaImage::from_pixel(8, 4, image::Rgba([20, 40, 60, alpha]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn page_content(pdf: &[u8], page_no: u32) -> Vec<u8> {
        let doc = Document::load_mem(pdf).unwrap();
        let pages = doc.get_pages();
        doc.get_page_content(pages[&page_no]).unwrap()
    }

    fn count_draws(content: &[u8]) -> usize {
        String::from_utf8_lossy(content).matches(" Do").count()
    }

    #[test]
    fn test_stamp_on_recorded_page() {
        let pdf = test_pdf(3);
        let stamped = stamp_signatures(
            &pdf,
            &[SignatureStamp {
                image_png: test_png(true),
                placement: Some(StampPlacement {
                    page: 2,
                    x: 100.0,
                    y: 200.0,
                }),
            }],
        )
        .unwrap();

        assert_ne!(stamped, pdf);
        assert_eq!(count_draws(&page_content(&stamped, 2)), 1);
        assert_eq!(count_draws(&page_content(&stamped, 1)), 0);
        assert_eq!(count_draws(&page_content(&stamped, 3)), 0);

        let content = page_content(&stamped, 2);
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("180 0 0 65 100 200 cm"), "content: {}", text);
    }

    #[test]
    fn test_unplaced_stamps_stack_centered_on_last_page() {
        let pdf = test_pdf(2);
        let stamped = stamp_signatures(
            &pdf,
            &[
                SignatureStamp {
                    image_png: test_png(true),
                    placement: None,
                },
                SignatureStamp {
                    image_png: test_png(true),
                    placement: None,
                },
            ],
        )
        .unwrap();

        let content = page_content(&stamped, 2);
        assert_eq!(count_draws(&content), 2);
        let text = String::from_utf8_lossy(&content);
        // (612 - 180) / 2 = 216; second stamp offset by 75
        assert!(text.contains("216 30 cm"), "content: {}", text);
        assert!(text.contains("216 105 cm"), "content: {}", text);
        assert_eq!(count_draws(&page_content(&stamped, 1)), 0);
    }

    #[test]
    fn test_out_of_range_page_clamps_to_last() {
        let pdf = test_pdf(2);
        let stamped = stamp_signatures(
            &pdf,
            &[SignatureStamp {
                image_png: test_png(true),
                placement: Some(StampPlacement {
                    page: 9,
                    x: 10.0,
                    y: 10.0,
                }),
            }],
        )
        .unwrap();

        assert_eq!(count_draws(&page_content(&stamped, 2)), 1);
    }

    #[test]
    fn test_undecodable_artefact_is_skipped() {
        let pdf = test_pdf(1);
        let stamped = stamp_signatures(
            &pdf,
            &[
                SignatureStamp {
                    image_png: b"not a png".to_vec(),
                    placement: None,
                },
                SignatureStamp {
                    image_png: test_png(true),
                    placement: None,
                },
            ],
        )
        .unwrap();

        // Still a valid document, with only the decodable stamp applied.
        assert_eq!(count_draws(&page_content(&stamped, 1)), 1);
    }

    #[test]
    fn test_translucent_png_gets_soft_mask() {
        let pdf = test_pdf(1);
        let stamped = stamp_signatures(
            &pdf,
            &[SignatureStamp {
                image_png: test_png(false),
                placement: None,
            }],
        )
        .unwrap();

        let doc = Document::load_mem(&stamped).unwrap();
        let has_smask = doc
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .any(|s| s.dict.has(b"SMask"));
        assert!(has_smask);
    }

    #[test]
    fn test_garbage_input_is_a_parse_error() {
        assert!(matches!(
            stamp_signatures(b"not a pdf", &[]),
            Err(PdfError::Parse(_))
        ));
    }

    #[test]
    fn test_no_stamps_still_roundtrips() {
        let pdf = test_pdf(1);
        let stamped = stamp_signatures(&pdf, &[]).unwrap();
        assert!(Document::load_mem(&stamped).is_ok());
    }
}
