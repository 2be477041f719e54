use crate::debug::{self, DebugLogger};
use crate::error::BinderyError;
use crate::types::Size;
use image::GenericImageView;
use lopdf::{
    Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream,
    dictionary,
};
use std::path::{Path, PathBuf};

/// Counters reported by one merge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    pub pages_written: usize,
    pub images_embedded: usize,
    pub documents_imported: usize,
    pub inputs_skipped: usize,
}

#[derive(Debug)]
pub(crate) struct MergeOutcome {
    pub document: LoDocument,
    pub summary: MergeSummary,
}

enum InputKind {
    Image,
    Pdf,
    Unsupported,
}

fn classify_input(path: &Path) -> InputKind {
    let Some(extension) = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
    else {
        return InputKind::Unsupported;
    };
    match extension.as_str() {
        "jpg" | "jpeg" | "png" => InputKind::Image,
        "pdf" => InputKind::Pdf,
        _ => InputKind::Unsupported,
    }
}

fn pdf_err(err: lopdf::Error) -> BinderyError {
    BinderyError::Pdf(format!("pdf merge error: {err}"))
}

/// Combines the inputs, in order, into one document: one page per image
/// input, followed by the pages of each PDF input in their internal order.
/// Unsupported file types are skipped with a warning; any I/O failure
/// aborts the whole merge.
pub(crate) fn merge_inputs(
    inputs: &[PathBuf],
    page_size: Size,
    debug: Option<&DebugLogger>,
) -> Result<MergeOutcome, BinderyError> {
    if inputs.is_empty() {
        return Err(BinderyError::EmptyInputSet);
    }

    let mut merged = LoDocument::with_version("1.4");
    let pages_id = merged.new_object_id();
    let mut kids: Vec<LoObjectId> = Vec::new();
    let mut summary = MergeSummary::default();

    for path in inputs {
        match classify_input(path) {
            InputKind::Image => {
                kids.push(add_image_page(&mut merged, pages_id, path, page_size)?);
                summary.images_embedded += 1;
            }
            InputKind::Pdf => {
                kids.extend(import_pdf_pages(&mut merged, pages_id, path)?);
                summary.documents_imported += 1;
            }
            InputKind::Unsupported => {
                debug::warn(
                    debug,
                    "merge",
                    &format!("unsupported input format, skipping: {}", path.display()),
                );
                summary.inputs_skipped += 1;
            }
        }
    }

    summary.pages_written = kids.len();
    merged.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.iter().map(|id| LoObject::Reference(*id)).collect::<Vec<_>>(),
            "Count" => kids.len() as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    if let Some(logger) = debug {
        logger.log_json(&format!(
            "{{\"type\":\"merge.summary\",\"pages\":{},\"images\":{},\"pdfs\":{},\"skipped\":{}}}",
            summary.pages_written,
            summary.images_embedded,
            summary.documents_imported,
            summary.inputs_skipped
        ));
    }

    Ok(MergeOutcome {
        document: merged,
        summary,
    })
}

struct DecodedImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    dct_passthrough: bool,
    data: Vec<u8>,
}

/// Decodes a raster input for embedding. JPEG bytes pass through untouched
/// as a DCT stream. Everything else becomes plain 8-bit RGB; alpha is
/// composited over white because PDF/A-1b cannot carry image soft masks.
fn decode_image(path: &Path) -> Result<DecodedImage, BinderyError> {
    let bytes = std::fs::read(path)?;
    let format = image::guess_format(&bytes)
        .map_err(|err| BinderyError::UnreadableImage(format!("{}: {err}", path.display())))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| BinderyError::UnreadableImage(format!("{}: {err}", path.display())))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(BinderyError::UnreadableImage(format!(
            "{}: image has zero extent",
            path.display()
        )));
    }

    if matches!(format, image::ImageFormat::Jpeg) {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "DeviceGray",
            _ => "DeviceRGB",
        };
        return Ok(DecodedImage {
            width,
            height,
            color_space,
            dct_passthrough: true,
            data: bytes,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a == 255 {
            rgb.extend_from_slice(&[r, g, b]);
        } else {
            let alpha = a as u16;
            let rest = 255 - alpha;
            rgb.push(((r as u16 * alpha + 255 * rest) / 255) as u8);
            rgb.push(((g as u16 * alpha + 255 * rest) / 255) as u8);
            rgb.push(((b as u16 * alpha + 255 * rest) / 255) as u8);
        }
    }
    Ok(DecodedImage {
        width,
        height,
        color_space: "DeviceRGB",
        dct_passthrough: false,
        data: rgb,
    })
}

/// Uniform scale with a 10% margin, centered on the page. Returns the
/// placed (width, height, x, y).
pub(crate) fn place_image(image_width: u32, image_height: u32, page: Size) -> (f32, f32, f32, f32) {
    let scale = (page.width / image_width as f32).min(page.height / image_height as f32) * 0.9;
    let width = image_width as f32 * scale;
    let height = image_height as f32 * scale;
    let x = (page.width - width) / 2.0;
    let y = (page.height - height) / 2.0;
    (width, height, x, y)
}

fn add_image_page(
    doc: &mut LoDocument,
    pages_id: LoObjectId,
    path: &Path,
    page_size: Size,
) -> Result<LoObjectId, BinderyError> {
    let image = decode_image(path)?;

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "ColorSpace" => image.color_space,
        "BitsPerComponent" => 8,
    };
    if image.dct_passthrough {
        dict.set("Filter", "DCTDecode");
    }
    // Raw RGB streams are picked up by the document-wide compress() pass.
    let image_id = doc.add_object(LoStream::new(dict, image.data));

    let (width, height, x, y) = place_image(image.width, image.height, page_size);
    let content = format!(
        "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /Im1 Do Q\n",
        width, height, x, y
    )
    .into_bytes();
    let content_id = doc.add_object(LoStream::new(dictionary! {}, content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        },
        "MediaBox" => vec![
            0.into(),
            0.into(),
            page_size.width.into(),
            page_size.height.into(),
        ],
    });
    Ok(page_id)
}

struct ImportedPageAttrs {
    media_box: Option<LoObject>,
    crop_box: Option<LoObject>,
    rotation: Option<LoObject>,
}

/// A page re-parented into a new page tree loses attributes it inherited
/// from its old /Pages chain, so the effective values are resolved against
/// the source document and written explicitly onto each imported page.
fn inherited_page_attr(doc: &LoDocument, page_id: LoObjectId, key: &[u8]) -> Option<LoObject> {
    let mut dict = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..64 {
        if let Ok(value) = dict.get(key) {
            let resolved = match value {
                LoObject::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            return Some(resolved.clone());
        }
        let parent_id = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_object(parent_id).ok()?.as_dict().ok()?;
    }
    None
}

fn import_pdf_pages(
    dst: &mut LoDocument,
    pages_id: LoObjectId,
    path: &Path,
) -> Result<Vec<LoObjectId>, BinderyError> {
    let bytes = std::fs::read(path)?;
    let mut src = LoDocument::load_mem(&bytes).map_err(pdf_err)?;
    if src.is_encrypted() {
        return Err(BinderyError::Pdf(format!(
            "encrypted pdf input is not supported: {}",
            path.display()
        )));
    }

    let src_pages: Vec<LoObjectId> = src.get_pages().values().copied().collect();
    let attrs: Vec<ImportedPageAttrs> = src_pages
        .iter()
        .map(|&page_id| ImportedPageAttrs {
            media_box: inherited_page_attr(&src, page_id, b"MediaBox"),
            crop_box: inherited_page_attr(&src, page_id, b"CropBox"),
            rotation: inherited_page_attr(&src, page_id, b"Rotate"),
        })
        .collect();

    let start_id = dst.max_id + 1;
    src.renumber_objects_with(start_id);
    let moved_pages: Vec<LoObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);

    for (page_id, attrs) in moved_pages.iter().zip(attrs) {
        let page = dst
            .get_object_mut(*page_id)
            .and_then(LoObject::as_dict_mut)
            .map_err(pdf_err)?;
        page.set("Parent", LoObject::Reference(pages_id));
        if let Some(media_box) = attrs.media_box {
            page.set("MediaBox", media_box);
        }
        // An absent CropBox defaults to the media box, so only explicit
        // ones are carried over.
        if let Some(crop_box) = attrs.crop_box {
            page.set("CropBox", crop_box);
        }
        if let Some(rotation) = attrs.rotation {
            page.set("Rotate", rotation);
        }
    }

    Ok(moved_pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use std::io::Write;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bindery_merge_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn make_jpeg(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([180, 40, 40]));
        image::DynamicImage::ImageRgb8(img)
            .save_with_format(path, image::ImageFormat::Jpeg)
            .expect("jpeg");
    }

    fn make_png_with_alpha(path: &Path, width: u32, height: u32) {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 255, 128]));
        image::DynamicImage::ImageRgba8(img)
            .save_with_format(path, image::ImageFormat::Png)
            .expect("png");
    }

    fn make_pdf(path: &Path, page_count: usize) {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<LoObject> = Vec::new();
        for i in 0..page_count {
            let content = format!("BT ({}) Tj ET", i).into_bytes();
            let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).expect("save");
    }

    // Pages inherit MediaBox from their tree and carry their own CropBox
    // and rotation, which must survive the re-parenting.
    fn make_pdf_with_inherited_geometry(path: &Path) {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(LoStream::new(dictionary! {}, b"q Q\n".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "CropBox" => vec![10.into(), 10.into(), 290.into(), 390.into()],
            "Rotate" => 90,
        });
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).expect("save");
    }

    #[test]
    fn place_image_scales_to_ninety_percent_and_centers() {
        let (width, height, x, y) = place_image(100, 50, Size::A4);
        assert!((width - Size::A4.width * 0.9).abs() < 0.001);
        assert!((height - width / 2.0).abs() < 0.001);
        assert!((x - (Size::A4.width - width) / 2.0).abs() < 0.001);
        assert!((y - (Size::A4.height - height) / 2.0).abs() < 0.001);
    }

    #[test]
    fn place_image_limits_tall_images_by_height() {
        let (width, height, _, _) = place_image(50, 1000, Size::A4);
        assert!((height - Size::A4.height * 0.9).abs() < 0.001);
        assert!(width <= Size::A4.width * 0.9);
    }

    #[test]
    fn merges_images_and_pdfs_in_input_order() {
        let dir = temp_dir("order");
        let jpeg = dir.join("first.jpg");
        let pdf = dir.join("second.pdf");
        let png = dir.join("third.png");
        make_jpeg(&jpeg, 64, 32);
        make_pdf(&pdf, 2);
        make_png_with_alpha(&png, 16, 16);

        let outcome =
            merge_inputs(&[jpeg, pdf, png], Size::A4, None).expect("merge");
        assert_eq!(outcome.summary.pages_written, 4);
        assert_eq!(outcome.summary.images_embedded, 2);
        assert_eq!(outcome.summary.documents_imported, 1);
        assert_eq!(outcome.summary.inputs_skipped, 0);

        let pages: Vec<LoObjectId> = outcome.document.get_pages().values().copied().collect();
        assert_eq!(pages.len(), 4);
        let first = outcome
            .document
            .get_page_content(pages[0])
            .expect("content");
        assert!(String::from_utf8_lossy(&first).contains("/Im1 Do"));
        let last = outcome
            .document
            .get_page_content(pages[3])
            .expect("content");
        assert!(String::from_utf8_lossy(&last).contains("/Im1 Do"));
    }

    #[test]
    fn image_page_content_is_scaled_and_centered() {
        let dir = temp_dir("scale");
        let jpeg = dir.join("photo.jpg");
        make_jpeg(&jpeg, 100, 50);

        let outcome = merge_inputs(&[jpeg], Size::A4, None).expect("merge");
        let pages: Vec<LoObjectId> = outcome.document.get_pages().values().copied().collect();
        let content = outcome
            .document
            .get_page_content(pages[0])
            .expect("content");
        let (width, height, x, y) = place_image(100, 50, Size::A4);
        let expected = format!(
            "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /Im1 Do Q\n",
            width, height, x, y
        );
        assert_eq!(String::from_utf8_lossy(&content), expected);
    }

    #[test]
    fn jpeg_is_embedded_as_dct_stream() {
        let dir = temp_dir("dct");
        let jpeg = dir.join("photo.jpg");
        make_jpeg(&jpeg, 32, 32);

        let outcome = merge_inputs(&[jpeg], Size::A4, None).expect("merge");
        let dct_streams = outcome
            .document
            .objects
            .values()
            .filter_map(|object| object.as_stream().ok())
            .filter(|stream| {
                stream
                    .dict
                    .get(b"Filter")
                    .and_then(LoObject::as_name)
                    .map(|name| name == b"DCTDecode")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(dct_streams, 1);
    }

    #[test]
    fn png_alpha_is_flattened_without_soft_mask() {
        let dir = temp_dir("png");
        let png = dir.join("mark.png");
        make_png_with_alpha(&png, 8, 8);

        let outcome = merge_inputs(&[png], Size::A4, None).expect("merge");
        for object in outcome.document.objects.values() {
            if let Ok(stream) = object.as_stream() {
                assert!(!stream.dict.has(b"SMask"));
            }
        }
        // 50% blue over white: every pixel flattens to the same mix.
        let image = outcome
            .document
            .objects
            .values()
            .filter_map(|object| object.as_stream().ok())
            .find(|stream| {
                stream
                    .dict
                    .get(b"Subtype")
                    .and_then(LoObject::as_name)
                    .map(|name| name == b"Image")
                    .unwrap_or(false)
            })
            .expect("image stream");
        assert_eq!(image.content.len(), 8 * 8 * 3);
        assert_eq!(&image.content[0..3], &[127, 127, 255]);
    }

    #[test]
    fn unsupported_inputs_are_skipped_with_a_warning() {
        let dir = temp_dir("skip");
        let jpeg = dir.join("photo.jpg");
        let note = dir.join("readme.txt");
        make_jpeg(&jpeg, 16, 16);
        let mut file = std::fs::File::create(&note).expect("create");
        file.write_all(b"not a document").expect("write");

        let outcome = merge_inputs(&[jpeg, note], Size::A4, None).expect("merge");
        assert_eq!(outcome.summary.pages_written, 1);
        assert_eq!(outcome.summary.inputs_skipped, 1);
    }

    #[test]
    fn imported_pages_keep_boxes_and_rotation() {
        let dir = temp_dir("geometry");
        let pdf = dir.join("rotated.pdf");
        make_pdf_with_inherited_geometry(&pdf);

        let outcome = merge_inputs(&[pdf], Size::A4, None).expect("merge");
        let pages: Vec<LoObjectId> = outcome.document.get_pages().values().copied().collect();
        let page = outcome
            .document
            .get_object(pages[0])
            .expect("page")
            .as_dict()
            .expect("dict");

        let media_box = page
            .get(b"MediaBox")
            .and_then(LoObject::as_array)
            .expect("media box");
        assert_eq!(media_box[2].as_i64().expect("i64"), 300);
        assert_eq!(media_box[3].as_i64().expect("i64"), 400);
        assert!(page.has(b"CropBox"));
        assert_eq!(
            page.get(b"Rotate").expect("rotate").as_i64().expect("i64"),
            90
        );
    }

    #[test]
    fn missing_input_aborts_the_merge() {
        let dir = temp_dir("missing");
        let gone = dir.join("gone.jpg");
        let err = merge_inputs(&[gone], Size::A4, None).expect_err("must fail");
        assert!(matches!(err, BinderyError::Io(_)));
    }

    #[test]
    fn corrupt_pdf_aborts_the_merge() {
        let dir = temp_dir("corrupt");
        let bad = dir.join("bad.pdf");
        let mut file = std::fs::File::create(&bad).expect("create");
        file.write_all(b"this is not a pdf").expect("write");

        let err = merge_inputs(&[bad], Size::A4, None).expect_err("must fail");
        assert!(matches!(err, BinderyError::Pdf(_)));
    }

    #[test]
    fn empty_input_list_is_rejected() {
        let err = merge_inputs(&[], Size::A4, None).expect_err("must fail");
        assert!(matches!(err, BinderyError::EmptyInputSet));
    }

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        assert!(matches!(
            classify_input(Path::new("scan.JPG")),
            InputKind::Image
        ));
        assert!(matches!(
            classify_input(Path::new("scan.Jpeg")),
            InputKind::Image
        ));
        assert!(matches!(
            classify_input(Path::new("doc.PDF")),
            InputKind::Pdf
        ));
        assert!(matches!(
            classify_input(Path::new("notes.txt")),
            InputKind::Unsupported
        ));
        assert!(matches!(
            classify_input(Path::new("no_extension")),
            InputKind::Unsupported
        ));
    }
}
