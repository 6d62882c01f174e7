//! Fixture builders shared by the unit tests.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// RGB gradient used as a repeated logo
pub(crate) fn logo_samples(size: u32) -> Vec<u8> {
    let mut samples = Vec::with_capacity((size * size * 3) as usize);
    for y in 0..size {
        for x in 0..size {
            samples.extend_from_slice(&[(x * 15) as u8, (y * 15) as u8, 128]);
        }
    }
    samples
}

pub(crate) fn image_xobject(doc: &mut Document, size: u32, alt: Option<&str>) -> ObjectId {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => size as i64,
        "Height" => size as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };
    if let Some(alt) = alt {
        dict.set("Alt", Object::string_literal(alt));
    }
    doc.add_object(Stream::new(dict, logo_samples(size)))
}

/// Build a PDF where each page has text and draws the listed XObjects.
pub(crate) fn create_pdf(pages: &[(&str, Vec<(&str, ObjectId)>)], doc: &mut Document) -> Vec<u8> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut page_ids = Vec::new();
    for (text, xobjects) in pages {
        let mut content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", escape(text));
        let mut xobject_dict = lopdf::Dictionary::new();
        for (name, id) in xobjects {
            content.push_str(&format!(" q 32 0 0 32 100 500 cm /{} Do Q", name));
            xobject_dict.set(name.as_bytes().to_vec(), *id);
        }
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => xobject_dict,
        });

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(pages.len() as i64),
    });

    for page_id in &page_ids {
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
            dict.set("Parent", pages_id);
        }
    }

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}
