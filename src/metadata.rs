use crate::debug::{self, DebugLogger};
use crate::error::BinderyError;
use chrono::{DateTime, SecondsFormat, Utc};
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, Stream as LoStream,
    StringFormat, dictionary,
};
use std::io::{self, Write};

/// PDF/A identification carried in the XMP packet.
pub const PDFA_PART: i64 = 1;
pub const PDFA_CONFORMANCE: &str = "B";

/// Document description written to both the XMP packet and the /Info
/// dictionary.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub title: String,
    pub creator_tool: String,
    pub producer: String,
    pub created: DateTime<Utc>,
}

impl DocumentMetadata {
    pub fn new(
        title: impl Into<String>,
        creator_tool: impl Into<String>,
        producer: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            creator_tool: creator_tool.into(),
            producer: producer.into(),
            created: Utc::now(),
        }
    }

    /// Field validation mirrors the identification schema rules: every
    /// descriptive field must be a non-empty string without control
    /// characters, and the conformance level must be A or B.
    fn validate(&self) -> Result<(), BinderyError> {
        if !matches!(PDFA_CONFORMANCE, "A" | "B") {
            return Err(BinderyError::Metadata(format!(
                "invalid conformance level: {}",
                PDFA_CONFORMANCE
            )));
        }
        for (field, value) in [
            ("title", &self.title),
            ("creator tool", &self.creator_tool),
            ("producer", &self.producer),
        ] {
            if value.trim().is_empty() {
                return Err(BinderyError::Metadata(format!(
                    "{field} must not be empty"
                )));
            }
            if value.chars().any(|ch| ch.is_control()) {
                return Err(BinderyError::Metadata(format!(
                    "{field} contains control characters"
                )));
            }
        }
        Ok(())
    }
}

/// Builds the XMP packet: PDF/A identification, Dublin Core, XMP Basic and
/// Adobe PDF blocks. Field validation failures are hard errors and abort
/// the conversion before anything is written.
pub(crate) fn build_xmp(meta: &DocumentMetadata) -> Result<String, BinderyError> {
    meta.validate()?;

    let mut out = String::new();
    out.push_str(r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>"#);
    out.push_str("\n<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    out.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");

    out.push_str(
        "<rdf:Description rdf:about=\"\" xmlns:pdfaid=\"http://www.aiim.org/pdfa/ns/id/\">",
    );
    out.push_str(&format!("<pdfaid:part>{}</pdfaid:part>", PDFA_PART));
    out.push_str(&format!(
        "<pdfaid:conformance>{}</pdfaid:conformance>",
        PDFA_CONFORMANCE
    ));
    out.push_str("</rdf:Description>\n");

    out.push_str("<rdf:Description rdf:about=\"\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\">");
    out.push_str("<dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">");
    out.push_str(&escape_xml_text(&meta.title));
    out.push_str("</rdf:li></rdf:Alt></dc:title></rdf:Description>\n");

    out.push_str("<rdf:Description rdf:about=\"\" xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\">");
    out.push_str(&format!(
        "<xmp:CreatorTool>{}</xmp:CreatorTool>",
        escape_xml_text(&meta.creator_tool)
    ));
    out.push_str(&format!(
        "<xmp:CreateDate>{}</xmp:CreateDate>",
        meta.created.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str("</rdf:Description>\n");

    out.push_str("<rdf:Description rdf:about=\"\" xmlns:pdf=\"http://ns.adobe.com/pdf/1.3/\">");
    out.push_str(&format!(
        "<pdf:Producer>{}</pdf:Producer>",
        escape_xml_text(&meta.producer)
    ));
    out.push_str("</rdf:Description>\n");

    out.push_str("</rdf:RDF>\n</x:xmpmeta>\n");
    out.push_str("<?xpacket end=\"w\"?>");
    Ok(out)
}

/// Serializes the packet into the byte buffer attached to the document.
/// Kept separate from packet construction: a failure here is tolerated.
pub(crate) fn serialize_xmp(xml: &str) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(xml.len());
    buffer.write_all(xml.as_bytes())?;
    Ok(buffer)
}

/// Attaches the XMP metadata stream to the catalog and mirrors the
/// descriptive fields into the /Info dictionary.
///
/// Field validation failures abort; a serialization failure is logged and
/// the conversion continues with an empty packet.
pub(crate) fn attach_document_metadata(
    doc: &mut LoDocument,
    meta: &DocumentMetadata,
    debug: Option<&DebugLogger>,
) -> Result<(), BinderyError> {
    let xml = build_xmp(meta)?;
    let packet = match serialize_xmp(&xml) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug::warn(
                debug,
                "metadata",
                &format!("xmp serialization failed, embedding empty packet: {err}"),
            );
            Vec::new()
        }
    };

    // PDF/A-1 wants the packet plainly readable, so the stream opts out of
    // the document-wide compression pass.
    let stream = LoStream::new(
        dictionary! {
            "Type" => "Metadata",
            "Subtype" => "XML",
        },
        packet,
    )
    .with_compression(false);
    let metadata_id = doc.add_object(stream);
    catalog_dict_mut(doc)?.set("Metadata", LoObject::Reference(metadata_id));

    let info_id = doc.add_object(dictionary! {
        "Title" => LoObject::String(meta.title.clone().into_bytes(), StringFormat::Literal),
        "Creator" => LoObject::String(meta.creator_tool.clone().into_bytes(), StringFormat::Literal),
        "Producer" => LoObject::String(meta.producer.clone().into_bytes(), StringFormat::Literal),
        "CreationDate" => LoObject::String(
            meta.created.format("D:%Y%m%d%H%M%SZ").to_string().into_bytes(),
            StringFormat::Literal,
        ),
    });
    doc.trailer.set("Info", info_id);
    Ok(())
}

pub(crate) fn catalog_dict_mut(doc: &mut LoDocument) -> Result<&mut LoDictionary, BinderyError> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(LoObject::as_reference)
        .map_err(|err| BinderyError::Pdf(format!("document has no catalog: {err}")))?;
    doc.get_object_mut(catalog_id)
        .and_then(LoObject::as_dict_mut)
        .map_err(|err| BinderyError::Pdf(format!("document has no catalog: {err}")))
}

fn escape_xml_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
