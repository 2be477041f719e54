use lopdf::{Document as LoDocument, Object as LoObject};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveInspectErrorCode {
    PdfParseFailed,
    PdfIoError,
}

impl ArchiveInspectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveInspectErrorCode::PdfParseFailed => "PDF_PARSE_FAILED",
            ArchiveInspectErrorCode::PdfIoError => "PDF_IO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInspectError {
    pub code: ArchiveInspectErrorCode,
    pub message: String,
}

impl std::fmt::Display for ArchiveInspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ArchiveInspectError {}

/// PDF/A identification read back from the XMP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfaIdentification {
    pub part: i64,
    pub conformance: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputIntentSummary {
    pub subtype: String,
    pub registry_name: Option<String>,
}

/// Read-side report over an emitted document, used to check archival
/// conformance markers without re-opening the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub has_xmp_metadata: bool,
    pub pdfa_identification: Option<PdfaIdentification>,
    pub output_intents: Vec<OutputIntentSummary>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<ArchiveReport, ArchiveInspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| ArchiveInspectError {
        code: ArchiveInspectErrorCode::PdfParseFailed,
        message: err.to_string(),
    })?;

    let xmp = metadata_packet(&pdf);
    Ok(ArchiveReport {
        pdf_version: pdf.version.clone(),
        page_count: pdf.get_pages().len(),
        encrypted: pdf.is_encrypted(),
        has_xmp_metadata: xmp.as_deref().map(|packet| packet.contains("<?xpacket")).unwrap_or(false),
        pdfa_identification: xmp.as_deref().and_then(parse_pdfa_identification),
        output_intents: collect_output_intents(&pdf),
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<ArchiveReport, ArchiveInspectError> {
    let data = std::fs::read(path).map_err(|err| ArchiveInspectError {
        code: ArchiveInspectErrorCode::PdfIoError,
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

fn metadata_packet(pdf: &LoDocument) -> Option<String> {
    let metadata_id = pdf
        .catalog()
        .ok()?
        .get(b"Metadata")
        .and_then(LoObject::as_reference)
        .ok()?;
    let stream = pdf.get_object(metadata_id).ok()?.as_stream().ok()?;
    Some(String::from_utf8_lossy(&stream.content).to_string())
}

fn parse_pdfa_identification(packet: &str) -> Option<PdfaIdentification> {
    let part = tag_text(packet, "pdfaid:part")?.trim().parse::<i64>().ok()?;
    let conformance = tag_text(packet, "pdfaid:conformance")?.trim().to_string();
    Some(PdfaIdentification { part, conformance })
}

fn tag_text<'a>(packet: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = packet.find(&open)? + open.len();
    let end = packet[start..].find(&close)? + start;
    Some(&packet[start..end])
}

fn collect_output_intents(pdf: &LoDocument) -> Vec<OutputIntentSummary> {
    let Ok(catalog) = pdf.catalog() else {
        return Vec::new();
    };
    let Ok(intents) = catalog.get(b"OutputIntents").and_then(LoObject::as_array) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in intents {
        let dict = match entry {
            LoObject::Reference(id) => pdf.get_object(*id).ok().and_then(|o| o.as_dict().ok()),
            LoObject::Dictionary(dict) => Some(dict),
            _ => None,
        };
        let Some(dict) = dict else {
            continue;
        };
        let subtype = dict
            .get(b"S")
            .and_then(LoObject::as_name)
            .map(|name| String::from_utf8_lossy(name).to_string())
            .unwrap_or_default();
        let registry_name = dict.get(b"RegistryName").ok().and_then(|value| match value {
            LoObject::String(bytes, _) => Some(String::from_utf8_lossy(bytes).to_string()),
            _ => None,
        });
        out.push(OutputIntentSummary {
            subtype,
            registry_name,
        });
    }
    out
}
