mod debug;
mod error;
mod fixup;
mod inspect;
mod intent;
mod merge;
mod metadata;
mod types;

pub use error::BinderyError;
pub use fixup::FixupSummary;
pub use inspect::{
    ArchiveInspectError, ArchiveInspectErrorCode, ArchiveReport, OutputIntentSummary,
    PdfaIdentification, inspect_pdf_bytes, inspect_pdf_path,
};
pub use intent::{COLOR_REGISTRY, OutputIntent, SRGB_IDENTIFIER};
pub use merge::MergeSummary;
pub use metadata::{DocumentMetadata, PDFA_CONFORMANCE, PDFA_PART};
pub use types::Size;

use debug::DebugLogger;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PRODUCER: &str = "bindery";
pub const DEFAULT_TITLE: &str = "PDF/A-1b document";

/// Counters for one whole conversion: merge, fixup and output together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSummary {
    pub pages_written: usize,
    pub images_embedded: usize,
    pub documents_imported: usize,
    pub inputs_skipped: usize,
    pub transparency_groups_stripped: usize,
    pub soft_masks_removed: usize,
    pub alpha_states_reset: usize,
}

/// PDF/A-1b conversion engine.
///
/// Merges an ordered list of JPEG/PNG/PDF inputs into one document, strips
/// the transparency constructs PDF/A-1b forbids, embeds XMP metadata and an
/// sRGB output intent, and saves the result. One call owns its document
/// exclusively; the engine itself is reusable.
pub struct Bindery {
    page_size: Size,
    title: String,
    creator_tool: String,
    producer: String,
    output_intent: OutputIntent,
    debug: Option<Arc<DebugLogger>>,
}

#[derive(Clone)]
pub struct BinderyBuilder {
    page_size: Size,
    title: String,
    creator_tool: String,
    producer: String,
    output_intent: OutputIntent,
    debug_path: Option<PathBuf>,
}

impl BinderyBuilder {
    pub fn new() -> Self {
        Self {
            page_size: Size::A4,
            title: DEFAULT_TITLE.to_string(),
            creator_tool: PRODUCER.to_string(),
            producer: PRODUCER.to_string(),
            output_intent: OutputIntent::srgb(),
            debug_path: None,
        }
    }

    /// Page used for image inputs; imported PDF pages keep their own size.
    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn creator_tool(mut self, creator_tool: impl Into<String>) -> Self {
        self.creator_tool = creator_tool.into();
        self
    }

    pub fn producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    pub fn output_intent(mut self, intent: OutputIntent) -> Self {
        self.output_intent = intent;
        self
    }

    /// Write JSON-lines diagnostics for each conversion to the given file.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Bindery, BinderyError> {
        let debug = match self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };
        Ok(Bindery {
            page_size: self.page_size,
            title: self.title,
            creator_tool: self.creator_tool,
            producer: self.producer,
            output_intent: self.output_intent,
            debug,
        })
    }
}

impl Default for BinderyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Bindery {
    pub fn builder() -> BinderyBuilder {
        BinderyBuilder::new()
    }

    /// Converts the inputs, in order, into a single PDF/A-1b document at
    /// `output`. Any I/O or structural failure aborts the conversion and
    /// leaves no usable output; unsupported input types are skipped with a
    /// warning.
    pub fn convert_to_pdfa_1b(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<ConversionSummary, BinderyError> {
        let outcome = merge::merge_inputs(inputs, self.page_size, self.debug.as_deref())?;
        let mut document = outcome.document;

        let fixups = fixup::apply_pdfa_fixups(&mut document, self.debug.as_deref());

        let meta = DocumentMetadata::new(
            self.title.clone(),
            self.creator_tool.clone(),
            self.producer.clone(),
        );
        metadata::attach_document_metadata(&mut document, &meta, self.debug.as_deref())?;
        intent::attach_output_intent(&mut document, &self.output_intent)?;

        document.prune_objects();
        document.renumber_objects();
        document.compress();
        document.save(output)?;

        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary("convert_to_pdfa_1b");
            logger.flush();
        }

        Ok(ConversionSummary {
            pages_written: outcome.summary.pages_written,
            images_embedded: outcome.summary.images_embedded,
            documents_imported: outcome.summary.documents_imported,
            inputs_skipped: outcome.summary.inputs_skipped,
            transparency_groups_stripped: fixups.transparency_groups_stripped,
            soft_masks_removed: fixups.soft_masks_removed,
            alpha_states_reset: fixups.alpha_states_reset,
        })
    }
}
