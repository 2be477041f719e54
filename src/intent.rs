use crate::error::BinderyError;
use crate::metadata::catalog_dict_mut;
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, StringFormat, dictionary};

pub const SRGB_IDENTIFIER: &str = "sRGB IEC61966-2.1";
pub const COLOR_REGISTRY: &str = "http://www.color.org";

/// Bundled sRGB profile; output intents default to it instead of taking
/// profiles from user input.
static SRGB_ICC: &[u8] = include_bytes!("../resources/sRGB_IEC61966-2-1.icc");

#[derive(Debug, Clone)]
pub struct OutputIntent {
    pub icc_profile: Vec<u8>,
    pub n_components: u8,
    pub identifier: String,
    pub info: Option<String>,
}

impl OutputIntent {
    pub fn new(
        icc_profile: Vec<u8>,
        n_components: u8,
        identifier: impl Into<String>,
        info: Option<String>,
    ) -> Self {
        Self {
            icc_profile,
            n_components,
            identifier: identifier.into(),
            info,
        }
    }

    pub fn srgb() -> Self {
        Self::new(SRGB_ICC.to_vec(), 3, SRGB_IDENTIFIER, None)
    }
}

fn alternate_color_space(n_components: u8) -> &'static str {
    match n_components {
        1 => "DeviceGray",
        4 => "DeviceCMYK",
        _ => "DeviceRGB",
    }
}

/// Sets the document's single output intent: the catalog's /OutputIntents
/// is replaced, never appended to, so repeated conversion passes cannot
/// accumulate intents.
pub(crate) fn attach_output_intent(
    doc: &mut LoDocument,
    intent: &OutputIntent,
) -> Result<(), BinderyError> {
    if intent.icc_profile.is_empty() {
        return Err(BinderyError::Metadata(
            "output intent ICC profile cannot be empty".to_string(),
        ));
    }
    if !matches!(intent.n_components, 1 | 3 | 4) {
        return Err(BinderyError::Metadata(format!(
            "output intent component count must be one of 1, 3, or 4 (got {})",
            intent.n_components
        )));
    }

    let icc_id = doc.add_object(LoStream::new(
        dictionary! {
            "N" => intent.n_components as i64,
            "Alternate" => alternate_color_space(intent.n_components),
        },
        intent.icc_profile.clone(),
    ));

    let info = intent
        .info
        .clone()
        .unwrap_or_else(|| intent.identifier.clone());
    let intent_id = doc.add_object(dictionary! {
        "Type" => "OutputIntent",
        "S" => "GTS_PDFA1",
        "OutputConditionIdentifier" => LoObject::String(
            intent.identifier.clone().into_bytes(),
            StringFormat::Literal,
        ),
        "OutputCondition" => LoObject::String(
            intent.identifier.clone().into_bytes(),
            StringFormat::Literal,
        ),
        "Info" => LoObject::String(info.into_bytes(), StringFormat::Literal),
        "RegistryName" => LoObject::String(
            COLOR_REGISTRY.as_bytes().to_vec(),
            StringFormat::Literal,
        ),
        "DestOutputProfile" => icc_id,
    });
    catalog_dict_mut(doc)?.set("OutputIntents", vec![LoObject::Reference(intent_id)]);
    Ok(())
}
