use crate::debug::DebugLogger;
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId,
};
use std::collections::HashSet;

/// Counters reported by one fixup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixupSummary {
    pub transparency_groups_stripped: usize,
    pub soft_masks_removed: usize,
    pub alpha_states_reset: usize,
}

/// Normalizes the document in place until it carries no transparency
/// constructs prohibited by PDF/A-1b: transparency-group markers and form
/// soft masks are removed, constant alpha is forced opaque.
///
/// The pass is best-effort by contract: structural anomalies (missing
/// resources, dangling references, mistyped entries) mean "nothing to fix
/// here" and are skipped. It never fails; it only mutates and counts.
pub(crate) fn apply_pdfa_fixups(doc: &mut LoDocument, debug: Option<&DebugLogger>) -> FixupSummary {
    let mut summary = FixupSummary::default();
    reset_alpha_and_strip_masks(doc, &mut summary);
    strip_transparency_groups(doc, &mut summary);

    if let Some(logger) = debug {
        logger.log_json(&format!(
            "{{\"type\":\"fixup.summary\",\"groups_stripped\":{},\"soft_masks_removed\":{},\"alpha_states_reset\":{}}}",
            summary.transparency_groups_stripped,
            summary.soft_masks_removed,
            summary.alpha_states_reset
        ));
        logger.increment(
            "fixup.groups_stripped",
            summary.transparency_groups_stripped as u64,
        );
        logger.increment("fixup.soft_masks_removed", summary.soft_masks_removed as u64);
        logger.increment("fixup.alpha_states_reset", summary.alpha_states_reset as u64);
    }
    summary
}

/// Where a resource dictionary lives: inline on its owning page or form
/// XObject, or behind its own indirect object.
#[derive(Clone, Copy)]
enum ResourcesSlot {
    Owner(LoObjectId),
    Indirect(LoObjectId),
}

/// Removes the `/S /Transparency` marker from every group dictionary on any
/// XObject reachable from any page, through nested form resources at
/// unbounded depth. Shared and cyclic subgraphs are handled with a visited
/// set keyed by object id and an explicit worklist.
fn strip_transparency_groups(doc: &mut LoDocument, summary: &mut FixupSummary) {
    let mut stack: Vec<LoObjectId> = Vec::new();
    for page_id in doc.get_pages().values().copied().collect::<Vec<_>>() {
        if let Some(resources) = resources_slot(doc, page_id).and_then(|slot| slot_dict(doc, slot))
        {
            stack.extend(xobject_ids(doc, &resources));
        }
    }

    let mut visited: HashSet<LoObjectId> = HashSet::new();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if strip_group_marker(doc, id) {
            summary.transparency_groups_stripped += 1;
        }
        if let Some(resources) = resources_slot(doc, id).and_then(|slot| slot_dict(doc, slot)) {
            stack.extend(xobject_ids(doc, &resources));
        }
    }
}

/// Forces graphics-state alpha constants opaque and strips form soft masks.
///
/// The alpha reset reaches the page resources and each directly referenced
/// form's own resources, one level only. The soft-mask strip runs to full
/// depth. The asymmetry matches the long-standing conversion behavior; see
/// the depth test before changing it.
fn reset_alpha_and_strip_masks(doc: &mut LoDocument, summary: &mut FixupSummary) {
    let pages: Vec<LoObjectId> = doc.get_pages().values().copied().collect();
    let mut visited: HashSet<LoObjectId> = HashSet::new();
    for page_id in pages {
        summary.alpha_states_reset += reset_alpha_constants(doc, page_id);
        let Some(resources) = resources_slot(doc, page_id).and_then(|slot| slot_dict(doc, slot))
        else {
            continue;
        };
        for xobject_id in xobject_ids(doc, &resources) {
            if !is_form_xobject(doc, xobject_id) {
                continue;
            }
            summary.alpha_states_reset += reset_alpha_constants(doc, xobject_id);
            strip_soft_masks_from(doc, xobject_id, &mut visited, summary);
        }
    }
}

/// Removes `/SMask` from the given form XObject and every form nested under
/// it, at unbounded depth. Image XObjects are left alone.
fn strip_soft_masks_from(
    doc: &mut LoDocument,
    root: LoObjectId,
    visited: &mut HashSet<LoObjectId>,
    summary: &mut FixupSummary,
) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if !is_form_xobject(doc, id) {
            continue;
        }
        if remove_smask(doc, id) {
            summary.soft_masks_removed += 1;
        }
        if let Some(resources) = resources_slot(doc, id).and_then(|slot| slot_dict(doc, slot)) {
            stack.extend(xobject_ids(doc, &resources));
        }
    }
}

/// Strips the transparency subtype marker from one XObject's group
/// dictionary. Returns true when a marker was actually removed.
fn strip_group_marker(doc: &mut LoDocument, id: LoObjectId) -> bool {
    enum GroupSlot {
        Inline,
        Indirect(LoObjectId),
    }

    let slot = {
        let Ok(object) = doc.get_object(id) else {
            return false;
        };
        let Some(dict) = object_dict(object) else {
            return false;
        };
        match dict.get(b"Group") {
            Ok(LoObject::Reference(group_id)) => GroupSlot::Indirect(*group_id),
            Ok(LoObject::Dictionary(_)) => GroupSlot::Inline,
            _ => return false,
        }
    };

    let group: &mut LoDictionary = match slot {
        GroupSlot::Indirect(group_id) => {
            match doc
                .get_object_mut(group_id)
                .ok()
                .and_then(|object| object.as_dict_mut().ok())
            {
                Some(group) => group,
                None => return false,
            }
        }
        GroupSlot::Inline => {
            let Ok(object) = doc.get_object_mut(id) else {
                return false;
            };
            let Some(dict) = object_dict_mut(object) else {
                return false;
            };
            match dict.get_mut(b"Group") {
                Ok(LoObject::Dictionary(group)) => group,
                _ => return false,
            }
        }
    };

    let transparent = group
        .get(b"S")
        .and_then(LoObject::as_name)
        .map(|name| name == b"Transparency")
        .unwrap_or(false);
    if transparent {
        group.remove(b"S");
    }
    transparent
}

/// Forces `CA` and `ca` to 1.0 on every graphics state reachable from the
/// owner's resource dictionary. Returns the number of states touched.
fn reset_alpha_constants(doc: &mut LoDocument, owner_id: LoObjectId) -> usize {
    let Some(slot) = resources_slot(doc, owner_id) else {
        return 0;
    };
    let Some((states_id, indirect, inline)) = alpha_reset_plan(doc, slot) else {
        return 0;
    };

    let mut count = 0;
    for gs_id in indirect {
        if let Some(state) = doc
            .get_object_mut(gs_id)
            .ok()
            .and_then(|object| object.as_dict_mut().ok())
        {
            set_opaque(state);
            count += 1;
        }
    }
    if inline {
        if let Some(states) = extgstate_dict_mut(doc, slot, states_id) {
            for (_, entry) in states.iter_mut() {
                if let LoObject::Dictionary(state) = entry {
                    set_opaque(state);
                    count += 1;
                }
            }
        }
    }
    count
}

/// Read phase of the alpha reset: which graphics states are indirect, and
/// whether any entry is stored inline in the resource dictionary.
fn alpha_reset_plan(
    doc: &LoDocument,
    slot: ResourcesSlot,
) -> Option<(Option<LoObjectId>, Vec<LoObjectId>, bool)> {
    let resources = slot_dict(doc, slot)?;
    let states_obj = resources.get(b"ExtGState").ok()?;
    let (states_id, resolved) = resolve(doc, states_obj)?;
    let states = resolved.as_dict().ok()?;

    let mut indirect = Vec::new();
    let mut inline = false;
    for (_, entry) in states.iter() {
        match entry {
            LoObject::Reference(gs_id) => indirect.push(*gs_id),
            LoObject::Dictionary(_) => inline = true,
            _ => {}
        }
    }
    Some((states_id, indirect, inline))
}

fn set_opaque(state: &mut LoDictionary) {
    state.set("CA", LoObject::Real(1.0));
    state.set("ca", LoObject::Real(1.0));
}

fn extgstate_dict_mut(
    doc: &mut LoDocument,
    slot: ResourcesSlot,
    states_id: Option<LoObjectId>,
) -> Option<&mut LoDictionary> {
    if let Some(id) = states_id {
        return doc.get_object_mut(id).ok()?.as_dict_mut().ok();
    }
    let resources: &mut LoDictionary = match slot {
        ResourcesSlot::Indirect(id) => doc.get_object_mut(id).ok()?.as_dict_mut().ok()?,
        ResourcesSlot::Owner(owner_id) => {
            let object = doc.get_object_mut(owner_id).ok()?;
            let dict = object_dict_mut(object)?;
            match dict.get_mut(b"Resources") {
                Ok(LoObject::Dictionary(resources)) => resources,
                _ => return None,
            }
        }
    };
    match resources.get_mut(b"ExtGState") {
        Ok(LoObject::Dictionary(states)) => Some(states),
        _ => None,
    }
}

/// Follows a reference chain to its target, reporting the final object id
/// when the value was indirect. Bounded so a malformed self-referential
/// chain cannot spin.
fn resolve<'a>(
    doc: &'a LoDocument,
    mut object: &'a LoObject,
) -> Option<(Option<LoObjectId>, &'a LoObject)> {
    let mut id = None;
    for _ in 0..64 {
        match object {
            LoObject::Reference(ref_id) => {
                id = Some(*ref_id);
                object = doc.objects.get(ref_id)?;
            }
            _ => return Some((id, object)),
        }
    }
    None
}

fn resources_slot(doc: &LoDocument, owner_id: LoObjectId) -> Option<ResourcesSlot> {
    let dict = object_dict(doc.get_object(owner_id).ok()?)?;
    let resources = dict.get(b"Resources").ok()?;
    match resolve(doc, resources)? {
        (Some(id), LoObject::Dictionary(_)) => Some(ResourcesSlot::Indirect(id)),
        (None, LoObject::Dictionary(_)) => Some(ResourcesSlot::Owner(owner_id)),
        _ => None,
    }
}

fn slot_dict(doc: &LoDocument, slot: ResourcesSlot) -> Option<LoDictionary> {
    match slot {
        ResourcesSlot::Indirect(id) => doc.get_object(id).ok()?.as_dict().ok().cloned(),
        ResourcesSlot::Owner(owner_id) => {
            let dict = object_dict(doc.get_object(owner_id).ok()?)?;
            match dict.get(b"Resources") {
                Ok(LoObject::Dictionary(resources)) => Some(resources.clone()),
                _ => None,
            }
        }
    }
}

/// Indirect XObject entries of a resource dictionary. The XObject
/// sub-dictionary itself may be indirect; inline XObject entries are not
/// legal PDF and are skipped.
fn xobject_ids(doc: &LoDocument, resources: &LoDictionary) -> Vec<LoObjectId> {
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Vec::new();
    };
    let Some((_, resolved)) = resolve(doc, xobjects) else {
        return Vec::new();
    };
    let Ok(xobjects) = resolved.as_dict() else {
        return Vec::new();
    };
    xobjects
        .iter()
        .filter_map(|(_, value)| value.as_reference().ok())
        .collect()
}

fn is_form_xobject(doc: &LoDocument, id: LoObjectId) -> bool {
    let Ok(object) = doc.get_object(id) else {
        return false;
    };
    let Ok(stream) = object.as_stream() else {
        return false;
    };
    stream
        .dict
        .get(b"Subtype")
        .ok()
        .and_then(|value| value.as_name().ok())
        .map(|name| name == b"Form")
        .unwrap_or(false)
}

fn remove_smask(doc: &mut LoDocument, id: LoObjectId) -> bool {
    let Ok(object) = doc.get_object_mut(id) else {
        return false;
    };
    let Some(dict) = object_dict_mut(object) else {
        return false;
    };
    dict.remove(b"SMask").is_some()
}

fn object_dict(object: &LoObject) -> Option<&LoDictionary> {
    match object {
        LoObject::Dictionary(dict) => Some(dict),
        LoObject::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn object_dict_mut(object: &mut LoObject) -> Option<&mut LoDictionary> {
    match object {
        LoObject::Dictionary(dict) => Some(dict),
        LoObject::Stream(stream) => Some(&mut stream.dict),
        _ => None,
    }
}
