//! Field overlays drawn over the document image.

use serde::Serialize;

use crate::schema::{BoundingBox, DetectedField, FilledFieldMap};

/// Visual state of one overlay. Filled outranks Selected outranks Default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayState {
    Filled,
    Selected,
    Default,
}

impl OverlayState {
    pub fn fill_color(&self) -> &'static str {
        match self {
            OverlayState::Filled => "rgba(34, 197, 94, 0.3)",
            OverlayState::Selected => "rgba(59, 130, 246, 0.4)",
            OverlayState::Default => "rgba(239, 68, 68, 0.3)",
        }
    }

    pub fn border_color(&self) -> &'static str {
        match self {
            OverlayState::Filled => "#22c55e",
            OverlayState::Selected => "#3b82f6",
            OverlayState::Default => "#ef4444",
        }
    }
}

pub fn overlay_state(
    field: &DetectedField,
    selected_id: Option<&str>,
    filled: &FilledFieldMap,
) -> OverlayState {
    if filled.contains_key(&field.id) {
        OverlayState::Filled
    } else if selected_id == Some(field.id.as_str()) {
        OverlayState::Selected
    } else {
        OverlayState::Default
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub field_id: String,
    pub label: String,
    pub bounding_box: BoundingBox,
    pub state: OverlayState,
    pub fill_color: &'static str,
    pub border_color: &'static str,
    pub checkmark: bool,
    pub in_bounds: bool,
}

/// One overlay per field, in detection order. `image_size` is the probed
/// (width, height) of the source image.
pub fn render_overlays(
    fields: &[DetectedField],
    selected_id: Option<&str>,
    filled: &FilledFieldMap,
    image_size: (u32, u32),
) -> Vec<Overlay> {
    fields
        .iter()
        .map(|field| {
            let state = overlay_state(field, selected_id, filled);
            Overlay {
                field_id: field.id.clone(),
                label: field.label.clone(),
                bounding_box: field.bounding_box,
                state,
                fill_color: state.fill_color(),
                border_color: state.border_color(),
                checkmark: state == OverlayState::Filled,
                in_bounds: field.bounding_box.fits_within(image_size.0, image_size.1),
            }
        })
        .collect()
}
