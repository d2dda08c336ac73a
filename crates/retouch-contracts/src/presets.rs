use serde::Serialize;

/// Serializes as `{id, displayName, instructionText}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetFilter {
    pub id: &'static str,
    pub display_name: &'static str,
    pub instruction_text: &'static str,
}

/// Presentation order is the declaration order.
pub const PRESET_FILTERS: &[PresetFilter] = &[
    PresetFilter {
        id: "vintage",
        display_name: "Vintage",
        instruction_text: "Give this image a faded 1970s film look with warm tones, soft contrast and subtle grain.",
    },
    PresetFilter {
        id: "grayscale",
        display_name: "Grayscale",
        instruction_text: "Convert this image to a rich black-and-white photograph with deep blacks and a smooth tonal range.",
    },
    PresetFilter {
        id: "sharpen",
        display_name: "Sharpen",
        instruction_text: "Sharpen this image, bringing out fine detail and crisp edges without adding noise or halos.",
    },
    PresetFilter {
        id: "watercolor",
        display_name: "Watercolor",
        instruction_text: "Repaint this image as a loose watercolor painting with soft bleeding edges and visible paper texture.",
    },
    PresetFilter {
        id: "sketch",
        display_name: "Pencil Sketch",
        instruction_text: "Turn this image into a detailed graphite pencil sketch on white paper.",
    },
    PresetFilter {
        id: "cyberpunk",
        display_name: "Cyberpunk",
        instruction_text: "Restyle this image with a cyberpunk aesthetic: neon magenta and cyan lighting, night atmosphere, glowing reflections.",
    },
    PresetFilter {
        id: "pop-art",
        display_name: "Pop Art",
        instruction_text: "Render this image in a bold pop art style with flat saturated colors, thick outlines and halftone dots.",
    },
    PresetFilter {
        id: "golden-hour",
        display_name: "Golden Hour",
        instruction_text: "Relight this image as if shot during golden hour, with low warm sunlight and long soft shadows.",
    },
];

/// Read-only view over an ordered preset list.
#[derive(Clone, Copy, Debug)]
pub struct PresetCatalog {
    filters: &'static [PresetFilter],
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::new(PRESET_FILTERS)
    }
}

impl PresetCatalog {
    pub fn new(filters: &'static [PresetFilter]) -> Self {
        Self { filters }
    }

    /// Ids match case-insensitively and `_` stands in for `-`.
    pub fn get(&self, id: &str) -> Option<&'static PresetFilter> {
        let wanted = normalize_id(id);
        if wanted.is_empty() {
            return None;
        }
        self.filters.iter().find(|filter| filter.id == wanted)
    }

    pub fn filters(&self) -> &'static [PresetFilter] {
        self.filters
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.filters.iter().map(|filter| filter.id).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

fn normalize_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('_', "-")
}
