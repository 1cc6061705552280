//! Style catalog
//!
//! Styles are read-only to the pipeline. They are seeded at startup, either
//! from a JSON file or from the built-in set.

use std::path::Path;
use std::sync::Arc;

use rexpet_core::{Result, Store, Style};

const BUILT_IN: [(&str, &str, &str); 6] = [
    (
        "Oil Painting",
        "Rich textures & golden tones",
        "Transform this pet photo into a classical oil painting with rich impasto textures, warm golden tones and a dark, softly lit background. Keep the animal's features and markings recognizable.",
    ),
    (
        "Watercolor",
        "Soft washes & gentle blending",
        "Transform this pet photo into a delicate watercolor painting with soft washes, gentle color blending and visible paper texture. Keep the animal's features and markings recognizable.",
    ),
    (
        "Pop Art",
        "Bold colors & graphic energy",
        "Transform this pet photo into bold pop art with flat saturated colors, thick outlines and halftone dots. Keep the animal's features and markings recognizable.",
    ),
    (
        "Renaissance",
        "Noble bearing & dramatic light",
        "Transform this pet photo into a Renaissance portrait of a noble, dressed in period attire with dramatic chiaroscuro lighting. Keep the animal's features and markings recognizable.",
    ),
    (
        "Art Nouveau",
        "Flowing lines & organic forms",
        "Transform this pet photo into an Art Nouveau poster with flowing lines, ornamental floral borders and a muted decorative palette. Keep the animal's features and markings recognizable.",
    ),
    (
        "Impressionist",
        "Dappled light & visible strokes",
        "Transform this pet photo into an impressionist painting with dappled light, visible brush strokes and a vibrant outdoor setting. Keep the animal's features and markings recognizable.",
    ),
];

/// The default catalog, in display order
pub fn built_in_styles() -> Vec<Style> {
    BUILT_IN
        .iter()
        .zip(1..)
        .map(|(&(name, description, prompt), sort_order)| {
            let mut style = Style::new(name, prompt);
            style.description = Some(description.to_string());
            style.sort_order = sort_order;
            style
        })
        .collect()
}

/// Read a JSON array of styles
pub async fn load_styles(path: impl AsRef<Path>) -> Result<Vec<Style>> {
    let raw = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Upsert every style; returns how many were written
pub async fn seed_styles(store: &Arc<dyn Store>, styles: Vec<Style>) -> Result<usize> {
    let count = styles.len();
    for style in styles {
        store.upsert_style(style).await?;
    }
    tracing::info!(count, "Style catalog seeded");
    Ok(count)
}

/// Active styles ordered for display
pub async fn active_styles(store: &Arc<dyn Store>) -> Result<Vec<Style>> {
    let mut styles: Vec<Style> = store
        .styles()
        .await?
        .into_iter()
        .filter(|s| s.is_active)
        .collect();
    styles.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
    Ok(styles)
}
