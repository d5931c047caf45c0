use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb};
use retouch_contracts::restoration::{ImageRef, PlanStep};

use crate::gateway::RestorationGateway;

/// Offline gateway. Plans from keywords, writes template prompts and applies
/// small local adjustments so the whole pipeline runs without credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunGateway;

impl DryrunGateway {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Despeckle,
    Contrast,
    Sharpen,
    Colorize,
    Brighten,
}

const KEYWORD_GOALS: &[(&[&str], &str)] = &[
    (
        &["scratch", "dust", "crease", "tear", "damage", "spot"],
        "Remove scratches, dust and creases",
    ),
    (
        &["fade", "faded", "contrast", "washed"],
        "Restore faded contrast and tonal range",
    ),
    (&["noise", "grain"], "Reduce film grain and noise"),
    (&["sharp", "blur", "soft", "focus"], "Sharpen soft detail"),
    (&["dark", "dim", "underexposed"], "Brighten underexposed areas"),
    (&["color", "colour", "colorize", "colourise"], "Colorize the photo"),
];

const DEFAULT_GOAL: &str = "Repair visible damage and restore contrast";

fn plan_from_instructions(instructions: &str) -> Vec<PlanStep> {
    let lowered = instructions.to_ascii_lowercase();
    let goals: Vec<&str> = KEYWORD_GOALS
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(_, goal)| *goal)
        .collect();
    let goals = if goals.is_empty() {
        vec![DEFAULT_GOAL]
    } else {
        goals
    };
    goals
        .into_iter()
        .zip(1u32..)
        .map(|(goal, step)| PlanStep::new(step, goal))
        .collect()
}

/// The goal a dryrun prompt was written for: everything before the first
/// sentence break. The rest of the prompt is boilerplate and owner notes.
fn goal_of(prompt: &str) -> &str {
    let goal = prompt.split_once(". ").map_or(prompt, |(goal, _)| goal);
    goal.trim().trim_end_matches('.')
}

fn adjustment_for(prompt: &str) -> Adjustment {
    let lowered = goal_of(prompt).to_ascii_lowercase();
    let has = |words: &[&str]| words.iter().any(|word| lowered.contains(word));
    if has(&["color", "colour"]) {
        Adjustment::Colorize
    } else if has(&["sharpen", "detail"]) {
        Adjustment::Sharpen
    } else if has(&["scratch", "dust", "noise", "grain", "crease"]) {
        Adjustment::Despeckle
    } else if has(&["contrast", "fade", "tonal"]) {
        Adjustment::Contrast
    } else {
        Adjustment::Brighten
    }
}

fn apply(image: DynamicImage, adjustment: Adjustment) -> DynamicImage {
    match adjustment {
        Adjustment::Despeckle => image.blur(0.8),
        Adjustment::Contrast => image.adjust_contrast(18.0),
        Adjustment::Sharpen => image.unsharpen(1.2, 4),
        Adjustment::Brighten => image.brighten(12),
        Adjustment::Colorize => {
            let mut rgb = image.to_rgb8();
            for pixel in rgb.pixels_mut() {
                let Rgb([r, g, b]) = *pixel;
                *pixel = Rgb([
                    r.saturating_add(r / 8),
                    g.saturating_add(g / 16),
                    b.saturating_sub(b / 8),
                ]);
            }
            DynamicImage::ImageRgb8(rgb)
        }
    }
}

impl RestorationGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn request_plan(&self, _image: &ImageRef, instructions: &str) -> Result<Vec<PlanStep>> {
        Ok(plan_from_instructions(instructions))
    }

    fn request_edit_prompt(
        &self,
        image: &ImageRef,
        goal: &str,
        instructions: &str,
    ) -> Result<String> {
        let mut prompt = format!(
            "{goal}. Work on image {} and keep faces, composition and period details unchanged.",
            image.short_digest()
        );
        let instructions = instructions.trim();
        if !instructions.is_empty() {
            prompt.push_str(" Owner notes: ");
            prompt.push_str(instructions);
        }
        Ok(prompt)
    }

    fn request_image_edit(&self, image: &ImageRef, prompt: &str) -> Result<ImageRef> {
        let decoded =
            image::load_from_memory(image.bytes()).context("dryrun edit could not decode image")?;
        let edited = apply(decoded, adjustment_for(prompt));
        let mut encoded = Cursor::new(Vec::new());
        edited
            .write_to(&mut encoded, ImageFormat::Png)
            .context("dryrun edit could not encode image")?;
        Ok(ImageRef::new("image/png", encoded.into_inner()))
    }
}
