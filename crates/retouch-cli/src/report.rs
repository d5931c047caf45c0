use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use retouch_contracts::restoration::ImageRef;
use retouch_contracts::runs::summary::{load_summary, RunSummary};
use retouch_engine::SUMMARY_FILE;

/// Renders the before/after report for a recorded run.
///
/// Image sources are file names next to the report when it lives in the run
/// directory, paths into the run directory otherwise, or data URLs with
/// `embed`.
pub fn export_report(run_dir: &Path, out_path: &Path, embed: bool) -> Result<()> {
    let summary = load_summary(&run_dir.join(SUMMARY_FILE))?;
    let sources = ImageSources {
        run_dir,
        beside_report: out_path.parent() == Some(run_dir),
        embed,
    };
    let html_doc = render_report(&summary, &sources)?;

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, html_doc)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(())
}

struct ImageSources<'a> {
    run_dir: &'a Path,
    beside_report: bool,
    embed: bool,
}

impl ImageSources<'_> {
    fn src(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Ok(String::new());
        }
        let path = self.run_dir.join(name);
        if self.embed {
            return Ok(ImageRef::from_path(&path)?.to_data_url());
        }
        if self.beside_report {
            return Ok(name.to_string());
        }
        Ok(path.display().to_string())
    }
}

fn render_report(summary: &RunSummary, sources: &ImageSources<'_>) -> Result<String> {
    let mut cards = String::new();
    if let Some(original) = &summary.original_image {
        cards.push_str(&format!(
            "<div class='card'><div class='thumb'><img src='{src}' alt='original'></div><div class='meta'><div class='step'>Original</div></div></div>",
            src = escape_html(&sources.src(original)?),
        ));
    }
    for step in &summary.steps {
        cards.push_str(&format!(
            "<div class='card'><div class='pair'><div class='thumb'><img src='{before}' alt='before step {n}'></div><div class='thumb'><img src='{after}' alt='after step {n}'></div></div><div class='meta'><div class='step'>Step {n}: {goal}</div><div class='prompt'>{prompt}</div></div></div>",
            before = escape_html(&sources.src(&step.before_image)?),
            after = escape_html(&sources.src(&step.after_image)?),
            n = step.step,
            goal = escape_html(&step.goal),
            prompt = escape_html(&step.prompt),
        ));
    }

    let mut header = format!(
        "<div class='status {status}'>Status: {status} · {done} of {planned} steps</div>",
        status = summary.status,
        done = summary.steps.len(),
        planned = summary.plan.len(),
    );
    if !summary.instructions.is_empty() {
        header.push_str(&format!(
            "<div class='instructions'>Instructions: {}</div>",
            escape_html(&summary.instructions)
        ));
    }
    if let Some(error) = &summary.error {
        header.push_str(&format!(
            "<div class='error'>{}</div>",
            escape_html(error)
        ));
    }

    Ok(format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>\n  <title>Restoration {run_id}</title>\n  <style>\n    body {{ font-family: Arial, sans-serif; background: #f6f6f6; margin: 0; padding: 20px; }}\n    .grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(420px, 1fr)); gap: 16px; }}\n    .card {{ background: white; border-radius: 10px; overflow: hidden; box-shadow: 0 2px 8px rgba(0,0,0,0.08); }}\n    .pair {{ display: flex; }}\n    .thumb {{ flex: 1; height: 240px; background: #eee; display: flex; align-items: center; justify-content: center; }}\n    .thumb img {{ max-width: 100%; max-height: 100%; }}\n    .meta {{ padding: 10px; }}\n    .step {{ font-weight: bold; font-size: 13px; color: #444; }}\n    .prompt {{ font-size: 13px; margin: 8px 0; color: #555; }}\n    .error {{ color: #b00020; margin: 8px 0; }}\n    .status, .instructions {{ margin: 4px 0; }}\n  </style>\n</head>\n<body>\n  <h1>Photo Restoration</h1>\n  {header}\n  <div class='grid'>\n    {cards}\n  </div>\n</body>\n</html>\n",
        run_id = escape_html(&summary.run_id),
    ))
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use retouch_contracts::restoration::{AppStatus, PlanStep};
    use retouch_contracts::runs::summary::{write_summary, RunSummary, StepRecord};

    use super::{escape_html, export_report};

    fn recorded_run(dir: &std::path::Path) -> anyhow::Result<()> {
        let mut summary = RunSummary::new("run-report");
        summary.status = AppStatus::Error;
        summary.error = Some("step 2: image edit failed: <no image>".to_string());
        summary.instructions = "keep Grandma's smile".to_string();
        summary.original_image = Some("original.png".to_string());
        summary.plan = vec![
            PlanStep::new(1, "Remove scratches"),
            PlanStep::new(2, "Colorize"),
        ];
        summary.steps = vec![StepRecord {
            step: 1,
            goal: "Remove scratches".to_string(),
            prompt: "fix scratches & dust".to_string(),
            before_image: "original.png".to_string(),
            after_image: "step-01.png".to_string(),
            after_digest: "d1".to_string(),
        }];
        fs::write(dir.join("original.png"), [1u8, 2, 3])?;
        fs::write(dir.join("step-01.png"), [4u8, 5, 6])?;
        write_summary(&dir.join("summary.json"), &summary, None)
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn report_beside_the_run_uses_file_names() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        recorded_run(temp.path())?;
        let out = temp.path().join("report.html");
        export_report(temp.path(), &out, false)?;

        let html = fs::read_to_string(&out)?;
        assert!(html.contains("<img src='original.png' alt='original'>"));
        assert!(html.contains("<img src='step-01.png' alt='after step 1'>"));
        assert!(html.contains("Step 1: Remove scratches"));
        assert!(html.contains("fix scratches &amp; dust"));
        assert!(html.contains("Status: error · 1 of 2 steps"));
        assert!(html.contains("&lt;no image&gt;"));
        assert!(html.contains("keep Grandma&#x27;s smile"));
        Ok(())
    }

    #[test]
    fn embedded_report_inlines_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let run_dir = temp.path().join("run");
        fs::create_dir_all(&run_dir)?;
        recorded_run(&run_dir)?;
        let out = temp.path().join("exports").join("report.html");
        export_report(&run_dir, &out, true)?;

        let html = fs::read_to_string(&out)?;
        assert!(html.contains("src='data:image/png;base64,AQID'"));
        assert!(!html.contains("src='original.png'"));
        Ok(())
    }

    #[test]
    fn missing_summary_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("report.html");
        assert!(export_report(temp.path(), &out, false).is_err());
        assert!(!out.exists());
        Ok(())
    }
}
