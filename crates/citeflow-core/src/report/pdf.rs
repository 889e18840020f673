use std::path::{Path, PathBuf};

use genpdf::elements::{Break, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Color, Style, StyledString};
use genpdf::{Document, SimplePageDecorator};
use tracing::debug;

use super::ReportOptions;
use super::citations::{format_references, strip_markdown};
use crate::source::group_by_type;
use crate::{CiteflowError, ResearchOutcome, Result};

const FONT_DIR_ENV: &str = "CITEFLOW_PDF_FONT_DIR";
const ACCENT: Color = Color::Rgb(0, 102, 204);

/// Directories probed after the configured one.
const SYSTEM_FONT_DIRS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu",
    "/usr/share/fonts/dejavu",
    "/usr/share/fonts/truetype/liberation",
    "/usr/share/fonts/liberation-sans",
    "/usr/share/fonts/liberation",
    "/usr/share/fonts/TTF",
    "/Library/Fonts",
];

/// Regular, bold, italic and bold-italic file names for each known family.
const FONT_SETS: &[[&str; 4]] = &[
    [
        "LiberationSans-Regular.ttf",
        "LiberationSans-Bold.ttf",
        "LiberationSans-Italic.ttf",
        "LiberationSans-BoldItalic.ttf",
    ],
    [
        "DejaVuSans.ttf",
        "DejaVuSans-Bold.ttf",
        "DejaVuSans-Oblique.ttf",
        "DejaVuSans-BoldOblique.ttf",
    ],
    [
        "DejaVuSans-Regular.ttf",
        "DejaVuSans-Bold.ttf",
        "DejaVuSans-Italic.ttf",
        "DejaVuSans-BoldItalic.ttf",
    ],
    ["Arial.ttf", "Arial Bold.ttf", "Arial Italic.ttf", "Arial Bold Italic.ttf"],
];

/// Paths of the four faces of one family, in regular/bold/italic/bold-italic order.
#[derive(Debug, Clone, PartialEq)]
struct FontFiles([PathBuf; 4]);

fn font_dirs(configured: Option<&str>) -> Vec<PathBuf> {
    configured
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .into_iter()
        .chain(SYSTEM_FONT_DIRS.iter().map(PathBuf::from))
        .collect()
}

/// First family in `dir` with all four faces present.
fn find_font_files(dir: &Path) -> Option<FontFiles> {
    FONT_SETS.iter().find_map(|names| {
        let paths = names.map(|name| dir.join(name));
        paths.iter().all(|path| path.is_file()).then(|| FontFiles(paths))
    })
}

fn load_family(files: &FontFiles) -> std::result::Result<FontFamily<FontData>, genpdf::error::Error> {
    let [regular, bold, italic, bold_italic] = &files.0;
    Ok(FontFamily {
        regular: FontData::load(regular, None)?,
        bold: FontData::load(bold, None)?,
        italic: FontData::load(italic, None)?,
        bold_italic: FontData::load(bold_italic, None)?,
    })
}

fn load_fonts() -> Result<FontFamily<FontData>> {
    let configured = std::env::var(FONT_DIR_ENV).ok();
    for dir in font_dirs(configured.as_deref()) {
        let Some(files) = find_font_files(&dir) else {
            continue;
        };
        match load_family(&files) {
            Ok(fonts) => {
                debug!(dir = %dir.display(), regular = %files.0[0].display(), "pdf font family loaded");
                return Ok(fonts);
            }
            Err(err) => debug!(dir = %dir.display(), error = %err, "pdf font family unreadable"),
        }
    }

    Err(CiteflowError::Render(format!(
        "no usable font family found; set {FONT_DIR_ENV} to a directory with LiberationSans or DejaVuSans TrueType files"
    )))
}

fn styled(text: impl Into<String>, style: Style) -> Paragraph {
    Paragraph::new(StyledString::new(text.into(), style))
}

/// Lay out the report with genpdf and return the PDF bytes.
pub fn render(outcome: &ResearchOutcome, options: &ReportOptions) -> Result<Vec<u8>> {
    let result = &outcome.result;
    let fonts = load_fonts()?;

    let title_style = Style::new().bold().with_font_size(20).with_color(ACCENT);
    let heading_style = Style::new().bold().with_font_size(14).with_color(ACCENT);
    let subheading_style = Style::new().bold().with_font_size(12);
    let label_style = Style::new().bold();
    let citation_style = Style::new().with_font_size(10);

    let mut doc = Document::new(fonts);
    doc.set_title(format!("Research Report: {}", outcome.query));
    let mut decorator = SimplePageDecorator::new();
    decorator.set_margins(20);
    doc.set_page_decorator(decorator);

    doc.push(styled("Research Report", title_style));
    doc.push(Break::new(1));
    for (label, value) in [
        ("Research Query: ", outcome.query.clone()),
        (
            "Generated: ",
            outcome.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("Word Count: ", format!("{} words", result.word_count())),
        ("Sources: ", format!("{} total sources", result.sources.len())),
    ] {
        let mut line = Paragraph::default();
        line.push_styled(label, label_style);
        line.push(value);
        doc.push(line);
    }
    doc.push(Break::new(1.5));

    for line in result.content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(heading) = line.strip_prefix("# ") {
            doc.push(styled(heading.trim(), title_style));
            doc.push(Break::new(0.8));
        } else if let Some(heading) = line.strip_prefix("## ") {
            doc.push(styled(heading.trim(), heading_style));
            doc.push(Break::new(0.6));
        } else if let Some(heading) = line.strip_prefix("### ") {
            doc.push(styled(heading.trim(), subheading_style));
            doc.push(Break::new(0.4));
        } else {
            let clean = strip_markdown(line);
            if !clean.trim().is_empty() {
                doc.push(Paragraph::new(clean.trim().to_string()));
                doc.push(Break::new(0.5));
            }
        }
    }

    if !result.sources.is_empty() {
        doc.push(Break::new(1.5));
        doc.push(styled("Sources and References", heading_style));
        doc.push(Break::new(0.8));

        if let Some(style) = options.citation_style {
            for entry in strip_markdown(&format_references(&result.sources, style)).split("\n\n") {
                doc.push(styled(entry, citation_style));
                doc.push(Break::new(0.4));
            }
        } else {
            for (source_type, members) in group_by_type(&result.sources) {
                doc.push(styled(format!("{} Sources", source_type.label()), subheading_style));
                doc.push(Break::new(0.4));
                for (idx, source) in members.iter().enumerate() {
                    let mut entry = Paragraph::default();
                    entry.push_styled(format!("{}. {}", idx + 1, source.title), label_style);
                    doc.push(entry);
                    doc.push(styled(source.url.clone(), citation_style));
                    doc.push(styled(format!("Domain: {}", source.domain), citation_style));
                    if let Some(date) = &source.publication_date {
                        doc.push(styled(format!("Date: {date}"), citation_style));
                    }
                    doc.push(Break::new(0.4));
                }
            }
        }
    }

    let mut buffer = Vec::new();
    doc.render(&mut buffer)
        .map_err(|err| CiteflowError::Render(format!("failed to render PDF: {err}")))?;
    Ok(buffer)
}
