//! Format classification and the extract-or-upload decision.

use serde::{Deserialize, Serialize};

use crate::config::{ExtractionPolicy, ParseMode};

/// Container format of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    /// PDF-like paged documents
    PagedBinary,
    /// Word-style zip packages
    CompoundBinary,
    PlainText,
    /// HTML and CSV, passed through as text
    MarkupPassthrough,
    Unsupported,
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatKind::PagedBinary => write!(f, "paged_binary"),
            FormatKind::CompoundBinary => write!(f, "compound_binary"),
            FormatKind::PlainText => write!(f, "plain_text"),
            FormatKind::MarkupPassthrough => write!(f, "markup_passthrough"),
            FormatKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Why the classifier decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Extract,
    Disabled,
    ModeNever,
    UnsupportedFormat,
    NotAllowed,
    /// `Auto` mode only extracts formats it can reconstruct reliably
    NotAutomatic,
    TooLarge,
}

/// Output of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: FormatKind,
    pub attempt_extraction: bool,
    pub reason: Decision,
}

/// Media types that say nothing about the content.
const GENERIC_MEDIA_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "application/unknown",
];

/// Media type families, checked in order. Rich text comes first so that
/// `text/rtf` never lands in the text family.
const MEDIA_FAMILIES: &[(&str, FormatKind)] = &[
    ("rtf", FormatKind::Unsupported),
    ("pdf", FormatKind::PagedBinary),
    ("wordprocessingml", FormatKind::CompoundBinary),
    ("text/html", FormatKind::MarkupPassthrough),
    ("xhtml", FormatKind::MarkupPassthrough),
    ("text/csv", FormatKind::MarkupPassthrough),
    ("comma-separated", FormatKind::MarkupPassthrough),
    ("text/plain", FormatKind::PlainText),
    ("text/markdown", FormatKind::PlainText),
    ("text/x-markdown", FormatKind::PlainText),
];

/// Map a media type and filename to a format.
pub fn format_kind(filename: &str, media_type: &str) -> FormatKind {
    let media_type = media_type.trim().to_ascii_lowercase();

    if !media_type.is_empty() && !GENERIC_MEDIA_TYPES.contains(&media_type.as_str()) {
        if let Some((_, kind)) = MEDIA_FAMILIES
            .iter()
            .find(|(family, _)| media_type.contains(family))
        {
            return *kind;
        }
    }

    kind_from_extension(filename)
}

fn kind_from_extension(filename: &str) -> FormatKind {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return FormatKind::Unsupported;
    };

    match ext.to_ascii_lowercase().as_str() {
        "pdf" => FormatKind::PagedBinary,
        "docx" => FormatKind::CompoundBinary,
        "txt" | "md" | "markdown" | "text" | "log" => FormatKind::PlainText,
        "html" | "htm" | "csv" => FormatKind::MarkupPassthrough,
        _ => FormatKind::Unsupported,
    }
}

/// Whether a file looks like an image, for rendering raw uploads.
pub fn is_image(filename: &str, media_type: &str) -> bool {
    if media_type.trim().to_ascii_lowercase().starts_with("image/") {
        return true;
    }
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg"
            )
        })
        .unwrap_or(false)
}

/// Classify a file and decide whether to attempt extraction.
///
/// Pure function of its inputs.
pub fn classify(
    filename: &str,
    media_type: &str,
    size_bytes: u64,
    policy: &ExtractionPolicy,
) -> Classification {
    let kind = format_kind(filename, media_type);
    let reason = decide(kind, size_bytes, policy);

    Classification {
        kind,
        attempt_extraction: reason == Decision::Extract,
        reason,
    }
}

fn decide(kind: FormatKind, size_bytes: u64, policy: &ExtractionPolicy) -> Decision {
    if !policy.enabled {
        return Decision::Disabled;
    }
    if kind == FormatKind::Unsupported {
        return Decision::UnsupportedFormat;
    }

    let fits = size_bytes <= policy.max_extract_size_bytes;
    let allowed = policy.allowed_formats.contains(&kind);

    match policy.mode {
        ParseMode::Never => Decision::ModeNever,
        ParseMode::Always | ParseMode::Ask => {
            if !allowed {
                Decision::NotAllowed
            } else if !fits {
                Decision::TooLarge
            } else {
                Decision::Extract
            }
        }
        ParseMode::Auto => {
            let automatic = matches!(
                kind,
                FormatKind::PagedBinary | FormatKind::PlainText | FormatKind::MarkupPassthrough
            );
            if !automatic {
                Decision::NotAutomatic
            } else if !allowed {
                Decision::NotAllowed
            } else if !fits {
                Decision::TooLarge
            } else {
                Decision::Extract
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: ParseMode) -> ExtractionPolicy {
        ExtractionPolicy {
            mode,
            ..Default::default()
        }
    }

    #[test]
    fn test_media_type_wins_over_extension() {
        assert_eq!(
            format_kind("report.txt", "application/pdf"),
            FormatKind::PagedBinary
        );
        assert_eq!(
            format_kind(
                "notes",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            FormatKind::CompoundBinary
        );
        assert_eq!(format_kind("a", "text/csv"), FormatKind::MarkupPassthrough);
        assert_eq!(format_kind("a", "text/plain; charset=utf-8"), FormatKind::PlainText);
    }

    #[test]
    fn test_rtf_is_unsupported() {
        assert_eq!(format_kind("letter.rtf", "text/rtf"), FormatKind::Unsupported);
        assert_eq!(
            format_kind("letter.rtf", "application/rtf"),
            FormatKind::Unsupported
        );
        assert_eq!(format_kind("letter.rtf", ""), FormatKind::Unsupported);
    }

    #[test]
    fn test_generic_media_type_falls_back_to_extension() {
        assert_eq!(
            format_kind("Scan.PDF", "application/octet-stream"),
            FormatKind::PagedBinary
        );
        assert_eq!(format_kind("readme.md", ""), FormatKind::PlainText);
        assert_eq!(format_kind("page.htm", "  "), FormatKind::MarkupPassthrough);
        assert_eq!(format_kind("old.doc", ""), FormatKind::Unsupported);
        assert_eq!(format_kind("no_extension", ""), FormatKind::Unsupported);
        // Unmatched specific types still get the extension check
        assert_eq!(format_kind("data.csv", "application/vnd.ms-excel"), FormatKind::MarkupPassthrough);
    }

    #[test]
    fn test_auto_mode() {
        let auto = policy(ParseMode::Auto);
        assert!(classify("a.pdf", "application/pdf", 1024, &auto).attempt_extraction);
        assert!(classify("a.txt", "text/plain", 1024, &auto).attempt_extraction);
        assert!(classify("a.html", "text/html", 1024, &auto).attempt_extraction);

        let docx = classify("a.docx", "", 1024, &auto);
        assert_eq!(docx.kind, FormatKind::CompoundBinary);
        assert!(!docx.attempt_extraction);
        assert_eq!(docx.reason, Decision::NotAutomatic);
    }

    #[test]
    fn test_size_ceiling() {
        let mut auto = policy(ParseMode::Auto);
        auto.max_extract_size_bytes = 100;

        let at_limit = classify("a.pdf", "application/pdf", 100, &auto);
        assert!(at_limit.attempt_extraction);

        let over = classify("a.pdf", "application/pdf", 101, &auto);
        assert!(!over.attempt_extraction);
        assert_eq!(over.reason, Decision::TooLarge);
    }

    #[test]
    fn test_always_and_ask_respect_allow_list() {
        for mode in [ParseMode::Always, ParseMode::Ask] {
            let mut p = policy(mode);
            assert!(classify("a.docx", "", 10, &p).attempt_extraction);

            p.allowed_formats.remove(&FormatKind::CompoundBinary);
            let result = classify("a.docx", "", 10, &p);
            assert!(!result.attempt_extraction);
            assert_eq!(result.reason, Decision::NotAllowed);
        }
    }

    #[test]
    fn test_never_and_disabled() {
        let never = policy(ParseMode::Never);
        assert_eq!(
            classify("a.pdf", "application/pdf", 1, &never).reason,
            Decision::ModeNever
        );

        let mut disabled = policy(ParseMode::Always);
        disabled.enabled = false;
        assert_eq!(
            classify("a.pdf", "application/pdf", 1, &disabled).reason,
            Decision::Disabled
        );
    }

    #[test]
    fn test_unsupported_never_extracted() {
        for mode in [ParseMode::Auto, ParseMode::Ask, ParseMode::Always] {
            let result = classify("legacy.rtf", "text/rtf", 10, &policy(mode));
            assert_eq!(result.kind, FormatKind::Unsupported);
            assert!(!result.attempt_extraction);
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let p = policy(ParseMode::Auto);
        let inputs = [
            ("a.pdf", "application/pdf", 10u64),
            ("b.docx", "", 10),
            ("c.rtf", "text/rtf", 10),
            ("d.bin", "application/octet-stream", 10),
        ];
        for (name, mime, size) in inputs {
            let first = classify(name, mime, size, &p);
            for _ in 0..5 {
                assert_eq!(classify(name, mime, size, &p), first);
            }
        }
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("logo.PNG", ""));
        assert!(is_image("x", "image/webp"));
        assert!(!is_image("notes.txt", "text/plain"));
    }
}
