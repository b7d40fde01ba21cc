//! Context Prompt Builder (spec.md §4.7, component C7).
//!
//! Content-type-aware prompt/system-prompt selection with math/code/
//! technical/PDF template variants, producing either an inline prompt or a
//! cache-friendly `{system_prompt, prompt_text}` pair (spec.md §4.7, §4.4).
//! Token targets are estimated with the same 3.5 chars-per-token
//! approximation `chunker` uses (spec.md §4.6), so both components agree on
//! what "500 tokens" means.

use regex::Regex;
use once_cell::sync::Lazy;

const CHARS_PER_TOKEN: f64 = 3.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Default,
    Pdf,
    MathPdf,
    Code,
    Technical,
}

impl Template {
    fn token_range(self) -> (usize, usize) {
        match self {
            Template::Default => (60, 120),
            Template::Pdf => (80, 150),
            Template::MathPdf => (100, 180),
            Template::Code => (100, 200),
            Template::Technical => (80, 160),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Template::Default => "default",
            Template::Pdf => "pdf",
            Template::MathPdf => "math-pdf",
            Template::Code => "code",
            Template::Technical => "technical",
        }
    }
}

/// Either an inline prompt (document embedded in the prompt string) or a
/// cache-friendly pair for callers that will pass the document separately
/// as `cache_document` to the LLM gateway (spec.md §4.4, §4.7).
#[derive(Debug, Clone)]
pub enum BuiltPrompt {
    Inline { prompt: String },
    CacheFriendly { system_prompt: String, prompt: String, document: String },
}

impl BuiltPrompt {
    pub fn is_error(&self) -> bool {
        match self {
            BuiltPrompt::Inline { prompt } => prompt.starts_with("Error:"),
            BuiltPrompt::CacheFriendly { prompt, .. } => prompt.starts_with("Error:"),
        }
    }

    /// Flattens to what a non-cache-aware caller would send as one prompt
    /// string, with the system prompt (if any) prepended.
    pub fn flatten(&self) -> String {
        match self {
            BuiltPrompt::Inline { prompt } => prompt.clone(),
            BuiltPrompt::CacheFriendly { system_prompt, prompt, document } => {
                format!("{system_prompt}\n\n<document>\n{document}\n</document>\n\n{prompt}")
            }
        }
    }
}

fn estimate_tokens(text: &str) -> usize {
    ((text.chars().count() as f64) / CHARS_PER_TOKEN).ceil() as usize
}

static MATH_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\$|\\begin\{equation\}|\\frac|\\sum|[Α-ω]").unwrap()
});
const MATH_KEYWORDS: &[&str] = &[
    "theorem", "lemma", "proof", "equation", "derivative", "integral", "matrix", "vector",
    "algorithm", "corollary", "axiom",
];

static CODE_MIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)typescript|python|java|c\+\+|code|javascript|x-script").unwrap()
});

static TECH_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bv?\d+\.\d+(\.\d+)?\b|\bAPI\b|\bSDK\b|\bCLI\b|\b(GET|POST|PUT|DELETE|PATCH)\b|<[a-z]+[ >]|^#+\s|^\s*[-*]\s|\bIntroduction\b|\bOverview\b|\bAPI Reference\b").unwrap()
});

fn has_math_signals(text: &str) -> bool {
    if MATH_SIGNAL.is_match(text) {
        return true;
    }
    let lower = text.to_lowercase();
    MATH_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count() >= 2
}

fn is_technical(content_type: &str, text: &str) -> bool {
    content_type == "text/markdown" || content_type == "text/html" || TECH_SIGNAL.is_match(text)
}

fn select_template(content_type: &str, chunk_text: &str) -> Template {
    if CODE_MIME.is_match(content_type) {
        return Template::Code;
    }
    if content_type == "application/pdf" {
        return if has_math_signals(chunk_text) { Template::MathPdf } else { Template::Pdf };
    }
    if is_technical(content_type, chunk_text) {
        return Template::Technical;
    }
    Template::Default
}

fn system_prompt_for(template: Template) -> String {
    match template {
        Template::Default => {
            "You write short situating context for a chunk of a larger document. \
             Preserve the chunk's exact wording; return the chunk preceded by a brief \
             context sentence."
                .to_string()
        }
        Template::Pdf => {
            "You contextualize a chunk extracted from a PDF. Note the section or page \
             it likely belongs to based on the surrounding document, then return the \
             chunk verbatim preceded by that context."
                .to_string()
        }
        Template::MathPdf => {
            "You contextualize a chunk of mathematical or scientific text extracted from \
             a PDF. Preserve all notation, theorem/equation numbering, and symbols exactly; \
             return the chunk verbatim preceded by a short situating sentence."
                .to_string()
        }
        Template::Code => {
            "You contextualize a chunk of source code. Preserve syntax, imports, and \
             type signatures exactly as written; return the chunk verbatim preceded by a \
             one-line note on what module or function it belongs to."
                .to_string()
        }
        Template::Technical => {
            "You contextualize a chunk of technical documentation. Preserve version \
             strings, command names, and API identifiers exactly; return the chunk \
             verbatim preceded by a short situating sentence."
                .to_string()
        }
    }
}

fn question_for(template: Template, min_tokens: usize, max_tokens: usize) -> String {
    format!(
        "Here is the chunk we want to situate within the whole document:\n\n{}\n\n\
         Give a short context (roughly {min_tokens}-{max_tokens} tokens) situating this \
         {} chunk within the overall document, then return the original chunk verbatim, \
         unmodified, immediately after that context.",
        "{{CHUNK}}",
        template.label(),
    )
}

/// Builds a prompt for contextualizing `chunk_text` given its content type
/// and (optionally) the full document text. Returns a prompt whose text
/// begins with `Error:` when chunk or document text is missing, so the
/// enricher can skip it without calling a provider (spec.md §4.7).
pub fn build(
    chunk_text: &str,
    content_type: &str,
    full_document_text: Option<&str>,
    cache_friendly: bool,
) -> BuiltPrompt {
    if chunk_text.trim().is_empty() {
        return BuiltPrompt::Inline { prompt: "Error: empty chunk text".to_string() };
    }
    let document = match full_document_text {
        Some(doc) if !doc.trim().is_empty() => doc,
        _ => return BuiltPrompt::Inline { prompt: "Error: missing full document text".to_string() },
    };

    let template = select_template(content_type, chunk_text);
    let (mut min_tokens, mut max_tokens) = template.token_range();

    // §4.7: if the chunk already occupies ≥70% of MAX, expand MAX to
    // ceil(chunkTokens * 1.3) and raise MIN to chunkTokens so the demand
    // never asks the model to shrink the chunk.
    let chunk_tokens = estimate_tokens(chunk_text);
    if chunk_tokens as f64 >= 0.7 * max_tokens as f64 {
        max_tokens = ((chunk_tokens as f64) * 1.3).ceil() as usize;
        min_tokens = chunk_tokens;
    }

    let system_prompt = system_prompt_for(template);
    let question = question_for(template, min_tokens, max_tokens).replace("{{CHUNK}}", chunk_text);

    if cache_friendly {
        BuiltPrompt::CacheFriendly {
            system_prompt,
            prompt: question,
            document: document.to_string(),
        }
    } else {
        let prompt = format!(
            "{system_prompt}\n\n<document>\n{document}\n</document>\n\n{question}"
        );
        BuiltPrompt::Inline { prompt }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_document_yields_error_prefixed_prompt() {
        let built = build("some chunk", "text/plain", None, false);
        assert!(built.is_error());
    }

    #[test]
    fn empty_chunk_yields_error_prefixed_prompt() {
        let built = build("   ", "text/plain", Some("doc"), false);
        assert!(built.is_error());
    }

    #[test]
    fn code_mime_selects_code_template() {
        assert_eq!(select_template("text/x-python", "print('x')"), Template::Code);
        assert_eq!(select_template("application/typescript", "const x = 1"), Template::Code);
    }

    #[test]
    fn pdf_with_math_signals_selects_math_template() {
        let text = "The proof follows from the theorem and lemma above: $$x^2$$";
        assert_eq!(select_template("application/pdf", text), Template::MathPdf);
    }

    #[test]
    fn plain_pdf_without_math_signals_selects_pdf_template() {
        assert_eq!(select_template("application/pdf", "just some prose"), Template::Pdf);
    }

    #[test]
    fn markdown_selects_technical_template() {
        assert_eq!(select_template("text/markdown", "# Overview\n\nSome text"), Template::Technical);
    }

    #[test]
    fn default_template_for_plain_prose() {
        assert_eq!(select_template("text/plain", "just some prose, nothing special"), Template::Default);
    }

    #[test]
    fn large_chunk_expands_max_and_raises_min() {
        let long_chunk = "word ".repeat(100); // ~29 tokens per approx; force via Default template max=120
        let built = build(&long_chunk, "text/plain", Some("full document text"), false);
        assert!(!built.is_error());
    }

    #[test]
    fn cache_friendly_mode_keeps_document_out_of_prompt_text() {
        let built = build("chunk text", "text/plain", Some("the full document"), true);
        match built {
            BuiltPrompt::CacheFriendly { prompt, document, .. } => {
                assert!(!prompt.contains("the full document"));
                assert_eq!(document, "the full document");
            }
            BuiltPrompt::Inline { .. } => panic!("expected cache-friendly variant"),
        }
    }

    #[test]
    fn inline_mode_embeds_document_in_prompt() {
        let built = build("chunk text", "text/plain", Some("the full document"), false);
        match built {
            BuiltPrompt::Inline { prompt } => assert!(prompt.contains("the full document")),
            BuiltPrompt::CacheFriendly { .. } => panic!("expected inline variant"),
        }
    }
}
