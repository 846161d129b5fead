//! Transcript Rendering
//!
//! [`RenderCoalescer`] keeps a session transcript as HTML. Finished blocks
//! are rendered once and kept; the live assistant message is kept as
//! markdown and re-rendered in full on each tick, but only when fragments
//! arrived since the previous tick (or a flush is forced).
//!
//! Fragments are appended the moment they arrive, so skipping a tick never
//! loses text; it only delays when it becomes visible.

use std::time::Duration;

use pulldown_cmark::{html, Event, Options, Parser};

use crate::messages::Role;

/// Render markdown to an HTML fragment
///
/// Raw HTML in the source is shown as text, never passed through: model
/// output must not be able to add markup or scripts to the page.
#[must_use]
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Escape text for use inside HTML element content or attribute values
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn role_header(role: Role) -> String {
    format!(r#"<div class="role">{}</div>"#, role.display_label())
}

/// The assistant message currently streaming
#[derive(Debug, Default)]
struct LiveBlock {
    markdown: String,
    errors: Vec<String>,
}

impl LiveBlock {
    fn to_html(&self) -> String {
        let mut markdown = self.markdown.clone();
        for error in &self.errors {
            markdown.push_str(&format!("\n\n**Error:** {error}\n"));
        }
        format!("{}{}", role_header(Role::Assistant), render_markdown(&markdown))
    }
}

/// Throttles markdown re-rendering of a streaming transcript
#[derive(Debug)]
pub struct RenderCoalescer {
    interval: Duration,
    /// Rendered, no longer changing blocks
    frozen: Vec<String>,
    live: Option<LiveBlock>,
    dirty: bool,
    renders: u64,
}

impl RenderCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            frozen: Vec::new(),
            live: None,
            dirty: false,
            renders: 0,
        }
    }

    /// Tick interval the driver should use
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Pinned code shown at the top of the transcript
    pub fn push_code_context(&mut self, code: &str, lang: &str) {
        let lang = if lang.is_empty() { "plaintext" } else { lang };
        self.frozen.push(role_header(Role::System));
        self.frozen.push(format!(
            r#"<details open><summary style="cursor:pointer">Pinned code context ({lang})</summary><pre><code class="language-{lang}">{}</code></pre></details><hr/>"#,
            escape_html(code)
        ));
        self.dirty = true;
    }

    /// A finished message (user turns, restored history)
    pub fn push_message(&mut self, role: Role, markdown: &str) {
        self.freeze_live();
        self.frozen.push(role_header(role));
        self.frozen.push(render_markdown(markdown));
        self.dirty = true;
    }

    /// Open a new, empty assistant block
    pub fn begin_assistant(&mut self) {
        self.freeze_live();
        self.live = Some(LiveBlock::default());
        self.dirty = true;
    }

    /// Append streamed text to the live block
    pub fn push_fragment(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.live.get_or_insert_with(LiveBlock::default).markdown.push_str(text);
        self.dirty = true;
    }

    /// Show an error inline in the live block
    pub fn push_error(&mut self, message: &str) {
        self.live
            .get_or_insert_with(LiveBlock::default)
            .errors
            .push(message.to_string());
        self.dirty = true;
    }

    /// Freeze the live block
    pub fn finish_assistant(&mut self) {
        self.freeze_live();
        self.dirty = true;
    }

    fn freeze_live(&mut self) {
        if let Some(live) = self.live.take() {
            self.frozen.push(live.to_html());
        }
    }

    /// Whether fragments arrived since the last render
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.dirty
    }

    /// Number of renders performed so far
    #[must_use]
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Render if anything changed (or `force`), returning the full transcript
    pub fn tick(&mut self, force: bool) -> Option<String> {
        if !self.dirty && !force {
            return None;
        }
        self.dirty = false;
        self.renders += 1;
        Some(self.html())
    }

    /// Full transcript HTML, rendered now
    #[must_use]
    pub fn html(&self) -> String {
        let mut out: String = self.frozen.concat();
        if let Some(ref live) = self.live {
            out.push_str(&live.to_html());
        }
        out
    }
}

/// Wrap a transcript body in a standalone page
#[must_use]
pub fn html_document(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html><head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet"
  href="https://cdn.jsdelivr.net/npm/@highlightjs/cdn-assets@11.9.0/styles/github-dark.min.css">
<script src="https://cdn.jsdelivr.net/npm/@highlightjs/cdn-assets@11.9.0/highlight.min.js"></script>
<style>
  :root {{ --bg:#0f1115; --text:#e6e6e6; --muted:#9aa5b1; --accent:#4ec9b0; }}
  html, body {{ background: var(--bg); color: var(--text); margin:0; padding:0; }}
  body {{ font: 14px/1.5 -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "JetBrains Mono", monospace; }}
  #wrap {{ padding: 16px 18px; }}
  h1,h2,h3 {{ color: var(--accent); margin: 14px 0 8px; }}
  pre {{ background: #23272e; padding: 12px; border-radius: 8px; overflow:auto; }}
  code {{ background: #23272e; padding: 2px 4px; border-radius: 4px; }}
  .role {{ color: var(--muted); font-size: 12px; margin: 10px 0 4px; }}
  hr {{ border:0; height:1px; background:#2b3137; margin:16px 0; }}
</style>
<script>document.addEventListener('DOMContentLoaded', () => {{ try {{ hljs.highlightAll(); }} catch (e) {{}} }});</script>
</head><body><div id="wrap">{body}</div></body></html>
"#,
        title = escape_html(title),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn coalescer() -> RenderCoalescer {
        RenderCoalescer::new(Duration::from_millis(80))
    }

    #[test]
    fn test_tick_only_renders_when_dirty() {
        let mut c = coalescer();
        assert_eq!(c.tick(false), None);

        c.begin_assistant();
        assert!(c.tick(false).is_some());
        assert_eq!(c.tick(false), None);

        c.push_fragment("hel");
        c.push_fragment("lo");
        let html = c.tick(false).unwrap();
        assert!(html.contains("<p>hello</p>"));
        assert_eq!(c.render_count(), 2);
        assert_eq!(c.tick(false), None);
    }

    #[test]
    fn test_forced_flush_renders_without_changes() {
        let mut c = coalescer();
        assert!(c.tick(true).is_some());
        assert!(c.tick(true).is_some());
        assert_eq!(c.render_count(), 2);
    }

    #[test]
    fn test_live_block_is_reparsed_whole() {
        let mut c = coalescer();
        c.begin_assistant();
        c.push_fragment("```rust\nfn x");
        let partial = c.tick(false).unwrap();
        assert!(partial.contains("<code class=\"language-rust\">fn x"));

        c.push_fragment("() {}\n```\n\nDone.");
        let full = c.tick(false).unwrap();
        assert!(full.contains("fn x() {}"));
        assert!(full.contains("<p>Done.</p>"));
    }

    #[test]
    fn test_transcript_order_and_labels() {
        let mut c = coalescer();
        c.push_code_context("if a < b {}", "rust");
        c.push_message(Role::User, "Why?");
        c.begin_assistant();
        c.push_fragment("Because.");
        c.finish_assistant();

        let html = c.html();
        let system = html.find(r#"<div class="role">system</div>"#).unwrap();
        let you = html.find(r#"<div class="role">you</div>"#).unwrap();
        let assistant = html.find(r#"<div class="role">assistant</div>"#).unwrap();
        assert!(system < you && you < assistant);
        assert!(html.contains("Pinned code context (rust)"));
        assert!(html.contains("if a &lt; b {}"));
        assert!(html.contains("<p>Because.</p>"));
    }

    #[test]
    fn test_errors_render_inline() {
        let mut c = coalescer();
        c.begin_assistant();
        c.push_fragment("partial");
        c.push_error("HTTP 500: boom");
        let html = c.tick(false).unwrap();
        assert!(html.contains("<p>partial</p>"));
        assert!(html.contains("<strong>Error:</strong> HTTP 500: boom"));
    }

    #[test]
    fn test_raw_html_in_replies_is_escaped() {
        let mut c = coalescer();
        c.begin_assistant();
        c.push_fragment("<script>alert(1)</script>\n<img src=x onerror=alert(2)>\n\nInline <b>bold</b> too.");
        let html = c.tick(true).unwrap();

        assert!(!html.contains("<script>"));
        assert!(!html.contains("<img"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains("&lt;b&gt;bold&lt;/b&gt;"));
    }

    #[test]
    fn test_html_inside_code_stays_code() {
        let html = render_markdown("```html\n<div>x</div>\n```");
        assert!(html.contains("&lt;div&gt;x&lt;/div&gt;"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_html_document_wraps_body() {
        let page = html_document("a<b", "<p>x</p>");
        assert!(page.starts_with("<!doctype html>"));
        assert!(page.contains("<title>a&lt;b</title>"));
        assert!(page.contains(r#"<div id="wrap"><p>x</p></div>"#));
    }
}
