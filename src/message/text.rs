//! HTML to plain-text conversion for the text alternative of a message.
//!
//! The conversion is a pure function: the same HTML always yields the same
//! bytes, and running it on its own output changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;

/// Line-break tags, replaced by a newline.
static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)<br[^>]*?>").expect("line break pattern"));

/// Elements removed together with their content.
static INVISIBLE_ELEMENTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?si)<applet[^>]*?.*?</applet>",
        r"(?si)<embed[^>]*?.*?</embed>",
        r"(?si)<head[^>]*?>.*?</head>",
        r"(?si)<noframes[^>]*?.*?</noframes>",
        r"(?si)<noscript[^>]*?.*?</noscript>",
        r"(?si)<noembed[^>]*?.*?</noembed>",
        r"(?si)<object[^>]*?.*?</object>",
        r"(?si)<script[^>]*?.*?</script>",
        r"(?si)<style[^>]*?>.*?</style>",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("invisible element pattern"))
    .collect()
});

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"));

/// Any remaining tag; a `<` followed by whitespace or a digit is text.
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[a-zA-Z/!?][^>]*>").expect("tag pattern"));

static LINE_ENDING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\r|\r\n").expect("line ending pattern"));

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank lines pattern"));

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("spaces pattern"));

/// Characters trimmed from each line and from the whole text.
const TRIMMED: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

/// Converts an HTML document into its plain-text alternative.
///
/// Entities are decoded first, `<br>` becomes a newline, non-visible
/// elements (`head`, `script`, `style`, embedded objects...) are dropped with
/// their content, remaining tags are stripped, then whitespace is normalized.
/// The result always ends with exactly one newline.
pub fn html_to_text(html: &str) -> String {
    let text = html_escape::decode_html_entities(html);
    let text = LINE_BREAK.replace_all(&text, "\n");

    let mut text = text.into_owned();
    for element in INVISIBLE_ELEMENTS.iter() {
        text = element.replace_all(&text, "").into_owned();
    }
    let text = COMMENT.replace_all(&text, "");
    let text = TAG.replace_all(&text, "");

    let text = text.replace('\t', "");
    let text = LINE_ENDING.replace_all(&text, "\n");
    let text = SPACES.replace_all(&text, " ");

    let text = text
        .split('\n')
        .map(|line| line.trim_matches(TRIMMED))
        .collect::<Vec<_>>()
        .join("\n");
    let text = BLANK_LINES.replace_all(&text, "\n\n");

    let mut out = text.trim_matches(TRIMMED).to_string();
    out.push('\n');
    out
}
