use once_cell::sync::Lazy;
use regex::Regex;

static ILLEGAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Turns a media title into a name that is legal on common filesystems.
///
/// `&` becomes the word "and", characters rejected by Windows or POSIX
/// filesystems are dropped, whitespace runs collapse to one space and the
/// result is trimmed. Applying it twice gives the same result as once.
pub fn sanitize_filename(name: &str) -> String {
    let name = name.replace('&', "and");
    let name = ILLEGAL_CHARS.replace_all(&name, "");
    let name = WHITESPACE.replace_all(&name, " ");
    name.trim().to_string()
}
