//! Conversion between the remote network's markup (plain text + mention
//! offsets + quoted-reply metadata) and the Matrix event model.
//!
//! Mention offsets are measured in UTF-16 code units on both sides.

use msgr_client::types::Mention;

use crate::matrix::EventContent;

/// Compile a regex once, on first use.
macro_rules! regex {
    ($pattern:literal) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($pattern).expect("static regex is valid"))
    }};
}

/// What a Matrix message becomes on the messenger side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendParams {
    pub text: String,
    pub mentions: Vec<Mention>,
}

fn utf16_len(text: &str) -> i32 {
    text.encode_utf16().count() as i32
}

/// Convert a Matrix message body to messenger text plus mention entities.
///
/// `resolve_mxid` maps a Matrix user id to a remote user id; mentions of
/// unbridged users fall back to their display text.
pub fn matrix_to_messenger(
    body: &str,
    formatted_body: Option<&str>,
    resolve_mxid: impl Fn(&str) -> Option<i64>,
) -> SendParams {
    let Some(html) = formatted_body else {
        return SendParams {
            text: body.to_string(),
            mentions: Vec::new(),
        };
    };

    // Strip the reply fallback before converting.
    let html = regex!(r"(?s)<mx-reply>.*?</mx-reply>").replace(html, "");

    let mut mentions = Vec::new();
    let mut text = String::new();
    let mention_re =
        regex!(r#"<a href="https://matrix\.to/#/(@[^"]+)"(?:[^>]*)>([^<]*)</a>"#);
    let mut last_end = 0;
    for capture in mention_re.captures_iter(&html) {
        let whole = capture.get(0).unwrap();
        text.push_str(&html_to_text(&html[last_end..whole.start()]));
        let mxid = &capture[1];
        let display = &capture[2];
        match resolve_mxid(mxid) {
            Some(fbid) => {
                let offset = utf16_len(&text);
                text.push_str(display);
                mentions.push(Mention::new(offset, utf16_len(display), fbid));
            }
            None => text.push_str(display),
        }
        last_end = whole.end();
    }
    text.push_str(&html_to_text(&html[last_end..]));

    SendParams {
        text: text.trim_end().to_string(),
        mentions,
    }
}

/// Reduce Matrix HTML to the remote network's plain-text markup.
fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    let passes: &[(&regex::Regex, &str)] = &[
        (regex!(r"(?s)<(?:b|strong)>(.*?)</(?:b|strong)>"), "*$1*"),
        (regex!(r"(?s)<(?:i|em)>(.*?)</(?:i|em)>"), "_$1_"),
        (regex!(r"(?s)<(?:del|s|strike)>(.*?)</(?:del|s|strike)>"), "~$1~"),
        (
            regex!(r#"(?s)<pre><code(?: class="language-(\w*)")?>(.*?)</code></pre>"#),
            "```$1\n$2```",
        ),
        (regex!(r"(?s)<code>(.*?)</code>"), "`$1`"),
        (regex!(r#"(?s)<a href="([^"]+)">(.*?)</a>"#), "$2 ($1)"),
        (regex!(r"<br ?/?>"), "\n"),
    ];
    for (re, replacement) in passes {
        text = re.replace_all(&text, *replacement).to_string();
    }
    // Quote blocks become "> " prefixed lines.
    while let Some(capture) = regex!(r"(?s)<blockquote>(.*?)</blockquote>").captures(&text) {
        let quoted: String = capture[1]
            .trim()
            .lines()
            .map(|line| format!("> {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        text = text.replacen(&capture[0], &quoted, 1);
    }
    let text = regex!(r"</?[a-zA-Z][^>]*>").replace_all(&text, "");
    unescape_entities(&text)
}

fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn escape_entities(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Convert remote text plus mentions into Matrix message content.
///
/// `resolve_fbid` maps a remote user id to `(matrix id, display name)` for
/// mention pills.
pub fn messenger_to_matrix(
    text: &str,
    mentions: &[Mention],
    resolve_fbid: impl Fn(i64) -> Option<(String, String)>,
) -> EventContent {
    if mentions.is_empty() {
        return EventContent::Text {
            body: text.to_string(),
            html: None,
        };
    }

    let utf16: Vec<u16> = text.encode_utf16().collect();
    let mut html = String::new();
    let mut cursor = 0usize;
    let mut any_pill = false;
    let mut sorted: Vec<&Mention> = mentions.iter().collect();
    sorted.sort_by_key(|mention| mention.offset);
    for mention in sorted {
        let start = mention.offset.max(0) as usize;
        let end = (mention.offset + mention.length).max(0) as usize;
        if start > utf16.len() || end > utf16.len() || start < cursor {
            continue;
        }
        html.push_str(&escape_entities(&String::from_utf16_lossy(
            &utf16[cursor..start],
        )));
        let display = String::from_utf16_lossy(&utf16[start..end]);
        match mention
            .user_id
            .parse::<i64>()
            .ok()
            .and_then(&resolve_fbid)
        {
            Some((mxid, name)) => {
                let label = if name.is_empty() { display.clone() } else { name };
                html.push_str(&format!(
                    r#"<a href="https://matrix.to/#/{mxid}">{}</a>"#,
                    escape_entities(&label),
                ));
                any_pill = true;
            }
            None => html.push_str(&escape_entities(&display)),
        }
        cursor = end;
    }
    html.push_str(&escape_entities(&String::from_utf16_lossy(&utf16[cursor..])));

    EventContent::Text {
        body: text.to_string(),
        html: any_pill.then_some(html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_body_passes_through() {
        let params = matrix_to_messenger("hi there", None, |_| None);
        assert_eq!(params.text, "hi there");
        assert!(params.mentions.is_empty());
    }

    #[test]
    fn html_formatting_becomes_remote_markup() {
        let params = matrix_to_messenger(
            "fallback",
            Some("<b>bold</b> and <em>italic</em> and <code>mono</code>"),
            |_| None,
        );
        assert_eq!(params.text, "*bold* and _italic_ and `mono`");
    }

    #[test]
    fn mention_offsets_use_utf16_units() {
        let html = r#"\u{1F600} <a href="https://matrix.to/#/@facebook_42:example.com">Ann</a>"#;
        // Use a literal emoji (2 UTF-16 units) before the mention.
        let html = html.replace("\\u{1F600}", "\u{1F600}");
        let params = matrix_to_messenger("fallback", Some(&html), |mxid| {
            (mxid == "@facebook_42:example.com").then_some(42)
        });
        assert_eq!(params.text, "\u{1F600} Ann");
        assert_eq!(params.mentions.len(), 1);
        assert_eq!(params.mentions[0].offset, 3);
        assert_eq!(params.mentions[0].length, 3);
        assert_eq!(params.mentions[0].user_id, "42");
    }

    #[test]
    fn reply_fallback_is_stripped() {
        let html = "<mx-reply><blockquote>old message</blockquote></mx-reply>new text";
        let params = matrix_to_messenger("fallback", Some(html), |_| None);
        assert_eq!(params.text, "new text");
    }

    #[test]
    fn remote_mentions_become_pills() {
        let text = "hey Ann!";
        let mentions = vec![Mention::new(4, 3, 42)];
        let content = messenger_to_matrix(text, &mentions, |fbid| {
            (fbid == 42).then(|| ("@facebook_42:example.com".to_string(), "Ann".to_string()))
        });
        match content {
            EventContent::Text { body, html } => {
                assert_eq!(body, "hey Ann!");
                assert_eq!(
                    html.unwrap(),
                    r#"hey <a href="https://matrix.to/#/@facebook_42:example.com">Ann</a>!"#,
                );
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn unresolvable_mentions_fall_back_to_plain_text() {
        let content = messenger_to_matrix("hi Bob", &[Mention::new(3, 3, 99)], |_| None);
        match content {
            EventContent::Text { html, .. } => assert!(html.is_none()),
            other => panic!("unexpected content {other:?}"),
        }
    }
}
