//! HTML envelope
//!
//! A container can travel as a self-contained HTML page. The page carries
//! the container and its manifest as base64 in hidden inputs and hands them
//! to a secure reader through a message channel on the transfer origin.

use std::fmt::Write as _;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use reqwest::Url;

use crate::error::TdfError;

const PAYLOAD_PATTERN: &str = r#"<input id=['"]?data-input['"]?[^>]*value=['"]?([a-zA-Z0-9+/=]+)['"]?"#;

fn escape_html(text: &str) -> String {
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

fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_' | ' ' | ':' | '/' | '-') {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04x}", unit);
            }
        }
    }
    out
}

/// Render a container as an HTML page
///
/// `transfer_url` must be an absolute URL; its origin is the only target
/// the page will post the payload to.
pub fn wrap_html(payload: &[u8], manifest_json: &str, transfer_url: &str) -> Result<String, TdfError> {
    let parsed = Url::parse(transfer_url)
        .map_err(|e| TdfError::options(format!("invalid transfer URL '{}': {}", transfer_url, e)))?;
    let origin = parsed.origin().ascii_serialization();

    Ok(format!(
        r#"<html>
  <head>
    <meta charset="UTF-8">
  </head>
  <body style="font-family: Arial; margin: 0;">
    <input id="data-input" type="hidden" value="{payload}">
    <input id="data-manifest" type="hidden" value="{manifest}">
    <iframe style="width:0;height:0;border:none;" src="{transfer_url}"></iframe>
    <noscript>To view this file, download it and open it from your computer.</noscript>
    <script type="text/javascript">
      var data = document.getElementById('data-input').value;
      var manifest = JSON.parse(atob(document.getElementById('data-manifest').value));
      var frame = document.querySelector('iframe');
      frame.addEventListener('load', function () {{
        var channel = new MessageChannel();
        frame.contentWindow.postMessage({{
          type: 'tdf.html',
          data: data,
          policy: manifest.encryptionInformation.policy
        }}, '{origin}', [channel.port2]);
        channel.port1.onmessage = function (e) {{
          if (e.data && e.data.redirect) {{
            window.location.href = '{origin}' + e.data.redirect;
          }}
        }};
      }}, false);
    </script>
  </body>
</html>
"#,
        payload = escape_html(&BASE64.encode(payload)),
        manifest = escape_html(&BASE64.encode(manifest_json)),
        transfer_url = escape_html(transfer_url),
        origin = escape_js(&origin),
    ))
}

/// Extract the container bytes from an HTML envelope
pub fn unwrap_html(html: &str) -> Result<Vec<u8>, TdfError> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(PAYLOAD_PATTERN).ok())
        .as_ref()
        .ok_or_else(|| TdfError::PayloadExtraction {
            reason: "payload pattern failed to compile".to_string(),
        })?;

    let encoded = pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| TdfError::PayloadExtraction {
            reason: "no data-input element found".to_string(),
        })?;
    BASE64
        .decode(encoded.as_str())
        .map_err(|e| TdfError::PayloadExtraction {
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_then_unwrap() {
        let payload = b"PK\x03\x04 container bytes";
        let html = wrap_html(payload, r#"{"a":1}"#, "https://reader.example.com/start?x=1").unwrap();
        assert!(html.contains(r#"src="https://reader.example.com/start?x=1""#));
        assert!(html.contains(r#"'https://reader.example.com'"#));
        assert_eq!(unwrap_html(&html).unwrap(), payload);
    }

    #[test]
    fn test_payload_with_slashes_survives() {
        let payload = [0xffu8, 0xff, 0xfe, 0x3f, 0xbf];
        let html = wrap_html(&payload, "{}", "https://reader.example.com").unwrap();
        assert_eq!(unwrap_html(&html).unwrap(), payload);
    }

    #[test]
    fn test_single_quoted_input_accepted() {
        let html = "<input id='data-input' type='hidden' value='aGVsbG8='>";
        assert_eq!(unwrap_html(html).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_input_rejected() {
        let err = unwrap_html("<html></html>").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("There was a problem extracting the TDF3 payload"));
    }

    #[test]
    fn test_relative_transfer_url_rejected() {
        assert!(matches!(
            wrap_html(b"x", "{}", "/relative"),
            Err(TdfError::InvalidOptions { .. })
        ));
    }
}
