//! Classification of raw user input into a [`TransferRequest`].

use std::sync::LazyLock;

use courier_protocol::{ChatId, SourceKind, TransferRequest, parse_info_hash};
use regex::Regex;

use crate::error::PipelineError;

static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)https?://(?:[^/?#@\s]*@)?([a-z0-9.-]+)(?::\d{1,5})?(?:[/?#]\S*)?$")
        .expect("URL regex is valid")
});

/// Returns the lowercase host of an http(s) URL, `None` if `input` is not one.
pub(crate) fn http_host(input: &str) -> Option<String> {
    let host = HTTP_URL.captures(input)?.get(1)?.as_str();
    if host.is_empty() || host.starts_with('.') || host.ends_with('.') {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

pub(crate) fn is_magnet(input: &str) -> bool {
    input
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

/// Maps user input to a source kind.
pub struct Intake {
    streaming_host: Option<Regex>,
}

impl Intake {
    /// Builds a classifier routing hosts under `streaming_domains` (and their
    /// subdomains) to the streaming resolver.
    pub fn new(streaming_domains: &[String]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = streaming_domains
            .iter()
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .map(|d| regex::escape(&d))
            .collect();

        let streaming_host = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"^(?:[a-z0-9-]+\.)*(?:{})$",
                alternatives.join("|")
            ))?)
        };
        Ok(Self { streaming_host })
    }

    /// Classifies `input`, optionally constrained by the flow the user started
    /// (e.g. a torrent command expects a magnet link).
    pub fn classify(&self, input: &str, hint: Option<SourceKind>) -> Result<(SourceKind, String), PipelineError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PipelineError::InvalidInput("send a URL or a magnet link".into()));
        }

        if is_magnet(input) {
            if matches!(hint, Some(SourceKind::DirectUrl | SourceKind::StreamingUrl)) {
                return Err(PipelineError::InvalidInput(
                    "magnet links go through the torrent flow, use /torrent".into(),
                ));
            }
            if parse_info_hash(input).is_none() {
                return Err(PipelineError::InvalidInput(
                    "the magnet link has no valid xt=urn:btih: hash".into(),
                ));
            }
            return Ok((SourceKind::TorrentMagnet, input.to_string()));
        }

        if hint == Some(SourceKind::TorrentMagnet) {
            return Err(PipelineError::InvalidInput("please send a valid magnet link".into()));
        }

        let Some(host) = http_host(input) else {
            return Err(PipelineError::InvalidInput(format!("not a valid http(s) URL: {input}")));
        };

        let streaming = self
            .streaming_host
            .as_ref()
            .is_some_and(|re| re.is_match(&host));
        let kind = if streaming && hint != Some(SourceKind::DirectUrl) {
            SourceKind::StreamingUrl
        } else {
            SourceKind::DirectUrl
        };
        Ok((kind, input.to_string()))
    }

    /// Classifies `input` and wraps it in a fresh request for `chat`.
    pub fn request(
        &self,
        input: &str,
        hint: Option<SourceKind>,
        chat: ChatId,
    ) -> Result<TransferRequest, PipelineError> {
        let (kind, locator) = self.classify(input, hint)?;
        Ok(TransferRequest::new(kind, locator, chat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01&dn=x";

    fn intake() -> Intake {
        Intake::new(&["youtube.com".into(), "youtu.be".into()]).unwrap()
    }

    fn kind(input: &str, hint: Option<SourceKind>) -> Result<SourceKind, PipelineError> {
        intake().classify(input, hint).map(|(k, _)| k)
    }

    #[test]
    fn routes_by_scheme_and_host() {
        assert_eq!(kind("https://example.com/file.iso", None).unwrap(), SourceKind::DirectUrl);
        assert_eq!(kind("  https://youtu.be/abc  ", None).unwrap(), SourceKind::StreamingUrl);
        assert_eq!(
            kind("https://www.youtube.com/watch?v=abc", None).unwrap(),
            SourceKind::StreamingUrl
        );
        assert_eq!(kind(MAGNET, None).unwrap(), SourceKind::TorrentMagnet);
    }

    #[test]
    fn lookalike_hosts_are_not_streaming() {
        assert_eq!(
            kind("https://notyoutube.com/watch?v=abc", None).unwrap(),
            SourceKind::DirectUrl
        );
        assert_eq!(
            kind("https://youtube.com.evil.net/x", None).unwrap(),
            SourceKind::DirectUrl
        );
    }

    #[test]
    fn direct_hint_keeps_streaming_hosts_direct() {
        assert_eq!(
            kind("https://youtu.be/abc", Some(SourceKind::DirectUrl)).unwrap(),
            SourceKind::DirectUrl
        );
    }

    #[test]
    fn magnet_in_direct_flow_is_rejected() {
        let err = kind(MAGNET, Some(SourceKind::DirectUrl)).unwrap_err();
        assert!(err.to_string().contains("torrent flow"));
    }

    #[test]
    fn magnet_without_hash_is_invalid() {
        assert!(matches!(
            kind("magnet:?dn=nothing", None),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn torrent_flow_requires_magnet() {
        assert!(matches!(
            kind("https://example.com/x.torrent", Some(SourceKind::TorrentMagnet)),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        for input in ["", "   ", "ftp://example.com/x", "example.com/x", "https://", "https://exa mple.com"] {
            assert!(
                matches!(kind(input, None), Err(PipelineError::InvalidInput(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn no_streaming_domains_means_everything_is_direct() {
        let intake = Intake::new(&[]).unwrap();
        let (k, _) = intake.classify("https://youtu.be/abc", None).unwrap();
        assert_eq!(k, SourceKind::DirectUrl);
    }

    #[test]
    fn request_carries_locator_and_chat() {
        let req = intake().request(" https://example.com/a ", None, 42).unwrap();
        assert_eq!(req.locator(), "https://example.com/a");
        assert_eq!(req.chat_id(), 42);
        assert_eq!(req.source(), SourceKind::DirectUrl);
    }

    #[test]
    fn host_extraction() {
        assert_eq!(http_host("https://User@Example.COM:8080/p?q").as_deref(), Some("example.com"));
        assert_eq!(http_host("http://a.b/"), Some("a.b".into()));
        assert!(http_host("mailto:x@y").is_none());
    }
}
