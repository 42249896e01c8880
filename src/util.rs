use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// share text usually wraps the link in prose, take the first url in it
static SOURCE_URL_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"https?://[a-zA-Z0-9./?=&_\-%]+").unwrap());

pub fn find_source_url(text: &str) -> Option<String> {
  let candidate = SOURCE_URL_REGEX.find(text)?.as_str();
  let url = Url::parse(candidate).ok()?;
  url.host_str()?;
  Some(candidate.to_owned())
}

// keep letters, digits, space and `._-`; runs of spaces left behind by
// dropped characters collapse into one.
pub fn sanitize_title(raw: &str) -> String {
  let kept = raw
    .chars()
    .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
    .collect::<String>();

  kept.split(' ').filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ")
}
