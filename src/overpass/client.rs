use crate::error::{OverpassError, Result};
use crate::types::OverpassResponse;

use super::{OverpassClient, Transport};

impl OverpassClient {
    /// Posts the raw query text and returns the body. Non-2xx statuses,
    /// 429 included, come back as `OverpassError::Http`; retrying is up to
    /// the scheduler.
    pub fn send_overpass_query_string(&self, url: &str, query: &str) -> Result<String> {
        let mut response = self.agent.post(url).send(query)?;
        let body = response.body_mut().read_to_string()?;
        Ok(body)
    }
}

impl Transport for OverpassClient {
    fn send(&mut self, url: &str, query: &str) -> Result<OverpassResponse> {
        let body = self.send_overpass_query_string(url, query)?;
        parse_response(&body)
    }
}

/// Decodes an `[out:json]` body. Overpass reports runtime errors as HTML or
/// as a JSON `remark`; the former is a decode error, the latter is left to
/// the caller.
pub fn parse_response(body: &str) -> Result<OverpassResponse> {
    if body.trim_start().starts_with('<') {
        return Err(OverpassError::Decode(
            "expected JSON, got an HTML/XML error page".to_string(),
        ));
    }
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_error_page_is_rejected() {
        let err = parse_response("<?xml version=\"1.0\"?><html>rate limited</html>").unwrap_err();
        assert!(matches!(err, OverpassError::Decode(_)));
    }

    #[test]
    fn remark_is_kept() {
        let response = parse_response(
            r#"{"elements": [], "remark": "runtime error: Query timed out"}"#,
        )
        .unwrap();
        assert_eq!(response.remark.as_deref(), Some("runtime error: Query timed out"));
    }
}
