use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::KiraError;

/// A fully built GET request: base URL, query parameters, headers and a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl PageRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            timeout,
        }
    }

    /// Sets a header, replacing an earlier value under the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_param(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    /// Replaces URL and parameters with the ones carried by `url_with_params`,
    /// keeping headers and timeout.
    pub fn adopt_url(&mut self, url_with_params: &str) -> Result<(), KiraError> {
        let (base, params) = split_url(url_with_params)?;
        self.url = base;
        self.params = params;
        Ok(())
    }

    pub fn full_url(&self) -> String {
        match Url::parse_with_params(&self.url, &self.params) {
            Ok(url) => url.to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

/// Splits `https://host/path?a=1&b=2` into the base URL and decoded parameters.
pub fn split_url(url_with_params: &str) -> Result<(String, Vec<(String, String)>), KiraError> {
    let mut url = Url::parse(url_with_params)
        .map_err(|err| KiraError::Http(format!("{url_with_params}: {err}")))?;
    let params = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect::<Vec<_>>();
    url.set_query(None);
    url.set_fragment(None);
    Ok((url.to_string(), params))
}

/// One HTTP response as the adapters see it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub status: u16,
    /// URL after redirects; some repositories only reveal their defaults here.
    pub final_url: String,
    /// `None` for an empty body.
    pub body: Option<Value>,
}

impl RawPage {
    pub fn ok(final_url: impl Into<String>, body: Value) -> Self {
        Self {
            status: 200,
            final_url: final_url.into(),
            body: Some(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Empty text, `null`, `[]` and `{}` all count as an empty body.
    pub fn is_empty_body(&self) -> bool {
        match &self.body {
            None | Some(Value::Null) => true,
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        }
    }
}

/// A response body before JSON decoding, for endpoints that answer plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPage {
    pub status: u16,
    pub final_url: String,
    pub text: String,
}

impl TextPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    fn get(&self, request: &PageRequest) -> Result<RawPage, KiraError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-em/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| KiraError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport {
    /// Sends `request` and returns the undecoded body. Retryable statuses and
    /// connection failures come back as `TransientNetwork`.
    pub fn fetch_text(&self, request: &PageRequest) -> Result<TextPage, KiraError> {
        let mut builder = self
            .client
            .get(&request.url)
            .query(&request.params)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::debug!(url = %request.full_url(), "GET");
        let response = builder.send().map_err(classify_error)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        if is_retryable_status(status) {
            return Err(KiraError::TransientNetwork(format!(
                "status {status} from {final_url}"
            )));
        }

        let text = response.text().map_err(classify_error)?;
        Ok(TextPage {
            status,
            final_url,
            text,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &PageRequest) -> Result<RawPage, KiraError> {
        let TextPage {
            status,
            final_url,
            text,
        } = self.fetch_text(request)?;
        let body = if text.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => Some(value),
                Err(_) if !(200..300).contains(&status) => None,
                Err(err) => {
                    return Err(KiraError::MalformedResponse {
                        source_name: host_label(&final_url),
                        message: err.to_string(),
                    });
                }
            }
        };

        Ok(RawPage {
            status,
            final_url,
            body,
        })
    }
}

fn host_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()))
        .unwrap_or_else(|| url.to_string())
}

fn classify_error(err: reqwest::Error) -> KiraError {
    if is_retryable_error(&err) {
        KiraError::TransientNetwork(err.to_string())
    } else {
        KiraError::Http(err.to_string())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn split_url_decodes_parameters() {
        let (base, params) = split_url(
            "https://www.ebi.ac.uk/pride/ws/archive/v2/spectra?peptideSequence=TCVADESAENCDK&page=0&pageSize=100&sortDirection=DESC",
        )
        .unwrap();
        assert_eq!(base, "https://www.ebi.ac.uk/pride/ws/archive/v2/spectra");
        assert_eq!(params.len(), 4);
        assert_eq!(params[1], ("page".to_string(), "0".to_string()));
    }

    #[test]
    fn set_param_replaces_existing_value() {
        let mut request = PageRequest::new("https://example.org/psms", Duration::from_secs(1))
            .with_param("pageNumber", "1");
        request.set_param("pageNumber", "2");
        assert_eq!(request.param("pageNumber"), Some("2"));
        assert_eq!(request.params.len(), 1);
    }

    #[test]
    fn only_throttling_and_gateway_statuses_are_retryable() {
        for status in [429, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 400, 404, 500, 501] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn with_header_replaces_accept() {
        let request = PageRequest::new("https://example.org", Duration::from_secs(1))
            .with_header("accept", "text/plain");
        assert_eq!(
            request.headers,
            vec![("Accept".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn empty_bodies() {
        let mut page = RawPage::ok("https://example.org", json!([]));
        assert!(page.is_empty_body());
        page.body = Some(json!({}));
        assert!(page.is_empty_body());
        page.body = None;
        assert!(page.is_empty_body());
        page.body = Some(json!([{"usi": "x"}]));
        assert!(!page.is_empty_body());
    }
}
