//! Application options for opening a channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use webchannel_core::{ChannelConfig, ConnectRequest};

/// Path appended to the channel URL when no test URL is given.
const DEFAULT_TEST_PATH: &str = "test";

/// Path appended to the channel URL for data requests.
const DEFAULT_BIND_PATH: &str = "bind";

/// Options accepted by [`crate::WebChannel::open`].
///
/// Deserializable so applications can keep them in their own config files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Headers sent with every request
    pub message_headers: BTreeMap<String, String>,

    /// Headers sent with the handshake only
    pub init_message_headers: BTreeMap<String, String>,

    /// Query parameters added to every data request
    pub message_url_params: BTreeMap<String, String>,

    /// Send `X-Client-Protocol: webchannel`
    pub client_protocol_header_required: bool,

    /// Forward requests allowed in flight once multiplexing is available
    pub concurrent_request_limit: Option<usize>,

    /// Connection-test endpoint; defaults to `<url>/test`
    pub test_url: Option<String>,

    /// Wrap JSON messages as `{"__data__": "<json>"}`
    pub send_raw_json: bool,

    /// Query parameter that carries the server's HTTP session id
    pub http_session_id_param: Option<String>,

    /// Skip the connection test and assume streaming works
    pub background_channel_test: bool,

    /// Start with one forward slot until the server advertises h2/spdy/quic
    pub negotiate_multiplexing: bool,

    /// Fail on the first forward error instead of retrying
    pub fail_fast: bool,
}

impl ChannelOptions {
    /// Engine configuration for these options.
    #[must_use]
    pub fn to_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::default()
            .with_client_protocol_header(self.client_protocol_header_required)
            .with_background_channel_test(self.background_channel_test)
            .with_negotiated_multiplexing(self.negotiate_multiplexing)
            .with_fail_fast(self.fail_fast);
        if let Some(limit) = self.concurrent_request_limit {
            config = config.with_concurrent_request_limit(limit);
        }
        if let Some(param) = &self.http_session_id_param {
            config = config.with_http_session_id_param(param.clone());
        }
        for (name, value) in &self.message_headers {
            config = config.with_message_header(name.clone(), value.clone());
        }
        for (name, value) in &self.init_message_headers {
            config = config.with_init_message_header(name.clone(), value.clone());
        }
        config
    }

    /// Connect request for the channel at `url`.
    ///
    /// Data requests go to `<url>/bind`, the connection test to
    /// [`ChannelOptions::test_url`] or `<url>/test`.
    ///
    /// # Errors
    ///
    /// Returns [`webchannel_core::Error::InvalidUrl`] when a URL does not parse.
    pub fn connect_request(&self, url: &str) -> webchannel_core::Result<ConnectRequest> {
        let base = url.trim_end_matches('/');
        let test_url = self
            .test_url
            .clone()
            .unwrap_or_else(|| format!("{base}/{DEFAULT_TEST_PATH}"));
        let channel_url = format!("{base}/{DEFAULT_BIND_PATH}");

        let mut request = ConnectRequest::new(&test_url, &channel_url)?;
        for (name, value) in &self.message_url_params {
            request = request.with_param(name.clone(), value.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let request = ChannelOptions::default()
            .connect_request("http://example.com/channel/")
            .unwrap();
        assert_eq!(request.test_url.as_str(), "http://example.com/channel/test");
        assert_eq!(request.channel_url.as_str(), "http://example.com/channel/bind");
        assert!(request.extra_params.is_empty());
    }

    #[test]
    fn test_explicit_test_url_and_params() {
        let mut options = ChannelOptions {
            test_url: Some("http://probe.example.com/t".into()),
            ..ChannelOptions::default()
        };
        options.message_url_params.insert("app".into(), "chat".into());
        let request = options.connect_request("http://example.com/channel").unwrap();
        assert_eq!(request.test_url.as_str(), "http://probe.example.com/t");
        assert_eq!(request.extra_params, vec![("app".into(), "chat".into())]);
    }

    #[test]
    fn test_invalid_url() {
        assert!(ChannelOptions::default().connect_request("::nope").is_err());
    }

    #[test]
    fn test_to_config() {
        let mut options = ChannelOptions {
            concurrent_request_limit: Some(4),
            client_protocol_header_required: true,
            http_session_id_param: Some("hsid".into()),
            fail_fast: true,
            ..ChannelOptions::default()
        };
        options.message_headers.insert("X-App".into(), "1".into());
        options.init_message_headers.insert("X-Init".into(), "2".into());

        let config = options.to_config();
        assert_eq!(config.concurrent_request_limit, 4);
        assert!(config.client_protocol_header_required);
        assert_eq!(config.http_session_id_param.as_deref(), Some("hsid"));
        assert_eq!(config.effective_forward_retries(), 0);
        assert_eq!(config.message_headers, vec![("X-App".into(), "1".into())]);
        assert_eq!(config.init_message_headers, vec![("X-Init".into(), "2".into())]);
    }

    #[test]
    fn test_deserialize_partial() {
        let options: ChannelOptions =
            serde_json::from_str(r#"{"send_raw_json": true, "message_headers": {"X-A": "b"}}"#)
                .unwrap();
        assert!(options.send_raw_json);
        assert_eq!(options.message_headers.get("X-A").map(String::as_str), Some("b"));
        assert!(options.test_url.is_none());
    }
}
