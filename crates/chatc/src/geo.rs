use crate::config::ClientConfig;
use crate::error::LookupError;
use crate::events::{ChatEvent, EventBus};
use chat_common::AddressInfo;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{error, info};

#[derive(Deserialize)]
struct GeoResponse {
    ip: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    district: String,
    #[serde(default)]
    organization: String,
}

impl GeoResponse {
    fn into_address(self) -> Result<AddressInfo, LookupError> {
        let ip = self.ip.trim();
        if ip.parse::<IpAddr>().is_err() {
            return Err(LookupError::InvalidIp(self.ip));
        }
        Ok(AddressInfo {
            ip: ip.to_string(),
            country: self.country,
            region: self.region,
            city: self.city,
            district: self.district,
            isp: self.organization,
        })
    }
}

/// HTTP client for the public-address lookup service.
#[derive(Clone)]
pub struct GeoClient {
    http: Client,
    url: String,
}

impl GeoClient {
    /// Builds a client for `url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Http`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, LookupError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    /// Fetches our public address and its location.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Http`] on transport, status or body errors and
    /// [`LookupError::InvalidIp`] if the reported address does not parse.
    pub async fn lookup(&self) -> Result<AddressInfo, LookupError> {
        let response: GeoResponse = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_address()
    }
}

/// Determines the address to announce, publishing the outcome on `events`.
///
/// A configured `client.ip` is used as is. Otherwise the lookup service is
/// queried once; on failure `None` is returned and the client must not
/// connect.
pub async fn resolve_own_address(config: &ClientConfig, events: &EventBus) -> Option<AddressInfo> {
    let result = if config.client.ip.is_empty() {
        let timeout = Duration::from_millis(config.geolocation.timeout_ms);
        match GeoClient::new(&config.geolocation.url, timeout) {
            Ok(client) => client.lookup().await,
            Err(e) => Err(e),
        }
    } else {
        Ok(AddressInfo {
            ip: config.client.ip.clone(),
            ..AddressInfo::default()
        })
    };

    match result {
        Ok(info) => {
            info!(ip = %info.ip, city = %info.city, "own address resolved");
            events.publish(ChatEvent::OwnAddress { info: info.clone() });
            Some(info)
        }
        Err(e) => {
            error!(error = %e, "failed to resolve own address");
            events.publish(ChatEvent::AddressLookupFailed {
                reason: e.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the URL to hit.
    async fn one_shot_http(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        format!("http://{addr}/v1/ip/geo.json")
    }

    fn lookup_config(url: String) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.geolocation.url = url;
        config.geolocation.timeout_ms = 2000;
        config
    }

    #[tokio::test]
    async fn lookup_maps_organization_to_isp() {
        let url = one_shot_http(
            "200 OK",
            r#"{"ip":"198.51.100.23","country":"New Zealand","region":"Wellington","city":"Wellington","organization":"AS0000 Example Net"}"#,
        )
        .await;
        let client = GeoClient::new(&url, Duration::from_secs(2)).unwrap();

        let info = client.lookup().await.unwrap();

        assert_eq!(info.ip, "198.51.100.23");
        assert_eq!(info.city, "Wellington");
        assert_eq!(info.isp, "AS0000 Example Net");
        assert!(info.district.is_empty());
    }

    #[tokio::test]
    async fn lookup_rejects_garbage_address() {
        let url = one_shot_http("200 OK", r#"{"ip":"nowhere"}"#).await;
        let client = GeoClient::new(&url, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.lookup().await,
            Err(LookupError::InvalidIp(_))
        ));
    }

    #[tokio::test]
    async fn lookup_fails_on_http_error_status() {
        let url = one_shot_http("503 Service Unavailable", "{}").await;
        let client = GeoClient::new(&url, Duration::from_secs(2)).unwrap();
        assert!(matches!(client.lookup().await, Err(LookupError::Http(_))));
    }

    #[tokio::test]
    async fn resolve_publishes_own_address() {
        let url = one_shot_http("200 OK", r#"{"ip":"203.0.113.44","city":"Auckland"}"#).await;
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let info = resolve_own_address(&lookup_config(url), &bus).await.unwrap();

        assert_eq!(info.ip, "203.0.113.44");
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::OwnAddress { info });
    }

    #[tokio::test]
    async fn resolve_failure_publishes_lookup_failed() {
        // nothing listens on this port once the listener is dropped
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let info = resolve_own_address(&lookup_config(format!("http://{addr}/")), &bus).await;

        assert!(info.is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChatEvent::AddressLookupFailed { .. }
        ));
    }

    #[tokio::test]
    async fn fixed_ip_skips_lookup() {
        let mut config = ClientConfig::default();
        config.client.ip = "192.0.2.8".to_string();
        config.geolocation.url = "http://127.0.0.1:9/unreachable".to_string();
        let bus = EventBus::new(8);

        let info = resolve_own_address(&config, &bus).await.unwrap();

        assert_eq!(info.ip, "192.0.2.8");
    }
}
