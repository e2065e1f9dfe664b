use crate::parse::parse_ready;
use crate::request::HttpRequest;
use crate::runtime::HttpExecutor;
use anyhow::anyhow;
use fleetdeck_core::{DeviceAddress, StreamEndpoints};

pub fn build_readiness_request(endpoints: &StreamEndpoints, address: &DeviceAddress) -> HttpRequest {
    HttpRequest::get(endpoints.readiness_url(address))
}

/// Asks the coordinator whether a device's playlist has enough segments to play.
///
/// Any transport failure, non-2xx status, or unparseable body is an error; the
/// caller decides how to degrade.
pub async fn check_ready(
    http: &HttpExecutor,
    endpoints: &StreamEndpoints,
    address: &DeviceAddress,
) -> anyhow::Result<bool> {
    let req = build_readiness_request(endpoints, address);
    let resp = http.execute(&req).await?;
    if !resp.is_success() {
        return Err(anyhow!(
            "readiness check for {address} failed: status={}",
            resp.status
        ));
    }
    parse_ready(&resp.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor() -> HttpExecutor {
        HttpExecutor::new(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn request_targets_check_ready_resource() {
        let ep = StreamEndpoints::new("http://localhost:5000");
        let req = build_readiness_request(&ep, &DeviceAddress::new("172.21.100.51"));
        assert_eq!(req.accept, "application/json");
        assert_eq!(
            req.url,
            "http://localhost:5000/hls_streams/check_ready/gopro_172_21_100_51.m3u8"
        );
    }

    #[tokio::test]
    async fn reports_ready_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls_streams/check_ready/gopro_10_0_0_1.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"ready":true}"#, "application/json"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hls_streams/check_ready/gopro_10_0_0_2.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"ready":false}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let ep = StreamEndpoints::new(server.uri());
        let http = executor();
        assert!(check_ready(&http, &ep, &DeviceAddress::new("10.0.0.1")).await.unwrap());
        assert!(!check_ready(&http, &ep, &DeviceAddress::new("10.0.0.2")).await.unwrap());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ep = StreamEndpoints::new(server.uri());
        let err = check_ready(&executor(), &ep, &DeviceAddress::new("10.0.0.9"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status=404"));
    }

    #[tokio::test]
    async fn garbage_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>", "text/html"))
            .mount(&server)
            .await;

        let ep = StreamEndpoints::new(server.uri());
        assert!(
            check_ready(&executor(), &ep, &DeviceAddress::new("10.0.0.1"))
                .await
                .is_err()
        );
    }
}
