use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ReadyResponse {
    ready: bool,
}

pub fn parse_ready(body: &[u8]) -> anyhow::Result<bool> {
    let resp: ReadyResponse = serde_json::from_slice(body).context("decode readiness JSON")?;
    Ok(resp.ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ready_flag() {
        assert!(parse_ready(br#"{"ready":true}"#).unwrap());
        assert!(!parse_ready(br#"{"ready":false,"segments":0}"#).unwrap());
    }

    #[test]
    fn missing_flag_errors() {
        assert!(parse_ready(br#"{}"#).is_err());
        assert!(parse_ready(b"not json").is_err());
        assert!(parse_ready(br#"{"ready":"yes"}"#).is_err());
    }
}
