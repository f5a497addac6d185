use crate::client::config::Config;
use crate::client::consts::{API_KEY_HEADER, LIVE_PATH};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}{}", config.base_url(), LIVE_PATH).into_client_request()?;
    request.headers_mut().insert(
        API_KEY_HEADER,
        config.api_key().expose_secret().parse()?,
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_puts_key_in_header() {
        let config = Config::builder()
            .with_base_url("wss://example.test")
            .with_api_key("secret-key")
            .build();

        let request = build_request(&config).unwrap();

        assert_eq!(
            request.uri().to_string(),
            format!("wss://example.test{}", LIVE_PATH)
        );
        assert_eq!(request.headers()[API_KEY_HEADER], "secret-key");
        assert!(!request.uri().to_string().contains("secret-key"));
    }
}
