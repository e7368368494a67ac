use crate::client::config::Config;
use crate::client::consts::{AUTHORIZATION_HEADER, PROTOCOL_HEADER, PROTOCOL_VERSION, SESSION_PATH};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}/{}", config.base_url(), SESSION_PATH).into_client_request()?;
    let key = config.api_key().expose_secret();
    if !key.is_empty() {
        request
            .headers_mut()
            .insert(AUTHORIZATION_HEADER, format!("Bearer {key}").as_str().parse()?);
    }
    request
        .headers_mut()
        .insert(PROTOCOL_HEADER, PROTOCOL_VERSION.parse()?);
    Ok(request)
}
