use reqwest::Url;

use ravenlogs_types::{Error, LogFilter, Result};

const CONFIGURE_PATH: &str = "/admin/logs/configure";
const EVENTS_PATH: &str = "/admin/logs/events";

/// Suffix asking the server to leave stack traces out of watched records
const NO_WATCH_STACK: &str = "no-watch-stack";

/// Watch registration endpoint:
/// `{server}/admin/logs/configure?watch-category={category}:{level}:no-watch-stack&id={id}`
pub fn configure_url(server_url: &str, watch: &LogFilter, session_id: &str) -> Result<Url> {
    let base = server_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}{CONFIGURE_PATH}"))
        .map_err(|e| Error::Network(format!("invalid server url {server_url}: {e}")))?;

    url.query_pairs_mut()
        .append_pair(
            "watch-category",
            &format!("{}:{NO_WATCH_STACK}", watch.watch_category()),
        )
        .append_pair("id", session_id);

    Ok(url)
}

/// Event stream endpoint: `ws://host:port/admin/logs/events?id={id}`, or
/// `wss://` when the server is reached over https
pub fn events_url(server_url: &str, session_id: &str) -> Result<String> {
    let url = Url::parse(server_url)
        .map_err(|e| Error::WebSocket(format!("invalid server url {server_url}: {e}")))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(Error::WebSocket(format!("unsupported scheme: {other}"))),
    };
    let host = url
        .host_str()
        .ok_or_else(|| Error::WebSocket(format!("server url has no host: {server_url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::WebSocket(format!("server url has no port: {server_url}")))?;

    Ok(format!("{scheme}://{host}:{port}{EVENTS_PATH}?id={session_id}"))
}
