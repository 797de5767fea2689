use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::Proxy;

use crate::core::config::NetworkConfig;

const USER_AGENT: &str = concat!("gitdeps/", env!("CARGO_PKG_VERSION"));

/// How pack requests reach the server.
#[derive(Debug, PartialEq, Eq)]
enum ProxyRoute<'a> {
    Direct,
    Explicit(&'a str),
    System,
}

/// A manifest asking to bypass proxies wins over every other setting.
fn proxy_route(network: &NetworkConfig, ignore_proxy: bool) -> ProxyRoute<'_> {
    if ignore_proxy {
        return ProxyRoute::Direct;
    }
    match network.proxy.as_deref() {
        Some(proxy) => ProxyRoute::Explicit(proxy),
        None if network.system_proxies => ProxyRoute::System,
        None => ProxyRoute::Direct,
    }
}

/// Client used by every download worker of a run. Transfers have no
/// deadline; stuck transfers are handled by retry escalation instead.
/// Pack bodies are gzip files and are decoded by the workers, not the client.
pub(crate) fn http_client(network: &NetworkConfig, ignore_proxy: bool) -> Result<Client> {
    let builder = Client::builder()
        .user_agent(USER_AGENT)
        .no_gzip()
        .timeout(Option::<Duration>::None);
    let builder = match proxy_route(network, ignore_proxy) {
        ProxyRoute::Direct => builder.no_proxy(),
        ProxyRoute::Explicit(proxy) => builder.proxy(
            Proxy::all(proxy).with_context(|| format!("invalid proxy address '{proxy}'"))?,
        ),
        ProxyRoute::System => builder,
    };
    builder.build().context("failed to build http client")
}
