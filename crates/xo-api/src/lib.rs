//! Typed Rust client for the Xen Orchestra JSON-RPC API.
//!
//! Covers the subset needed for driving machine lifecycles:
//! session sign-in, VM create/get/start/stop/delete/restart and
//! network lookup. Calls travel as JSON-RPC 2.0 frames over the
//! `/api/` WebSocket endpoint.

mod types;

pub use types::*;

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("xo websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("xo tls setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("xo payload decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xo {method} returned error {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("xo protocol error: {0}")]
    Protocol(String),

    #[error("invalid xo url: {0}")]
    InvalidUrl(String),

    #[error("xo {method} timed out after {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },

    #[error("no {kind} matching {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{count} {kind} objects match {key}")]
    Ambiguous {
        kind: &'static str,
        key: String,
        count: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

/// Authenticated session against a Xen Orchestra server.
///
/// Holds one WebSocket. Calls are strictly sequential, so a session is
/// `&mut` for every request.
pub struct XoClient {
    ws: WsStream,
    next_id: u64,
}

/// Map the configured service URL onto its JSON-RPC WebSocket endpoint.
pub fn api_endpoint(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    let ws_scheme = match scheme {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(Error::InvalidUrl(url.to_string())),
    };
    if rest.is_empty() {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    let rest = rest.strip_suffix("/api").unwrap_or(rest);
    Ok(format!("{ws_scheme}://{rest}/api/"))
}

impl XoClient {
    /// Open the WebSocket and sign in with the configured credentials.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let endpoint = api_endpoint(&config.url)?;

        let connector = if config.insecure {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (ws, _) =
            tokio_tungstenite::connect_async_tls_with_config(endpoint.as_str(), None, false, connector)
                .await?;
        tracing::debug!(%endpoint, "xo: websocket open");

        let mut client = Self { ws, next_id: 0 };
        client.sign_in(&config.username, &config.password).await?;
        Ok(client)
    }

    async fn sign_in(&mut self, username: &str, password: &str) -> Result<()> {
        let _user: Value = self
            .call(
                "session.signIn",
                json!({ "email": username, "password": password }),
            )
            .await?;
        tracing::debug!(username, "xo: signed in");
        Ok(())
    }

    async fn call<P, R>(&mut self, method: &'static str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.next_id += 1;
        let id = self.next_id;

        let params = serde_json::to_value(params)?;
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();
        self.ws.send(Message::Text(frame.into())).await?;

        while let Some(msg) = self.ws.next().await {
            let payload: Value = match msg? {
                Message::Text(text) => serde_json::from_str(text.as_str())?,
                Message::Binary(bytes) => serde_json::from_slice(&bytes)?,
                Message::Close(_) => break,
                _ => continue,
            };

            // Server notifications carry no id.
            if payload.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }

            if let Some(err) = payload.get("error") {
                return Err(Error::Rpc {
                    method,
                    code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }

            let result = payload.get("result").cloned().unwrap_or(Value::Null);
            return serde_json::from_value(result).map_err(Error::from);
        }

        Err(Error::Protocol(format!(
            "connection closed before {method} response"
        )))
    }

    /// Fetch exactly one object of `kind` matching `filter`.
    async fn get_one<T: DeserializeOwned>(
        &mut self,
        kind: &'static str,
        key: &str,
        filter: Value,
    ) -> Result<T> {
        let objects: BTreeMap<String, T> = self
            .call("xo.getAllObjects", json!({ "filter": filter }))
            .await?;

        let count = objects.len();
        let mut objects = objects.into_values();
        match (objects.next(), count) {
            (Some(object), 1) => Ok(object),
            (None, _) => Err(Error::NotFound {
                kind,
                key: key.to_string(),
            }),
            (Some(_), count) => Err(Error::Ambiguous {
                kind,
                key: key.to_string(),
                count,
            }),
        }
    }

    // ── VMs ──────────────────────────────────────────────────────────

    /// Create a VM and return its id. Only the `vm.create` call itself is
    /// bounded by `timeout`; the new object may not be visible to lookups
    /// straight away.
    pub async fn create_vm(&mut self, req: &CreateVmRequest, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, self.call::<_, String>("vm.create", req))
            .await
            .map_err(|_| Error::Timeout {
                method: "vm.create",
                timeout,
            })?
    }

    pub async fn get_vm(&mut self, id: &str) -> Result<Vm> {
        self.get_one("VM", id, json!({ "type": "VM", "id": id }))
            .await
    }

    pub async fn start_vm(&mut self, id: &str) -> Result<()> {
        let _: Value = self.call("vm.start", json!({ "id": id })).await?;
        Ok(())
    }

    /// Clean guest shutdown.
    pub async fn halt_vm(&mut self, id: &str) -> Result<()> {
        let _: Value = self
            .call("vm.stop", json!({ "id": id, "force": false }))
            .await?;
        Ok(())
    }

    /// Immediate power-off, bypassing the guest.
    pub async fn force_stop_vm(&mut self, id: &str) -> Result<()> {
        let _: Value = self
            .call("vm.stop", json!({ "id": id, "force": true }))
            .await?;
        Ok(())
    }

    pub async fn restart_vm(&mut self, id: &str) -> Result<()> {
        let _: Value = self
            .call("vm.restart", json!({ "id": id, "force": false }))
            .await?;
        Ok(())
    }

    pub async fn delete_vm(&mut self, id: &str) -> Result<()> {
        let _: Value = self.call("vm.delete", json!({ "id": id })).await?;
        Ok(())
    }

    // ── Networks ─────────────────────────────────────────────────────

    pub async fn get_network_by_name(&mut self, name: &str) -> Result<Network> {
        self.get_one(
            "network",
            name,
            json!({ "type": "network", "name_label": name }),
        )
        .await
    }

    pub async fn get_network_by_id(&mut self, id: &str) -> Result<Network> {
        self.get_one("network", id, json!({ "type": "network", "id": id }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_maps_scheme_and_path() {
        assert_eq!(
            api_endpoint("https://xo.example.com").unwrap(),
            "wss://xo.example.com/api/"
        );
        assert_eq!(
            api_endpoint("http://10.0.0.2:8080/").unwrap(),
            "ws://10.0.0.2:8080/api/"
        );
        assert_eq!(
            api_endpoint("wss://xo.example.com/api/").unwrap(),
            "wss://xo.example.com/api/"
        );
    }

    #[test]
    fn endpoint_rejects_unknown_scheme() {
        assert!(matches!(
            api_endpoint("xo.example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            api_endpoint("ftp://xo.example.com"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn memory_spec_is_byte_range() {
        let mem = MemorySpec::from_mib(2048);
        assert_eq!(mem.static_range, [0, 2_147_483_648]);
        assert_eq!(
            serde_json::to_value(mem).unwrap(),
            json!({ "static": [0, 2_147_483_648u64] })
        );
    }

    fn sample_request() -> CreateVmRequest {
        CreateVmRequest {
            name_label: "m1".into(),
            name_description: "d".into(),
            template: "tmpl-1".into(),
            cpus: Cpus { number: 2, max: 2 },
            memory: MemorySpec::from_mib(1),
            cloud_config: None,
            vifs: vec![],
            boot_after_create: true,
        }
    }

    #[test]
    fn memory_range_saturates_instead_of_overflowing() {
        assert_eq!(MemorySpec::from_mib(u64::MAX).static_range, [0, u64::MAX]);
    }

    #[test]
    fn create_request_omits_empty_optionals() {
        let req = sample_request();
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("cloudConfig").is_none());
        assert!(value.get("VIFs").is_none());
        assert_eq!(value["CPUs"], json!({ "number": 2, "max": 2 }));
    }

    #[test]
    fn vm_addresses_iterate_in_key_order() {
        let vm: Vm = serde_json::from_value(json!({
            "id": "vm-1",
            "power_state": "Running",
            "addresses": {
                "0/ipv6/0": "fe80::1",
                "0/ipv4/0": "10.0.0.5"
            }
        }))
        .unwrap();
        let addrs: Vec<_> = vm.addresses().collect();
        assert_eq!(addrs, vec!["10.0.0.5", "fe80::1"]);
        assert!(vm.cpus.is_none());
    }

    // ── Wire behaviour against a local WebSocket server ─────────────

    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn text(frame: Value) -> Message {
        Message::Text(frame.to_string().into())
    }

    fn reply(req: &Value, result: Value) -> Message {
        text(json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }))
    }

    /// Accept one connection. `session.signIn` always succeeds; any other
    /// request is answered with the frames `respond` returns. The handle
    /// yields every request received, in order.
    async fn serve<F>(respond: F) -> (ClientConfig, JoinHandle<Vec<Value>>)
    where
        F: Fn(&Value) -> Vec<Message> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();

            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(body) = msg else {
                    continue;
                };
                let req: Value = serde_json::from_str(body.as_str()).unwrap();
                let frames = if req["method"] == "session.signIn" {
                    vec![reply(&req, json!({ "id": "user-1", "email": "admin@admin.net" }))]
                } else {
                    respond(&req)
                };
                received.push(req);

                for frame in frames {
                    let closing = matches!(frame, Message::Close(_));
                    if ws.send(frame).await.is_err() || closing {
                        return received;
                    }
                }
            }
            received
        });

        let config = ClientConfig {
            url: format!("http://{addr}"),
            username: "admin@admin.net".into(),
            password: "secret".into(),
            insecure: false,
        };
        (config, handle)
    }

    #[tokio::test]
    async fn stop_and_restart_send_their_force_flags() {
        let (config, server) = serve(|req| vec![reply(req, json!(true))]).await;
        let mut client = XoClient::connect(&config).await.unwrap();

        client.halt_vm("vm-1").await.unwrap();
        client.force_stop_vm("vm-1").await.unwrap();
        client.restart_vm("vm-1").await.unwrap();
        drop(client);

        let received = server.await.unwrap();
        let calls: Vec<_> = received
            .iter()
            .map(|r| (r["method"].clone(), r["params"].clone()))
            .collect();
        assert_eq!(
            calls,
            vec![
                (
                    json!("session.signIn"),
                    json!({ "email": "admin@admin.net", "password": "secret" })
                ),
                (json!("vm.stop"), json!({ "id": "vm-1", "force": false })),
                (json!("vm.stop"), json!({ "id": "vm-1", "force": true })),
                (json!("vm.restart"), json!({ "id": "vm-1", "force": false })),
            ]
        );
        assert!(received.iter().all(|r| r["jsonrpc"] == "2.0"));
    }

    #[tokio::test]
    async fn create_returns_id_and_skips_unrelated_frames() {
        let (config, server) = serve(|req| {
            if req["method"] != "vm.create" {
                return vec![reply(req, json!({}))];
            }
            vec![
                text(json!({ "jsonrpc": "2.0", "method": "all", "params": { "type": "enter" } })),
                text(json!({ "jsonrpc": "2.0", "id": 9999, "result": "vm-stale" })),
                reply(req, json!("vm-new-123")),
            ]
        })
        .await;
        let mut client = XoClient::connect(&config).await.unwrap();

        let id = client
            .create_vm(&sample_request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(id, "vm-new-123");

        // a lookup against a cache that has not caught up fails on its own
        assert!(matches!(
            client.get_vm(&id).await,
            Err(Error::NotFound { kind: "VM", .. })
        ));
        drop(client);

        let methods: Vec<_> = server
            .await
            .unwrap()
            .iter()
            .map(|r| r["method"].clone())
            .collect();
        assert_eq!(
            methods,
            vec![
                json!("session.signIn"),
                json!("vm.create"),
                json!("xo.getAllObjects")
            ]
        );
    }

    #[tokio::test]
    async fn error_object_becomes_rpc_error() {
        let (config, _server) = serve(|req| {
            vec![text(json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": 1, "message": "no such VM" }
            }))]
        })
        .await;
        let mut client = XoClient::connect(&config).await.unwrap();

        match client.delete_vm("vm-1").await {
            Err(Error::Rpc {
                method,
                code,
                message,
            }) => {
                assert_eq!(method, "vm.delete");
                assert_eq!(code, 1);
                assert_eq!(message, "no such VM");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_without_reply_is_a_protocol_error() {
        let (config, _server) = serve(|_| vec![Message::Close(None)]).await;
        let mut client = XoClient::connect(&config).await.unwrap();

        assert!(matches!(
            client.start_vm("vm-1").await,
            Err(Error::Protocol(_))
        ));
    }
}
