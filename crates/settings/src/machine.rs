/// Best-effort stable identifier for this host, used only as one input to
/// the client id CRC32 (`minerproxy_core::client_id`). Never treated as a
/// secret or an authenticator.
pub fn machine_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}
