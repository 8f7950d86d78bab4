use rand::RngCore;

/// Width, in bytes, of a session id on the wire.
///
/// The distilled protocol left this unspecified; 8 bytes (64-bit random)
/// is the value this implementation fixes and publishes, matching the
/// recommendation for a fresh deployment with no byte-compatibility
/// constraint to an existing one.
pub const SESSION_ID_LEN: usize = 8;

/// Opaque identifier for one end-to-end logical stream, unique within one
/// endpoint for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub [u8; SESSION_ID_LEN]);

impl SessionId {
    /// The reserved id used only by the tunnel handshake frame.
    pub const HANDSHAKE: SessionId = SessionId([0u8; SESSION_ID_LEN]);

    /// Generate a fresh session id from a CSPRNG.
    ///
    /// Collisions are possible in principle but astronomically unlikely
    /// for any realistic number of concurrent sessions on one endpoint.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        SessionId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        SessionId(bytes)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Deterministic identifier grouping tunnels belonging to the same client
/// instance, for server-side telemetry only.
///
/// `crc32(machine_id | secret | server_addr | listen_port | pool_addr)`.
/// CRC32 is not a hash and is kept only for wire compatibility with the
/// original relay; it must never be treated as an authenticator.
pub fn client_id(
    machine_id: &str,
    secret: &str,
    server_addr: &str,
    listen_port: &str,
    pool_addr: &str,
) -> String {
    let joined = format!("{machine_id}-{secret}-{server_addr}-{listen_port}-{pool_addr}");
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(joined.as_bytes());
    format!("{:08x}", hasher.finalize())
}
