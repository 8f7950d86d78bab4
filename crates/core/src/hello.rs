use std::net::SocketAddr;

/// Plaintext carried (AES-encrypted) inside a tunnel's handshake hello.
///
/// Besides the client id used for telemetry grouping, a tunnel announces
/// the upstream pool override it was opened for, if any: a client with
/// several listen-port groups opens one pool of tunnels per group, and
/// each tunnel in that pool announces the same override so the server
/// can pin every session it carries to the right upstream without the
/// client repeating the address on every `OPEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub client_id: String,
    pub pool_override: Option<SocketAddr>,
}

impl Hello {
    pub fn encode(&self) -> Vec<u8> {
        let pool = self.pool_override.map(|a| a.to_string()).unwrap_or_default();
        format!("{}|{}", self.client_id, pool).into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        let (client_id, pool) = text
            .split_once('|')
            .ok_or_else(|| "malformed hello: missing separator".to_string())?;
        let pool_override = if pool.is_empty() {
            None
        } else {
            Some(pool.parse().map_err(|e: std::net::AddrParseError| e.to_string())?)
        };
        Ok(Hello { client_id: client_id.to_string(), pool_override })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_override() {
        let hello = Hello { client_id: "abcd1234".into(), pool_override: None };
        let decoded = Hello::decode(&hello.encode()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn round_trips_with_override() {
        let hello = Hello {
            client_id: "abcd1234".into(),
            pool_override: Some("127.0.0.1:3333".parse().unwrap()),
        };
        let decoded = Hello::decode(&hello.encode()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn rejects_malformed_hello() {
        assert!(Hello::decode(b"no-separator-here").is_err());
    }
}
