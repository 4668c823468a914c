use dashmap::DashMap;
use rand::RngCore;
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as Ms
}

fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Hash a password with a fresh 16-byte salt. Stored form:
/// `<salt_hex>$<blake3_hex>`.
pub fn hash_password(password: &str) -> String {
    let salt = random_hex(16);
    let digest = blake3::hash(format!("{salt}:{password}").as_bytes());
    format!("{salt}${}", digest.to_hex())
}

/// Verify a candidate password against a stored hash. Comparison goes
/// through `blake3::Hash`, which compares in constant time.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(stored_digest) = blake3::Hash::from_hex(digest_hex) else {
        return false;
    };
    blake3::hash(format!("{salt}:{password}").as_bytes()) == stored_digest
}

struct Session {
    user_id: Ulid,
    expires_at: Ms,
}

/// Opaque bearer tokens mapped server-side to user ids. In-memory only —
/// a restart invalidates all sessions.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl_ms: Ms,
}

impl SessionStore {
    pub fn new(ttl_ms: Ms) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl_ms,
        }
    }

    /// Mint a fresh token for the user. 32 random bytes, hex-encoded.
    pub fn issue(&self, user_id: Ulid) -> String {
        let token = random_hex(32);
        self.sessions.insert(
            token.clone(),
            Session {
                user_id,
                expires_at: now_ms() + self.ttl_ms,
            },
        );
        token
    }

    /// Resolve a token to its user id. Expired tokens are dropped on sight.
    pub fn resolve(&self, token: &str) -> Option<Ulid> {
        let expired = match self.sessions.get(token) {
            Some(session) if session.expires_at > now_ms() => return Some(session.user_id),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(token);
        }
        None
    }

    /// Drop every expired session. Called by the background sweeper.
    /// Returns the number of sessions removed.
    pub fn purge_expired(&self, now: Ms) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
