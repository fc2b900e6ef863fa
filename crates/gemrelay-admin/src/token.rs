use time::OffsetDateTime;

pub const SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Session tokens are `<expiry-unix>.<hex signature>`: a keyed blake3 over
/// the expiry timestamp. Verification needs only the signature and expiry
/// check; nothing is stored server-side.
pub fn issue(secret: &str, now: OffsetDateTime) -> (String, i64) {
    let expires_at = now.unix_timestamp() + SESSION_TTL_SECONDS;
    (
        format!("{expires_at}.{}", signature(secret, expires_at)),
        expires_at,
    )
}

pub fn verify(secret: &str, token: &str, now: OffsetDateTime) -> bool {
    let Some((expiry, given)) = token.split_once('.') else {
        return false;
    };
    let Ok(expires_at) = expiry.parse::<i64>() else {
        return false;
    };
    if expires_at <= now.unix_timestamp() {
        return false;
    }
    let Ok(given) = blake3::Hash::from_hex(given) else {
        return false;
    };
    // blake3::Hash equality is constant-time.
    expected_hash(secret, expires_at) == given
}

fn signature(secret: &str, expires_at: i64) -> String {
    expected_hash(secret, expires_at).to_hex().to_string()
}

fn expected_hash(secret: &str, expires_at: i64) -> blake3::Hash {
    let key = blake3::hash(secret.as_bytes());
    blake3::keyed_hash(key.as_bytes(), expires_at.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn issued_token_verifies_until_expiry() {
        let now = OffsetDateTime::now_utc();
        let (token, expires_at) = issue("secret", now);
        assert_eq!(expires_at, now.unix_timestamp() + SESSION_TTL_SECONDS);
        assert!(verify("secret", &token, now));
        assert!(verify(
            "secret",
            &token,
            now + Duration::seconds(SESSION_TTL_SECONDS - 1)
        ));
        assert!(!verify(
            "secret",
            &token,
            now + Duration::seconds(SESSION_TTL_SECONDS)
        ));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let now = OffsetDateTime::now_utc();
        let (token, _) = issue("secret", now);
        assert!(!verify("other-secret", &token, now));

        let (expiry, signature) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", expiry.parse::<i64>().unwrap() + 3600, signature);
        assert!(!verify("secret", &forged, now));

        assert!(!verify("secret", "garbage", now));
        assert!(!verify("secret", "123.nothex", now));
    }
}
